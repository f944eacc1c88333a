pub mod feed;
pub mod folder;
pub mod item;
pub mod settings;

pub use feed::{Feed, FeedEditor, FeedState, HttpState, NewFeed};
pub use folder::{Folder, FolderEditor};
pub use item::{Item, ItemFilter, ItemStatus, NewItem};
