use clap::Parser;

/// CLI options
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Address to run the server on
    #[clap(long, default_value = "127.0.0.1:9854")]
    pub addr: String,

    /// Storage file path
    #[clap(long, default_value = "feedloom.db")]
    pub db: String,

    /// Redis url like redis://127.0.0.1:6379, omit to use the
    /// in-memory cache
    #[clap(long, default_value = "")]
    pub redis: String,

    /// Do not use any cache
    #[clap(long)]
    pub no_cache: bool,

    /// Route catalog index url
    #[clap(
        long,
        default_value = "https://raw.githubusercontent.com/DIYgod/RSSHub/gh-pages/build/routes.json"
    )]
    pub routes: String,

    /// Route source code url prefix
    #[clap(long, default_value = "https://unpkg.com/rsshub")]
    pub src: String,
}
