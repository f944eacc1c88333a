use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::AppResult;
use crate::schema::folders;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = folders)]
pub struct Folder {
    pub id: i32,
    pub title: String,
    pub is_expanded: bool,
}

/// Partial update sent by the folder editor.
#[derive(Debug, Default, Deserialize, AsChangeset)]
#[diesel(table_name = folders)]
pub struct FolderEditor {
    pub title: Option<String>,
    pub is_expanded: Option<bool>,
}

impl Folder {
    /// Inserts a folder, or returns the existing one when the title is
    /// already taken (titles are unique case-insensitively).
    pub fn create(conn: &mut SqliteConnection, title: &str) -> AppResult<Folder> {
        let folder = diesel::insert_into(folders::table)
            .values((folders::title.eq(title), folders::is_expanded.eq(true)))
            .on_conflict(folders::title)
            .do_update()
            .set(folders::title.eq(title))
            .get_result(conn)?;
        Ok(folder)
    }

    pub fn get(conn: &mut SqliteConnection, folder_id: i32) -> AppResult<Folder> {
        Ok(folders::table.find(folder_id).first(conn)?)
    }

    pub fn list(conn: &mut SqliteConnection) -> AppResult<Vec<Folder>> {
        Ok(folders::table
            .order(diesel::dsl::sql::<diesel::sql_types::Text>("title collate nocase"))
            .load(conn)?)
    }

    pub fn edit(
        conn: &mut SqliteConnection,
        folder_id: i32,
        editor: &FolderEditor,
    ) -> AppResult<()> {
        if editor.title.is_none() && editor.is_expanded.is_none() {
            return Ok(());
        }
        diesel::update(folders::table.find(folder_id))
            .set(editor)
            .execute(conn)?;
        Ok(())
    }

    /// Deleting a folder cascades to its feeds and their items.
    pub fn delete(conn: &mut SqliteConnection, folder_id: i32) -> AppResult<()> {
        diesel::delete(folders::table.find(folder_id)).execute(conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::get_test_db_connection;

    #[test]
    fn it_upserts_on_title_conflict() {
        let mut conn = get_test_db_connection();
        let first = Folder::create(&mut conn, "News").unwrap();
        let second = Folder::create(&mut conn, "News").unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(Folder::list(&mut conn).unwrap().len(), 1);
    }

    #[test]
    fn it_orders_folders_by_title_nocase() {
        let mut conn = get_test_db_connection();
        Folder::create(&mut conn, "beta").unwrap();
        Folder::create(&mut conn, "Alpha").unwrap();
        let titles: Vec<String> = Folder::list(&mut conn)
            .unwrap()
            .into_iter()
            .map(|f| f.title)
            .collect();
        assert_eq!(titles, vec!["Alpha", "beta"]);
    }
}
