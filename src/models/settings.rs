use diesel::prelude::*;
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

use crate::errors::AppResult;
use crate::schema::settings;

pub const REFRESH_RATE: &str = "refresh_rate";

/// Settings the UI and the scheduler know about. Unknown keys sent by
/// clients are ignored rather than stored.
static DEFAULTS: Lazy<Map<String, Value>> = Lazy::new(|| {
    let Value::Object(map) = json!({
        "filter": "",
        "feed": "",
        "feed_list_width": 300,
        "item_list_width": 300,
        "sort_newest_first": true,
        "theme_name": "light",
        "theme_font": "",
        "theme_size": 1,
        "refresh_rate": 0,
    }) else {
        unreachable!()
    };
    map
});

pub fn get(conn: &mut SqliteConnection, key: &str) -> AppResult<Value> {
    let stored: Option<String> = settings::table
        .find(key)
        .select(settings::val)
        .first(conn)
        .optional()?;
    match stored {
        Some(raw) => Ok(serde_json::from_str(&raw)?),
        None => Ok(DEFAULTS.get(key).cloned().unwrap_or(Value::Null)),
    }
}

pub fn get_i64(conn: &mut SqliteConnection, key: &str) -> AppResult<i64> {
    Ok(get(conn, key)?.as_i64().unwrap_or(0))
}

pub fn get_all(conn: &mut SqliteConnection) -> AppResult<Map<String, Value>> {
    let mut result = DEFAULTS.clone();
    let rows: Vec<(String, String)> = settings::table.load(conn)?;
    for (key, raw) in rows {
        result.insert(key, serde_json::from_str(&raw)?);
    }
    Ok(result)
}

pub fn update(conn: &mut SqliteConnection, values: &Map<String, Value>) -> AppResult<()> {
    for (key, value) in values {
        if !DEFAULTS.contains_key(key) {
            continue;
        }
        let encoded = serde_json::to_string(value)?;
        diesel::insert_into(settings::table)
            .values((settings::key.eq(key), settings::val.eq(&encoded)))
            .on_conflict(settings::key)
            .do_update()
            .set(settings::val.eq(&encoded))
            .execute(conn)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::get_test_db_connection;

    #[test]
    fn it_falls_back_to_defaults() {
        let mut conn = get_test_db_connection();
        assert_eq!(get_i64(&mut conn, REFRESH_RATE).unwrap(), 0);
        assert_eq!(get(&mut conn, "theme_name").unwrap(), json!("light"));
        assert_eq!(get(&mut conn, "bogus").unwrap(), Value::Null);
    }

    #[test]
    fn it_stores_known_keys_only() {
        let mut conn = get_test_db_connection();
        let Value::Object(update_map) = json!({"refresh_rate": 30, "bogus": 1}) else {
            unreachable!()
        };
        update(&mut conn, &update_map).unwrap();
        assert_eq!(get_i64(&mut conn, REFRESH_RATE).unwrap(), 30);
        assert_eq!(get(&mut conn, "bogus").unwrap(), Value::Null);
    }
}
