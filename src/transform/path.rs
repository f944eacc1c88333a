//! The small path language JSON rules use to address values inside a
//! document: `a.b` descends, `a.0` indexes, `a.#` is an array's
//! length, `a.#.b` projects `b` over the array, and `*`/`?` glob a
//! single key.

use serde_json::Value;

pub fn query(root: &Value, path: &str) -> Value {
    if path.is_empty() {
        return root.clone();
    }
    let segments: Vec<&str> = path.split('.').collect();
    eval(root, &segments)
}

/// String form of a queried value; scalars render bare, everything
/// else as JSON.
pub fn query_string(root: &Value, path: &str) -> String {
    match query(root, path) {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Array form: arrays yield their elements, null yields nothing, and
/// any other value wraps itself.
pub fn query_array(root: &Value, path: &str) -> Vec<Value> {
    match query(root, path) {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn eval(value: &Value, segments: &[&str]) -> Value {
    let Some((segment, rest)) = segments.split_first() else {
        return value.clone();
    };

    match value {
        Value::Array(items) => match *segment {
            "#" => {
                if rest.is_empty() {
                    Value::from(items.len())
                } else {
                    // Map-and-project: apply the remaining path to
                    // every element, dropping misses.
                    let projected: Vec<Value> = items
                        .iter()
                        .map(|item| eval(item, rest))
                        .filter(|v| !v.is_null())
                        .collect();
                    Value::Array(projected)
                }
            }
            index => match index.parse::<usize>() {
                Ok(index) => match items.get(index) {
                    Some(item) => eval(item, rest),
                    None => Value::Null,
                },
                Err(_) => Value::Null,
            },
        },
        Value::Object(map) => {
            let found = map.get(*segment).or_else(|| {
                if segment.contains(['*', '?']) {
                    map.iter()
                        .find(|(key, _)| glob_match(segment, key))
                        .map(|(_, value)| value)
                } else {
                    None
                }
            });
            match found {
                Some(next) => eval(next, rest),
                None => Value::Null,
            }
        }
        _ => Value::Null,
    }
}

/// Minimal glob: `*` spans any run, `?` one character.
fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    matches_at(&pattern, &name)
}

fn matches_at(pattern: &[char], name: &[char]) -> bool {
    match pattern.split_first() {
        None => name.is_empty(),
        Some(('*', rest)) => {
            (0..=name.len()).any(|skip| matches_at(rest, &name[skip..]))
        }
        Some(('?', rest)) => !name.is_empty() && matches_at(rest, &name[1..]),
        Some((ch, rest)) => name.first() == Some(ch) && matches_at(rest, &name[1..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Value {
        json!({
            "name": {"first": "Tom", "last": "Anderson"},
            "age": 37,
            "children": ["Sara", "Alex", "Jack"],
            "friends": [
                {"first": "Dale", "last": "Murphy"},
                {"first": "Roger", "last": "Craig"},
                {"first": "Jane"}
            ]
        })
    }

    #[test]
    fn dotted_descent() {
        assert_eq!(query_string(&doc(), "name.last"), "Anderson");
        assert_eq!(query_string(&doc(), "age"), "37");
        assert_eq!(query_string(&doc(), "missing.key"), "");
    }

    #[test]
    fn array_indexing() {
        assert_eq!(query_string(&doc(), "children.1"), "Alex");
        assert_eq!(query(&doc(), "children.9"), Value::Null);
    }

    #[test]
    fn hash_is_length_when_terminal() {
        assert_eq!(query(&doc(), "children.#"), json!(3));
    }

    #[test]
    fn hash_projects_when_followed() {
        assert_eq!(
            query(&doc(), "friends.#.first"),
            json!(["Dale", "Roger", "Jane"])
        );
        // Misses drop out of a projection.
        assert_eq!(query(&doc(), "friends.#.last"), json!(["Murphy", "Craig"]));
    }

    #[test]
    fn globs_match_a_single_key() {
        assert_eq!(query_string(&doc(), "name.fir*"), "Tom");
        assert_eq!(query_string(&doc(), "name.?ast"), "Anderson");
    }

    #[test]
    fn empty_path_is_the_root() {
        assert_eq!(query(&doc(), ""), doc());
        assert_eq!(query_array(&json!([1, 2]), "").len(), 2);
        assert_eq!(query_array(&json!({"a": 1}), "").len(), 1);
        assert!(query_array(&Value::Null, "").is_empty());
    }
}
