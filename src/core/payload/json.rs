//! JSON payloads queried with GJSON path syntax.
//!
//! Paths are dotted keys (`owner.login`, `tags.1`) with the usual GJSON
//! extensions: `#` for array length, `#.` to fan out over an array,
//! `*`/`?` wildcards in keys, `#(...)` and `#(...)#` queries, and `\.` to
//! escape a literal dot.
use std::any::Any;

use serde_json::Value;

use super::{ExpressionError, JSON_CONTENT_TYPE, PayloadObject, QueryResult, ResultKind};

/// A JSON document validated and parsed at construction.
#[derive(Debug, Clone)]
pub struct JsonPayload {
    raw: Vec<u8>,
    text: String,
    document: Value,
}

impl JsonPayload {
    pub fn new(raw: &[u8]) -> Result<Self, ExpressionError> {
        let document = serde_json::from_slice(raw).map_err(ExpressionError::InvalidJson)?;
        Ok(Self {
            raw: raw.to_vec(),
            text: String::from_utf8_lossy(raw).into_owned(),
            document,
        })
    }

    pub fn document(&self) -> &Value {
        &self.document
    }
}

/// Re-read the raw JSON of a GJSON match, keeping integers integral.
fn structured(expression: &str, found: &gjson::Value) -> Result<Value, ExpressionError> {
    serde_json::from_str(found.json()).map_err(|e| {
        let reason = format!("unreadable match '{}': {e}", found.json());
        ExpressionError::evaluation(expression, reason)
    })
}

impl PayloadObject for JsonPayload {
    fn raw_bytes(&self) -> &[u8] {
        &self.raw
    }

    fn content_type(&self) -> &str {
        JSON_CONTENT_TYPE
    }

    fn query(&self, expression: &str) -> Result<QueryResult, ExpressionError> {
        if expression.trim().is_empty() {
            return Err(ExpressionError::evaluation(expression, "empty path"));
        }

        let found = gjson::get(&self.text, expression);
        if !found.exists() {
            return Err(ExpressionError::evaluation(
                expression,
                "path not found or value does not exist",
            ));
        }

        let result = match found.kind() {
            gjson::Kind::String => QueryResult::string(found.str()),
            gjson::Kind::True => QueryResult::boolean(true),
            gjson::Kind::False => QueryResult::boolean(false),
            gjson::Kind::Null => QueryResult::new(Value::Null, ResultKind::Scalar),
            gjson::Kind::Number => match structured(expression, &found)? {
                number @ Value::Number(_) => QueryResult::new(number, ResultKind::Number),
                other => QueryResult::new(other, ResultKind::Unknown),
            },
            gjson::Kind::Array => {
                QueryResult::new(structured(expression, &found)?, ResultKind::Array)
            }
            gjson::Kind::Object => {
                QueryResult::new(structured(expression, &found)?, ResultKind::Object)
            }
        };
        Ok(result)
    }

    fn as_string(&self) -> Result<String, ExpressionError> {
        Ok(self.text.clone())
    }

    fn underlying(&self) -> &dyn Any {
        &self.document
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload() -> JsonPayload {
        JsonPayload::new(
            br#"{
                "name": "synapse",
                "count": 3,
                "ratio": 0.5,
                "active": true,
                "missing": null,
                "tags": ["a", "b", "c"],
                "owner": {"login": "ops", "id": 7},
                "dotted.key": "yes",
                "orders": [{"id": 1, "items": [{"sku": "x1"}]}],
                "friends": [
                    {"name": "ann", "age": 44},
                    {"name": "bob", "age": 68},
                    {"name": "cid", "age": 47}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_scalar_kinds() {
        let p = payload();
        assert_eq!(p.query("name").unwrap(), QueryResult::string("synapse"));
        assert_eq!(p.query("active").unwrap(), QueryResult::boolean(true));

        let count = p.query("count").unwrap();
        assert_eq!(count.kind, ResultKind::Number);
        assert_eq!(count.value, json!(3));
        assert_eq!(count.to_text(), "3");

        let ratio = p.query("ratio").unwrap();
        assert_eq!(ratio.value, json!(0.5));

        let null = p.query("missing").unwrap();
        assert!(null.is_null());
        assert_eq!(null.kind, ResultKind::Scalar);
    }

    #[test]
    fn test_nested_and_indexed_paths() {
        let p = payload();
        assert_eq!(p.query("owner.login").unwrap().as_str(), Some("ops"));
        assert_eq!(p.query("tags.1").unwrap().as_str(), Some("b"));
        assert_eq!(p.query("orders.0.items.0.sku").unwrap().as_str(), Some("x1"));
        assert_eq!(p.query(r"dotted\.key").unwrap().as_str(), Some("yes"));
    }

    #[test]
    fn test_array_length() {
        let p = payload();
        assert_eq!(p.query("tags.#").unwrap().value, json!(3));
        assert_eq!(p.query("friends.#").unwrap().to_text(), "3");
    }

    #[test]
    fn test_array_fan_out() {
        let names = payload().query("friends.#.name").unwrap();
        assert_eq!(names.kind, ResultKind::Array);
        assert_eq!(names.value, json!(["ann", "bob", "cid"]));
    }

    #[test]
    fn test_wildcards() {
        let p = payload();
        assert_eq!(p.query("own*.login").unwrap().as_str(), Some("ops"));
        assert_eq!(p.query("na?e").unwrap().as_str(), Some("synapse"));
    }

    #[test]
    fn test_queries() {
        let p = payload();
        assert_eq!(
            p.query(r#"friends.#(name=="bob").age"#).unwrap().value,
            json!(68)
        );
        assert_eq!(
            p.query("friends.#(age>45)#.name").unwrap().value,
            json!(["bob", "cid"])
        );
    }

    #[test]
    fn test_object_and_array_results() {
        let p = payload();
        let owner = p.query("owner").unwrap();
        assert_eq!(owner.kind, ResultKind::Object);
        assert_eq!(owner.value, json!({"login": "ops", "id": 7}));

        let tags = p.query("tags").unwrap();
        assert_eq!(tags.kind, ResultKind::Array);
        assert_eq!(tags.value, json!(["a", "b", "c"]));
    }

    #[test]
    fn test_missing_path_is_error() {
        let p = payload();
        for path in ["nope", "owner.nope", "tags.9", "name.inner", "", "  "] {
            assert!(p.query(path).is_err(), "expected error for '{path}'");
        }
    }

    #[test]
    fn test_as_string_returns_raw_document() {
        let p = JsonPayload::new(br#"{"a":1}"#).unwrap();
        assert_eq!(p.as_string().unwrap(), r#"{"a":1}"#);
        assert!(p.underlying().downcast_ref::<Value>().is_some());
    }
}
