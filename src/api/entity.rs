//! Purpose: Generic property-bag model for named server-side resources.
//! Exports: `Entity`.
//! Role: Shared representation behind typed resource views (license pools, peers, ...).
//! Invariants: Missing or null keys read as `None`; present but uncoercible values are `Usage` errors.
//! Invariants: Coercions are lenient for the string encodings the service commonly returns.
#![allow(clippy::result_large_err)]

use super::ApiResult;
use crate::core::error::{Error, ErrorKind};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Entity {
    name: String,
    path: String,
    content: Map<String, Value>,
}

impl Entity {
    pub fn new(name: impl Into<String>, path: impl Into<String>, content: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            content,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection path the entity was read from, e.g. `licenser/pools/<name>`.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &Map<String, Value> {
        &self.content
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.content.get(key).filter(|value| !value.is_null())
    }

    pub fn get_str(&self, key: &str) -> ApiResult<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(text)) => Ok(Some(text.clone())),
            Some(Value::Number(number)) => Ok(Some(number.to_string())),
            Some(Value::Bool(flag)) => Ok(Some(flag.to_string())),
            Some(_) => Err(self.coercion_error(key, "string")),
        }
    }

    pub fn get_bool(&self, key: &str) -> ApiResult<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(flag)) => Ok(Some(*flag)),
            Some(Value::Number(number)) => match number.as_i64() {
                Some(0) => Ok(Some(false)),
                Some(1) => Ok(Some(true)),
                _ => Err(self.coercion_error(key, "boolean")),
            },
            Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "t" | "y" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "f" | "n" | "off" => Ok(Some(false)),
                _ => Err(self.coercion_error(key, "boolean")),
            },
            Some(_) => Err(self.coercion_error(key, "boolean")),
        }
    }

    pub fn get_int(&self, key: &str) -> ApiResult<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(number)) => number
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.coercion_error(key, "integer")),
            Some(Value::String(text)) => text
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|err| self.coercion_error(key, "integer").with_source(err)),
            Some(_) => Err(self.coercion_error(key, "integer")),
        }
    }

    /// Arrays map element-wise; a plain string is split on commas.
    pub fn get_str_list(&self, key: &str) -> ApiResult<Option<Vec<String>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(text) => Ok(text.clone()),
                    Value::Number(number) => Ok(number.to_string()),
                    _ => Err(self.coercion_error(key, "string list")),
                })
                .collect::<ApiResult<Vec<_>>>()
                .map(Some),
            Some(Value::String(text)) if text.trim().is_empty() => Ok(Some(Vec::new())),
            Some(Value::String(text)) => Ok(Some(
                text.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect(),
            )),
            Some(_) => Err(self.coercion_error(key, "string list")),
        }
    }

    fn coercion_error(&self, key: &str, expected: &str) -> Error {
        Error::new(ErrorKind::Usage)
            .with_message(format!(
                "property '{key}' of '{}' is not a {expected}",
                self.name
            ))
            .with_path(self.path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::Entity;
    use crate::core::error::ErrorKind;
    use serde_json::{Value, json};

    fn entity(content: Value) -> Entity {
        let Value::Object(map) = content else {
            panic!("object content");
        };
        Entity::new("pool", "licenser/pools/pool", map)
    }

    #[test]
    fn missing_and_null_keys_are_none() {
        let entity = entity(json!({"quota": null}));
        assert_eq!(entity.get_str("quota").expect("str"), None);
        assert_eq!(entity.get_int("missing").expect("int"), None);
    }

    #[test]
    fn booleans_accept_string_encodings() {
        let entity = entity(json!({"a": "1", "b": "false", "c": true, "d": 0, "e": "maybe"}));
        assert_eq!(entity.get_bool("a").expect("a"), Some(true));
        assert_eq!(entity.get_bool("b").expect("b"), Some(false));
        assert_eq!(entity.get_bool("c").expect("c"), Some(true));
        assert_eq!(entity.get_bool("d").expect("d"), Some(false));
        let err = entity.get_bool("e").expect_err("e");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.message().unwrap().contains("'e'"));
    }

    #[test]
    fn integers_accept_numeric_strings() {
        let entity = entity(json!({"n": 42, "s": " 17 ", "bad": "MAX"}));
        assert_eq!(entity.get_int("n").expect("n"), Some(42));
        assert_eq!(entity.get_int("s").expect("s"), Some(17));
        assert!(entity.get_int("bad").is_err());
    }

    #[test]
    fn string_lists_from_arrays_or_commas() {
        let entity = entity(json!({"arr": ["a", "b"], "csv": "x, y,,z", "empty": ""}));
        assert_eq!(
            entity.get_str_list("arr").expect("arr"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(
            entity.get_str_list("csv").expect("csv"),
            Some(vec!["x".to_string(), "y".to_string(), "z".to_string()])
        );
        assert_eq!(entity.get_str_list("empty").expect("empty"), Some(Vec::new()));
    }
}
