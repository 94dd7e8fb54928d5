// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Deterministic cache key construction
//!
//! Keys have the shape `table:operation[:user=<id>][:<params>]` where
//! `<params>` is canonical JSON: object keys sorted at every depth and
//! null-valued fields dropped, so `{"b":1,"a":null}` and `{"b":1}` produce the
//! same key. Array order is preserved because it is meaningful (sort columns,
//! id lists). The table, operation and user segments are escaped so a `:`
//! inside one of them can never shift segment boundaries.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CacheError;

/// Builds a cache key from a logical query description
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    table: String,
    operation: String,
    user_id: Option<String>,
    params: Map<String, Value>,
}

impl CacheKeyBuilder {
    pub fn new(table: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            operation: operation.into(),
            user_id: None,
            params: Map::new(),
        }
    }

    /// Scope the key to a user
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Add a single named parameter
    pub fn param<T: Serialize + ?Sized>(mut self, name: &str, value: &T) -> Result<Self, CacheError> {
        let value = canonicalize(serde_json::to_value(value)?);
        if value.is_null() {
            self.params.remove(name);
        } else {
            self.params.insert(name.to_string(), value);
        }
        Ok(self)
    }

    /// Merge every field of a serializable filter/sort/limit struct
    pub fn params<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, CacheError> {
        match canonicalize(serde_json::to_value(value)?) {
            Value::Object(fields) => {
                for (name, field) in fields {
                    self.params.insert(name, field);
                }
                Ok(self)
            }
            Value::Null => Ok(self),
            other => Err(CacheError::Validation(format!(
                "Key parameters must serialize to an object, got {}",
                other
            ))),
        }
    }

    pub fn build(&self) -> String {
        let mut key = format!(
            "{}:{}",
            escape_segment(&self.table),
            escape_segment(&self.operation)
        );

        if let Some(user_id) = &self.user_id {
            key.push_str(":user=");
            key.push_str(&escape_segment(user_id));
        }

        if !self.params.is_empty() {
            key.push(':');
            key.push_str(&Value::Object(sorted(self.params.clone())).to_string());
        }

        key
    }
}

/// Build a key from a table, an operation and any serializable parameter value.
///
/// Object parameters are flattened into the key's parameter segment. Any
/// other non-null value is appended as `:=<json>`, a segment no object
/// parameter set can render.
pub fn build_key<T: Serialize + ?Sized>(
    table: &str,
    operation: &str,
    params: &T,
) -> Result<String, CacheError> {
    let builder = CacheKeyBuilder::new(table, operation);
    match canonicalize(serde_json::to_value(params)?) {
        Value::Object(_) => Ok(builder.params(params)?.build()),
        Value::Null => Ok(builder.build()),
        other => Ok(format!("{}:={}", builder.build(), other)),
    }
}

/// Normalize a JSON value: sort object keys recursively and drop null fields.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(fields) => {
            let cleaned = fields
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            Value::Object(sorted(cleaned))
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        scalar => scalar,
    }
}

// serde_json's Map is only ordered when `preserve_order` is off; sorting
// explicitly keeps keys stable under either feature set.
fn sorted(fields: Map<String, Value>) -> Map<String, Value> {
    let mut entries: Vec<(String, Value)> = fields.into_iter().collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries.into_iter().collect()
}

fn escape_segment(segment: &str) -> String {
    segment.replace('%', "%25").replace(':', "%3A")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[derive(Serialize)]
    struct LogFilter {
        limit: u32,
        order_by: &'static str,
        program_id: Option<u32>,
    }

    #[test]
    fn test_key_order_independent() {
        let a = build_key("workout_logs", "list", &json!({"user": "42", "limit": 10})).unwrap();
        let b = build_key("workout_logs", "list", &json!({"limit": 10, "user": "42"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"workout_logs:list:{"limit":10,"user":"42"}"#);
    }

    #[test]
    fn test_nested_objects_are_sorted() {
        let a = build_key("programs", "get", &json!({"filter": {"z": 1, "a": 2}})).unwrap();
        let b = build_key("programs", "get", &json!({"filter": {"a": 2, "z": 1}})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_absent_and_null_optional_fields_match() {
        let with_none = build_key(
            "workout_logs",
            "list",
            &LogFilter {
                limit: 5,
                order_by: "date",
                program_id: None,
            },
        )
        .unwrap();
        let without = build_key(
            "workout_logs",
            "list",
            &json!({"order_by": "date", "limit": 5}),
        )
        .unwrap();
        assert_eq!(with_none, without);

        let with_some = build_key(
            "workout_logs",
            "list",
            &LogFilter {
                limit: 5,
                order_by: "date",
                program_id: Some(3),
            },
        )
        .unwrap();
        assert_ne!(with_none, with_some);
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = build_key("exercises", "by_ids", &json!({"ids": [1, 2]})).unwrap();
        let b = build_key("exercises", "by_ids", &json!({"ids": [2, 1]})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_value_types_do_not_alias() {
        let number = build_key("t", "op", &json!({"id": 1})).unwrap();
        let string = build_key("t", "op", &json!({"id": "1"})).unwrap();
        assert_ne!(number, string);
    }

    #[test]
    fn test_segments_are_escaped() {
        let a = CacheKeyBuilder::new("a:b", "c").build();
        let b = CacheKeyBuilder::new("a", "b:c").build();
        assert_ne!(a, b);
        assert_eq!(a, "a%3Ab:c");
    }

    #[test]
    fn test_user_scope() {
        let key = CacheKeyBuilder::new("user_programs", "all")
            .user("42")
            .param("active", &true)
            .unwrap()
            .build();
        assert_eq!(key, r#"user_programs:all:user=42:{"active":true}"#);
    }

    #[test]
    fn test_null_param_is_dropped() {
        let key = CacheKeyBuilder::new("t", "op")
            .param("missing", &Option::<u32>::None)
            .unwrap()
            .build();
        assert_eq!(key, "t:op");
    }

    #[test]
    fn test_non_object_params() {
        assert_eq!(build_key("t", "op", &()).unwrap(), "t:op");
        assert_eq!(build_key("t", "op", &7).unwrap(), "t:op:=7");
        assert_eq!(build_key("t", "op", &[2, 1]).unwrap(), "t:op:=[2,1]");
        assert!(CacheKeyBuilder::new("t", "op").params(&[1, 2]).is_err());
    }

    #[test]
    fn test_distinct_parameters_never_collide() {
        let mut rng = fastrand::Rng::with_seed(7);
        let mut keys = HashSet::new();
        let mut params = HashSet::new();

        for _ in 0..2000 {
            let limit = rng.u32(0..50);
            let offset = rng.u32(0..50);
            let table = ["workout_logs", "programs", "exercises"][rng.usize(0..3)];
            if !params.insert((table, limit, offset)) {
                continue;
            }
            let key = build_key(table, "list", &json!({"limit": limit, "offset": offset})).unwrap();
            assert!(keys.insert(key), "collision for {table} {limit} {offset}");
        }
        assert_eq!(keys.len(), params.len());

        let shapes = [
            json!(7),
            json!({"value": 7}),
            json!("7"),
            json!({"value": "7"}),
            json!([7]),
            json!({"value": [7]}),
            json!({"0": 7}),
        ];
        let keys: HashSet<String> = shapes
            .iter()
            .map(|shape| build_key("t", "list", shape).unwrap())
            .collect();
        assert_eq!(keys.len(), shapes.len());
    }
}
