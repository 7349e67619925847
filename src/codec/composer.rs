//! Nested object composition for outbound records
//!
//! Selected flat fields are lifted out of a record and regrouped under a
//! single new field, either as an object keyed by alias or as an array of
//! values in alias order.

use super::Record;
use crate::config::{columns, Grid};
use serde_json::Value;

/// Ordered `(source field, output alias)` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AliasMapping {
    pairs: Vec<(String, String)>,
}

impl AliasMapping {
    /// Build pairs, using the source name when an alias is blank
    pub fn new<I, S, A>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, A)>,
        S: Into<String>,
        A: Into<String>,
    {
        let pairs = pairs
            .into_iter()
            .map(|(source, alias)| {
                let source = source.into();
                let alias = alias.into();
                let alias = if alias.trim().is_empty() {
                    source.clone()
                } else {
                    alias
                };
                (source, alias)
            })
            .collect();
        Self { pairs }
    }

    /// Read the `Source`/`Alias` columns of the object properties grid.
    /// Rows without a source are ignored.
    pub fn from_grid(grid: &Grid) -> Self {
        Self::new(
            grid.rows()
                .iter()
                .map(|row| (row.text(columns::SOURCE), row.text(columns::ALIAS)))
                .filter(|(source, _)| !source.trim().is_empty()),
        )
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Whether `field` is lifted into the nested object
    pub fn lifts(&self, field: &str) -> bool {
        self.pairs.iter().any(|(source, _)| source == field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComplexObjectComposer {
    aliases: AliasMapping,
    object_name: String,
    as_array: bool,
}

impl ComplexObjectComposer {
    pub fn new(aliases: AliasMapping, object_name: impl Into<String>, as_array: bool) -> Self {
        Self {
            aliases,
            object_name: object_name.into(),
            as_array,
        }
    }

    pub fn aliases(&self) -> &AliasMapping {
        &self.aliases
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Compose one record.
    ///
    /// Each source is removed from a copy of the record in mapping order; a
    /// source that is absent by then contributes `null`. The nested value is
    /// appended after the remaining fields, replacing any field of the same
    /// name.
    pub fn compose(&self, record: &Record) -> Record {
        let mut remaining = record.clone();
        let mut lifted = Record::new();

        for (source, alias) in self.aliases.pairs() {
            let value = remaining.shift_remove(source).unwrap_or(Value::Null);
            lifted.insert(alias.clone(), value);
        }

        let nested = if self.as_array {
            Value::Array(lifted.into_iter().map(|(_, value)| value).collect())
        } else {
            Value::Object(lifted)
        };

        remaining.shift_remove(&self.object_name);
        remaining.insert(self.object_name.clone(), nested);
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::keys;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("test record must be an object"),
        }
    }

    fn keys_of(record: &Record) -> Vec<&str> {
        record.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_compose_object() {
        let composer =
            ComplexObjectComposer::new(AliasMapping::new([("a", "x"), ("b", "y")]), "obj", false);
        let result = composer.compose(&record(json!({"a": 1, "b": 2, "c": 3})));

        assert_eq!(Value::Object(result.clone()), json!({"c": 3, "obj": {"x": 1, "y": 2}}));
        assert_eq!(keys_of(&result), vec!["c", "obj"]);
    }

    #[test]
    fn test_compose_array_keeps_alias_order() {
        let composer =
            ComplexObjectComposer::new(AliasMapping::new([("c", ""), ("a", "")]), "values", true);
        let result = composer.compose(&record(json!({"a": 1, "b": 2, "c": 3})));

        assert_eq!(Value::Object(result), json!({"b": 2, "values": [3, 1]}));
    }

    #[test]
    fn test_passthrough_order_is_preserved() {
        let composer = ComplexObjectComposer::new(AliasMapping::new([("b", "")]), "n", false);
        let result = composer.compose(&record(json!({"z": 1, "b": 2, "a": 3, "m": 4})));

        assert_eq!(keys_of(&result), vec!["z", "a", "m", "n"]);
    }

    #[test]
    fn test_empty_mapping_only_adds_empty_object() {
        let composer = ComplexObjectComposer::new(AliasMapping::default(), "obj", false);
        let input = record(json!({"a": 1, "b": 2}));
        let result = composer.compose(&input);

        assert_eq!(Value::Object(result), json!({"a": 1, "b": 2, "obj": {}}));
    }

    #[test]
    fn test_missing_source_becomes_null() {
        let composer = ComplexObjectComposer::new(AliasMapping::new([("nope", "x")]), "obj", false);
        let result = composer.compose(&record(json!({"a": 1})));

        assert_eq!(Value::Object(result), json!({"a": 1, "obj": {"x": null}}));
    }

    #[test]
    fn test_duplicate_source_only_first_sees_value() {
        let composer =
            ComplexObjectComposer::new(AliasMapping::new([("a", "x"), ("a", "y")]), "obj", false);
        let result = composer.compose(&record(json!({"a": 1})));

        assert_eq!(Value::Object(result), json!({"obj": {"x": 1, "y": null}}));
    }

    #[test]
    fn test_same_named_field_is_replaced_and_moved_last() {
        let composer = ComplexObjectComposer::new(AliasMapping::new([("a", "")]), "obj", false);
        let result = composer.compose(&record(json!({"obj": "old", "a": 1, "b": 2})));

        assert_eq!(keys_of(&result), vec!["b", "obj"]);
        assert_eq!(result["obj"], json!({"a": 1}));
    }

    #[test]
    fn test_input_record_is_untouched() {
        let composer = ComplexObjectComposer::new(AliasMapping::new([("a", "")]), "obj", false);
        let input = record(json!({"a": 1}));
        let _ = composer.compose(&input);
        assert_eq!(Value::Object(input), json!({"a": 1}));
    }

    #[test]
    fn test_alias_mapping_from_grid() {
        let grid = Grid::parse(
            keys::OBJECT_PROPERTIES,
            r#"[{"Source":"temp","Alias":"t"},{"Source":"rpm","Alias":" "},{"Source":"","Alias":"x"}]"#,
        )
        .unwrap();

        let mapping = AliasMapping::from_grid(&grid);
        assert_eq!(
            mapping.pairs(),
            &[
                ("temp".to_string(), "t".to_string()),
                ("rpm".to_string(), "rpm".to_string())
            ]
        );
        assert!(mapping.lifts("rpm"));
        assert!(!mapping.lifts("t"));
    }
}
