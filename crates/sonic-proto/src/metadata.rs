//! Schema metadata carried by `T` frames.
//!
//! The service describes its output columns by example: each schema element
//! is a `[name, sample value]` pair. Column types are taken from the runtime
//! type of the sample, not declared on the wire.

use serde::Serialize;
use serde_json::Value;

/// Runtime type of a sample value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl TypeTag {
    /// Tag for a value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => TypeTag::String,
            Value::Number(_) => TypeTag::Number,
            Value::Bool(_) => TypeTag::Boolean,
            Value::Array(_) => TypeTag::Array,
            Value::Object(_) => TypeTag::Object,
            Value::Null => TypeTag::Null,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::String => "string",
            TypeTag::Number => "number",
            TypeTag::Boolean => "boolean",
            TypeTag::Array => "array",
            TypeTag::Object => "object",
            TypeTag::Null => "null",
        }
    }
}

impl std::fmt::Display for TypeTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_tag: TypeTag,
}

/// Derive column metadata from the `[name, sample]` pairs of a `T` frame.
pub fn metadata_from_schema(schema: &[(String, Value)]) -> Vec<ColumnMeta> {
    schema
        .iter()
        .map(|(name, sample)| ColumnMeta {
            name: name.clone(),
            type_tag: TypeTag::of(sample),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_from_schema() {
        let schema = vec![
            ("id".to_string(), json!(1)),
            ("name".to_string(), json!("alice")),
            ("active".to_string(), json!(true)),
            ("tags".to_string(), json!(["a"])),
            ("extra".to_string(), json!({"k": 1})),
            ("missing".to_string(), Value::Null),
        ];

        let meta = metadata_from_schema(&schema);
        let tags: Vec<_> = meta.iter().map(|m| m.type_tag).collect();
        assert_eq!(
            tags,
            vec![
                TypeTag::Number,
                TypeTag::String,
                TypeTag::Boolean,
                TypeTag::Array,
                TypeTag::Object,
                TypeTag::Null,
            ]
        );
        assert_eq!(meta[1].name, "name");
    }

    #[test]
    fn test_empty_schema() {
        assert!(metadata_from_schema(&[]).is_empty());
    }
}
