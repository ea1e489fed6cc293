//! Avro read compatibility
//!
//! The verdict comes from apache-avro's schema resolution rules. When a pair
//! of record schemas is incompatible, the field-level changes that explain it
//! are added to the error message.

use std::collections::HashMap;

use apache_avro::schema_compatibility::SchemaCompatibility;
use apache_avro::Schema;
use serde_json::Value;

use super::{ReadCompatibility, ValidationResult};
use crate::error::ValidationError;

/// Checks that a reader schema can decode data written with a writer schema
#[derive(Debug, Default, Clone, Copy)]
pub struct AvroCanRead;

impl AvroCanRead {
    pub fn new() -> Self {
        Self
    }
}

impl ReadCompatibility for AvroCanRead {
    fn can_read(&self, reader: &str, writer: &str) -> ValidationResult {
        let writer_schema = Schema::parse_str(writer).map_err(|e| {
            ValidationError::new(format!(
                "Could not parse writer schema. {}\nWriter Schema:\n{}",
                e, writer
            ))
        })?;
        let reader_schema = Schema::parse_str(reader).map_err(|e| {
            ValidationError::new(format!(
                "Could not parse reader schema. {}\nReader Schema:\n{}",
                e, reader
            ))
        })?;

        if SchemaCompatibility::can_read(&writer_schema, &reader_schema) {
            return Ok(());
        }

        let mut message = format!(
            "Unable to read schema:\n{}\nusing schema:\n{}",
            writer, reader
        );
        for change in field_changes(writer, reader) {
            message.push_str("\n  - ");
            message.push_str(&change);
        }
        Err(ValidationError::new(message))
    }
}

/// Describe top-level record field changes that break reading `writer` data with `reader`
fn field_changes(writer: &str, reader: &str) -> Vec<String> {
    let (Ok(old), Ok(new)) = (
        serde_json::from_str::<Value>(writer),
        serde_json::from_str::<Value>(reader),
    ) else {
        return Vec::new();
    };
    let (Some(old_fields), Some(new_fields)) = (
        old.get("fields").and_then(|f| f.as_array()),
        new.get("fields").and_then(|f| f.as_array()),
    ) else {
        return Vec::new();
    };

    let old_map = fields_by_name(old_fields);
    let new_map = fields_by_name(new_fields);

    let mut changes = Vec::new();
    let mut names: Vec<_> = new_map.keys().collect();
    names.sort();
    for name in names {
        let new_field = new_map[name];
        match old_map.get(name) {
            None if new_field.get("default").is_none() => {
                changes.push(format!("field '{}' was added without a default", name));
            }
            None => {}
            Some(old_field) => {
                let old_type = old_field.get("type");
                let new_type = new_field.get("type");
                if old_type != new_type {
                    changes.push(format!(
                        "field '{}' type changed from {} to {}",
                        name,
                        old_type.map(|t| t.to_string()).unwrap_or_default(),
                        new_type.map(|t| t.to_string()).unwrap_or_default()
                    ));
                }
            }
        }
    }
    changes
}

fn fields_by_name(fields: &[Value]) -> HashMap<&str, &Value> {
    fields
        .iter()
        .filter_map(|f| f.get("name").and_then(|n| n.as_str()).map(|n| (n, f)))
        .collect()
}
