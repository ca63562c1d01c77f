//! Row to JSON conversion.
//!
//! PostgreSQL columns are classified by their declared type. SQLite is
//! dynamically typed, so its cells are classified by the storage class of
//! the value actually returned.

use crate::config::DatabaseKind;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde_json::{Map, Value as JsonValue};
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Json,
    Null,
}

/// Classify a type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseKind) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "null" {
        return TypeCategory::Null;
    }
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || (db == DatabaseKind::Sqlite && lower == "numeric")
    {
        return TypeCategory::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }
    if lower.contains("blob") || lower == "bytea" {
        return TypeCategory::Binary;
    }
    // varchar, text, date, timestamp, uuid, ...
    TypeCategory::Text
}

/// Binary cells are base64 encoded.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

pub trait RowToJson {
    fn to_json_map(&self) -> Map<String, JsonValue>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseKind::Postgres);
                (col.name().to_string(), postgres::decode_column(self, idx, category))
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.name().to_string(), sqlite::decode_column(self, idx)))
            .collect()
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        let decoded = match category {
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => row
                .try_get::<Option<bool>, _>(idx)
                .map(|v| v.map(JsonValue::Bool)),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => row
                .try_get::<Option<Vec<u8>>, _>(idx)
                .map(|v| v.map(|b| encode_binary(&b))),
            TypeCategory::Json => row.try_get::<Option<JsonValue>, _>(idx),
            TypeCategory::Text | TypeCategory::Null => row
                .try_get::<Option<String>, _>(idx)
                .map(|v| v.map(JsonValue::String)),
        };
        match decoded {
            Ok(value) => value.unwrap_or(JsonValue::Null),
            Err(e) => {
                tracing::warn!(column = idx, error = %e, "Failed to decode column");
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Result<Option<JsonValue>, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            return Ok(v.map(JsonValue::from));
        }
        if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
            return Ok(v.map(JsonValue::from));
        }
        row.try_get::<Option<i16>, _>(idx)
            .map(|v| v.map(JsonValue::from))
    }

    fn decode_float(row: &PgRow, idx: usize) -> Result<Option<JsonValue>, sqlx::Error> {
        if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            return Ok(v.map(float_value));
        }
        row.try_get::<Option<f32>, _>(idx)
            .map(|v| v.map(|f| float_value(f as f64)))
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize) -> JsonValue {
        let category = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => TypeCategory::Null,
            Ok(raw) => categorize_type(raw.type_info().name(), DatabaseKind::Sqlite),
            Err(_) => TypeCategory::Null,
        };
        // Declared column types are advisory in SQLite, decode by storage class.
        let decoded = match category {
            TypeCategory::Null => return JsonValue::Null,
            TypeCategory::Integer | TypeCategory::Boolean => row
                .try_get_unchecked::<i64, _>(idx)
                .map(JsonValue::from),
            TypeCategory::Float => row.try_get_unchecked::<f64, _>(idx).map(float_value),
            TypeCategory::Binary => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|b| encode_binary(&b)),
            TypeCategory::Text | TypeCategory::Json => row
                .try_get_unchecked::<String, _>(idx)
                .map(JsonValue::String),
        };
        decoded.unwrap_or_else(|e| {
            tracing::warn!(column = idx, error = %e, "Failed to decode column");
            JsonValue::Null
        })
    }
}
