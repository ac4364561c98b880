//! Decoding of Druid SQL result payloads.
//!
//! Druid returns SQL results in one of several encodings selected by the
//! request's `resultFormat`:
//!
//! - `object`: a JSON array of objects, one per row, keyed by column name.
//! - `array`: a JSON array of arrays. When the request asked for headers, the
//!   first rows carry column names, then Druid types, then SQL types.
//! - `arrayWithTrailer`: an object whose `results` key holds the `array`
//!   encoding, with extra keys (such as `context`) alongside.
//!
//! Schema is only recoverable for array encodings when headers were
//! requested. Without them [`decode_schema`] returns an empty schema rather
//! than failing, so callers that need column names must ask for headers.

use crate::consts;
use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Result encoding requested from Druid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultFormat {
    /// Rows as JSON objects (Druid's default)
    #[default]
    Object,
    /// Rows as JSON arrays
    Array,
    /// Rows as JSON arrays under `results`, followed by a trailer
    ArrayWithTrailer,
}

impl ResultFormat {
    /// The wire name of the format.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultFormat::Object => "object",
            ResultFormat::Array => "array",
            ResultFormat::ArrayWithTrailer => "arrayWithTrailer",
        }
    }

    /// True for the two array encodings.
    pub fn is_array(&self) -> bool {
        matches!(self, ResultFormat::Array | ResultFormat::ArrayWithTrailer)
    }
}

impl fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which header rows a request asked Druid to prepend to array results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderOptions {
    /// Column names row
    pub headers: bool,
    /// Druid types row (only meaningful with `headers`)
    pub druid_types: bool,
    /// SQL types row (only meaningful with `headers`)
    pub sql_types: bool,
}

impl HeaderOptions {
    /// Number of leading header rows in an array result.
    pub fn header_rows(&self) -> usize {
        if !self.headers {
            return 0;
        }
        1 + usize::from(self.druid_types) + usize::from(self.sql_types)
    }
}

/// Name and types of one result column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSchema {
    name: String,
    sql_type: Option<String>,
    druid_type: Option<String>,
}

impl ColumnSchema {
    pub(crate) fn new(
        name: impl Into<String>,
        sql_type: Option<String>,
        druid_type: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            sql_type,
            druid_type,
        }
    }

    /// Column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// SQL type, e.g. `VARCHAR`, when known.
    pub fn sql_type(&self) -> Option<&str> {
        self.sql_type.as_deref()
    }

    /// Druid type, e.g. `STRING`, when known.
    pub fn druid_type(&self) -> Option<&str> {
        self.druid_type.as_deref()
    }
}

impl fmt::Display for ColumnSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{name={}, SQL type={}, Druid type={}}}",
            self.name,
            self.sql_type.as_deref().unwrap_or("None"),
            self.druid_type.as_deref().unwrap_or("None")
        )
    }
}

/// Decode the schema of a result payload.
pub fn decode_schema(
    format: ResultFormat,
    headers: &HeaderOptions,
    payload: &Value,
) -> Result<Vec<ColumnSchema>> {
    match format {
        ResultFormat::Object => Ok(object_schema(as_rows(payload)?)),
        ResultFormat::Array => Ok(array_schema(headers, as_rows(payload)?)),
        ResultFormat::ArrayWithTrailer => {
            Ok(array_schema(headers, as_rows(trailer_results(payload)?)?))
        }
    }
}

/// Decode the data rows of a result payload, dropping any header rows.
pub fn decode_rows(
    format: ResultFormat,
    headers: &HeaderOptions,
    payload: &Value,
) -> Result<Vec<Value>> {
    let rows = match format {
        ResultFormat::Object => return Ok(as_rows(payload)?.to_vec()),
        ResultFormat::Array => as_rows(payload)?,
        ResultFormat::ArrayWithTrailer => as_rows(trailer_results(payload)?)?,
    };
    let skip = headers.header_rows().min(rows.len());
    Ok(rows[skip..].to_vec())
}

fn trailer_results(payload: &Value) -> Result<&Value> {
    payload.get("results").ok_or_else(|| {
        ClientError::InvalidResponse("arrayWithTrailer payload has no 'results' key".to_string())
    })
}

fn as_rows(payload: &Value) -> Result<&[Value]> {
    payload.as_array().map(Vec::as_slice).ok_or_else(|| {
        ClientError::InvalidResponse(format!(
            "expected a JSON array of rows, found {}",
            type_name(payload)
        ))
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn object_schema(rows: &[Value]) -> Vec<ColumnSchema> {
    let Some(Value::Object(first)) = rows.first() else {
        return Vec::new();
    };
    first
        .iter()
        .map(|(name, value)| {
            let (druid_type, sql_type) = match value {
                Value::String(_) => (
                    Some(consts::DRUID_STRING_TYPE),
                    Some(consts::SQL_VARCHAR_TYPE),
                ),
                Value::Number(_) => (Some(consts::DRUID_LONG_TYPE), Some(consts::SQL_BIGINT_TYPE)),
                _ => (None, None),
            };
            ColumnSchema::new(
                name.clone(),
                sql_type.map(str::to_string),
                druid_type.map(str::to_string),
            )
        })
        .collect()
}

fn array_schema(headers: &HeaderOptions, rows: &[Value]) -> Vec<ColumnSchema> {
    if !headers.headers {
        return Vec::new();
    }
    let Some(Value::Array(names)) = rows.first() else {
        return Vec::new();
    };
    let druid_row = headers.druid_types.then_some(1);
    let sql_row = headers
        .sql_types
        .then_some(1 + usize::from(headers.druid_types));

    names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            ColumnSchema::new(
                value_to_string(name),
                sql_row.and_then(|r| cell_string(rows, r, i)),
                druid_row.and_then(|r| cell_string(rows, r, i)),
            )
        })
        .collect()
}

fn cell_string(rows: &[Value], row: usize, col: usize) -> Option<String> {
    match rows.get(row)?.get(col)? {
        Value::Null => None,
        v => Some(value_to_string(v)),
    }
}

pub(crate) fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert object rows to arrays of values in column order. Array rows are
/// returned unchanged.
pub fn rows_as_arrays(rows: &[Value]) -> Vec<Value> {
    rows.iter()
        .map(|row| match row {
            Value::Object(obj) => Value::Array(obj.values().cloned().collect()),
            other => other.clone(),
        })
        .collect()
}

/// Remove columns whose values are null-like in every row.
///
/// A value is null-like when it is JSON `null`, an empty string or a numeric
/// zero. Only object rows are considered; all rows are kept, as is the order
/// of the remaining columns.
pub fn filter_null_cols(rows: &[Value]) -> Vec<Value> {
    let Some(Value::Object(first)) = rows.first() else {
        return rows.to_vec();
    };
    let mut null_cols: Vec<&String> = first.keys().collect();
    for row in rows {
        if let Value::Object(obj) = row {
            null_cols.retain(|key| obj.get(*key).map_or(true, is_null_like));
        }
    }

    rows.iter()
        .map(|row| match row {
            Value::Object(obj) => Value::Object(
                obj.iter()
                    .filter(|(k, _)| !null_cols.contains(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Map<_, _>>(),
            ),
            other => other.clone(),
        })
        .collect()
}

fn is_null_like(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}
