use crate::error::MalformedRow;
use crate::process::utils::coerce_number;
use crate::schema::{Record, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// What to do when a row's field count differs from the header count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnPolicy {
    /// Skip the row.
    Strict,
    /// Re-join surplus trailing fields into the last column, pad missing ones
    /// with empty strings.
    #[default]
    Lenient,
}

/// Decode one tokenized row against the normalized `headers`.
///
/// Columns whose key is in `numeric` become numbers (or null when empty);
/// every other column is trimmed text. Returns `Err` only when the strict
/// policy rejects the row's width.
pub fn decode_row(
    fields: Vec<String>,
    headers: &[String],
    numeric: &HashSet<String>,
    policy: ColumnPolicy,
) -> Result<Record, MalformedRow> {
    let fields = reconcile(fields, headers.len(), policy)?;

    let mut record = Record::new();
    for (key, raw) in headers.iter().zip(fields) {
        let trimmed = raw.trim();
        let value = if numeric.contains(key) {
            coerce_number(trimmed)
        } else {
            Value::Text(trimmed.to_string())
        };
        record.insert(key.clone(), value);
    }
    Ok(record)
}

fn reconcile(
    mut fields: Vec<String>,
    expected: usize,
    policy: ColumnPolicy,
) -> Result<Vec<String>, MalformedRow> {
    let found = fields.len();
    if found == expected {
        return Ok(fields);
    }
    match policy {
        ColumnPolicy::Strict => Err(MalformedRow::ColumnCount { expected, found }),
        ColumnPolicy::Lenient if found > expected && expected > 0 => {
            let surplus = fields.split_off(expected - 1).join(",");
            fields.push(surplus);
            Ok(fields)
        }
        ColumnPolicy::Lenient => {
            fields.resize(expected, String::new());
            Ok(fields)
        }
    }
}
