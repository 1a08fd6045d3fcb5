//! Record assembler: normalised records → column-aligned table.
//!
//! Columns are the union of keys across all object records, in first-seen
//! order. Each record becomes one row; a key the record does not carry is
//! `None`, which is distinct from an explicit JSON `null` (`Some(Value::Null)`).
//!
//! Records are never merged or deduplicated. A multi-page document may
//! legitimately produce several records, one per shipment.

use crate::config::FieldSpec;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::warn;

/// The assembled result table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<Value>>>,
}

impl ResultTable {
    /// Assemble a table from normalised records. Never fails.
    ///
    /// Non-object records produce a row with every cell absent.
    pub fn assemble(records: &[Value]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            if let Value::Object(map) = record {
                for key in map.keys() {
                    if !columns.iter().any(|c| c == key) {
                        columns.push(key.clone());
                    }
                }
            }
        }

        let rows = records
            .iter()
            .enumerate()
            .map(|(i, record)| match record {
                Value::Object(map) => columns.iter().map(|c| map.get(c).cloned()).collect(),
                other => {
                    warn!(
                        "Record {} is not a JSON object ({}); keeping an empty row",
                        i + 1,
                        json_kind(other)
                    );
                    vec![None; columns.len()]
                }
            })
            .collect();

        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<Value>>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell lookup by row index and column name. `None` if the row or column
    /// does not exist, or the record did not carry the key.
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(col)?.as_ref()
    }

    /// Rows as JSON objects, with absent cells rendered as `null`.
    pub fn to_records(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(c, v)| (c.clone(), v.clone().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect()
    }

    /// Reorder columns for display: requested fields first, in field-spec
    /// order, then any extra keys the model returned in their original order.
    /// Requested fields the model never returned are not added.
    pub fn reorder_columns(&mut self, fields: &FieldSpec) {
        let mut order: Vec<usize> = fields
            .iter()
            .filter_map(|f| self.columns.iter().position(|c| c == f))
            .collect();
        for i in 0..self.columns.len() {
            if !order.contains(&i) {
                order.push(i);
            }
        }

        self.columns = order.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            let reordered = order.iter().map(|&i| row[i].take()).collect();
            *row = reordered;
        }
    }
}

impl Serialize for ResultTable {
    /// Serialises as an array of objects in column order; absent cells are `null`.
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.rows.len()))?;
        for row in &self.rows {
            seq.serialize_element(&RowRef {
                columns: &self.columns,
                cells: row,
            })?;
        }
        seq.end()
    }
}

struct RowRef<'a> {
    columns: &'a [String],
    cells: &'a [Option<Value>],
}

impl Serialize for RowRef<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (c, v) in self.columns.iter().zip(self.cells) {
            map.serialize_entry(c, v)?;
        }
        map.end()
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
