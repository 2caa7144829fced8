//! Flattening of nested JSON records into rows and columns.
//!
//! Nested objects turn into dotted column names (`_source.cellcount`), arrays
//! and scalars stay as they are. Columns keep the order in which keys were
//! first seen across all records.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::models::search_response::SearchResponse;

pub const SEPARATOR: char = '.';

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Option<Value>>>,
}

impl Table {
    pub fn get_columns(&self) -> &Vec<String> {
        &self.columns
    }
    pub fn get_rows(&self) -> &Vec<Vec<Option<Value>>> {
        &self.rows
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cell lookup by column name, `None` when the record did not have the key.
    #[cfg(test)]
    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row)?.get(idx)?.as_ref()
    }
}

/// Flattens one record. `max_level` limits how deep objects are expanded.
pub fn flatten_record(record: &Value, max_level: Option<usize>) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    match record {
        Value::Object(map) => flatten_object(None, map, 0, max_level, &mut out),
        other => out.push(("0".to_string(), other.clone())),
    }
    out
}

fn flatten_object(
    prefix: Option<&str>,
    map: &Map<String, Value>,
    level: usize,
    max_level: Option<usize>,
    out: &mut Vec<(String, Value)>,
) {
    for (key, value) in map {
        let name = match prefix {
            Some(prefix) => format!("{}{}{}", prefix, SEPARATOR, key),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) if max_level.map_or(true, |max| level < max) => {
                flatten_object(Some(&name), inner, level + 1, max_level, out)
            }
            _ => out.push((name, value.clone())),
        }
    }
}

pub fn normalize(records: &[Value], max_level: Option<usize>) -> Table {
    let mut columns: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut flat_records = Vec::with_capacity(records.len());

    for record in records {
        let flat = flatten_record(record, max_level);
        for (name, _) in &flat {
            if !positions.contains_key(name) {
                positions.insert(name.clone(), columns.len());
                columns.push(name.clone());
            }
        }
        flat_records.push(flat);
    }

    let rows = flat_records
        .into_iter()
        .map(|flat| {
            let mut row = vec![None; columns.len()];
            for (name, value) in flat {
                row[positions[&name]] = Some(value);
            }
            row
        })
        .collect();

    Table { columns, rows }
}

pub fn hits_table(response: &SearchResponse, max_level: Option<usize>) -> Result<Table> {
    Ok(normalize(response.get_hits()?, max_level))
}

pub fn buckets_table(
    response: &SearchResponse,
    name: &str,
    max_level: Option<usize>,
) -> Result<Table> {
    Ok(normalize(response.get_buckets(name)?, max_level))
}

/// One row per mapped field: `index`, dotted `field` path and `type`.
/// Multi-fields (`ciptitle.raw`) are listed after their parent field.
pub fn mapping_table(mapping: &Value) -> Table {
    let mut records = Vec::new();
    if let Some(indices) = mapping.as_object() {
        for (index, body) in indices {
            let properties = &body["mappings"]["properties"];
            collect_fields(index, None, properties, &mut records);
        }
    }
    normalize(&records, None)
}

fn collect_fields(index: &str, prefix: Option<&str>, properties: &Value, out: &mut Vec<Value>) {
    let Some(properties) = properties.as_object() else {
        return;
    };
    for (name, definition) in properties {
        let path = match prefix {
            Some(prefix) => format!("{}{}{}", prefix, SEPARATOR, name),
            None => name.clone(),
        };
        let field_type = definition["type"]
            .as_str()
            .unwrap_or(if definition.get("properties").is_some() {
                "object"
            } else {
                ""
            });
        out.push(json!({ "index": index, "field": path, "type": field_type }));
        collect_fields(index, Some(&path), &definition["fields"], out);
        collect_fields(index, Some(&path), &definition["properties"], out);
    }
}
