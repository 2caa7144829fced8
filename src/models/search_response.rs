use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Read-only view over a decoded `_search` response.
#[derive(Debug, Clone)]
pub struct SearchResponse {
    value: Value,
}

impl SearchResponse {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn get_took(&self) -> Option<u64> {
        self.value["took"].as_u64()
    }

    /// `hits.total` is an object since 7.x and a bare number before.
    pub fn get_total_hits(&self) -> Option<u64> {
        let total = &self.value["hits"]["total"];
        total["value"].as_u64().or_else(|| total.as_u64())
    }

    pub fn get_hits(&self) -> Result<&Vec<Value>> {
        let hits = self.value["hits"]["hits"]
            .as_array()
            .ok_or_else(|| Error::MissingSection("hits.hits".to_string()))?;
        debug!("response carries {} hit(s)", hits.len());
        Ok(hits)
    }

    pub fn get_buckets(&self, name: &str) -> Result<&Vec<Value>> {
        self.value["aggregations"][name]["buckets"]
            .as_array()
            .ok_or_else(|| Error::MissingSection(format!("aggregations.{}.buckets", name)))
    }

    pub fn get_aggregation_names(&self) -> Vec<&str> {
        match self.value["aggregations"].as_object() {
            Some(aggs) => aggs.keys().map(String::as_str).collect(),
            None => Vec::new(),
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }
}
