//! Query DSL builder and the bundled sample queries.
//!
//! Queries can be handed to the client either as literal JSON text or built
//! with [`SearchRequest`]. Both end up as the same `serde_json::Value`.

use clap::ValueEnum;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;
use serde_json::{json, Map, Value};
use serde_with::skip_serializing_none;

use crate::error::{Error, Result};

/// Parses literal query text. Only a JSON object is a valid search body.
pub fn parse_query(text: &str) -> Result<Value> {
    if text.trim().is_empty() {
        return Err(Error::InvalidQuery("query is empty".to_string()));
    }
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::InvalidQuery(e.to_string()))?;
    if !value.is_object() {
        return Err(Error::InvalidQuery(format!(
            "expected a JSON object, got {}",
            value_kind(&value)
        )));
    }
    Ok(value)
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    MatchAll,
    Match { field: String, value: Value },
    Range { field: String, bounds: RangeBounds },
    Bool { must: Vec<Query>, filter: Vec<Query> },
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RangeBounds {
    pub gt: Option<Value>,
    pub gte: Option<Value>,
    pub lt: Option<Value>,
    pub lte: Option<Value>,
}

impl Query {
    pub fn matching(field: &str, value: impl Into<Value>) -> Self {
        Query::Match {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn range(field: &str, bounds: RangeBounds) -> Self {
        Query::Range {
            field: field.to_string(),
            bounds,
        }
    }

    pub fn greater_than(field: &str, value: impl Into<Value>) -> Self {
        Self::range(
            field,
            RangeBounds {
                gt: Some(value.into()),
                ..Default::default()
            },
        )
    }

    pub fn at_least(field: &str, value: impl Into<Value>) -> Self {
        Self::range(
            field,
            RangeBounds {
                gte: Some(value.into()),
                ..Default::default()
            },
        )
    }

    pub fn must(clauses: Vec<Query>) -> Self {
        Query::Bool {
            must: clauses,
            filter: Vec::new(),
        }
    }

    /// Adds a filter clause; a non-bool query is wrapped into `bool.must` first.
    pub fn filter(self, clause: Query) -> Self {
        match self {
            Query::Bool { must, mut filter } => {
                filter.push(clause);
                Query::Bool { must, filter }
            }
            other => Query::Bool {
                must: vec![other],
                filter: vec![clause],
            },
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Query::MatchAll => json!({ "match_all": {} }),
            Query::Match { field, value } => json!({ "match": { field: value } }),
            Query::Range { field, bounds } => json!({ "range": { field: bounds } }),
            Query::Bool { must, filter } => {
                let mut clauses = Map::new();
                if !must.is_empty() {
                    clauses.insert(
                        "must".to_string(),
                        Value::Array(must.iter().map(Query::to_value).collect()),
                    );
                }
                if !filter.is_empty() {
                    clauses.insert(
                        "filter".to_string(),
                        Value::Array(filter.iter().map(Query::to_value).collect()),
                    );
                }
                json!({ "bool": clauses })
            }
        }
    }
}

impl Serialize for Query {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Terms {
        field: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none", serialize_with = "by_key")]
        order: Option<SortOrder>,
    },
}

/// Bucket order on the term itself: `{"_key": "asc"}`.
fn by_key<S: Serializer>(
    order: &Option<SortOrder>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(1))?;
    map.serialize_entry("_key", order)?;
    map.end()
}

impl Aggregation {
    pub fn terms(field: &str) -> Self {
        Aggregation::Terms {
            field: field.to_string(),
            size: None,
            order: None,
        }
    }
}

/// Ordered `name -> value` pairs rendered as a JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct Named<T>(Vec<(String, T)>);

impl<T> Default for Named<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Named<T> {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T: Serialize> Serialize for Named<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchRequest {
    query: Option<Query>,
    #[serde(skip_serializing_if = "Named::is_empty")]
    sort: Named<SortOrder>,
    #[serde(skip_serializing_if = "Named::is_empty")]
    aggs: Named<Aggregation>,
    size: Option<u64>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    pub fn sort(mut self, field: &str, order: SortOrder) -> Self {
        self.sort.0.push((field.to_string(), order));
        self
    }

    pub fn aggregate(mut self, name: &str, aggregation: Aggregation) -> Self {
        self.aggs.0.push((name.to_string(), aggregation));
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A canned query, kept both as literal text and as a builder.
pub struct Sample {
    pub name: &'static str,
    pub description: &'static str,
    pub literal: &'static str,
    build: fn() -> SearchRequest,
}

impl Sample {
    pub fn request(&self) -> SearchRequest {
        (self.build)()
    }
}

pub static SAMPLES: &[Sample] = &[
    Sample {
        name: "match_all",
        description: "every document",
        literal: r#"{"query": {"match_all": {}}}"#,
        build: || SearchRequest::new().query(Query::MatchAll),
    },
    Sample {
        name: "match_index",
        description: "_index match on utexas, redundant once the URL names the index",
        literal: r#"{"query": {"match": {"_index": "utexas"}}}"#,
        build: || SearchRequest::new().query(Query::matching("_index", "utexas")),
    },
    Sample {
        name: "match_one",
        description: "computer science programs",
        literal: r#"{
  "query": { "match": { "ciptitle.raw": "COMPUTER SCIENCE" } }
}"#,
        build: || SearchRequest::new().query(Query::matching("ciptitle.raw", "COMPUTER SCIENCE")),
    },
    Sample {
        name: "match_one_greater_one",
        description: "computer science programs with a non-zero cell count",
        literal: r#"{
  "query": {
    "bool": {
      "must": [
        { "match": { "ciptitle.raw": "COMPUTER SCIENCE" } },
        { "range": { "cellcount": { "gt": 0 } } }
      ]
    }
  }
}"#,
        build: || {
            SearchRequest::new().query(Query::must(vec![
                Query::matching("ciptitle.raw", "COMPUTER SCIENCE"),
                Query::greater_than("cellcount", 0),
            ]))
        },
    },
    Sample {
        name: "match_two_greater_one",
        description: "computer science at institution 3599 with a non-zero cell count",
        literal: r#"{
  "query": {
    "bool": {
      "must": [
        { "match": { "ciptitle.raw": "COMPUTER SCIENCE" } },
        { "match": { "institution_id": "3599" } },
        { "range": { "cellcount": { "gt": 0 } } }
      ]
    }
  }
}"#,
        build: || {
            SearchRequest::new().query(Query::must(vec![
                Query::matching("ciptitle.raw", "COMPUTER SCIENCE"),
                Query::matching("institution_id", "3599"),
                Query::greater_than("cellcount", 0),
            ]))
        },
    },
    Sample {
        name: "query_and_filter",
        description: "area studies baccalaureates filtered to institution 3599",
        literal: r#"{
  "query": {
    "bool": {
      "must": [
        { "match": { "ciptitle.raw": "AREA STUDIES" } },
        { "match": { "deglevel": "Baccalaureate" } }
      ],
      "filter": [
        { "match": { "institution_id": "3599" } }
      ]
    }
  }
}"#,
        build: || {
            SearchRequest::new().query(
                Query::must(vec![
                    Query::matching("ciptitle.raw", "AREA STUDIES"),
                    Query::matching("deglevel", "Baccalaureate"),
                ])
                .filter(Query::matching("institution_id", "3599")),
            )
        },
    },
    Sample {
        name: "query_and_sort",
        description: "median earnings of at least 75000 at institution 3658, sorted by title",
        literal: r#"{
  "query": {
    "bool": {
      "must": [
        { "range": { "p50_earnings": { "gte": 75000 } } },
        { "match": { "institution_id": "3658" } },
        { "range": { "cellcount": { "gt": 0 } } }
      ]
    }
  },
  "sort": { "ciptitle.raw": "asc" }
}"#,
        build: || {
            SearchRequest::new()
                .query(Query::must(vec![
                    Query::at_least("p50_earnings", 75000),
                    Query::matching("institution_id", "3658"),
                    Query::greater_than("cellcount", 0),
                ]))
                .sort("ciptitle.raw", SortOrder::Asc)
        },
    },
    Sample {
        name: "summarize_one",
        description: "most common majors (terms aggregation common_majors)",
        literal: r#"{
  "aggs": {
    "common_majors": { "terms": { "field": "ciptitle.raw" } }
  }
}"#,
        build: || SearchRequest::new().aggregate("common_majors", Aggregation::terms("ciptitle.raw")),
    },
];

pub fn sample(name: &str) -> Option<&'static Sample> {
    SAMPLES.iter().find(|sample| sample.name == name)
}
