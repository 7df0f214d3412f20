use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Column description from the `meta` section or the names/types lines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Top-level keys of a response other than `meta` and `data`, plus the
/// number of body bytes received.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Trailer {
    pub values: Map<String, Value>,
    pub transferred: u64,
}

impl Trailer {
    /// Value of the `rows` key.
    pub fn rows(&self) -> Option<u64> {
        self.values.get("rows").and_then(Value::as_u64)
    }

    /// Value of the `rows_before_limit_at_least` key.
    pub fn rows_before_limit_at_least(&self) -> Option<u64> {
        self.values
            .get("rows_before_limit_at_least")
            .and_then(Value::as_u64)
    }

    /// The `statistics` object, if the server sent one.
    pub fn statistics(&self) -> Option<&Map<String, Value>> {
        self.values.get("statistics").and_then(Value::as_object)
    }
}

/// Item read from the inbound half of a record channel.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordEvent {
    /// Column list, emitted at most once and before the first row.
    Metadata(Vec<Column>),
    /// Progress object from a `WithProgress` format.
    Progress(Value),
    /// One row in its wire representation.
    Row(Value),
    /// Terminal event for JSON-family responses.
    Trailer(Trailer),
    /// Terminal event for bodies that are not decoded into rows.
    Text(String),
}

/// Settled result of a query.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryOutcome {
    Rows(QueryResult),
    Text(String),
}

impl QueryOutcome {
    pub fn as_rows(&self) -> Option<&QueryResult> {
        match self {
            Self::Rows(result) => Some(result),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Rows(_) => None,
            Self::Text(text) => Some(text),
        }
    }
}

/// Rows, columns and trailer of a fully received JSON-family response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryResult {
    pub meta: Vec<Column>,
    pub data: Vec<Value>,
    pub progress: Vec<Value>,
    pub trailer: Trailer,
}
