use serde::Deserialize;
use serde_json::{Map, Value};

use crate::Column;

/// Whole-document shape of the `JSON` and `JSONCompact` formats.
#[derive(Debug, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub meta: Option<Vec<Column>>,
    #[serde(default)]
    pub data: Option<Vec<Value>>,
    #[serde(flatten)]
    pub trailer: Map<String, Value>,
}

/// Single line of a `WithProgress` format.
#[derive(Debug, Deserialize)]
pub struct ProgressLine {
    #[serde(default)]
    pub progress: Option<Value>,
    #[serde(default)]
    pub row: Option<Value>,
    #[serde(default)]
    pub exception: Option<String>,
}
