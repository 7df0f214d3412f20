use serde_json::Value;

use crate::{ClickHouseError, Result};

/// Turns one outbound row into the bytes of a named input format.
pub trait RowEncoder: Send + Sync {
    fn encode(&self, row: &Value, format: &str) -> Result<Vec<u8>>;
}

/// Encoder for the text formats most commonly used to stream inserts.
///
/// Arrays are written as positional cells, objects by value in key order;
/// any other value is a single cell. Every row ends with `\n`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultRowEncoder;

impl RowEncoder for DefaultRowEncoder {
    fn encode(&self, row: &Value, format: &str) -> Result<Vec<u8>> {
        let mut line = match format {
            "TabSeparated" | "TabSeparatedRaw" | "TSV" => cells(row)
                .map(tab_separated_cell)
                .collect::<Vec<_>>()
                .join("\t"),
            "CSV" | "CSVWithNames" => cells(row).map(csv_cell).collect::<Vec<_>>().join(","),
            "Values" => {
                let literals = cells(row).map(literal).collect::<Vec<_>>();
                format!("({})", literals.join(","))
            }
            "JSONEachRow" | "JSONCompactEachRow" => serde_json::to_string(row)
                .map_err(|err| ClickHouseError::Usage(format!("row is not serializable: {err}")))?,
            other => {
                return Err(ClickHouseError::Usage(format!(
                    "no row encoding for format '{other}'"
                )))
            }
        };
        line.push('\n');
        Ok(line.into_bytes())
    }
}

fn cells(row: &Value) -> Box<dyn Iterator<Item = &Value> + '_> {
    match row {
        Value::Array(values) => Box::new(values.iter()),
        Value::Object(map) => Box::new(map.values()),
        other => Box::new(std::iter::once(other)),
    }
}

fn tab_separated_cell(value: &Value) -> String {
    match value {
        Value::Null => "\\N".to_owned(),
        Value::Bool(flag) => u8::from(*flag).to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => escape_tab_separated(text),
        Value::Array(_) | Value::Object(_) => escape_tab_separated(&literal(value)),
    }
}

fn escape_tab_separated(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\t' => escaped.push_str("\\t"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\0' => escaped.push_str("\\0"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => "\\N".to_owned(),
        Value::Bool(flag) => u8::from(*flag).to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => quote_csv(text),
        Value::Array(_) | Value::Object(_) => quote_csv(&literal(value)),
    }
}

fn quote_csv(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// SQL literal as accepted by the `Values` format and inside arrays.
fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_owned(),
        Value::Bool(flag) => u8::from(*flag).to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Array(values) => {
            let items = values.iter().map(literal).collect::<Vec<_>>();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let entries = map
                .iter()
                .map(|(key, value)| {
                    format!("{}:{}", literal(&Value::from(key.as_str())), literal(value))
                })
                .collect::<Vec<_>>();
            format!("{{{}}}", entries.join(","))
        }
    }
}
