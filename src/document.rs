//! Line-driven decoder for pretty-printed `JSON` / `JSONCompact` documents.
//!
//! ClickHouse writes these formats with one structural token per line:
//!
//! ```text
//! {
//! 	"meta":
//! 	[
//! 		{
//! 			"name": "number",
//! 			"type": "UInt64"
//! 		}
//! 	],
//!
//! 	"data":
//! 	[
//! 		["0"],
//! 		["1"]
//! 	],
//!
//! 	"rows": 2
//! }
//! ```
//!
//! so rows can be emitted as soon as their closing line arrives.

use std::mem;

use serde_json::{Map, Value};

use crate::{ClickHouseError, Column, RecordEvent, Result, Trailer};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Initial,
    TopLevelKeys,
    MetaHeader,
    DataHeader,
    MetaArray,
    DataArray,
    /// The body is not laid out one token per line; everything is kept
    /// and parsed at end of stream.
    Unframed,
}

pub(crate) struct DocumentDecoder {
    state: State,
    element: String,
    depth: usize,
    columns: Vec<Column>,
    metadata_sent: bool,
    rows_sent: bool,
    trailer: String,
    unframed: String,
}

impl DocumentDecoder {
    pub(crate) fn new() -> Self {
        Self {
            state: State::Initial,
            element: String::new(),
            depth: 0,
            columns: Vec::new(),
            metadata_sent: false,
            rows_sent: false,
            trailer: String::from("{"),
            unframed: String::new(),
        }
    }

    pub(crate) fn line(&mut self, raw: &str, out: &mut Vec<RecordEvent>) -> Result<()> {
        if self.state == State::Unframed {
            self.unframed.push('\n');
            self.unframed.push_str(raw);
            return Ok(());
        }

        let line = raw.trim();
        if line.is_empty() {
            return Ok(());
        }

        match self.state {
            State::Initial => {
                if line == "{" {
                    self.state = State::TopLevelKeys;
                } else {
                    self.state = State::Unframed;
                    self.unframed.push_str(raw);
                }
            }
            State::TopLevelKeys => match line {
                "\"meta\":" => self.state = State::MetaHeader,
                "\"data\":" => self.state = State::DataHeader,
                "\"meta\": [" => self.state = State::MetaArray,
                "\"data\": [" => self.state = State::DataArray,
                _ => self.trailer.push_str(line),
            },
            State::MetaHeader => {
                if line == "[" {
                    self.state = State::MetaArray;
                }
            }
            State::DataHeader => {
                if line == "[" {
                    self.state = State::DataArray;
                }
            }
            State::MetaArray => {
                if self.depth == 0 && is_array_close(line) {
                    self.state = State::TopLevelKeys;
                    self.emit_metadata(out);
                } else if let Some(element) = self.accumulate(line) {
                    let column = serde_json::from_str::<Column>(&element).map_err(|err| {
                        ClickHouseError::Decode(format!(
                            "invalid column metadata {element}: {err}"
                        ))
                    })?;
                    self.columns.push(column);
                }
            }
            State::DataArray => {
                if self.depth == 0 && is_array_close(line) {
                    self.state = State::TopLevelKeys;
                } else if let Some(element) = self.accumulate(line) {
                    let row = serde_json::from_str::<Value>(&element).map_err(|err| {
                        ClickHouseError::Decode(format!("invalid row {element}: {err}"))
                    })?;
                    self.rows_sent = true;
                    out.push(RecordEvent::Row(row));
                }
            }
            State::Unframed => {}
        }

        Ok(())
    }

    /// Adds a line to the element being assembled and returns the element
    /// text once its outermost brace or bracket is closed.
    fn accumulate(&mut self, line: &str) -> Option<String> {
        if self.depth == 0 && !opens_element(line) {
            return Some(strip_trailing_comma(line).to_owned());
        }

        if closes_element(line) {
            self.depth = self.depth.saturating_sub(1);
        } else if opens_element(line) {
            self.depth += 1;
        }

        if self.depth == 0 {
            self.element.push_str(strip_trailing_comma(line));
            Some(mem::take(&mut self.element))
        } else {
            self.element.push_str(line);
            None
        }
    }

    fn emit_metadata(&mut self, out: &mut Vec<RecordEvent>) {
        if self.metadata_sent || self.rows_sent {
            return;
        }
        self.metadata_sent = true;
        out.push(RecordEvent::Metadata(self.columns.clone()));
    }

    pub(crate) fn finish(
        self,
        format: Option<&str>,
        transferred: u64,
        out: &mut Vec<RecordEvent>,
    ) -> Result<()> {
        match self.state {
            State::Unframed => {
                out.extend(crate::decode::settle_document(
                    &self.unframed,
                    format,
                    transferred,
                )?);
                Ok(())
            }
            State::MetaArray | State::DataArray => Err(ClickHouseError::Decode(
                "response ended inside the meta or data array".to_owned(),
            )),
            _ => {
                let values = serde_json::from_str::<Map<String, Value>>(&self.trailer)
                    .unwrap_or_default();
                out.push(RecordEvent::Trailer(Trailer {
                    values,
                    transferred,
                }));
                Ok(())
            }
        }
    }
}

fn strip_trailing_comma(line: &str) -> &str {
    line.strip_suffix(',').unwrap_or(line)
}

fn opens_element(line: &str) -> bool {
    line.ends_with('{') || line.ends_with('[')
}

fn closes_element(line: &str) -> bool {
    matches!(strip_trailing_comma(line), "}" | "]")
}

fn is_array_close(line: &str) -> bool {
    strip_trailing_comma(line) == "]"
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::DocumentDecoder;
    use crate::{ClickHouseError, Column, RecordEvent};

    fn run(lines: &[&str]) -> Result<Vec<RecordEvent>, ClickHouseError> {
        let mut decoder = DocumentDecoder::new();
        let mut events = Vec::new();
        for line in lines {
            decoder.line(line, &mut events)?;
        }
        decoder.finish(Some("JSONCompact"), 0, &mut events)?;
        Ok(events)
    }

    #[test]
    fn separate_header_and_bracket_lines() {
        let events = run(&[
            "{",
            "\t\"meta\":",
            "\t[",
            "\t\t{",
            "\t\t\t\"name\": \"x\",",
            "\t\t\t\"type\": \"UInt8\"",
            "\t\t}",
            "\t],",
            "",
            "\t\"data\":",
            "\t[",
            "\t\t[1],",
            "\t\t[2]",
            "\t],",
            "",
            "\t\"rows\": 2",
            "}",
        ])
        .expect("must decode");

        assert_eq!(
            events[0],
            RecordEvent::Metadata(vec![Column {
                name: "x".to_owned(),
                kind: "UInt8".to_owned(),
            }])
        );
        assert_eq!(events[1], RecordEvent::Row(json!([1])));
        assert_eq!(events[2], RecordEvent::Row(json!([2])));
        match &events[3] {
            RecordEvent::Trailer(trailer) => assert_eq!(trailer.rows(), Some(2)),
            other => panic!("expected trailer, got {other:?}"),
        }
    }

    #[test]
    fn object_rows_spanning_lines_with_nesting() {
        let events = run(&[
            "{",
            "\"data\": [",
            "{",
            "\"a\": 1,",
            "\"tags\": [",
            "\"x\",",
            "\"y\"",
            "],",
            "\"nested\": {",
            "\"k\": null",
            "}",
            "},",
            "{",
            "\"a\": 2,",
            "\"tags\": [],",
            "\"nested\": {}",
            "}",
            "]",
            "}",
        ])
        .expect("must decode");

        assert_eq!(
            events[0],
            RecordEvent::Row(json!({"a": 1, "tags": ["x", "y"], "nested": {"k": null}}))
        );
        assert_eq!(
            events[1],
            RecordEvent::Row(json!({"a": 2, "tags": [], "nested": {}}))
        );
        assert!(matches!(events[2], RecordEvent::Trailer(_)));
    }

    #[test]
    fn malformed_metadata_is_a_decode_error() {
        let err = run(&["{", "\"meta\": [", "{", "\"name\": \"x\"", "}", "]", "}"])
            .expect_err("must fail");
        assert!(matches!(err, ClickHouseError::Decode(_)));
    }

    #[test]
    fn malformed_trailer_is_swallowed() {
        let events = run(&["{", "\"data\": [", "[1]", "],", "\"rows\": ", "}"])
            .expect("trailer errors are not fatal");
        match events.last() {
            Some(RecordEvent::Trailer(trailer)) => assert!(trailer.values.is_empty()),
            other => panic!("expected trailer, got {other:?}"),
        }
    }

    #[test]
    fn exception_text_inside_data_fails() {
        let err = run(&[
            "{",
            "\"data\": [",
            "[1],",
            "Code: 241. DB::Exception: Memory limit exceeded",
        ])
        .expect_err("must fail");
        assert!(matches!(err, ClickHouseError::Decode(_)));
    }

    #[test]
    fn unframed_document_is_parsed_at_end() {
        let events = run(&[r#"{"meta":[{"name":"n","type":"UInt8"}],"data":[[7]],"rows":1}"#])
            .expect("must decode");
        assert!(matches!(events[0], RecordEvent::Metadata(_)));
        assert_eq!(events[1], RecordEvent::Row(json!([7])));
        assert!(matches!(events[2], RecordEvent::Trailer(_)));
    }
}
