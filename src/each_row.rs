use serde_json::{Map, Value};

use crate::{
    exception::parse_exception,
    format::EachRowFlavor,
    wire::ProgressLine,
    ClickHouseError, Column, RecordEvent, Result, Trailer,
};

/// Decoder for the row-delimited formats where every line is one JSON value.
pub(crate) struct EachRowDecoder {
    flavor: EachRowFlavor,
    lines_processed: usize,
    names: Vec<String>,
}

impl EachRowDecoder {
    pub(crate) fn new(flavor: EachRowFlavor) -> Self {
        Self {
            flavor,
            lines_processed: 0,
            names: Vec::new(),
        }
    }

    pub(crate) fn line(&mut self, raw: &str, out: &mut Vec<RecordEvent>) -> Result<()> {
        let line = raw.trim();
        if line.is_empty() {
            return Ok(());
        }

        let value = serde_json::from_str::<Value>(line)
            .map_err(|err| ClickHouseError::Decode(format!("invalid row line {line}: {err}")))?;

        if self.flavor.with_names_and_types && self.lines_processed < 2 {
            let header = string_array(value)?;
            if self.lines_processed == 0 {
                self.names = header;
            } else {
                let columns = self
                    .names
                    .drain(..)
                    .zip(header)
                    .map(|(name, kind)| Column { name, kind })
                    .collect();
                out.push(RecordEvent::Metadata(columns));
            }
        } else if self.flavor.with_progress {
            let ProgressLine {
                progress,
                row,
                exception,
            } = serde_json::from_value(value).map_err(|err| {
                ClickHouseError::Decode(format!("invalid progress line {line}: {err}"))
            })?;
            if let Some(text) = exception {
                return Err(ClickHouseError::Server {
                    status: 200,
                    exception: parse_exception(&text),
                });
            }
            match (progress, row) {
                (Some(progress), _) => out.push(RecordEvent::Progress(progress)),
                (None, Some(row)) => out.push(RecordEvent::Row(row)),
                (None, None) => {
                    return Err(ClickHouseError::Decode(format!(
                        "progress line without progress or row: {line}"
                    )))
                }
            }
        } else {
            out.push(RecordEvent::Row(value));
        }

        self.lines_processed += 1;
        Ok(())
    }

    pub(crate) fn finish(self, transferred: u64, out: &mut Vec<RecordEvent>) {
        out.push(RecordEvent::Trailer(Trailer {
            values: Map::new(),
            transferred,
        }));
    }
}

fn string_array(value: Value) -> Result<Vec<String>> {
    serde_json::from_value(value)
        .map_err(|err| ClickHouseError::Decode(format!("invalid names/types line: {err}")))
}
