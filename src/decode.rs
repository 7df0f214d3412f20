//! Incremental decoding of response bodies into [`RecordEvent`]s.
//!
//! A [`ResponseDecoder`] is fed body bytes as they arrive, in chunks of any
//! size, and returns the events that became complete. Lines and braces are
//! reassembled across chunk boundaries.

use std::mem;

use crate::{
    document::DocumentDecoder,
    each_row::EachRowDecoder,
    format::{self, FormatFamily},
    wire, ClickHouseError, QueryOutcome, QueryResult, RecordEvent, Result, Trailer,
};

enum Mode {
    Document(DocumentDecoder),
    EachRow(EachRowDecoder),
    Buffered(Vec<u8>),
}

/// Stateful decoder for one response body.
pub struct ResponseDecoder {
    mode: Mode,
    lines: LineBuffer,
    format: Option<String>,
    plain_text: bool,
    transferred: u64,
}

impl ResponseDecoder {
    /// Creates a decoder for a successful response.
    ///
    /// Bodies are decoded incrementally only when the content type is JSON,
    /// the format belongs to the JSON family and `sync` is not set; every
    /// other body is buffered and settled in [`ResponseDecoder::finish`].
    pub fn new(format: Option<&str>, content_type: Option<&str>, sync: bool) -> Self {
        let family = FormatFamily::of(format);
        let json_content = content_type.is_some_and(|value| {
            value.starts_with("application/json") || value.starts_with("application/x-ndjson")
        });
        let plain_text = content_type.map_or(true, |value| {
            value.is_empty() || value.starts_with("text/plain") || value.starts_with("text/html")
        });

        let mode = match family {
            FormatFamily::Document if json_content && !sync => {
                Mode::Document(DocumentDecoder::new())
            }
            FormatFamily::EachRow(flavor) if json_content && !sync => {
                Mode::EachRow(EachRowDecoder::new(flavor))
            }
            _ => Mode::Buffered(Vec::new()),
        };

        Self {
            mode,
            lines: LineBuffer::default(),
            format: format.map(str::to_owned),
            plain_text,
            transferred: 0,
        }
    }

    /// Whether rows are emitted while the body is still arriving.
    pub fn is_incremental(&self) -> bool {
        !matches!(self.mode, Mode::Buffered(_))
    }

    /// Number of body bytes consumed so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    /// Consumes the next chunk of the body.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<RecordEvent>> {
        self.transferred += chunk.len() as u64;
        let mut out = Vec::new();

        if let Mode::Buffered(body) = &mut self.mode {
            body.extend_from_slice(chunk);
            return Ok(out);
        }

        for line in self.lines.push(chunk)? {
            self.line(&line, &mut out)?;
        }
        Ok(out)
    }

    /// Settles the body once the transport reports its end.
    pub fn finish(mut self) -> Result<Vec<RecordEvent>> {
        let mut out = Vec::new();
        if let Some(rest) = self.lines.take_rest()? {
            self.line(&rest, &mut out)?;
        }

        let transferred = self.transferred;
        let format = self.format.as_deref();
        match self.mode {
            Mode::Document(decoder) => decoder.finish(format, transferred, &mut out)?,
            Mode::EachRow(decoder) => decoder.finish(transferred, &mut out),
            Mode::Buffered(body) => {
                out.extend(settle_buffered(body, format, self.plain_text, transferred)?)
            }
        }
        Ok(out)
    }

    fn line(&mut self, line: &str, out: &mut Vec<RecordEvent>) -> Result<()> {
        match &mut self.mode {
            Mode::Document(decoder) => decoder.line(line, out),
            Mode::EachRow(decoder) => decoder.line(line, out),
            Mode::Buffered(_) => Ok(()),
        }
    }
}

fn settle_buffered(
    body: Vec<u8>,
    format: Option<&str>,
    plain_text: bool,
    transferred: u64,
) -> Result<Vec<RecordEvent>> {
    let text = if format::requires_json(format) {
        String::from_utf8(body).map_err(|err| {
            ClickHouseError::Decode(format!("response is not valid UTF-8: {err}"))
        })?
    } else {
        String::from_utf8_lossy(&body).into_owned()
    };

    if plain_text {
        return Ok(vec![RecordEvent::Text(text)]);
    }

    match FormatFamily::of(format) {
        FormatFamily::EachRow(flavor) => {
            let mut decoder = EachRowDecoder::new(flavor);
            let mut out = Vec::new();
            for line in text.split('\n') {
                if decoder.line(line, &mut out).is_err() {
                    return Ok(vec![RecordEvent::Text(text)]);
                }
            }
            decoder.finish(transferred, &mut out);
            Ok(out)
        }
        _ => settle_document(&text, format, transferred),
    }
}

/// Parses a whole `{ meta, data, ... }` document in one pass.
///
/// Bodies that are not such a document are returned as text unless the
/// format is `JSON` or `JSONCompact`.
pub(crate) fn settle_document(
    text: &str,
    format: Option<&str>,
    transferred: u64,
) -> Result<Vec<RecordEvent>> {
    let document = match serde_json::from_str::<wire::Document>(text) {
        Ok(document) => document,
        Err(err) if format::requires_json(format) => {
            return Err(ClickHouseError::Decode(format!(
                "invalid {} response: {err}",
                format.unwrap_or("JSON")
            )))
        }
        Err(_) => return Ok(vec![RecordEvent::Text(text.to_owned())]),
    };

    let rows = document.data.unwrap_or_default();
    let mut out = Vec::with_capacity(rows.len() + 2);
    if let Some(meta) = document.meta {
        out.push(RecordEvent::Metadata(meta));
    }
    out.extend(rows.into_iter().map(RecordEvent::Row));
    out.push(RecordEvent::Trailer(Trailer {
        values: document.trailer,
        transferred,
    }));
    Ok(out)
}

/// Runs a whole body through a fresh decoder.
pub(crate) fn decode_body(
    body: &[u8],
    format: Option<&str>,
    content_type: Option<&str>,
) -> Result<QueryOutcome> {
    let mut decoder = ResponseDecoder::new(format, content_type, true);
    let mut builder = OutcomeBuilder::default();
    for event in decoder.feed(body)? {
        builder.push(event);
    }
    for event in decoder.finish()? {
        builder.push(event);
    }
    Ok(builder.finish())
}

/// Folds a sequence of events into a [`QueryOutcome`].
#[derive(Default)]
pub(crate) struct OutcomeBuilder {
    result: QueryResult,
    text: Option<String>,
}

impl OutcomeBuilder {
    pub(crate) fn push(&mut self, event: RecordEvent) {
        match event {
            RecordEvent::Metadata(meta) => self.result.meta = meta,
            RecordEvent::Progress(progress) => self.result.progress.push(progress),
            RecordEvent::Row(row) => self.result.data.push(row),
            RecordEvent::Trailer(trailer) => self.result.trailer = trailer,
            RecordEvent::Text(text) => self.text = Some(text),
        }
    }

    pub(crate) fn finish(self) -> QueryOutcome {
        match self.text {
            Some(text) => QueryOutcome::Text(text),
            None => QueryOutcome::Rows(self.result),
        }
    }
}

/// Splits a byte stream into `\n`-terminated lines.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        let Some(last_newline) = chunk.iter().rposition(|byte| *byte == b'\n') else {
            self.pending.extend_from_slice(chunk);
            return Ok(Vec::new());
        };

        self.pending.extend_from_slice(&chunk[..last_newline]);
        let complete = mem::replace(&mut self.pending, chunk[last_newline + 1..].to_vec());

        complete
            .split(|byte| *byte == b'\n')
            .map(|line| utf8_line(line.to_vec()))
            .collect()
    }

    fn take_rest(&mut self) -> Result<Option<String>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        utf8_line(mem::take(&mut self.pending)).map(Some)
    }
}

fn utf8_line(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|err| ClickHouseError::Decode(format!("response line is not valid UTF-8: {err}")))
}
