//! Duplex record channel: an outbound half that encodes rows into the
//! request body and an inbound half that yields decoded response events.
//!
//! Both halves share ownership of the task driving the HTTP exchange. The
//! task is aborted on [`RecordStream::destroy`] or once both halves are
//! dropped, which drops the in-flight request and releases the connection.

use std::{
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{ready, Context, Poll},
};

use bytes::Bytes;
use futures::Stream;
use reqwest::{header, RequestBuilder};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    decode::{OutcomeBuilder, ResponseDecoder},
    ClickHouseError, Column, QueryOutcome, Record, RecordEvent, Result, RowEncoder,
};

/// Aborts the request task when the last half of the channel is dropped.
struct RequestGuard {
    task: JoinHandle<()>,
    cancelled: AtomicBool,
}

impl RequestGuard {
    fn abort(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.task.abort();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) struct ChannelConfig {
    pub(crate) format: Option<String>,
    pub(crate) sync_parser: bool,
    /// Keep the request body open for caller writes.
    pub(crate) streamed: bool,
    pub(crate) read_buffer: usize,
    pub(crate) write_buffer: usize,
    pub(crate) encoder: Arc<dyn RowEncoder>,
}

/// Starts the request and returns the channel wrapping it.
///
/// `prelude` is sent first in the request body; for streamed requests it is
/// followed by whatever the caller writes.
pub(crate) fn open(
    request: RequestBuilder,
    prelude: Option<Bytes>,
    config: ChannelConfig,
) -> Result<RecordStream> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
        ClickHouseError::Usage("queries must be started inside a tokio runtime".to_owned())
    })?;

    let (event_tx, event_rx) = mpsc::channel(config.read_buffer.max(1));
    let aborted = Arc::new(AtomicBool::new(false));

    let (sender, request) = if config.streamed {
        let (body_tx, body_rx) = mpsc::channel(config.write_buffer.max(1));
        let body = OutboundBody {
            prelude,
            receiver: body_rx,
            aborted: Arc::clone(&aborted),
            done: false,
        };
        (Some(body_tx), request.body(reqwest::Body::wrap_stream(body)))
    } else {
        let request = match prelude {
            Some(bytes) => request.body(bytes),
            None => request,
        };
        (None, request)
    };

    let task = runtime.spawn(drive(request, config.format.clone(), config.sync_parser, event_tx));
    let guard = Arc::new(RequestGuard {
        task,
        cancelled: AtomicBool::new(false),
    });

    Ok(RecordStream {
        writer: RecordWriter {
            sender,
            aborted,
            streamed: config.streamed,
            encoder: config.encoder,
            format: config.format,
            guard: Arc::clone(&guard),
        },
        reader: RecordReader {
            receiver: event_rx,
            guard,
            metadata: None,
            finished: false,
        },
    })
}

async fn drive(
    request: RequestBuilder,
    format: Option<String>,
    sync_parser: bool,
    events: mpsc::Sender<Result<RecordEvent>>,
) {
    if let Err(err) = pump(request, format.as_deref(), sync_parser, &events).await {
        #[cfg(feature = "tracing")]
        tracing::debug!(error = %err, "query failed");

        let _ = events.send(Err(err)).await;
    }
}

async fn pump(
    request: RequestBuilder,
    format: Option<&str>,
    sync_parser: bool,
    events: &mpsc::Sender<Result<RecordEvent>>,
) -> Result<()> {
    let mut response = request.send().await.map_err(ClickHouseError::Transport)?;
    let status = response.status();

    if !status.is_success() {
        let body = response.bytes().await.map_err(ClickHouseError::Transport)?;
        return Err(ClickHouseError::server(status.as_u16(), &body));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let mut decoder = ResponseDecoder::new(format, content_type.as_deref(), sync_parser);

    while let Some(chunk) = response.chunk().await.map_err(ClickHouseError::Transport)? {
        for event in decoder.feed(&chunk)? {
            if events.send(Ok(event)).await.is_err() {
                return Ok(());
            }
        }
    }

    for event in decoder.finish()? {
        if events.send(Ok(event)).await.is_err() {
            return Ok(());
        }
    }
    Ok(())
}

/// Request body of a streamed query: the prelude, then caller writes.
///
/// Ends cleanly when the writer ends, and with an error when the writer
/// was dropped or destroyed first so the server never commits a partial
/// insert.
struct OutboundBody {
    prelude: Option<Bytes>,
    receiver: mpsc::Receiver<Bytes>,
    aborted: Arc<AtomicBool>,
    done: bool,
}

impl Stream for OutboundBody {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if let Some(prelude) = this.prelude.take() {
            return Poll::Ready(Some(Ok(prelude)));
        }

        match ready!(this.receiver.poll_recv(cx)) {
            Some(chunk) => Poll::Ready(Some(Ok(chunk))),
            None => {
                this.done = true;
                if this.aborted.load(Ordering::Acquire) {
                    Poll::Ready(Some(Err(io::Error::new(
                        io::ErrorKind::Interrupted,
                        "record writer aborted before end",
                    ))))
                } else {
                    Poll::Ready(None)
                }
            }
        }
    }
}

/// Outbound half of a [`RecordStream`].
pub struct RecordWriter {
    sender: Option<mpsc::Sender<Bytes>>,
    aborted: Arc<AtomicBool>,
    streamed: bool,
    encoder: Arc<dyn RowEncoder>,
    format: Option<String>,
    guard: Arc<RequestGuard>,
}

impl RecordWriter {
    /// Encodes and sends one record.
    ///
    /// Resolves once the chunk is queued for the transport; waits while
    /// the queue is full.
    pub async fn write(&mut self, record: impl Into<Record>) -> Result<()> {
        let chunk = self.prepare(record.into())?;
        let sender = self.sender.as_ref().ok_or_else(|| self.not_writable())?;
        sender
            .send(chunk)
            .await
            .map_err(|_| ClickHouseError::Closed)
    }

    /// Finishes the request body. Further writes fail.
    pub fn end(&mut self) {
        self.sender = None;
    }

    /// Whether the request body still accepts writes.
    pub fn is_open(&self) -> bool {
        self.sender.as_ref().is_some_and(|sender| !sender.is_closed())
    }

    /// Aborts the request body and the whole exchange.
    pub fn destroy(mut self) {
        self.abort_body();
        self.guard.abort();

        #[cfg(feature = "tracing")]
        tracing::debug!("record channel destroyed from the writer");
    }

    fn prepare(&self, record: Record) -> Result<Bytes> {
        match record {
            Record::Bytes(bytes) => Ok(bytes),
            Record::Text(mut text) => {
                if !text.ends_with('\n') {
                    text.push('\n');
                }
                Ok(Bytes::from(text))
            }
            Record::Row(row) => {
                let format = self.format.as_deref().ok_or_else(|| {
                    ClickHouseError::Usage("rows need a known input format".to_owned())
                })?;
                self.encoder.encode(&row, format).map(Bytes::from)
            }
        }
    }

    fn not_writable(&self) -> ClickHouseError {
        if self.streamed {
            ClickHouseError::Usage("record writer already ended".to_owned())
        } else {
            ClickHouseError::Usage("query is complete and does not accept rows".to_owned())
        }
    }

    fn abort_body(&mut self) {
        if self.sender.take().is_some() {
            self.aborted.store(true, Ordering::Release);
        }
    }
}

impl Drop for RecordWriter {
    fn drop(&mut self) {
        self.abort_body();
    }
}

/// Inbound half of a [`RecordStream`].
pub struct RecordReader {
    receiver: mpsc::Receiver<Result<RecordEvent>>,
    guard: Arc<RequestGuard>,
    metadata: Option<Vec<Column>>,
    finished: bool,
}

impl RecordReader {
    /// Waits for the next event.
    ///
    /// Returns `None` after the terminal event or an error. A channel
    /// cancelled before its terminal event, or destroyed from the writer,
    /// yields [`ClickHouseError::Closed`] and drops any queued events.
    pub async fn next_event(&mut self) -> Option<Result<RecordEvent>> {
        futures::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Column list, once the metadata event has been read.
    pub fn metadata(&self) -> Option<&[Column]> {
        self.metadata.as_deref()
    }

    /// Reads every remaining event into a settled outcome.
    pub async fn collect(mut self) -> Result<QueryOutcome> {
        let mut builder = OutcomeBuilder::default();
        if let Some(meta) = self.metadata.clone() {
            builder.push(RecordEvent::Metadata(meta));
        }
        while let Some(event) = self.next_event().await {
            builder.push(event?);
        }
        Ok(builder.finish())
    }

    /// Cancels the exchange. No further events are delivered.
    pub fn destroy(self) {
        self.guard.abort();

        #[cfg(feature = "tracing")]
        tracing::debug!("record channel destroyed from the reader");
    }

    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<RecordEvent>>> {
        if self.finished {
            return Poll::Ready(None);
        }
        if self.guard.is_cancelled() {
            self.finished = true;
            self.receiver.close();
            while self.receiver.try_recv().is_ok() {}
            return Poll::Ready(Some(Err(ClickHouseError::Closed)));
        }

        let item = match ready!(self.receiver.poll_recv(cx)) {
            Some(Ok(event)) => {
                match &event {
                    RecordEvent::Metadata(columns) => self.metadata = Some(columns.clone()),
                    RecordEvent::Trailer(_) | RecordEvent::Text(_) => self.finished = true,
                    RecordEvent::Progress(_) | RecordEvent::Row(_) => {}
                }
                Ok(event)
            }
            Some(Err(err)) => {
                self.finished = true;
                Err(err)
            }
            None => {
                self.finished = true;
                Err(ClickHouseError::Closed)
            }
        };
        Poll::Ready(Some(item))
    }
}

impl Stream for RecordReader {
    type Item = Result<RecordEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_event(cx)
    }
}

/// Both halves of a query exchange.
pub struct RecordStream {
    writer: RecordWriter,
    reader: RecordReader,
}

impl RecordStream {
    /// Separates the halves so they can be driven from different tasks.
    pub fn split(self) -> (RecordWriter, RecordReader) {
        (self.writer, self.reader)
    }

    pub fn writer(&mut self) -> &mut RecordWriter {
        &mut self.writer
    }

    pub fn reader(&mut self) -> &mut RecordReader {
        &mut self.reader
    }

    pub async fn write(&mut self, record: impl Into<Record>) -> Result<()> {
        self.writer.write(record).await
    }

    pub fn end(&mut self) {
        self.writer.end();
    }

    pub async fn next_event(&mut self) -> Option<Result<RecordEvent>> {
        self.reader.next_event().await
    }

    /// Ends the request body and reads the response to completion.
    pub async fn collect(mut self) -> Result<QueryOutcome> {
        self.writer.end();
        let (_writer, reader) = self.split();
        reader.collect().await
    }

    /// Aborts the exchange: the request body is abandoned, the response is
    /// dropped and no further events are delivered.
    pub fn destroy(self) {
        let (mut writer, reader) = self.split();
        writer.abort_body();
        reader.destroy();
    }
}
