//! `clickhouse-http` is an async streaming client for the ClickHouse HTTP
//! interface.
//!
//! Queries are classified and completed with a `FORMAT` clause, sent over
//! `GET` or `POST`, and their responses decoded into row events while the
//! body arrives:
//! - [`ClickHouseClient::query`] opens a duplex [`RecordStream`]
//! - [`ClickHouseClient::querying`] buffers a complete [`QueryOutcome`]
//! - [`ClickHouseClient::ping`] and [`ClickHouseClient::pinging`]

mod channel;
mod client;
mod decode;
mod document;
mod each_row;
mod encode;
mod error;
mod exception;
mod format;
mod options;
mod record;
mod shaper;
mod types;
mod wire;

pub use channel::{RecordReader, RecordStream, RecordWriter};
pub use client::{ClickHouseClient, PING_RESPONSE};
pub use decode::ResponseDecoder;
pub use encode::{DefaultRowEncoder, RowEncoder};
pub use error::ClickHouseError;
pub use exception::{parse_exception, parse_exception_bytes, ServerException};
pub use format::{canonical_name, EachRowFlavor, FormatFamily, FORMAT_NAMES};
pub use options::{ClientOptions, Protocol, QueryOptions};
pub use record::Record;
pub use shaper::{shape_query, QueryKind, QueryRequest, QuerySettings, Transmission};
pub use types::{Column, QueryOutcome, QueryResult, RecordEvent, Trailer};

pub type Result<T> = std::result::Result<T, ClickHouseError>;
