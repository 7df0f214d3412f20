use std::{collections::BTreeMap, fmt};

use crate::shaper::QuerySettings;

/// URL scheme used to reach the server.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// Connection-level configuration.
#[derive(Clone, Eq, PartialEq)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub protocol: Protocol,
    /// Request path of the HTTP interface.
    pub path: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Extra URL parameters sent with every query, such as `database`.
    pub query_options: BTreeMap<String, String>,
    /// Response format used instead of the per-kind default.
    pub format: Option<String>,
    /// Never append a `FORMAT` clause.
    pub omit_format: bool,
    /// Ask for object rows (`JSON`) instead of array rows (`JSONCompact`).
    pub data_objects: bool,
    /// Send query text as a `GET` URL parameter.
    pub readonly: bool,
    /// Same as `readonly`.
    pub use_query_string: bool,
    /// Buffer whole responses instead of decoding them incrementally.
    pub sync_parser: bool,
    /// Total timeout for one-shot requests in milliseconds. Also the read
    /// deadline of record channels, except streamed inserts.
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Maximum number of retries of one-shot requests after the first
    /// attempt.
    pub max_retries: usize,
    /// Base retry backoff in milliseconds (exponential strategy).
    pub retry_backoff_ms: u64,
    /// Decoded events queued before reading the response stalls.
    pub read_buffer: usize,
    /// Encoded chunks queued before a write waits for the transport.
    pub write_buffer: usize,
}

impl ClientOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_query_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_options.insert(key.into(), value.into());
        self
    }

    pub fn readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8123,
            protocol: Protocol::Http,
            path: "/".to_owned(),
            user: None,
            password: None,
            query_options: BTreeMap::new(),
            format: None,
            omit_format: false,
            data_objects: false,
            readonly: false,
            use_query_string: false,
            sync_parser: false,
            timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            max_retries: 0,
            retry_backoff_ms: 250,
            read_buffer: 16,
            write_buffer: 16,
        }
    }
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("path", &self.path)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("query_options", &self.query_options)
            .field("format", &self.format)
            .field("omit_format", &self.omit_format)
            .field("data_objects", &self.data_objects)
            .field("readonly", &self.readonly)
            .field("use_query_string", &self.use_query_string)
            .field("sync_parser", &self.sync_parser)
            .field("timeout_ms", &self.timeout_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("read_buffer", &self.read_buffer)
            .field("write_buffer", &self.write_buffer)
            .finish()
    }
}

/// Per-call overrides. Flags are OR-ed with the connection flags.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct QueryOptions {
    pub format: Option<String>,
    pub omit_format: bool,
    pub data_objects: bool,
    pub readonly: bool,
    pub sync_parser: bool,
    /// Extra URL parameters; these win over connection-level ones.
    pub query_options: BTreeMap<String, String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn omit_format(mut self) -> Self {
        self.omit_format = true;
        self
    }

    pub fn data_objects(mut self) -> Self {
        self.data_objects = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn sync_parser(mut self) -> Self {
        self.sync_parser = true;
        self
    }

    pub fn query_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_options.insert(key.into(), value.into());
        self
    }
}

/// Per-call options merged over the connection options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct EffectiveOptions {
    pub(crate) settings: QuerySettings,
    pub(crate) sync_parser: bool,
    pub(crate) query_options: BTreeMap<String, String>,
}

impl EffectiveOptions {
    pub(crate) fn merge(connection: &ClientOptions, call: QueryOptions) -> Self {
        let mut query_options = connection.query_options.clone();
        query_options.extend(call.query_options);

        Self {
            settings: QuerySettings {
                format: call.format.or_else(|| connection.format.clone()),
                omit_format: call.omit_format || connection.omit_format,
                data_objects: call.data_objects || connection.data_objects,
                readonly: call.readonly || connection.readonly || connection.use_query_string,
            },
            sync_parser: call.sync_parser || connection.sync_parser,
            query_options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientOptions, EffectiveOptions, QueryOptions};

    #[test]
    fn per_call_query_options_win() {
        let connection = ClientOptions::new("localhost")
            .with_query_option("database", "default")
            .with_query_option("max_threads", "4");
        let merged = EffectiveOptions::merge(
            &connection,
            QueryOptions::new().query_option("database", "analytics"),
        );

        assert_eq!(merged.query_options["database"], "analytics");
        assert_eq!(merged.query_options["max_threads"], "4");
    }

    #[test]
    fn flags_are_or_ed_and_format_overrides() {
        let connection = ClientOptions {
            use_query_string: true,
            sync_parser: true,
            format: Some("JSON".to_owned()),
            ..ClientOptions::new("localhost")
        };
        let merged = EffectiveOptions::merge(&connection, QueryOptions::new().format("CSV"));

        assert!(merged.settings.readonly);
        assert!(merged.sync_parser);
        assert_eq!(merged.settings.format.as_deref(), Some("CSV"));

        let merged = EffectiveOptions::merge(&connection, QueryOptions::new());
        assert_eq!(merged.settings.format.as_deref(), Some("JSON"));
    }

    #[test]
    fn debug_redacts_password() {
        let options = ClientOptions::new("localhost").with_credentials("reader", "hunter2");
        let debug = format!("{options:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("hunter2"));
    }
}
