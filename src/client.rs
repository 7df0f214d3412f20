use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::{header, Method, RequestBuilder, StatusCode, Url};
use tokio::time::sleep;

use crate::{
    channel::{self, ChannelConfig, RecordStream},
    decode::decode_body,
    options::EffectiveOptions,
    shaper::{shape_query, QueryRequest, Transmission},
    ClickHouseError, ClientOptions, DefaultRowEncoder, Protocol, QueryOptions, QueryOutcome,
    Result, RowEncoder,
};

/// Body the server answers a successful ping with.
pub const PING_RESPONSE: &str = "Ok.\n";

#[derive(Clone)]
/// Client for the ClickHouse HTTP interface.
pub struct ClickHouseClient {
    /// Transport with a read deadline of `timeout_ms`.
    http: reqwest::Client,
    /// Transport for streamed inserts. The server answers only once the
    /// body ends, so no read deadline applies while the caller writes.
    upload_http: reqwest::Client,
    base_url: Url,
    options: ClientOptions,
    encoder: Arc<dyn RowEncoder>,
}

impl fmt::Debug for ClickHouseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClickHouseClient")
            .field("base_url", &self.base_url.as_str())
            .field("options", &self.options)
            .finish()
    }
}

/// Raw response of a one-shot request.
struct Fetched {
    content_type: Option<String>,
    body: Bytes,
}

impl ClickHouseClient {
    /// Creates a client from connection options.
    ///
    /// Fails with [`ClickHouseError::Usage`] when the host is empty or the
    /// resulting URL is invalid.
    pub fn new(options: ClientOptions) -> Result<Self> {
        if options.host.trim().is_empty() {
            return Err(ClickHouseError::Usage(
                "a host name is required to reach ClickHouse".to_owned(),
            ));
        }

        let base_url = base_url(&options)?;
        let http = http_client(&options, true)?;
        let upload_http = http_client(&options, false)?;

        Ok(Self {
            http,
            upload_http,
            base_url,
            options,
            encoder: Arc::new(DefaultRowEncoder),
        })
    }

    /// Creates a client for `host` with default options.
    pub fn from_host(host: impl Into<String>) -> Result<Self> {
        Self::new(ClientOptions::new(host))
    }

    /// Creates a client from environment variables.
    ///
    /// Reads:
    /// - `CLICKHOUSE_HOST` (required)
    /// - `CLICKHOUSE_PORT`
    /// - `CLICKHOUSE_USER` and `CLICKHOUSE_PASSWORD`
    /// - `CLICKHOUSE_PROTOCOL` (`http` or `https`)
    ///
    /// # Example
    ///
    /// ```no_run
    /// use clickhouse_http::ClickHouseClient;
    ///
    /// let ch = ClickHouseClient::from_env().expect("missing CLICKHOUSE_* env vars");
    /// ```
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("CLICKHOUSE_HOST").map_err(|_| {
            ClickHouseError::Usage("missing CLICKHOUSE_HOST environment variable".to_owned())
        })?;
        let mut options = ClientOptions::new(host);

        if let Ok(port) = std::env::var("CLICKHOUSE_PORT") {
            options.port = port.trim().parse().map_err(|_| {
                ClickHouseError::Usage(format!("CLICKHOUSE_PORT '{port}' is not a port number"))
            })?;
        }
        if let Ok(user) = std::env::var("CLICKHOUSE_USER") {
            options.user = Some(user);
        }
        if let Ok(password) = std::env::var("CLICKHOUSE_PASSWORD") {
            options.password = Some(password);
        }
        if let Ok(protocol) = std::env::var("CLICKHOUSE_PROTOCOL") {
            options.protocol = match protocol.trim().to_ascii_lowercase().as_str() {
                "http" => Protocol::Http,
                "https" => Protocol::Https,
                other => {
                    return Err(ClickHouseError::Usage(format!(
                        "CLICKHOUSE_PROTOCOL '{other}' is not http or https"
                    )))
                }
            };
        }

        Self::new(options)
    }

    /// Replaces the encoder used for structured rows written to inserts.
    pub fn with_encoder(mut self, encoder: Arc<dyn RowEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Starts a query and returns its record channel.
    ///
    /// Rows are decoded while the response arrives. For streamed inserts
    /// the request body stays open until [`RecordStream::end`]. Must be
    /// called inside a tokio runtime.
    pub fn query(&self, sql: &str, options: QueryOptions) -> Result<RecordStream> {
        let effective = EffectiveOptions::merge(&self.options, options);
        let shaped = shape_query(sql, &effective.settings);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            method = %shaped.method(),
            kind = ?shaped.kind,
            format = ?shaped.format,
            "starting query"
        );

        let request = self.build_request(&shaped, &effective.query_options);
        let prelude = (shaped.transmission == Transmission::Body)
            .then(|| Bytes::from(shaped.sql.clone()));

        channel::open(
            request,
            prelude,
            ChannelConfig {
                format: shaped.format.clone(),
                sync_parser: effective.sync_parser,
                streamed: !shaped.is_finalized(),
                read_buffer: self.options.read_buffer,
                write_buffer: self.options.write_buffer,
                encoder: Arc::clone(&self.encoder),
            },
        )
    }

    /// Runs a complete query and returns its settled result.
    ///
    /// The response is buffered and parsed in one pass; on any failure no
    /// partial result is returned. Streamed inserts are rejected, use
    /// [`ClickHouseClient::query`] for them.
    pub async fn querying(&self, sql: &str, options: QueryOptions) -> Result<QueryOutcome> {
        let effective = EffectiveOptions::merge(&self.options, options);
        let shaped = shape_query(sql, &effective.settings);

        if !shaped.is_finalized() {
            return Err(ClickHouseError::Usage(format!(
                "{:?} queries need streamed rows; use query() instead",
                shaped.kind
            )));
        }

        let fetched = self
            .send_with_retry(|| {
                let request = self.build_request(&shaped, &effective.query_options);
                match shaped.transmission {
                    Transmission::Body => request.body(shaped.sql.clone()),
                    Transmission::QueryString => request,
                }
            })
            .await?;

        decode_body(
            &fetched.body,
            shaped.format.as_deref(),
            fetched.content_type.as_deref(),
        )
    }

    /// Sends a bodyless `GET` and returns the record channel of the reply.
    pub fn ping(&self) -> Result<RecordStream> {
        let request = self.request(Method::GET, &BTreeMap::new(), None);
        channel::open(
            request,
            None,
            ChannelConfig {
                format: None,
                sync_parser: true,
                streamed: false,
                read_buffer: self.options.read_buffer,
                write_buffer: self.options.write_buffer,
                encoder: Arc::clone(&self.encoder),
            },
        )
    }

    /// Checks that the server answers with `Ok.\n`.
    pub async fn pinging(&self) -> Result<String> {
        let fetched = self
            .send_with_retry(|| self.request(Method::GET, &BTreeMap::new(), None))
            .await?;

        match decode_body(&fetched.body, None, fetched.content_type.as_deref())? {
            QueryOutcome::Text(text) if text == PING_RESPONSE => Ok(text),
            QueryOutcome::Text(text) => Err(ClickHouseError::Decode(format!(
                "unexpected ping response {text:?}"
            ))),
            QueryOutcome::Rows(_) => Err(ClickHouseError::Decode(
                "unexpected structured ping response".to_owned(),
            )),
        }
    }

    fn build_request(
        &self,
        shaped: &QueryRequest,
        query_options: &BTreeMap<String, String>,
    ) -> RequestBuilder {
        let query_text = match shaped.transmission {
            Transmission::QueryString => Some(shaped.sql.as_str()),
            Transmission::Body => None,
        };
        let http = if shaped.is_finalized() {
            &self.http
        } else {
            &self.upload_http
        };
        self.request_on(http, shaped.method(), query_options, query_text)
    }

    fn request(
        &self,
        method: Method,
        query_options: &BTreeMap<String, String>,
        query_text: Option<&str>,
    ) -> RequestBuilder {
        self.request_on(&self.http, method, query_options, query_text)
    }

    fn request_on(
        &self,
        http: &reqwest::Client,
        method: Method,
        query_options: &BTreeMap<String, String>,
        query_text: Option<&str>,
    ) -> RequestBuilder {
        let url = self.request_url(query_options, query_text);
        let mut request = http.request(method, url);
        if self.options.user.is_some() || self.options.password.is_some() {
            request = request.basic_auth(
                self.options.user.as_deref().unwrap_or("default"),
                Some(self.options.password.as_deref().unwrap_or("")),
            );
        }
        request
    }

    fn request_url(
        &self,
        query_options: &BTreeMap<String, String>,
        query_text: Option<&str>,
    ) -> Url {
        let mut url = self.base_url.clone();
        if !query_options.is_empty() || query_text.is_some() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query_options {
                pairs.append_pair(key, value);
            }
            if let Some(query_text) = query_text {
                pairs.append_pair("query", query_text);
            }
        }
        url
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Fetched>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0usize;
        loop {
            let response = build()
                .timeout(Duration::from_millis(self.options.timeout_ms))
                .send()
                .await;

            match response {
                Ok(response) => {
                    let status = response.status();
                    let content_type = response
                        .headers()
                        .get(header::CONTENT_TYPE)
                        .and_then(|value| value.to_str().ok())
                        .map(str::to_owned);
                    let body = response.bytes().await.map_err(ClickHouseError::Transport)?;

                    if !status.is_success() {
                        if self.should_retry_status(status) && attempt < self.options.max_retries {
                            self.wait_before_retry(attempt).await;
                            attempt += 1;
                            continue;
                        }

                        #[cfg(feature = "tracing")]
                        tracing::debug!(status = status.as_u16(), "server returned an error");

                        return Err(ClickHouseError::server(status.as_u16(), &body));
                    }

                    return Ok(Fetched {
                        content_type,
                        body,
                    });
                }
                Err(err) => {
                    if self.should_retry_transport(&err) && attempt < self.options.max_retries {
                        self.wait_before_retry(attempt).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ClickHouseError::Transport(err));
                }
            }
        }
    }

    fn should_retry_status(&self, status: StatusCode) -> bool {
        matches!(
            status,
            StatusCode::TOO_MANY_REQUESTS
                | StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
        )
    }

    fn should_retry_transport(&self, err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect() || err.is_request() || err.is_body()
    }

    /// Waits before the next retry attempt with exponential backoff.
    async fn wait_before_retry(&self, attempt: usize) {
        let exp = attempt.min(16) as u32;
        let multiplier = 1u64 << exp;
        let delay_ms = self.options.retry_backoff_ms.saturating_mul(multiplier);

        #[cfg(feature = "tracing")]
        tracing::debug!("retrying request after {} ms", delay_ms);

        sleep(Duration::from_millis(delay_ms)).await;
    }
}

fn http_client(options: &ClientOptions, read_deadline: bool) -> Result<reqwest::Client> {
    let mut builder =
        reqwest::Client::builder().connect_timeout(Duration::from_millis(options.connect_timeout_ms));
    if read_deadline {
        builder = builder.read_timeout(Duration::from_millis(options.timeout_ms));
    }
    builder.build().map_err(ClickHouseError::Transport)
}

fn base_url(options: &ClientOptions) -> Result<Url> {
    let path = if options.path.starts_with('/') {
        options.path.clone()
    } else {
        format!("/{}", options.path)
    };
    let raw = format!(
        "{}://{}:{}{}",
        options.protocol.scheme(),
        options.host.trim(),
        options.port,
        path
    );
    Url::parse(&raw)
        .map_err(|err| ClickHouseError::Usage(format!("invalid server URL '{raw}': {err}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::ClickHouseClient;
    use crate::{ClickHouseError, ClientOptions, Protocol};

    #[test]
    fn empty_host_is_a_usage_error() {
        let err = ClickHouseClient::new(ClientOptions::new("  ")).expect_err("must fail");
        assert!(matches!(err, ClickHouseError::Usage(_)));
    }

    #[test]
    fn base_url_uses_protocol_port_and_path() {
        let client = ClickHouseClient::new(ClientOptions {
            protocol: Protocol::Https,
            port: 8443,
            path: "ch".to_owned(),
            ..ClientOptions::new("db.example.com")
        })
        .expect("must build");

        assert_eq!(client.base_url.as_str(), "https://db.example.com:8443/ch");
    }

    #[test]
    fn request_url_carries_options_then_query() {
        let client = ClickHouseClient::from_host("127.0.0.1").expect("must build");
        let mut options = BTreeMap::new();
        options.insert("database".to_owned(), "analytics".to_owned());

        let url = client.request_url(&options, Some("SELECT 1 FORMAT JSONCompact"));
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8123/?database=analytics&query=SELECT+1+FORMAT+JSONCompact"
        );

        let url = client.request_url(&BTreeMap::new(), None);
        assert_eq!(url.as_str(), "http://127.0.0.1:8123/");
    }

    #[test]
    fn debug_redacts_password() {
        let client = ClickHouseClient::new(
            ClientOptions::new("localhost").with_credentials("default", "secret-token"),
        )
        .expect("must build");
        let debug = format!("{client:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("secret-token"));
    }
}
