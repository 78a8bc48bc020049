//! HTTP transport for the dbship API.
//!
//! One HTTP/1.1 connection per call, over rustls when the server URL is
//! https. Bodies are JSON both ways; non-2xx answers are decoded into
//! `ServiceError::Status`.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

use dbship_core::{ServiceError, ServiceResult};

/// Per-call deadline, connect through body.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

const AGENT: &str = concat!("dbship/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Where the server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    /// Path prefix the API is mounted under, no trailing slash.
    pub base_path: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> ServiceResult<Self> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e| ServiceError::Transport(format!("invalid url {url}: {e}")))?;
        let scheme = match uri.scheme_str() {
            Some("http") => Scheme::Http,
            Some("https") => Scheme::Https,
            other => {
                return Err(ServiceError::Transport(format!(
                    "unsupported scheme {other:?} in {url}"
                )));
            }
        };
        let host = uri
            .host()
            .ok_or_else(|| ServiceError::Transport(format!("missing host in {url}")))?
            .to_string();
        Ok(Self {
            scheme,
            port: uri.port_u16().unwrap_or(scheme.default_port()),
            host,
            base_path: uri.path().trim_end_matches('/').to_string(),
        })
    }

    fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn host_header(&self) -> String {
        if self.port == self.scheme.default_port() {
            self.host.clone()
        } else {
            self.authority()
        }
    }
}

/// Query string under construction. Values are percent-encoded; `/` is
/// kept so resource names stay readable.
#[derive(Debug, Default, Clone)]
pub struct Query(Vec<(&'static str, String)>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.0.push((key, value.into()));
        self
    }

    pub fn render(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let pairs: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{k}={}", encode(v)))
            .collect();
        format!("?{}", pairs.join("&"))
    }
}

// Unlike a strict query encoder, `/` passes through: values are resource
// names such as `environments/prod` and the server accepts them raw.
fn encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
    web: bool,
}

#[derive(Deserialize, Default)]
#[cfg_attr(test, derive(Debug))]
#[serde(default)]
struct LoginResponse {
    token: String,
}

/// Error payload the server sends with non-2xx answers.
#[derive(Deserialize, Default)]
#[serde(default)]
struct ErrorBody {
    code: i32,
    message: String,
}

/// Authenticated client for one server.
pub struct ApiClient {
    endpoint: Endpoint,
    tls: Option<TlsConnector>,
    token: Option<String>,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(url: &str) -> ServiceResult<Self> {
        let endpoint = Endpoint::parse(url)?;
        let tls = match endpoint.scheme {
            Scheme::Https => Some(tls_connector()?),
            Scheme::Http => None,
        };
        Ok(Self {
            endpoint,
            tls,
            token: None,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Exchange service account credentials for a bearer token used by
    /// every later call.
    pub async fn login(&mut self, email: &str, password: &str) -> ServiceResult<()> {
        let request = LoginRequest {
            email,
            password,
            web: true,
        };
        let response: LoginResponse = self
            .call(Method::POST, "/v1/auth/login", &Query::new(), Some(&request))
            .await
            .map_err(|e| match e {
                ServiceError::Status { message, .. } => ServiceError::Auth(message),
                other => other,
            })?;
        if response.token.is_empty() {
            return Err(ServiceError::Auth(format!("no token returned for {email}")));
        }
        self.token = Some(response.token);
        info!(account = %email, host = %self.endpoint.host, "logged in");
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &Query) -> ServiceResult<T> {
        self.call::<(), T>(Method::GET, path, query, None).await
    }

    pub async fn post<B, T>(&self, path: &str, query: &Query, body: &B) -> ServiceResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.call(Method::POST, path, query, Some(body)).await
    }

    async fn call<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &Query,
        body: Option<&B>,
    ) -> ServiceResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let target = format!("{}{path}{}", self.endpoint.base_path, query.render());
        let payload = match body {
            Some(body) => serde_json::to_vec(body)
                .map_err(|e| ServiceError::Decode(format!("failed to encode request: {e}")))?,
            None => Vec::new(),
        };

        let mut builder = Request::builder()
            .method(method.clone())
            .uri(&target)
            .header(HOST, self.endpoint.host_header())
            .header(USER_AGENT, AGENT)
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json");
        if let Some(token) = &self.token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = builder
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| ServiceError::Transport(format!("invalid request {target}: {e}")))?;

        let (status, bytes) = tokio::time::timeout(self.timeout, self.send(request))
            .await
            .map_err(|_| {
                ServiceError::Transport(format!(
                    "{method} {path} timed out after {:?}",
                    self.timeout
                ))
            })??;
        debug!(%method, %path, %status, "api call");

        if !status.is_success() {
            return Err(decode_error(status, &bytes));
        }
        decode_body(&bytes)
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> ServiceResult<(StatusCode, Bytes)> {
        let stream = TcpStream::connect(self.endpoint.authority())
            .await
            .map_err(|e| {
                ServiceError::Transport(format!("connect {}: {e}", self.endpoint.authority()))
            })?;

        match &self.tls {
            Some(tls) => {
                let host = self
                    .endpoint
                    .host
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .to_string();
                let server_name = ServerName::try_from(host)
                    .map_err(|e| ServiceError::Transport(format!("invalid tls server name: {e}")))?;
                let stream = tls
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| ServiceError::Transport(format!("tls handshake: {e}")))?;
                exchange(stream, request).await
            }
            None => exchange(stream, request).await,
        }
    }
}

async fn exchange<I>(io: I, request: Request<Full<Bytes>>) -> ServiceResult<(StatusCode, Bytes)>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
        .await
        .map_err(|e| ServiceError::Transport(format!("http handshake: {e}")))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "api connection closed with error");
        }
    });

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| ServiceError::Transport(format!("request failed: {e}")))?;
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .map_err(|e| ServiceError::Transport(format!("reading response body: {e}")))?
        .to_bytes();
    Ok((status, bytes))
}

fn tls_connector() -> ServiceResult<TlsConnector> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(
        rustls::crypto::ring::default_provider().into(),
    )
    .with_safe_default_protocol_versions()
    .map_err(|e| ServiceError::Transport(format!("tls protocol version error: {e}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Decode a success body. Calls that answer with nothing decode as `{}`.
fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> ServiceResult<T> {
    let bytes = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"{}".as_slice()
    } else {
        bytes
    };
    serde_json::from_slice(bytes).map_err(|e| ServiceError::Decode(e.to_string()))
}

/// Turn a non-2xx answer into a status error. `code` is the server's
/// status code when it sends one, the HTTP status otherwise.
pub(crate) fn decode_error(status: StatusCode, bytes: &[u8]) -> ServiceError {
    match serde_json::from_slice::<ErrorBody>(bytes) {
        Ok(body) if !body.message.is_empty() => ServiceError::Status {
            code: body.code,
            message: body.message,
        },
        _ => {
            let text = String::from_utf8_lossy(bytes).trim().to_string();
            ServiceError::Status {
                code: i32::from(status.as_u16()),
                message: if text.is_empty() {
                    status.to_string()
                } else {
                    text
                },
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned response per connection and hand back the raw
    /// requests received, in order.
    pub(crate) async fn serve(
        responses: Vec<(u16, &'static str)>,
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
            requests
        });
        (format!("http://{addr}"), handle)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    #[test]
    fn endpoint_defaults_ports_and_trims_path() {
        let ep = Endpoint::parse("https://bytes.example.com/api/").unwrap();
        assert_eq!(ep.scheme, Scheme::Https);
        assert_eq!(ep.port, 443);
        assert_eq!(ep.base_path, "/api");
        assert_eq!(ep.host_header(), "bytes.example.com");

        let ep = Endpoint::parse("http://localhost:8080").unwrap();
        assert_eq!(ep.port, 8080);
        assert_eq!(ep.base_path, "");
        assert_eq!(ep.host_header(), "localhost:8080");
    }

    #[test]
    fn endpoint_rejects_other_schemes() {
        assert!(Endpoint::parse("ftp://example.com").is_err());
        assert!(Endpoint::parse("example.com").is_err());
    }

    #[test]
    fn query_encodes_values() {
        let q = Query::new()
            .push("target", "environments/prod")
            .push("page_token", "a+b=")
            .push("validate_only", "true");
        assert_eq!(
            q.render(),
            "?target=environments/prod&page_token=a%2Bb%3D&validate_only=true"
        );
        // Separators of resource names stay raw; everything else is escaped.
        assert_eq!(
            Query::new()
                .push("parent", "instances/test db/databases/hr?x")
                .render(),
            "?parent=instances/test%20db/databases/hr%3Fx"
        );
        assert_eq!(Query::new().render(), "");
        assert_eq!(Query::new().push("target", "").render(), "?target=");
    }

    #[test]
    fn error_body_is_decoded() {
        let err = decode_error(
            StatusCode::BAD_REQUEST,
            br#"{"code":9,"message":"stage not found","details":[]}"#,
        );
        match err {
            ServiceError::Status { code, message } => {
                assert_eq!(code, 9);
                assert_eq!(message, "stage not found");
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn plain_error_body_falls_back_to_http_status() {
        match decode_error(StatusCode::BAD_GATEWAY, b"upstream down\n") {
            ServiceError::Status { code, message } => {
                assert_eq!(code, 502);
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected {other}"),
        }
        match decode_error(StatusCode::NOT_FOUND, b"") {
            ServiceError::Status { message, .. } => assert!(message.contains("404")),
            other => panic!("unexpected {other}"),
        }
    }

    #[tokio::test]
    async fn login_sets_bearer_token() {
        let (url, server) = serve(vec![
            (200, r#"{"token":"tok-1"}"#),
            (200, r#"{"token":"ignored"}"#),
        ])
        .await;

        let mut client = ApiClient::new(&url).unwrap();
        client.login("ci@service.dbship.com", "s3cret").await.unwrap();
        let _: LoginResponse = client.get("/v1/actuator/info", &Query::new()).await.unwrap();

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /v1/auth/login HTTP/1.1"));
        assert!(requests[0].contains(r#""email":"ci@service.dbship.com""#));
        assert!(requests[0].contains(r#""web":true"#));
        assert!(!requests[0].to_ascii_lowercase().contains("authorization"));
        assert!(requests[1].starts_with("GET /v1/actuator/info HTTP/1.1"));
        assert!(requests[1]
            .to_ascii_lowercase()
            .contains("authorization: bearer tok-1"));
    }

    #[tokio::test]
    async fn rejected_login_is_an_auth_error() {
        let (url, _server) = serve(vec![(401, r#"{"code":16,"message":"bad password"}"#)]).await;
        let mut client = ApiClient::new(&url).unwrap();
        let err = client.login("ci@service.dbship.com", "nope").await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(ref m) if m == "bad password"));
    }

    #[tokio::test]
    async fn empty_token_is_an_auth_error() {
        let (url, _server) = serve(vec![(200, "{}")]).await;
        let mut client = ApiClient::new(&url).unwrap();
        let err = client.login("ci@service.dbship.com", "pw").await.unwrap_err();
        assert!(matches!(err, ServiceError::Auth(_)));
    }

    #[tokio::test]
    async fn connection_refused_is_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ApiClient::new(&format!("http://{addr}")).unwrap();
        let err = client
            .get::<LoginResponse>("/v1/actuator/info", &Query::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Transport(_)));
    }
}
