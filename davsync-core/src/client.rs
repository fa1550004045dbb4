use std::time::UNIX_EPOCH;

use reqwest::header::DATE;
use reqwest::{Client, RequestBuilder, StatusCode};
use thiserror::Error;
use url::Url;

const REQUEST_ID_HEADER: &str = "X-Request-ID";
const SKIP_TRASHBIN_HEADER: &str = "X-NC-Skip-Trashbin";

#[derive(Debug, Error)]
pub enum DavError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("url cannot carry a path: {0}")]
    CannotBeABase(String),
}

/// Transport-level outcome of a request, independent of how the caller
/// interprets the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    None,
    ConnectionRefused,
    RemoteHostClosed,
    HostNotFound,
    Timeout,
    OperationCanceled,
    UnknownNetwork,
    AuthenticationRequired,
    ContentAccessDenied,
    ContentNotFound,
    ContentOperationNotPermitted,
    ContentConflict,
    ContentGone,
    UnknownContent,
    InternalServer,
    OperationNotImplemented,
    ServiceUnavailable,
    UnknownServer,
    ProtocolFailure,
}

impl TransportError {
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => TransportError::AuthenticationRequired,
            StatusCode::FORBIDDEN => TransportError::ContentAccessDenied,
            StatusCode::NOT_FOUND => TransportError::ContentNotFound,
            StatusCode::METHOD_NOT_ALLOWED => TransportError::ContentOperationNotPermitted,
            StatusCode::CONFLICT => TransportError::ContentConflict,
            StatusCode::GONE => TransportError::ContentGone,
            StatusCode::INTERNAL_SERVER_ERROR => TransportError::InternalServer,
            StatusCode::NOT_IMPLEMENTED => TransportError::OperationNotImplemented,
            StatusCode::SERVICE_UNAVAILABLE => TransportError::ServiceUnavailable,
            status if status.is_client_error() => TransportError::UnknownContent,
            status if status.is_server_error() => TransportError::UnknownServer,
            _ => TransportError::None,
        }
    }

    /// "No error" and "not found" both mean the remote object is gone.
    pub fn is_success_or_not_found(self) -> bool {
        matches!(self, TransportError::None | TransportError::ContentNotFound)
    }

    /// Errors raised below HTTP: the server was never reached or the
    /// connection broke before a status arrived.
    pub fn is_network_level(self) -> bool {
        matches!(
            self,
            TransportError::ConnectionRefused
                | TransportError::RemoteHostClosed
                | TransportError::HostNotFound
                | TransportError::Timeout
                | TransportError::OperationCanceled
                | TransportError::UnknownNetwork
        )
    }
}

impl DavError {
    pub fn transport_error(&self) -> TransportError {
        match self {
            DavError::Request(err) if err.is_timeout() => TransportError::Timeout,
            DavError::Request(err) if err.is_connect() => TransportError::ConnectionRefused,
            DavError::Request(err) if err.is_body() || err.is_decode() => {
                TransportError::RemoteHostClosed
            }
            DavError::Request(err) if err.is_builder() => TransportError::ProtocolFailure,
            DavError::Request(_) => TransportError::UnknownNetwork,
            DavError::Url(_) | DavError::CannotBeABase(_) => TransportError::ProtocolFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Basic { user: String, password: String },
    Bearer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteRequest {
    /// Path below the DAV root, `/`-separated, unencoded.
    pub path: String,
    /// Value of the `If` header for lock-held resources.
    pub if_condition: Option<String>,
    pub skip_trashbin: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReply {
    /// HTTP status, or 0 when no response was received.
    pub status: u16,
    pub reason: String,
    pub error: TransportError,
    pub error_message: String,
    pub response_timestamp: Option<i64>,
    pub request_id: Option<String>,
    pub body: String,
}

impl DeleteReply {
    pub fn from_error(err: &DavError) -> Self {
        Self {
            status: 0,
            reason: String::new(),
            error: err.transport_error(),
            error_message: err.to_string(),
            response_timestamp: None,
            request_id: None,
            body: String::new(),
        }
    }
}

#[derive(Clone)]
pub struct DavClient {
    http: Client,
    base_url: Url,
    credentials: Credentials,
}

impl DavClient {
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self, DavError> {
        let mut base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(DavError::CannotBeABase(base_url.to_string()));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            credentials,
        })
    }

    pub fn dav_url(&self) -> &Url {
        &self.base_url
    }

    /// `If` header binding `token` to the resource at `file`.
    pub fn lock_condition(&self, file: &str, token: &str) -> String {
        lock_condition(&self.base_url, file, token)
    }

    pub async fn delete(&self, request: &DeleteRequest) -> Result<DeleteReply, DavError> {
        let url = self.endpoint(&request.path)?;
        let sent_request_id = generate_request_id();
        let mut builder = self
            .http
            .delete(url.clone())
            .header(REQUEST_ID_HEADER, &sent_request_id);
        builder = self.authorize(builder);
        if let Some(condition) = &request.if_condition {
            builder = builder.header("If", condition);
        }
        if request.skip_trashbin {
            builder = builder.header(SKIP_TRASHBIN_HEADER, "true");
        }

        let response = builder.send().await?;
        let status = response.status();
        let response_timestamp = response
            .headers()
            .get(DATE)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_http_timestamp);
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .unwrap_or(sent_request_id);
        let body = response.text().await.unwrap_or_default();

        let error = TransportError::from_status(status);
        let reason = status.canonical_reason().unwrap_or_default().to_string();
        let error_message = if error == TransportError::None {
            String::new()
        } else {
            format!(
                "Server replied \"{} {}\" to \"DELETE {}\"",
                status.as_u16(),
                reason,
                url
            )
        };

        Ok(DeleteReply {
            status: status.as_u16(),
            reason,
            error,
            error_message,
            response_timestamp,
            request_id: Some(request_id),
            body,
        })
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::Anonymous => builder,
            Credentials::Basic { user, password } => builder.basic_auth(user, Some(password)),
            Credentials::Bearer(token) => builder.bearer_auth(token),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, DavError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DavError::CannotBeABase(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }
}

pub fn lock_condition(dav_url: &Url, file: &str, token: &str) -> String {
    format!(
        "<{}{}> (<opaquelocktoken:{}>)",
        dav_url,
        file.trim_start_matches('/'),
        token
    )
}

fn generate_request_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

fn parse_http_timestamp(value: &str) -> Option<i64> {
    let parsed = httpdate::parse_http_date(value).ok()?;
    let since_epoch = parsed.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_secs() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_to_transport_error() {
        assert_eq!(
            TransportError::from_status(StatusCode::NO_CONTENT),
            TransportError::None
        );
        assert_eq!(
            TransportError::from_status(StatusCode::NOT_FOUND),
            TransportError::ContentNotFound
        );
        assert_eq!(
            TransportError::from_status(StatusCode::LOCKED),
            TransportError::UnknownContent
        );
        assert_eq!(
            TransportError::from_status(StatusCode::BAD_GATEWAY),
            TransportError::UnknownServer
        );
    }

    #[test]
    fn not_found_counts_as_gone() {
        assert!(TransportError::ContentNotFound.is_success_or_not_found());
        assert!(TransportError::None.is_success_or_not_found());
        assert!(!TransportError::ContentAccessDenied.is_success_or_not_found());
    }

    #[test]
    fn parses_rfc1123_date() {
        assert_eq!(
            parse_http_timestamp("Thu, 01 Jan 1970 00:01:40 GMT"),
            Some(100)
        );
        assert_eq!(parse_http_timestamp("yesterday"), None);
    }

    #[test]
    fn endpoint_encodes_segments_under_dav_root() {
        let client = DavClient::new(
            "https://cloud.example/remote.php/dav/files/alice",
            Credentials::Anonymous,
        )
        .unwrap();
        let url = client.endpoint("Docs/Hello World.txt").unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloud.example/remote.php/dav/files/alice/Docs/Hello%20World.txt"
        );
    }

    #[test]
    fn lock_condition_binds_token_to_resource() {
        let client = DavClient::new(
            "https://cloud.example/remote.php/dav/files/alice/",
            Credentials::Anonymous,
        )
        .unwrap();
        assert_eq!(
            client.lock_condition("Docs/A.txt", "abc"),
            "<https://cloud.example/remote.php/dav/files/alice/Docs/A.txt> (<opaquelocktoken:abc>)"
        );
    }
}
