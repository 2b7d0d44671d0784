//! Client identification sent with every request.

use crate::error::Operation;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, PRAGMA, USER_AGENT};
use serde_json::{json, Value};

/// Header carrying the session token on authenticated calls.
pub const SESSION_HEADER: &str = "X-Metabase-Session";

pub const CLIENT_NAME: &str = "metabridge";
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CLIENT_TYPE: &str = "sql-bridge";
pub const PROTOCOL_VERSION: &str = "1.0";

/// `metabridge/<version> (rust; <os>/<arch>)`
pub fn user_agent() -> String {
    format!(
        "{}/{} (rust; {}/{})",
        CLIENT_NAME,
        CLIENT_VERSION,
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Headers shared by every call; installed as the HTTP client's defaults.
pub fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&user_agent()).unwrap_or_else(|_| HeaderValue::from_static(CLIENT_NAME)),
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    insert(&mut headers, "x-client-type", CLIENT_TYPE);
    insert(&mut headers, "x-client-name", CLIENT_NAME);
    insert(&mut headers, "x-client-version", CLIENT_VERSION);
    insert(&mut headers, "x-protocol-version", PROTOCOL_VERSION);
    insert(&mut headers, "x-request-source", "bridge-connection");
    headers
}

/// Extra headers for one kind of call.
pub fn operation_headers(operation: Operation) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match operation {
        Operation::Authentication => {
            insert(&mut headers, "x-connection-type", "database-api");
        }
        Operation::Metadata => {
            insert(&mut headers, "x-request-source", "bridge-metadata");
        }
        Operation::Query => {
            insert(&mut headers, "x-request-type", "sql-query");
            insert(&mut headers, "x-query-source", "bridge-statement");
        }
    }
    headers
}

/// `client_info` object of the authentication payload.
pub fn client_info() -> Value {
    json!({
        "driver_name": CLIENT_NAME,
        "driver_version": CLIENT_VERSION,
        "os_name": std::env::consts::OS,
        "os_arch": std::env::consts::ARCH,
        "client_type": CLIENT_TYPE,
        "connection_time": chrono::Utc::now().timestamp_millis(),
    })
}

/// `query_metadata` object of the dataset payload.
pub fn query_metadata(query_length: usize) -> Value {
    json!({
        "query_length": query_length,
        "execution_time": chrono::Utc::now().timestamp_millis(),
        "client_type": CLIENT_TYPE,
        "driver_version": CLIENT_VERSION,
    })
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &'static str) {
    headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_headers() {
        let headers = default_headers();
        assert_eq!(headers["accept"], "application/json");
        assert_eq!(headers["x-client-name"], CLIENT_NAME);
        assert_eq!(headers["cache-control"], "no-cache");
        assert!(headers["user-agent"]
            .to_str()
            .unwrap()
            .starts_with("metabridge/"));
    }

    #[test]
    fn test_query_headers() {
        let headers = operation_headers(Operation::Query);
        assert_eq!(headers["x-request-type"], "sql-query");
        assert!(!headers.contains_key("x-connection-type"));
    }

    #[test]
    fn test_query_metadata_payload() {
        let metadata = query_metadata(8);
        assert_eq!(metadata["query_length"], 8);
        assert_eq!(metadata["client_type"], CLIENT_TYPE);
        assert!(metadata["execution_time"].is_i64());
    }
}
