//! Transport-neutral view of an inbound request.
//!
//! The auth gate only needs the request URI, the method and header lookup.
//! HTTP requests and RPC metadata both provide those through [`RequestMeta`].

use std::collections::HashMap;

use axum::http::{HeaderMap, Method, Uri};

pub trait RequestMeta {
    /// Path component only, e.g. `/api/v1/doctypes/Invoice` or
    /// `/permission.PermissionService/CheckDocumentPermission`.
    fn request_uri(&self) -> &str;

    fn method(&self) -> &str;

    fn header(&self, name: &str) -> Option<&str>;
}

/// Borrowed view over the parts of an HTTP request.
pub struct HttpRequestMeta<'a> {
    method: &'a Method,
    uri: &'a Uri,
    headers: &'a HeaderMap,
}

impl<'a> HttpRequestMeta<'a> {
    pub fn new(method: &'a Method, uri: &'a Uri, headers: &'a HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
        }
    }
}

impl RequestMeta for HttpRequestMeta<'_> {
    fn request_uri(&self) -> &str {
        self.uri.path()
    }

    fn method(&self) -> &str {
        self.method.as_str()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Metadata of an RPC call: the full method path plus string metadata.
#[derive(Debug, Clone, Default)]
pub struct RpcMetadata {
    pub full_method: String,
    pub metadata: HashMap<String, String>,
}

impl RpcMetadata {
    pub fn new(full_method: impl Into<String>) -> Self {
        Self {
            full_method: full_method.into(),
            metadata: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl RequestMeta for RpcMetadata {
    fn request_uri(&self) -> &str {
        &self.full_method
    }

    fn method(&self) -> &str {
        "POST"
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.metadata.get(name).map(String::as_str)
    }
}

/// The bearer token from `Authorization` or `authorization`.
pub fn bearer_token(meta: &impl RequestMeta) -> Option<&str> {
    let header = meta
        .header("authorization")
        .or_else(|| meta.header("Authorization"))?;

    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))?
        .trim();

    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_metadata_accepts_either_casing() {
        let lower = RpcMetadata::new("/x.Y/Z").with("authorization", "Bearer abc");
        let upper = RpcMetadata::new("/x.Y/Z").with("Authorization", "Bearer abc");
        assert_eq!(bearer_token(&lower), Some("abc"));
        assert_eq!(bearer_token(&upper), Some("abc"));
    }

    #[test]
    fn missing_or_empty_token_is_none() {
        assert_eq!(bearer_token(&RpcMetadata::new("/x.Y/Z")), None);
        let empty = RpcMetadata::new("/x.Y/Z").with("authorization", "Bearer   ");
        assert_eq!(bearer_token(&empty), None);
        let basic = RpcMetadata::new("/x.Y/Z").with("authorization", "Basic dXNlcg==");
        assert_eq!(bearer_token(&basic), None);
    }

    #[test]
    fn http_headers_are_read_case_insensitively() {
        let method = Method::GET;
        let uri: Uri = "/api/v1/doctypes?x=1".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer t0k".parse().unwrap());

        let meta = HttpRequestMeta::new(&method, &uri, &headers);
        assert_eq!(meta.request_uri(), "/api/v1/doctypes");
        assert_eq!(bearer_token(&meta), Some("t0k"));
    }
}
