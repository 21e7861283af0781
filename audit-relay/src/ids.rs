//! Request identifiers
//!
//! Every HTTP request gets a TypeID with the `req` prefix and a UUIDv7
//! suffix, e.g. `req_01h455vb4pex5vsknk084sn02q`. They are time-sortable,
//! which makes log correlation across the intake and the persister easier.

use http::{HeaderMap, Request};
use mti::prelude::*;
use std::fmt;
use std::str::FromStr;
use tower_http::request_id::{MakeRequestId, RequestId as TowerRequestId};

/// Header carrying the request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A `req_`-prefixed TypeID
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(MagicTypeId);

impl RequestId {
    pub const PREFIX: &'static str = "req";

    #[must_use]
    pub fn new() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Read the id a client or an upstream layer put on the request
    pub fn from_headers(headers: &HeaderMap) -> Option<String> {
        headers
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RequestId {
    type Err = RequestIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mti = MagicTypeId::from_str(s).map_err(RequestIdError::Parse)?;

        if mti.prefix().as_str() != Self::PREFIX {
            return Err(RequestIdError::InvalidPrefix(mti.prefix().as_str().to_string()));
        }

        Ok(Self(mti))
    }
}

/// Request id parse failure
#[derive(Debug, thiserror::Error)]
pub enum RequestIdError {
    #[error("failed to parse request ID: {0}")]
    Parse(#[from] MagicTypeIdError),

    #[error("invalid request ID prefix '{0}', expected 'req'")]
    InvalidPrefix(String),
}

/// Generates [`RequestId`]s for `tower_http::request_id::SetRequestIdLayer`
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeTypedRequestId;

impl MakeRequestId for MakeTypedRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<TowerRequestId> {
        let id = RequestId::new();
        let header_value = http::HeaderValue::from_str(id.as_str()).ok()?;
        Some(TowerRequestId::new(header_value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_have_prefix() {
        let id = RequestId::new();
        assert!(id.as_str().starts_with("req_"));
        assert_eq!(id.as_str().len(), 30);
        assert_ne!(id, RequestId::new());
    }

    #[test]
    fn test_parse() {
        let id: RequestId = "req_01h455vb4pex5vsknk084sn02q".parse().unwrap();
        assert_eq!(id.to_string(), "req_01h455vb4pex5vsknk084sn02q");

        assert!(matches!(
            "evt_01h455vb4pex5vsknk084sn02q".parse::<RequestId>(),
            Err(RequestIdError::InvalidPrefix(p)) if p == "evt"
        ));
        assert!("req_invalid".parse::<RequestId>().is_err());
    }

    #[test]
    fn test_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(RequestId::from_headers(&headers).is_none());

        headers.insert(REQUEST_ID_HEADER, "req_01h455vb4pex5vsknk084sn02q".parse().unwrap());
        assert_eq!(
            RequestId::from_headers(&headers).as_deref(),
            Some("req_01h455vb4pex5vsknk084sn02q")
        );
    }

    #[test]
    fn test_make_request_id() {
        let request = Request::builder().body(()).unwrap();
        let made = MakeTypedRequestId.make_request_id(&request).unwrap();
        let value = made.header_value().to_str().unwrap();
        assert!(value.parse::<RequestId>().is_ok());
    }
}
