use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue};

/// Per-request state captured from the inbound client request.
///
/// A fresh context is built for every inbound request and handed by
/// reference to every subgraph call that request triggers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    auth_header_value: Option<HeaderValue>,
}

impl RequestContext {
    pub fn new(auth_header_value: Option<HeaderValue>) -> Self {
        RequestContext {
            auth_header_value: auth_header_value.filter(|value| !value.is_empty()),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        RequestContext::new(headers.get(AUTHORIZATION).cloned())
    }

    /// The inbound `Authorization` value, byte for byte.
    pub fn auth_header_value(&self) -> Option<&HeaderValue> {
        self.auth_header_value.as_ref()
    }
}
