use http::header::AUTHORIZATION;

use crate::context::RequestContext;

/// Runs against every outbound subgraph request right before it is sent.
pub trait SubgraphRequestHook: Send + Sync {
    fn before_send(&self, request: &mut reqwest::Request, context: &RequestContext);
}

impl<F> SubgraphRequestHook for F
where
    F: Fn(&mut reqwest::Request, &RequestContext) + Send + Sync,
{
    fn before_send(&self, request: &mut reqwest::Request, context: &RequestContext) {
        self(request, context)
    }
}

/// Copies the client's `Authorization` value onto each subgraph request.
///
/// The credential is passed through verbatim; checking it is left to the
/// subgraphs.
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthForwarder;

impl SubgraphRequestHook for AuthForwarder {
    fn before_send(&self, request: &mut reqwest::Request, context: &RequestContext) {
        let Some(value) = context.auth_header_value() else {
            return;
        };

        let mut value = value.clone();
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
    }
}
