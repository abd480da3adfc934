use std::sync::Arc;

use serde_json::{Value, json};

use crate::ServiceDescriptor;
use crate::context::RequestContext;
use crate::error::{GatewayError, Result};
use crate::forwarder::SubgraphRequestHook;

/// HTTP client bound to one upstream service.
#[derive(Clone)]
pub struct SubgraphClient {
    descriptor: ServiceDescriptor,
    client: reqwest::Client,
    hook: Arc<dyn SubgraphRequestHook>,
}

impl SubgraphClient {
    pub fn new(
        descriptor: ServiceDescriptor,
        client: reqwest::Client,
        hook: Arc<dyn SubgraphRequestHook>,
    ) -> Self {
        SubgraphClient {
            descriptor,
            client,
            hook,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn url(&self) -> &str {
        &self.descriptor.url
    }

    pub async fn execute(
        &self,
        query: &str,
        variables: &Value,
        context: &RequestContext,
    ) -> Result<Value> {
        let service = self.name();
        let body = json!({
            "query": query,
            "variables": variables,
        });

        let mut request = self
            .client
            .post(self.url())
            .json(&body)
            .build()
            .map_err(|source| GatewayError::SubgraphRequest {
                service: service.to_string(),
                source,
            })?;

        self.hook.before_send(&mut request, context);

        tracing::debug!(service, url = %request.url(), "sending subgraph request");

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|source| GatewayError::SubgraphRequest {
                service: service.to_string(),
                source,
            })?;

        response
            .json::<Value>()
            .await
            .map_err(|source| GatewayError::SubgraphResponse {
                service: service.to_string(),
                source,
            })
    }
}
