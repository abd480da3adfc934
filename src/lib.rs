pub mod address;
pub mod config;
pub mod context;
pub mod error;
pub mod federation_gateway;
pub mod forwarder;
pub mod query_executor;
pub mod query_planner;
pub mod schema_registry;
pub mod server;
pub mod subgraph;

pub use address::{DeploymentMode, service_url};
pub use context::RequestContext;
pub use error::{GatewayError, Result};
pub use federation_gateway::FederationGateway;
pub use forwarder::{AuthForwarder, SubgraphRequestHook};
pub use query_executor::HttpQueryExecutor;
pub use query_planner::SimpleQueryPlanner;
pub use schema_registry::InMemorySchemaRegistry;
pub use subgraph::SubgraphClient;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Name and base URL of an upstream service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub url: String,
}

/// An upstream service together with the SDL it serves.
#[derive(Clone, Debug)]
pub struct ServiceDefinition {
    pub descriptor: ServiceDescriptor,
    pub schema: String,
}

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub operation_name: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct FederatedSchema {
    pub type_to_service_map: HashMap<String, Vec<String>>,
}

impl FederatedSchema {
    /// Services declaring `key` (`Type`, `Type.field` or `Type.field.arg`).
    pub fn services_for(&self, key: &str) -> &[String] {
        self.type_to_service_map
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
}

impl OperationKind {
    pub fn root_type(self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
        }
    }
}

/// One operation sent to one subgraph.
#[derive(Clone, Debug, PartialEq)]
pub struct Fetch {
    pub service_name: String,
    pub query: String,
    pub variables: Value,
}

/// Fetches of a query run concurrently; fetches of a mutation run one after
/// another in the order given.
#[derive(Debug, Default)]
pub struct QueryPlan {
    pub kind: OperationKind,
    pub fetches: Vec<Fetch>,
}

impl QueryPlan {
    pub fn fetches_for<'p>(&'p self, service_name: &'p str) -> impl Iterator<Item = &'p Fetch> {
        self.fetches
            .iter()
            .filter(move |fetch| fetch.service_name == service_name)
    }
}
