use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::context::RequestContext;
use crate::error::Result;
use crate::forwarder::SubgraphRequestHook;
use crate::query_executor::{HttpQueryExecutor, QueryExecutor};
use crate::query_planner::{QueryPlanner, SimpleQueryPlanner};
use crate::schema_registry::{InMemorySchemaRegistry, SchemaRegistry};
use crate::subgraph::SubgraphClient;
use crate::{FederatedSchema, GraphQLRequest, ServiceDefinition};

pub struct FederationGateway {
    schema_registry: Arc<RwLock<Box<dyn SchemaRegistry + Send + Sync>>>,
    query_planner: Arc<Box<dyn QueryPlanner + Send + Sync>>,
    query_executor: Arc<Box<dyn QueryExecutor + Send + Sync>>,
}

impl FederationGateway {
    pub fn new(
        schema_registry: Box<dyn SchemaRegistry + Send + Sync>,
        query_planner: Box<dyn QueryPlanner + Send + Sync>,
        query_executor: Box<dyn QueryExecutor + Send + Sync>,
    ) -> Self {
        FederationGateway {
            schema_registry: Arc::new(RwLock::new(schema_registry)),
            query_planner: Arc::new(query_planner),
            query_executor: Arc::new(query_executor),
        }
    }

    /// Wires the default registry, planner and executor for `services`.
    ///
    /// Every upstream gets its own client carrying `hook`. The composed schema
    /// is built eagerly so that a broken subgraph schema fails here rather than
    /// on the first request.
    pub async fn from_services(
        services: Vec<ServiceDefinition>,
        hook: Arc<dyn SubgraphRequestHook>,
    ) -> Result<Self> {
        let http_client = reqwest::Client::new();
        let subgraphs: Vec<SubgraphClient> = services
            .iter()
            .map(|service| {
                SubgraphClient::new(
                    service.descriptor.clone(),
                    http_client.clone(),
                    Arc::clone(&hook),
                )
            })
            .collect();

        let gateway = FederationGateway::new(
            Box::new(InMemorySchemaRegistry::new()),
            Box::new(SimpleQueryPlanner::new()),
            Box::new(HttpQueryExecutor::new(subgraphs)),
        );

        for service in services {
            gateway.register_service(service).await?;
        }
        gateway.schema().await?;

        Ok(gateway)
    }

    pub async fn process_request(
        &self,
        request: GraphQLRequest,
        context: &RequestContext,
    ) -> Result<Value> {
        tracing::debug!(
            operation_name = ?request.operation_name,
            authenticated = context.auth_header_value().is_some(),
            "processing request"
        );

        let schema = self.schema().await?;

        let query_plan = self.query_planner.plan_query(&request, &schema).await?;

        let response = self
            .query_executor
            .execute_plan(query_plan, context)
            .await?;

        Ok(response)
    }

    async fn register_service(&self, service: ServiceDefinition) -> Result<()> {
        let mut schema_registry = self.schema_registry.write().await;
        schema_registry.register_service(service).await
    }

    pub async fn schema(&self) -> Result<FederatedSchema> {
        let schema_registry = self.schema_registry.read().await;
        schema_registry.get_schema().await
    }
}
