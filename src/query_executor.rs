use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

use crate::{Fetch, OperationKind, QueryPlan};
use crate::context::RequestContext;
use crate::error::{GatewayError, Result};
use crate::subgraph::SubgraphClient;

#[async_trait]
pub trait QueryExecutor {
    async fn execute_plan(&self, plan: QueryPlan, context: &RequestContext) -> Result<Value>;
}

pub struct HttpQueryExecutor {
    subgraphs: HashMap<String, SubgraphClient>,
}

impl HttpQueryExecutor {
    pub fn new(subgraphs: impl IntoIterator<Item = SubgraphClient>) -> Self {
        HttpQueryExecutor {
            subgraphs: subgraphs
                .into_iter()
                .map(|client| (client.name().to_string(), client))
                .collect(),
        }
    }

    async fn fetch(&self, fetch: Fetch, context: &RequestContext) -> Result<(String, Value)> {
        let Fetch {
            service_name,
            query,
            variables,
        } = fetch;

        let client = self
            .subgraphs
            .get(&service_name)
            .ok_or_else(|| GatewayError::UnknownService(service_name.clone()))?;
        let response = client.execute(&query, &variables, context).await?;
        Ok((service_name, response))
    }
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute_plan(&self, plan: QueryPlan, context: &RequestContext) -> Result<Value> {
        let results = match plan.kind {
            // Subgraph calls go out concurrently; each one runs the request hook itself.
            OperationKind::Query => {
                join_all(plan.fetches.into_iter().map(|fetch| self.fetch(fetch, context))).await
            }
            // Mutation fields run in document order, so each fetch waits for the previous one.
            OperationKind::Mutation => {
                let mut results = Vec::with_capacity(plan.fetches.len());
                for fetch in plan.fetches {
                    results.push(self.fetch(fetch, context).await);
                }
                results
            }
        };

        let mut merged = ResponseMerger::default();
        for result in results {
            match result {
                Ok((service_name, response)) => merged.add_response(&service_name, response),
                Err(e) => {
                    tracing::warn!("subgraph call failed: {}", e);
                    merged.add_error(json!({
                        "message": format!("Execution error: {}", e)
                    }));
                }
            }
        }

        Ok(merged.finish())
    }
}

#[derive(Default)]
struct ResponseMerger {
    data: Option<Map<String, Value>>,
    errors: Vec<Value>,
}

impl ResponseMerger {
    fn add_response(&mut self, service_name: &str, mut response: Value) {
        if let Some(Value::Object(fields)) = response.get_mut("data").map(Value::take) {
            self.data.get_or_insert_with(Map::new).extend(fields);
        }

        if let Some(Value::Array(errors)) = response.get_mut("errors").map(Value::take) {
            for mut error in errors {
                if let Value::Object(error_obj) = &mut error {
                    error_obj.insert(
                        "service".to_string(),
                        Value::String(service_name.to_string()),
                    );
                }
                self.errors.push(error);
            }
        }
    }

    fn add_error(&mut self, error: Value) {
        self.errors.push(error);
    }

    fn finish(self) -> Value {
        let mut response = Map::new();
        if let Some(data) = self.data {
            response.insert("data".to_string(), Value::Object(data));
        }
        if !self.errors.is_empty() {
            response.insert("errors".to_string(), Value::Array(self.errors));
        }
        Value::Object(response)
    }
}
