use async_trait::async_trait;
use graphql_parser::parse_schema;
use graphql_parser::schema::{Definition, Field, TypeDefinition, TypeExtension};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{GatewayError, Result};
use crate::{FederatedSchema, ServiceDefinition};

#[async_trait]
pub trait SchemaRegistry {
    async fn register_service(&mut self, service: ServiceDefinition) -> Result<()>;
    async fn get_schema(&self) -> Result<FederatedSchema>;
}

pub struct InMemorySchemaRegistry {
    // Ordered by name so routing of shared fields is stable across restarts.
    services: Arc<RwLock<BTreeMap<String, ServiceDefinition>>>,
    federated_schema: Arc<RwLock<Option<FederatedSchema>>>,
}

impl Default for InMemorySchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySchemaRegistry {
    pub fn new() -> Self {
        InMemorySchemaRegistry {
            services: Arc::new(RwLock::new(BTreeMap::new())),
            federated_schema: Arc::new(RwLock::new(None)),
        }
    }

    fn build_federated_schema(
        services: &BTreeMap<String, ServiceDefinition>,
    ) -> Result<FederatedSchema> {
        let mut map = TypeMap::default();

        for (service_name, service) in services {
            let document =
                parse_schema::<String>(&service.schema).map_err(|e| GatewayError::SchemaParse {
                    service: service_name.clone(),
                    message: e.to_string(),
                })?;

            for definition in &document.definitions {
                match definition {
                    Definition::TypeDefinition(typedef) => match typedef {
                        TypeDefinition::Object(obj) => {
                            map.record_object(&obj.name, &obj.fields, service_name)
                        }
                        TypeDefinition::Interface(iface) => map.record(&iface.name, service_name),
                        TypeDefinition::InputObject(input) => {
                            map.record(&input.name, service_name)
                        }
                        TypeDefinition::Enum(enum_type) => {
                            map.record(&enum_type.name, service_name)
                        }
                        TypeDefinition::Scalar(scalar) => map.record(&scalar.name, service_name),
                        TypeDefinition::Union(union_type) => {
                            map.record(&union_type.name, service_name)
                        }
                    },
                    // Federation subgraphs commonly declare root fields via `extend type Query`.
                    Definition::TypeExtension(TypeExtension::Object(ext)) => {
                        map.record_object(&ext.name, &ext.fields, service_name)
                    }
                    _ => {}
                }
            }
        }

        tracing::debug!(entries = map.0.len(), "composed federated type map");
        Ok(FederatedSchema {
            type_to_service_map: map.0,
        })
    }
}

#[derive(Default)]
struct TypeMap(HashMap<String, Vec<String>>);

impl TypeMap {
    fn record(&mut self, key: &str, service_name: &str) {
        let services = self.0.entry(key.to_string()).or_default();
        if !services.iter().any(|s| s == service_name) {
            services.push(service_name.to_string());
        }
    }

    fn record_object(&mut self, type_name: &str, fields: &[Field<'_, String>], service: &str) {
        self.record(type_name, service);

        for field in fields {
            let field_key = format!("{}.{}", type_name, field.name);
            self.record(&field_key, service);

            for arg in &field.arguments {
                self.record(&format!("{}.{}", field_key, arg.name), service);
            }
        }
    }
}

#[async_trait]
impl SchemaRegistry for InMemorySchemaRegistry {
    async fn register_service(&mut self, service: ServiceDefinition) -> Result<()> {
        let mut services = self.services.write().await;
        tracing::info!(service = %service.descriptor.name, url = %service.descriptor.url, "registering service");
        services.insert(service.descriptor.name.clone(), service);

        let mut federated_schema = self.federated_schema.write().await;
        *federated_schema = None;

        Ok(())
    }

    async fn get_schema(&self) -> Result<FederatedSchema> {
        let cached_schema = self.federated_schema.read().await;
        if let Some(schema) = &*cached_schema {
            return Ok(schema.clone());
        }
        drop(cached_schema);

        let services = self.services.read().await;
        let schema = Self::build_federated_schema(&services)?;

        let mut federated_schema = self.federated_schema.write().await;
        *federated_schema = Some(schema.clone());

        Ok(schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceDescriptor;
    use pretty_assertions::assert_eq;

    fn definition(name: &str, schema: &str) -> ServiceDefinition {
        ServiceDefinition {
            descriptor: ServiceDescriptor {
                name: name.to_string(),
                url: format!("http://{}:4000", name),
            },
            schema: schema.to_string(),
        }
    }

    #[tokio::test]
    async fn maps_root_fields_to_declaring_service() {
        let mut registry = InMemorySchemaRegistry::new();
        registry
            .register_service(definition(
                "user-service",
                "type User { username: String! }\ntype Query { getUser(username: String!): User }",
            ))
            .await
            .unwrap();
        registry
            .register_service(definition(
                "books-service",
                "type Book { isbn: String! }\nextend type Query { getAllBooks: [Book!]! }",
            ))
            .await
            .unwrap();

        let schema = registry.get_schema().await.unwrap();

        assert_eq!(schema.services_for("Query.getUser"), ["user-service"]);
        assert_eq!(schema.services_for("Query.getUser.username"), ["user-service"]);
        assert_eq!(schema.services_for("Query.getAllBooks"), ["books-service"]);
        assert_eq!(schema.services_for("Book.isbn"), ["books-service"]);
        assert_eq!(
            schema.services_for("Query"),
            ["books-service", "user-service"]
        );
        assert!(schema.services_for("Query.missing").is_empty());
    }

    #[tokio::test]
    async fn registration_invalidates_cached_schema() {
        let mut registry = InMemorySchemaRegistry::new();
        registry
            .register_service(definition("a", "type Query { one: Int }"))
            .await
            .unwrap();
        assert!(registry.get_schema().await.unwrap().services_for("Query.two").is_empty());

        registry
            .register_service(definition("b", "type Query { two: Int }"))
            .await
            .unwrap();
        assert_eq!(
            registry.get_schema().await.unwrap().services_for("Query.two"),
            ["b"]
        );
    }

    #[tokio::test]
    async fn invalid_sdl_names_the_service() {
        let mut registry = InMemorySchemaRegistry::new();
        registry
            .register_service(definition("broken", "type Query {"))
            .await
            .unwrap();

        match registry.get_schema().await {
            Err(GatewayError::SchemaParse { service, .. }) => assert_eq!(service, "broken"),
            other => panic!("expected SchemaParse, got {:?}", other.map(|_| ())),
        }
    }
}
