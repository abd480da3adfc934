//! Gateway configuration: command line / environment arguments and the
//! list of upstream services.

use clap::Parser;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::address::{DeploymentMode, service_url};
use crate::error::{GatewayError, Result};
use crate::{ServiceDefinition, ServiceDescriptor};

pub const DEFAULT_PORT: u16 = 4000;

/// Subgraphs served when no supergraph file is given: name, port, SDL.
const BUILTIN_SUBGRAPHS: [(&str, u16, &str); 2] = [
    (
        "user-service",
        8001,
        include_str!("../schemas/user-service.graphql"),
    ),
    (
        "books-service",
        8002,
        include_str!("../schemas/books-service.graphql"),
    ),
];

#[derive(Debug, Parser)]
#[command(name = "library-gateway", version, about)]
pub struct GatewayArgs {
    /// Deployment mode used to resolve upstream hosts (`docker` or `local`).
    #[arg(long, env = "NODE_ENV")]
    pub node_env: Option<String>,

    /// Address the gateway listens on.
    #[arg(long, env = "GATEWAY_LISTEN", default_value_t = default_listen())]
    pub listen: SocketAddr,

    /// Supergraph YAML file replacing the built-in subgraph list.
    #[arg(long, env = "GATEWAY_SUPERGRAPH")]
    pub supergraph: Option<PathBuf>,
}

fn default_listen() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT))
}

impl GatewayArgs {
    pub fn deployment_mode(&self) -> Result<DeploymentMode> {
        DeploymentMode::from_env_value(self.node_env.as_deref())
    }

    /// Resolves every upstream service; fails before anything listens.
    pub fn service_definitions(&self) -> Result<Vec<ServiceDefinition>> {
        let mode = self.deployment_mode()?;
        match &self.supergraph {
            Some(path) => load_supergraph(path, mode),
            None => builtin_services(mode),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SupergraphConfig {
    subgraphs: BTreeMap<String, SubgraphConfig>,
}

#[derive(Debug, Deserialize)]
struct SubgraphConfig {
    port: u16,
    schema: SchemaConfig,
}

#[derive(Debug, Deserialize)]
struct SchemaConfig {
    file: String,
}

pub fn builtin_services(mode: DeploymentMode) -> Result<Vec<ServiceDefinition>> {
    let services = BUILTIN_SUBGRAPHS
        .iter()
        .map(|(name, port, schema)| ServiceDefinition {
            descriptor: ServiceDescriptor {
                name: name.to_string(),
                url: service_url(name, *port, mode),
            },
            schema: schema.to_string(),
        })
        .collect();

    validate_services(services)
}

/// Loads subgraphs from a supergraph YAML file. Schema paths are relative to
/// the file itself.
pub fn load_supergraph(path: &Path, mode: DeploymentMode) -> Result<Vec<ServiceDefinition>> {
    let config_dir = path.parent().unwrap_or_else(|| Path::new(""));
    tracing::info!(path = %path.display(), "loading supergraph config");

    let contents = fs::read_to_string(path).map_err(|source| GatewayError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    let config: SupergraphConfig = serde_yaml::from_str(&contents)?;

    let mut services = Vec::with_capacity(config.subgraphs.len());
    for (name, subgraph) in config.subgraphs {
        let schema_path = config_dir.join(&subgraph.schema.file);
        let schema = fs::read_to_string(&schema_path).map_err(|source| GatewayError::ConfigRead {
            path: schema_path,
            source,
        })?;

        services.push(ServiceDefinition {
            descriptor: ServiceDescriptor {
                url: service_url(&name, subgraph.port, mode),
                name,
            },
            schema,
        });
    }

    validate_services(services)
}

fn validate_services(services: Vec<ServiceDefinition>) -> Result<Vec<ServiceDefinition>> {
    let mut seen = HashSet::new();

    for service in &services {
        let ServiceDescriptor { name, url } = &service.descriptor;

        if name.is_empty() {
            return Err(GatewayError::InvalidService {
                name: name.clone(),
                reason: "service name must not be empty".to_string(),
            });
        }
        if !seen.insert(name.as_str()) {
            return Err(GatewayError::InvalidService {
                name: name.clone(),
                reason: "service name is declared more than once".to_string(),
            });
        }

        let invalid_url = |reason: String| GatewayError::InvalidServiceUrl {
            name: name.clone(),
            url: url.clone(),
            reason,
        };
        let parsed = reqwest::Url::parse(url).map_err(|e| invalid_url(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(invalid_url("expected an http(s) url with a host".to_string()));
        }
    }

    Ok(services)
}
