use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("NODE_ENV is not set; expected one of `docker` or `local`")]
    DeploymentModeUnset,

    #[error("unrecognized deployment mode `{0}`; expected one of `docker` or `local`")]
    UnknownDeploymentMode(String),

    #[error("invalid service `{name}`: {reason}")]
    InvalidService { name: String, reason: String },

    #[error("invalid url `{url}` for service `{name}`: {reason}")]
    InvalidServiceUrl {
        name: String,
        url: String,
        reason: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse supergraph config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse schema for service {service}: {message}")]
    SchemaParse { service: String, message: String },

    #[error("failed to parse query: {0}")]
    QueryParse(String),

    #[error("unknown operation named `{0}`")]
    UnknownOperation(String),

    #[error("must provide operation name if query contains multiple operations")]
    AmbiguousOperation,

    #[error("subscriptions are not supported by this gateway")]
    SubscriptionsDisabled,

    #[error("no service found for field: {0}")]
    NoServiceForField(String),

    #[error("could not route query to any service")]
    EmptyPlan,

    #[error("no client configured for service `{0}`")]
    UnknownService(String),

    #[error("failed to send request to {service}: {source}")]
    SubgraphRequest {
        service: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to parse response from {service}: {source}")]
    SubgraphResponse {
        service: String,
        #[source]
        source: reqwest::Error,
    },
}
