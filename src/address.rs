//! Resolution of upstream service base URLs from the deployment mode.

use std::fmt;
use std::str::FromStr;

use crate::error::{GatewayError, Result};

const LOOPBACK_HOST: &str = "localhost";

/// How upstream hostnames are resolved.
///
/// Inside a container network each service is reachable under its own name;
/// when everything runs on one machine the services sit on loopback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentMode {
    Docker,
    Local,
}

impl DeploymentMode {
    /// Interprets the raw value of the deployment-mode environment variable.
    ///
    /// Both an unset and an unrecognized value are rejected so that no
    /// upstream URL is ever built with an unresolved host.
    pub fn from_env_value(value: Option<&str>) -> Result<Self> {
        match value {
            None => Err(GatewayError::DeploymentModeUnset),
            Some(value) => value.parse(),
        }
    }

    fn host<'a>(&self, service_name: &'a str) -> &'a str {
        match self {
            DeploymentMode::Docker => service_name,
            DeploymentMode::Local => LOOPBACK_HOST,
        }
    }
}

impl FromStr for DeploymentMode {
    type Err = GatewayError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "docker" => Ok(DeploymentMode::Docker),
            "local" => Ok(DeploymentMode::Local),
            other => Err(GatewayError::UnknownDeploymentMode(other.to_string())),
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentMode::Docker => f.write_str("docker"),
            DeploymentMode::Local => f.write_str("local"),
        }
    }
}

/// Base URL of an upstream service, `http://<host>:<port>`.
pub fn service_url(service_name: &str, port: u16, mode: DeploymentMode) -> String {
    format!("http://{}:{}", mode.host(service_name), port)
}
