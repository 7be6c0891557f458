//! Stream identity: tenant, signal kind and logical name.
//!
//! A stream owns one WAL and one page lineage. Streams never share
//! ordering with each other.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Tenant that owns a stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a tenant id, rejecting empty names and path separators.
    pub fn new(value: impl Into<String>) -> Result<Self, CoreError> {
        let value = value.into();
        validate_component("tenant", &value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of telemetry carried by a stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Logs,
    Metrics,
    Traces,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Logs => "logs",
            SignalKind::Metrics => "metrics",
            SignalKind::Traces => "traces",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logs" => Ok(SignalKind::Logs),
            "metrics" => Ok(SignalKind::Metrics),
            "traces" => Ok(SignalKind::Traces),
            other => Err(CoreError::ValidationError(format!(
                "unknown signal kind `{other}`"
            ))),
        }
    }
}

/// Identifies one independent WAL + page lineage.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId {
    pub tenant: TenantId,
    pub kind: SignalKind,
    pub name: String,
}

impl StreamId {
    pub fn new(
        tenant: impl Into<String>,
        kind: SignalKind,
        name: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let name = name.into();
        validate_component("stream name", &name)?;
        Ok(Self {
            tenant: TenantId::new(tenant)?,
            kind,
            name,
        })
    }

    /// Single directory name for this stream, stable across restarts.
    ///
    /// Components are validated to exclude `/` and `.`-only names, so joining
    /// them with `~` cannot collide with another stream.
    pub fn path_segment(&self) -> String {
        format!("{}~{}~{}", self.tenant, self.kind, self.name)
    }

    /// Parses a directory name produced by [`StreamId::path_segment`].
    pub fn from_path_segment(segment: &str) -> Result<Self, CoreError> {
        let mut parts = segment.splitn(3, '~');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(tenant), Some(kind), Some(name)) => Self::new(tenant, kind.parse()?, name),
            _ => Err(CoreError::ValidationError(format!(
                "`{segment}` is not a stream directory name"
            ))),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant, self.kind, self.name)
    }
}

fn validate_component(what: &str, value: &str) -> Result<(), CoreError> {
    if value.is_empty() || value.len() > 128 {
        return Err(CoreError::ValidationError(format!(
            "{what} must be 1-128 characters"
        )));
    }
    if value == "." || value == ".." {
        return Err(CoreError::ValidationError(format!("{what} cannot be `{value}`")));
    }
    if value.chars().any(|c| c == '/' || c == '\\' || c == '~' || c.is_control()) {
        return Err(CoreError::ValidationError(format!(
            "{what} `{value}` contains a reserved character"
        )));
    }
    Ok(())
}
