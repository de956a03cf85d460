//! Backend kinds an environment can be provisioned on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Storage engine behind a provisioned vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded single-file database; fast to create and destroy.
    #[default]
    Embedded,
    /// External SQL server; slower to create, closer to production.
    Sql,
}

impl BackendKind {
    /// Returns all backend kinds.
    pub fn all() -> &'static [BackendKind] {
        &[BackendKind::Embedded, BackendKind::Sql]
    }

    /// Returns the backend name in lowercase (for config files and the API).
    pub fn as_config_str(&self) -> &'static str {
        match self {
            BackendKind::Embedded => "embedded",
            BackendKind::Sql => "sql",
        }
    }

    /// Returns how long a single environment creation may reasonably take.
    pub fn default_provision_timeout(&self) -> Duration {
        match self {
            BackendKind::Embedded => Duration::from_secs(60),
            BackendKind::Sql => Duration::from_secs(300), // restores a full database backup
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Embedded => write!(f, "Embedded"),
            BackendKind::Sql => write!(f, "SQL"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "embedded" => Ok(BackendKind::Embedded),
            "sql" => Ok(BackendKind::Sql),
            other => Err(format!("unknown backend kind: {other}")),
        }
    }
}
