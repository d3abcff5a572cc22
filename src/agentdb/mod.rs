//! Short-lived access to external agent databases
//!
//! Agent databases are opaque to the platform: a connection string and a
//! capability set. Connections are opened per operation and dropped
//! immediately; agent DBs are never pooled.

pub mod executor;
pub mod value;

pub use executor::{ExecutionResult, QueryExecutor};
pub use value::SqlValue;

use anyhow::{bail, Result};
use url::Url;

/// Supported agent database families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentDbKind {
    Postgres,
    MySql,
    Sqlite,
    MongoDb,
}

impl AgentDbKind {
    /// Classify a connection URL by scheme.
    pub fn from_url(db_url: &str) -> Result<Self> {
        let scheme = match Url::parse(db_url) {
            Ok(url) => url.scheme().to_lowercase(),
            // sqlite paths like `sqlite:relative.db` still parse; anything
            // else without a scheme is rejected.
            Err(e) => bail!("unparseable db_url: {e}"),
        };

        match scheme.as_str() {
            "postgres" | "postgresql" => Ok(AgentDbKind::Postgres),
            "mysql" => Ok(AgentDbKind::MySql),
            "sqlite" => Ok(AgentDbKind::Sqlite),
            "mongodb" | "mongodb+srv" => Ok(AgentDbKind::MongoDb),
            other => bail!("unsupported database type: {other}"),
        }
    }
}

/// Strip the sqlite URL prefix down to a filesystem path.
pub fn sqlite_path(db_url: &str) -> String {
    db_url
        .trim_start_matches("sqlite:///")
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_classification() {
        assert_eq!(
            AgentDbKind::from_url("postgresql://u:p@h:5432/db").unwrap(),
            AgentDbKind::Postgres
        );
        assert_eq!(
            AgentDbKind::from_url("postgres://u@h/db").unwrap(),
            AgentDbKind::Postgres
        );
        assert_eq!(
            AgentDbKind::from_url("mysql://u:p@h:3306/db").unwrap(),
            AgentDbKind::MySql
        );
        assert_eq!(
            AgentDbKind::from_url("sqlite:///tmp/agent.db").unwrap(),
            AgentDbKind::Sqlite
        );
        assert_eq!(
            AgentDbKind::from_url("mongodb://h:27017/db").unwrap(),
            AgentDbKind::MongoDb
        );
        assert_eq!(
            AgentDbKind::from_url("mongodb+srv://cluster.example.net/db").unwrap(),
            AgentDbKind::MongoDb
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(AgentDbKind::from_url("redis://h:6379").is_err());
        assert!(AgentDbKind::from_url("not a url").is_err());
    }

    #[test]
    fn test_sqlite_path() {
        assert_eq!(sqlite_path("sqlite:///var/lib/agent.db"), "var/lib/agent.db");
        assert_eq!(sqlite_path("sqlite://agent.db"), "agent.db");
    }
}
