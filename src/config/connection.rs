//! Database drivers a source can name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("unknown driver '{0}' (expected sqlite, duckdb, postgres, mysql or mssql)")]
pub struct ConnectionError(pub String);

/// Only [`Driver::Sqlite`] runs in-process. The rest go through the
/// database worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Sqlite,
    DuckDb,
    Postgres,
    MySql,
    MsSql,
}

const ALIASES: &[(&str, Driver)] = &[
    ("sqlite", Driver::Sqlite),
    ("sqlite3", Driver::Sqlite),
    ("duckdb", Driver::DuckDb),
    ("postgres", Driver::Postgres),
    ("postgresql", Driver::Postgres),
    ("pg", Driver::Postgres),
    ("mysql", Driver::MySql),
    ("mariadb", Driver::MySql),
    ("mssql", Driver::MsSql),
    ("sqlserver", Driver::MsSql),
];

impl FromStr for Driver {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == wanted)
            .map(|(_, driver)| *driver)
            .ok_or(ConnectionError(wanted))
    }
}

impl Driver {
    /// Name sent to the worker.
    pub fn as_str(self) -> &'static str {
        match self {
            Driver::Sqlite => "sqlite",
            Driver::DuckDb => "duckdb",
            Driver::Postgres => "postgres",
            Driver::MySql => "mysql",
            Driver::MsSql => "mssql",
        }
    }

    pub fn is_in_process(self) -> bool {
        self == Driver::Sqlite
    }

    /// Schema introspected when a source leaves it unset. Empty means the
    /// connection's current database.
    pub fn default_schema(self) -> &'static str {
        match self {
            Driver::Sqlite | Driver::DuckDb => "main",
            Driver::Postgres => "public",
            Driver::MsSql => "dbo",
            Driver::MySql => "",
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
