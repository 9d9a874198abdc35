//! Database connection configuration.
//!
//! Connections are parameterised by driver, host, port, credentials and
//! database name. The worker consumes driver-specific connection strings,
//! which [`ConnectionConfig::connection_string`] assembles.

use crate::sql::Dialect;

/// Error type for connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Unsupported driver: {0}. Supported: postgres, mysql, mssql, duckdb, sqlite")]
    UnsupportedDriver(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Postgres,
    MySql,
    /// Microsoft SQL Server
    MsSql,
    /// DuckDB (file or in-memory)
    DuckDb,
    /// SQLite (file or in-memory), served in-process
    Sqlite,
}

impl Driver {
    /// Parse driver from string.
    pub fn parse(s: &str) -> Result<Self, ConnectionError> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Driver::Postgres),
            "mysql" | "mariadb" => Ok(Driver::MySql),
            "mssql" | "sqlserver" | "sql_server" => Ok(Driver::MsSql),
            "duckdb" | "duck" => Ok(Driver::DuckDb),
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            other => Err(ConnectionError::UnsupportedDriver(other.to_string())),
        }
    }

    /// Get the driver name for the worker.
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Postgres => "postgres",
            Driver::MySql => "mysql",
            Driver::MsSql => "mssql",
            Driver::DuckDb => "duckdb",
            Driver::Sqlite => "sqlite",
        }
    }

    /// Get the default port for this driver.
    pub fn default_port(&self) -> u16 {
        match self {
            Driver::Postgres => 5432,
            Driver::MySql => 3306,
            Driver::MsSql => 1433,
            Driver::DuckDb | Driver::Sqlite => 0, // Not applicable
        }
    }

    /// SQL dialect spoken by this driver.
    pub fn dialect(&self) -> Dialect {
        match self {
            Driver::Postgres => Dialect::Postgres,
            Driver::MySql => Dialect::MySql,
            Driver::MsSql => Dialect::TSql,
            Driver::DuckDb => Dialect::DuckDb,
            Driver::Sqlite => Dialect::Sqlite,
        }
    }

    /// Whether this driver is file-based (host is a path).
    pub fn is_embedded(&self) -> bool {
        matches!(self, Driver::DuckDb | Driver::Sqlite)
    }
}

/// Structured database connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub driver: Driver,
    /// Server hostname, or file path for embedded drivers.
    pub host: String,
    /// Port (driver default when absent).
    pub port: Option<u16>,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectionConfig {
    /// Create a config for an embedded (file-based) database.
    pub fn embedded(driver: Driver, path: impl Into<String>) -> Result<Self, ConnectionError> {
        if !driver.is_embedded() {
            return Err(ConnectionError::InvalidConfig(format!(
                "{} is not a file-based driver",
                driver.as_str()
            )));
        }
        Ok(Self {
            driver,
            host: path.into(),
            port: None,
            database: String::new(),
            username: None,
            password: None,
        })
    }

    fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.driver.default_port())
    }

    fn credentials(&self) -> String {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => format!("{u}:{p}@"),
            (Some(u), None) => format!("{u}@"),
            _ => String::new(),
        }
    }

    /// Build the driver-specific connection string.
    pub fn connection_string(&self) -> String {
        match self.driver {
            Driver::Postgres => format!(
                "postgres://{}{}:{}/{}",
                self.credentials(),
                self.host,
                self.port(),
                self.database
            ),
            Driver::MySql => format!(
                "{}tcp({}:{})/{}",
                self.credentials(),
                self.host,
                self.port(),
                self.database
            ),
            Driver::MsSql => format!(
                "sqlserver://{}{}:{}?database={}",
                self.credentials(),
                self.host,
                self.port(),
                self.database
            ),
            Driver::DuckDb | Driver::Sqlite => self.host.clone(),
        }
    }
}
