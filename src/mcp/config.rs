//! Configuration resolution for the database MCP server.
//!
//! Every setting resolves with a four-tier priority:
//!
//! 1. **CLI flag** - Explicitly provided command line option (highest priority)
//! 2. **`.env` file** - Value from the file passed with `--env`
//! 3. **Environment Variable** - Value from the process environment
//! 4. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `DB_CONNECTION` | mysql | Engine: mysql, pgsql, mariadb, sqlite |
//! | `DB_HOST` | localhost | Database host |
//! | `FORWARD_DB_PORT` | - | Laravel Sail forwarded port (wins over `DB_PORT`) |
//! | `DB_PORT` | engine default | Database port |
//! | `DB_DATABASE` | - | Database name or SQLite file (required) |
//! | `DB_USERNAME` | - | Database user |
//! | `DB_PASSWORD` | - | Database password |
//! | `SSH_CONNECT_TIMEOUT` | 30s | SSH connection timeout in seconds |
//! | `SSH_MAX_RETRIES` | 3 | Maximum SSH connection retry attempts |
//! | `SSH_RETRY_DELAY_MS` | 1000ms | Initial retry delay in milliseconds |
//! | `SSH_COMPRESSION` | true | Enable zlib compression on the tunnel |

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use super::error::ConfigError;

/// Default SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default maximum retry attempts for SSH connection
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry delay in milliseconds
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Maximum retry delay cap in seconds (10 seconds)
pub(crate) const MAX_RETRY_DELAY_SECS: u64 = 10;

/// Maximum retry delay cap as Duration
pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(MAX_RETRY_DELAY_SECS);

/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default HTTP transport port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default HTTP transport host
pub const DEFAULT_HTTP_HOST: &str = "localhost";

pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const MAX_RETRIES_ENV_VAR: &str = "SSH_MAX_RETRIES";
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "SSH_RETRY_DELAY_MS";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";

pub(crate) const DB_CONNECTION_ENV_VAR: &str = "DB_CONNECTION";
pub(crate) const DB_HOST_ENV_VAR: &str = "DB_HOST";
pub(crate) const DB_PORT_ENV_VAR: &str = "DB_PORT";
pub(crate) const FORWARD_DB_PORT_ENV_VAR: &str = "FORWARD_DB_PORT";
pub(crate) const DB_DATABASE_ENV_VAR: &str = "DB_DATABASE";
pub(crate) const DB_USERNAME_ENV_VAR: &str = "DB_USERNAME";
pub(crate) const DB_PASSWORD_ENV_VAR: &str = "DB_PASSWORD";

/// Supported database engines, named the way Laravel's `DB_CONNECTION` names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatabaseKind {
    #[value(name = "mysql")]
    MySql,
    #[value(name = "pgsql")]
    Postgres,
    #[value(name = "mariadb")]
    MariaDb,
    #[value(name = "sqlite")]
    Sqlite,
}

impl DatabaseKind {
    /// Port used when neither the CLI nor the environment provides one.
    pub fn default_port(self) -> Option<u16> {
        match self {
            DatabaseKind::MySql | DatabaseKind::MariaDb => Some(3306),
            DatabaseKind::Postgres => Some(5432),
            DatabaseKind::Sqlite => None,
        }
    }
}

impl FromStr for DatabaseKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(DatabaseKind::MySql),
            "pgsql" => Ok(DatabaseKind::Postgres),
            "mariadb" => Ok(DatabaseKind::MariaDb),
            "sqlite" => Ok(DatabaseKind::Sqlite),
            other => Err(ConfigError::UnsupportedDatabase(other.to_string())),
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseKind::MySql => write!(f, "mysql"),
            DatabaseKind::Postgres => write!(f, "pgsql"),
            DatabaseKind::MariaDb => write!(f, "mariadb"),
            DatabaseKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// TLS mode for the database connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslMode {
    Disable,
    Prefer,
    Require,
    VerifyCa,
    VerifyFull,
}

impl FromStr for SslMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disable" | "false" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            other => Err(ConfigError::UnsupportedSslMode(other.to_string())),
        }
    }
}

/// Client transport served by the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TransportMode {
    Stdio,
    Http,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::Stdio => write!(f, "stdio"),
            TransportMode::Http => write!(f, "http"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

/// Command line interface.
#[derive(Debug, Clone, Parser)]
#[command(name = "laravel-db-mcp", version, about = "MCP server for Laravel databases")]
pub struct Cli {
    /// .env file path
    #[arg(long)]
    pub env: Option<PathBuf>,

    /// Database connection type
    #[arg(long = "db-connection", value_enum)]
    pub db_connection: Option<DatabaseKind>,

    /// Database host
    #[arg(long = "db-host")]
    pub db_host: Option<String>,

    /// Database port
    #[arg(long = "db-port")]
    pub db_port: Option<u16>,

    /// Database name (or SQLite file path)
    #[arg(long = "db-database")]
    pub db_database: Option<String>,

    /// Database username
    #[arg(long = "db-username")]
    pub db_username: Option<String>,

    /// Database password
    #[arg(long = "db-password")]
    pub db_password: Option<String>,

    /// Transport mode
    #[arg(long, value_enum, default_value_t = TransportMode::Stdio)]
    pub transport: TransportMode,

    /// HTTP server port
    #[arg(long, default_value_t = DEFAULT_HTTP_PORT)]
    pub port: u16,

    /// HTTP server host
    #[arg(long, default_value = DEFAULT_HTTP_HOST)]
    pub host: String,

    /// Read-only mode
    #[arg(long)]
    pub readonly: bool,

    /// Maximum number of rows to return
    #[arg(long = "max-rows")]
    pub max_rows: Option<i64>,

    /// SSL mode (disable/prefer/require/verify-ca/verify-full)
    #[arg(long = "ssl-mode")]
    pub ssl_mode: Option<String>,

    /// SSH tunnel host
    #[arg(long = "ssh-host")]
    pub ssh_host: Option<String>,

    /// SSH tunnel port
    #[arg(long = "ssh-port", default_value_t = DEFAULT_SSH_PORT)]
    pub ssh_port: u16,

    /// SSH username
    #[arg(long = "ssh-user")]
    pub ssh_user: Option<String>,

    /// SSH password
    #[arg(long = "ssh-password")]
    pub ssh_password: Option<String>,

    /// SSH private key path
    #[arg(long = "ssh-key")]
    pub ssh_key: Option<PathBuf>,

    /// SSH key passphrase
    #[arg(long = "ssh-passphrase")]
    pub ssh_passphrase: Option<String>,

    /// Instance identifier
    #[arg(long)]
    pub id: Option<String>,

    /// Log level
    #[arg(long = "log-level", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
}

/// Layered view of `.env` file values over process environment values.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    file: HashMap<String, String>,
    process: HashMap<String, String>,
}

impl EnvSource {
    /// Capture the process environment and, if given, the `.env` file.
    pub fn load(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match env_file {
            Some(path) => read_env_file(path)?,
            None => HashMap::new(),
        };

        Ok(Self {
            file,
            process: std::env::vars().collect(),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_maps(file: &[(&str, &str)], process: &[(&str, &str)]) -> Self {
        let to_map = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
        };
        Self {
            file: to_map(file),
            process: to_map(process),
        }
    }

    /// Look up a key, preferring the `.env` file. Empty values count as unset.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.file
            .get(key)
            .or_else(|| self.process.get(key))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

// `from_path_iter` is the only dotenv API that reads a file without touching
// the process environment.
#[allow(deprecated)]
fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let to_error = |reason: String| ConfigError::EnvFile {
        path: path.display().to_string(),
        reason,
    };

    let iter = dotenv::from_path_iter(path).map_err(|e| to_error(e.to_string()))?;

    let mut values = HashMap::new();
    for item in iter {
        let (key, value) = item.map_err(|e| to_error(e.to_string()))?;
        values.insert(key, value);
    }
    Ok(values)
}

/// Database connection settings.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub kind: DatabaseKind,
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: Option<SslMode>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// How the tunnel authenticates against the SSH server.
#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    Key {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Password(_) => f.write_str("Password(***)"),
            SshAuth::Key { path, passphrase } => f
                .debug_struct("Key")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "***"))
                .finish(),
        }
    }
}

/// SSH tunnel credentials.
#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

impl SshConfig {
    /// `host:port` of the SSH server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Tuning of the SSH client used by the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SshClientSettings {
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub compress: bool,
}

impl Default for SshClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            compress: true,
        }
    }
}

impl SshClientSettings {
    pub fn from_env(env: &EnvSource) -> Self {
        Self {
            connect_timeout: Duration::from_secs(resolve_connect_timeout(
                env.get(CONNECT_TIMEOUT_ENV_VAR),
            )),
            max_retries: resolve_max_retries(env.get(MAX_RETRIES_ENV_VAR)),
            retry_delay: Duration::from_millis(resolve_retry_delay_ms(
                env.get(RETRY_DELAY_MS_ENV_VAR),
            )),
            compress: resolve_compression(env.get(COMPRESSION_ENV_VAR)),
        }
    }
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database: DatabaseConfig,
    pub ssh: Option<SshConfig>,
    pub ssh_client: SshClientSettings,
    pub transport: TransportMode,
    pub http_host: String,
    pub http_port: u16,
    pub readonly: bool,
    pub max_rows: Option<i64>,
    pub id: Option<String>,
    pub log_level: LogLevel,
}

impl ServerConfig {
    /// Merge CLI flags with environment values.
    pub fn resolve(cli: &Cli, env: &EnvSource) -> Result<Self, ConfigError> {
        let kind = match cli.db_connection {
            Some(kind) => kind,
            None => env
                .get(DB_CONNECTION_ENV_VAR)
                .map(str::parse::<DatabaseKind>)
                .transpose()?
                .unwrap_or(DatabaseKind::MySql),
        };

        let host = cli
            .db_host
            .clone()
            .or_else(|| env.get(DB_HOST_ENV_VAR).map(str::to_string))
            .unwrap_or_else(|| "localhost".to_string());

        let port = cli
            .db_port
            .or_else(|| detect_sail_port(env))
            .or_else(|| kind.default_port());

        let database = cli
            .db_database
            .clone()
            .or_else(|| env.get(DB_DATABASE_ENV_VAR).map(str::to_string))
            .ok_or(ConfigError::MissingDatabase)?;

        let username = cli
            .db_username
            .clone()
            .or_else(|| env.get(DB_USERNAME_ENV_VAR).map(str::to_string));
        let password = cli
            .db_password
            .clone()
            .or_else(|| env.get(DB_PASSWORD_ENV_VAR).map(str::to_string));

        let ssl_mode = cli
            .ssl_mode
            .as_deref()
            .map(SslMode::from_str)
            .transpose()?;

        Ok(Self {
            database: DatabaseConfig {
                kind,
                host,
                port,
                database,
                username,
                password,
                ssl_mode,
            },
            ssh: resolve_ssh(cli)?,
            ssh_client: SshClientSettings::from_env(env),
            transport: cli.transport,
            http_host: cli.host.clone(),
            http_port: cli.port,
            readonly: cli.readonly,
            max_rows: cli.max_rows,
            id: cli.id.clone(),
            log_level: cli.log_level,
        })
    }
}

/// A tunnel is configured only when both host and user are present.
fn resolve_ssh(cli: &Cli) -> Result<Option<SshConfig>, ConfigError> {
    let (Some(host), Some(username)) = (cli.ssh_host.as_ref(), cli.ssh_user.as_ref()) else {
        return Ok(None);
    };

    if cli.ssh_passphrase.is_some() && cli.ssh_key.is_none() {
        return Err(ConfigError::PassphraseWithoutKey);
    }

    let auth = match (&cli.ssh_password, &cli.ssh_key) {
        (Some(password), None) => SshAuth::Password(password.clone()),
        (None, Some(path)) => SshAuth::Key {
            path: path.clone(),
            passphrase: cli.ssh_passphrase.clone(),
        },
        _ => return Err(ConfigError::AmbiguousSshCredentials),
    };

    Ok(Some(SshConfig {
        host: host.clone(),
        port: cli.ssh_port,
        username: username.clone(),
        auth,
    }))
}

/// Laravel Sail publishes the container port as `FORWARD_DB_PORT`; fall back to `DB_PORT`.
pub(crate) fn detect_sail_port(env: &EnvSource) -> Option<u16> {
    [FORWARD_DB_PORT_ENV_VAR, DB_PORT_ENV_VAR]
        .iter()
        .find_map(|key| env.get(key).and_then(|v| v.trim().parse::<u16>().ok()))
}

/// Resolve the connection timeout with priority: env var -> default
pub(crate) fn resolve_connect_timeout(env_value: Option<&str>) -> u64 {
    env_value
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
}

/// Resolve the max retries with priority: env var -> default
pub(crate) fn resolve_max_retries(env_value: Option<&str>) -> u32 {
    env_value
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(DEFAULT_MAX_RETRIES)
}

/// Resolve the retry delay with priority: env var -> default
pub(crate) fn resolve_retry_delay_ms(env_value: Option<&str>) -> u64 {
    env_value
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_DELAY_MS)
}

/// Resolve the compression setting with priority: env var -> default (true)
pub(crate) fn resolve_compression(env_value: Option<&str>) -> bool {
    match env_value {
        Some(v) => v.eq_ignore_ascii_case("true") || v == "1",
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["laravel-db-mcp"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    mod database_resolution {
        use super::*;

        #[test]
        fn test_cli_takes_priority_over_env() {
            let env = EnvSource::from_maps(
                &[("DB_HOST", "file-host"), ("DB_DATABASE", "file_db")],
                &[("DB_HOST", "proc-host")],
            );
            let config = ServerConfig::resolve(
                &cli(&["--db-host", "cli-host", "--db-database", "cli_db"]),
                &env,
            )
            .unwrap();
            assert_eq!(config.database.host, "cli-host");
            assert_eq!(config.database.database, "cli_db");
        }

        #[test]
        fn test_env_file_takes_priority_over_process_env() {
            let env = EnvSource::from_maps(
                &[("DB_HOST", "file-host"), ("DB_DATABASE", "app")],
                &[("DB_HOST", "proc-host"), ("DB_USERNAME", "proc-user")],
            );
            let config = ServerConfig::resolve(&cli(&[]), &env).unwrap();
            assert_eq!(config.database.host, "file-host");
            assert_eq!(config.database.username.as_deref(), Some("proc-user"));
        }

        #[test]
        fn test_defaults_to_mysql_on_localhost() {
            let env = EnvSource::from_maps(&[], &[("DB_DATABASE", "app")]);
            let config = ServerConfig::resolve(&cli(&[]), &env).unwrap();
            assert_eq!(config.database.kind, DatabaseKind::MySql);
            assert_eq!(config.database.host, "localhost");
            assert_eq!(config.database.port, Some(3306));
        }

        #[test]
        fn test_missing_database_is_an_error() {
            let env = EnvSource::from_maps(&[], &[]);
            let err = ServerConfig::resolve(&cli(&[]), &env).unwrap_err();
            assert_eq!(err, ConfigError::MissingDatabase);
        }

        #[test]
        fn test_empty_env_value_counts_as_unset() {
            let env = EnvSource::from_maps(&[("DB_HOST", "")], &[("DB_DATABASE", "app")]);
            let config = ServerConfig::resolve(&cli(&[]), &env).unwrap();
            assert_eq!(config.database.host, "localhost");
        }

        #[test]
        fn test_connection_from_env() {
            let env = EnvSource::from_maps(&[("DB_CONNECTION", "pgsql"), ("DB_DATABASE", "app")], &[]);
            let config = ServerConfig::resolve(&cli(&[]), &env).unwrap();
            assert_eq!(config.database.kind, DatabaseKind::Postgres);
            assert_eq!(config.database.port, Some(5432));
        }

        #[test]
        fn test_unsupported_connection_from_env() {
            let env = EnvSource::from_maps(&[("DB_CONNECTION", "oracle"), ("DB_DATABASE", "app")], &[]);
            let err = ServerConfig::resolve(&cli(&[]), &env).unwrap_err();
            assert_eq!(err, ConfigError::UnsupportedDatabase("oracle".to_string()));
        }

        #[test]
        fn test_sqlite_has_no_default_port() {
            let config = ServerConfig::resolve(
                &cli(&["--db-connection", "sqlite", "--db-database", "/tmp/app.sqlite"]),
                &EnvSource::default(),
            )
            .unwrap();
            assert_eq!(config.database.port, None);
        }

        #[test]
        fn test_ssl_mode_parsing() {
            let config = ServerConfig::resolve(
                &cli(&["--db-database", "app", "--ssl-mode", "verify-full"]),
                &EnvSource::default(),
            )
            .unwrap();
            assert_eq!(config.database.ssl_mode, Some(SslMode::VerifyFull));

            let err = ServerConfig::resolve(
                &cli(&["--db-database", "app", "--ssl-mode", "sometimes"]),
                &EnvSource::default(),
            )
            .unwrap_err();
            assert_eq!(err, ConfigError::UnsupportedSslMode("sometimes".to_string()));
        }

        #[test]
        fn test_password_hidden_in_debug() {
            let config = ServerConfig::resolve(
                &cli(&["--db-database", "app", "--db-password", "hunter2"]),
                &EnvSource::default(),
            )
            .unwrap();
            let debug = format!("{:?}", config.database);
            assert!(!debug.contains("hunter2"));
        }
    }

    mod sail_port {
        use super::*;

        #[test]
        fn test_forward_db_port_wins() {
            let env = EnvSource::from_maps(&[("FORWARD_DB_PORT", "33060"), ("DB_PORT", "3306")], &[]);
            assert_eq!(detect_sail_port(&env), Some(33060));
        }

        #[test]
        fn test_falls_back_to_db_port() {
            let env = EnvSource::from_maps(&[("DB_PORT", "3307")], &[]);
            assert_eq!(detect_sail_port(&env), Some(3307));
        }

        #[test]
        fn test_invalid_forward_port_falls_back() {
            let env = EnvSource::from_maps(&[("FORWARD_DB_PORT", "abc"), ("DB_PORT", "5433")], &[]);
            assert_eq!(detect_sail_port(&env), Some(5433));
        }

        #[test]
        fn test_none_when_unset() {
            assert_eq!(detect_sail_port(&EnvSource::default()), None);
        }

        #[test]
        fn test_cli_port_beats_sail() {
            let env = EnvSource::from_maps(&[("FORWARD_DB_PORT", "33060"), ("DB_DATABASE", "app")], &[]);
            let config = ServerConfig::resolve(&cli(&["--db-port", "3310"]), &env).unwrap();
            assert_eq!(config.database.port, Some(3310));
        }
    }

    mod ssh_resolution {
        use super::*;

        #[test]
        fn test_no_tunnel_without_host_and_user() {
            let config = ServerConfig::resolve(
                &cli(&["--db-database", "app", "--ssh-host", "bastion"]),
                &EnvSource::default(),
            )
            .unwrap();
            assert!(config.ssh.is_none());
        }

        #[test]
        fn test_password_tunnel() {
            let config = ServerConfig::resolve(
                &cli(&[
                    "--db-database",
                    "app",
                    "--ssh-host",
                    "bastion",
                    "--ssh-user",
                    "deploy",
                    "--ssh-password",
                    "secret",
                ]),
                &EnvSource::default(),
            )
            .unwrap();
            let ssh = config.ssh.unwrap();
            assert_eq!(ssh.port, DEFAULT_SSH_PORT);
            assert_eq!(ssh.address(), "bastion:22");
            assert!(matches!(ssh.auth, SshAuth::Password(ref p) if p == "secret"));
        }

        #[test]
        fn test_key_tunnel_with_passphrase() {
            let config = ServerConfig::resolve(
                &cli(&[
                    "--db-database",
                    "app",
                    "--ssh-host",
                    "bastion",
                    "--ssh-port",
                    "2222",
                    "--ssh-user",
                    "deploy",
                    "--ssh-key",
                    "/home/deploy/.ssh/id_ed25519",
                    "--ssh-passphrase",
                    "words",
                ]),
                &EnvSource::default(),
            )
            .unwrap();
            let ssh = config.ssh.unwrap();
            assert_eq!(ssh.port, 2222);
            match ssh.auth {
                SshAuth::Key { path, passphrase } => {
                    assert_eq!(path, PathBuf::from("/home/deploy/.ssh/id_ed25519"));
                    assert_eq!(passphrase.as_deref(), Some("words"));
                }
                other => panic!("unexpected auth {:?}", other),
            }
        }

        #[test]
        fn test_both_credentials_rejected() {
            let err = ServerConfig::resolve(
                &cli(&[
                    "--db-database",
                    "app",
                    "--ssh-host",
                    "bastion",
                    "--ssh-user",
                    "deploy",
                    "--ssh-password",
                    "secret",
                    "--ssh-key",
                    "/k",
                ]),
                &EnvSource::default(),
            )
            .unwrap_err();
            assert_eq!(err, ConfigError::AmbiguousSshCredentials);
        }

        #[test]
        fn test_no_credentials_rejected() {
            let err = ServerConfig::resolve(
                &cli(&["--db-database", "app", "--ssh-host", "bastion", "--ssh-user", "deploy"]),
                &EnvSource::default(),
            )
            .unwrap_err();
            assert_eq!(err, ConfigError::AmbiguousSshCredentials);
        }

        #[test]
        fn test_passphrase_requires_key() {
            let err = ServerConfig::resolve(
                &cli(&[
                    "--db-database",
                    "app",
                    "--ssh-host",
                    "bastion",
                    "--ssh-user",
                    "deploy",
                    "--ssh-password",
                    "secret",
                    "--ssh-passphrase",
                    "words",
                ]),
                &EnvSource::default(),
            )
            .unwrap_err();
            assert_eq!(err, ConfigError::PassphraseWithoutKey);
        }

        #[test]
        fn test_secrets_hidden_in_debug() {
            let auth = SshAuth::Key {
                path: PathBuf::from("/k"),
                passphrase: Some("words".to_string()),
            };
            assert!(!format!("{:?}", auth).contains("words"));
            assert!(!format!("{:?}", SshAuth::Password("pw".to_string())).contains("pw"));
        }
    }

    mod ssh_client_settings {
        use super::*;

        #[test]
        fn test_defaults() {
            let settings = SshClientSettings::from_env(&EnvSource::default());
            assert_eq!(settings, SshClientSettings::default());
        }

        #[test]
        fn test_env_overrides() {
            let env = EnvSource::from_maps(
                &[],
                &[
                    ("SSH_CONNECT_TIMEOUT", "5"),
                    ("SSH_MAX_RETRIES", "0"),
                    ("SSH_RETRY_DELAY_MS", "250"),
                    ("SSH_COMPRESSION", "false"),
                ],
            );
            let settings = SshClientSettings::from_env(&env);
            assert_eq!(settings.connect_timeout, Duration::from_secs(5));
            assert_eq!(settings.max_retries, 0);
            assert_eq!(settings.retry_delay, Duration::from_millis(250));
            assert!(!settings.compress);
        }

        #[test]
        fn test_ignores_invalid_values() {
            assert_eq!(resolve_connect_timeout(Some("-10")), DEFAULT_CONNECT_TIMEOUT_SECS);
            assert_eq!(resolve_max_retries(Some("many")), DEFAULT_MAX_RETRIES);
            assert_eq!(resolve_retry_delay_ms(Some("")), DEFAULT_RETRY_DELAY_MS);
        }

        #[test]
        fn test_compression_accepts_one() {
            assert!(resolve_compression(Some("1")));
            assert!(resolve_compression(Some("TRUE")));
            assert!(!resolve_compression(Some("0")));
        }

        #[test]
        fn test_max_retry_delay_value() {
            assert_eq!(MAX_RETRY_DELAY, Duration::from_secs(10));
        }
    }

    mod env_file {
        use super::*;

        #[test]
        fn test_reads_quoted_values() {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            writeln!(file, "# Laravel").unwrap();
            writeln!(file, "DB_CONNECTION=pgsql").unwrap();
            writeln!(file, "DB_PASSWORD=\"quoted secret\"").unwrap();
            writeln!(file, "DB_DATABASE='laravel'").unwrap();

            let env = EnvSource::load(Some(file.path())).unwrap();
            assert_eq!(env.get("DB_CONNECTION"), Some("pgsql"));
            assert_eq!(env.get("DB_PASSWORD"), Some("quoted secret"));
            assert_eq!(env.get("DB_DATABASE"), Some("laravel"));
        }

        #[test]
        fn test_missing_file_is_an_error() {
            let err = EnvSource::load(Some(Path::new("/nonexistent/.env"))).unwrap_err();
            assert!(matches!(err, ConfigError::EnvFile { .. }));
        }
    }
}
