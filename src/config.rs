//! Connection configuration for an ontology database target
//!
//! A [`ConnectionConfig`] holds the identity of one ontology + database pair
//! (host, port, dialect, driver, database, base identifier), its namespace
//! bindings and, separately, the credentials used to connect. It renders the
//! connection string in three modes:
//!
//! - in-memory: host `in-memory`, always the literal `sqlite://`
//! - file: dialect `sqlite`, `sqlite:///{database}` with `database` as a file path
//! - networked: `{dialect}+{driver}://{username}:{password}@{host}:{port}/{database}`

use crate::namespace::{FOAF, NamespaceMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Host value selecting the in-memory engine
pub const IN_MEMORY_HOST: &str = "in-memory";
/// Connection string of the in-memory engine
pub const IN_MEMORY_URI: &str = "sqlite://";
/// Dialect and driver forced in in-memory mode
pub const IN_MEMORY_ENGINE: &str = "sqlite";

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_DIALECT: &str = "mysql";
pub const DEFAULT_DRIVER: &str = "pymysql";
pub const DEFAULT_DATABASE: &str = "onto";
pub const DEFAULT_BASE_IDENTIFIER: &str = "http://dbpedia.org/ontology/";

/// Reserved prefix always bound to `base_identifier + "#"`
pub const BASE_PREFIX: &str = "base";

const USERNAME_PLACEHOLDER: &str = "{username}";
const PASSWORD_PLACEHOLDER: &str = "{password}";

/// Errors raised while loading a configuration file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML config '{path}': {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid JSON config '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid TOML config '{path}': {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Unsupported config file '{0}' (expected .yaml, .yml, .json or .toml)")]
    UnsupportedFormat(PathBuf),
}

/// How the connection string is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionMode {
    InMemory,
    File,
    Networked,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionMode::InMemory => "in-memory",
            ConnectionMode::File => "file",
            ConnectionMode::Networked => "networked",
        }
    }

    /// Whether connecting in this mode needs a username and password
    pub fn requires_credentials(&self) -> bool {
        matches!(self, ConnectionMode::Networked)
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A credential that was needed but never supplied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingCredential {
    Username,
    Password,
}

impl fmt::Display for MissingCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingCredential::Username => write!(f, "username"),
            MissingCredential::Password => write!(f, "password"),
        }
    }
}

/// Database server credentials. `Debug` never prints the password.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    /// Fill unset fields from `fallback`
    pub fn or(self, fallback: &Credentials) -> Credentials {
        Credentials {
            username: self.username.or_else(|| fallback.username.clone()),
            password: self.password.or_else(|| fallback.password.clone()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Identity parameters of a connection target.
///
/// `Default` yields the documented defaults (networked MySQL on localhost).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub dialect: String,
    pub driver: String,
    pub database: String,
    pub base_identifier: String,
    pub namespaces: NamespaceMap,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            dialect: DEFAULT_DIALECT.to_string(),
            driver: DEFAULT_DRIVER.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            base_identifier: DEFAULT_BASE_IDENTIFIER.to_string(),
            namespaces: default_namespaces(),
        }
    }
}

fn default_namespaces() -> NamespaceMap {
    [("foaf", FOAF)].into_iter().collect()
}

/// On-disk layout of a config file. Every key is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub dialect: Option<String>,
    pub driver: Option<String>,
    pub database: Option<String>,
    #[serde(rename = "baseURL", alias = "base_url")]
    pub base_url: Option<String>,
    pub namespaces: Option<BTreeMap<String, String>>,
}

impl ConfigFile {
    pub fn into_config(self) -> ConnectionConfig {
        let defaults = ConnectionParams::default();
        let params = ConnectionParams {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            dialect: self.dialect.unwrap_or(defaults.dialect),
            driver: self.driver.unwrap_or(defaults.driver),
            database: self.database.unwrap_or(defaults.database),
            base_identifier: self.base_url.unwrap_or(defaults.base_identifier),
            namespaces: self
                .namespaces
                .map(|ns| ns.into_iter().collect())
                .unwrap_or(defaults.namespaces),
        };
        let mut config = ConnectionConfig::new(params);
        config.credentials = Credentials {
            username: self.username,
            password: self.password,
        };
        config
    }
}

#[derive(Debug, Clone, Copy)]
enum FileFormat {
    Yaml,
    Json,
    Toml,
}

impl FileFormat {
    fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "yaml" | "yml" => Some(FileFormat::Yaml),
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            _ => None,
        }
    }
}

/// Heterogeneous input accepted by [`ConnectionConfig::factory`]
#[derive(Debug, Clone, Default)]
pub enum ConfigSource {
    /// Documented defaults
    #[default]
    Default,
    /// YAML, JSON or TOML file
    Path(PathBuf),
    /// Already built config, passed through unchanged
    Config(ConnectionConfig),
}

impl From<PathBuf> for ConfigSource {
    fn from(path: PathBuf) -> Self {
        ConfigSource::Path(path)
    }
}

impl From<&Path> for ConfigSource {
    fn from(path: &Path) -> Self {
        ConfigSource::Path(path.to_path_buf())
    }
}

impl From<&str> for ConfigSource {
    fn from(path: &str) -> Self {
        ConfigSource::Path(PathBuf::from(path))
    }
}

impl From<String> for ConfigSource {
    fn from(path: String) -> Self {
        ConfigSource::Path(PathBuf::from(path))
    }
}

impl From<ConnectionConfig> for ConfigSource {
    fn from(config: ConnectionConfig) -> Self {
        ConfigSource::Config(config)
    }
}

impl<T: Into<ConfigSource>> From<Option<T>> for ConfigSource {
    fn from(source: Option<T>) -> Self {
        source.map(Into::into).unwrap_or_default()
    }
}

/// Connection parameters and identity of one ontology database target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    mode: ConnectionMode,
    host: String,
    port: u16,
    dialect: String,
    driver: String,
    database: String,
    base_identifier: String,
    namespaces: NamespaceMap,
    credentials: Credentials,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(ConnectionParams::default())
    }
}

impl ConnectionConfig {
    /// Build a config, applying the mode and `base` namespace invariants
    pub fn new(params: ConnectionParams) -> Self {
        let ConnectionParams {
            host,
            port,
            mut dialect,
            mut driver,
            database,
            base_identifier,
            mut namespaces,
        } = params;

        let (mode, host) = if is_in_memory_host(&host) {
            dialect = IN_MEMORY_ENGINE.to_string();
            driver = IN_MEMORY_ENGINE.to_string();
            (ConnectionMode::InMemory, IN_MEMORY_HOST.to_string())
        } else if dialect.eq_ignore_ascii_case(IN_MEMORY_ENGINE) {
            (ConnectionMode::File, host)
        } else {
            (ConnectionMode::Networked, host)
        };

        namespaces.bind(BASE_PREFIX, format!("{}#", base_identifier), true);

        Self {
            mode,
            host,
            port,
            dialect,
            driver,
            database,
            base_identifier,
            namespaces,
            credentials: Credentials::default(),
        }
    }

    /// In-memory target: no network, no credentials, process lifetime only
    pub fn in_memory(database: impl Into<String>, base_identifier: impl Into<String>, namespaces: NamespaceMap) -> Self {
        Self::new(ConnectionParams {
            host: IN_MEMORY_HOST.to_string(),
            database: database.into(),
            base_identifier: base_identifier.into(),
            namespaces,
            ..ConnectionParams::default()
        })
    }

    /// In-memory target with the default database, base identifier and namespaces
    pub fn default_in_memory() -> Self {
        Self::new(ConnectionParams {
            host: IN_MEMORY_HOST.to_string(),
            ..ConnectionParams::default()
        })
    }

    /// Load from a YAML, JSON or TOML file. Missing keys take the defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat(path.to_path_buf()))?;
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let file: ConfigFile = if contents.trim().is_empty() {
            ConfigFile::default()
        } else {
            match format {
                FileFormat::Yaml => serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
                    path: path.to_path_buf(),
                    source,
                })?,
                FileFormat::Json => serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
                    path: path.to_path_buf(),
                    source,
                })?,
                FileFormat::Toml => toml::from_str(&contents).map_err(|source| ConfigError::Toml {
                    path: path.to_path_buf(),
                    source,
                })?,
            }
        };

        let config = file.into_config();
        debug!("Loaded {} config for {} from {}", config.mode, config.display_uri(), path.display());
        Ok(config)
    }

    /// Normalise caller input: defaults, a config file, or an existing config
    pub fn factory(source: impl Into<ConfigSource>) -> Result<Self, ConfigError> {
        match source.into() {
            ConfigSource::Default => Ok(Self::default()),
            ConfigSource::Path(path) => Self::from_file(path),
            ConfigSource::Config(config) => Ok(config),
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn is_in_memory(&self) -> bool {
        self.mode == ConnectionMode::InMemory
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Ontology IRI; also the graph identifier inside the store
    pub fn base_identifier(&self) -> &str {
        &self.base_identifier
    }

    pub fn namespaces(&self) -> &NamespaceMap {
        &self.namespaces
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Replace the stored credentials. No validation is done.
    pub fn set_credentials(&mut self, username: Option<String>, password: Option<String>) {
        self.credentials = Credentials { username, password };
    }

    /// Add a namespace binding.
    ///
    /// The reserved `base` prefix always stays bound to `base_identifier#`;
    /// attempts to rebind it are refused and reported.
    pub fn bind_namespace(&mut self, prefix: impl Into<String>, namespace: impl Into<String>, override_existing: bool) -> bool {
        let prefix = prefix.into();
        if prefix == BASE_PREFIX {
            warn!("Refusing to rebind reserved prefix '{}' for {}", BASE_PREFIX, self.base_identifier);
            return false;
        }
        self.namespaces.bind(prefix, namespace, override_existing)
    }

    /// Connection string with credential placeholders left in place. Safe to log.
    pub fn display_uri(&self) -> String {
        self.render(USERNAME_PLACEHOLDER, PASSWORD_PLACEHOLDER)
    }

    /// Credentials that would be missing when resolving with these arguments
    pub fn missing_credentials(&self, username: Option<&str>, password: Option<&str>) -> Vec<MissingCredential> {
        if !self.mode.requires_credentials() {
            return Vec::new();
        }
        let mut missing = Vec::new();
        if username.is_none() && self.credentials.username.is_none() {
            missing.push(MissingCredential::Username);
        }
        if password.is_none() && self.credentials.password.is_none() {
            missing.push(MissingCredential::Password);
        }
        missing
    }

    /// Literal connection string with credentials substituted.
    ///
    /// Each credential comes from the argument, else the stored value, else it is
    /// reported as missing and left empty. In-memory and file modes ignore credentials.
    pub fn resolved_uri(&self, username: Option<&str>, password: Option<&str>) -> String {
        for missing in self.missing_credentials(username, password) {
            warn!(
                credential = %missing,
                "{} was not set and is not provided when resolving {}",
                missing,
                self.display_uri()
            );
        }
        let username = username.or(self.credentials.username.as_deref()).unwrap_or_default();
        let password = password.or(self.credentials.password.as_deref()).unwrap_or_default();
        self.render(username, password)
    }

    /// Deterministic, non-sensitive handle for this ontology + database target.
    ///
    /// Only identity fields are hashed; credentials never contribute.
    pub fn unique_id(&self) -> String {
        let port = self.port.to_string();
        let mut hasher = blake3::Hasher::new();
        for field in [
            self.mode.as_str(),
            self.dialect.as_str(),
            self.driver.as_str(),
            self.host.as_str(),
            port.as_str(),
            self.database.as_str(),
            self.base_identifier.as_str(),
        ] {
            hasher.update(field.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }

    fn render(&self, username: &str, password: &str) -> String {
        match self.mode {
            ConnectionMode::InMemory => IN_MEMORY_URI.to_string(),
            ConnectionMode::File => format!("{}:///{}", IN_MEMORY_ENGINE, self.database),
            ConnectionMode::Networked => format!(
                "{}+{}://{}:{}@{}:{}/{}",
                self.dialect, self.driver, username, password, self.host, self.port, self.database
            ),
        }
    }
}

fn is_in_memory_host(host: &str) -> bool {
    host == IN_MEMORY_HOST || host == IN_MEMORY_URI
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mode: {}", self.mode)?;
        writeln!(f, "host: {}", self.host)?;
        writeln!(f, "port: {}", self.port)?;
        writeln!(f, "dialect: {}", self.dialect)?;
        writeln!(f, "driver: {}", self.driver)?;
        writeln!(f, "database: {}", self.database)?;
        writeln!(f, "baseURL: {}", self.base_identifier)?;
        writeln!(f, "uri: {}", self.display_uri())?;
        write!(f, "namespaces:")?;
        for (prefix, namespace) in self.namespaces.iter() {
            write!(f, "\n  {}: {}", prefix, namespace)?;
        }
        Ok(())
    }
}
