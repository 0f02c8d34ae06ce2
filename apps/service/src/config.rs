use std::collections::HashSet;
use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable that supplies the remote database token
pub const AUTH_TOKEN_ENV: &str = "LINKWATCH_DB_AUTH_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("Failed to write config {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("Failed to parse config {path}: {source}")]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("No config path available, neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Nominal cycle length, measured from cycle start to cycle start
    pub ping_interval_seconds: u64,
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub probe: ProbeConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// IP address or hostname, the natural key of a target
    pub address: String,
    pub alias: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Echo requests sent per probe
    pub attempts: u32,
    /// Per-echo timeout handed to the probe program
    pub timeout_seconds: u64,
    pub program: String,
    /// Wall-clock ceiling for one probe, derived from attempts and timeout when unset
    pub deadline_seconds: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { attempts: 4, timeout_seconds: 2, program: "ping".into(), deadline_seconds: None }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.timeout_seconds)
    }

    /// `ping` spends at most about one second per echo plus the wait for the
    /// last reply, the extra slack covers DNS resolution and process start.
    pub fn deadline(&self) -> std::time::Duration {
        let seconds = self
            .deadline_seconds
            .unwrap_or_else(|| u64::from(self.attempts).saturating_add(self.timeout_seconds).saturating_add(5));
        std::time::Duration::from_secs(seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Local database file
    pub path: Option<String>,
    /// Remote libsql server, used instead of `path`
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Extra SQL executed once at startup after the built-in schema
    pub bootstrap_sql_path: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    1
}

/// Where the results end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    Local(path::PathBuf),
    Remote { url: String, auth_token: String },
}

impl DatabaseConfig {
    pub fn location(&self) -> Result<DatabaseLocation, ConfigError> {
        match (&self.path, &self.url) {
            (Some(path), None) => Ok(DatabaseLocation::Local(expand_home(path))),
            (None, Some(url)) => Ok(DatabaseLocation::Remote {
                url: url.clone(),
                auth_token: self.auth_token.clone().unwrap_or_default(),
            }),
            (Some(_), Some(_)) => {
                Err(ConfigError::Invalid("database.path and database.url are mutually exclusive".into()))
            }
            (None, None) => Err(ConfigError::Invalid("one of database.path or database.url is required".into())),
        }
    }

    pub fn bootstrap_sql_path(&self) -> Option<path::PathBuf> {
        self.bootstrap_sql_path.as_deref().map(expand_home)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// `compact` or `json`
    pub format: String,
    pub directory: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into(), directory: None }
    }
}

impl LogConfig {
    pub fn settings(&self) -> Result<logger::LogSettings, ConfigError> {
        let level = self
            .level
            .parse::<tracing::level_filters::LevelFilter>()
            .map_err(|_| ConfigError::Invalid(format!("unknown log level: {}", self.level)))?;
        let format = match self.format.as_str() {
            "compact" => logger::LogFormat::Compact,
            "json" => logger::LogFormat::Json,
            other => return Err(ConfigError::Invalid(format!("unknown log format: {other}"))),
        };

        Ok(logger::LogSettings {
            level,
            format,
            directory: self.directory.as_deref().map(expand_home),
            file_prefix: "linkwatch".into(),
        })
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/linkwatch/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("linkwatch/config.toml"))
}

/// Expand a leading `~/` to the home directory
fn expand_home(raw: &str) -> path::PathBuf {
    match (raw.strip_prefix("~/"), env::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => path::PathBuf::from(raw),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ping_interval_seconds: 20,
            targets: vec![
                TargetConfig { address: "192.168.1.1".into(), alias: "router".into() },
                TargetConfig { address: "8.8.8.8".into(), alias: "internet".into() },
            ],
            probe: ProbeConfig::default(),
            database: DatabaseConfig {
                path: Some("~/.local/share/linkwatch/linkwatch.db".into()),
                url: None,
                auth_token: None,
                bootstrap_sql_path: None,
                max_connections: default_max_connections(),
            },
            log: LogConfig::default(),
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let unset = "-".to_string();

        writeln!(f, "Current Configuration State:")?;
        write_title_1(f, "Polling")?;
        write_1(f, "Interval (s)", &self.ping_interval_seconds)?;
        write_1(f, "Cycles per summary", &cycles_per_summary(self.ping_interval_seconds))?;

        write_title_1(f, "Targets")?;
        for target in &self.targets {
            write_1(f, &target.alias, &target.address)?;
        }

        write_title_1(f, "Probe")?;
        write_1(f, "Program", &self.probe.program)?;
        write_1(f, "Attempts", &self.probe.attempts)?;
        write_1(f, "Timeout per attempt (s)", &self.probe.timeout_seconds)?;
        write_1(f, "Deadline (s)", &self.probe.deadline().as_secs())?;

        write_title_1(f, "Database")?;
        write_1(f, "Path", self.database.path.as_ref().unwrap_or(&unset))?;
        write_1(f, "URL", self.database.url.as_ref().unwrap_or(&unset))?;
        write_1(f, "Bootstrap SQL", self.database.bootstrap_sql_path.as_ref().unwrap_or(&unset))?;
        write_1(f, "Max connections", &self.database.max_connections)?;

        write_title_1(f, "Log")?;
        write_1(f, "Level", &self.log.level)?;
        write_1(f, "Format", &self.log.format)?;
        write_1(f, "Directory", self.log.directory.as_ref().unwrap_or(&unset))?;

        Ok(())
    }
}

/// Number of cycles between two summary lines, roughly one hour apart
pub fn cycles_per_summary(interval_seconds: u64) -> u64 {
    3600_u64.div_ceil(interval_seconds.max(1))
}

/// Validate a target address, an IP address or a hostname.
///
/// The address ends up on the `ping` command line, so anything that could be
/// taken for an option is rejected.
pub fn validate_target_address(address: &str) -> Result<(), String> {
    if address.trim().is_empty() {
        return Err("empty address".into());
    }
    if address.parse::<std::net::IpAddr>().is_ok() {
        return Ok(());
    }
    if address.starts_with('-') {
        return Err(format!("address may not start with '-': {address}"));
    }
    if address.len() > 253 {
        return Err("hostname longer than 253 characters".into());
    }

    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    };
    if !address.trim_end_matches('.').split('.').all(valid_label) {
        return Err(format!("not an IP address or hostname: {address}"));
    }

    Ok(())
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/linkwatch/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```rust,ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path = Self::resolve_path(optional_path)?;

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            Self::from_toml_str(&raw_string)
                .map_err(|source| ConfigError::ParseFailed { path: config_path.clone(), source })?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        if config.database.auth_token.is_none() {
            config.database.auth_token = env::var(AUTH_TOKEN_ENV).ok();
        }

        config.validate()?;
        Ok(config)
    }

    /// Path `from_config` reads, the default location when none is given
    pub fn resolve_path(optional_path: Option<impl AsRef<path::Path>>) -> Result<path::PathBuf, ConfigError> {
        match optional_path {
            Some(path) => Ok(normalize_toml_path(path.as_ref())),
            None => default_config_path(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Reject configurations the monitor cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ping_interval_seconds == 0 {
            return Err(ConfigError::Invalid("ping_interval_seconds must be at least 1".into()));
        }
        if self.targets.is_empty() {
            return Err(ConfigError::Invalid("at least one target is required".into()));
        }

        let mut seen = HashSet::new();
        for target in &self.targets {
            validate_target_address(&target.address)
                .map_err(|reason| ConfigError::Invalid(format!("target '{}': {}", target.alias, reason)))?;
            if !seen.insert(target.address.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate target address: {}", target.address)));
            }
        }

        if self.probe.attempts == 0 {
            return Err(ConfigError::Invalid("probe.attempts must be at least 1".into()));
        }
        if self.probe.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("probe.timeout_seconds must be at least 1".into()));
        }
        if self.probe.deadline_seconds == Some(0) {
            return Err(ConfigError::Invalid("probe.deadline_seconds must be at least 1".into()));
        }
        if self.probe.program.trim().is_empty() {
            return Err(ConfigError::Invalid("probe.program must not be empty".into()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid("database.max_connections must be at least 1".into()));
        }

        self.database.location()?;
        self.log.settings()?;
        Ok(())
    }

    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ping_interval_seconds)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        std::fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }
}
