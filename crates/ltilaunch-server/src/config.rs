use std::{net::SocketAddr, time::Duration};

use ltilaunch::types::Visibility;
use ltilaunch::{LtiConfig, MatcherKind, SessionConfig};
use ltilaunch_postgres::PostgresConfig;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Launch validation settings
    #[serde(default)]
    pub lti: LtiConfig,
    /// Session cookie settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Records created at startup when missing
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.request_timeout_ms == 0 {
            return Err("server.request_timeout_ms must be > 0".into());
        }
        if let Some(base) = &self.server.base_url {
            let url = Url::parse(base).map_err(|e| format!("server.base_url: {e}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err("server.base_url must be an http(s) URL".into());
            }
        }

        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }

        if self.storage.backend == StorageBackend::Postgres {
            match &self.storage.postgres {
                None => {
                    return Err("storage.backend = \"postgres\" requires [storage.postgres]".into());
                }
                Some(pg) if pg.url.is_empty() => {
                    return Err("storage.postgres.url must not be empty".into());
                }
                Some(pg) if pg.pool_size == 0 => {
                    return Err("storage.postgres.pool_size must be > 0".into());
                }
                Some(_) => {}
            }
        }

        self.lti.validate().map_err(|e| format!("lti config error: {e}"))?;
        self.session
            .validate()
            .map_err(|e| format!("session config error: {e}"))?;
        self.bootstrap.validate()
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    /// Parsed `server.base_url`, if configured.
    pub fn base_url(&self) -> Option<Url> {
        self.server.base_url.as_deref().and_then(|u| Url::parse(u).ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public origin the LMS posts to, e.g. `https://tool.example.edu`.
    /// When unset the origin is taken from the request's `Host` header.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout_ms() -> u64 {
    15_000
}
fn default_body_limit() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: None,
            request_timeout_ms: default_request_timeout_ms(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local maps; state is lost on restart.
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Administrator-managed records seeded at startup.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub consumers: Vec<BootstrapConsumer>,
    #[serde(default)]
    pub providers: Vec<BootstrapProvider>,
}

impl BootstrapConfig {
    pub fn validate(&self) -> Result<(), String> {
        for consumer in &self.consumers {
            if consumer.name.is_empty() {
                return Err("bootstrap.consumers[].name must not be empty".into());
            }
            if let Some(matcher) = &consumer.matcher
                && matcher.parse::<MatcherKind>().is_err()
            {
                return Err(format!(
                    "bootstrap consumer '{}' names unknown matcher '{matcher}'",
                    consumer.name
                ));
            }
            if let Some(group) = &consumer.group
                && !self.groups.contains(group)
            {
                return Err(format!(
                    "bootstrap consumer '{}' references undeclared group '{group}'",
                    consumer.name
                ));
            }
        }
        for provider in &self.providers {
            if provider.name.is_empty() || provider.launch_path.is_empty() {
                return Err("bootstrap.providers[] requires name and launch_path".into());
            }
        }
        Ok(())
    }
}

/// A trusted caller to register. Key and secret are generated when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConsumer {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub consumer_key: Option<String>,
    #[serde(default)]
    pub consumer_secret: Option<String>,
    #[serde(default)]
    pub instance_guid: Option<String>,
    #[serde(default = "default_true")]
    pub match_guid_and_consumer: bool,
    /// Trust group name; must be listed in `bootstrap.groups`.
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub matcher: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapProvider {
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon_url: String,
    pub launch_path: String,
    #[serde(default)]
    pub visibility: Visibility,
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_PATH: &str = "ltilaunch.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_PATH));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g. LTILAUNCH__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("LTILAUNCH")
                .prefix_separator("__")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(cfg.addr().port(), 8080);
    }

    #[test]
    fn test_postgres_backend_requires_settings() {
        let mut cfg = AppConfig::default();
        cfg.storage.backend = StorageBackend::Postgres;
        assert!(cfg.validate().unwrap_err().contains("storage.postgres"));
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let mut cfg = AppConfig::default();
        cfg.logging.level = "loud".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_bootstrap_matcher() {
        let mut cfg = AppConfig::default();
        cfg.bootstrap.consumers.push(BootstrapConsumer {
            name: "Canvas".into(),
            description: String::new(),
            consumer_key: None,
            consumer_secret: None,
            instance_guid: None,
            match_guid_and_consumer: true,
            group: None,
            matcher: Some("email".into()),
        });
        assert!(cfg.validate().unwrap_err().contains("unknown matcher"));
    }

    #[test]
    fn test_rejects_undeclared_group() {
        let mut cfg = AppConfig::default();
        cfg.bootstrap.consumers.push(BootstrapConsumer {
            name: "Canvas".into(),
            description: String::new(),
            consumer_key: None,
            consumer_secret: None,
            instance_guid: None,
            match_guid_and_consumer: true,
            group: Some("district".into()),
            matcher: None,
        });
        assert!(cfg.validate().unwrap_err().contains("undeclared group"));
    }

    #[test]
    fn test_base_url_must_parse() {
        let mut cfg = AppConfig::default();
        cfg.server.base_url = Some("not a url".into());
        assert!(cfg.validate().is_err());
        cfg.server.base_url = Some("https://tool.example.edu".into());
        assert!(cfg.validate().is_ok());
        assert_eq!(
            cfg.base_url().unwrap().host_str(),
            Some("tool.example.edu")
        );
    }
}
