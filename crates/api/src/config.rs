//! Process configuration.
//!
//! Layered: built-in defaults, then `<conf>/config.yaml` when present, then
//! `ERPGUARD_*` environment variables (`__` separates nesting levels, e.g.
//! `ERPGUARD_JWT__SECRET`).

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

use erpguard_auth::JwtSettings;
use erpguard_infra::{CacheConfig, DatabaseConfig};
use erpguard_observability::LoggingConfig;

use crate::bootstrap::BootstrapConfig;
use crate::routing::RouteOverride;

pub const ENV_PREFIX: &str = "ERPGUARD_";
pub const CONFIG_FILE: &str = "config.yaml";

/// Permission gateway for the ERP backend
#[derive(Debug, Parser)]
#[command(name = "erpguard-api")]
pub struct Cli {
    /// Directory holding config.yaml
    #[arg(long, default_value = "config")]
    pub conf: PathBuf,
}

impl Cli {
    /// Parse process arguments, accepting the single-dash `-conf <dir>` form.
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }
}

fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    args.into_iter()
        .map(|arg| match arg.to_str() {
            Some("-conf") => OsString::from("--conf"),
            Some(s) if s.starts_with("-conf=") => OsString::from(format!("-{s}")),
            _ => arg,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
    pub overrides: Vec<RouteOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub jwt: JwtSettings,
    pub cache: CacheConfig,
    /// In-memory storage when absent.
    pub database: Option<DatabaseConfig>,
    /// Seeds the in-memory store; required when `database` is absent.
    pub bootstrap: Option<BootstrapConfig>,
    pub routes: RoutesConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn figment(conf_dir: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(conf_dir.join(CONFIG_FILE)))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(conf_dir: &Path) -> Result<Self, figment::Error> {
        let config: AppConfig = Self::figment(conf_dir).extract()?;
        if config.jwt.secret.is_empty() {
            return Err(figment::Error::from(
                "jwt.secret must be set (ERPGUARD_JWT__SECRET or config.yaml)".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(body: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), body).unwrap();
        dir
    }

    #[test]
    fn defaults_apply_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let config: AppConfig = AppConfig::figment(dir.path()).extract().unwrap();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.jwt.issuer, "erp-system");
        assert_eq!(config.jwt.access_ttl_secs, 7200);
        assert_eq!(config.cache.prefix, "perm:");
        assert!(config.cache.redis.is_none());
        assert!(config.database.is_none());
        assert!(config.bootstrap.is_none());
    }

    #[test]
    fn bootstrap_section_fills_role_defaults() {
        let dir = write_config("jwt:\n  secret: s\nbootstrap:\n  admin_user_id: 7\n");
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(
            config.bootstrap,
            Some(BootstrapConfig {
                admin_user_id: 7,
                role_id: 1,
                role_code: "admin".to_string(),
            })
        );
    }

    #[test]
    fn yaml_overrides_defaults_and_keeps_the_rest() {
        let dir = write_config(
            r#"
server:
  request_timeout_ms: 2500
jwt:
  secret: from-yaml
cache:
  ttl:
    role_rules_secs: 60
  redis:
    url: redis://cache:6379
routes:
  overrides:
    - method: GET
      path: /reports/{id}
      doc_type: Report
"#,
        );
        let config = AppConfig::load(dir.path()).unwrap();
        assert_eq!(config.server.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.jwt.secret, "from-yaml");
        assert_eq!(config.cache.ttl.role_rules_secs, 60);
        assert_eq!(config.cache.ttl.doctype_secs, 4 * 60 * 60);
        let redis = config.cache.redis.unwrap();
        assert_eq!(redis.url, "redis://cache:6379");
        assert_eq!(redis.pool_size, 10);
        assert_eq!(config.routes.overrides.len(), 1);
        assert_eq!(config.routes.overrides[0].doc_type.as_deref(), Some("Report"));
    }

    #[test]
    fn missing_secret_is_rejected() {
        let dir = write_config("server:\n  listen_addr: 127.0.0.1:9000\n");
        assert!(AppConfig::load(dir.path()).is_err());
    }

    #[test]
    fn single_dash_conf_is_accepted() {
        let args = ["erpguard-api", "-conf", "/etc/erpguard"].map(OsString::from);
        let cli = Cli::parse_from(normalize_args(args));
        assert_eq!(cli.conf, PathBuf::from("/etc/erpguard"));

        let args = ["erpguard-api", "-conf=/srv/conf"].map(OsString::from);
        let cli = Cli::parse_from(normalize_args(args));
        assert_eq!(cli.conf, PathBuf::from("/srv/conf"));

        let cli = Cli::parse_from(normalize_args(["erpguard-api"].map(OsString::from)));
        assert_eq!(cli.conf, PathBuf::from("config"));
    }
}
