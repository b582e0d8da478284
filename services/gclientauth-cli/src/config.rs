//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. The config file path
//! itself comes from `--config`, then `CONFIG_PATH`, then the working
//! directory.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use gclientauth::AuthOptions;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Client credential JSON downloaded from the provider console
    pub credential_file: PathBuf,
    /// Where the token is cached between runs
    pub token_cache: PathBuf,
    pub scopes: Vec<String>,
    #[serde(default)]
    pub browser: bool,
    #[serde(default = "default_port")]
    pub port: PortValue,
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout_secs: u64,
    #[serde(default)]
    pub pkce: bool,
}

/// Callback port, accepted as either `port = "8080"` or `port = 8080`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PortValue {
    Text(String),
    Number(u16),
}

impl PortValue {
    fn as_string(&self) -> String {
        match self {
            PortValue::Text(s) => s.clone(),
            PortValue::Number(n) => n.to_string(),
        }
    }
}

fn default_port() -> PortValue {
    PortValue::Text(gclientauth::constants::DEFAULT_CALLBACK_PORT.to_owned())
}

fn default_exchange_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// `GCLIENTAUTH_CREDENTIALS` and `GCLIENTAUTH_TOKEN_CACHE` replace the
    /// two file paths.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| common::Error::Read {
            path: path.to_owned(),
            source,
        })?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(p) = std::env::var("GCLIENTAUTH_CREDENTIALS") {
            config.credential_file = PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("GCLIENTAUTH_TOKEN_CACHE") {
            config.token_cache = PathBuf::from(p);
        }

        if config.scopes.is_empty() {
            return Err(common::Error::invalid(
                "scopes",
                "at least one scope is required",
            ));
        }

        if config.exchange_timeout_secs == 0 {
            return Err(common::Error::invalid(
                "exchange_timeout_secs",
                "must be greater than 0",
            ));
        }

        let port = config.port.as_string();
        if port.parse::<u16>().is_err() {
            return Err(common::Error::invalid(
                "port",
                format!("must be a number between 0 and 65535, got: {port}"),
            ));
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("gclientauth.toml")
    }

    /// Options for one authorization run.
    pub fn auth_options(&self) -> AuthOptions {
        let mut options = AuthOptions::new(
            &self.credential_file,
            &self.token_cache,
            self.scopes.clone(),
        );
        options.browser = self.browser;
        options.port = self.port.as_string();
        options.exchange_timeout = Some(Duration::from_secs(self.exchange_timeout_secs));
        options.pkce = self.pkce;
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mutex to serialize tests that mutate environment variables, preventing
    /// data races when tests run in parallel.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// SAFETY: Callers must hold ENV_MUTEX to prevent concurrent env mutation.
    unsafe fn set_env(key: &str, val: &str) {
        unsafe { std::env::set_var(key, val) };
    }

    unsafe fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) };
    }

    fn clear_overrides() {
        unsafe {
            remove_env("GCLIENTAUTH_CREDENTIALS");
            remove_env("GCLIENTAUTH_TOKEN_CACHE");
        }
    }

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("gclientauth.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn minimal_toml() -> &'static str {
        r#"
credential_file = "client_secret.json"
token_cache = "accesstoken.json"
scopes = ["https://www.googleapis.com/auth/photoslibrary.readonly"]
"#
    }

    #[test]
    fn test_load_minimal_config_uses_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&write_config(dir.path(), minimal_toml())).unwrap();

        assert_eq!(config.credential_file, PathBuf::from("client_secret.json"));
        assert_eq!(config.token_cache, PathBuf::from("accesstoken.json"));
        assert_eq!(config.scopes.len(), 1);
        assert!(!config.browser);
        assert!(!config.pkce);
        assert_eq!(config.port.as_string(), "8080");
        assert_eq!(config.exchange_timeout_secs, 30);
    }

    #[test]
    fn test_numeric_port_accepted() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let toml = format!("{}port = 9004\nbrowser = true\n", minimal_toml());
        let config = Config::load(&write_config(dir.path(), &toml)).unwrap();
        assert_eq!(config.port.as_string(), "9004");

        let options = config.auth_options();
        assert_eq!(options.port, "9004");
        assert!(options.browser);
        assert_eq!(options.exchange_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_port_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let toml = format!("{}port = \"http\"\n", minimal_toml());
        let err = Config::load(&write_config(dir.path(), &toml)).unwrap_err();
        assert!(err.to_string().contains("port"), "got: {err}");
    }

    #[test]
    fn test_empty_scopes_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let toml = r#"
credential_file = "c.json"
token_cache = "t.json"
scopes = []
"#;
        let err = Config::load(&write_config(dir.path(), toml)).unwrap_err();
        assert!(matches!(
            err,
            common::Error::Invalid {
                field: "scopes",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_overrides();
        let dir = tempfile::tempdir().unwrap();
        let toml = format!("{}exchange_timeout_secs = 0\n", minimal_toml());
        assert!(Config::load(&write_config(dir.path(), &toml)).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/path/gclientauth.toml"));
        assert!(matches!(result, Err(common::Error::Read { .. })));
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let result = Config::load(&write_config(dir.path(), "not valid {{{{ toml"));
        assert!(matches!(result, Err(common::Error::Toml(_))));
    }

    #[test]
    fn test_env_overrides_paths() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path(), minimal_toml());

        unsafe {
            set_env("GCLIENTAUTH_CREDENTIALS", "/etc/gclientauth/web.json");
            set_env("GCLIENTAUTH_TOKEN_CACHE", "/var/cache/token.json");
        }
        let config = Config::load(&path).unwrap();
        clear_overrides();

        assert_eq!(
            config.credential_file,
            PathBuf::from("/etc/gclientauth/web.json")
        );
        assert_eq!(config.token_cache, PathBuf::from("/var/cache/token.json"));
    }

    #[test]
    fn test_resolve_path_cli_arg() {
        let path = Config::resolve_path(Some("/custom/path.toml"));
        assert_eq!(path, PathBuf::from("/custom/path.toml"));
    }

    #[test]
    fn test_resolve_path_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { set_env("CONFIG_PATH", "/env/path.toml") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("/env/path.toml"));
        unsafe { remove_env("CONFIG_PATH") };
    }

    #[test]
    fn test_resolve_path_default() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { remove_env("CONFIG_PATH") };
        let path = Config::resolve_path(None);
        assert_eq!(path, PathBuf::from("gclientauth.toml"));
    }
}
