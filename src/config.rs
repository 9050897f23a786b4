use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

use crate::client::loopback::DEFAULT_LOOPBACK_CODE;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "telebridge.yaml";

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    /// Load configuration from a YAML file. A missing file yields defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path.as_ref()).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::from_yaml(&contents)
    }

    /// Parse configuration from YAML text, expanding environment variables first.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }
}

/// Resolve a path relative to the config file directory.
///
/// Absolute paths are returned as-is.
pub fn resolve_path(config_path: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }

    let config_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    config_dir.join(path)
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_connections() -> usize {
    256
}

fn default_operation_timeout() -> u64 {
    120
}

fn default_call_timeout() -> u64 {
    60
}

fn default_loopback_code() -> String {
    DEFAULT_LOOPBACK_CODE.to_string()
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand `${VAR}`, `${VAR:-default}` and `$$` in configuration text.
///
/// `${VAR}` errors when unset; `${VAR:-}` expands to an empty string.
/// A `$` not followed by `{` or `$` is kept as-is. No nested expansion.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            result.push('$');
            rest = tail;
        } else if let Some(body) = after.strip_prefix('{') {
            let end = body.find('}').ok_or(ConfigError::UnclosedVarReference)?;
            result.push_str(&lookup_var(&body[..end])?);
            rest = &body[end + 1..];
        } else {
            result.push('$');
            rest = after;
        }
    }

    result.push_str(rest);
    Ok(result)
}

fn lookup_var(reference: &str) -> Result<String, ConfigError> {
    let (name, default) = match reference.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (reference, None),
    };

    match (std::env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on a whole HTTP request, including the session wait.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            max_connections: default_max_connections(),
        }
    }
}

// ============================================================================
// SessionsConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionsConfig {
    /// How long a caller waits for its operation's outcome. `0` waits forever.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_seconds: u64,
}

impl SessionsConfig {
    pub fn operation_timeout(&self) -> Option<Duration> {
        match self.operation_timeout_seconds {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            operation_timeout_seconds: default_operation_timeout(),
        }
    }
}

// ============================================================================
// ClientConfig
// ============================================================================

/// Messaging client backend, selected by the `backend` key.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ClientConfig {
    Loopback(LoopbackConfig),
    Subprocess(SubprocessConfig),
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::Loopback(LoopbackConfig::default())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoopbackConfig {
    /// Confirmation code the in-memory service accepts.
    #[serde(default = "default_loopback_code")]
    pub code: String,
    /// Phone numbers registered on the in-memory service.
    #[serde(default)]
    pub users: Vec<String>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            code: default_loopback_code(),
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubprocessConfig {
    /// Bridge executable. Relative paths containing a separator are resolved
    /// against the config file directory.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_seconds: u64,
}

// ============================================================================
// CredentialsConfig
// ============================================================================

/// Messaging service application credentials, handed to bridge processes.
#[derive(Clone, Default, Deserialize)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub api_id: Option<u64>,
    #[serde(default)]
    pub api_hash: Option<String>,
}

impl std::fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("api_id", &self.api_id)
            .field("api_hash", &self.api_hash.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.request_timeout_seconds, 300);
        assert_eq!(
            config.sessions.operation_timeout(),
            Some(Duration::from_secs(120))
        );
        assert!(matches!(config.client, ClientConfig::Loopback(ref l) if l.code == "00000"));
    }

    #[test]
    fn test_parse_subprocess_backend() {
        let yaml = r#"
server:
  port: 9000
sessions:
  operation_timeout_seconds: 0
client:
  backend: subprocess
  command: ./bridges/tg-bridge
  args: ["--verbose"]
  call_timeout_seconds: 15
credentials:
  api_id: 12345
  api_hash: abcdef
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.sessions.operation_timeout(), None);
        match config.client {
            ClientConfig::Subprocess(sub) => {
                assert_eq!(sub.command, "./bridges/tg-bridge");
                assert_eq!(sub.args, vec!["--verbose".to_string()]);
                assert_eq!(sub.call_timeout_seconds, 15);
            }
            other => panic!("expected subprocess backend, got {other:?}"),
        }
        assert_eq!(config.credentials.api_id, Some(12345));
    }

    #[test]
    fn test_parse_loopback_users() {
        let yaml = r#"
client:
  backend: loopback
  code: "424242"
  users: ["+15550001", "+15550002"]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        match config.client {
            ClientConfig::Loopback(l) => {
                assert_eq!(l.code, "424242");
                assert_eq!(l.users.len(), 2);
            }
            other => panic!("expected loopback backend, got {other:?}"),
        }
    }

    #[test]
    fn test_credentials_debug_redacts_hash() {
        let creds = CredentialsConfig {
            api_id: Some(1),
            api_hash: Some("secret".to_string()),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_expand_plain_dollar_and_escape() {
        assert_eq!(expand_env_vars("price: $100").unwrap(), "price: $100");
        assert_eq!(expand_env_vars("a: $${X}").unwrap(), "a: ${X}");
    }

    #[test]
    fn test_expand_default_value() {
        let out = expand_env_vars("host: ${TELEBRIDGE_TEST_UNSET_HOST:-127.0.0.1}").unwrap();
        assert_eq!(out, "host: 127.0.0.1");

        let out = expand_env_vars("key: ${TELEBRIDGE_TEST_UNSET_KEY:-}").unwrap();
        assert_eq!(out, "key: ");
    }

    #[test]
    fn test_expand_set_variable() {
        // PATH is set in any environment that can run the tests.
        let path = std::env::var("PATH").unwrap();
        assert_eq!(expand_env_vars("p: ${PATH}").unwrap(), format!("p: {path}"));
    }

    #[test]
    fn test_expand_missing_variable_errors() {
        let err = expand_env_vars("${TELEBRIDGE_TEST_DEFINITELY_UNSET}").unwrap_err();
        assert!(
            matches!(err, ConfigError::MissingEnvVar(ref name) if name == "TELEBRIDGE_TEST_DEFINITELY_UNSET")
        );
    }

    #[test]
    fn test_expand_unclosed_reference_errors() {
        assert!(matches!(
            expand_env_vars("x: ${OOPS"),
            Err(ConfigError::UnclosedVarReference)
        ));
    }

    #[tokio::test]
    async fn test_load_missing_file_yields_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::load(tmp.path().join("absent.yaml")).await.unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("telebridge.yaml");
        std::fs::write(&path, "server:\n  port: 7001\n").unwrap();

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.server.port, 7001);
    }

    #[test]
    fn test_resolve_path() {
        let config_path = Path::new("/etc/telebridge/telebridge.yaml");
        assert_eq!(
            resolve_path(config_path, Path::new("bridges/tg")),
            PathBuf::from("/etc/telebridge/bridges/tg")
        );
        assert_eq!(
            resolve_path(config_path, Path::new("/opt/bridge")),
            PathBuf::from("/opt/bridge")
        );
    }
}
