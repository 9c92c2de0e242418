// Configuration loading and parsing (client.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// client.toml structs
// ---------------------------------------------------------------------------

/// The assembled client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// REST host, e.g. `http://172.20.10.10:8000`. Endpoint paths are
    /// appended to it verbatim.
    pub base_url: String,
    /// Full WebSocket URL of the chat room.
    pub chat_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// Where the session database lives. `None` means the platform data
    /// directory.
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            max_attempts: 0,
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    15
}

const DB_FILE_NAME: &str = "session.db";

impl ClientConfig {
    /// Resolve the session database path.
    ///
    /// An explicit `storage.db_path` wins. Otherwise the database goes in the
    /// platform data directory (created on demand), falling back to
    /// `eventhub.db` in the working directory when no home directory exists.
    pub fn db_path(&self) -> PathBuf {
        if let Some(path) = &self.storage.db_path {
            return PathBuf::from(path);
        }
        match directories::ProjectDirs::from("org", "eventhub", "eventhub") {
            Some(dirs) => {
                let dir = dirs.data_dir();
                if std::fs::create_dir_all(dir).is_ok() {
                    dir.join(DB_FILE_NAME)
                } else {
                    PathBuf::from("eventhub.db")
                }
            }
            None => PathBuf::from("eventhub.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate `config/client.toml` relative to `base_dir`.
///
/// This does not copy defaults; prefer `load_config()` for the normal
/// startup path.
pub fn load_config_from(base_dir: &Path) -> Result<ClientConfig, ConfigError> {
    let path = base_dir.join("config").join("client.toml");
    let text = read_file(&path)?;
    let config = parse_config(&text, &path)?;
    validate(&config)?;
    Ok(config)
}

/// Parse config text. `path` is only used for error reporting.
pub fn parse_config(text: &str, path: &Path) -> Result<ClientConfig, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Copy `defaults/client.toml` to `config/client.toml` unless the latter
/// already exists. Returns the path written, if any.
pub fn ensure_config_file(base_dir: &Path) -> Result<Option<PathBuf>, ConfigError> {
    let target = base_dir.join("config").join("client.toml");
    if target.exists() {
        return Ok(None);
    }

    let source = base_dir.join("defaults").join("client.toml");
    if !source.is_file() {
        return Err(ConfigError::DefaultsCopyError {
            message: format!(
                "neither {} nor {} exists",
                target.display(),
                source.display()
            ),
        });
    }

    if let Some(dir) = target.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::DefaultsCopyError {
            message: format!("failed to create {}: {e}", dir.display()),
        })?;
    }
    std::fs::copy(&source, &target).map_err(|e| ConfigError::DefaultsCopyError {
        message: format!("failed to copy {}: {e}", source.display()),
    })?;
    Ok(Some(target))
}

/// Loads config relative to the current working directory, copying default
/// files first.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_file(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &ClientConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if !(server.base_url.starts_with("http://") || server.base_url.starts_with("https://")) {
        return Err(ConfigError::ValidationError {
            field: "server.base_url".into(),
            message: format!("must start with http:// or https://, got {}", server.base_url),
        });
    }

    if !(server.chat_url.starts_with("ws://") || server.chat_url.starts_with("wss://")) {
        return Err(ConfigError::ValidationError {
            field: "server.chat_url".into(),
            message: format!("must start with ws:// or wss://, got {}", server.chat_url),
        });
    }

    if server.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.request_timeout_secs".into(),
            message: "must be greater than 0".into(),
        });
    }

    let reconnect = &config.chat.reconnect;
    if reconnect.max_attempts > 0 && reconnect.initial_delay_ms == 0 {
        return Err(ConfigError::ValidationError {
            field: "chat.reconnect.initial_delay_ms".into(),
            message: "must be > 0 when reconnect is enabled".into(),
        });
    }

    if reconnect.max_delay_ms < reconnect.initial_delay_ms {
        return Err(ConfigError::ValidationError {
            field: "chat.reconnect.max_delay_ms".into(),
            message: format!(
                "must be >= initial_delay_ms ({}), got {}",
                reconnect.initial_delay_ms, reconnect.max_delay_ms
            ),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const VALID: &str = r#"
[server]
base_url = "http://localhost:8000"
chat_url = "ws://localhost:8000/ws/chat/lobby/"
request_timeout_secs = 5

[chat.reconnect]
max_attempts = 3
initial_delay_ms = 100
max_delay_ms = 1000
"#;

    /// Path to the workspace `defaults/` directory.
    fn defaults_dir() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../defaults")
    }

    /// Helper: fresh temp dir with `config/client.toml` containing `text`.
    fn temp_config(name: &str, text: &str) -> PathBuf {
        let tmp = std::env::temp_dir().join(name);
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("config")).unwrap();
        fs::write(tmp.join("config/client.toml"), text).unwrap();
        tmp
    }

    #[test]
    fn shipped_defaults_are_valid() {
        let text = fs::read_to_string(defaults_dir().join("client.toml"))
            .expect("defaults/client.toml should exist");
        let config = parse_config(&text, Path::new("client.toml")).unwrap();
        validate(&config).unwrap();

        assert_eq!(config.server.base_url, "http://172.20.10.10:8000");
        assert_eq!(
            config.server.chat_url,
            "ws://172.20.10.10:8000/ws/chat/lobby/"
        );
        assert_eq!(config.server.request_timeout_secs, 15);
        assert!(config.storage.db_path.is_none());
        assert_eq!(config.chat.reconnect.max_attempts, 5);
    }

    #[test]
    fn load_valid_config() {
        let tmp = temp_config("eventhub_config_valid", VALID);
        let config = load_config_from(&tmp).expect("should load");
        assert_eq!(config.server.base_url, "http://localhost:8000");
        assert_eq!(config.server.request_timeout_secs, 5);
        assert_eq!(config.chat.reconnect.max_attempts, 3);
        assert_eq!(config.chat.reconnect.initial_delay_ms, 100);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn optional_sections_default() {
        let text = r#"
[server]
base_url = "https://events.example"
chat_url = "wss://events.example/ws/chat/lobby/"
"#;
        let tmp = temp_config("eventhub_config_minimal", text);
        let config = load_config_from(&tmp).unwrap();
        assert_eq!(config.server.request_timeout_secs, 15);
        assert_eq!(config.chat.reconnect.max_attempts, 0);
        assert!(config.storage.db_path.is_none());
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn explicit_db_path_wins() {
        let text = format!("{VALID}\n[storage]\ndb_path = \"custom.db\"\n");
        let config = parse_config(&text, Path::new("client.toml")).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("custom.db"));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let text = VALID.replace("http://localhost:8000\"", "ftp://localhost\"");
        let tmp = temp_config("eventhub_config_bad_base", &text);
        let err = load_config_from(&tmp).unwrap_err();
        match err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "server.base_url"),
            other => panic!("expected ValidationError, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_non_ws_chat_url() {
        let text = VALID.replace("ws://localhost:8000/ws/chat/lobby/", "http://localhost/chat");
        let tmp = temp_config("eventhub_config_bad_chat", &text);
        let err = load_config_from(&tmp).unwrap_err();
        match err {
            ConfigError::ValidationError { field, .. } => assert_eq!(field, "server.chat_url"),
            other => panic!("expected ValidationError, got {other:?}"),
        }
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_zero_timeout() {
        let text = VALID.replace("request_timeout_secs = 5", "request_timeout_secs = 0");
        let tmp = temp_config("eventhub_config_zero_timeout", &text);
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "server.request_timeout_secs"));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn rejects_max_delay_below_initial() {
        let text = VALID.replace("max_delay_ms = 1000", "max_delay_ms = 50");
        let tmp = temp_config("eventhub_config_bad_delay", &text);
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "chat.reconnect.max_delay_ms"));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn file_not_found_for_missing_client_toml() {
        let tmp = std::env::temp_dir().join("eventhub_config_missing");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let tmp = temp_config("eventhub_config_invalid", "[server\nbase_url = ");
        let err = load_config_from(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_file_copies_once_and_keeps_edits() {
        let tmp = std::env::temp_dir().join("eventhub_config_ensure");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(tmp.join("defaults")).unwrap();
        fs::write(tmp.join("defaults/client.toml"), VALID).unwrap();

        let copied = ensure_config_file(&tmp).unwrap();
        assert_eq!(copied, Some(tmp.join("config/client.toml")));
        assert!(load_config_from(&tmp).is_ok());

        // Second run copies nothing and leaves local edits alone.
        fs::write(tmp.join("config/client.toml"), "# edited").unwrap();
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);
        assert_eq!(
            fs::read_to_string(tmp.join("config/client.toml")).unwrap(),
            "# edited"
        );
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_file_without_defaults_uses_existing_config() {
        let tmp = temp_config("eventhub_config_no_defaults", VALID);
        assert_eq!(ensure_config_file(&tmp).unwrap(), None);
        let _ = fs::remove_dir_all(&tmp);
    }

    #[test]
    fn ensure_config_file_errors_when_both_files_missing() {
        let tmp = std::env::temp_dir().join("eventhub_config_no_dirs");
        let _ = fs::remove_dir_all(&tmp);
        fs::create_dir_all(&tmp).unwrap();
        let err = ensure_config_file(&tmp).unwrap_err();
        assert!(matches!(err, ConfigError::DefaultsCopyError { .. }));
        let _ = fs::remove_dir_all(&tmp);
    }
}
