use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::model::project::Role;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrellisConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub attachments: AttachmentConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentConfig {
    #[serde(default = "default_attachment_root")]
    pub root: PathBuf,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            root: default_attachment_root(),
            max_bytes: default_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_max_page_size")]
    pub max_page_size: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_page_size: default_max_page_size(),
        }
    }
}

impl NotificationConfig {
    /// Resolve a requested page/limit pair: page is 1-based, limit falls back
    /// to `page_size` and is capped at `max_page_size`.
    #[must_use]
    pub fn paging(&self, page: Option<u32>, limit: Option<u32>) -> (u32, u32) {
        let page = page.unwrap_or(1).max(1);
        let limit = limit
            .unwrap_or(self.page_size)
            .clamp(1, self.max_page_size.max(1));
        (page, limit)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
}

/// One accepted bearer token. Only the BLAKE3 hex digest is configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    pub token_blake3: String,
    pub user_id: i64,
    #[serde(default)]
    pub role: Role,
}

/// `<platform config dir>/trellis/trellis.toml`, when a config dir exists.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("trellis").join("trellis.toml"))
}

/// Load configuration.
///
/// An explicit `path` must exist. Without one, the default location is read
/// if present and built-in defaults are used otherwise.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if a token
/// entry is malformed.
pub fn load_config(path: Option<&Path>) -> Result<TrellisConfig> {
    let path = match path {
        Some(path) => {
            if !path.exists() {
                bail!("config file {} does not exist", path.display());
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(TrellisConfig::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = parse_config(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config");
    Ok(config)
}

/// Parse and validate TOML text.
///
/// # Errors
///
/// Returns an error on invalid TOML or a malformed token digest.
pub fn parse_config(content: &str) -> Result<TrellisConfig> {
    let config = toml::from_str::<TrellisConfig>(content)?;
    for token in &config.auth.tokens {
        let digest = token.token_blake3.trim();
        if digest.len() != 64 || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
            bail!(
                "auth token for user {} is not a 64-character BLAKE3 hex digest",
                token.user_id
            );
        }
    }
    Ok(config)
}

impl TrellisConfig {
    /// Apply `TRELLIS_BIND` / `TRELLIS_DB` style overrides from `lookup`.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("TRELLIS_BIND").filter(|v| !v.trim().is_empty()) {
            self.server.bind = bind.trim().to_string();
        }
        if let Some(db) = lookup("TRELLIS_DB").filter(|v| !v.trim().is_empty()) {
            self.store.path = PathBuf::from(db.trim());
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

fn data_root() -> PathBuf {
    dirs::data_dir().map_or_else(|| PathBuf::from(".trellis"), |dir| dir.join("trellis"))
}

fn default_store_path() -> PathBuf {
    data_root().join("trellis.sqlite3")
}

fn default_attachment_root() -> PathBuf {
    data_root().join("blobs")
}

const fn default_max_bytes() -> u64 {
    10 * 1024 * 1024
}

const fn default_page_size() -> u32 {
    20
}

const fn default_max_page_size() -> u32 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = parse_config("").expect("parse");
        assert_eq!(cfg.server.bind, "127.0.0.1:7340");
        assert_eq!(cfg.attachments.max_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.notifications.page_size, 20);
        assert_eq!(cfg.notifications.max_page_size, 100);
        assert!(cfg.auth.tokens.is_empty());
    }

    #[test]
    fn sections_and_tokens_parse() {
        let digest = crate::auth::token_digest("t");
        let cfg = parse_config(&format!(
            r#"
[server]
bind = "0.0.0.0:8080"

[store]
path = "/var/lib/trellis/db.sqlite3"

[notifications]
page_size = 5

[[auth.tokens]]
token_blake3 = "{digest}"
user_id = 3
role = "manager"
"#
        ))
        .expect("parse");

        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.store.path, PathBuf::from("/var/lib/trellis/db.sqlite3"));
        assert_eq!(cfg.notifications.page_size, 5);
        assert_eq!(cfg.notifications.max_page_size, 100);
        assert_eq!(cfg.auth.tokens.len(), 1);
        assert_eq!(cfg.auth.tokens[0].role, Role::Manager);
    }

    #[test]
    fn malformed_digest_is_rejected() {
        let err = parse_config(
            r#"
[[auth.tokens]]
token_blake3 = "plaintext"
user_id = 1
"#,
        )
        .expect_err("reject");
        assert!(err.to_string().contains("BLAKE3"));
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_config(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn explicit_path_is_read() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("trellis.toml");
        std::fs::write(&path, "[server]\nbind = \"127.0.0.1:9\"\n").expect("write");
        let cfg = load_config(Some(&path)).expect("load");
        assert_eq!(cfg.server.bind, "127.0.0.1:9");
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> =
            HashMap::from([("TRELLIS_BIND", "0.0.0.0:1"), ("TRELLIS_DB", " /tmp/x.db ")]);
        let mut cfg = TrellisConfig::default();
        cfg.apply_env_overrides(|key| env.get(key).map(ToString::to_string));
        assert_eq!(cfg.server.bind, "0.0.0.0:1");
        assert_eq!(cfg.store.path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn paging_clamps_limit() {
        let cfg = NotificationConfig::default();
        assert_eq!(cfg.paging(None, None), (1, 20));
        assert_eq!(cfg.paging(Some(0), Some(500)), (1, 100));
        assert_eq!(cfg.paging(Some(3), Some(0)), (3, 1));
    }
}
