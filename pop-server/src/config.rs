//! Server configuration: command line, environment and the LAO file.
//!
//! The LAO file is TOML:
//!
//! ```toml
//! [[lao]]
//! id = "fzJSZjKf-2cbXH7kds9H8NORuuFIRLkevJlN7qQemjo="
//! organizer = "J9fBzJV70Jk5c-i3277Uq4CmeL4t53WDfUghaK0HpeM="
//! attendees = ["M5ZychEi5rwm22FjwjNuljL1qMJWLwbRXvlUc8ZmWWE="]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::crypto::{self, ServerKeys};

/// Longest accepted request line, in bytes.
pub const DEFAULT_MAX_LINE_LEN: usize = 1 << 20;

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "pop-server", about = "Proof-of-personhood election hub")]
pub struct ServerConfig {
    /// Address to accept JSON-RPC connections on (host:port)
    #[arg(long, env = "POP_LISTEN_ADDR", default_value = "127.0.0.1:9000")]
    pub listen_addr: String,

    /// File holding the server's base64url Ed25519 secret key; created if missing
    #[arg(long, env = "POP_SERVER_KEY_FILE")]
    pub server_key_file: Option<PathBuf>,

    /// TOML file declaring the LAOs, their organizer and attendees
    #[arg(long, env = "POP_LAO_FILE")]
    pub lao_file: Option<PathBuf>,

    /// Maximum length of one request line in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_LEN)]
    pub max_line_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:9000".to_string(),
            server_key_file: None,
            lao_file: None,
            max_line_len: DEFAULT_MAX_LINE_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LaoFile {
    #[serde(default)]
    pub lao: Vec<LaoEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaoEntry {
    pub id: String,
    /// Organizer public key, base64url.
    pub organizer: String,
    #[serde(default)]
    pub attendees: Vec<String>,
}

pub fn load_lao_file(path: &Path) -> Result<LaoFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("can't read LAO file {}", path.display()))?;
    let file: LaoFile = toml::from_str(&raw)
        .with_context(|| format!("bad LAO file {}", path.display()))?;
    for lao in &file.lao {
        crypto::parse_public_key(&lao.organizer)
            .with_context(|| format!("bad organizer key for LAO {}", lao.id))?;
    }
    Ok(file)
}

/// Load the server key from `path`, or generate one and write it there.
/// Without a path the key is ephemeral.
pub fn load_or_create_server_key(path: Option<&Path>) -> Result<ServerKeys> {
    let Some(path) = path else {
        tracing::warn!("No server key file configured, using an ephemeral key");
        return Ok(ServerKeys::generate());
    };

    if path.exists() {
        let secret = std::fs::read_to_string(path)
            .with_context(|| format!("can't read server key {}", path.display()))?;
        let keys = ServerKeys::from_secret(secret.trim())
            .with_context(|| format!("bad server key in {}", path.display()))?;
        tracing::info!(public_key = %keys.public_key_b64(), "Loaded server key");
        return Ok(keys);
    }

    let keys = ServerKeys::generate();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("can't create {}", dir.display()))?;
    }
    std::fs::write(path, keys.secret())
        .with_context(|| format!("can't write server key {}", path.display()))?;
    tracing::info!(public_key = %keys.public_key_b64(), path = %path.display(), "Generated server key");
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_lao_file() {
        let dir = tempfile::tempdir().unwrap();
        let organizer = ServerKeys::generate().public_key_b64();
        let path = dir.path().join("laos.toml");
        std::fs::write(
            &path,
            format!(
                "[[lao]]\nid = \"L\"\norganizer = \"{organizer}\"\nattendees = [\"a\", \"b\"]\n"
            ),
        )
        .unwrap();

        let file = load_lao_file(&path).unwrap();
        assert_eq!(file.lao.len(), 1);
        assert_eq!(file.lao[0].id, "L");
        assert_eq!(file.lao[0].attendees, vec!["a", "b"]);
    }

    #[test]
    fn rejects_bad_organizer_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("laos.toml");
        std::fs::write(&path, "[[lao]]\nid = \"L\"\norganizer = \"nope\"\n").unwrap();
        assert!(load_lao_file(&path).is_err());
    }

    #[test]
    fn server_key_is_created_then_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/server.key");

        let first = load_or_create_server_key(Some(&path)).unwrap();
        assert!(path.exists());
        let second = load_or_create_server_key(Some(&path)).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn cli_defaults() {
        let config = ServerConfig::parse_from(["pop-server"]);
        assert_eq!(config.max_line_len, DEFAULT_MAX_LINE_LEN);
        assert!(config.lao_file.is_none());
    }
}
