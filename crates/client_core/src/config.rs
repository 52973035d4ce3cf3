use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use shared::domain::UserId;
use tracing::{debug, info};
use url::Url;

const SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub server_url: String,
    pub ws_path: String,
    pub identity_path: PathBuf,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".into(),
            ws_path: "/chat/websocket".into(),
            identity_path: PathBuf::from("./data/identity.toml"),
        }
    }
}

impl ClientSettings {
    pub fn base_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    /// WebSocket endpoint on the same host: `http` maps to `ws`, `https` to `wss`.
    pub fn ws_url(&self) -> Result<String> {
        let mut url = Url::parse(self.base_url())
            .with_context(|| format!("invalid server url '{}'", self.server_url))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => bail!("unsupported server url scheme '{other}'"),
        };
        if url.set_scheme(scheme).is_err() {
            bail!("cannot derive websocket url from '{}'", self.server_url);
        }
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{base_path}/{}", self.ws_path.trim_start_matches('/')));
        Ok(url.to_string())
    }

    /// Environment overrides; `APP__*` wins over the short names.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CHAT_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("APP__SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = lookup("APP__WS_PATH") {
            self.ws_path = v;
        }
        if let Some(v) = lookup("APP__IDENTITY_PATH") {
            self.identity_path = PathBuf::from(v);
        }
    }
}

/// Defaults, then `client.toml` in the working directory, then the environment.
pub fn load_settings() -> Result<ClientSettings> {
    load_settings_from(Path::new(SETTINGS_FILE))
}

pub fn load_settings_from(path: &Path) -> Result<ClientSettings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<ClientSettings>(&raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?,
        Err(_) => {
            debug!(path = %path.display(), "config: no settings file, using defaults");
            ClientSettings::default()
        }
    };
    settings.apply_env_overrides(|key| std::env::var(key).ok());
    Ok(settings)
}

/// Who the local user is, as established by the login step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct IdentityStore {
    path: PathBuf,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Identity>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read identity '{}'", self.path.display()))
            }
        };
        let identity = toml::from_str(&raw)
            .with_context(|| format!("invalid identity file '{}'", self.path.display()))?;
        Ok(Some(identity))
    }

    pub fn save(&self, identity: &Identity) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create identity directory '{}'", parent.display())
            })?;
        }
        let raw = toml::to_string(identity).context("failed to serialize identity")?;
        fs::write(&self.path, raw)
            .with_context(|| format!("failed to write identity '{}'", self.path.display()))?;
        info!(user_id = identity.user_id.0, "config: identity saved");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("failed to remove identity '{}'", self.path.display())),
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
