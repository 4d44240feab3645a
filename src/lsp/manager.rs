// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

use anyhow::{Context, Result, anyhow, bail};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::client::{ClientOptions, LanguageClient, LspClient};
use crate::config::Config;

/// Owns one client per language, spawned on first use.
///
/// A dead connection is not restarted behind the caller's back; it stays in
/// place until [`ClientManager::reconnect`] is called. A language whose
/// server fails to start is disabled until then as well.
pub struct ClientManager {
    config: Config,
    root: PathBuf,
    active_clients: Mutex<HashMap<String, Arc<LspClient>>>,
    disabled: std::sync::Mutex<HashSet<String>>,
}

impl ClientManager {
    /// Creates a new `ClientManager`.
    #[must_use]
    pub fn new(config: Config, root: PathBuf) -> Self {
        Self {
            config,
            root,
            active_clients: Mutex::new(HashMap::new()),
            disabled: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// The configuration servers are spawned from.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Gets the client for `lang`, spawning and initializing it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The language is disabled after an earlier failure.
    /// - No LSP server is configured for the language.
    /// - The cached server has died and has not been reconnected.
    /// - The server fails to spawn or to initialize.
    pub async fn get_client(&self, lang: &str) -> Result<Arc<LspClient>> {
        if self.is_disabled(lang) {
            bail!("Language '{lang}' is disabled after a failed start");
        }

        let mut clients = self.active_clients.lock().await;
        if let Some(client) = clients.get(lang) {
            if client.is_alive() {
                return Ok(client.clone());
            }
            bail!("LSP server for '{lang}' has exited; reconnect to restart it");
        }

        let client = match self.start(lang).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                warn!("Disabling {}: {:#}", lang, e);
                self.disabled
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(lang.to_string());
                return Err(e);
            }
        };
        clients.insert(lang.to_string(), client.clone());
        drop(clients);

        Ok(client)
    }

    async fn start(&self, lang: &str) -> Result<LspClient> {
        let server_config = self
            .config
            .server
            .get(lang)
            .ok_or_else(|| anyhow!("No LSP server configured for language '{lang}'"))?;
        server_config.validate()?;

        info!(
            "Spawning LSP server for {}: {} {}",
            lang,
            server_config.command,
            server_config.args.join(" ")
        );

        let client = LspClient::spawn(lang, server_config, ClientOptions::from(&self.config))
            .with_context(|| format!("Failed to spawn '{}'", server_config.command))?;

        if let Err(e) = client
            .initialize(&self.root, server_config.initialization_options.clone())
            .await
        {
            client.shutdown().await;
            return Err(e).with_context(|| format!("Failed to initialize server for '{lang}'"));
        }
        Ok(client)
    }

    /// Client for `lang` behind the language-neutral interface.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_client`].
    pub async fn for_language(&self, lang: &str) -> Result<Arc<dyn LanguageClient>> {
        let client: Arc<dyn LanguageClient> = self.get_client(lang).await?;
        Ok(client)
    }

    /// Client for the language `path` belongs to.
    ///
    /// # Errors
    ///
    /// Returns an error if no language is known for the path, or as
    /// [`Self::get_client`].
    pub async fn for_path(&self, path: &Path) -> Result<Arc<dyn LanguageClient>> {
        let lang = self
            .config
            .language_for(path)
            .ok_or_else(|| anyhow!("No language known for {}", path.display()))?;
        self.for_language(&lang).await
    }

    /// True if `lang` failed to start and has not been reconnected.
    pub fn is_disabled(&self, lang: &str) -> bool {
        self.disabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(lang)
    }

    /// Drops any existing client for `lang`, re-enables it, and starts a
    /// fresh one.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_client`] for the new server.
    pub async fn reconnect(&self, lang: &str) -> Result<Arc<LspClient>> {
        self.shutdown_client(lang).await;
        self.disabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(lang);
        self.get_client(lang).await
    }

    /// Returns a snapshot of all currently active clients.
    pub async fn active_clients(&self) -> HashMap<String, Arc<LspClient>> {
        self.active_clients.lock().await.clone()
    }

    /// Shuts down a specific client if it exists.
    pub async fn shutdown_client(&self, lang: &str) {
        let client = self.active_clients.lock().await.remove(lang);
        if let Some(client) = client {
            info!("Shutting down LSP server for {}", lang);
            client.shutdown().await;
        }
    }

    /// Shuts down all active clients.
    pub async fn shutdown_all(&self) {
        let clients: Vec<_> = self.active_clients.lock().await.drain().collect();
        for (lang, client) in clients {
            info!("Shutting down LSP server for {}", lang);
            client.shutdown().await;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[tokio::test]
    async fn test_unconfigured_language_is_an_error() {
        let manager = ClientManager::new(Config::default(), PathBuf::from("/tmp"));
        let err = manager.get_client("cobol").await.err().unwrap();
        assert!(err.to_string().contains("No LSP server configured"));
        assert!(manager.is_disabled("cobol"));
    }

    #[tokio::test]
    async fn test_failed_spawn_disables_until_reconnect() {
        let mut config = Config::default();
        config.server.insert(
            "python".to_string(),
            ServerConfig::new("/nonexistent/langiq-test-server", Vec::new()),
        );
        let manager = ClientManager::new(config, PathBuf::from("/tmp"));

        assert!(manager.get_client("python").await.is_err());
        assert!(manager.is_disabled("python"));

        let err = manager.get_client("python").await.err().unwrap();
        assert!(err.to_string().contains("disabled"));

        // Reconnect clears the flag and tries again, which fails again.
        assert!(manager.reconnect("python").await.is_err());
        assert!(manager.is_disabled("python"));
        assert!(manager.active_clients().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_extension() {
        let manager = ClientManager::new(Config::default(), PathBuf::from("/tmp"));
        assert!(manager.for_path(Path::new("/tmp/README")).await.is_err());
    }
}
