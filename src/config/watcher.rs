//! Hot reload of the client and server policies.
//!
//! The parent directory is watched rather than the file itself so that
//! editors which save by rename are still picked up. Only policies that
//! actually changed are pushed to the receiver.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::{ClientPolicy, ServerPolicy, TransportConfig};

/// Policies that differ from the previously applied configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyUpdate {
    pub client: Option<ClientPolicy>,
    pub server: Option<ServerPolicy>,
}

impl PolicyUpdate {
    pub fn is_empty(&self) -> bool {
        self.client.is_none() && self.server.is_none()
    }
}

/// Last applied policies, compared against every reload.
#[derive(Debug)]
struct Applied {
    client: ClientPolicy,
    server: ServerPolicy,
}

impl Applied {
    fn update(&mut self, next: TransportConfig) -> PolicyUpdate {
        let mut update = PolicyUpdate::default();
        if next.client != self.client {
            self.client = next.client.clone();
            update.client = Some(next.client);
        }
        if next.server != self.server {
            self.server = next.server.clone();
            update.server = Some(next.server);
        }
        update
    }
}

/// Watches one TOML file and sends a [`PolicyUpdate`] per effective change.
pub struct ConfigWatcher {
    path: PathBuf,
    applied: Mutex<Applied>,
    update_tx: mpsc::UnboundedSender<PolicyUpdate>,
}

impl ConfigWatcher {
    /// `initial` is the configuration already in force.
    pub fn new(
        path: &Path,
        initial: &TransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<PolicyUpdate>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let applied = Applied {
            client: initial.client.clone(),
            server: initial.server.clone(),
        };
        (
            Self {
                path: path.to_path_buf(),
                applied: Mutex::new(applied),
                update_tx,
            },
            update_rx,
        )
    }

    /// Reload the file and forward whatever changed. Returns the update sent,
    /// or `None` when the file failed to load or nothing changed.
    pub fn reload(&self) -> Option<PolicyUpdate> {
        let next = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = ?self.path, error = %e, "Config reload failed, keeping current policies");
                return None;
            }
        };
        let update = match self.applied.lock() {
            Ok(mut applied) => applied.update(next),
            Err(_) => return None,
        };
        if update.is_empty() {
            tracing::debug!(path = ?self.path, "Config reloaded without policy changes");
            return None;
        }
        tracing::info!(
            path = ?self.path,
            client = update.client.is_some(),
            server = update.server.is_some(),
            "Policy change detected"
        );
        let _ = self.update_tx.send(update.clone());
        Some(update)
    }

    fn concerns_file(&self, event: &Event) -> bool {
        let name = self.path.file_name();
        (event.kind.is_modify() || event.kind.is_create())
            && event.paths.iter().any(|p| p.file_name() == name)
    }

    /// Start watching on notify's background thread.
    ///
    /// The returned watcher must be kept alive for updates to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let directory = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if self.concerns_file(&event) => {
                    self.reload();
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}
