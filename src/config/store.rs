use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{AppConfig, CaptureBackendKind};
use crate::error::{AppError, Result};

/// Configuration store backed by a TOML file
///
/// Two layers are kept: the persisted configuration, which is what
/// [`ConfigStore::update`] edits and writes back, and the effective
/// configuration returned by [`ConfigStore::get`], which is the persisted
/// one with the command-line [`ConfigOverrides`] applied on top.
///
/// Both layers use `ArcSwap` for lock-free reads, providing high
/// performance for frequent configuration access in hot paths.
#[derive(Clone)]
pub struct ConfigStore {
    path: Option<PathBuf>,
    /// What is on disk (or would be)
    stored: Arc<ArcSwap<AppConfig>>,
    /// Lock-free cache of the effective configuration
    cache: Arc<ArcSwap<AppConfig>>,
    overrides: Arc<ConfigOverrides>,
    change_tx: broadcast::Sender<ConfigChange>,
}

/// Configuration change event
#[derive(Debug, Clone)]
pub struct ConfigChange {
    pub key: String,
}

/// Runtime-only values layered over the persisted configuration
///
/// Set from command-line flags. They win over the file and over API
/// updates, and are never written back.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub bind_address: Option<String>,
    pub http_port: Option<u16>,
    /// WHIP ingest base URL
    pub ingest_url: Option<String>,
    pub stream_key: Option<String>,
    pub capture_backend: Option<CaptureBackendKind>,
}

impl ConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.bind_address.is_none()
            && self.http_port.is_none()
            && self.ingest_url.is_none()
            && self.stream_key.is_none()
            && self.capture_backend.is_none()
    }

    /// Apply every set override to `config`
    ///
    /// # Arguments
    /// * `config` - Configuration to modify in place, usually a clone of the
    ///   persisted one
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(ref addr) = self.bind_address {
            config.web.bind_address = addr.clone();
        }
        if let Some(port) = self.http_port {
            config.web.http_port = port;
        }
        if let Some(ref url) = self.ingest_url {
            config.ingest.base_url = url.clone();
        }
        if let Some(ref key) = self.stream_key {
            config.ingest.stream_key = key.clone();
        }
        if let Some(backend) = self.capture_backend {
            config.capture.backend = backend;
        }
    }
}

impl ConfigStore {
    /// Open a configuration file, creating it with defaults when missing
    pub async fn open(path: &Path) -> Result<Self> {
        let config = match tokio::fs::read_to_string(path).await {
            Ok(text) => toml::from_str::<AppConfig>(&text)
                .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("Config file {} not found, writing defaults", path.display());
                let config = AppConfig::default();
                Self::save_to_file(path, &config).await?;
                config
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::build(Some(path.to_path_buf()), config))
    }

    /// In-memory store (nothing persisted)
    pub fn in_memory(config: AppConfig) -> Self {
        Self::build(None, config)
    }

    fn build(path: Option<PathBuf>, config: AppConfig) -> Self {
        let (change_tx, _) = broadcast::channel(16);
        Self {
            path,
            cache: Arc::new(ArcSwap::from_pointee(config.clone())),
            stored: Arc::new(ArcSwap::from_pointee(config)),
            overrides: Arc::new(ConfigOverrides::default()),
            change_tx,
        }
    }

    /// Layer runtime overrides over the persisted configuration
    ///
    /// # Example
    /// ```ignore
    /// let store = ConfigStore::open(path).await?.with_overrides(ConfigOverrides {
    ///     stream_key: Some("live_abc".into()),
    ///     ..Default::default()
    /// });
    /// assert_eq!(store.get().ingest.stream_key, "live_abc");
    /// ```
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if !overrides.is_empty() {
            debug!("Runtime config overrides: {:?}", overrides);
        }
        self.overrides = Arc::new(overrides);
        self.refresh();
        self
    }

    fn refresh(&self) {
        let mut effective = (**self.stored.load()).clone();
        self.overrides.apply(&mut effective);
        self.cache.store(Arc::new(effective));
    }

    /// Write atomically: temp file in the same directory, then rename
    async fn save_to_file(path: &Path, config: &AppConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let text = toml::to_string_pretty(config).map_err(|e| AppError::Config(e.to_string()))?;
        let tmp = path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, path).await?;
        debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Get the effective configuration (lock-free, zero-copy)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Get the persisted configuration, without overrides
    pub fn stored(&self) -> Arc<AppConfig> {
        self.stored.load_full()
    }

    /// Replace the persisted configuration
    pub async fn set(&self, config: AppConfig) -> Result<()> {
        if let Some(ref path) = self.path {
            Self::save_to_file(path, &config).await?;
        }
        self.stored.store(Arc::new(config));
        self.refresh();

        let _ = self.change_tx.send(ConfigChange {
            key: "app_config".to_string(),
        });

        Ok(())
    }

    /// Update the persisted configuration with a closure
    ///
    /// Read-modify-write; for concurrent updates the last write wins.
    pub async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = (**self.stored.load()).clone();
        f(&mut config);
        self.set(config).await
    }

    /// Subscribe to configuration changes
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
