use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ArcadeError;

// =============================================================================
// File config (figment-deserialized from defaults / arcade.toml / env vars)
// =============================================================================
//
//   arcade.toml:     [snapshots]
//                    period_secs = 30
//
//   env var:         ARCADE_SNAPSHOTS__PERIOD_SECS=30   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub sessions: SessionsFileConfig,
    #[serde(default)]
    pub snapshots: SnapshotFileConfig,
    #[serde(default)]
    pub viewers: ViewerFileConfig,
}

/// Listener settings (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Host (and port) advertised in join links; defaults to the listener address
    #[serde(default)]
    pub public_host: Option<String>,
    #[serde(default = "default_public_scheme")]
    pub public_scheme: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: None,
            public_scheme: default_public_scheme(),
        }
    }
}

/// Where source images come from (lives under `[sessions]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionsFileConfig {
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,
    /// Only files with these extensions are loaded; empty means all files
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl Default for SessionsFileConfig {
    fn default() -> Self {
        Self {
            images_dir: default_images_dir(),
            extensions: Vec::new(),
        }
    }
}

/// Snapshot persistence (lives under `[snapshots]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotFileConfig {
    #[serde(default = "default_snapshot_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_period_secs")]
    pub period_secs: u64,
    /// Records kept per session; unset keeps everything
    #[serde(default)]
    pub keep: Option<usize>,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for SnapshotFileConfig {
    fn default() -> Self {
        Self {
            dir: default_snapshot_dir(),
            period_secs: default_period_secs(),
            keep: None,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Per-viewer delivery (lives under `[viewers]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ViewerFileConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ViewerFileConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_public_scheme() -> String {
    "http".to_string()
}
fn default_images_dir() -> PathBuf {
    PathBuf::from("roms")
}
fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("saves")
}
fn default_period_secs() -> u64 {
    60
}
fn default_shutdown_grace_secs() -> u64 {
    5
}
fn default_queue_capacity() -> usize {
    8
}

/// Build a figment that layers: defaults → arcade.toml → ARCADE_* env vars.
///
/// A missing config file is not an error. Env vars use double-underscore
/// for nesting into sections:
///   `ARCADE_SERVER__PORT=8080`  →  `server.port = 8080`
pub fn load_config(config_file: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_file))
        .merge(Env::prefixed("ARCADE_").split("__"))
}

/// Command-line values that take priority over every other layer.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub public_host: Option<String>,
    pub images_dir: Option<PathBuf>,
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_period_secs: Option<u64>,
}

impl FileConfig {
    pub fn apply(&mut self, cli: &CliOverrides) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(public_host) = &cli.public_host {
            self.server.public_host = Some(public_host.clone());
        }
        if let Some(dir) = &cli.images_dir {
            self.sessions.images_dir = dir.clone();
        }
        if let Some(dir) = &cli.snapshot_dir {
            self.snapshots.dir = dir.clone();
        }
        if let Some(secs) = cli.snapshot_period_secs {
            self.snapshots.period_secs = secs;
        }
    }
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub public_host: Option<String>,
    pub public_scheme: String,
}

impl ServerConfig {
    pub fn from_file(fc: &ServerFileConfig) -> Result<Self, ArcadeError> {
        if fc.public_scheme != "http" && fc.public_scheme != "https" {
            return Err(ArcadeError::Config(format!(
                "server.public_scheme must be http or https, got {:?}",
                fc.public_scheme
            )));
        }
        Ok(Self {
            host: fc.host.clone(),
            port: fc.port,
            public_host: fc.public_host.clone().filter(|h| !h.is_empty()),
            public_scheme: fc.public_scheme.clone(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct SessionsConfig {
    pub images_dir: PathBuf,
    pub extensions: Vec<String>,
}

impl SessionsConfig {
    pub fn from_file(fc: &SessionsFileConfig) -> Self {
        Self {
            images_dir: fc.images_dir.clone(),
            extensions: fc.extensions.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    pub dir: PathBuf,
    pub period: Duration,
    pub keep: Option<usize>,
    pub shutdown_grace: Duration,
}

impl SnapshotConfig {
    pub fn from_file(fc: &SnapshotFileConfig) -> Result<Self, ArcadeError> {
        if fc.period_secs == 0 {
            return Err(ArcadeError::Config(
                "snapshots.period_secs must be greater than zero".into(),
            ));
        }
        if fc.keep == Some(0) {
            return Err(ArcadeError::Config(
                "snapshots.keep must be at least 1 when set".into(),
            ));
        }
        Ok(Self {
            dir: fc.dir.clone(),
            period: Duration::from_secs(fc.period_secs),
            keep: fc.keep,
            shutdown_grace: Duration::from_secs(fc.shutdown_grace_secs),
        })
    }
}

#[derive(Clone, Debug)]
pub struct ViewerConfig {
    pub queue_capacity: usize,
}

impl ViewerConfig {
    pub fn from_file(fc: &ViewerFileConfig) -> Result<Self, ArcadeError> {
        if fc.queue_capacity == 0 {
            return Err(ArcadeError::Config(
                "viewers.queue_capacity must be greater than zero".into(),
            ));
        }
        Ok(Self {
            queue_capacity: fc.queue_capacity,
        })
    }
}

/// Fully resolved configuration
#[derive(Clone, Debug)]
pub struct ArcadeConfig {
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub snapshots: SnapshotConfig,
    pub viewers: ViewerConfig,
}

impl ArcadeConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self, ArcadeError> {
        Ok(Self {
            server: ServerConfig::from_file(&fc.server)?,
            sessions: SessionsConfig::from_file(&fc.sessions),
            snapshots: SnapshotConfig::from_file(&fc.snapshots)?,
            viewers: ViewerConfig::from_file(&fc.viewers)?,
        })
    }

    /// Load every layer and apply command-line overrides.
    pub fn load(config_file: &Path, cli: &CliOverrides) -> Result<Self, ArcadeError> {
        let mut fc: FileConfig = load_config(config_file)
            .extract()
            .map_err(|e| ArcadeError::Config(e.to_string()))?;
        fc.apply(cli);
        Self::from_file(&fc)
    }
}
