//! Hot-reloadable path configuration.
//!
//! The raw configuration names either a set of directories per node or one
//! shared filesystem path reachable from every node. [`ConfigStore`] keeps an
//! immutable [`NormalizedConfig`] snapshot and swaps it atomically when the
//! source changes and the new content validates.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{ConfigError, ValidationError};
use crate::paths;

/// Node key whose paths are used for nodes absent from the node path map.
pub const DEFAULT_NODE_KEY: &str = "DEFAULT_PATH_FOR_NON_LISTED_NODES";

/// Command timeout used when the config leaves it unset or non-positive.
pub const DEFAULT_CMD_TIMEOUT_SECS: u64 = 120;

/// Interval between config source re-reads.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Shortest interval the refresh task will tick at.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// One `nodePathMap` entry as written in the config source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodePathEntry {
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// Path configuration exactly as read from the source.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_path_map: Vec<NodePathEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmd_timeout_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shared_file_system_path: String,
}

/// Storage topology derived from a config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopologyMode {
    /// One path, reachable from every node.
    SharedFilesystem,
    /// Node-local directories listed per node.
    PerNodePaths,
}

impl TopologyMode {
    /// Derives the topology from which path representations are populated.
    ///
    /// Exactly one must be set; anything else is a config error.
    pub fn derive(has_node_paths: bool, has_shared_path: bool) -> Result<Self, ConfigError> {
        match (has_node_paths, has_shared_path) {
            (true, true) => Err(ConfigError::ConflictingTopology),
            (false, false) => Err(ConfigError::MissingTopology),
            (true, false) => Ok(TopologyMode::PerNodePaths),
            (false, true) => Ok(TopologyMode::SharedFilesystem),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, TopologyMode::SharedFilesystem)
    }
}

/// Validated, canonical configuration. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedConfig {
    node_paths: BTreeMap<String, BTreeSet<String>>,
    shared_path: Option<String>,
    cmd_timeout_secs: u64,
    topology: TopologyMode,
}

impl NormalizedConfig {
    /// Validates `raw` and builds its canonical form.
    pub fn from_raw(raw: &RawConfig, default_timeout_secs: u64) -> Result<Self, ConfigError> {
        let mut node_paths: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for entry in &raw.node_path_map {
            if node_paths.contains_key(&entry.node) {
                return Err(ConfigError::DuplicateNode(entry.node.clone()));
            }
            let mut set = BTreeSet::new();
            for p in &entry.paths {
                let canonical =
                    paths::clean_absolute(p).ok_or_else(|| ConfigError::RelativePath {
                        path: p.clone(),
                        node: entry.node.clone(),
                    })?;
                if canonical == "/" {
                    return Err(ConfigError::RootPath {
                        node: entry.node.clone(),
                    });
                }
                if !set.insert(canonical) {
                    return Err(ConfigError::DuplicatePath {
                        path: p.clone(),
                        node: entry.node.clone(),
                    });
                }
            }
            node_paths.insert(entry.node.clone(), set);
        }

        let shared_path = if raw.shared_file_system_path.is_empty() {
            None
        } else {
            match paths::clean_absolute(&raw.shared_file_system_path) {
                Some(p) if p != "/" => Some(p),
                _ => {
                    return Err(ConfigError::InvalidSharedPath(
                        raw.shared_file_system_path.clone(),
                    ))
                }
            }
        };

        let topology = TopologyMode::derive(!node_paths.is_empty(), shared_path.is_some())?;

        let cmd_timeout_secs = match raw.cmd_timeout_seconds {
            Some(secs) if secs > 0 => secs as u64,
            _ => default_timeout_secs,
        };

        Ok(Self {
            node_paths,
            shared_path,
            cmd_timeout_secs,
            topology,
        })
    }

    pub fn topology(&self) -> TopologyMode {
        self.topology
    }

    pub fn cmd_timeout_secs(&self) -> u64 {
        self.cmd_timeout_secs
    }

    pub fn shared_path(&self) -> Option<&str> {
        self.shared_path.as_deref()
    }

    /// Paths configured for `node`, without the default-node fallback.
    pub fn node_paths(&self, node: &str) -> Option<&BTreeSet<String>> {
        self.node_paths.get(node)
    }

    /// Base directory for new volumes on `node`.
    ///
    /// Shared filesystems ignore `node`. Per-node configs fall back to the
    /// [`DEFAULT_NODE_KEY`] entry for unlisted nodes and pick the first path
    /// in sorted order when several are listed.
    pub fn base_path_for(&self, node: &str) -> Result<&str, ValidationError> {
        if let (TopologyMode::SharedFilesystem, Some(shared)) = (self.topology, &self.shared_path) {
            return Ok(shared.as_str());
        }
        let paths = match self.node_paths.get(node) {
            Some(p) => p,
            None => {
                let fallback = self.node_paths.get(DEFAULT_NODE_KEY).ok_or_else(|| {
                    ValidationError::NodeNotConfigured {
                        node: node.to_string(),
                    }
                })?;
                debug!(
                    "config doesn't contain node {}, use {} instead",
                    node, DEFAULT_NODE_KEY
                );
                fallback
            }
        };
        paths
            .iter()
            .next()
            .map(String::as_str)
            .ok_or_else(|| ValidationError::NoPathsOnNode {
                node: node.to_string(),
            })
    }
}

/// Where the raw config comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A JSON file, re-read on every refresh.
    File(PathBuf),
    /// The JSON document itself.
    Inline(String),
}

impl ConfigSource {
    /// Sources ending in `.json` are files; anything else is inline JSON.
    pub fn parse(source: &str) -> Self {
        if source.ends_with(".json") {
            ConfigSource::File(PathBuf::from(source))
        } else {
            ConfigSource::Inline(source.to_string())
        }
    }

    pub async fn read(&self) -> Result<RawConfig, ConfigError> {
        match self {
            ConfigSource::File(path) => {
                let contents =
                    tokio::fs::read_to_string(path)
                        .await
                        .map_err(|source| ConfigError::Io {
                            path: path.display().to_string(),
                            source,
                        })?;
                serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                    origin: path.display().to_string(),
                    source,
                })
            }
            ConfigSource::Inline(text) => {
                serde_json::from_str(text).map_err(|source| ConfigError::Parse {
                    origin: "inline".to_string(),
                    source,
                })
            }
        }
    }
}

/// Outcome of a successful refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The source changed and the new snapshot is active.
    Applied,
    /// The source is identical to the active snapshot's raw form.
    Unchanged,
}

struct Loaded {
    raw: RawConfig,
    config: Arc<NormalizedConfig>,
}

/// Holds the active config snapshot and reloads it from its source.
pub struct ConfigStore {
    source: ConfigSource,
    default_timeout_secs: u64,
    active: RwLock<Loaded>,
}

impl ConfigStore {
    /// Loads the initial snapshot. Fails if the source is unreadable or invalid.
    pub async fn open(
        source: ConfigSource,
        default_timeout_secs: u64,
    ) -> Result<Self, ConfigError> {
        let raw = source.read().await?;
        let config = NormalizedConfig::from_raw(&raw, default_timeout_secs)?;
        log_applied(&raw);
        Ok(Self {
            source,
            default_timeout_secs,
            active: RwLock::new(Loaded {
                raw,
                config: Arc::new(config),
            }),
        })
    }

    /// Builds a store around an already validated config with no backing source.
    pub fn from_raw(raw: RawConfig, default_timeout_secs: u64) -> Result<Self, ConfigError> {
        let config = NormalizedConfig::from_raw(&raw, default_timeout_secs)?;
        let inline = serde_json::to_string(&raw).unwrap_or_default();
        Ok(Self {
            source: ConfigSource::Inline(inline),
            default_timeout_secs,
            active: RwLock::new(Loaded {
                raw,
                config: Arc::new(config),
            }),
        })
    }

    /// The active snapshot.
    pub fn current(&self) -> Arc<NormalizedConfig> {
        self.active.read().config.clone()
    }

    pub fn source(&self) -> &ConfigSource {
        &self.source
    }

    /// Re-reads the source and swaps in the new snapshot if it changed and validates.
    ///
    /// Reading and validation happen without holding the lock; the write lock
    /// is only taken for the swap.
    pub async fn refresh(&self) -> Result<RefreshOutcome, ConfigError> {
        let raw = self.source.read().await?;
        if self.active.read().raw == raw {
            return Ok(RefreshOutcome::Unchanged);
        }
        let config = Arc::new(NormalizedConfig::from_raw(&raw, self.default_timeout_secs)?);
        log_applied(&raw);
        let mut active = self.active.write();
        *active = Loaded { raw, config };
        Ok(RefreshOutcome::Applied)
    }

    /// Spawns the periodic refresh task. It stops when `shutdown` flips to `true`
    /// or its sender is dropped. Intervals below [`MIN_REFRESH_INTERVAL`] are
    /// raised to it.
    pub fn spawn_refresh(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_REFRESH_INTERVAL));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the snapshot is already fresh.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.refresh().await {
                            Ok(RefreshOutcome::Applied) => info!("applied new path config"),
                            Ok(RefreshOutcome::Unchanged) => {}
                            Err(e) => error!("failed to load the new config file: {}", e),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("stop watching config file");
                            return;
                        }
                    }
                }
            }
        })
    }
}

fn log_applied(raw: &RawConfig) {
    match serde_json::to_string(raw) {
        Ok(json) => debug!("Applied config: {}", json),
        Err(e) => debug!("Applied config (unprintable: {})", e),
    }
}
