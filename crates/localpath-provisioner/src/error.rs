//! Error types for the provisioner.

use std::time::Duration;

use thiserror::Error;

use crate::types::AccessMode;
use crate::worker::WorkerAction;

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// A path configuration could not be loaded or was rejected.
///
/// A rejected reload never replaces the snapshot that is already active.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path of the config file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config content is not valid JSON for the expected shape.
    #[error("failed to parse config from {origin}: {source}")]
    Parse {
        /// File path, or `inline` for configs passed as a string.
        origin: String,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// A configured path does not start with `/`.
    #[error("path must start with / for path {path} on node {node}")]
    RelativePath {
        /// Offending path as written.
        path: String,
        /// Node the path was listed under.
        node: String,
    },

    /// A configured path canonicalizes to the filesystem root.
    #[error("cannot use root ('/') as path on node {node}")]
    RootPath {
        /// Node the path was listed under.
        node: String,
    },

    /// The same node is listed twice.
    #[error("duplicate node {0}")]
    DuplicateNode(String),

    /// The same canonical path is listed twice under one node.
    #[error("duplicate path {path} on node {node}")]
    DuplicatePath {
        /// Offending path as written.
        path: String,
        /// Node the path was listed under.
        node: String,
    },

    /// Both a node path map and a shared filesystem path are configured.
    #[error("both nodePathMap and sharedFileSystemPath are defined, only one may be in use")]
    ConflictingTopology,

    /// Neither a node path map nor a shared filesystem path is configured.
    #[error("both nodePathMap and sharedFileSystemPath are unconfigured")]
    MissingTopology,

    /// The shared filesystem path is not usable.
    #[error("invalid sharedFileSystemPath {0}: must be absolute and not the root")]
    InvalidSharedPath(String),
}

/// A single request was rejected before any cluster side effect.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("claim.spec.selector is not supported")]
    SelectorUnsupported,

    #[error("only ReadWriteOnce access mode is supported, got {0}")]
    AccessModeUnsupported(AccessMode),

    #[error("configuration error, no node was specified")]
    NodeRequired,

    #[error("config doesn't contain node {node}, and no default entry is available")]
    NodeNotConfigured { node: String },

    #[error("no local path available on node {node}")]
    NoPathsOnNode { node: String },

    #[error("invalid boolean {value:?} for storage class parameter {key}")]
    InvalidBool { key: String, value: String },

    #[error("the {0} parameter must be set")]
    MissingParameter(&'static str),

    #[error("{0:?} is not a recognised volume type")]
    UnknownVolumeType(String),

    #[error("invalid empty name or path or node")]
    EmptyField,

    #[error("volume path {0} is not absolute")]
    RelativeVolumePath(String),

    #[error(
        "invalid path {path} for {action}: cannot find parent dir or volume dir or parent dir is relative"
    )]
    UnusablePath { path: String, action: WorkerAction },

    #[error("no path set")]
    NoVolumePath,

    #[error("no NodeAffinity set")]
    NoNodeAffinity,

    #[error("no NodeAffinity.Required set")]
    NoRequiredAffinity,

    #[error("multiple values for the node affinity")]
    MultipleAffinityValues,

    #[error("cannot find affinited node")]
    NoAffinityNode,
}

/// Errors returned by the cluster control plane.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("API server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode API response: {0}")]
    Decode(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::AlreadyExists { .. })
    }
}

/// Failure of a single worker task run.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("dispatch of task {task} failed: {source}")]
    Dispatch {
        task: String,
        #[source]
        source: ClusterError,
    },

    #[error("{action} process timeout after {} seconds ({attempts} polls)", elapsed.as_secs())]
    Timeout {
        action: WorkerAction,
        attempts: u32,
        elapsed: Duration,
    },
}

/// Top-level error for `Provision` and `Delete`.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to {action} volume {volume}: {source}")]
    Worker {
        action: WorkerAction,
        volume: String,
        #[source]
        source: WorkerError,
    },

    #[error("failed to delete volume {volume}: {source}")]
    Delete {
        volume: String,
        #[source]
        source: Box<ProvisionError>,
    },
}

impl ProvisionError {
    /// Returns the request validation error at the root of this error, if any.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            ProvisionError::Validation(e) => Some(e),
            ProvisionError::Worker {
                source: WorkerError::Validation(e),
                ..
            } => Some(e),
            ProvisionError::Delete { source, .. } => source.validation(),
            _ => None,
        }
    }

    /// True when the worker task did not succeed within the timeout window.
    pub fn is_timeout(&self) -> bool {
        match self {
            ProvisionError::Worker {
                source: WorkerError::Timeout { .. },
                ..
            } => true,
            ProvisionError::Delete { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}
