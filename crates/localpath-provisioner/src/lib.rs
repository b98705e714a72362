#![warn(missing_docs)]

//! Local path provisioner: maps volume claims to node-local or shared directories,
//! runs helper tasks that create, remove or fill them from a model registry,
//! and hot-reloads its path configuration.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod error;
pub mod kube_api;
pub mod paths;
pub mod pod;
pub mod provisioner;
pub mod settings;
pub mod template;
pub mod types;
pub mod worker;

pub use cluster::{ClusterClient, MockCluster};
pub use config::{ConfigSource, ConfigStore, NormalizedConfig, RawConfig, TopologyMode};
pub use error::{ClusterError, ConfigError, ProvisionError, Result, ValidationError, WorkerError};
pub use kube_api::KubeApiClient;
pub use pod::WorkerPod;
pub use provisioner::{ProvisionRequest, Provisioner, ProvisioningState};
pub use settings::ProvisionerSettings;
pub use worker::{VolumeOptions, WorkerAction, WorkerOrchestrator, WorkerTaskBuilder};
