//! Volume provisioning and deletion.
//!
//! `provision` validates a claim against the active topology, resolves the
//! directory the volume lives in, runs the setup task on the target node and
//! returns the volume descriptor. `delete` reverses it from the descriptor
//! alone, skipping volumes whose reclaim policy is `Retain`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::ClusterClient;
use crate::config::{ConfigStore, TopologyMode};
use crate::error::{ProvisionError, Result, ValidationError};
use crate::paths;
use crate::pod::{TemplateError, WorkerPod};
use crate::settings::ProvisionerSettings;
use crate::template::{ClaimMetadata, PathPattern};
use crate::types::{
    AccessMode, Claim, HostPathType, HostPathVolumeSource, LocalVolumeSource, Node,
    NodeSelectorOperator, ObjectMeta, PersistentVolume, ReclaimPolicy, StorageClass, VolumeMode,
    VolumeNodeAffinity, VolumeSpec, VolumeType, NODE_IDENTITY_LABEL,
};
use crate::worker::{
    ModelCacheOptions, VolumeOptions, WorkerAction, WorkerOrchestrator, WorkerTaskBuilder,
};

/// Storage-class parameter enabling model caching.
pub const PARAM_MODEL_CACHE: &str = "modelCache";
pub const PARAM_REGISTRY: &str = "registry";
pub const PARAM_STORE_TYPE: &str = "storeType";
pub const PARAM_PATH_PATTERN: &str = "pathPattern";

/// Storage-class annotation with the default volume type.
pub const ANNOTATION_DEFAULT_VOLUME_TYPE: &str = "defaultVolumeType";
/// Claim annotation overriding the volume type.
pub const ANNOTATION_VOLUME_TYPE: &str = "volumeType";
/// Claim annotation with a per-claim repository for model-cache pulls.
pub const ANNOTATION_REPO_TAG: &str = "model/registry";

/// One provisioning request, as handed over by the reconciliation framework.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub volume_name: String,
    pub claim: Claim,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_node: Option<Node>,
    #[serde(default)]
    pub storage_class: StorageClass,
}

/// Terminal state reported with a provisioning outcome. Calls are never
/// resumed, so every outcome is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Finished,
}

/// Parses a boolean the way storage-class parameters are usually written.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheParams {
    registry: String,
    store_type: String,
}

/// Reads the model-cache parameters. Once `modelCache` is present, `registry`
/// and `storeType` are required whatever its value.
fn cache_params(
    params: &BTreeMap<String, String>,
) -> std::result::Result<Option<CacheParams>, ValidationError> {
    let Some(flag) = params.get(PARAM_MODEL_CACHE) else {
        return Ok(None);
    };
    let enabled = parse_bool(flag).ok_or_else(|| ValidationError::InvalidBool {
        key: PARAM_MODEL_CACHE.to_string(),
        value: flag.clone(),
    })?;
    let registry = params
        .get(PARAM_REGISTRY)
        .ok_or(ValidationError::MissingParameter(PARAM_REGISTRY))?;
    let store_type = params
        .get(PARAM_STORE_TYPE)
        .ok_or(ValidationError::MissingParameter(PARAM_STORE_TYPE))?;
    Ok(enabled.then(|| CacheParams {
        registry: registry.clone(),
        store_type: store_type.clone(),
    }))
}

/// Volume type: the claim annotation wins over the storage-class default,
/// which wins over `hostPath`.
fn volume_type(
    class: &StorageClass,
    claim: &Claim,
) -> std::result::Result<VolumeType, ValidationError> {
    let requested = claim
        .metadata
        .annotations
        .get(ANNOTATION_VOLUME_TYPE)
        .or_else(|| class.metadata.annotations.get(ANNOTATION_DEFAULT_VOLUME_TYPE));
    match requested {
        Some(name) => {
            VolumeType::parse(name).ok_or_else(|| ValidationError::UnknownVolumeType(name.clone()))
        }
        None => Ok(VolumeType::HostPath),
    }
}

/// Picks the path `provision` uses for a claim under `base`.
fn volume_path(volume_name: &str, claim: &Claim, class: &StorageClass, base: &str) -> String {
    let folder = [volume_name, claim.namespace(), claim.metadata.name.as_str()].join("_");
    let default = paths::join(base, &folder);

    let Some(pattern) = class.parameters.get(PARAM_PATH_PATTERN) else {
        return default;
    };
    let mut meta = ClaimMetadata::from_claim(claim);
    let custom = PathPattern::parse(pattern).resolve(&mut meta);
    if meta.referenced_metadata && !custom.is_empty() {
        paths::join(base, &custom)
    } else {
        debug!(
            "path pattern {:?} did not reference claim labels or annotations, using {}",
            pattern, default
        );
        default
    }
}

/// Creates and deletes volumes.
pub struct Provisioner {
    config: Arc<ConfigStore>,
    worker: WorkerOrchestrator,
}

impl Provisioner {
    pub fn new(config: Arc<ConfigStore>, worker: WorkerOrchestrator) -> Self {
        Self { config, worker }
    }

    /// Wires a provisioner around `cluster` using `template` for worker tasks.
    pub fn with_cluster(
        cluster: Arc<dyn ClusterClient>,
        config: Arc<ConfigStore>,
        template: &WorkerPod,
        settings: Arc<ProvisionerSettings>,
    ) -> std::result::Result<Self, TemplateError> {
        let builder = WorkerTaskBuilder::new(template, settings.clone())
            .ok_or_else(|| TemplateError::NoContainers(template.name().to_string()))?;
        let worker = WorkerOrchestrator::new(cluster, config.clone(), builder, settings);
        Ok(Self::new(config, worker))
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Provisions the volume for `req`.
    ///
    /// On error nothing is returned and no volume exists; the setup task
    /// cleans up after itself.
    pub async fn provision(
        &self,
        req: &ProvisionRequest,
    ) -> Result<(PersistentVolume, ProvisioningState)> {
        let snapshot = self.config.current();
        let topology = snapshot.topology();
        let claim = &req.claim;

        if topology == TopologyMode::PerNodePaths {
            if claim.selector.is_some() {
                return Err(ValidationError::SelectorUnsupported.into());
            }
            if let Some(mode) = claim
                .access_modes
                .iter()
                .find(|m| **m != AccessMode::ReadWriteOnce)
            {
                return Err(ValidationError::AccessModeUnsupported(*mode).into());
            }
            if req.selected_node.is_none() {
                return Err(ValidationError::NodeRequired.into());
            }
        }

        let node_name = req
            .selected_node
            .as_ref()
            .map(|n| n.metadata.name.clone())
            .unwrap_or_default();
        let base = snapshot.base_path_for(&node_name)?.to_string();
        let path = volume_path(&req.volume_name, claim, &req.storage_class, &base);

        let cache = cache_params(&req.storage_class.parameters)?;
        let kind = volume_type(&req.storage_class, claim)?;

        if node_name.is_empty() {
            info!("Creating volume {} at {}", req.volume_name, path);
        } else {
            info!("Creating volume {} at {}:{}", req.volume_name, node_name, path);
        }

        let opts = VolumeOptions {
            name: req.volume_name.clone(),
            path: path.clone(),
            mode: claim.volume_mode.unwrap_or_default(),
            size_bytes: claim.storage_request,
            node: node_name,
            model_cache: cache.map(|c| ModelCacheOptions {
                registry: c.registry,
                store_type: c.store_type,
                repo_tag: claim.metadata.annotations.get(ANNOTATION_REPO_TAG).cloned(),
                base_path: base.clone(),
            }),
        };
        self.worker
            .run(WorkerAction::Create, &WorkerAction::Create.command(), &opts)
            .await
            .map_err(|source| ProvisionError::Worker {
                action: WorkerAction::Create,
                volume: req.volume_name.clone(),
                source,
            })?;

        let (local, host_path) = match kind {
            VolumeType::Local => (Some(LocalVolumeSource { path }), None),
            VolumeType::HostPath => (
                None,
                Some(HostPathVolumeSource {
                    path,
                    path_type: Some(HostPathType::DirectoryOrCreate),
                }),
            ),
        };
        // Shared filesystems are reachable from any labelled node.
        let affinity = match (&req.selected_node, topology) {
            (Some(node), TopologyMode::PerNodePaths) => {
                VolumeNodeAffinity::pinned_to(node.identity())
            }
            _ => VolumeNodeAffinity::any_node(),
        };

        let volume = PersistentVolume {
            metadata: ObjectMeta::named(req.volume_name.clone()),
            spec: VolumeSpec {
                capacity: claim.storage_request,
                access_modes: claim.access_modes.clone(),
                volume_mode: Some(VolumeMode::Filesystem),
                reclaim_policy: req.storage_class.reclaim_policy.unwrap_or_default(),
                local,
                host_path,
                node_affinity: Some(affinity),
            },
        };
        Ok((volume, ProvisioningState::Finished))
    }

    /// Deletes the directory behind `pv` unless it is retained.
    pub async fn delete(&self, pv: &PersistentVolume) -> Result<()> {
        let (path, node) = self.path_and_node(pv).map_err(|e| ProvisionError::Delete {
            volume: pv.name().to_string(),
            source: Box::new(e.into()),
        })?;

        if pv.spec.reclaim_policy == ReclaimPolicy::Retain {
            info!("Retained volume {}", pv.name());
            return Ok(());
        }

        if node.is_empty() {
            info!("Deleting volume {} at {}", pv.name(), path);
        } else {
            info!("Deleting volume {} at {}:{}", pv.name(), node, path);
        }
        let opts = VolumeOptions {
            name: pv.name().to_string(),
            path,
            mode: pv.spec.volume_mode.unwrap_or_default(),
            size_bytes: pv.spec.capacity,
            node,
            model_cache: None,
        };
        self.worker
            .run(WorkerAction::Delete, &WorkerAction::Delete.command(), &opts)
            .await
            .map_err(|source| {
                info!("clean up volume {} failed: {}", pv.name(), source);
                ProvisionError::Worker {
                    action: WorkerAction::Delete,
                    volume: pv.name().to_string(),
                    source,
                }
            })
    }

    /// Host path and bound node of `pv`. The node is empty on shared
    /// filesystems, where the current topology decides affinity is not needed.
    fn path_and_node(
        &self,
        pv: &PersistentVolume,
    ) -> std::result::Result<(String, String), ValidationError> {
        let path = match (&pv.spec.host_path, &pv.spec.local) {
            (Some(host), None) => host.path.clone(),
            (None, Some(local)) => local.path.clone(),
            _ => return Err(ValidationError::NoVolumePath),
        };

        if self.config.current().topology().is_shared() {
            return Ok((path, String::new()));
        }

        let required = pv
            .spec
            .node_affinity
            .as_ref()
            .ok_or(ValidationError::NoNodeAffinity)?
            .required
            .as_ref()
            .ok_or(ValidationError::NoRequiredAffinity)?;

        for term in &required.node_selector_terms {
            let pinned = term.match_expressions.iter().find(|e| {
                e.key == NODE_IDENTITY_LABEL && e.operator == NodeSelectorOperator::In
            });
            if let Some(expr) = pinned {
                let [node] = expr.values.as_slice() else {
                    return Err(ValidationError::MultipleAffinityValues);
                };
                if !node.is_empty() {
                    return Ok((path, node.clone()));
                }
            }
        }
        Err(ValidationError::NoAffinityNode)
    }
}
