//! Worker task orchestration.
//!
//! A worker task is a short-lived pod pinned to the target node that runs one
//! script from the shared script bundle against the volume's parent
//! directory. The orchestrator builds the task from an immutable template,
//! dispatches it (reusing a task of the same name if one is already there),
//! polls it to completion under the configured timeout and removes what it
//! created.
//!
//! Task names are deterministic. Model-cache tasks are named after the node
//! and a hash of the resolved path so concurrent pulls into one directory
//! share a task. Names longer than the configured cap are truncated, which
//! can make two long names collide; that limitation is accepted.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cluster::ClusterClient;
use crate::config::ConfigStore;
use crate::error::{ClusterError, ValidationError, WorkerError};
use crate::paths;
use crate::pod::{
    ConfigMapVolumeSource, Container, EnvVar, KeyToPath, SecurityContext, Toleration, Volume,
    WorkerPod,
};
use crate::settings::ProvisionerSettings;
use crate::types::{HostPathType, HostPathVolumeSource, VolumeMode};

/// Mount point of the script bundle inside the task.
pub const SCRIPT_DIR: &str = "/script";
const DATA_VOLUME: &str = "data";
const SCRIPT_VOLUME: &str = "script";

pub const ENV_VOL_DIR: &str = "VOL_DIR";
pub const ENV_VOL_MODE: &str = "VOL_MODE";
pub const ENV_VOL_SIZE: &str = "VOL_SIZE_BYTES";
pub const ENV_REGISTRY: &str = "REGISTRY";
pub const ENV_STORE_TYPE: &str = "STORAGE_TYPE";
pub const ENV_REPO_TAG: &str = "REPO_TAG";

/// Hex characters of the path hash used in model-cache task names.
const PATH_HASH_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerAction {
    Create,
    Delete,
}

impl WorkerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerAction::Create => "create",
            WorkerAction::Delete => "delete",
        }
    }

    fn past_tense(&self) -> &'static str {
        match self {
            WorkerAction::Create => "created",
            WorkerAction::Delete => "deleted",
        }
    }

    /// Shell command that runs this action's script.
    pub fn command(&self) -> Vec<String> {
        let script = match self {
            WorkerAction::Create => "setup",
            WorkerAction::Delete => "teardown",
        };
        vec!["/bin/sh".to_string(), format!("{}/{}", SCRIPT_DIR, script)]
    }

    fn script_item(&self, model_cache: bool) -> KeyToPath {
        let (key, path) = match (self, model_cache) {
            (WorkerAction::Create, true) => ("setupcache", "setup"),
            (WorkerAction::Create, false) => ("setup", "setup"),
            (WorkerAction::Delete, _) => ("teardown", "teardown"),
        };
        KeyToPath {
            key: key.to_string(),
            path: path.to_string(),
        }
    }
}

impl fmt::Display for WorkerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry pull parameters for model-cache volumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCacheOptions {
    pub registry: String,
    pub store_type: String,
    /// Per-claim repository override.
    pub repo_tag: Option<String>,
    /// Base directory the volume was resolved under.
    pub base_path: String,
}

/// What a worker task operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeOptions {
    pub name: String,
    pub path: String,
    pub mode: VolumeMode,
    pub size_bytes: u64,
    /// Target node; empty on shared filesystems.
    pub node: String,
    pub model_cache: Option<ModelCacheOptions>,
}

/// First hex characters of the SHA-256 of `path`.
pub fn path_hash(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(PATH_HASH_LEN);
    hex
}

/// Deterministic task name for `action` on `opts`.
///
/// `cleaned_path` must be the canonical form of `opts.path`.
pub fn task_name(
    action: WorkerAction,
    opts: &VolumeOptions,
    cleaned_path: &str,
    template_name: &str,
    max_len: usize,
) -> String {
    let name = if opts.model_cache.is_some() {
        format!("cache-{}-{}-{}", action, opts.node, path_hash(cleaned_path))
    } else {
        format!("{}-{}-{}", template_name, action, opts.name)
    };
    name.chars().take(max_len).collect()
}

/// Builds worker tasks from a template.
///
/// The template's first container runs the script; it is kept apart from the
/// rest of the pod so every build starts from an untouched copy.
#[derive(Debug, Clone)]
pub struct WorkerTaskBuilder {
    base: WorkerPod,
    container: Container,
    settings: Arc<ProvisionerSettings>,
}

impl WorkerTaskBuilder {
    /// Returns `None` when the template has no container.
    pub fn new(template: &WorkerPod, settings: Arc<ProvisionerSettings>) -> Option<Self> {
        let mut base = template.clone();
        base.status = None;
        if base.spec.containers.is_empty() {
            return None;
        }
        let container = base.spec.containers.remove(0);
        Some(Self {
            base,
            container,
            settings,
        })
    }

    /// Produces the task for `action` on `opts`.
    pub fn build(
        &self,
        action: WorkerAction,
        command: &[String],
        opts: &VolumeOptions,
    ) -> Result<WorkerPod, ValidationError> {
        let cleaned = paths::clean_absolute(&opts.path)
            .ok_or_else(|| ValidationError::RelativeVolumePath(opts.path.clone()))?;
        let (parent, leaf) = paths::split_parent(&cleaned);
        let unusable = || ValidationError::UnusablePath {
            path: opts.path.clone(),
            action,
        };
        if parent.is_empty() || leaf.is_empty() || !parent.starts_with('/') {
            return Err(unusable());
        }

        let mut pod = self.base.clone();
        let mut container = self.container.clone();

        container.ensure_mount(SCRIPT_VOLUME, SCRIPT_DIR).mount_path = SCRIPT_DIR.to_string();

        let wanted_mount = match &opts.model_cache {
            Some(cache) => {
                let rel = parent.strip_prefix(cache.base_path.as_str()).unwrap_or(parent);
                paths::join(&self.settings.model_mount_root, rel)
            }
            None => parent.to_string(),
        };
        let data_mount = container
            .ensure_mount(DATA_VOLUME, &wanted_mount)
            .mount_path
            .trim_end_matches('/')
            .to_string();
        if data_mount.is_empty() || !data_mount.starts_with('/') {
            return Err(unusable());
        }
        let vol_dir = paths::join(&data_mount, leaf);

        let mut env = vec![
            EnvVar::new(ENV_VOL_DIR, vol_dir.clone()),
            EnvVar::new(ENV_VOL_MODE, opts.mode.as_str()),
            EnvVar::new(ENV_VOL_SIZE, opts.size_bytes.to_string()),
        ];
        if let Some(cache) = &opts.model_cache {
            env.push(EnvVar::new(ENV_REGISTRY, cache.registry.clone()));
            env.push(EnvVar::new(ENV_STORE_TYPE, cache.store_type.clone()));
            if let Some(tag) = &cache.repo_tag {
                env.push(EnvVar::new(ENV_REPO_TAG, tag.clone()));
            }
            container.image = self.settings.helper_image.clone();
        }
        container.command = command.to_vec();
        container.env.extend(env);
        container.args = vec![
            "-p".to_string(),
            vol_dir,
            "-s".to_string(),
            opts.size_bytes.to_string(),
            "-m".to_string(),
            opts.mode.as_str().to_string(),
        ];
        container.security_context = Some(SecurityContext {
            privileged: Some(true),
        });

        pod.metadata.name = task_name(
            action,
            opts,
            &cleaned,
            &self.base.metadata.name,
            self.settings.task_name_max_len,
        );
        pod.metadata.namespace = Some(self.settings.namespace.clone());
        if !opts.node.is_empty() {
            pod.spec.node_name = Some(opts.node.clone());
        }
        pod.spec.service_account_name = Some(self.settings.service_account.clone());
        pod.spec.restart_policy = Some("Never".to_string());
        pod.spec.tolerations.push(Toleration {
            operator: Some("Exists".to_string()),
            ..Toleration::default()
        });
        pod.spec.volumes.push(Volume {
            name: DATA_VOLUME.to_string(),
            host_path: Some(HostPathVolumeSource {
                path: parent.to_string(),
                path_type: Some(HostPathType::DirectoryOrCreate),
            }),
            config_map: None,
        });
        pod.spec.volumes.push(Volume {
            name: SCRIPT_VOLUME.to_string(),
            host_path: None,
            config_map: Some(ConfigMapVolumeSource {
                name: self.settings.script_config_map.clone(),
                items: vec![action.script_item(opts.model_cache.is_some())],
            }),
        });
        pod.spec.containers.insert(0, container);
        Ok(pod)
    }
}

/// Dispatches worker tasks and waits for them.
pub struct WorkerOrchestrator {
    cluster: Arc<dyn ClusterClient>,
    config: Arc<ConfigStore>,
    builder: WorkerTaskBuilder,
    settings: Arc<ProvisionerSettings>,
}

impl WorkerOrchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        config: Arc<ConfigStore>,
        builder: WorkerTaskBuilder,
        settings: Arc<ProvisionerSettings>,
    ) -> Self {
        Self {
            cluster,
            config,
            builder,
            settings,
        }
    }

    pub fn builder(&self) -> &WorkerTaskBuilder {
        &self.builder
    }

    /// Runs `command` for `action` on the volume described by `opts`.
    ///
    /// Polls once per poll interval for up to the active config's command
    /// timeout. A task this call created is deleted afterwards whatever the
    /// outcome; a task that already existed is left alone.
    pub async fn run(
        &self,
        action: WorkerAction,
        command: &[String],
        opts: &VolumeOptions,
    ) -> Result<(), WorkerError> {
        let snapshot = self.config.current();
        let shared = snapshot.topology().is_shared();
        if opts.name.is_empty() || opts.path.is_empty() || (!shared && opts.node.is_empty()) {
            return Err(ValidationError::EmptyField.into());
        }

        let pod = self.builder.build(action, command, opts)?;
        let namespace = self.settings.namespace.as_str();
        let name = pod.name().to_string();

        let created = self.dispatch(&pod).await?;
        let outcome = self
            .await_success(action, namespace, &name, snapshot.cmd_timeout_secs())
            .await;

        if created {
            if let Err(e) = self.cluster.delete_task(namespace, &name).await {
                warn!("unable to delete the helper task {}: {}", name, e);
            }
        }
        outcome?;

        if opts.node.is_empty() {
            info!("Volume {} has been {} on {}", opts.name, action.past_tense(), opts.path);
        } else {
            info!(
                "Volume {} has been {} on {}:{}",
                opts.name,
                action.past_tense(),
                opts.node,
                opts.path
            );
        }
        Ok(())
    }

    /// Creates the task unless one with its name exists. Returns whether this
    /// call created it.
    async fn dispatch(&self, pod: &WorkerPod) -> Result<bool, WorkerError> {
        let namespace = self.settings.namespace.as_str();
        let name = pod.name();
        let dispatch_err = |source: ClusterError| WorkerError::Dispatch {
            task: name.to_string(),
            source,
        };

        if self
            .cluster
            .get_task(namespace, name)
            .await
            .map_err(dispatch_err)?
            .is_some()
        {
            info!("helper task {} exists in namespace {}, skip creating it", name, namespace);
            return Ok(false);
        }

        info!("create the helper task {} into {}", name, namespace);
        match self.cluster.create_task(pod).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_already_exists() => {
                debug!("helper task {} was created concurrently", name);
                Ok(false)
            }
            Err(e) => Err(dispatch_err(e)),
        }
    }

    async fn await_success(
        &self,
        action: WorkerAction,
        namespace: &str,
        name: &str,
        timeout_secs: u64,
    ) -> Result<(), WorkerError> {
        let interval = self.settings.poll_interval();
        let budget = u32::try_from(timeout_secs).unwrap_or(u32::MAX);
        let start = Instant::now();
        for _ in 0..budget {
            match self.cluster.get_task(namespace, name).await {
                Ok(Some(pod)) if pod.is_succeeded() => return Ok(()),
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Err(WorkerError::Dispatch {
                        task: name.to_string(),
                        source: ClusterError::NotFound {
                            kind: "pod",
                            name: name.to_string(),
                        },
                    })
                }
                Err(source) => {
                    return Err(WorkerError::Dispatch {
                        task: name.to_string(),
                        source,
                    })
                }
            }
            tokio::time::sleep(interval).await;
        }
        Err(WorkerError::Timeout {
            action,
            attempts: budget,
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{MockBehavior, MockCluster};
    use crate::config::{NodePathEntry, RawConfig};
    use std::time::Duration;

    const TEMPLATE: &str = r#"
metadata:
  name: helper-pod
spec:
  containers:
  - name: helper-pod
    image: busybox
"#;

    fn settings() -> Arc<ProvisionerSettings> {
        Arc::new(ProvisionerSettings {
            namespace: "storage".to_string(),
            helper_image: "puller:v1".to_string(),
            ..ProvisionerSettings::default()
        })
    }

    fn builder() -> WorkerTaskBuilder {
        let template = WorkerPod::from_manifest(TEMPLATE, "test").unwrap();
        WorkerTaskBuilder::new(&template, settings()).unwrap()
    }

    fn per_node_store(timeout: i64) -> Arc<ConfigStore> {
        let raw = RawConfig {
            node_path_map: vec![NodePathEntry {
                node: "node1".to_string(),
                paths: vec!["/data".to_string()],
            }],
            cmd_timeout_seconds: Some(timeout),
            ..RawConfig::default()
        };
        Arc::new(ConfigStore::from_raw(raw, 120).unwrap())
    }

    fn opts(path: &str) -> VolumeOptions {
        VolumeOptions {
            name: "pvc-1".to_string(),
            path: path.to_string(),
            mode: VolumeMode::Filesystem,
            size_bytes: 1 << 30,
            node: "node1".to_string(),
            model_cache: None,
        }
    }

    fn cache_opts(path: &str) -> VolumeOptions {
        VolumeOptions {
            model_cache: Some(ModelCacheOptions {
                registry: "registry.local:5000".to_string(),
                store_type: "oci".to_string(),
                repo_tag: None,
                base_path: "/data".to_string(),
            }),
            ..opts(path)
        }
    }

    fn env_of<'a>(pod: &'a WorkerPod, key: &str) -> Option<&'a str> {
        pod.spec.containers[0]
            .env
            .iter()
            .find(|e| e.name == key)
            .map(|e| e.value.as_str())
    }

    fn orchestrator(cluster: Arc<MockCluster>, timeout: i64) -> WorkerOrchestrator {
        WorkerOrchestrator::new(cluster, per_node_store(timeout), builder(), settings())
    }

    #[test]
    fn test_build_plain_create() {
        let cmd = WorkerAction::Create.command();
        let pod = builder()
            .build(WorkerAction::Create, &cmd, &opts("/data/pvc-1_ns_claim/"))
            .unwrap();

        assert_eq!(pod.name(), "helper-pod-create-pvc-1");
        assert_eq!(pod.metadata.namespace.as_deref(), Some("storage"));
        assert_eq!(pod.spec.node_name.as_deref(), Some("node1"));
        assert_eq!(pod.spec.restart_policy.as_deref(), Some("Never"));

        let c = &pod.spec.containers[0];
        assert_eq!(c.image, "busybox");
        assert_eq!(c.command, vec!["/bin/sh", "/script/setup"]);
        assert_eq!(
            c.args,
            vec!["-p", "/data/pvc-1_ns_claim", "-s", "1073741824", "-m", "Filesystem"]
        );
        assert_eq!(env_of(&pod, ENV_VOL_DIR), Some("/data/pvc-1_ns_claim"));
        assert_eq!(env_of(&pod, ENV_REGISTRY), None);
        assert_eq!(c.security_context.as_ref().unwrap().privileged, Some(true));

        let data = pod.spec.volumes.iter().find(|v| v.name == "data").unwrap();
        assert_eq!(data.host_path.as_ref().unwrap().path, "/data");
        let script = pod.spec.volumes.iter().find(|v| v.name == "script").unwrap();
        let items = &script.config_map.as_ref().unwrap().items;
        assert_eq!(items[0].key, "setup");
    }

    #[test]
    fn test_build_model_cache() {
        let mut o = cache_opts("/data/models/llama");
        if let Some(c) = o.model_cache.as_mut() {
            c.repo_tag = Some("library/llama:7b".to_string());
        }
        let pod = builder()
            .build(WorkerAction::Create, &WorkerAction::Create.command(), &o)
            .unwrap();

        assert!(pod.name().starts_with("cache-create-node1-"));
        assert_eq!(pod.name().len(), "cache-create-node1-".len() + 8);
        assert_eq!(pod.spec.containers[0].image, "puller:v1");
        assert_eq!(env_of(&pod, ENV_VOL_DIR), Some("/model/models/llama"));
        assert_eq!(env_of(&pod, ENV_REGISTRY), Some("registry.local:5000"));
        assert_eq!(env_of(&pod, ENV_STORE_TYPE), Some("oci"));
        assert_eq!(env_of(&pod, ENV_REPO_TAG), Some("library/llama:7b"));

        let mount = pod.spec.containers[0]
            .volume_mounts
            .iter()
            .find(|m| m.name == "data")
            .unwrap();
        assert_eq!(mount.mount_path, "/model/models");
        let script = pod.spec.volumes.iter().find(|v| v.name == "script").unwrap();
        let item = &script.config_map.as_ref().unwrap().items[0];
        assert_eq!((item.key.as_str(), item.path.as_str()), ("setupcache", "setup"));
    }

    #[test]
    fn test_build_teardown_script() {
        let pod = builder()
            .build(WorkerAction::Delete, &WorkerAction::Delete.command(), &opts("/data/x"))
            .unwrap();
        assert_eq!(pod.name(), "helper-pod-delete-pvc-1");
        assert_eq!(pod.spec.containers[0].command, vec!["/bin/sh", "/script/teardown"]);
        let script = pod.spec.volumes.iter().find(|v| v.name == "script").unwrap();
        assert_eq!(script.config_map.as_ref().unwrap().items[0].key, "teardown");
    }

    #[test]
    fn test_build_rejects_root_and_relative() {
        let b = builder();
        let cmd = WorkerAction::Create.command();
        assert!(matches!(
            b.build(WorkerAction::Create, &cmd, &opts("data/x")),
            Err(ValidationError::RelativeVolumePath(_))
        ));
        for bad in ["/", "/data", "/data/..", "//"] {
            assert!(
                matches!(
                    b.build(WorkerAction::Create, &cmd, &opts(bad)),
                    Err(ValidationError::UnusablePath { .. })
                ),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_template_is_not_mutated_between_builds() {
        let b = builder();
        let cmd = WorkerAction::Create.command();
        let first = b.build(WorkerAction::Create, &cmd, &opts("/data/a")).unwrap();
        let second = b.build(WorkerAction::Create, &cmd, &opts("/data/a")).unwrap();
        assert_eq!(first, second);
        assert_eq!(second.spec.volumes.len(), 2);
        assert_eq!(second.spec.tolerations.len(), 1);
    }

    #[test]
    fn test_task_name_truncated() {
        let mut o = opts("/data/a");
        o.name = "x".repeat(300);
        let name = task_name(WorkerAction::Create, &o, "/data/a", "helper-pod", 128);
        assert_eq!(name.len(), 128);
    }

    #[test]
    fn test_cache_task_name_depends_on_path_node_action() {
        let base = cache_opts("/data/a");
        let n = |action, o: &VolumeOptions| task_name(action, o, &o.path, "helper-pod", 128);
        let reference = n(WorkerAction::Create, &base);
        assert_eq!(reference, n(WorkerAction::Create, &base.clone()));
        assert_ne!(reference, n(WorkerAction::Delete, &base));
        let mut other_node = base.clone();
        other_node.node = "node2".to_string();
        assert_ne!(reference, n(WorkerAction::Create, &other_node));
        let other_path = cache_opts("/data/b");
        assert_ne!(reference, n(WorkerAction::Create, &other_path));
    }

    #[test]
    fn test_path_hash_fixed_width() {
        assert_eq!(path_hash("/data/a").len(), 8);
        assert_eq!(path_hash("/data/a"), path_hash("/data/a"));
        assert_ne!(path_hash("/data/a"), path_hash("/data/b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_success_cleans_up() {
        let cluster = Arc::new(MockCluster::with_behavior(MockBehavior {
            succeed_after_reads: Some(2),
            ..MockBehavior::default()
        }));
        let orch = orchestrator(cluster.clone(), 10);
        orch.run(WorkerAction::Create, &WorkerAction::Create.command(), &opts("/data/v"))
            .await
            .unwrap();

        let stats = cluster.stats();
        assert_eq!(stats.creates, 1);
        assert_eq!(stats.deletes, 1);
        assert!(!cluster.contains("storage", "helper-pod-create-pvc-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_timeout_polls_exactly_budget() {
        let cluster = Arc::new(MockCluster::new());
        let orch = orchestrator(cluster.clone(), 3);
        let err = orch
            .run(WorkerAction::Create, &WorkerAction::Create.command(), &opts("/data/v"))
            .await
            .unwrap_err();

        match err {
            WorkerError::Timeout {
                attempts, elapsed, ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(elapsed, Duration::from_secs(3));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        let stats = cluster.stats();
        // One existence check before dispatch, then the poll budget.
        assert_eq!(stats.gets, 1 + 3);
        assert_eq!(stats.deletes, 1);
        assert!(!cluster.contains("storage", "helper-pod-create-pvc-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reuses_existing_task() {
        let cluster = Arc::new(MockCluster::succeeding());
        let orch = orchestrator(cluster.clone(), 5);
        let existing = orch
            .builder()
            .build(WorkerAction::Create, &WorkerAction::Create.command(), &opts("/data/v"))
            .unwrap();
        cluster.insert_task(existing);

        orch.run(WorkerAction::Create, &WorkerAction::Create.command(), &opts("/data/v"))
            .await
            .unwrap();

        let stats = cluster.stats();
        assert_eq!(stats.creates, 0);
        assert_eq!(stats.deletes, 0);
        assert!(cluster.contains("storage", "helper-pod-create-pvc-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_tolerates_create_race() {
        let cluster = Arc::new(MockCluster::with_behavior(MockBehavior {
            succeed_after_reads: Some(1),
            conflict_on_create: true,
            ..MockBehavior::default()
        }));
        let orch = orchestrator(cluster.clone(), 5);
        orch.run(WorkerAction::Create, &WorkerAction::Create.command(), &opts("/data/v"))
            .await
            .unwrap();

        let stats = cluster.stats();
        assert_eq!(stats.create_conflicts, 1);
        assert_eq!(stats.deletes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_poll_error_aborts_and_cleans_up() {
        let cluster = Arc::new(MockCluster::with_behavior(MockBehavior {
            fail_reads: true,
            ..MockBehavior::default()
        }));
        let orch = orchestrator(cluster.clone(), 30);
        let err = orch
            .run(WorkerAction::Delete, &WorkerAction::Delete.command(), &opts("/data/v"))
            .await
            .unwrap_err();

        assert!(matches!(err, WorkerError::Dispatch { .. }));
        assert_eq!(cluster.stats().gets, 2);
        assert_eq!(cluster.stats().deletes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_failure_does_not_change_outcome() {
        let cluster = Arc::new(MockCluster::with_behavior(MockBehavior {
            succeed_after_reads: Some(1),
            fail_deletes: true,
            ..MockBehavior::default()
        }));
        let orch = orchestrator(cluster.clone(), 5);
        orch.run(WorkerAction::Create, &WorkerAction::Create.command(), &opts("/data/v"))
            .await
            .unwrap();
        assert_eq!(cluster.stats().deletes, 1);
    }

    #[tokio::test]
    async fn test_run_requires_node_for_per_node_topology() {
        let cluster = Arc::new(MockCluster::succeeding());
        let orch = orchestrator(cluster.clone(), 5);
        let mut o = opts("/data/v");
        o.node.clear();
        let err = orch
            .run(WorkerAction::Create, &WorkerAction::Create.command(), &o)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Validation(ValidationError::EmptyField)));
        assert_eq!(cluster.stats(), Default::default());
    }
}
