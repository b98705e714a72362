//! Control-plane access used by the worker orchestrator.
//!
//! The orchestrator only creates, reads and deletes worker tasks. Everything
//! else about the cluster is owned by the framework invoking the provisioner.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::ClusterError;
use crate::pod::{PodPhase, PodStatus, WorkerPod};

/// Result type for control-plane calls.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// CRUD access to ephemeral worker tasks.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetches a task, or `None` if it does not exist.
    async fn get_task(&self, namespace: &str, name: &str) -> ClusterResult<Option<WorkerPod>>;

    /// Creates a task. Returns [`ClusterError::AlreadyExists`] on a name clash.
    async fn create_task(&self, pod: &WorkerPod) -> ClusterResult<()>;

    /// Deletes a task.
    async fn delete_task(&self, namespace: &str, name: &str) -> ClusterResult<()>;
}

/// Call counters recorded by [`MockCluster`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    pub gets: u64,
    pub creates: u64,
    pub deletes: u64,
    pub create_conflicts: u64,
}

/// Scripted behaviour for [`MockCluster`].
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Tasks report `Succeeded` once they have been read this many times
    /// after creation. `None` keeps them pending forever.
    pub succeed_after_reads: Option<u32>,
    /// `create_task` stores the task but reports `AlreadyExists`, as if a
    /// concurrent caller won the race.
    pub conflict_on_create: bool,
    /// `get_task` fails with an API error once the task exists.
    pub fail_reads: bool,
    /// `delete_task` fails with an API error.
    pub fail_deletes: bool,
}

#[derive(Debug)]
struct MockPod {
    pod: WorkerPod,
    reads: u32,
}

/// In-memory cluster for tests and dry runs.
#[derive(Debug, Default)]
pub struct MockCluster {
    pods: Mutex<HashMap<(String, String), MockPod>>,
    behavior: Mutex<MockBehavior>,
    stats: Mutex<MockStats>,
    created: Mutex<Vec<WorkerPod>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        let cluster = Self::new();
        *cluster.behavior.lock() = behavior;
        cluster
    }

    /// Tasks succeed on their first read after creation.
    pub fn succeeding() -> Self {
        Self::with_behavior(MockBehavior {
            succeed_after_reads: Some(1),
            ..MockBehavior::default()
        })
    }

    /// Places a task directly, bypassing `create_task` and its counters.
    pub fn insert_task(&self, pod: WorkerPod) {
        let key = key_of(&pod);
        self.pods.lock().insert(key, MockPod { pod, reads: 0 });
    }

    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.pods
            .lock()
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    pub fn stats(&self) -> MockStats {
        self.stats.lock().clone()
    }

    /// Every task passed to `create_task`, in call order.
    pub fn created(&self) -> Vec<WorkerPod> {
        self.created.lock().clone()
    }
}

fn key_of(pod: &WorkerPod) -> (String, String) {
    (
        pod.metadata.namespace.clone().unwrap_or_default(),
        pod.metadata.name.clone(),
    )
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn get_task(&self, namespace: &str, name: &str) -> ClusterResult<Option<WorkerPod>> {
        self.stats.lock().gets += 1;
        let behavior = self.behavior.lock().clone();
        let mut pods = self.pods.lock();
        let Some(entry) = pods.get_mut(&(namespace.to_string(), name.to_string())) else {
            return Ok(None);
        };
        if behavior.fail_reads {
            return Err(ClusterError::Api {
                status: 500,
                message: "injected read failure".to_string(),
            });
        }
        entry.reads += 1;
        if let Some(after) = behavior.succeed_after_reads {
            if entry.reads >= after {
                entry.pod.status = Some(PodStatus {
                    phase: Some(PodPhase::Succeeded),
                });
            }
        }
        Ok(Some(entry.pod.clone()))
    }

    async fn create_task(&self, pod: &WorkerPod) -> ClusterResult<()> {
        self.stats.lock().creates += 1;
        self.created.lock().push(pod.clone());
        let conflict = self.behavior.lock().conflict_on_create;
        let key = key_of(pod);
        let mut pods = self.pods.lock();
        if pods.contains_key(&key) || conflict {
            pods.entry(key).or_insert_with(|| MockPod {
                pod: pod.clone(),
                reads: 0,
            });
            self.stats.lock().create_conflicts += 1;
            return Err(ClusterError::AlreadyExists {
                kind: "pod",
                name: pod.name().to_string(),
            });
        }
        let mut stored = pod.clone();
        stored.status = Some(PodStatus {
            phase: Some(PodPhase::Pending),
        });
        debug!("mock cluster created task {}", pod.name());
        pods.insert(key, MockPod {
            pod: stored,
            reads: 0,
        });
        Ok(())
    }

    async fn delete_task(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.stats.lock().deletes += 1;
        if self.behavior.lock().fail_deletes {
            return Err(ClusterError::Api {
                status: 500,
                message: "injected delete failure".to_string(),
            });
        }
        match self
            .pods
            .lock()
            .remove(&(namespace.to_string(), name.to_string()))
        {
            Some(_) => Ok(()),
            None => Err(ClusterError::NotFound {
                kind: "pod",
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectMeta;

    fn pod(name: &str) -> WorkerPod {
        WorkerPod {
            api_version: "v1".to_string(),
            kind: "Pod".to_string(),
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: Some("ns".to_string()),
                ..ObjectMeta::default()
            },
            spec: Default::default(),
            status: None,
        }
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let cluster = MockCluster::succeeding();
        assert!(cluster.get_task("ns", "a").await.unwrap().is_none());

        cluster.create_task(&pod("a")).await.unwrap();
        let fetched = cluster.get_task("ns", "a").await.unwrap().unwrap();
        assert!(fetched.is_succeeded());

        cluster.delete_task("ns", "a").await.unwrap();
        assert!(!cluster.contains("ns", "a"));
        assert_eq!(
            cluster.stats(),
            MockStats {
                gets: 2,
                creates: 1,
                deletes: 1,
                create_conflicts: 0
            }
        );
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let cluster = MockCluster::new();
        cluster.create_task(&pod("a")).await.unwrap();
        let err = cluster.create_task(&pod("a")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_pending_forever_without_script() {
        let cluster = MockCluster::new();
        cluster.create_task(&pod("a")).await.unwrap();
        for _ in 0..5 {
            let p = cluster.get_task("ns", "a").await.unwrap().unwrap();
            assert_eq!(p.phase(), Some(PodPhase::Pending));
        }
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let cluster = MockCluster::new();
        assert!(cluster.delete_task("ns", "x").await.unwrap_err().is_not_found());
    }
}
