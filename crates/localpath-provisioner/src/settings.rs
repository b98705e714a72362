use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{DEFAULT_CMD_TIMEOUT_SECS, DEFAULT_REFRESH_INTERVAL, MIN_REFRESH_INTERVAL};

/// Process-level settings for the provisioner and its worker tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionerSettings {
    /// Namespace the worker tasks run in.
    pub namespace: String,
    /// Image used for model-cache tasks.
    pub helper_image: String,
    pub service_account: String,
    /// Name of the script bundle holding `setup`, `setupcache` and `teardown`.
    pub script_config_map: String,
    /// Pod manifest every worker task starts from.
    pub helper_pod_template: PathBuf,
    /// Path config source: a `.json` file or inline JSON.
    pub config_source: String,
    pub config_refresh_interval_secs: u64,
    pub default_cmd_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Where model-cache tasks mount the volume's parent directory.
    pub model_mount_root: String,
    pub task_name_max_len: usize,
}

impl Default for ProvisionerSettings {
    fn default() -> Self {
        Self {
            namespace: String::from("local-path-storage"),
            helper_image: String::from("busybox:stable"),
            service_account: String::from("local-path-provisioner-service-account"),
            script_config_map: String::from("local-path-config"),
            helper_pod_template: PathBuf::from("/etc/config/helperPod.yaml"),
            config_source: String::from("/etc/config/config.json"),
            config_refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
            default_cmd_timeout_secs: DEFAULT_CMD_TIMEOUT_SECS,
            poll_interval_ms: 1000,
            model_mount_root: String::from("/model"),
            task_name_max_len: 128,
        }
    }
}

impl ProvisionerSettings {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let settings: ProvisionerSettings = toml::from_str(&contents)?;
                Ok(settings)
            }
            "json" => {
                let settings: ProvisionerSettings = serde_json::from_str(&contents)?;
                Ok(settings)
            }
            _ => anyhow::bail!("Unsupported settings file extension: {}", ext),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Config reload period, never shorter than [`MIN_REFRESH_INTERVAL`].
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.config_refresh_interval_secs).max(MIN_REFRESH_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_values() {
        let s = ProvisionerSettings::default();
        assert_eq!(s.namespace, "local-path-storage");
        assert_eq!(s.default_cmd_timeout_secs, 120);
        assert_eq!(s.config_refresh_interval_secs, 30);
        assert_eq!(s.poll_interval(), Duration::from_secs(1));
        assert_eq!(s.model_mount_root, "/model");
        assert_eq!(s.task_name_max_len, 128);
    }

    #[test]
    fn test_from_file_toml_partial() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
namespace = "storage"
helper_image = "registry.local/puller:1.2"
poll_interval_ms = 250
            "#
        )
        .unwrap();

        let s = ProvisionerSettings::from_file(file.path()).unwrap();
        assert_eq!(s.namespace, "storage");
        assert_eq!(s.helper_image, "registry.local/puller:1.2");
        assert_eq!(s.poll_interval(), Duration::from_millis(250));
        assert_eq!(s.script_config_map, "local-path-config");
    }

    #[test]
    fn test_from_file_json() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        writeln!(file, r#"{{"task_name_max_len": 63, "model_mount_root": "/cache"}}"#).unwrap();

        let s = ProvisionerSettings::from_file(file.path()).unwrap();
        assert_eq!(s.task_name_max_len, 63);
        assert_eq!(s.model_mount_root, "/cache");
    }

    #[test]
    fn test_zero_refresh_interval_is_clamped() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "config_refresh_interval_secs = 0").unwrap();

        let s = ProvisionerSettings::from_file(file.path()).unwrap();
        assert_eq!(s.refresh_interval(), MIN_REFRESH_INTERVAL);
    }

    #[test]
    fn test_from_file_unknown_extension() {
        let file = NamedTempFile::with_suffix(".ini").unwrap();
        assert!(ProvisionerSettings::from_file(file.path()).is_err());
    }
}
