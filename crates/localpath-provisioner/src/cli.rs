use crate::cluster::ClusterClient;
use crate::config::{ConfigSource, ConfigStore};
use crate::kube_api::KubeApiClient;
use crate::pod::WorkerPod;
use crate::provisioner::{ProvisionRequest, Provisioner};
use crate::settings::ProvisionerSettings;
use crate::types::PersistentVolume;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser)]
#[command(name = "lpp")]
#[command(about = "Local path volume provisioner", long_about = None)]
pub struct Cli {
    /// Settings file (TOML or JSON).
    #[arg(long, env = "LPP_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Path config source: a `.json` file or inline JSON.
    #[arg(short, long, env = "LPP_CONFIG")]
    pub config: Option<String>,

    /// Namespace worker tasks run in.
    #[arg(short, long, env = "LPP_NAMESPACE")]
    pub namespace: Option<String>,

    #[arg(long, env = "LPP_HELPER_IMAGE")]
    pub helper_image: Option<String>,

    #[arg(long, env = "LPP_HELPER_POD_FILE")]
    pub helper_pod_file: Option<PathBuf>,

    #[arg(long, env = "LPP_CONFIGMAP_NAME")]
    pub configmap_name: Option<String>,

    #[arg(long, env = "LPP_SERVICE_ACCOUNT")]
    pub service_account: Option<String>,

    /// API server URL. Defaults to the in-cluster service.
    #[arg(long, env = "LPP_API_SERVER")]
    pub api_server: Option<String>,

    #[arg(long, env = "LPP_TOKEN")]
    pub token: Option<String>,

    /// Emit logs as JSON.
    #[arg(long)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate a path config and print its normalized form.
    CheckConfig { source: String },
    /// Provision one volume and print its descriptor.
    Provision {
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Delete one volume.
    Delete {
        #[arg(short, long)]
        volume: PathBuf,
    },
    /// Keep reloading the path config until interrupted.
    Watch,
}

impl Cli {
    /// Settings from the settings file (or defaults), with flags applied on top.
    pub fn resolve_settings(&self) -> Result<ProvisionerSettings> {
        let mut settings = match &self.settings {
            Some(path) => ProvisionerSettings::from_file(path)
                .with_context(|| format!("failed to load settings {}", path.display()))?,
            None => ProvisionerSettings::default(),
        };
        if let Some(source) = &self.config {
            settings.config_source = source.clone();
        }
        if let Some(namespace) = &self.namespace {
            settings.namespace = namespace.clone();
        }
        if let Some(image) = &self.helper_image {
            settings.helper_image = image.clone();
        }
        if let Some(file) = &self.helper_pod_file {
            settings.helper_pod_template = file.clone();
        }
        if let Some(name) = &self.configmap_name {
            settings.script_config_map = name.clone();
        }
        if let Some(account) = &self.service_account {
            settings.service_account = account.clone();
        }
        Ok(settings)
    }

    pub async fn run(self) -> Result<()> {
        let settings = self.resolve_settings()?;
        match &self.command {
            Command::CheckConfig { source } => check_config(source, &settings).await,
            Command::Provision { request } => self.provision(request, settings).await,
            Command::Delete { volume } => self.delete(volume, settings).await,
            Command::Watch => watch_config(settings).await,
        }
    }

    fn cluster(&self) -> Result<Arc<dyn ClusterClient>> {
        let client = match &self.api_server {
            Some(url) => KubeApiClient::new(url.clone(), self.token.clone()),
            None => KubeApiClient::in_cluster().context("failed to configure in-cluster client")?,
        };
        Ok(Arc::new(client))
    }

    async fn provisioner(&self, settings: ProvisionerSettings) -> Result<Provisioner> {
        let store = open_store(&settings.config_source, &settings).await?;
        let template = WorkerPod::load_template(&settings.helper_pod_template)?;
        let provisioner = Provisioner::with_cluster(
            self.cluster()?,
            Arc::new(store),
            &template,
            Arc::new(settings),
        )?;
        Ok(provisioner)
    }

    async fn provision(&self, request: &Path, settings: ProvisionerSettings) -> Result<()> {
        let text = tokio::fs::read_to_string(request)
            .await
            .with_context(|| format!("failed to read request {}", request.display()))?;
        let req: ProvisionRequest = serde_json::from_str(&text)?;
        let (volume, _) = self.provisioner(settings).await?.provision(&req).await?;
        println!("{}", serde_json::to_string_pretty(&volume)?);
        Ok(())
    }

    async fn delete(&self, volume: &Path, settings: ProvisionerSettings) -> Result<()> {
        let text = tokio::fs::read_to_string(volume)
            .await
            .with_context(|| format!("failed to read volume {}", volume.display()))?;
        let pv: PersistentVolume = serde_json::from_str(&text)?;
        self.provisioner(settings).await?.delete(&pv).await?;
        println!("Volume {} deleted", pv.name());
        Ok(())
    }
}

async fn open_store(source: &str, settings: &ProvisionerSettings) -> Result<ConfigStore> {
    let store = ConfigStore::open(ConfigSource::parse(source), settings.default_cmd_timeout_secs)
        .await?;
    Ok(store)
}

async fn check_config(source: &str, settings: &ProvisionerSettings) -> Result<()> {
    let store = open_store(source, settings).await?;
    let config = store.current();
    println!("Topology: {:?}", config.topology());
    println!("{}", serde_json::to_string_pretty(config.as_ref())?);
    Ok(())
}

async fn watch_config(settings: ProvisionerSettings) -> Result<()> {
    let store = Arc::new(open_store(&settings.config_source, &settings).await?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = store.spawn_refresh(settings.refresh_interval(), shutdown_rx);
    info!("watching {:?}", settings.config_source);

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    handle.await?;
    Ok(())
}
