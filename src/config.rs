use std::{path::Path, path::PathBuf, time::Duration};

use anyhow::{Context, Error};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::domain::{chart::RetryPolicy, model};

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub docker_socket: String,
    pub kind_binary: String,
    pub helm_binary: String,
    pub kubectl_binary: String,
    pub kubeconfig_dir: PathBuf,
    pub applier: ApplierKind,
    pub install: InstallConfig,
    pub helm: HelmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            docker_socket: "/var/run/docker.sock".to_string(),
            kind_binary: "kind".to_string(),
            helm_binary: "helm".to_string(),
            kubectl_binary: "kubectl".to_string(),
            kubeconfig_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".kube"),
            applier: ApplierKind::default(),
            install: InstallConfig::default(),
            helm: HelmConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "kebab-case")]
pub enum ApplierKind {
    #[default]
    Kubectl,
    ServerSide,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallConfig {
    pub max_retries: u32,
    pub retry_interval_secs: u64,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_interval_secs: 15,
        }
    }
}

impl From<&InstallConfig> for RetryPolicy {
    fn from(install: &InstallConfig) -> Self {
        RetryPolicy {
            max_retries: install.max_retries,
            interval: Duration::from_secs(install.retry_interval_secs),
        }
    }
}

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HelmConfig {
    pub tiller: bool,
}

fn environment() -> Environment {
    Environment::with_prefix("kluster")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

pub fn load_config() -> Result<AppConfig, Error> {
    load_config_from(environment())
}

fn load_config_from(environment: Environment) -> Result<AppConfig, Error> {
    let config = Config::builder()
        .add_source(environment)
        .build()
        .context("Can't load configuration")?;

    config
        .try_deserialize()
        .context("Can't deserialize AppConfig from loaded configuration")
}

/// Loads the cluster description (`cluster.yaml`).
pub fn load_cluster_config(path: &Path) -> Result<model::Config, Error> {
    let config = Config::builder()
        .add_source(File::from(path).format(FileFormat::Yaml))
        .build()
        .with_context(|| format!("Can't load cluster configuration {}", path.display()))?;

    config
        .try_deserialize()
        .with_context(|| format!("Invalid cluster configuration {}", path.display()))
}
