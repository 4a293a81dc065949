use std::sync::Arc;

use anyhow::{Context, Error};
use chart::{ChartInstaller, RetryPolicy};
use error::KlusterError;
use log::info;
use model::Config;
use port::{ClusterProvider, CommandRunner, ImageEngine, ManifestApplier, PackageManager};
use resource::deploy_resource;

pub mod chart;
pub mod error;
pub mod image;
pub mod loader;
pub mod model;
pub mod port;
pub mod resolver;
pub mod resource;
#[cfg(test)]
pub mod testing;

/// Grants the chart manager's service account cluster-wide rights.
pub const CONTROL_PLANE_RBAC: &str = "\
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRoleBinding
metadata:
  name: add-on-cluster-admin
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: cluster-admin
subjects:
  - kind: ServiceAccount
    name: default
    namespace: kube-system
";

pub struct DeploymentService {
    pub cluster: Box<dyn ClusterProvider + Send + Sync>,
    pub images: Box<dyn ImageEngine + Send + Sync>,
    pub package_manager: Box<dyn PackageManager + Send + Sync>,
    pub applier: Box<dyn ManifestApplier + Send + Sync>,
    pub runner: Arc<dyn CommandRunner + Send + Sync>,
    pub retry: RetryPolicy,
}

pub enum Event {
    Deploy(Config),
    Destroy(Config),
}

pub async fn reconcile(event: Event, service: &DeploymentService) -> Result<(), Error> {
    match event {
        Event::Deploy(config) => deploy(&config, service).await,
        Event::Destroy(config) => {
            info!("Destroying cluster {}", config.name);
            service.cluster.destroy().await
        }
    }
}

async fn deploy(config: &Config, service: &DeploymentService) -> Result<(), Error> {
    let cluster_name = service.cluster.name().to_string();
    let exists = service
        .cluster
        .exists()
        .await
        .with_context(|| KlusterError::ClusterQuery {
            name: cluster_name.clone(),
        })?;

    let was_created = !exists;
    if was_created {
        info!("Cluster {} not found, creating it", cluster_name);
        service
            .cluster
            .create()
            .await
            .with_context(|| KlusterError::ClusterCreate {
                name: cluster_name.clone(),
            })?;
        init_chart_manager(service)
            .await
            .context("initialize chart manager")?;
    } else {
        info!("Cluster {} already exists", cluster_name);
    }

    let kubeconfig = service
        .cluster
        .kubeconfig_path()
        .await
        .context("resolve kubeconfig path")?;
    for resource in &config.resources {
        deploy_resource(resource, service.applier.as_ref(), &kubeconfig)
            .await
            .with_context(|| format!("deploy resource {}", resource.name))?;
    }

    let installer = ChartInstaller {
        cluster: service.cluster.as_ref(),
        images: service.images.as_ref(),
        package_manager: service.package_manager.as_ref(),
        runner: service.runner.as_ref(),
        retry: &service.retry,
    };
    for chart in &config.charts {
        installer
            .deploy(chart, !was_created)
            .await
            .with_context(|| format!("deploy chart {}", chart.name))?;
    }

    info!("Cluster {} is up-to-date", cluster_name);
    Ok(())
}

async fn init_chart_manager(service: &DeploymentService) -> Result<(), Error> {
    let kubeconfig = service
        .cluster
        .kubeconfig_path()
        .await
        .context("resolve kubeconfig path")?;
    service
        .applier
        .apply(&kubeconfig, CONTROL_PLANE_RBAC.as_bytes())
        .await
        .context("create chart manager role binding")?;
    service
        .package_manager
        .init_control_plane(&kubeconfig)
        .await
}
