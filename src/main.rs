use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Error};
use bollard::{Docker, API_DEFAULT_VERSION};
use clap::{Parser, Subcommand};
use domain::{
    port::{ClusterProvider, CommandRunner, ManifestApplier},
    reconcile, DeploymentService, Event,
};
use infra::{
    docker::DockerImageEngine, helm::HelmClient, kind::KindCluster, kubectl::KubectlApplier,
    process::ProcessRunner,
};
use log::{debug, info};

use crate::config::{load_cluster_config, load_config, AppConfig, ApplierKind};

mod config;
mod domain;
mod infra;

/// Local Kubernetes cluster deployments from a single description file.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Cluster description file
    #[arg(long, env = "KLUSTER_CONFIG", default_value = "cluster.yaml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the cluster if needed, then apply resources and install charts
    Deploy,
    /// Delete the cluster
    Destroy,
    /// Print the path of the cluster kubeconfig
    KubeconfigPath,
    /// Run kubectl against the cluster
    Kubectl {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let app_config = load_config()?;
    debug!("Loaded config {:?}", app_config);
    let cluster_config = load_cluster_config(&cli.config)?;

    let docker = Docker::connect_with_socket(&app_config.docker_socket, 120, API_DEFAULT_VERSION)
        .context("Can't connect to docker socket")?;
    let runner: Arc<dyn CommandRunner + Send + Sync> = Arc::new(ProcessRunner);
    let cluster = KindCluster {
        name: cluster_config.name.clone(),
        binary: app_config.kind_binary.clone(),
        kubeconfig_dir: app_config.kubeconfig_dir.clone(),
        kind_config: cluster_config.kind_config.clone(),
        node_image: cluster_config.node_image.clone(),
        runner: runner.clone(),
        docker: docker.clone(),
    };
    let kubectl = KubectlApplier {
        binary: app_config.kubectl_binary.clone(),
        runner: runner.clone(),
    };

    match cli.command {
        Command::Deploy => {
            info!("Deploying cluster {}", cluster_config.name);
            let service = service(&app_config, cluster, kubectl, docker, runner)?;
            reconcile(Event::Deploy(cluster_config), &service).await
        }
        Command::Destroy => {
            let service = service(&app_config, cluster, kubectl, docker, runner)?;
            reconcile(Event::Destroy(cluster_config), &service).await
        }
        Command::KubeconfigPath => {
            println!("{}", cluster.kubeconfig_path().await?.display());
            Ok(())
        }
        Command::Kubectl { args } => {
            let kubeconfig = cluster.kubeconfig_path().await?;
            print!("{}", kubectl.run(&kubeconfig, args).await?.stdout_lossy());
            Ok(())
        }
    }
}

fn service(
    app_config: &AppConfig,
    cluster: KindCluster,
    kubectl: KubectlApplier,
    docker: Docker,
    runner: Arc<dyn CommandRunner + Send + Sync>,
) -> Result<DeploymentService, Error> {
    Ok(DeploymentService {
        cluster: Box::new(cluster),
        images: Box::new(DockerImageEngine { docker }),
        package_manager: Box::new(HelmClient {
            binary: app_config.helm_binary.clone(),
            tiller: app_config.helm.tiller,
            runner: runner.clone(),
        }),
        applier: applier(app_config.applier, kubectl)?,
        runner,
        retry: (&app_config.install).into(),
    })
}

fn applier(
    kind: ApplierKind,
    kubectl: KubectlApplier,
) -> Result<Box<dyn ManifestApplier + Send + Sync>, Error> {
    match kind {
        ApplierKind::Kubectl => Ok(Box::new(kubectl)),
        #[cfg(feature = "kube")]
        ApplierKind::ServerSide => Ok(Box::new(infra::kubernetes::ServerSideApplier::default())),
        #[cfg(not(feature = "kube"))]
        ApplierKind::ServerSide => Err(anyhow::anyhow!(
            "server-side apply requires the kube feature"
        )),
    }
}
