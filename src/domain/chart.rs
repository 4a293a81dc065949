use std::{path::Path, time::Duration};

use anyhow::{Context, Error};
use log::{error, info, warn};

use super::{
    error::KlusterError,
    image::ImageBuilder,
    loader::load_image,
    model::{App, Chart, Image, Values},
    port::{ClusterProvider, CommandRunner, ImageEngine, Invocation, PackageManager},
};

const PULL_POLICY: &str = "IfNotPresent";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            interval: Duration::from_secs(15),
        }
    }
}

pub struct ChartInstaller<'a> {
    pub cluster: &'a (dyn ClusterProvider + Send + Sync),
    pub images: &'a (dyn ImageEngine + Send + Sync),
    pub package_manager: &'a (dyn PackageManager + Send + Sync),
    pub runner: &'a (dyn CommandRunner + Send + Sync),
    pub retry: &'a RetryPolicy,
}

impl ChartInstaller<'_> {
    pub async fn deploy(&self, chart: &Chart, installed: bool) -> Result<(), Error> {
        let kubeconfig = self
            .cluster
            .kubeconfig_path()
            .await
            .context("resolve kubeconfig path")?;

        info!("Processing chart {}", chart.name);
        let values = self.prepare_apps(chart).await.context("prepare apps")?;

        if installed {
            info!("Upgrading chart {}", chart.name);
            match self
                .package_manager
                .upgrade(&kubeconfig, &chart.name, &chart.path, &values)
                .await
                .with_context(|| KlusterError::Upgrade {
                    chart: chart.name.clone(),
                }) {
                Ok(()) => return Ok(()),
                Err(err) => warn!("{:#}, falling back to install", err),
            }
        }

        info!("Installing chart {}", chart.name);
        install_with_retry(
            self.package_manager,
            &kubeconfig,
            chart,
            &values,
            self.retry,
        )
        .await
    }

    // Built images are removed whatever the outcome, they already live in the nodes.
    async fn prepare_apps(&self, chart: &Chart) -> Result<Values, Error> {
        let mut builder = ImageBuilder::new(self.images);
        let result = self.build_apps(chart, &mut builder).await;
        if let Err(err) = builder.cleanup().await {
            error!("Cleanup images of chart {}: {:#}", chart.name, err);
        }
        result
    }

    async fn build_apps(
        &self,
        chart: &Chart,
        builder: &mut ImageBuilder<'_>,
    ) -> Result<Values, Error> {
        let mut values = Values::new();
        for app in &chart.apps {
            info!("Processing app {}", app.name);
            run_before_build(self.runner, app)
                .await
                .with_context(|| format!("before build of app {}", app.name))?;

            let dockerfile = chart.dockerfile_path(app);
            if !dockerfile.is_file() {
                return Err(KlusterError::DockerfileNotFound {
                    app: app.name.clone(),
                    path: dockerfile,
                }
                .into());
            }

            info!("Building image of app {}", app.name);
            let image = builder
                .build_image_with_checksum(&dockerfile, &chart.context_path(app), &app.name)
                .await
                .with_context(|| KlusterError::Build {
                    app: app.name.clone(),
                })?;

            info!("Loading image {} to cluster", image.full_name);
            load_image(self.cluster, self.images, &image.full_name)
                .await
                .with_context(|| format!("load image of app {}", app.name))?;

            extend_values(&mut values, &app.name, &image);
        }
        Ok(values)
    }
}

pub async fn run_before_build(
    runner: &(dyn CommandRunner + Send + Sync),
    app: &App,
) -> Result<(), Error> {
    for script in &app.before_build {
        let mut parts = script.split_whitespace();
        let program = parts.next().ok_or_else(|| KlusterError::InvalidCommand {
            command: script.clone(),
        })?;
        info!("Running {}", script);
        let output = runner.run(&Invocation::new(program).args(parts)).await?;
        let stdout = output.stdout_lossy();
        if !stdout.trim().is_empty() {
            info!("{}", stdout.trim_end());
        }
    }
    Ok(())
}

pub async fn install_with_retry(
    package_manager: &(dyn PackageManager + Send + Sync),
    kubeconfig: &Path,
    chart: &Chart,
    values: &Values,
    retry: &RetryPolicy,
) -> Result<(), Error> {
    let mut retries = 0;
    loop {
        match package_manager
            .install(kubeconfig, &chart.name, &chart.path, values)
            .await
        {
            Ok(()) => return Ok(()),
            Err(err) if retries >= retry.max_retries => {
                return Err(err.context(KlusterError::Install {
                    chart: chart.name.clone(),
                    attempts: retries + 1,
                }))
            }
            Err(err) => {
                retries += 1;
                warn!(
                    "Install of chart {} failed ({:#}), retry {}/{} in {:?}",
                    chart.name, err, retries, retry.max_retries, retry.interval
                );
                tokio::time::sleep(retry.interval).await;
            }
        }
    }
}

pub fn extend_values(values: &mut Values, app_name: &str, image: &Image) {
    values.insert(format!("{}.image.tag", app_name), image.tag.clone());
    values.insert(format!("{}.image.pullPolicy", app_name), PULL_POLICY.to_string());
}
