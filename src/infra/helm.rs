use std::{path::Path, sync::Arc};

use anyhow::Error;
use async_trait::async_trait;
use itertools::Itertools;
use log::{debug, info};

use crate::domain::{
    model::Values,
    port::{CommandRunner, Invocation, PackageManager},
};

/// Helm CLI driven through a command runner.
///
/// With `tiller` set the v2 command line is used: `helm init` bootstraps the
/// in-cluster control plane and releases are named through `--name`.
pub struct HelmClient {
    pub binary: String,
    pub tiller: bool,
    pub runner: Arc<dyn CommandRunner + Send + Sync>,
}

impl HelmClient {
    fn invocation(&self, kubeconfig: &Path) -> Invocation {
        Invocation::new(self.binary.as_str()).env("KUBECONFIG", kubeconfig.to_string_lossy())
    }
}

#[async_trait]
impl PackageManager for HelmClient {
    async fn init_control_plane(&self, kubeconfig: &Path) -> Result<(), Error> {
        let invocation = if self.tiller {
            info!("Installing tiller");
            self.invocation(kubeconfig).args(["init", "--wait"])
        } else {
            self.invocation(kubeconfig).arg("version")
        };
        let output = self.runner.run(&invocation).await?;
        debug!("{}", output.stdout_lossy().trim_end());
        Ok(())
    }

    async fn install(
        &self,
        kubeconfig: &Path,
        name: &str,
        path: &str,
        values: &Values,
    ) -> Result<(), Error> {
        let invocation = if self.tiller {
            self.invocation(kubeconfig)
                .args(["install", path, "--name", name])
        } else {
            self.invocation(kubeconfig).args(["install", name, path])
        };
        self.runner.run(&with_values(invocation, values)).await?;
        Ok(())
    }

    async fn upgrade(
        &self,
        kubeconfig: &Path,
        name: &str,
        path: &str,
        values: &Values,
    ) -> Result<(), Error> {
        let invocation = self.invocation(kubeconfig).args(["upgrade", name, path]);
        self.runner.run(&with_values(invocation, values)).await?;
        Ok(())
    }
}

fn with_values(invocation: Invocation, values: &Values) -> Invocation {
    if values.is_empty() {
        return invocation;
    }
    invocation.arg("--set").arg(
        values
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .join(","),
    )
}
