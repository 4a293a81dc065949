use std::{path::Path, sync::Arc};

use anyhow::Error;
use async_trait::async_trait;

use crate::domain::port::{CommandOutput, CommandRunner, Invocation, ManifestApplier};

pub struct KubectlApplier {
    pub binary: String,
    pub runner: Arc<dyn CommandRunner + Send + Sync>,
}

impl KubectlApplier {
    /// Runs kubectl against the cluster behind `kubeconfig` with arbitrary arguments.
    pub async fn run<I, S>(&self, kubeconfig: &Path, args: I) -> Result<CommandOutput, Error>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        self.runner
            .run(&self.invocation(kubeconfig).args(args))
            .await
    }

    fn invocation(&self, kubeconfig: &Path) -> Invocation {
        Invocation::new(self.binary.as_str()).env("KUBECONFIG", kubeconfig.to_string_lossy())
    }
}

#[async_trait]
impl ManifestApplier for KubectlApplier {
    async fn apply(&self, kubeconfig: &Path, manifest: &[u8]) -> Result<String, Error> {
        let output = self
            .runner
            .run(
                &self
                    .invocation(kubeconfig)
                    .args(["apply", "-f", "-"])
                    .stdin(manifest),
            )
            .await?;
        Ok(output.stdout_lossy())
    }
}
