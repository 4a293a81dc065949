use std::{path::PathBuf, sync::Arc};

use anyhow::{anyhow, Context, Error};
use async_trait::async_trait;
use bollard::{
    container::LogOutput,
    exec::{CreateExecOptions, StartExecResults},
    Docker,
};
use futures::StreamExt;
use log::{debug, info};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::domain::{
    error::KlusterError,
    port::{ArchiveReader, ClusterNode, ClusterProvider, CommandOutput, CommandRunner, Invocation},
};

// Suffix of the haproxy container kind adds in front of multiple control planes.
const LOAD_BALANCER_SUFFIX: &str = "-external-load-balancer";

/// Local cluster managed by the kind CLI, its nodes being docker containers.
pub struct KindCluster {
    pub name: String,
    pub binary: String,
    pub kubeconfig_dir: PathBuf,
    pub kind_config: Option<String>,
    pub node_image: Option<String>,
    pub runner: Arc<dyn CommandRunner + Send + Sync>,
    pub docker: Docker,
}

impl KindCluster {
    async fn kind<I, S>(&self, args: I) -> Result<CommandOutput, Error>
    where
        I: IntoIterator<Item = S> + Send,
        S: Into<String>,
    {
        self.runner
            .run(&Invocation::new(self.binary.as_str()).args(args))
            .await
    }

    async fn require_existing(&self) -> Result<(), Error> {
        if self.exists().await? {
            Ok(())
        } else {
            Err(KlusterError::ClusterNotFound {
                name: self.name.clone(),
            }
            .into())
        }
    }

    /// Names of the Kubernetes node containers, the external load balancer excluded.
    pub async fn node_names(&self) -> Result<Vec<String>, Error> {
        let output = self.kind(["get", "nodes", "--name", self.name.as_str()]).await?;
        Ok(output
            .stdout_lossy()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.ends_with(LOAD_BALANCER_SUFFIX))
            .map(String::from)
            .collect())
    }
}

#[async_trait]
impl ClusterProvider for KindCluster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, Error> {
        let output = self.kind(["get", "clusters"]).await?;
        Ok(output
            .stdout_lossy()
            .lines()
            .any(|cluster| cluster.trim() == self.name))
    }

    async fn create(&self) -> Result<(), Error> {
        if self.exists().await? {
            return Err(KlusterError::ClusterAlreadyExists {
                name: self.name.clone(),
            }
            .into());
        }
        let mut args = vec!["create", "cluster", "--name", self.name.as_str()];
        if let Some(ref config) = self.kind_config {
            args.extend(["--config", config.as_str()]);
        }
        if let Some(ref image) = self.node_image {
            args.extend(["--image", image.as_str()]);
        }
        info!("Creating kind cluster {}", self.name);
        self.kind(args).await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), Error> {
        self.require_existing().await?;
        info!("Deleting kind cluster {}", self.name);
        self.kind(["delete", "cluster", "--name", self.name.as_str()])
            .await?;
        Ok(())
    }

    async fn kubeconfig_path(&self) -> Result<PathBuf, Error> {
        self.require_existing().await?;
        let output = self
            .kind(["get", "kubeconfig", "--name", self.name.as_str()])
            .await?;
        let path = self.kubeconfig_dir.join(format!("kind-config-{}", self.name));
        tokio::fs::create_dir_all(&self.kubeconfig_dir)
            .await
            .with_context(|| format!("create {}", self.kubeconfig_dir.display()))?;
        tokio::fs::write(&path, &output.stdout)
            .await
            .with_context(|| format!("write kubeconfig {}", path.display()))?;
        Ok(path)
    }

    async fn list_nodes(&self) -> Result<Vec<Box<dyn ClusterNode + Send + Sync>>, Error> {
        Ok(self
            .node_names()
            .await?
            .into_iter()
            .map(|name| {
                Box::new(KindNode {
                    name,
                    docker: self.docker.clone(),
                }) as Box<dyn ClusterNode + Send + Sync>
            })
            .collect())
    }
}

pub struct KindNode {
    pub name: String,
    pub docker: Docker,
}

#[derive(Deserialize)]
struct CriImage {
    status: CriImageStatus,
}

#[derive(Deserialize)]
struct CriImageStatus {
    id: String,
}

impl KindNode {
    async fn exec(&self, cmd: Vec<&str>, stdin: Option<ArchiveReader>) -> Result<Vec<u8>, Error> {
        let program = cmd.first().map(|program| program.to_string()).unwrap_or_default();
        let exec = self
            .docker
            .create_exec(
                &self.name,
                CreateExecOptions {
                    attach_stdin: Some(stdin.is_some()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(cmd),
                    ..Default::default()
                },
            )
            .await
            .with_context(|| format!("create exec on node {}", self.name))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        match self.docker.start_exec(&exec.id, None).await? {
            StartExecResults::Attached { mut output, input } => {
                let feed = async move {
                    if let Some(mut reader) = stdin {
                        let mut input = input;
                        tokio::io::copy(&mut reader, &mut input).await?;
                        input.shutdown().await?;
                    }
                    Ok::<(), Error>(())
                };
                let collect = async {
                    while let Some(chunk) = output.next().await {
                        match chunk? {
                            LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                            LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                            _ => {}
                        }
                    }
                    Ok::<(), Error>(())
                };
                let (fed, collected) = tokio::join!(feed, collect);
                fed.with_context(|| format!("stream input to node {}", self.name))?;
                collected.with_context(|| format!("read output from node {}", self.name))?;
            }
            StartExecResults::Detached => {
                return Err(anyhow!("exec on node {} unexpectedly detached", self.name))
            }
        }

        let exit_code = self.docker.inspect_exec(&exec.id).await?.exit_code;
        exec_result(program, exit_code, stdout, &stderr)
    }
}

#[async_trait]
impl ClusterNode for KindNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn image_identifier(&self, image: &str) -> Result<String, Error> {
        let output = self
            .exec(vec!["crictl", "inspecti", "-o", "json", image], None)
            .await?;
        parse_image_identifier(&output)
    }

    async fn load_image_archive(&self, archive: ArchiveReader) -> Result<(), Error> {
        debug!("Importing image archive on node {}", self.name);
        self.exec(
            vec!["ctr", "--namespace=k8s.io", "images", "import", "--digests", "-"],
            Some(archive),
        )
        .await?;
        Ok(())
    }
}

fn exec_result(
    program: String,
    exit_code: Option<i64>,
    stdout: Vec<u8>,
    stderr: &[u8],
) -> Result<Vec<u8>, Error> {
    match exit_code {
        Some(0) => Ok(stdout),
        Some(code) => Err(KlusterError::CommandFailed {
            program,
            stderr: String::from_utf8_lossy(stderr).trim().to_string(),
        }
        .into()),
        None => Err(anyhow!("{} exited without an exit code", program)),
    }
}

fn parse_image_identifier(output: &[u8]) -> Result<String, Error> {
    let image: CriImage =
        serde_json::from_slice(output).context("parse crictl inspecti output")?;
    Ok(image.status.id)
}
