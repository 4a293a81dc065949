use std::path::{Path, PathBuf};

use anyhow::Error;
use async_trait::async_trait;
use itertools::Itertools;
use tokio::io::AsyncRead;

use super::model::Values;

pub type ArchiveReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait ClusterProvider {
    fn name(&self) -> &str;

    async fn exists(&self) -> Result<bool, Error>;

    async fn create(&self) -> Result<(), Error>;

    async fn destroy(&self) -> Result<(), Error>;

    async fn kubeconfig_path(&self) -> Result<PathBuf, Error>;

    async fn list_nodes(&self) -> Result<Vec<Box<dyn ClusterNode + Send + Sync>>, Error>;
}

#[async_trait]
pub trait ClusterNode {
    fn name(&self) -> &str;

    async fn image_identifier(&self, image: &str) -> Result<String, Error>;

    async fn load_image_archive(&self, archive: ArchiveReader) -> Result<(), Error>;
}

#[async_trait]
pub trait ImageEngine {
    async fn build(&self, dockerfile: &Path, context: &Path, tag: &str) -> Result<(), Error>;

    async fn inspect_identifier(&self, image: &str) -> Result<String, Error>;

    async fn tag(&self, source: &str, target: &str) -> Result<(), Error>;

    async fn remove(&self, image: &str) -> Result<(), Error>;

    async fn save(&self, image: &str, archive: &Path) -> Result<(), Error>;
}

#[async_trait]
pub trait PackageManager {
    async fn init_control_plane(&self, kubeconfig: &Path) -> Result<(), Error>;

    async fn install(
        &self,
        kubeconfig: &Path,
        name: &str,
        path: &str,
        values: &Values,
    ) -> Result<(), Error>;

    async fn upgrade(
        &self,
        kubeconfig: &Path,
        name: &str,
        path: &str,
        values: &Values,
    ) -> Result<(), Error>;
}

#[async_trait]
pub trait ManifestApplier {
    /// Applies a (possibly multi-document) manifest and returns the client output.
    async fn apply(&self, kubeconfig: &Path, manifest: &[u8]) -> Result<String, Error>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: Option<Vec<u8>>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .join(" ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }
}

#[async_trait]
pub trait CommandRunner {
    /// Runs the invocation to completion. A non-zero exit is an error carrying stderr.
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, Error>;
}
