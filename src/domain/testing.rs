//! In-memory doubles for every port, recording what the core asked of them.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Error};
use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use super::{
    error::KlusterError,
    model::Values,
    port::{
        ArchiveReader, ClusterNode, ClusterProvider, CommandOutput, CommandRunner, ImageEngine,
        Invocation, ManifestApplier, PackageManager,
    },
};

/// Ordered log of calls shared between doubles.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct NodeState {
    loads: Vec<Vec<u8>>,
}

#[derive(Clone)]
pub struct FakeNode {
    name: String,
    identifier: Option<String>,
    fail_load: bool,
    delay: Duration,
    state: Arc<Mutex<NodeState>>,
}

impl FakeNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            identifier: None,
            fail_load: false,
            delay: Duration::ZERO,
            state: Arc::default(),
        }
    }

    pub fn holding(mut self, identifier: &str) -> Self {
        self.identifier = Some(identifier.to_string());
        self
    }

    pub fn failing_load(mut self) -> Self {
        self.fail_load = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn loads(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().loads.clone()
    }
}

#[async_trait]
impl ClusterNode for FakeNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn image_identifier(&self, image: &str) -> Result<String, Error> {
        self.identifier
            .clone()
            .ok_or_else(|| anyhow!("no such image {} on node {}", image, self.name))
    }

    async fn load_image_archive(&self, mut archive: ArchiveReader) -> Result<(), Error> {
        tokio::time::sleep(self.delay).await;
        if self.fail_load {
            return Err(anyhow!("ctr import failed"));
        }
        let mut content = Vec::new();
        archive.read_to_end(&mut content).await?;
        self.state.lock().unwrap().loads.push(content);
        Ok(())
    }
}

pub struct FakeCluster {
    name: String,
    exists: Mutex<bool>,
    fail_query: bool,
    fail_create: bool,
    nodes: Vec<FakeNode>,
    journal: Journal,
}

impl FakeCluster {
    pub fn existing(nodes: Vec<FakeNode>) -> Self {
        Self {
            name: "test".to_string(),
            exists: Mutex::new(true),
            fail_query: false,
            fail_create: false,
            nodes,
            journal: Journal::default(),
        }
    }

    pub fn absent() -> Self {
        Self {
            exists: Mutex::new(false),
            ..Self::existing(vec![])
        }
    }

    pub fn failing_query(mut self) -> Self {
        self.fail_query = true;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn with_journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    pub fn nodes(&self) -> &[FakeNode] {
        &self.nodes
    }

    fn require_existing(&self) -> Result<(), Error> {
        if *self.exists.lock().unwrap() {
            Ok(())
        } else {
            Err(KlusterError::ClusterNotFound {
                name: self.name.clone(),
            }
            .into())
        }
    }
}

#[async_trait]
impl ClusterProvider for FakeCluster {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, Error> {
        self.journal.record("cluster exists");
        if self.fail_query {
            return Err(anyhow!("provider unavailable"));
        }
        Ok(*self.exists.lock().unwrap())
    }

    async fn create(&self) -> Result<(), Error> {
        self.journal.record("cluster create");
        if self.fail_create {
            return Err(anyhow!("node image not found"));
        }
        *self.exists.lock().unwrap() = true;
        Ok(())
    }

    async fn destroy(&self) -> Result<(), Error> {
        self.journal.record("cluster destroy");
        self.require_existing()?;
        *self.exists.lock().unwrap() = false;
        Ok(())
    }

    async fn kubeconfig_path(&self) -> Result<PathBuf, Error> {
        self.require_existing()?;
        Ok(PathBuf::from("/tmp/kind-config-test"))
    }

    async fn list_nodes(&self) -> Result<Vec<Box<dyn ClusterNode + Send + Sync>>, Error> {
        Ok(self
            .nodes
            .iter()
            .cloned()
            .map(|node| Box::new(node) as Box<dyn ClusterNode + Send + Sync>)
            .collect())
    }
}

#[derive(Default)]
struct ImageState {
    builds: Vec<(PathBuf, String)>,
    tags: Vec<(String, String)>,
    removed: Vec<String>,
    saves: Vec<(String, PathBuf)>,
    fail_build: bool,
    fail_remove: Option<String>,
}

pub struct FakeImageEngine {
    identifier: Option<String>,
    state: Mutex<ImageState>,
}

impl FakeImageEngine {
    pub fn with_identifier(identifier: &str) -> Self {
        Self {
            identifier: Some(identifier.to_string()),
            state: Mutex::default(),
        }
    }

    pub fn missing() -> Self {
        Self {
            identifier: None,
            state: Mutex::default(),
        }
    }

    pub fn fail_build(&self) {
        self.state.lock().unwrap().fail_build = true;
    }

    pub fn fail_remove(&self, image: &str) {
        self.state.lock().unwrap().fail_remove = Some(image.to_string());
    }

    pub fn builds(&self) -> Vec<(PathBuf, String)> {
        self.state.lock().unwrap().builds.clone()
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().tags.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn saves(&self) -> Vec<(String, PathBuf)> {
        self.state.lock().unwrap().saves.clone()
    }
}

#[async_trait]
impl ImageEngine for FakeImageEngine {
    async fn build(&self, dockerfile: &Path, _context: &Path, tag: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_build {
            return Err(anyhow!("RUN make: exit code 2"));
        }
        state.builds.push((dockerfile.to_path_buf(), tag.to_string()));
        Ok(())
    }

    async fn inspect_identifier(&self, image: &str) -> Result<String, Error> {
        self.identifier
            .clone()
            .ok_or_else(|| anyhow!("No such image: {}", image))
    }

    async fn tag(&self, source: &str, target: &str) -> Result<(), Error> {
        self.state
            .lock()
            .unwrap()
            .tags
            .push((source.to_string(), target.to_string()));
        Ok(())
    }

    async fn remove(&self, image: &str) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        if state.fail_remove.as_deref() == Some(image) {
            return Err(anyhow!("image is being used by running container"));
        }
        state.removed.push(image.to_string());
        Ok(())
    }

    async fn save(&self, image: &str, archive: &Path) -> Result<(), Error> {
        tokio::fs::write(archive, format!("archive of {}", image)).await?;
        self.state
            .lock()
            .unwrap()
            .saves
            .push((image.to_string(), archive.to_path_buf()));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageCall {
    pub action: &'static str,
    pub name: String,
    pub values: Values,
}

impl PackageCall {
    pub fn install(name: &str, values: Values) -> Self {
        Self {
            action: "install",
            name: name.to_string(),
            values,
        }
    }

    pub fn upgrade(name: &str, values: Values) -> Self {
        Self {
            action: "upgrade",
            name: name.to_string(),
            values,
        }
    }
}

#[derive(Default)]
struct PackageState {
    calls: Vec<PackageCall>,
    fail_upgrade: bool,
    failing_installs: u32,
}

#[derive(Default)]
pub struct FakePackageManager {
    state: Mutex<PackageState>,
    journal: Journal,
}

impl FakePackageManager {
    pub fn with_journal(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Self::default()
        }
    }

    pub fn fail_upgrade(&self) {
        self.state.lock().unwrap().fail_upgrade = true;
    }

    pub fn fail_installs(&self, count: u32) {
        self.state.lock().unwrap().failing_installs = count;
    }

    pub fn calls(&self) -> Vec<PackageCall> {
        self.state.lock().unwrap().calls.clone()
    }
}

#[async_trait]
impl PackageManager for FakePackageManager {
    async fn init_control_plane(&self, _kubeconfig: &Path) -> Result<(), Error> {
        self.journal.record("package manager init");
        Ok(())
    }

    async fn install(
        &self,
        _kubeconfig: &Path,
        name: &str,
        _path: &str,
        values: &Values,
    ) -> Result<(), Error> {
        self.journal.record(format!("install {}", name));
        let mut state = self.state.lock().unwrap();
        state.calls.push(PackageCall::install(name, values.clone()));
        if state.failing_installs > 0 {
            state.failing_installs -= 1;
            return Err(anyhow!("Error: could not find a ready tiller pod"));
        }
        Ok(())
    }

    async fn upgrade(
        &self,
        _kubeconfig: &Path,
        name: &str,
        _path: &str,
        values: &Values,
    ) -> Result<(), Error> {
        self.journal.record(format!("upgrade {}", name));
        let mut state = self.state.lock().unwrap();
        state.calls.push(PackageCall::upgrade(name, values.clone()));
        if state.fail_upgrade {
            return Err(anyhow!("Error: UPGRADE FAILED: \"{}\" has no deployed releases", name));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeApplier {
    applied: Mutex<Vec<String>>,
    fail_marker: Option<String>,
    journal: Journal,
}

impl FakeApplier {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    pub fn with_journal(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            ..Self::default()
        }
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManifestApplier for FakeApplier {
    async fn apply(&self, _kubeconfig: &Path, manifest: &[u8]) -> Result<String, Error> {
        let manifest = String::from_utf8_lossy(manifest).to_string();
        self.journal.record(format!("apply {}", manifest.trim_end()));
        if let Some(ref marker) = self.fail_marker {
            if manifest.contains(marker.as_str()) {
                return Err(anyhow!("error validating data"));
            }
        }
        self.applied.lock().unwrap().push(manifest);
        Ok("configured".to_string())
    }
}

#[derive(Default)]
pub struct FakeRunner {
    invocations: Mutex<Vec<Invocation>>,
    failures: Mutex<Vec<(String, String)>>,
    outputs: Mutex<Vec<(String, String)>>,
}

impl FakeRunner {
    /// Fails invocations whose command line equals `command_line`, with `stderr`.
    pub fn fail_on(&self, command_line: &str, stderr: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((command_line.to_string(), stderr.to_string()));
    }

    /// Answers invocations whose command line equals `command_line` with `stdout`.
    pub fn respond(&self, command_line: &str, stdout: &str) {
        self.outputs
            .lock()
            .unwrap()
            .push((command_line.to_string(), stdout.to_string()));
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(Invocation::command_line)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput, Error> {
        self.invocations.lock().unwrap().push(invocation.clone());
        let command_line = invocation.command_line();
        if let Some((_, stderr)) = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(line, _)| *line == command_line)
        {
            return Err(KlusterError::CommandFailed {
                program: invocation.program.clone(),
                stderr: stderr.clone(),
            }
            .into());
        }
        let stdout = self
            .outputs
            .lock()
            .unwrap()
            .iter()
            .find(|(line, _)| *line == command_line)
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();
        Ok(CommandOutput {
            stdout: stdout.into_bytes(),
            stderr: Vec::new(),
        })
    }
}
