use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum KlusterError {
    #[error("can't query existence of cluster {name}")]
    ClusterQuery { name: String },

    #[error("can't create cluster {name}")]
    ClusterCreate { name: String },

    #[error("cluster {name} does not exist")]
    ClusterNotFound { name: String },

    #[error("cluster {name} already exists")]
    ClusterAlreadyExists { name: String },

    #[error("Dockerfile {} of app {app} not found", path.display())]
    DockerfileNotFound { app: String, path: PathBuf },

    #[error("build image for app {app}")]
    Build { app: String },

    #[error("invalid image identifier format ({identifier})")]
    ChecksumFormat { identifier: String },

    #[error("image {image} not present locally")]
    ImageNotFound { image: String },

    #[error("load image {image} to cluster")]
    LoadImage { image: String },

    #[error("install chart {chart} after {attempts} attempts")]
    Install { chart: String, attempts: u32 },

    #[error("upgrade chart {chart}")]
    Upgrade { chart: String },

    #[error("read referenced file {}", path.display())]
    ReferenceFile { path: PathBuf },

    #[error("invalid {key} reference, expected a file path string")]
    InvalidReference { key: String },

    #[error("expand manifest path {}", path.display())]
    PathExpansion { path: PathBuf },

    #[error("invalid command format ({command:?})")]
    InvalidCommand { command: String },

    #[error("{program} failed: {stderr}")]
    CommandFailed { program: String, stderr: String },
}
