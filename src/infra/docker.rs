use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Error};
use async_trait::async_trait;
use bollard::{
    image::{BuildImageOptions, RemoveImageOptions, TagImageOptions},
    Docker,
};
use bytes::{BufMut, Bytes, BytesMut};
use flate2::{write::GzEncoder, Compression};
use futures::StreamExt;
use log::debug;
use tokio::io::AsyncWriteExt;

use crate::domain::port::ImageEngine;

// Name under which a Dockerfile living outside its build context is added to the context.
const EXTERNAL_DOCKERFILE: &str = ".kluster.Dockerfile";

pub struct DockerImageEngine {
    pub docker: Docker,
}

#[async_trait]
impl ImageEngine for DockerImageEngine {
    async fn build(&self, dockerfile: &Path, context: &Path, tag: &str) -> Result<(), Error> {
        let (context_archive, dockerfile) = build_context(dockerfile, context)?;

        let mut stream = self.docker.build_image(
            BuildImageOptions {
                dockerfile: dockerfile.as_str(),
                t: tag,
                rm: true,
                forcerm: true,
                ..Default::default()
            },
            None,
            Some(context_archive),
        );
        while let Some(info) = stream.next().await {
            let info = info.context("docker build stream")?;
            if let Some(output) = info.stream {
                let output = output.trim_end();
                if !output.is_empty() {
                    debug!("Build => {}", output);
                }
            }
            if let Some(error) = info.error {
                return Err(anyhow!(error));
            }
            if let Some(message) = info.error_detail.and_then(|detail| detail.message) {
                return Err(anyhow!(message));
            }
        }
        Ok(())
    }

    async fn inspect_identifier(&self, image: &str) -> Result<String, Error> {
        self.docker
            .inspect_image(image)
            .await
            .with_context(|| format!("Can't detect image {} on docker daemon", image))?
            .id
            .ok_or_else(|| anyhow!("Can't detect id of image {}", image))
    }

    async fn tag(&self, source: &str, target: &str) -> Result<(), Error> {
        let (repo, tag) = split_reference(target);
        self.docker
            .tag_image(source, Some(TagImageOptions { repo, tag }))
            .await
            .with_context(|| format!("Error while tagging {} as {}", source, target))
    }

    async fn remove(&self, image: &str) -> Result<(), Error> {
        self.docker
            .remove_image(
                image,
                Some(RemoveImageOptions {
                    force: false,
                    noprune: false,
                }),
                None,
            )
            .await
            .with_context(|| format!("Error while removing image {}", image))?;
        Ok(())
    }

    async fn save(&self, image: &str, archive: &Path) -> Result<(), Error> {
        let mut file = tokio::fs::File::create(archive)
            .await
            .with_context(|| format!("create {}", archive.display()))?;
        let mut stream = self.docker.export_image(image);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("export image {}", image))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}

/// Gzipped tar of the build context, plus the Dockerfile path inside it.
fn build_context(dockerfile: &Path, context: &Path) -> Result<(Bytes, String), Error> {
    let tar_gz = BytesMut::new().writer();
    let enc = GzEncoder::new(tar_gz, Compression::default());
    let mut tar = tar::Builder::new(enc);
    tar.append_dir_all(".", context)
        .with_context(|| format!("archive build context {}", context.display()))?;

    let dockerfile_in_context = match dockerfile.strip_prefix(context) {
        Ok(relative) => path_to_string(relative.to_path_buf())?,
        Err(_) => {
            tar.append_path_with_name(dockerfile, EXTERNAL_DOCKERFILE)
                .with_context(|| format!("archive {}", dockerfile.display()))?;
            EXTERNAL_DOCKERFILE.to_string()
        }
    };

    let tar_gz = tar.into_inner()?.finish()?;
    Ok((tar_gz.into_inner().freeze(), dockerfile_in_context))
}

fn path_to_string(path: PathBuf) -> Result<String, Error> {
    path.into_os_string()
        .into_string()
        .map_err(|path| anyhow!("path {:?} is not valid UTF-8", path))
}

// "registry:5000/api:abc" => ("registry:5000/api", "abc")
fn split_reference(reference: &str) -> (&str, &str) {
    match reference.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (reference, "latest"),
    }
}
