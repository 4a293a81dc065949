use std::path::Path;

use anyhow::{Context, Error};
use futures::{stream::FuturesUnordered, StreamExt};
use log::{debug, info, warn};

use super::{
    error::KlusterError,
    port::{ClusterNode, ClusterProvider, ImageEngine},
};

/// Loads a locally built image into every cluster node that doesn't already hold it.
///
/// Node loads run concurrently and are all awaited; the first failure to complete is
/// returned, the other loads are left to finish.
pub async fn load_image(
    cluster: &(dyn ClusterProvider + Send + Sync),
    images: &(dyn ImageEngine + Send + Sync),
    image: &str,
) -> Result<(), Error> {
    let image_id = images
        .inspect_identifier(image)
        .await
        .with_context(|| KlusterError::ImageNotFound {
            image: image.to_string(),
        })?;

    let nodes = cluster.list_nodes().await.context("list cluster nodes")?;
    let mut selected = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node.image_identifier(image).await {
            Ok(node_image_id) if node_image_id == image_id => {
                debug!("Node {} already has image {}", node.name(), image);
            }
            _ => selected.push(node),
        }
    }

    if selected.is_empty() {
        info!("Image {} already present on every node", image);
        return Ok(());
    }

    let archive_dir = tempfile::Builder::new()
        .prefix("image-tar")
        .tempdir()
        .context("create image archive temp dir")?;
    let archive = archive_dir.path().join("image.tar");
    images
        .save(image, &archive)
        .await
        .with_context(|| format!("save image {} to archive", image))?;

    info!("Loading image {} on {} node(s)", image, selected.len());
    let mut loads: FuturesUnordered<_> = selected
        .iter()
        .map(|node| load_on_node(node.as_ref(), &archive))
        .collect();
    let mut first_error = None;
    while let Some(result) = loads.next().await {
        if let Err(err) = result {
            if first_error.is_none() {
                first_error = Some(err);
            } else {
                warn!("{:#}", err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err.context(KlusterError::LoadImage {
            image: image.to_string(),
        })),
        None => Ok(()),
    }
}

async fn load_on_node(node: &(dyn ClusterNode + Send + Sync), archive: &Path) -> Result<(), Error> {
    let file = tokio::fs::File::open(archive)
        .await
        .context("open image archive")?;
    node.load_image_archive(Box::new(file))
        .await
        .with_context(|| format!("load image archive on node {}", node.name()))?;
    debug!("Image archive loaded on node {}", node.name());
    Ok(())
}
