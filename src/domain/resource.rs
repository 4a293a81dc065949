use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Error};
use glob::Pattern;
use log::info;

use super::{error::KlusterError, model::Resource, port::ManifestApplier, resolver::resolve_file};

// Directories are expanded at their own level and one level of subdirectories.
const MANIFEST_PATTERNS: [&str; 4] = ["*.yaml", "*.yml", "*/*.yaml", "*/*.yml"];

pub async fn deploy_resource(
    resource: &Resource,
    applier: &(dyn ManifestApplier + Send + Sync),
    kubeconfig: &Path,
) -> Result<(), Error> {
    let manifests = manifest_paths(resource)?;
    info!(
        "Deploying resource {} ({} manifest(s))",
        resource.name,
        manifests.len()
    );

    for manifest in manifests {
        let resolved = resolve_file(&manifest)
            .with_context(|| format!("resolve references in manifest {}", manifest.display()))?;
        let output = applier
            .apply(kubeconfig, &resolved)
            .await
            .with_context(|| format!("apply manifest {}", manifest.display()))?;
        info!("Deployed manifest {}", manifest.display());
        let output = output.trim_end();
        if !output.is_empty() {
            info!("{}", output);
        }
    }
    Ok(())
}

/// Every manifest file reachable from the resource paths, deduplicated by absolute path.
pub fn manifest_paths(resource: &Resource) -> Result<BTreeSet<PathBuf>, Error> {
    let mut manifests = BTreeSet::new();
    for path in &resource.paths {
        let path = Path::new(path);
        for manifest in expand_path(path)
            .with_context(|| KlusterError::PathExpansion {
                path: path.to_path_buf(),
            })?
        {
            let absolute = manifest
                .canonicalize()
                .with_context(|| format!("resolve absolute path of {}", manifest.display()))?;
            manifests.insert(absolute);
        }
    }
    Ok(manifests)
}

pub fn expand_path(path: &Path) -> Result<Vec<PathBuf>, Error> {
    let metadata = std::fs::metadata(path).context("stat manifest path")?;
    if !metadata.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let directory = path
        .to_str()
        .ok_or_else(|| anyhow!("path is not valid UTF-8"))?;
    let directory = Pattern::escape(directory);
    let mut paths = Vec::new();
    for pattern in MANIFEST_PATTERNS {
        for entry in glob::glob(&format!("{}/{}", directory, pattern))? {
            let entry = entry?;
            if entry.is_file() {
                paths.push(entry);
            }
        }
    }
    Ok(paths)
}
