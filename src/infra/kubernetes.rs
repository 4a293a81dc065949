use std::path::Path;

use anyhow::{anyhow, Context, Error};
use async_trait::async_trait;
use kube::{
    api::{DynamicObject, Patch, PatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    core::GroupVersionKind,
    discovery::{Discovery, Scope},
    Api, Client, Config,
};
use log::debug;

use crate::domain::{port::ManifestApplier, resolver::parse_documents};

const FIELD_MANAGER: &str = "kluster";

/// Applies manifests through the API server with server-side apply.
pub struct ServerSideApplier {
    pub default_namespace: String,
}

impl Default for ServerSideApplier {
    fn default() -> Self {
        Self {
            default_namespace: "default".to_string(),
        }
    }
}

impl ServerSideApplier {
    async fn client(kubeconfig: &Path) -> Result<Client, Error> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig)
            .with_context(|| format!("read kubeconfig {}", kubeconfig.display()))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("load kubeconfig")?;
        Client::try_from(config).context("create kubernetes client")
    }
}

#[async_trait]
impl ManifestApplier for ServerSideApplier {
    async fn apply(&self, kubeconfig: &Path, manifest: &[u8]) -> Result<String, Error> {
        let objects = objects_from_manifest(manifest)?;
        if objects.is_empty() {
            return Ok(String::new());
        }

        let client = Self::client(kubeconfig).await?;
        let discovery = Discovery::new(client.clone())
            .run()
            .await
            .context("discover cluster resources")?;
        let params = PatchParams::apply(FIELD_MANAGER).force();

        let mut output = String::new();
        for (gvk, object) in objects {
            let name = object
                .metadata
                .name
                .clone()
                .ok_or_else(|| anyhow!("{} without metadata.name", gvk.kind))?;
            let (resource, capabilities) = discovery.resolve_gvk(&gvk).ok_or_else(|| {
                anyhow!("unknown resource kind {}/{}", gvk.api_version(), gvk.kind)
            })?;
            let api: Api<DynamicObject> = if capabilities.scope == Scope::Namespaced {
                let namespace = object
                    .metadata
                    .namespace
                    .as_deref()
                    .unwrap_or(&self.default_namespace);
                Api::namespaced_with(client.clone(), namespace, &resource)
            } else {
                Api::all_with(client.clone(), &resource)
            };
            debug!("Applying {} {}", gvk.kind, name);
            api.patch(&name, &params, &Patch::Apply(&object))
                .await
                .with_context(|| format!("apply {} {}", gvk.kind, name))?;
            output.push_str(&format!(
                "{}/{} serverside-applied\n",
                resource.plural, name
            ));
        }
        Ok(output)
    }
}

fn objects_from_manifest(manifest: &[u8]) -> Result<Vec<(GroupVersionKind, DynamicObject)>, Error> {
    parse_documents(manifest)
        .context("parse manifest")?
        .into_iter()
        .map(|document| {
            let object: DynamicObject =
                serde_yaml::from_value(document).context("decode kubernetes object")?;
            let types = object
                .types
                .as_ref()
                .ok_or_else(|| anyhow!("object without apiVersion and kind"))?;
            let gvk = GroupVersionKind::try_from(types)
                .with_context(|| format!("invalid apiVersion {}", types.api_version))?;
            Ok((gvk, object))
        })
        .collect()
}
