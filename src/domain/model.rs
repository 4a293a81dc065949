use std::{collections::BTreeMap, path::PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub name: String,
    #[serde(default)]
    pub charts: Vec<Chart>,
    #[serde(default)]
    pub resources: Vec<Resource>,
    pub kind_config: Option<String>,
    pub node_image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chart {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub apps: Vec<App>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub name: String,
    pub dockerfile: String,
    #[serde(default)]
    pub before_build: Vec<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub name: String,
    pub tag: String,
    pub full_name: String,
}

impl Image {
    pub fn new(name: &str, tag: &str) -> Self {
        Self {
            name: name.to_string(),
            tag: tag.to_string(),
            full_name: format!("{}:{}", name, tag),
        }
    }
}

/// Override values handed to the package manager, ordered by key.
pub type Values = BTreeMap<String, String>;

impl Chart {
    pub fn dockerfile_path(&self, app: &App) -> PathBuf {
        PathBuf::from(&self.path).join(&app.dockerfile)
    }

    /// Build context of an app: its declared context, or the Dockerfile's directory.
    pub fn context_path(&self, app: &App) -> PathBuf {
        match app.context {
            Some(ref context) => PathBuf::from(&self.path).join(context),
            None => self
                .dockerfile_path(app)
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}
