use std::{collections::BTreeSet, path::Path};

use anyhow::{Context, Error};
use log::{debug, info};
use uuid::Uuid;

use super::{error::KlusterError, model::Image, port::ImageEngine};

const TEMP_IMAGE_PREFIX: &str = "kluster-temp";

/// Builds content-addressed images and remembers every tag it produced.
pub struct ImageBuilder<'a> {
    engine: &'a (dyn ImageEngine + Send + Sync),
    built_images: BTreeSet<String>,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(engine: &'a (dyn ImageEngine + Send + Sync)) -> Self {
        Self {
            engine,
            built_images: BTreeSet::new(),
        }
    }

    pub async fn build_image_with_checksum(
        &mut self,
        dockerfile: &Path,
        context: &Path,
        image_name: &str,
    ) -> Result<Image, Error> {
        let temp_image = format!("{}:{}", TEMP_IMAGE_PREFIX, Uuid::new_v4());
        self.engine
            .build(dockerfile, context, &temp_image)
            .await
            .context("build temp image")?;
        self.built_images.insert(temp_image.clone());

        let identifier = self
            .engine
            .inspect_identifier(&temp_image)
            .await
            .context("inspect temp image")?;
        let checksum = checksum_from_identifier(&identifier)
            .context("calculate image checksum")?;

        let image = Image::new(image_name, &checksum);
        self.engine
            .tag(&temp_image, &image.full_name)
            .await
            .context("tag image")?;
        self.built_images.insert(image.full_name.clone());
        info!("Built image {}", image.full_name);

        Ok(image)
    }

    pub fn built_images(&self) -> impl Iterator<Item = &String> {
        self.built_images.iter()
    }

    /// Removes every tracked image in sorted order, stopping at the first failure.
    pub async fn cleanup(&mut self) -> Result<(), Error> {
        while let Some(image) = self.built_images.pop_first() {
            debug!("Remove image {}", image);
            self.engine
                .remove(&image)
                .await
                .with_context(|| format!("remove image {:?}", image))?;
        }
        Ok(())
    }
}

// Identifier format: sha256:f30bc46dc114438d72e6ac19a82bd83c0dee86252e622ebc96f874d555a0e836
pub fn checksum_from_identifier(identifier: &str) -> Result<String, Error> {
    let (_, digest) = identifier
        .split_once(':')
        .ok_or_else(|| KlusterError::ChecksumFormat {
            identifier: identifier.to_string(),
        })?;
    let checksum: String = digest
        .trim()
        .chars()
        .filter(|c| !matches!(c, '\'' | '"'))
        .collect();
    if checksum.is_empty() {
        return Err(KlusterError::ChecksumFormat {
            identifier: identifier.to_string(),
        }
        .into());
    }
    Ok(checksum)
}
