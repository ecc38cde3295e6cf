// Writes decoded inline images under the configured image directory.
use crate::model::InlineImage;
use std::io::{Error, ErrorKind};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ImageSink {
    root: PathBuf,
}

impl ImageSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, Error> {
        let rel = Path::new(relative);
        if rel.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("image path escapes the image directory: {}", relative),
            ));
        }
        Ok(self.root.join(rel))
    }

    /// Writes every image, overwriting files left by an earlier attempt.
    /// Returns the number of files written.
    pub async fn write_all(&self, images: &[InlineImage]) -> Result<usize, Error> {
        for image in images {
            let path = self.resolve(&image.path)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, &image.bytes).await?;
        }
        Ok(images.len())
    }
}
