//! Local filesystem object store.
//!
//! Mirrors the bucket layout under a directory: `<root>/<bucket>/<path>`.
//! Used for offline imports, staging, and tests. Objects are written to a
//! temp file and renamed into place, so a reader never sees half a file.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use crate::config::StorageConfig;
use crate::traits::ObjectStore;

pub struct FsStore {
    base: PathBuf,
}

impl FsStore {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let root = config
            .root
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("storage.root is required for the fs backend"))?;
        Ok(Self {
            base: root.join(&config.bucket),
        })
    }

    fn object_path(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Refusing object path outside the store: {}", path);
        }
        Ok(self.base.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    fn name(&self) -> &str {
        "fs"
    }

    fn locate(&self, path: &str) -> String {
        self.base.join(path).display().to_string()
    }

    async fn prepare(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base)
            .await
            .with_context(|| format!("Failed to create {}", self.base.display()))
    }

    async fn put(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        let target = self.object_path(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = target.clone().into_os_string();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, bytes)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .with_context(|| format!("Failed to move object into {}", target.display()))?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.object_path(path)?).await?)
    }

    async fn health(&self) -> Result<String> {
        if self.base.is_dir() {
            Ok(format!("{} (writable dir)", self.base.display()))
        } else {
            bail!("{} does not exist; run `nyaya-import init`", self.base.display())
        }
    }
}
