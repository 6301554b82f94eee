use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};

use anyhow::Context;
use sqlx::SqlitePool;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::{db, models::ReportMetadataRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
}

/// Blob storage for generated PDFs, addressed by `/`-separated keys.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<ObjectSummary>>;
    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>>;
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> anyhow::Result<()>;
    async fn probe(&self) -> anyhow::Result<()>;
}

/// Append-only store for per-request report metadata.
#[async_trait::async_trait]
pub trait MetadataStore: Send + Sync {
    async fn put_item(&self, record: &ReportMetadataRecord) -> anyhow::Result<()>;
    async fn probe(&self) -> anyhow::Result<()>;
}

/// Whether the backing stores answered at startup. Decided once and handed to
/// the components that must fall back when they did not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreAvailability {
    reachable: bool,
}

impl StoreAvailability {
    pub const AVAILABLE: Self = Self { reachable: true };
    pub const UNAVAILABLE: Self = Self { reachable: false };

    pub async fn probe(objects: &dyn ObjectStore, metadata: &dyn MetadataStore) -> Self {
        let objects_ok = match objects.probe().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "object store unreachable");
                false
            }
        };
        let metadata_ok = match metadata.probe().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "metadata store unreachable");
                false
            }
        };

        if objects_ok && metadata_ok {
            info!("backing stores available");
            Self::AVAILABLE
        } else {
            warn!("running in local mode: backing stores unavailable");
            Self::UNAVAILABLE
        }
    }

    pub fn is_available(self) -> bool {
        self.reachable
    }
}

/// Object store rooted in a local directory; a key maps to `<root>/<key>`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> anyhow::Result<PathBuf> {
        let relative = Path::new(key);
        if key.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("invalid object key: {key:?}");
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait::async_trait]
impl ObjectStore for FsObjectStore {
    /// Lists the objects directly under the prefix's directory whose file name
    /// starts with the prefix's last segment.
    async fn list(&self, prefix: &str) -> anyhow::Result<Vec<ObjectSummary>> {
        let (dir_key, name_prefix) = prefix.rsplit_once('/').unwrap_or(("", prefix));
        let dir = if dir_key.is_empty() {
            self.root.clone()
        } else {
            self.resolve(dir_key)?
        };

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e).with_context(|| format!("failed to list {}", dir.display())),
        };

        let mut objects = vec![];
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !name.starts_with(name_prefix) {
                continue;
            }
            let key = if dir_key.is_empty() {
                name
            } else {
                format!("{dir_key}/{name}")
            };
            objects.push(ObjectSummary {
                key,
                size: meta.len(),
            });
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read object {key}"))
    }

    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> anyhow::Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Staged under another extension so a listed `.pdf` is always complete.
        let staging = path.with_extension("partial");
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &path)
            .await
            .with_context(|| format!("failed to store object {key}"))?;
        debug!(key, content_type, size = bytes.len(), "object stored");
        Ok(())
    }

    async fn probe(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("cannot create {}", self.root.display()))?;
        let meta = tokio::fs::metadata(&self.root).await?;
        if meta.permissions().readonly() {
            anyhow::bail!("{} is read-only", self.root.display());
        }
        Ok(())
    }
}

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn put_item(&self, record: &ReportMetadataRecord) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO report_metadata(domain, email, created_at) VALUES(?, ?, ?)")
            .bind(&record.domain)
            .bind(&record.email)
            .bind(record.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Applies pending migrations, which also proves the database answers.
    async fn probe(&self) -> anyhow::Result<()> {
        db::run_migrations(&self.pool).await?;
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

const MAX_LOCAL_RECORD_SUFFIX: u32 = 1000;

/// Writes the record as `<dir>/<domain>/<domain>_<email>_<timestamp>.json`.
/// Existing records are never replaced; a taken name gets a `_<n>` suffix.
pub async fn write_local_record(
    dir: &Path,
    record: &ReportMetadataRecord,
) -> anyhow::Result<PathBuf> {
    let domain_dir = dir.join(&record.domain);
    tokio::fs::create_dir_all(&domain_dir).await?;
    let stem = format!(
        "{}_{}_{}",
        record.domain,
        record.email,
        record.created_at.format("%Y%m%dT%H%M%S")
    );
    let body = serde_json::to_vec_pretty(record)?;

    for attempt in 0..MAX_LOCAL_RECORD_SUFFIX {
        let path = if attempt == 0 {
            domain_dir.join(format!("{stem}.json"))
        } else {
            domain_dir.join(format!("{stem}_{attempt}.json"))
        };
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).with_context(|| format!("failed to create {}", path.display()))
            }
        };
        file.write_all(&body)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        file.flush().await?;
        return Ok(path);
    }
    anyhow::bail!("too many local records named {stem} in {}", domain_dir.display())
}
