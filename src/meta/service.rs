use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

use super::types::{DirEntry, FileMetadata, MetaError, MetaResult, SpaceStat};

const STAT_FILE: &str = ".stat";
const META_EXT: &str = "meta";

/// Space-scoped metadata tree the chunk layer calls to map files to chunk
/// hashes. The chunk engine treats this as an opaque collaborator; any
/// implementation of the trait can stand in.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn new_space(&self, space: &str, capacity: u64) -> MetaResult<()>;
    async fn delete_space(&self, space: &str) -> MetaResult<()>;
    async fn space_stat(&self, space: &str) -> MetaResult<SpaceStat>;

    async fn make_dir(&self, space: &str, base: &str, name: &str) -> MetaResult<()>;
    async fn rename_dir(
        &self,
        space: &str,
        base: &str,
        old_name: &str,
        new_name: &str,
    ) -> MetaResult<()>;
    async fn delete_dir(&self, space: &str, base: &str, name: &str) -> MetaResult<()>;
    async fn get_dir_sub(&self, space: &str, base: &str, name: &str) -> MetaResult<Vec<DirEntry>>;

    async fn put_metadata(
        &self,
        space: &str,
        base: &str,
        name: &str,
        metadata: &FileMetadata,
    ) -> MetaResult<()>;
    async fn get_metadata(&self, space: &str, base: &str, name: &str) -> MetaResult<FileMetadata>;
    async fn delete_metadata(&self, space: &str, base: &str, name: &str) -> MetaResult<()>;
}

/// Plain-directory implementation: a space is a directory under the meta
/// root, directories are directories, file records are `<name>.meta` JSON
/// files, and the space's capacity accounting lives in a `.stat` file at
/// the space root.
pub struct FsMetaStore {
    root: PathBuf,
    // Guards read-modify-write cycles on the per-space stat files.
    stat_lock: Mutex<()>,
}

fn validate_component(name: &str) -> MetaResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name == STAT_FILE
        || name.contains('/')
        || name.contains('\\')
    {
        return Err(MetaError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl FsMetaStore {
    pub async fn open(root: impl Into<PathBuf>) -> MetaResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            stat_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn space_dir(&self, space: &str) -> MetaResult<PathBuf> {
        validate_component(space)?;
        Ok(self.root.join(space))
    }

    /// Resolves `base` (a `/`-separated path inside the space, empty for the
    /// space root), validating every component.
    fn base_dir(&self, space: &str, base: &str) -> MetaResult<PathBuf> {
        let mut dir = self.space_dir(space)?;
        if !base.is_empty() {
            for component in base.split('/') {
                validate_component(component)?;
                dir.push(component);
            }
        }
        Ok(dir)
    }

    async fn require_space(&self, space: &str) -> MetaResult<PathBuf> {
        let dir = self.space_dir(space)?;
        if !fs::try_exists(&dir).await? {
            return Err(MetaError::SpaceNotFound(space.to_string()));
        }
        Ok(dir)
    }

    async fn load_stat(&self, space: &str) -> MetaResult<SpaceStat> {
        let dir = self.require_space(space).await?;
        let raw = match fs::read_to_string(dir.join(STAT_FILE)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MetaError::SpaceNotFound(space.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        SpaceStat::decode(&raw)
    }

    async fn save_stat(&self, space: &str, stat: SpaceStat) -> MetaResult<()> {
        let dir = self.space_dir(space)?;
        fs::write(dir.join(STAT_FILE), stat.encode()).await?;
        Ok(())
    }

    /// Applies a signed occupancy delta under the stat lock, enforcing the
    /// space capacity on growth.
    async fn adjust_occupied(&self, space: &str, delta: i64) -> MetaResult<()> {
        let _guard = self.stat_lock.lock().await;
        let mut stat = self.load_stat(space).await?;
        if delta >= 0 {
            let incoming = delta as u64;
            if stat.occupied + incoming > stat.capacity {
                return Err(MetaError::Full {
                    space: space.to_string(),
                    occupied: stat.occupied,
                    incoming,
                    capacity: stat.capacity,
                });
            }
            stat.occupied += incoming;
        } else {
            stat.occupied = stat.occupied.saturating_sub((-delta) as u64);
        }
        self.save_stat(space, stat).await
    }

    fn meta_path(&self, space: &str, base: &str, name: &str) -> MetaResult<PathBuf> {
        validate_component(name)?;
        Ok(self
            .base_dir(space, base)?
            .join(format!("{}.{}", name, META_EXT)))
    }

    async fn read_meta(&self, path: &Path, name: &str) -> MetaResult<FileMetadata> {
        let raw = match fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MetaError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl MetaStore for FsMetaStore {
    async fn new_space(&self, space: &str, capacity: u64) -> MetaResult<()> {
        let dir = self.space_dir(space)?;
        if fs::try_exists(&dir).await? {
            return Err(MetaError::SpaceExists(space.to_string()));
        }
        fs::create_dir_all(&dir).await?;
        self.save_stat(
            space,
            SpaceStat {
                capacity,
                occupied: 0,
            },
        )
        .await?;
        tracing::info!("Created space {:?} with capacity {}", space, capacity);
        Ok(())
    }

    async fn delete_space(&self, space: &str) -> MetaResult<()> {
        let dir = self.require_space(space).await?;
        fs::remove_dir_all(&dir).await?;
        tracing::info!("Deleted space {:?}", space);
        Ok(())
    }

    async fn space_stat(&self, space: &str) -> MetaResult<SpaceStat> {
        self.load_stat(space).await
    }

    async fn make_dir(&self, space: &str, base: &str, name: &str) -> MetaResult<()> {
        self.require_space(space).await?;
        validate_component(name)?;
        let dir = self.base_dir(space, base)?.join(name);
        if fs::try_exists(&dir).await? {
            return Err(MetaError::AlreadyExists(name.to_string()));
        }
        fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn rename_dir(
        &self,
        space: &str,
        base: &str,
        old_name: &str,
        new_name: &str,
    ) -> MetaResult<()> {
        self.require_space(space).await?;
        validate_component(old_name)?;
        validate_component(new_name)?;
        let base_dir = self.base_dir(space, base)?;
        let old_path = base_dir.join(old_name);
        let new_path = base_dir.join(new_name);
        if !fs::try_exists(&old_path).await? {
            return Err(MetaError::NotFound(old_name.to_string()));
        }
        if fs::try_exists(&new_path).await? {
            return Err(MetaError::AlreadyExists(new_name.to_string()));
        }
        fs::rename(&old_path, &new_path).await?;
        Ok(())
    }

    async fn delete_dir(&self, space: &str, base: &str, name: &str) -> MetaResult<()> {
        self.require_space(space).await?;
        validate_component(name)?;
        let dir = self.base_dir(space, base)?.join(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(MetaError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_dir_sub(&self, space: &str, base: &str, name: &str) -> MetaResult<Vec<DirEntry>> {
        self.require_space(space).await?;
        let dir = if name.is_empty() {
            self.base_dir(space, base)?
        } else {
            validate_component(name)?;
            self.base_dir(space, base)?.join(name)
        };
        let mut reader = match fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MetaError::NotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if file_name == STAT_FILE {
                continue;
            }
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                entries.push(DirEntry {
                    name: file_name,
                    is_dir: true,
                    size: 0,
                });
            } else if let Some(stem) = file_name.strip_suffix(&format!(".{}", META_EXT)) {
                let metadata = self.read_meta(&entry.path(), stem).await?;
                entries.push(DirEntry {
                    name: stem.to_string(),
                    is_dir: false,
                    size: metadata.size,
                });
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn put_metadata(
        &self,
        space: &str,
        base: &str,
        name: &str,
        metadata: &FileMetadata,
    ) -> MetaResult<()> {
        self.require_space(space).await?;
        let path = self.meta_path(space, base, name)?;

        // Replacing a record only charges the size difference.
        let previous = match self.read_meta(&path, name).await {
            Ok(existing) => existing.size as i64,
            Err(MetaError::NotFound(_)) => 0,
            Err(e) => return Err(e),
        };
        self.adjust_occupied(space, metadata.size as i64 - previous)
            .await?;

        let json = serde_json::to_string(metadata)?;
        if let Err(e) = fs::write(&path, json).await {
            self.adjust_occupied(space, previous - metadata.size as i64)
                .await?;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get_metadata(&self, space: &str, base: &str, name: &str) -> MetaResult<FileMetadata> {
        self.require_space(space).await?;
        let path = self.meta_path(space, base, name)?;
        self.read_meta(&path, name).await
    }

    async fn delete_metadata(&self, space: &str, base: &str, name: &str) -> MetaResult<()> {
        self.require_space(space).await?;
        let path = self.meta_path(space, base, name)?;
        let existing = self.read_meta(&path, name).await?;
        fs::remove_file(&path).await?;
        self.adjust_occupied(space, -(existing.size as i64)).await?;
        Ok(())
    }
}
