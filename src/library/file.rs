//! JSON 目录宇宙库
//!
//! 布局：`<root>/<id>.json`、`<root>/snapshots/<id>.json`、`<root>/activated.json`。
//! 每次保存先写临时文件再 rename，保证整宇宙原子替换。

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::graph::{Snapshot, Universe};
use crate::library::{LibraryError, UniverseLibrary};

const ACTIVATED_FILE: &str = "activated.json";

#[derive(Debug, Clone)]
pub struct JsonDirLibrary {
    root: PathBuf,
}

impl JsonDirLibrary {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, LibraryError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("snapshots"))?;
        Ok(Self { root })
    }

    fn universe_path(&self, id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize(id)))
    }

    fn snapshot_path(&self, id: &str) -> PathBuf {
        self.root.join("snapshots").join(format!("{}.json", sanitize(id)))
    }

    fn write_atomic<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), LibraryError> {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(value)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, LibraryError> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }
}

/// ID 只允许出现在文件名中的安全字符
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl UniverseLibrary for JsonDirLibrary {
    fn save(&self, universe: &Universe) -> Result<(), LibraryError> {
        self.write_atomic(&self.universe_path(&universe.id), universe)?;
        tracing::debug!(universe = %universe.id, nodes = universe.nodes.len(), "universe saved");
        Ok(())
    }

    fn load(&self, universe_id: &str) -> Result<Option<Universe>, LibraryError> {
        self.read_json(&self.universe_path(universe_id))
    }

    fn create_snapshot(&self, universe_id: &str) -> Result<Snapshot, LibraryError> {
        let universe = self
            .load(universe_id)?
            .ok_or_else(|| LibraryError::NotFound(universe_id.to_string()))?;
        let snapshot = Snapshot::capture(&universe);
        self.write_atomic(&self.snapshot_path(universe_id), &snapshot)?;
        tracing::info!(universe = %universe_id, "snapshot created");
        Ok(snapshot)
    }

    fn revert_to_snapshot(&self, universe_id: &str) -> Result<Universe, LibraryError> {
        let snapshot: Snapshot = self
            .read_json(&self.snapshot_path(universe_id))?
            .ok_or_else(|| LibraryError::NoSnapshot(universe_id.to_string()))?;
        self.save(&snapshot.universe)?;
        tracing::info!(universe = %universe_id, "universe reverted to snapshot");
        Ok(snapshot.universe)
    }

    fn list_activated(&self) -> Result<Vec<String>, LibraryError> {
        Ok(self
            .read_json::<Vec<String>>(&self.root.join(ACTIVATED_FILE))?
            .unwrap_or_default())
    }

    fn set_activated(&self, universe_id: &str, active: bool) -> Result<(), LibraryError> {
        let mut ids = self.list_activated()?;
        ids.retain(|id| id != universe_id);
        if active {
            ids.push(universe_id.to_string());
        }
        self.write_atomic(&self.root.join(ACTIVATED_FILE), &ids)
    }

    fn list(&self) -> Result<Vec<(String, String)>, LibraryError> {
        let mut out = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            let is_universe = path.extension().map_or(false, |e| e == "json")
                && path.file_name().map_or(false, |n| n != ACTIVATED_FILE);
            if !is_universe {
                continue;
            }
            match self.read_json::<Universe>(&path) {
                Ok(Some(u)) => out.push((u.id, u.title)),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable universe file"),
            }
        }
        out.sort();
        Ok(out)
    }
}
