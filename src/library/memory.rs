//! 内存宇宙库（测试与临时会话）

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use crate::graph::{Snapshot, Universe};
use crate::library::{LibraryError, UniverseLibrary};

#[derive(Default)]
pub struct InMemoryLibrary {
    universes: RwLock<BTreeMap<String, Universe>>,
    snapshots: RwLock<BTreeMap<String, Snapshot>>,
    activated: RwLock<BTreeSet<String>>,
}

impl InMemoryLibrary {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UniverseLibrary for InMemoryLibrary {
    fn save(&self, universe: &Universe) -> Result<(), LibraryError> {
        self.universes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(universe.id.clone(), universe.clone());
        Ok(())
    }

    fn load(&self, universe_id: &str) -> Result<Option<Universe>, LibraryError> {
        Ok(self
            .universes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(universe_id)
            .cloned())
    }

    fn create_snapshot(&self, universe_id: &str) -> Result<Snapshot, LibraryError> {
        let universe = self
            .load(universe_id)?
            .ok_or_else(|| LibraryError::NotFound(universe_id.to_string()))?;
        let snapshot = Snapshot::capture(&universe);
        self.snapshots
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(universe_id.to_string(), snapshot.clone());
        Ok(snapshot)
    }

    fn revert_to_snapshot(&self, universe_id: &str) -> Result<Universe, LibraryError> {
        let snapshot = self
            .snapshots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(universe_id)
            .cloned()
            .ok_or_else(|| LibraryError::NoSnapshot(universe_id.to_string()))?;
        self.save(&snapshot.universe)?;
        Ok(snapshot.universe)
    }

    fn list_activated(&self) -> Result<Vec<String>, LibraryError> {
        Ok(self
            .activated
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect())
    }

    fn set_activated(&self, universe_id: &str, active: bool) -> Result<(), LibraryError> {
        let mut set = self.activated.write().unwrap_or_else(|e| e.into_inner());
        if active {
            set.insert(universe_id.to_string());
        } else {
            set.remove(universe_id);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<(String, String)>, LibraryError> {
        Ok(self
            .universes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|u| (u.id.clone(), u.title.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_revert() {
        let lib = InMemoryLibrary::new();
        let mut u = Universe::new("u");
        lib.save(&u).unwrap();
        lib.create_snapshot(&u.id).unwrap();

        u.title = "changed".into();
        lib.save(&u).unwrap();
        assert_eq!(lib.load(&u.id).unwrap().unwrap().title, "changed");

        let restored = lib.revert_to_snapshot(&u.id).unwrap();
        assert_eq!(restored.title, "u");
        assert_eq!(lib.load(&u.id).unwrap().unwrap().title, "u");
    }

    #[test]
    fn test_snapshot_requires_saved_universe() {
        let lib = InMemoryLibrary::new();
        assert!(matches!(lib.create_snapshot("nope"), Err(LibraryError::NotFound(_))));
        assert!(matches!(lib.revert_to_snapshot("nope"), Err(LibraryError::NoSnapshot(_))));
    }

    #[test]
    fn test_activation_set() {
        let lib = InMemoryLibrary::new();
        lib.set_activated("a", true).unwrap();
        lib.set_activated("b", true).unwrap();
        lib.set_activated("a", false).unwrap();
        assert_eq!(lib.list_activated().unwrap(), vec!["b".to_string()]);
    }
}
