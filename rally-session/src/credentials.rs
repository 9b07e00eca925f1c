use anyhow::Context;
use rally_core::{HostCredential, RoomCode};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::warn;

/// Survives process restarts so a host can re-claim its room.
pub trait CredentialStore: Send + Sync {
    fn load(&self, room: &RoomCode) -> Option<HostCredential>;
    fn save(&self, room: &RoomCode, credential: &HostCredential) -> anyhow::Result<()>;
    fn remove(&self, room: &RoomCode) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<RoomCode, HostCredential>>,
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, room: &RoomCode) -> Option<HostCredential> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(room).cloned()
    }

    fn save(&self, room: &RoomCode, credential: &HostCredential) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(room.clone(), credential.clone());
        Ok(())
    }

    fn remove(&self, room: &RoomCode) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(room);
        Ok(())
    }
}

/// All credentials in one JSON object keyed by room code.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> HashMap<String, HostCredential> {
        let Ok(raw) = fs::read_to_string(&self.path) else {
            return HashMap::new();
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Ignoring unreadable credential file {:?}: {}", self.path, e);
            HashMap::new()
        })
    }

    fn write_all(&self, entries: &HashMap<String, HostCredential>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, json)
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self, room: &RoomCode) -> Option<HostCredential> {
        self.read_all().remove(room.as_str())
    }

    fn save(&self, room: &RoomCode, credential: &HostCredential) -> anyhow::Result<()> {
        let mut entries = self.read_all();
        entries.insert(room.as_str().to_owned(), credential.clone());
        self.write_all(&entries)
    }

    fn remove(&self, room: &RoomCode) -> anyhow::Result<()> {
        let mut entries = self.read_all();
        if entries.remove(room.as_str()).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }
}
