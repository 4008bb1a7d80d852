//! Session-scoped references to local files.
//!
//! Uploaded videos are never copied or persisted. The feed only holds a
//! `blob:snapbridge/<id>` reference, which resolves to the local path for as
//! long as this process keeps it registered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rand::{distributions::Alphanumeric, Rng};
use url::Url;

const SCHEME: &str = "blob";
const ORIGIN: &str = "snapbridge";
const ID_LEN: usize = 10;

#[derive(Debug, Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, PathBuf>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, path: &Path) -> String {
        let mut entries = self.entries.lock();
        let id = loop {
            let candidate: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(ID_LEN)
                .map(char::from)
                .collect();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };
        entries.insert(id.clone(), path.to_path_buf());
        tracing::debug!(%id, path = %path.display(), "registered transient reference");
        format!("{SCHEME}:{ORIGIN}/{id}")
    }

    pub fn resolve(&self, reference: &str) -> Option<PathBuf> {
        let id = reference_id(reference)?;
        self.entries.lock().get(&id).cloned()
    }

    /// Returns true when the reference was registered.
    pub fn revoke(&self, reference: &str) -> bool {
        let Some(id) = reference_id(reference) else {
            return false;
        };
        let removed = self.entries.lock().remove(&id).is_some();
        if removed {
            tracing::debug!(%id, "revoked transient reference");
        }
        removed
    }

    pub fn revoke_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

pub fn is_reference(source: &str) -> bool {
    reference_id(source).is_some()
}

fn reference_id(reference: &str) -> Option<String> {
    let url = Url::parse(reference.trim()).ok()?;
    if url.scheme() != SCHEME {
        return None;
    }
    let id = url.path().strip_prefix(ORIGIN)?.strip_prefix('/')?;
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}
