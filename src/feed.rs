use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::blob;
use crate::error::ValidationError;
use crate::storage::{KeyValueStore, FEED_KEY};

pub const EXPORT_FILE_NAME: &str = "snapbridge_feed.json";
pub const DEFAULT_CAPTION: &str = "User upload";
pub const GUEST_AUTHOR: &str = "Guest";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    #[serde(rename = "src")]
    pub source: String,
    #[serde(rename = "user", default)]
    pub author: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub persistent: bool,
}

impl Post {
    pub fn sample(source: &str, author: &str, caption: &str) -> Self {
        Self {
            source: source.to_string(),
            author: author.to_string(),
            caption: caption.to_string(),
            persistent: true,
        }
    }

    pub fn is_transient(&self) -> bool {
        !self.persistent
    }
}

pub type Feed = Vec<Post>;

static SEED_SET: Lazy<Vec<Post>> = Lazy::new(|| {
    vec![
        Post::sample(
            "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/BigBuckBunny.mp4",
            "Instructor A",
            "Intro to Animation — Basics (sample)",
        ),
        Post::sample(
            "https://interactive-examples.mdn.mozilla.net/media/cc0-videos/flower.webm",
            "Science 101",
            "Plant cells & photosynthesis (sample)",
        ),
        Post::sample(
            "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/ElephantsDream.mp4",
            "Instructor B",
            "Computer Graphics Overview (sample)",
        ),
    ]
});

pub fn seed_set() -> &'static [Post] {
    &SEED_SET
}

/// Feed persistence and mutation. Transient uploads are tracked through the
/// blob registry so their references can be released when dropped.
pub struct FeedStore {
    store: Arc<dyn KeyValueStore>,
    blobs: Arc<blob::Registry>,
}

impl FeedStore {
    pub fn new(store: Arc<dyn KeyValueStore>, blobs: Arc<blob::Registry>) -> Self {
        Self { store, blobs }
    }

    pub fn blobs(&self) -> &Arc<blob::Registry> {
        &self.blobs
    }

    pub fn load_initial(&self) -> Result<Feed> {
        let feed = self.load_persisted();
        if !feed.is_empty() {
            tracing::info!(posts = feed.len(), "loaded persisted feed");
            return Ok(feed);
        }
        let feed = seed_set().to_vec();
        self.persist(&feed)?;
        tracing::info!(posts = feed.len(), "seeded empty feed");
        Ok(feed)
    }

    /// Corrupt or unreadable data reads as an empty feed.
    pub fn load_persisted(&self) -> Feed {
        let raw = match self.store.read_key(FEED_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(error = %err, "feed: storage read failed");
                return Vec::new();
            }
        };
        match serde_json::from_str::<Feed>(&raw) {
            Ok(feed) => feed,
            Err(err) => {
                tracing::warn!(error = %err, "feed: stored feed is not valid JSON");
                Vec::new()
            }
        }
    }

    pub fn persist(&self, feed: &[Post]) -> Result<()> {
        let durable: Vec<&Post> = feed.iter().filter(|post| post.persistent).collect();
        let payload = serde_json::to_string(&durable).context("feed: serialize feed")?;
        self.store
            .write_key(FEED_KEY, &payload)
            .context("feed: persist feed")?;
        tracing::debug!(stored = durable.len(), total = feed.len(), "feed persisted");
        Ok(())
    }

    pub fn seed(&self, feed: &[Post]) -> Result<Feed> {
        let mut next = seed_set().to_vec();
        next.extend_from_slice(feed);
        self.persist(&next)?;
        Ok(next)
    }

    pub fn upload(
        &self,
        feed: &[Post],
        file: Option<&Path>,
        caption: &str,
        author: &str,
    ) -> std::result::Result<Feed, ValidationError> {
        let Some(path) = file.filter(|path| is_selectable(path)) else {
            return Err(ValidationError::MissingFile);
        };
        let caption = caption.trim();
        let author = author.trim();
        let post = Post {
            source: self.blobs.create(path),
            author: if author.is_empty() {
                GUEST_AUTHOR.to_string()
            } else {
                author.to_string()
            },
            caption: if caption.is_empty() {
                DEFAULT_CAPTION.to_string()
            } else {
                caption.to_string()
            },
            persistent: false,
        };
        tracing::info!(path = %path.display(), author = %post.author, "uploaded transient post");
        let mut next = Vec::with_capacity(feed.len() + 1);
        next.push(post);
        next.extend_from_slice(feed);
        Ok(next)
    }

    pub fn remove(&self, feed: &[Post], index: usize) -> Result<Feed> {
        if index >= feed.len() {
            return Ok(feed.to_vec());
        }
        let mut next = feed.to_vec();
        let post = next.remove(index);
        self.persist(&next)?;
        self.release(&post);
        Ok(next)
    }

    pub fn clear(&self, feed: &[Post]) -> Result<Feed> {
        self.persist(&[])?;
        for post in feed {
            self.release(post);
        }
        tracing::info!(dropped = feed.len(), "feed cleared");
        Ok(Vec::new())
    }

    fn release(&self, post: &Post) {
        if post.is_transient() {
            self.blobs.revoke(&post.source);
        }
    }
}

fn is_selectable(path: &Path) -> bool {
    !path.as_os_str().is_empty() && path.is_file()
}

/// Writes the whole in-memory feed, transient entries included.
pub fn export(feed: &[Post], dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("export: create directory {}", dir.display()))?;
    let path = dir.join(EXPORT_FILE_NAME);
    let payload = serde_json::to_string_pretty(feed).context("export: serialize feed")?;
    fs::write(&path, payload)
        .with_context(|| format!("export: write file {}", path.display()))?;
    tracing::info!(path = %path.display(), posts = feed.len(), "feed exported");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use tempfile::tempdir;

    fn feed_store() -> (Arc<MemoryStore>, FeedStore) {
        let memory = Arc::new(MemoryStore::new());
        let store = FeedStore::new(memory.clone(), Arc::new(blob::Registry::new()));
        (memory, store)
    }

    fn stored(memory: &MemoryStore) -> Feed {
        let raw = memory.read_key(FEED_KEY).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn load_initial_seeds_empty_storage() {
        let (memory, store) = feed_store();
        let feed = store.load_initial().unwrap();
        assert_eq!(feed, seed_set());
        assert_eq!(stored(&memory), seed_set());
    }

    #[test]
    fn corrupt_storage_reads_as_empty() {
        let (memory, store) = feed_store();
        memory.write_key(FEED_KEY, "{not json").unwrap();
        assert!(store.load_persisted().is_empty());
        assert_eq!(store.load_initial().unwrap(), seed_set());
    }

    #[test]
    fn persist_keeps_only_persistent_posts_in_order() {
        let (_memory, store) = feed_store();
        let feed = vec![
            Post::sample("https://a.test/1.mp4", "a", "one"),
            Post {
                persistent: false,
                ..Post::sample("blob:snapbridge/xyz", "b", "two")
            },
            Post::sample("https://a.test/3.mp4", "c", "three"),
        ];
        store.persist(&feed).unwrap();
        let loaded = store.load_initial().unwrap();
        assert_eq!(loaded, vec![feed[0].clone(), feed[2].clone()]);
    }

    #[test]
    fn stored_json_uses_wire_keys() {
        let (memory, store) = feed_store();
        store
            .persist(&[Post::sample("https://a.test/1.mp4", "Ann", "hi")])
            .unwrap();
        let raw = memory.read_key(FEED_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value[0]["src"], "https://a.test/1.mp4");
        assert_eq!(value[0]["user"], "Ann");
        assert_eq!(value[0]["persistent"], true);
    }

    #[test]
    fn missing_persistent_flag_reads_as_transient() {
        let (memory, store) = feed_store();
        memory
            .write_key(FEED_KEY, r#"[{"src":"https://a.test/x.mp4","user":"u","caption":"c"}]"#)
            .unwrap();
        let feed = store.load_persisted();
        assert_eq!(feed.len(), 1);
        assert!(feed[0].is_transient());
    }

    #[test]
    fn seed_prepends_samples() {
        let (memory, store) = feed_store();
        let existing = vec![Post::sample("https://a.test/old.mp4", "x", "old")];
        let feed = store.seed(&existing).unwrap();
        assert_eq!(feed.len(), seed_set().len() + 1);
        assert_eq!(&feed[..seed_set().len()], seed_set());
        assert_eq!(feed.last(), existing.last());
        assert_eq!(stored(&memory), feed);
    }

    #[test]
    fn upload_without_file_leaves_feed_unchanged() {
        let (_memory, store) = feed_store();
        let feed = seed_set().to_vec();
        let err = store.upload(&feed, None, "cap", "me").unwrap_err();
        assert_eq!(err, ValidationError::MissingFile);

        let missing = Path::new("/definitely/not/here.mp4");
        let err = store.upload(&feed, Some(missing), "cap", "me").unwrap_err();
        assert_eq!(err, ValidationError::MissingFile);
        let err = store.upload(&feed, Some(Path::new("")), "cap", "me").unwrap_err();
        assert_eq!(err, ValidationError::MissingFile);
        assert!(store.blobs().is_empty());
    }

    #[test]
    fn upload_inserts_transient_post_first_and_is_never_persisted() {
        let dir = tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        fs::write(&clip, b"not really a video").unwrap();

        let (memory, store) = feed_store();
        let feed = store.load_initial().unwrap();
        let feed = store.upload(&feed, Some(&clip), "  ", "").unwrap();
        assert!(feed[0].is_transient());
        assert_eq!(feed[0].caption, DEFAULT_CAPTION);
        assert_eq!(feed[0].author, GUEST_AUTHOR);
        assert_eq!(store.blobs().resolve(&feed[0].source), Some(clip.clone()));

        store.persist(&feed).unwrap();
        assert_eq!(stored(&memory), seed_set());
    }

    #[test]
    fn clear_empties_storage_and_revokes_uploads() {
        let dir = tempdir().unwrap();
        let clip = dir.path().join("clip.mp4");
        fs::write(&clip, b"x").unwrap();

        let (memory, store) = feed_store();
        let feed = store.upload(&[], Some(&clip), "only", "me").unwrap();
        assert_eq!(store.blobs().len(), 1);
        let feed = store.clear(&feed).unwrap();
        assert!(feed.is_empty());
        assert!(stored(&memory).is_empty());
        assert!(store.blobs().is_empty());
    }

    #[test]
    fn remove_drops_one_post_and_persists() {
        let (memory, store) = feed_store();
        let feed = store.load_initial().unwrap();
        let feed = store.remove(&feed, 1).unwrap();
        assert_eq!(feed.len(), 2);
        assert_eq!(stored(&memory), feed);
        let unchanged = store.remove(&feed, 9).unwrap();
        assert_eq!(unchanged, feed);
    }

    #[test]
    fn export_writes_full_feed() {
        let dir = tempdir().unwrap();
        let feed = vec![
            Post::sample("https://a.test/1.mp4", "a", "one"),
            Post {
                persistent: false,
                ..Post::sample("blob:snapbridge/abc", "b", "two")
            },
        ];
        let path = export(&feed, dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), EXPORT_FILE_NAME);
        let written: Feed = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, feed);
    }
}
