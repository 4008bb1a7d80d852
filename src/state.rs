use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::blob;
use crate::error::ValidationError;
use crate::feed::{self, Feed, FeedStore, GUEST_AUTHOR};
use crate::session::{self, CurrentUser, SessionError};
use crate::storage::KeyValueStore;

/// Everything the feed screen mutates. Operations read the current state and
/// return the next one, so a rejected operation leaves the caller's copy as it was.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppState {
    pub feed: Feed,
    pub user: Option<CurrentUser>,
}

impl AppState {
    pub fn author(&self) -> &str {
        self.user
            .as_ref()
            .map(|user| user.display_name.as_str())
            .unwrap_or(GUEST_AUTHOR)
    }

    pub fn is_guest(&self) -> bool {
        self.user.is_none()
    }

    fn with_feed(&self, feed: Feed) -> Self {
        Self {
            feed,
            user: self.user.clone(),
        }
    }
}

pub struct Actions {
    store: Arc<dyn KeyValueStore>,
    feed: FeedStore,
}

impl Actions {
    pub fn new(store: Arc<dyn KeyValueStore>, blobs: Arc<blob::Registry>) -> Self {
        Self {
            feed: FeedStore::new(store.clone(), blobs),
            store,
        }
    }

    pub fn load(&self) -> Result<AppState> {
        Ok(AppState {
            feed: self.feed.load_initial()?,
            user: session::current(self.store.as_ref()),
        })
    }

    pub fn sign_in(
        &self,
        state: &AppState,
        username: &str,
        display_name: &str,
    ) -> std::result::Result<AppState, SessionError> {
        let user = session::sign_in(self.store.as_ref(), username, display_name)?;
        Ok(AppState {
            feed: state.feed.clone(),
            user: Some(user),
        })
    }

    pub fn sign_out(&self, state: &AppState) -> Result<AppState> {
        session::sign_out(self.store.as_ref())?;
        Ok(AppState {
            feed: state.feed.clone(),
            user: None,
        })
    }

    pub fn upload(
        &self,
        state: &AppState,
        file: Option<&Path>,
        caption: &str,
    ) -> std::result::Result<AppState, ValidationError> {
        let feed = self.feed.upload(&state.feed, file, caption, state.author())?;
        Ok(state.with_feed(feed))
    }

    pub fn seed(&self, state: &AppState) -> Result<AppState> {
        Ok(state.with_feed(self.feed.seed(&state.feed)?))
    }

    pub fn remove(&self, state: &AppState, index: usize) -> Result<AppState> {
        Ok(state.with_feed(self.feed.remove(&state.feed, index)?))
    }

    pub fn clear(&self, state: &AppState) -> Result<AppState> {
        Ok(state.with_feed(self.feed.clear(&state.feed)?))
    }

    pub fn export(&self, state: &AppState, dir: &Path) -> Result<PathBuf> {
        feed::export(&state.feed, dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::seed_set;
    use crate::storage::MemoryStore;

    fn actions() -> Actions {
        Actions::new(Arc::new(MemoryStore::new()), Arc::new(blob::Registry::new()))
    }

    #[test]
    fn load_restores_signed_in_user() {
        let store = Arc::new(MemoryStore::new());
        session::sign_in(store.as_ref(), "dana", "Dana").unwrap();
        let actions = Actions::new(store, Arc::new(blob::Registry::new()));
        let state = actions.load().unwrap();
        assert_eq!(state.author(), "Dana");
        assert_eq!(state.feed, seed_set());
    }

    #[test]
    fn failed_sign_in_is_a_validation_error() {
        let actions = actions();
        let state = actions.load().unwrap();
        let err = actions.sign_in(&state, "", "x").unwrap_err();
        assert!(matches!(
            err,
            SessionError::Invalid(ValidationError::EmptyUsername)
        ));
        assert!(state.is_guest());
    }

    #[test]
    fn upload_uses_signed_in_author() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("clip.webm");
        std::fs::write(&clip, b"x").unwrap();

        let actions = actions();
        let state = actions.load().unwrap();
        let state = actions.sign_in(&state, "dana", "Dana").unwrap();
        let state = actions.upload(&state, Some(&clip), "my clip").unwrap();
        assert_eq!(state.feed[0].author, "Dana");
        assert_eq!(state.feed[0].caption, "my clip");

        let state = actions.sign_out(&state).unwrap();
        let state = actions.upload(&state, Some(&clip), "").unwrap();
        assert_eq!(state.feed[0].author, GUEST_AUTHOR);
        assert_eq!(state.feed.len(), seed_set().len() + 2);
    }

    #[test]
    fn clear_keeps_user() {
        let actions = actions();
        let state = actions.load().unwrap();
        let state = actions.sign_in(&state, "dana", "").unwrap();
        let state = actions.clear(&state).unwrap();
        assert!(state.feed.is_empty());
        assert!(!state.is_guest());
    }
}
