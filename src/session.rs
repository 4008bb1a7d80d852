use anyhow::{Context, Result};

use crate::error::ValidationError;
use crate::storage::{KeyValueStore, USER_KEY};

const ADMIN_USERNAME: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub display_name: String,
    username: Option<String>,
}

impl CurrentUser {
    /// Only known right after sign-in; a restored session carries the display name alone.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn is_admin(&self) -> bool {
        self.username.as_deref() == Some(ADMIN_USERNAME)
    }

    pub fn greeting(&self) -> String {
        if self.is_admin() {
            format!("Signed in as {} (admin)", self.display_name)
        } else {
            format!("Signed in as {}", self.display_name)
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub fn sign_in(
    store: &dyn KeyValueStore,
    username: &str,
    display_name: &str,
) -> std::result::Result<CurrentUser, SessionError> {
    let username = username.trim();
    let display_name = display_name.trim();
    if username.is_empty() {
        return Err(ValidationError::EmptyUsername.into());
    }
    let display_name = if display_name.is_empty() {
        username
    } else {
        display_name
    };
    store
        .write_key(USER_KEY, display_name)
        .context("session: store signed-in user")?;
    tracing::info!(user = %display_name, "signed in");
    Ok(CurrentUser {
        display_name: display_name.to_string(),
        username: Some(username.to_string()),
    })
}

pub fn sign_out(store: &dyn KeyValueStore) -> Result<()> {
    store
        .remove_key(USER_KEY)
        .context("session: clear signed-in user")?;
    tracing::info!("signed out");
    Ok(())
}

pub fn current(store: &dyn KeyValueStore) -> Option<CurrentUser> {
    match store.read_key(USER_KEY) {
        Ok(Some(name)) if !name.trim().is_empty() => Some(CurrentUser {
            display_name: name,
            username: None,
        }),
        Ok(_) => None,
        Err(err) => {
            tracing::warn!(error = %err, "session: storage read failed");
            None
        }
    }
}
