use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::blob;
use crate::config::{self, Config};
use crate::logging;
use crate::state::Actions;
use crate::storage::{self, KeyValueStore};
use crate::ui;
use crate::video;

pub fn run() -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    if let Err(err) = logging::init(&cfg.log) {
        eprintln!("warning: logging disabled: {err:#}");
    }
    let config_path = config::default_path();
    tracing::info!(version = crate::VERSION, config = %friendly_path(config_path.as_ref()), "starting");

    let blobs = Arc::new(blob::Registry::new());
    let actions = open_actions(&cfg, blobs.clone())?;
    let state = actions.load().context("load feed")?;

    let status = match &state.user {
        Some(user) => format!(
            "Hi, {}. {} posts in your feed.",
            user.display_name,
            state.feed.len()
        ),
        None => format!(
            "Browsing as Guest. {} posts in your feed. Press i to sign in.",
            state.feed.len()
        ),
    };

    let controller = video::Controller::new(
        cfg.player.video_command.clone(),
        cfg.player.autoplay,
        blobs.clone(),
    );

    let mut model = ui::Model::new(ui::Options {
        actions,
        state,
        controller,
        export_dir: cfg.export.resolved_dir(),
        cooldown: cfg.player.cooldown,
        status_message: status,
    });
    let result = model.run();
    drop(model);

    let released = blobs.revoke_all();
    tracing::info!(released, "exiting");
    result
}

/// Loads the stored feed and writes the export file without starting the UI.
pub fn export_once(dir: Option<&Path>) -> Result<PathBuf> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    let actions = open_actions(&cfg, Arc::new(blob::Registry::new()))?;
    let state = actions.load().context("load feed")?;
    let dir = dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| cfg.export.resolved_dir());
    actions.export(&state, &dir)
}

fn open_actions(cfg: &Config, blobs: Arc<blob::Registry>) -> Result<Actions> {
    let store: Arc<dyn KeyValueStore> = Arc::new(
        storage::Store::open(storage::Options {
            path: cfg.storage.path.clone(),
        })
        .context("open storage")?,
    );
    Ok(Actions::new(store, blobs))
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/snapbridge/config.yaml".to_string()
    }
}
