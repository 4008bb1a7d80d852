use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use serde_json::json;

#[cfg(unix)]
use rand::{distributions::Alphanumeric, Rng};
#[cfg(unix)]
use std::io::Write;
#[cfg(unix)]
use std::os::unix::net::UnixStream;

use crate::blob;
use crate::feed::Post;
use crate::visibility::Playback;

const URL_PLACEHOLDER: &str = "%URL%";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VideoSource {
    pub playback: String,
    pub label: String,
}

impl VideoSource {
    /// Transient uploads resolve to their local file; revoked ones have no source.
    pub fn for_post(post: &Post, blobs: &blob::Registry) -> Result<Self> {
        let playback = if blob::is_reference(&post.source) {
            let path = blobs
                .resolve(&post.source)
                .ok_or_else(|| anyhow!("upload {} is no longer available", post.source))?;
            path.to_string_lossy().to_string()
        } else {
            post.source.trim().to_string()
        };
        if playback.is_empty() {
            return Err(anyhow!("video URL missing"));
        }
        Ok(Self {
            playback,
            label: post.caption.trim().to_string(),
        })
    }
}

pub struct LaunchOptions<'a> {
    pub command: &'a [String],
    pub source: &'a VideoSource,
}

pub struct PlayerSession {
    kill_tx: Sender<()>,
    status_rx: Receiver<Result<ExitStatus>>,
    handle: Option<thread::JoinHandle<()>>,
    ipc_path: Option<Arc<String>>,
}

impl PlayerSession {
    fn finalize(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn try_status(&mut self) -> Option<Result<ExitStatus>> {
        match self.status_rx.try_recv() {
            Ok(res) => {
                self.finalize();
                Some(res)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.finalize();
                Some(Err(anyhow!("video session closed unexpectedly")))
            }
        }
    }

    pub fn stop_blocking(mut self) -> Option<Result<ExitStatus>> {
        let _ = self.kill_tx.send(());
        let res = self.status_rx.recv().ok();
        self.finalize();
        res
    }

    pub fn controls_supported(&self) -> bool {
        self.ipc_path.is_some()
    }

    pub fn send_command(&self, command: VideoCommand) -> Result<()> {
        let Some(path) = &self.ipc_path else {
            return Err(anyhow!("player controls are not supported on this platform"));
        };
        send_ipc_command(path, command)
    }
}

impl Drop for PlayerSession {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.kill_tx.send(());
            let _ = self.status_rx.recv().ok();
            self.finalize();
        }
    }
}

fn is_mpv(program: &str) -> bool {
    Path::new(program)
        .file_stem()
        .map(|stem| stem.eq_ignore_ascii_case("mpv"))
        .unwrap_or(false)
}

fn build_args(command: &[String], source: &VideoSource, ipc_path: Option<&str>) -> Vec<String> {
    let mut args: Vec<String> = command
        .iter()
        .skip(1)
        .map(|arg| arg.replace(URL_PLACEHOLDER, &source.playback))
        .collect();
    if !command.iter().skip(1).any(|arg| arg.contains(URL_PLACEHOLDER)) {
        args.push(source.playback.clone());
    }
    if command.first().map(|program| is_mpv(program)).unwrap_or(false) {
        args.push("--really-quiet".to_string());
        if !source.label.is_empty() {
            args.push(format!("--force-media-title={}", source.label));
        }
        if let Some(path) = ipc_path {
            args.push(format!("--input-ipc-server={path}"));
        }
    }
    args
}

pub fn spawn_player(opts: LaunchOptions<'_>) -> Result<PlayerSession> {
    let program = opts
        .command
        .first()
        .filter(|program| !program.trim().is_empty())
        .cloned()
        .ok_or_else(|| anyhow!("player command is empty"))?;
    if opts.source.playback.trim().is_empty() {
        return Err(anyhow!("video URL missing"));
    }

    #[cfg(unix)]
    let ipc_path = if is_mpv(&program) {
        unique_ipc_path()
    } else {
        None
    };
    #[cfg(not(unix))]
    let ipc_path: Option<String> = None;

    #[cfg(unix)]
    if let Some(path) = &ipc_path {
        cleanup_ipc_path(path);
    }

    let args = build_args(opts.command, opts.source, ipc_path.as_deref());
    tracing::debug!(program = %program, ?args, "spawning player");

    let capture_stderr = tracing::enabled!(tracing::Level::DEBUG);
    let mut command = Command::new(&program);
    command.args(&args);
    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    if capture_stderr {
        command.stderr(Stdio::piped());
    } else {
        command.stderr(Stdio::null());
    }
    let mut child = command
        .spawn()
        .with_context(|| format!("launch {program} to play {}", opts.source.playback))?;

    let (kill_tx, kill_rx) = bounded::<()>(1);
    let (status_tx, status_rx) = bounded::<Result<ExitStatus>>(1);
    let ipc_cleanup = ipc_path.clone();

    let handle = thread::spawn(move || {
        let mut stderr_handle = child.stderr.take().map(|stderr| {
            thread::spawn(move || {
                let reader = BufReader::new(stderr);
                for line in reader.lines().map_while(Result::ok) {
                    tracing::debug!(target: "snapbridge::player", "{line}");
                }
            })
        });

        let result = loop {
            if kill_rx.try_recv().is_ok() {
                let _ = child.kill();
                break child.wait().context("wait for player after stop request");
            }
            match child.try_wait() {
                Ok(Some(status)) => break Ok(status),
                Ok(None) => thread::sleep(Duration::from_millis(30)),
                Err(err) => break Err(anyhow::Error::new(err).context("poll player status")),
            }
        };
        if let Some(handle) = stderr_handle.take() {
            let _ = handle.join();
        }
        match &result {
            Ok(status) => tracing::debug!(code = ?status.code(), "player exited"),
            Err(err) => tracing::warn!(error = %err, "player supervision failed"),
        }

        #[cfg(unix)]
        if let Some(path) = ipc_cleanup {
            cleanup_ipc_path(&path);
        }
        #[cfg(not(unix))]
        drop(ipc_cleanup);

        let _ = status_tx.send(result);
    });

    Ok(PlayerSession {
        kill_tx,
        status_rx,
        handle: Some(handle),
        ipc_path: ipc_path.map(Arc::new),
    })
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum VideoCommand {
    SetPause(bool),
    ToggleMute,
}

fn command_payload(command: VideoCommand) -> serde_json::Value {
    match command {
        VideoCommand::SetPause(paused) => json!(["set_property", "pause", paused]),
        VideoCommand::ToggleMute => json!(["cycle", "mute"]),
    }
}

fn send_ipc_command(path: &str, command: VideoCommand) -> Result<()> {
    let payload = json!({
        "command": command_payload(command),
    });
    let serialized = serde_json::to_string(&payload).context("serialize player command")?;
    send_ipc_command_inner(path, &serialized)
}

#[cfg(unix)]
fn send_ipc_command_inner(path: &str, serialized: &str) -> Result<()> {
    let mut stream =
        UnixStream::connect(path).with_context(|| format!("connect to player socket {path}"))?;
    stream
        .write_all(serialized.as_bytes())
        .context("write player command")?;
    stream
        .write_all(b"\n")
        .context("write player command terminator")?;
    Ok(())
}

#[cfg(not(unix))]
fn send_ipc_command_inner(_path: &str, _serialized: &str) -> Result<()> {
    Err(anyhow!("player controls are not supported on this platform"))
}

#[cfg(unix)]
fn unique_ipc_path() -> Option<String> {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect();
    let mut path = std::env::temp_dir();
    path.push(format!("snapbridge-mpv-{}-{suffix}.sock", std::process::id()));
    Some(path.to_string_lossy().to_string())
}

#[cfg(unix)]
fn cleanup_ipc_path(path: &str) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::debug!(%path, error = %err, "failed to remove player socket");
        }
    }
}

struct Active {
    index: usize,
    source: VideoSource,
    paused: bool,
    session: PlayerSession,
}

/// Keeps at most one player running: the one for the card that should play.
pub struct Controller {
    command: Vec<String>,
    enabled: bool,
    blobs: Arc<blob::Registry>,
    posts: Vec<Post>,
    active: Option<Active>,
    last_error: Option<String>,
}

impl Controller {
    pub fn new(command: Vec<String>, enabled: bool, blobs: Arc<blob::Registry>) -> Self {
        Self {
            command,
            enabled,
            blobs,
            posts: Vec::new(),
            active: None,
            last_error: None,
        }
    }

    /// Called whenever the feed re-renders. A player whose post moved or
    /// vanished is stopped.
    pub fn sync_posts(&mut self, posts: &[Post]) {
        self.posts = posts.to_vec();
        let stale = match &self.active {
            Some(active) => match self.posts.get(active.index) {
                Some(post) => VideoSource::for_post(post, &self.blobs).ok().as_ref()
                    != Some(&active.source),
                None => true,
            },
            None => false,
        };
        if stale {
            self.stop();
        }
    }

    pub fn active_index(&self) -> Option<usize> {
        self.active
            .as_ref()
            .filter(|active| !active.paused)
            .map(|active| active.index)
    }

    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }

    /// Reaps a player the user closed themselves.
    pub fn poll(&mut self) {
        let exited = match self.active.as_mut() {
            Some(active) => active.session.try_status().is_some(),
            None => false,
        };
        if exited {
            self.active = None;
        }
    }

    pub fn toggle_mute(&mut self) -> Result<()> {
        let active = self
            .active
            .as_ref()
            .ok_or_else(|| anyhow!("nothing is playing"))?;
        active.session.send_command(VideoCommand::ToggleMute)
    }

    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.session.stop_blocking();
        }
    }

    fn start(&mut self, index: usize) -> Result<()> {
        let post = self
            .posts
            .get(index)
            .ok_or_else(|| anyhow!("no post at position {index}"))?;
        let source = VideoSource::for_post(post, &self.blobs)?;
        self.stop();
        let session = spawn_player(LaunchOptions {
            command: &self.command,
            source: &source,
        })?;
        tracing::info!(index, source = %source.playback, "playing");
        self.active = Some(Active {
            index,
            source,
            paused: false,
            session,
        });
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> Result<()> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        if active.paused == paused {
            return Ok(());
        }
        if !active.session.controls_supported() {
            if paused {
                self.stop();
            }
            return Ok(());
        }
        match active.session.send_command(VideoCommand::SetPause(paused)) {
            Ok(()) => {
                active.paused = paused;
                Ok(())
            }
            Err(err) => {
                self.stop();
                Err(err)
            }
        }
    }
}

impl Playback for Controller {
    fn play(&mut self, index: usize) {
        if !self.enabled {
            return;
        }
        let loaded = self
            .active
            .as_ref()
            .map(|active| active.index == index)
            .unwrap_or(false);
        let result = if loaded {
            self.set_paused(false)
        } else {
            self.start(index)
        };
        if let Err(err) = result {
            tracing::warn!(index, error = %err, "play failed");
            self.last_error = Some(format!("{err:#}"));
        }
    }

    fn pause(&mut self, index: usize) {
        let is_active = self
            .active
            .as_ref()
            .map(|active| active.index == index)
            .unwrap_or(false);
        if !is_active {
            return;
        }
        if let Err(err) = self.set_paused(true) {
            tracing::debug!(index, error = %err, "pause fell back to stop");
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.stop();
    }
}
