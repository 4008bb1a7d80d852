#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod blob;
pub mod config;
pub mod error;
pub mod feed;
pub mod logging;
pub mod session;
pub mod state;
pub mod storage;
pub mod ui;
pub mod video;
pub mod visibility;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{export_once, run};
pub use error::ValidationError;
