#![allow(clippy::uninlined_format_args)]

pub mod acquisition;
pub mod app;
pub mod config;
pub mod engine;
pub mod logging;
pub mod ordering;
pub mod playback;
pub mod repository;
pub mod selection;
pub mod storage;
pub mod story;
pub mod sync;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
