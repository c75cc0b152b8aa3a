//! Merged activity feed engine.
//!
//! `braid` combines a paginated forum-activity source and an auction side-channel
//! into one newest-first, infinitely scrollable list, and keeps the reader's
//! position stable across filter changes, reloads and newly arriving items.
//!
//! - [`feed`] - normalization, cursors, merging, new-item detection, scroll reconciliation
//! - [`source`] - upstream traits plus HTTP and in-memory implementations
//! - [`storage`] - SQLite/in-memory key-value stores and the watermark adapter
//! - [`config`] - `config.toml` loading
//! - [`util`] - identity parsing, endpoint validation, text sanitizing

pub mod config;
pub mod feed;
pub mod source;
pub mod storage;
pub mod util;
