//! Music Catalog - keeps a durable catalog of local audio files in sync
//! with what is on disk.
//!
//! The [`library::Library`] facade owns scanning, file watching and
//! settings. Track records live behind [`db::CatalogRepository`], filesystem
//! access behind [`fs::FileSystem`], and tag parsing behind
//! [`metadata::TagReader`]. Everything the catalog does is announced on an
//! [`events::EventBus`].

pub mod cli;
pub mod config;
pub mod cover;
pub mod db;
pub mod error;
pub mod events;
pub mod fs;
pub mod library;
pub mod metadata;
pub mod model;
pub mod scanner;
#[cfg(test)]
pub mod test_utils;
