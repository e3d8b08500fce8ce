//! Bulk image downloads: one file per image, or everything packed into a
//! single stored ZIP archive.

pub mod archive;
pub mod cli;
pub mod commands;
pub mod crc32;
pub mod downloader;
pub mod error;
pub mod fetcher;
pub mod host;
pub mod message;
pub mod naming;
pub mod orchestrator;
pub mod registry;
pub mod state;
pub mod utils;
