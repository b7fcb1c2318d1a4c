//! Core content store implementation

pub mod blob;
pub mod config;
pub mod connection;
pub mod content;
pub mod dialect;
pub mod history;
pub mod ids;
pub mod transaction;
