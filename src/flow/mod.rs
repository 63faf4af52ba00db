//! Top-level operations behind each subcommand.

pub mod connect;
pub mod container;
pub mod ensure_key;
