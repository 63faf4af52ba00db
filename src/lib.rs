#![allow(unused_assignments)] // thiserror/miette proc macros trigger false positives

pub mod accounts;
pub mod cli;
pub mod compute;
pub mod config;
pub mod error;
pub mod flow;
pub mod keys;
pub mod logging;
pub mod metadata;
pub mod paths;
pub mod progress;
pub mod prompt;
pub mod ssh_keys;
pub mod util;
