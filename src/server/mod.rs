//! Server module for Skein
//!
//! # Module Structure
//!
//! - `config`: Application configuration types
//! - `loader`: Configuration loading from files and environment
//! - `init`: Repository and registry wiring, run loop

pub mod config;
mod init;
mod loader;

pub use init::{build_registry, open_repository, open_shared_repository, run};
pub use loader::load_config;
