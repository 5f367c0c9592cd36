// src/config/mod.rs

//! Configuration loading and validation for poddag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate it statically: unknown fields, dependencies, cycles and
//!   secret bindings (`validate.rs`).
//! - Build the dependency graph and runtime options (`build.rs`).

pub mod build;
pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{
    ConfigFile, DefaultSection, RawConfigFile, SchedulerSection, SecretConfig, TaskConfig,
};
