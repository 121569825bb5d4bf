//! fs-uae-wrapper - Staging launcher for the FS-UAE emulator
//!
//! This crate prepares an ephemeral working directory from compressed game
//! assets, relocates the user's configuration into it, runs FS-UAE there, and
//! round-trips emulator save state back into an archive next to the
//! configuration file.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line tokenizing (options are passed through to FS-UAE)
//! - [`config`] - Config file parsing and the layered global/host lookup
//! - [`options`] - Merged key/value option mappings with precedence rules
//! - [`paths`] - Variable interpolation and asset-path normalization
//! - [`archive`] - External archiver selection and invocation
//! - [`session`] - The staging session owning the working directory
//! - [`strategy`] - The selectable run policies built on the session

pub mod archive;
pub mod cli;
pub mod config;
pub mod options;
pub mod paths;
pub mod session;
pub mod strategy;

/// Option key selecting the wrapper strategy. Command-line options whose key
/// contains this string are kept away from the emulator argument list.
pub const WRAPPER_KEY: &str = "wrapper";

/// Name the staged copy of the configuration file always gets, so the
/// emulator picks it up from the working directory without extra arguments.
pub const CANONICAL_CONFIG: &str = "Config.fs-uae";

/// Emulator executable, resolved on `PATH`.
pub const EMULATOR_BIN: &str = "fs-uae";
