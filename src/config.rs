//! FS-UAE configuration files: parsing and the layered lookup.
//!
//! FS-UAE configs are `key = value` text with optional `[section]` headers.
//! Sections only group lines visually; all keys land in one flat mapping.
//! Besides the file named on the command line, FS-UAE reads global defaults
//! from a handful of conventional locations, and a `base_dir` setting can
//! pull in one more "host" config. `get_config` reproduces that cascade.

use std::env;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::options::{self, Options};
use crate::paths;

/// Key under which the layered lookup records the global configuration
/// directory it used, for callers that need a `$BASE` substitute.
pub const BASE_DIR_TAG: &str = "_base_dir";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file `{path}`: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("syntax error in `{path}` line {line}: `{text}`")]
    Syntax {
        path: PathBuf,
        line: usize,
        text: String,
    },
}

/// Parse one config file into an option mapping.
///
/// Whitespace around keys and values is stripped, values keep any `=` after
/// the first one, and a non-blank line without `=` poisons the whole file.
pub fn load_options(path: &Path) -> Result<Options, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    let mut options = Options::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') && line.ends_with(']') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) => options.insert(key.trim(), value.trim()),
            None => {
                return Err(ConfigError::Syntax {
                    path: path.to_path_buf(),
                    line: index + 1,
                    text: line.to_string(),
                })
            }
        }
    }
    Ok(options)
}

/// Global config candidates in lookup order, each with the directory the
/// lookup reports as the global configuration home.
fn global_candidates() -> Vec<(PathBuf, PathBuf)> {
    let mut candidates = Vec::new();
    let home = directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf());

    let xdg_config = env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| home.as_ref().map(|h| h.join(".config")));
    if let Some(xdg) = xdg_config {
        candidates.push((xdg.join("fs-uae/fs-uae.conf"), xdg.join("fs-uae")));
    }
    if let Some(home) = home {
        candidates.push((
            home.join("Documents/FS-UAE/Configurations/Default.fs-uae"),
            home.join("Documents/FS-UAE"),
        ));
        candidates.push((
            home.join("FS-UAE/Configurations/Default.fs-uae"),
            home.join("FS-UAE"),
        ));
    }
    candidates
}

/// Load the configuration visible from `config_path`, global layers included.
///
/// The overlay list is built in precedence order and reduced left to right:
/// first existing global config, then the direct file, then (when the merged
/// result names a `base_dir`) the host config inside it, then the direct file
/// once more so it always has the last word. When a global config was used
/// and no `base_dir` is set, the result is tagged with the global directory
/// under [`BASE_DIR_TAG`].
pub fn get_config(config_path: &Path) -> Result<Options, ConfigError> {
    let mut layers: Vec<Options> = Vec::new();
    let mut global_dir = None;

    for (candidate, dir) in global_candidates() {
        if candidate.exists() {
            layers.push(load_options(&candidate)?);
            global_dir = Some(dir);
            break;
        }
    }

    let direct = load_options(config_path)?;
    layers.push(direct.clone());
    let mut merged = reduce(&layers);

    if let Some(base_dir) = merged.get("base_dir") {
        let base_dir = paths::interpolate(base_dir, config_path, None);
        let host = Path::new(&base_dir).join("Configurations/Host.fs-uae");
        if host.exists() {
            layers.push(load_options(&host)?);
            layers.push(direct);
            merged = reduce(&layers);
        }
    } else if let Some(dir) = global_dir {
        merged.insert(BASE_DIR_TAG, dir.to_string_lossy());
    }

    Ok(merged)
}

fn reduce(layers: &[Options]) -> Options {
    layers
        .iter()
        .fold(Options::new(), |merged, layer| options::merge(&merged, layer))
}
