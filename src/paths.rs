//! Path rewriting for relocated configurations.
//!
//! FS-UAE configs are written against the config file's own directory, but
//! the wrapper runs the emulator from an ephemeral working directory. This
//! module expands the `$TOKEN` placeholders FS-UAE allows in values, rewrites
//! relative asset paths to absolute ones before relocation, and resolves the
//! save-state directory the emulator left behind afterwards.

use std::env;
use std::path::{Component, Path, PathBuf};

use crate::config::{self, ConfigError};
use crate::options::Options;
use crate::EMULATOR_BIN;

/// The save-state directory option. Deliberately exempt from normalization:
/// it is interpreted relative to the working directory, not the original
/// config location.
pub const SAVE_STATES_KEY: &str = "save_states_dir";

/// Config keys rescanned for kickstart firmware locations before launch.
pub const KICKSTART_KEYS: [&str; 3] = ["kickstart_file", "kickstart_ext_file", "kickstarts_dir"];

/// Non-indexed config keys holding asset paths that must survive relocation.
const NORMALIZED_KEYS: &[&str] = &[
    "wrapper_archive",
    "accelerator_rom",
    "base_dir",
    "cdrom_drive_0",
    "cdroms_dir",
    "controllers_dir",
    "cpuboard_flash_ext_file",
    "cpuboard_flash_file",
    "floppies_dir",
    "floppy_overlays_dir",
    "fmv_rom",
    "graphics_card_rom",
    "hard_drives_dir",
    "kickstart_file",
    "kickstarts_dir",
    "logs_dir",
    "screenshots_output_dir",
    "state_dir",
];

/// Expand the `$TOKEN` placeholders FS-UAE recognizes in config values.
///
/// Every occurrence of a token is replaced, not just the first. Tokens that
/// cannot be resolved (no `$HOME` in the environment, no emulator on `PATH`,
/// no `base` supplied) are left literal.
pub fn interpolate(value: &str, config_path: &Path, base: Option<&str>) -> String {
    let mut result = value.to_string();

    if result.contains("$CONFIG") {
        let dir = config_dir(config_path);
        result = result.replace("$CONFIG", &dir.to_string_lossy());
    }
    if result.contains("$HOME") {
        if let Ok(home) = env::var("HOME") {
            result = result.replace("$HOME", &home);
        }
    }
    if result.contains("$EXE") || result.contains("$APP") {
        if let Ok(exe) = which::which(EMULATOR_BIN) {
            let exe = exe.to_string_lossy().into_owned();
            result = result.replace("$EXE", &exe).replace("$APP", &exe);
        }
    }
    if result.contains("$DOCUMENTS") {
        if let Some(documents) = documents_dir() {
            result = result.replace("$DOCUMENTS", &documents.to_string_lossy());
        }
    }
    if let Some(base) = base {
        if result.contains("$BASE") {
            result = result.replace("$BASE", base);
        }
    }

    result
}

fn documents_dir() -> Option<PathBuf> {
    env::var_os("XDG_DOCUMENTS_DIR")
        .map(PathBuf::from)
        .or_else(|| directories::BaseDirs::new().map(|dirs| dirs.home_dir().join("Documents")))
}

/// Absolute directory containing `config_path`.
pub fn config_dir(config_path: &Path) -> PathBuf {
    absolutize(config_path)
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"))
}

/// Make `path` absolute against the current directory and collapse `.` and
/// `..` components lexically, without touching the filesystem.
pub fn absolutize(path: &Path) -> PathBuf {
    let full = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut normalized = PathBuf::new();
    for component in full.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

fn indexed_key(key: &str, prefix: &str, bound: u32) -> bool {
    match key.strip_prefix(prefix) {
        // exact decimal, no leading zeros
        Some(index) if index == "0" || !index.starts_with('0') => {
            index.parse::<u32>().map_or(false, |n| n < bound)
        }
        _ => false,
    }
}

fn is_normalized_key(key: &str) -> bool {
    NORMALIZED_KEYS.contains(&key)
        || indexed_key(key, "cdrom_image_", 20)
        || indexed_key(key, "floppy_image_", 20)
        || indexed_key(key, "floppy_drive_", 4)
        || indexed_key(key, "hard_drive_", 10)
}

/// Rewrite relocatable asset paths in `configuration` to absolute ones.
///
/// Returns only the changed pairs. Values already absolute are skipped, a
/// `$CONFIG` prefix resolves against the config file's directory, and any
/// other relative value resolves against the current directory, which is
/// still the invocation directory at this point.
pub fn normalize_assets(configuration: &Options, config_path: &Path) -> Options {
    let conf_dir = config_dir(config_path);
    let mut changed = Options::new();

    for (key, value) in configuration.iter() {
        if key == SAVE_STATES_KEY || !is_normalized_key(key) {
            continue;
        }
        if Path::new(value).is_absolute() {
            continue;
        }
        let resolved = if value.starts_with("$CONFIG") {
            let replaced = value.replace("$CONFIG", &conf_dir.to_string_lossy());
            absolutize(Path::new(&replaced))
        } else {
            absolutize(Path::new(value))
        };
        changed.insert(key, resolved.to_string_lossy());
    }

    changed
}

/// Locate the save-state directory the emulator left in the working
/// directory, as a path relative to it.
///
/// Returns `None` unless the option is set, starts with the `$CONFIG` token,
/// contains no parent traversal, and names an existing directory under
/// `work_dir`. All rejections are deliberate no-saves outcomes, not errors.
pub fn resolve_save_dir(options: &Options, work_dir: &Path) -> Option<String> {
    let value = options.get(SAVE_STATES_KEY)?;
    if value.is_empty() {
        return None;
    }
    if !value.starts_with("$CONFIG") || value.contains("..") {
        return None;
    }

    let relative = value.replace("$CONFIG/", "");
    if !work_dir.join(&relative).is_dir() {
        return None;
    }

    Some(relative.trim_end_matches('/').to_string())
}

/// Re-read the raw config chain for kickstart firmware paths and absolutize
/// any relative ones against the original config location.
///
/// Kickstart entries usually live in global configs written with relative
/// paths; once the emulator runs from the working directory those would
/// dangle, so the resolved values are forced onto the emulator command line.
pub fn kickstart_overrides(config_path: &Path) -> Result<Options, ConfigError> {
    let conf = config::get_config(config_path)?;
    let mut overrides = Options::new();

    for key in KICKSTART_KEYS {
        let Some(value) = conf.get(key) else { continue };
        if value.is_empty() {
            continue;
        }
        if Path::new(value).is_absolute() {
            overrides.insert(key, value);
        } else {
            let expanded = interpolate(value, config_path, conf.get(config::BASE_DIR_TAG));
            overrides.insert(key, absolutize(Path::new(&expanded)).to_string_lossy());
        }
    }

    Ok(overrides)
}
