//! Wrapper strategies.
//!
//! A strategy decides how much staging a run needs: `plain` spawns the
//! emulator in place, `archive` stages a game archive, `whdload` stages a
//! base image plus the game archive and writes the WHDLoad startup entry,
//! `savestate` stages nothing but the save archive. All staged variants
//! share the [`Session`] steps and differ only in validation and extraction.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::options::Options;
use crate::session::Session;
use crate::EMULATOR_BIN;

const SLAVE_SUFFIX: &str = ".slave";
const ICON_SUFFIX: &str = ".info";

/// The closed set of run policies selectable through the `wrapper` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Plain,
    Archive,
    Whdload,
    SaveState,
}

impl Strategy {
    pub fn from_name(name: &str) -> Option<Strategy> {
        match name {
            "plain" => Some(Strategy::Plain),
            "archive" => Some(Strategy::Archive),
            "whdload" => Some(Strategy::Whdload),
            "savestate" => Some(Strategy::SaveState),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Plain => "plain",
            Strategy::Archive => "archive",
            Strategy::Whdload => "whdload",
            Strategy::SaveState => "savestate",
        }
    }

    pub fn all() -> &'static [Strategy] {
        &[
            Strategy::Plain,
            Strategy::Archive,
            Strategy::Whdload,
            Strategy::SaveState,
        ]
    }

    /// Run the strategy to completion. Staged variants always clean their
    /// working directory up, whether the run succeeded or not.
    pub fn run(&self, conf_file: &Path, emulator_options: Options, all_options: Options) -> Result<()> {
        debug!("Running the `{}` strategy", self.as_str());
        if *self == Strategy::Plain {
            return run_plain(conf_file, &emulator_options);
        }

        let mut session = Session::new(conf_file, emulator_options, all_options);
        let result = self.run_session(&mut session);
        session.cleanup();
        result
    }

    fn run_session(&self, session: &mut Session) -> Result<()> {
        session.validate()?;
        match self {
            Strategy::Archive => session.validate_archive()?,
            Strategy::Whdload => {
                session.validate_archive()?;
                session.validate_whdload_base()?;
            }
            _ => {}
        }

        session.stage()?;
        match self {
            Strategy::Archive => session.extract_main_archive()?,
            Strategy::Whdload => {
                session.extract_base_image()?;
                session.extract_main_archive()?;
                prepare_whdload_startup(session.work_dir_path()?)?;
            }
            _ => {}
        }

        session.copy_config()?;
        session.load_save()?;
        session.run_emulator()?;
        session.save_save()?;
        if *self == Strategy::Archive {
            session.repack_archive()?;
        }
        Ok(())
    }
}

/// Spawn the emulator directly on the original config, no staging at all.
fn run_plain(conf_file: &Path, emulator_options: &Options) -> Result<()> {
    let exe = which::which(EMULATOR_BIN)
        .map_err(|_| anyhow!("`{EMULATOR_BIN}` not found on PATH"))?;
    let status = Command::new(exe)
        .arg(conf_file)
        .args(emulator_options.to_emulator_args())
        .status()
        .with_context(|| format!("Failed to run `{EMULATOR_BIN}`"))?;
    if !status.success() {
        warn!("Emulator exited with {status}");
    }
    Ok(())
}

/// Locate the staged slave/icon pair and write the startup entry WHDLoad
/// boots from.
fn prepare_whdload_startup(work: &Path) -> Result<()> {
    let slave = find_slave(work)?;
    let icon = find_icon(&slave)?;

    let slave_dir = slave.parent().unwrap_or(work);
    let rel = slave_dir.strip_prefix(work).unwrap_or(slave_dir);
    let rel = if rel.as_os_str().is_empty() {
        Path::new(".")
    } else {
        rel
    };

    let startup_dir = work.join("S");
    fs::create_dir_all(&startup_dir).context("Failed to create the S directory")?;
    let entry = format!("cd {}\nC:kgiconload {icon}\n", rel.display());
    fs::write(startup_dir.join("whdload-startup"), entry)
        .context("Failed to write the whdload startup entry")?;
    info!("Prepared whdload startup for `{}`", slave.display());
    Ok(())
}

/// First file in the staged tree carrying the slave marker extension.
fn find_slave(work: &Path) -> Result<PathBuf> {
    for entry in WalkDir::new(work) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if name.ends_with(SLAVE_SUFFIX) {
            return Ok(entry.into_path());
        }
    }
    bail!("no `{SLAVE_SUFFIX}` file found in the staged archives")
}

/// Icon file sharing the slave's stem, in the slave's own directory.
fn find_icon(slave: &Path) -> Result<String> {
    let stem = slave
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .to_lowercase();
    let dir = slave
        .parent()
        .ok_or_else(|| anyhow!("slave file `{}` has no parent directory", slave.display()))?;

    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to list `{}`", dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let lower = name.to_lowercase();
        if lower.strip_suffix(ICON_SUFFIX) == Some(stem.as_str()) {
            return Ok(name);
        }
    }
    bail!("no `{ICON_SUFFIX}` icon matching `{}`", slave.display())
}
