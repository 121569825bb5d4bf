//! The staging session.
//!
//! A [`Session`] owns one ephemeral working directory for its whole life.
//! Strategies drive it through the staging steps in order: validate, stage,
//! copy the config, load a previous save, run the emulator, persist the save,
//! optionally repack the game archive. Cleanup always runs, on success and on
//! every failure path, and never propagates.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::archive::{Backend, Format};
use crate::options::Options;
use crate::paths;
use crate::{CANONICAL_CONFIG, EMULATOR_BIN, WRAPPER_KEY};

const ARCHIVE_KEY: &str = "wrapper_archive";
const ARCHIVER_KEY: &str = "wrapper_archiver";
const SAVE_STATE_KEY: &str = "wrapper_save_state";
const PERSIST_DATA_KEY: &str = "wrapper_persist_data";
const GUI_MSG_KEY: &str = "wrapper_gui_msg";
const WHDLOAD_BASE_KEY: &str = "wrapper_whdload_base";

/// One staging run: source config, merged options, and the temporary
/// working directory the emulator will be pointed at.
pub struct Session {
    conf_file: PathBuf,
    emulator_options: Options,
    all_options: Options,
    work_dir: Option<TempDir>,
    archive_path: Option<PathBuf>,
    save_archive: Option<PathBuf>,
}

impl Session {
    /// Build a session around `conf_file`. `emulator_options` holds only the
    /// command-line options destined for the emulator; `all_options` is the
    /// full config-plus-commandline view used for `wrapper_*` lookups.
    pub fn new(conf_file: &Path, emulator_options: Options, all_options: Options) -> Session {
        let conf_file = paths::absolutize(conf_file);
        let conf_dir = paths::config_dir(&conf_file);

        let archive_path = all_options.get(ARCHIVE_KEY).map(|value| {
            let path = Path::new(value);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                conf_dir.join(path)
            }
        });

        // The save archive sits next to the config file and carries the
        // archiver's native extension.
        let save_archive = all_options
            .get(ARCHIVER_KEY)
            .and_then(Format::from_archiver_name)
            .map(|format| {
                let stem = conf_file.file_stem().unwrap_or_default().to_string_lossy();
                conf_dir.join(format!("{stem}_save{}", format.extension()))
            });

        Session {
            conf_file,
            emulator_options,
            all_options,
            work_dir: None,
            archive_path,
            save_archive,
        }
    }

    /// Check mandatory options and tool availability before any staging
    /// happens. Nothing on disk has changed when this fails.
    pub fn validate(&self) -> Result<()> {
        if !self.all_options.contains(WRAPPER_KEY) {
            bail!("no `{WRAPPER_KEY}` option set");
        }
        which::which(EMULATOR_BIN)
            .map_err(|_| anyhow!("`{EMULATOR_BIN}` not found on PATH"))?;

        if self.all_options.is_enabled(SAVE_STATE_KEY) {
            let name = self.all_options.get(ARCHIVER_KEY).ok_or_else(|| {
                anyhow!("`{SAVE_STATE_KEY}` requires the `{ARCHIVER_KEY}` option")
            })?;
            let format = Format::from_archiver_name(name)
                .ok_or_else(|| anyhow!("unknown archiver `{name}`"))?;
            if Backend::new(format).is_none() {
                bail!("no executable found for `{name}` archives");
            }
        }
        Ok(())
    }

    /// Archive-based strategies need a source archive.
    pub fn validate_archive(&self) -> Result<()> {
        if self.archive_path.is_none() {
            bail!("the `{ARCHIVE_KEY}` option is required for this strategy");
        }
        Ok(())
    }

    /// The whdload strategy needs a base image on top of the game archive.
    pub fn validate_whdload_base(&self) -> Result<()> {
        match self.all_options.get(WHDLOAD_BASE_KEY) {
            Some(base) if !base.is_empty() => Ok(()),
            _ => bail!("the `{WHDLOAD_BASE_KEY}` option is required for the whdload strategy"),
        }
    }

    /// Allocate the working directory and rewrite asset paths so they keep
    /// resolving once the emulator runs from the new location.
    pub fn stage(&mut self) -> Result<()> {
        let work = tempfile::Builder::new()
            .prefix("fs-uae-wrapper-")
            .tempdir()
            .context("Failed to create a working directory")?;
        debug!("Working directory: {}", work.path().display());
        self.work_dir = Some(work);

        let normalized = paths::normalize_assets(&self.all_options, &self.conf_file);
        self.emulator_options.overlay(&normalized);
        Ok(())
    }

    /// Extract the configured game archive into the working directory.
    pub fn extract_main_archive(&self) -> Result<()> {
        let archive = self
            .archive_path
            .as_ref()
            .ok_or_else(|| anyhow!("the `{ARCHIVE_KEY}` option is not set"))?;
        let name = archive.to_string_lossy();
        let backend = Backend::for_file(&name)
            .ok_or_else(|| anyhow!("no archiver available for `{}`", archive.display()))?;

        if let Some(title) = self.gui_title() {
            info!("Extracting {title}, please wait...");
        } else {
            debug!("Extracting `{}`", archive.display());
        }
        backend.extract(archive, self.work_dir_path()?)
    }

    /// Extract the pre-built whdload base image, given as an already
    /// resolved path, into the working directory.
    pub fn extract_base_image(&self) -> Result<()> {
        let base = self
            .all_options
            .get(WHDLOAD_BASE_KEY)
            .ok_or_else(|| anyhow!("the `{WHDLOAD_BASE_KEY}` option is not set"))?;
        let backend = Backend::for_file(base)
            .ok_or_else(|| anyhow!("no archiver available for `{base}`"))?;
        backend.extract(Path::new(base), self.work_dir_path()?)
    }

    /// Copy the original config into the working directory under the
    /// canonical name, replacing any same-named file from the archive.
    pub fn copy_config(&self) -> Result<()> {
        let dest = self.work_dir_path()?.join(CANONICAL_CONFIG);
        fs::copy(&self.conf_file, &dest).with_context(|| {
            format!(
                "Failed to copy `{}` into the working directory",
                self.conf_file.display()
            )
        })?;
        Ok(())
    }

    /// Merge a previous save archive into the staged tree. A missing
    /// archive means first run and is not an error.
    pub fn load_save(&self) -> Result<()> {
        if !self.all_options.is_enabled(SAVE_STATE_KEY) {
            return Ok(());
        }
        let save = match &self.save_archive {
            Some(path) if path.exists() => path,
            _ => {
                debug!("No save archive to restore");
                return Ok(());
            }
        };
        self.save_backend()?.extract(save, self.work_dir_path()?)
    }

    /// Run the emulator from inside the working directory. The emulator's
    /// own exit status is logged and swallowed so a crashing guest still
    /// gets its save state persisted.
    pub fn run_emulator(&mut self) -> Result<()> {
        match paths::kickstart_overrides(&self.conf_file) {
            Ok(kick) => self.emulator_options.overlay(&kick),
            Err(err) => warn!("Skipping kickstart overrides: {err}"),
        }

        info!("Running the emulator");
        let work = self.work_dir_path()?;
        let result = which::which(EMULATOR_BIN)
            .map_err(|_| anyhow!("`{EMULATOR_BIN}` not found on PATH"))
            .and_then(|exe| {
                Command::new(exe)
                    .args(self.emulator_options.to_emulator_args())
                    .current_dir(work)
                    .status()
                    .map_err(anyhow::Error::from)
            });
        match result {
            Ok(status) if status.success() => {}
            Ok(status) => warn!("Emulator exited with {status}"),
            Err(err) => warn!("Emulator failed to start: {err}"),
        }
        Ok(())
    }

    /// Pack the save-state directory the emulator left behind into the
    /// save archive, replacing any previous one. Failure propagates; silent
    /// loss of progress is the one outcome this tool must not allow.
    pub fn save_save(&self) -> Result<()> {
        if !self.all_options.is_enabled(SAVE_STATE_KEY) {
            return Ok(());
        }
        let work = self.work_dir_path()?;
        let rel = match paths::resolve_save_dir(&self.all_options, work) {
            Some(rel) => rel,
            None => {
                debug!("No save state to persist");
                return Ok(());
            }
        };
        let save = self
            .save_archive
            .as_ref()
            .ok_or_else(|| anyhow!("the `{ARCHIVER_KEY}` option is not set"))?;

        if save.exists() {
            fs::remove_file(save).with_context(|| {
                format!("Failed to remove the previous save archive `{}`", save.display())
            })?;
        }
        info!("Saving emulator state to `{}`", save.display());
        self.save_backend()?
            .create(save, work, std::slice::from_ref(&rel))
    }

    /// Repack the whole working directory into the original game archive
    /// when persist-data mode is on.
    pub fn repack_archive(&self) -> Result<()> {
        if !self.all_options.is_enabled(PERSIST_DATA_KEY) {
            return Ok(());
        }
        let archive = self
            .archive_path
            .as_ref()
            .ok_or_else(|| anyhow!("the `{ARCHIVE_KEY}` option is not set"))?;
        let name = archive.to_string_lossy();
        let backend = Backend::for_file(&name)
            .ok_or_else(|| anyhow!("no archiver available for `{}`", archive.display()))?;
        if !backend.can_create() {
            bail!("cannot repack `{}`: the archiver is extract-only", archive.display());
        }

        let work = self.work_dir_path()?;
        let staged_conf = work.join(CANONICAL_CONFIG);
        if staged_conf.exists() {
            fs::remove_file(&staged_conf).context("Failed to remove the staged config")?;
        }
        if archive.exists() {
            fs::remove_file(archive).with_context(|| {
                format!("Failed to remove the previous archive `{}`", archive.display())
            })?;
        }
        info!("Repacking `{}`", archive.display());
        backend.create(archive, work, &[])
    }

    /// Remove the working directory. Runs on every exit path; problems are
    /// logged, never raised.
    pub fn cleanup(&mut self) {
        if let Some(work) = self.work_dir.take() {
            let path = work.path().to_path_buf();
            if let Err(err) = work.close() {
                warn!("Failed to remove working directory `{}`: {err}", path.display());
            }
        }
    }

    pub fn work_dir_path(&self) -> Result<&Path> {
        self.work_dir
            .as_ref()
            .map(TempDir::path)
            .ok_or_else(|| anyhow!("the session has no working directory"))
    }

    fn save_backend(&self) -> Result<Backend> {
        let name = self
            .all_options
            .get(ARCHIVER_KEY)
            .ok_or_else(|| anyhow!("the `{ARCHIVER_KEY}` option is not set"))?;
        let format = Format::from_archiver_name(name)
            .ok_or_else(|| anyhow!("unknown archiver `{name}`"))?;
        Backend::new(format).ok_or_else(|| anyhow!("no executable found for `{name}` archives"))
    }

    /// Long-extraction notice, shown only when `wrapper_gui_msg` asks for
    /// it. Prefers the `title` key, falls back to the archive name.
    fn gui_title(&self) -> Option<String> {
        if !self.all_options.is_enabled(GUI_MSG_KEY) {
            return None;
        }
        self.all_options
            .get("title")
            .filter(|title| !title.is_empty())
            .or_else(|| self.all_options.get(ARCHIVE_KEY))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env;
    use std::env;

    fn opts(pairs: &[(&str, &str)]) -> Options {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn write_conf(dir: &Path) -> PathBuf {
        let conf = dir.join("Game.fs-uae");
        fs::write(&conf, "title = Test Game\n").unwrap();
        conf
    }

    #[cfg(unix)]
    fn fake_emulator() -> (TempDir, std::ffi::OsString) {
        use std::os::unix::fs::PermissionsExt;
        let bin = tempfile::tempdir().unwrap();
        let exe = bin.path().join(EMULATOR_BIN);
        fs::write(&exe, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        let path = env::join_paths([bin.path().to_path_buf()]).unwrap();
        (bin, path)
    }

    #[test]
    fn validation_needs_a_wrapper_option() {
        let dir = tempfile::tempdir().unwrap();
        let conf = write_conf(dir.path());
        let session = Session::new(&conf, Options::new(), Options::new());
        let err = session.validate().unwrap_err();
        assert!(err.to_string().contains("wrapper"));
    }

    #[test]
    fn validation_needs_the_emulator_on_path() {
        let _lock = test_env::LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let empty = tempfile::tempdir().unwrap();
        let path = env::join_paths([empty.path().to_path_buf()]).unwrap();
        let _vars = test_env::Vars::set(&[("PATH", path.as_os_str())]);

        let dir = tempfile::tempdir().unwrap();
        let conf = write_conf(dir.path());
        let session = Session::new(&conf, Options::new(), opts(&[(WRAPPER_KEY, "archive")]));
        let err = session.validate().unwrap_err();
        assert!(err.to_string().contains(EMULATOR_BIN));
    }

    #[cfg(unix)]
    #[test]
    fn validation_checks_the_save_archiver_chain() {
        let _lock = test_env::LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let (_bin, path) = fake_emulator();
        let _vars = test_env::Vars::set(&[("PATH", path.as_os_str())]);

        let dir = tempfile::tempdir().unwrap();
        let conf = write_conf(dir.path());

        let no_archiver = opts(&[(WRAPPER_KEY, "savestate"), (SAVE_STATE_KEY, "1")]);
        let session = Session::new(&conf, Options::new(), no_archiver);
        let err = session.validate().unwrap_err();
        assert!(err.to_string().contains(ARCHIVER_KEY));

        let unknown = opts(&[
            (WRAPPER_KEY, "savestate"),
            (SAVE_STATE_KEY, "1"),
            (ARCHIVER_KEY, "arc"),
        ]);
        let session = Session::new(&conf, Options::new(), unknown);
        let err = session.validate().unwrap_err();
        assert!(err.to_string().contains("unknown archiver"));

        // PATH holds only the fake emulator, so 7z cannot resolve
        let unresolvable = opts(&[
            (WRAPPER_KEY, "savestate"),
            (SAVE_STATE_KEY, "1"),
            (ARCHIVER_KEY, "7z"),
        ]);
        let session = Session::new(&conf, Options::new(), unresolvable);
        let err = session.validate().unwrap_err();
        assert!(err.to_string().contains("no executable"));
    }

    #[test]
    fn save_archive_sits_next_to_the_config() {
        let dir = tempfile::tempdir().unwrap();
        let conf = write_conf(dir.path());
        let session = Session::new(&conf, Options::new(), opts(&[(ARCHIVER_KEY, "tgz")]));
        assert_eq!(
            session.save_archive,
            Some(dir.path().join("Game_save.tar.gz"))
        );
    }

    #[test]
    fn relative_archives_resolve_against_the_config_directory() {
        let dir = tempfile::tempdir().unwrap();
        let conf = write_conf(dir.path());

        let session = Session::new(&conf, Options::new(), opts(&[(ARCHIVE_KEY, "game.7z")]));
        assert_eq!(session.archive_path, Some(dir.path().join("game.7z")));

        let session = Session::new(&conf, Options::new(), opts(&[(ARCHIVE_KEY, "/data/game.7z")]));
        assert_eq!(session.archive_path, Some(PathBuf::from("/data/game.7z")));
    }

    #[test]
    fn staging_copies_the_config_under_the_canonical_name() {
        let dir = tempfile::tempdir().unwrap();
        let conf = write_conf(dir.path());
        let mut session = Session::new(&conf, Options::new(), Options::new());
        session.stage().unwrap();
        session.copy_config().unwrap();

        let work = session.work_dir_path().unwrap().to_path_buf();
        assert!(work.join(CANONICAL_CONFIG).is_file());

        session.cleanup();
        assert!(!work.exists());
    }

    #[test]
    fn staging_normalizes_asset_paths_for_the_emulator() {
        let dir = tempfile::tempdir().unwrap();
        let conf = write_conf(dir.path());
        let all = opts(&[("floppy_image_0", "$CONFIG/disks/game.adf")]);
        let mut session = Session::new(&conf, Options::new(), all);
        session.stage().unwrap();

        let expected = dir.path().join("disks/game.adf");
        let expected = expected.to_string_lossy();
        assert_eq!(
            session.emulator_options.get("floppy_image_0"),
            Some(expected.as_ref())
        );
        session.cleanup();
    }

    #[test]
    fn missing_save_archive_means_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let conf = write_conf(dir.path());
        let all = opts(&[(SAVE_STATE_KEY, "1"), (ARCHIVER_KEY, "tar")]);
        let mut session = Session::new(&conf, Options::new(), all);
        session.stage().unwrap();
        session.load_save().unwrap();
        session.cleanup();
    }

    #[cfg(unix)]
    #[test]
    fn save_round_trip_replaces_the_previous_archive() {
        // holds the lock so other tests cannot unset PATH mid-probe
        let _lock = test_env::LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let dir = tempfile::tempdir().unwrap();
        let conf = write_conf(dir.path());
        let all = opts(&[
            (SAVE_STATE_KEY, "1"),
            (ARCHIVER_KEY, "tar"),
            ("save_states_dir", "$CONFIG/saves"),
        ]);

        let stale = dir.path().join("Game_save.tar");
        fs::write(&stale, b"stale").unwrap();

        let mut session = Session::new(&conf, Options::new(), all.clone());
        session.stage().unwrap();
        let work = session.work_dir_path().unwrap();
        fs::create_dir(work.join("saves")).unwrap();
        fs::write(work.join("saves/state.dat"), b"progress").unwrap();
        session.save_save().unwrap();
        session.cleanup();
        assert_ne!(fs::read(&stale).unwrap(), b"stale");

        let mut session = Session::new(&conf, Options::new(), all);
        session.stage().unwrap();
        session.load_save().unwrap();
        let work = session.work_dir_path().unwrap().to_path_buf();
        assert!(work.join("saves/state.dat").is_file());
        session.cleanup();
    }

    #[test]
    fn gui_title_prefers_the_title_key() {
        let dir = tempfile::tempdir().unwrap();
        let conf = write_conf(dir.path());

        let all = opts(&[
            (GUI_MSG_KEY, "1"),
            ("title", "Turrican II"),
            (ARCHIVE_KEY, "t2.7z"),
        ]);
        let session = Session::new(&conf, Options::new(), all);
        assert_eq!(session.gui_title().as_deref(), Some("Turrican II"));

        let all = opts(&[(GUI_MSG_KEY, "1"), (ARCHIVE_KEY, "t2.7z")]);
        let session = Session::new(&conf, Options::new(), all);
        assert_eq!(session.gui_title().as_deref(), Some("t2.7z"));

        let all = opts(&[("title", "Turrican II")]);
        let session = Session::new(&conf, Options::new(), all);
        assert_eq!(session.gui_title(), None);
    }
}
