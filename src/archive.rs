//! External archiver selection and invocation.
//!
//! Archives are never parsed in-process; every format maps to an external
//! tool invoked as a subprocess, selected by file extension and probed on
//! `PATH` before use. Extraction and creation both run with an explicit
//! working directory, so the wrapper process never changes its own.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

/// Archive formats with a known external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    Lha,
    Zip,
    SevenZ,
    Lzx,
    Rar,
}

/// Extension table, longest suffixes first so `game.tar.gz` never selects
/// the plain tar entry.
const EXTENSIONS: &[(&str, Format)] = &[
    (".tar.bz2", Format::TarBz2),
    (".tar.gz", Format::TarGz),
    (".tar.xz", Format::TarXz),
    (".tgz", Format::TarGz),
    (".tar", Format::Tar),
    (".lha", Format::Lha),
    (".zip", Format::Zip),
    (".7z", Format::SevenZ),
    (".lzx", Format::Lzx),
    (".rar", Format::Rar),
];

impl Format {
    /// Select a format from a file name by its longest known suffix.
    pub fn from_file_name(name: &str) -> Option<Format> {
        EXTENSIONS
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix))
            .map(|(_, format)| *format)
    }

    /// Select a format from a `wrapper_archiver` name.
    pub fn from_archiver_name(name: &str) -> Option<Format> {
        match name {
            "tar" => Some(Format::Tar),
            "tgz" | "tar.gz" => Some(Format::TarGz),
            "tar.bz2" => Some(Format::TarBz2),
            "tar.xz" => Some(Format::TarXz),
            "lha" => Some(Format::Lha),
            "zip" => Some(Format::Zip),
            "7z" => Some(Format::SevenZ),
            "lzx" => Some(Format::Lzx),
            "rar" => Some(Format::Rar),
            _ => None,
        }
    }

    /// Native file extension, used for save-state archive names.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Tar => ".tar",
            Format::TarGz => ".tar.gz",
            Format::TarBz2 => ".tar.bz2",
            Format::TarXz => ".tar.xz",
            Format::Lha => ".lha",
            Format::Zip => ".zip",
            Format::SevenZ => ".7z",
            Format::Lzx => ".lzx",
            Format::Rar => ".rar",
        }
    }

    /// Candidate executables, probed in order.
    fn tools(&self) -> &'static [&'static str] {
        match self {
            Format::Tar | Format::TarGz | Format::TarBz2 | Format::TarXz => &["tar"],
            Format::Lha => &["lha"],
            Format::Zip | Format::SevenZ => &["7z"],
            Format::Lzx => &["unlzx"],
            Format::Rar => &["rar", "unrar"],
        }
    }

    fn create_args(&self) -> &'static [&'static str] {
        match self {
            Format::Tar => &["cf"],
            Format::TarGz => &["zcf"],
            Format::TarBz2 => &["jcf"],
            Format::TarXz => &["Jcf"],
            Format::Lha => &["a"],
            Format::Zip => &["a", "-tzip"],
            Format::SevenZ => &["a"],
            Format::Lzx => &[],
            Format::Rar => &["a"],
        }
    }

    fn extract_args(&self) -> &'static [&'static str] {
        match self {
            Format::Tar | Format::TarGz | Format::TarBz2 | Format::TarXz => &["xf"],
            Format::Lha => &["x"],
            Format::Zip | Format::SevenZ => &["x"],
            Format::Lzx => &["-x"],
            Format::Rar => &["x"],
        }
    }
}

/// An archive format paired with its resolved executable.
#[derive(Debug, Clone)]
pub struct Backend {
    format: Format,
    tool: PathBuf,
}

impl Backend {
    /// Probe `PATH` for the format's tool.
    pub fn new(format: Format) -> Option<Backend> {
        Backend::new_in(format, None)
    }

    fn new_in(format: Format, search_path: Option<&OsStr>) -> Option<Backend> {
        let tool = format.tools().iter().find_map(|name| match search_path {
            Some(paths) => which::which_in(name, Some(paths), Path::new("/")).ok(),
            None => which::which(name).ok(),
        })?;
        Some(Backend { format, tool })
    }

    /// Select and probe a backend for an archive file name.
    pub fn for_file(name: &str) -> Option<Backend> {
        Backend::new(Format::from_file_name(name)?)
    }

    fn tool_stem(&self) -> String {
        self.tool
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Whether this backend can create archives. LZX has no free encoder,
    /// and rar extraction-only installs ship `unrar` without `rar`.
    pub fn can_create(&self) -> bool {
        match self.format {
            Format::Lzx => false,
            Format::Rar => self.tool_stem() != "unrar",
            _ => true,
        }
    }

    /// Create `archive` from `entries` inside `dir` (the whole directory
    /// when `entries` is empty).
    pub fn create(&self, archive: &Path, dir: &Path, entries: &[String]) -> Result<()> {
        if !self.can_create() {
            bail!(
                "`{}` can only extract {} archives, not create them",
                self.tool_stem(),
                self.format.extension()
            );
        }

        let mut cmd = Command::new(&self.tool);
        cmd.args(self.format.create_args());
        cmd.arg(archive);
        if entries.is_empty() {
            if self.format == Format::Rar {
                // rar refuses `.`; hand it the directory contents instead
                for name in sorted_entries(dir)? {
                    cmd.arg(name);
                }
            } else {
                cmd.arg(".");
            }
        } else {
            cmd.args(entries);
        }
        cmd.current_dir(dir);

        let status = cmd
            .status()
            .with_context(|| format!("Failed to run `{}`", self.tool.display()))?;
        if !status.success() {
            bail!(
                "`{}` could not create `{}` ({status})",
                self.tool_stem(),
                archive.display()
            );
        }
        Ok(())
    }

    /// Extract `archive` into `dir`.
    pub fn extract(&self, archive: &Path, dir: &Path) -> Result<()> {
        if !archive.exists() {
            bail!("archive `{}` does not exist", archive.display());
        }

        let status = Command::new(&self.tool)
            .args(self.format.extract_args())
            .arg(archive)
            .current_dir(dir)
            .status()
            .with_context(|| format!("Failed to run `{}`", self.tool.display()))?;
        if !status.success() {
            bail!(
                "`{}` could not extract `{}` ({status})",
                self.tool_stem(),
                archive.display()
            );
        }
        Ok(())
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("Failed to list directory `{}`", dir.display()))?
    {
        let entry = entry?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}
