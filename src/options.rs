//! Option mappings merged from configuration files and the command line.
//!
//! Both sources share one representation: an ordered string-to-string map.
//! Merging never partially applies a value; a later layer replaces or adds
//! whole keys.

use std::collections::BTreeMap;

/// An ordered set of `key = value` options.
///
/// Iteration order is the key order, which keeps emulator argument lists and
/// log output deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    map: BTreeMap<String, String>,
}

impl Options {
    pub fn new() -> Self {
        Options::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// True when the option is set to the literal flag value `"1"`.
    pub fn is_enabled(&self, key: &str) -> bool {
        self.get(key) == Some("1")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Merge `other` into `self`, `other` winning on key conflicts.
    pub fn overlay(&mut self, other: &Options) {
        for (key, value) in other.iter() {
            self.map.insert(key.to_string(), value.to_string());
        }
    }

    /// Render as `--key=value` tokens for the emulator command line.
    pub fn to_emulator_args(&self) -> Vec<String> {
        self.map
            .iter()
            .map(|(key, value)| format!("--{key}={value}"))
            .collect()
    }
}

impl FromIterator<(String, String)> for Options {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Options {
            map: iter.into_iter().collect(),
        }
    }
}

/// Merge two option mappings into a new one.
///
/// Every key of `configuration` is copied, then every key of `commandline`
/// overwrites or extends the result. Absent inputs behave as empty mappings,
/// so there are no error conditions.
pub fn merge(configuration: &Options, commandline: &Options) -> Options {
    let mut merged = configuration.clone();
    merged.overlay(commandline);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> Options {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn merge_keeps_keys_from_both_sides() {
        let merged = merge(
            &opts(&[("fullscreen", "1"), ("wrapper", "archive")]),
            &opts(&[("floppy_drive_0", "disk.adf")]),
        );
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("fullscreen"), Some("1"));
        assert_eq!(merged.get("wrapper"), Some("archive"));
        assert_eq!(merged.get("floppy_drive_0"), Some("disk.adf"));
    }

    #[test]
    fn merge_prefers_commandline_values() {
        let merged = merge(
            &opts(&[("wrapper_archiver", "tar"), ("title", "Game")]),
            &opts(&[("wrapper_archiver", "7z")]),
        );
        assert_eq!(merged.get("wrapper_archiver"), Some("7z"));
        assert_eq!(merged.get("title"), Some("Game"));
    }

    #[test]
    fn merge_with_empty_sides_behaves_as_identity() {
        let base = opts(&[("wrapper", "plain")]);
        assert_eq!(merge(&base, &Options::new()), base);
        assert_eq!(merge(&Options::new(), &base), base);
    }

    #[test]
    fn emulator_args_render_as_long_options() {
        let options = opts(&[("fullscreen", "1"), ("floppy_drive_0", "x.adf")]);
        assert_eq!(
            options.to_emulator_args(),
            vec!["--floppy_drive_0=x.adf", "--fullscreen=1"]
        );
    }

    #[test]
    fn enabled_means_the_literal_one() {
        let options = opts(&[("wrapper_save_state", "1"), ("wrapper_gui_msg", "yes")]);
        assert!(options.is_enabled("wrapper_save_state"));
        assert!(!options.is_enabled("wrapper_gui_msg"));
        assert!(!options.is_enabled("missing"));
    }
}
