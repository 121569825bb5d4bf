//! Command-line parsing.
//!
//! The surface is deliberately loose, matching what the emulator itself
//! accepts: `--key=value` or bare `--flag` tokens in any position, plus one
//! positional argument naming the config file. Anything that is neither an
//! option nor an existing file is ignored.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::options::Options;
use crate::strategy::Strategy;
use crate::{CANONICAL_CONFIG, WRAPPER_KEY};

/// Everything extracted from argv.
#[derive(Debug, Default)]
pub struct Invocation {
    pub config_file: Option<PathBuf>,
    pub emulator_options: Options,
    pub wrapper_options: Options,
    pub help: bool,
}

/// Split one token into a key/value pair. `--key=value` and `key=value`
/// both parse; a bare `--flag` means `--flag=1`.
fn parse_option(token: &str) -> Option<(String, String)> {
    if let Some((key, value)) = token.split_once('=') {
        let key = key.trim().trim_start_matches('-');
        if key.is_empty() {
            return None;
        }
        Some((key.to_string(), value.trim().to_string()))
    } else {
        let flag = token.strip_prefix("--")?;
        if flag.is_empty() {
            return None;
        }
        Some((flag.to_string(), "1".to_string()))
    }
}

/// Tokenize argv (without the program name). Options whose key contains
/// the wrapper selector are kept away from the emulator; when no token
/// names an existing file, the canonical config in the current directory
/// is tried as a default.
pub fn parse_args(args: &[String]) -> Invocation {
    let mut invocation = Invocation::default();

    for token in args {
        if let Some((key, value)) = parse_option(token) {
            if key == "help" {
                invocation.help = true;
            } else if key.contains(WRAPPER_KEY) {
                invocation.wrapper_options.insert(key, value);
            } else {
                invocation.emulator_options.insert(key, value);
            }
        } else if Path::new(token).is_file() {
            invocation.config_file = Some(PathBuf::from(token));
        } else {
            debug!("Ignoring argument `{token}`");
        }
    }

    if invocation.config_file.is_none() {
        let default = Path::new(CANONICAL_CONFIG);
        if default.is_file() {
            invocation.config_file = Some(default.to_path_buf());
        }
    }
    invocation
}

pub fn usage(program: &str) -> String {
    let strategies: Vec<&str> = Strategy::all().iter().map(Strategy::as_str).collect();
    format!(
        "Usage: {program} [conf-file] [--option=value...]\n\
         \n\
         Stage and run FS-UAE through a wrapper strategy ({}).\n\
         \n\
         The conf-file argument may be omitted when `{CANONICAL_CONFIG}` exists\n\
         in the current directory. Options are passed as `--key=value` with no\n\
         spaces around `=`; a bare `--flag` means `--flag=1`. Options whose key\n\
         contains `{WRAPPER_KEY}` configure the wrapper itself, everything else\n\
         is handed straight to fs-uae.\n",
        strategies.join(", ")
    )
}
