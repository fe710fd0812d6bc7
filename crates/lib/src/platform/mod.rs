//! The host system and well-known directories.

pub mod paths;

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("'{0}' is not a system of the form <arch>-<os>")]
pub struct InvalidSystem(String);

/// An `<arch>-<os>` pair such as `aarch64-darwin`.
///
/// Flake outputs are grouped by this string and every derivation records the
/// system it is built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct System {
  pub arch: String,
  pub os: String,
}

impl System {
  /// The machine sprout runs on. macOS is named `darwin`.
  pub fn host() -> Self {
    let os = match std::env::consts::OS {
      "macos" => "darwin",
      other => other,
    };
    Self {
      arch: std::env::consts::ARCH.to_string(),
      os: os.to_string(),
    }
  }
}

impl FromStr for System {
  type Err = InvalidSystem;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.split_once('-') {
      Some((arch, os)) if !arch.is_empty() && !os.is_empty() => Ok(Self {
        arch: arch.to_string(),
        os: os.to_string(),
      }),
      _ => Err(InvalidSystem(s.to_string())),
    }
  }
}

impl fmt::Display for System {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.arch, self.os)
  }
}

pub fn current_system() -> String {
  System::host().to_string()
}
