use crate::consts::{APP_NAME, GLOBAL_REGISTRY_ENV, STORE_ENV};
use std::path::PathBuf;

/// Returns the user's home directory
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  std::env::var("USERPROFILE")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("C:\\"))
}

/// Returns the user's home directory
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("/"))
}

/// Returns the directory for configuration files for the application
#[cfg(windows)]
pub fn config_dir() -> PathBuf {
  std::env::var("APPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join("AppData").join("Roaming"))
    .join(APP_NAME)
}

/// Returns the directory for configuration files for the application
#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
  let config_home = std::env::var("XDG_CONFIG_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".config"));
  config_home.join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(windows)]
pub fn data_dir() -> PathBuf {
  std::env::var("LOCALAPPDATA")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join("AppData").join("Local"))
    .join(APP_NAME)
}

/// Returns the directory for data files for the application
#[cfg(not(windows))]
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for cache files for the application
#[cfg(windows)]
pub fn cache_dir() -> PathBuf {
  data_dir().join("Cache")
}

/// Returns the directory for cache files for the application
#[cfg(not(windows))]
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Root of the local store: holds the `store/` and `db/` directories.
///
/// `SPROUT_STORE` takes precedence over the data directory.
pub fn store_root() -> PathBuf {
  if let Ok(path) = std::env::var(STORE_ENV) {
    return PathBuf::from(path);
  }
  data_dir()
}

/// Path of the user flake registry.
pub fn user_registry_path() -> PathBuf {
  config_dir().join(crate::consts::REGISTRY_FILENAME)
}

/// Path of the global flake registry, if one is configured.
pub fn global_registry_path() -> Option<PathBuf> {
  std::env::var(GLOBAL_REGISTRY_ENV).ok().map(PathBuf::from)
}

#[cfg(test)]
#[cfg(not(windows))]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn xdg_config_home_takes_precedence() {
    temp_env::with_vars(
      [
        ("XDG_CONFIG_HOME", Some("/custom/config")),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(config_dir(), PathBuf::from("/custom/config").join(APP_NAME));
        assert_eq!(
          user_registry_path(),
          PathBuf::from("/custom/config/sprout/registry.json")
        );
      },
    );
  }

  #[test]
  #[serial]
  fn xdg_fallback_to_home_directories() {
    temp_env::with_vars(
      [
        ("XDG_CONFIG_HOME", None::<&str>),
        ("XDG_DATA_HOME", None::<&str>),
        ("XDG_CACHE_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(config_dir(), PathBuf::from("/home/user/.config").join(APP_NAME));
        assert_eq!(data_dir(), PathBuf::from("/home/user/.local/share").join(APP_NAME));
        assert_eq!(cache_dir(), PathBuf::from("/home/user/.cache").join(APP_NAME));
      },
    );
  }

  #[test]
  #[serial]
  fn store_env_overrides_data_dir() {
    temp_env::with_vars(
      [(STORE_ENV, Some("/custom/store")), ("HOME", Some("/home/user"))],
      || {
        assert_eq!(store_root(), PathBuf::from("/custom/store"));
      },
    );
    temp_env::with_vars(
      [
        (STORE_ENV, None::<&str>),
        ("XDG_DATA_HOME", None::<&str>),
        ("HOME", Some("/home/user")),
      ],
      || {
        assert_eq!(store_root(), PathBuf::from("/home/user/.local/share/sprout"));
      },
    );
  }

  #[test]
  #[serial]
  fn global_registry_only_when_configured() {
    temp_env::with_var(GLOBAL_REGISTRY_ENV, None::<&str>, || {
      assert_eq!(global_registry_path(), None);
    });
    temp_env::with_var(GLOBAL_REGISTRY_ENV, Some("/etc/sprout/registry.json"), || {
      assert_eq!(
        global_registry_path(),
        Some(PathBuf::from("/etc/sprout/registry.json"))
      );
    });
  }
}
