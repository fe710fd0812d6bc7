//! Crate-wide constants.

/// Application name, used for config/data/cache directory names.
pub const APP_NAME: &str = "sprout";

/// Number of hex characters in the hash part of a store path.
pub const STORE_HASH_LEN: usize = 32;

/// Extension carried by derivation store paths.
pub const DRV_EXTENSION: &str = ".drv";

/// File evaluated to obtain a flake's metadata and outputs.
pub const FLAKE_FILENAME: &str = "flake.lua";

/// Lock file written next to a flake.
pub const FLAKE_LOCK_FILENAME: &str = "flake.lock";

/// Expression loaded when no `--file` is given.
pub const DEFAULT_EXPR_FILENAME: &str = "default.lua";

/// User flake registry file, relative to the config directory.
pub const REGISTRY_FILENAME: &str = "registry.json";

/// Overrides the store root directory.
pub const STORE_ENV: &str = "SPROUT_STORE";

/// Points at the global flake registry file.
pub const GLOBAL_REGISTRY_ENV: &str = "SPROUT_FLAKE_REGISTRY";
