//! sprout-lib: resolving and realising installables.
//!
//! - `store`: the content-addressed store (`Store` trait, `LocalStore`)
//! - `eval`: the Lua evaluator and the values it produces
//! - `flake`: flake references, registries, lock files and fetching
//! - `installable`: what users name on the command line, and its parser
//! - `build`: realising installables into store paths

pub mod build;
pub mod consts;
pub mod eval;
pub mod flake;
pub mod installable;
pub mod platform;
pub mod store;
pub mod util;
