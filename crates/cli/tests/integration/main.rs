//! CLI integration tests, run against the built `sprout` binary.

mod common;

mod build_tests;
mod eval_tests;
mod flake_tests;
mod path_info_tests;
mod run_tests;
