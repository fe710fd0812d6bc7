//! Build command integration tests.

use std::path::Path;

use predicates::prelude::*;

use super::common::{TestEnv, is_store_path};

#[test]
fn build_prints_output_path() {
  let env = TestEnv::with_packages();

  let out = TestEnv::stdout_of(&mut env.with_file(&["build", "hello"]));

  assert!(is_store_path(Path::new(&out), &env.store_dir(), "hello"), "got {out}");
  assert_eq!(std::fs::read_to_string(&out).unwrap(), "hello\n");
}

#[test]
fn build_is_idempotent() {
  let env = TestEnv::with_packages();

  let first = TestEnv::stdout_of(&mut env.with_file(&["build", "hello"]));
  let second = TestEnv::stdout_of(&mut env.with_file(&["build", "hello"]));

  assert_eq!(first, second);
}

#[test]
fn build_several_installables() {
  let env = TestEnv::with_packages();

  let out = TestEnv::stdout_of(&mut env.with_file(&["build", "hello", "goodbye"]));
  let lines: Vec<&str> = out.lines().collect();

  assert_eq!(lines.len(), 2);
  assert!(lines[0].ends_with("-hello"));
  assert!(lines[1].ends_with("-goodbye"));
}

#[test]
fn build_list_value() {
  let env = TestEnv::with_packages();

  let out = TestEnv::stdout_of(&mut env.with_file(&["build", "both"]));

  assert_eq!(out.lines().count(), 2);
}

#[test]
fn build_whole_file_by_default() {
  let env = TestEnv::empty();
  env.write_file(
    "one.lua",
    r#"return sprout.derivation { name = "only", builder = "/bin/sh", args = { "-c", "echo > $out" } }"#,
  );

  env
    .sprout_cmd()
    .args(["build", "-f", "one.lua"])
    .assert()
    .success()
    .stdout(predicate::str::ends_with("-only\n"));
}

#[test]
fn build_from_default_expression_in_working_directory() {
  let env = TestEnv::empty();
  env.write_file("default.lua", &super::common::fixture_content("packages.lua"));

  env
    .sprout_cmd()
    .args(["build", "goodbye"])
    .assert()
    .success()
    .stdout(predicate::str::ends_with("-goodbye\n"));
}

#[test]
fn build_expression() {
  let env = TestEnv::with_packages();

  env
    .sprout_cmd()
    .args([
      "build",
      "(sprout.derivation { name = \"inline\", builder = \"/bin/sh\", args = { \"-c\", \"echo > $out\" } })",
    ])
    .assert()
    .success()
    .stdout(predicate::str::ends_with("-inline\n"));
}

#[test]
fn build_dry_run_builds_nothing() {
  let env = TestEnv::with_packages();

  env
    .with_file(&["build", "--dry-run", "hello"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"));

  env.with_file(&["build", "--no-build", "hello"]).assert().failure();
}

#[test]
fn build_no_build_fails_for_missing_output() {
  let env = TestEnv::with_packages();

  env
    .with_file(&["build", "--no-build", "hello"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("building is disabled"));
}

#[test]
fn build_json_lists_derivation_and_outputs() {
  let env = TestEnv::with_packages();

  let out = TestEnv::stdout_of(&mut env.with_file(&["build", "--json", "hello"]));
  let json: serde_json::Value = serde_json::from_str(&out).unwrap();

  let buildable = &json[0];
  assert!(buildable["drvPath"].as_str().unwrap().ends_with("-hello.drv"));
  assert!(buildable["outputs"]["out"].as_str().unwrap().ends_with("-hello"));
}

#[test]
fn build_failure_names_installable() {
  let env = TestEnv::with_packages();

  env
    .with_file(&["build", "broken"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("build of 'broken' failed"));
}

#[test]
fn build_unknown_attribute_fails() {
  let env = TestEnv::with_packages();

  env
    .with_file(&["build", "nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("cannot find installable 'nope'"));
}

#[test]
fn build_rejects_non_derivations() {
  let env = TestEnv::with_packages();

  env
    .with_file(&["build", "greeting"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("cannot be built"));
}

#[test]
fn build_store_path_that_is_valid() {
  let env = TestEnv::with_packages();
  let out = TestEnv::stdout_of(&mut env.with_file(&["build", "hello"]));

  env
    .sprout_cmd()
    .args(["build", &out])
    .assert()
    .success()
    .stdout(predicate::str::contains(out.as_str()));
}

#[test]
fn store_flag_overrides_environment() {
  let env = TestEnv::with_packages();
  let other = env.path().join("other-store");

  let out = TestEnv::stdout_of(
    env
      .with_file(&["build", "hello"])
      .arg("--store")
      .arg(&other),
  );

  assert!(Path::new(&out).starts_with(other.join("store")), "got {out}");
}
