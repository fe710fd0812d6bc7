//! path-info, show-derivation and ls-store integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn path_info_of_built_output() {
  let env = TestEnv::with_packages();
  let out = TestEnv::stdout_of(&mut env.with_file(&["build", "hello"]));

  env
    .with_file(&["path-info", "hello"])
    .assert()
    .success()
    .stdout(format!("{out}\n"));
}

#[test]
fn path_info_does_not_build() {
  let env = TestEnv::with_packages();

  env
    .with_file(&["path-info", "hello"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("building is disabled"));
}

#[test]
fn path_info_hash() {
  let env = TestEnv::with_packages();
  TestEnv::stdout_of(&mut env.with_file(&["build", "hello"]));

  env
    .with_file(&["path-info", "--hash", "hello"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\tsha256:"));
}

#[test]
fn path_info_all_and_recursive() {
  let env = TestEnv::with_packages();
  let out = TestEnv::stdout_of(&mut env.with_file(&["build", "hello"]));

  let all = TestEnv::stdout_of(env.sprout_cmd().args(["path-info", "--all"]));
  assert!(all.lines().any(|line| line == out));
  assert!(all.lines().any(|line| line.ends_with("-hello.drv")));

  env
    .sprout_cmd()
    .args(["path-info", "--all", "hello"])
    .assert()
    .failure();
}

#[test]
fn path_info_json() {
  let env = TestEnv::with_packages();
  let out = TestEnv::stdout_of(&mut env.with_file(&["build", "hello"]));

  let json = TestEnv::stdout_of(&mut env.with_file(&["path-info", "--json", "hello"]));
  let infos: serde_json::Value = serde_json::from_str(&json).unwrap();

  assert_eq!(infos.as_array().unwrap().len(), 1);
  assert!(json.contains(&out));
}

#[test]
fn show_derivation_prints_builder() {
  let env = TestEnv::with_packages();

  let out = TestEnv::stdout_of(&mut env.with_file(&["show-derivation", "hello"]));
  let json: serde_json::Value = serde_json::from_str(&out).unwrap();
  let drvs = json.as_object().unwrap();

  assert_eq!(drvs.len(), 1);
  let (drv_path, drv) = drvs.iter().next().unwrap();
  assert!(drv_path.ends_with("-hello.drv"));
  assert_eq!(drv["builder"], "/bin/sh");
}

#[test]
fn ls_store_builds_and_lists() {
  let env = TestEnv::with_packages();

  env
    .with_file(&["ls-store", "hello"])
    .assert()
    .success()
    .stdout(".\n");
}

#[test]
fn ls_store_needs_exactly_one_path() {
  let env = TestEnv::with_packages();

  env
    .with_file(&["ls-store", "both"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("exactly one output path"));
}
