//! Run command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
#[cfg(unix)]
fn run_passes_arguments() {
  let env = TestEnv::with_packages();

  env
    .sprout_cmd()
    .args(["run", "-f"])
    .arg(env.packages_path())
    .args(["shell", "--", "-c", "echo ran"])
    .assert()
    .success()
    .stdout("ran\n");
}

#[test]
#[cfg(unix)]
fn run_propagates_exit_code() {
  let env = TestEnv::with_packages();

  env
    .sprout_cmd()
    .args(["run", "-f"])
    .arg(env.packages_path())
    .args(["shell", "--", "-c", "exit 7"])
    .assert()
    .code(7);
}

#[test]
#[cfg(unix)]
fn run_builds_context_first() {
  let env = TestEnv::with_packages();

  env
    .sprout_cmd()
    .args(["run", "-f"])
    .arg(env.packages_path())
    .args(["tool", "--", "-c", "echo ok"])
    .assert()
    .success()
    .stdout("ok\n");

  env.with_file(&["path-info", "hello"]).assert().success();
}

#[test]
fn run_rejects_derivations() {
  let env = TestEnv::with_packages();

  env
    .with_file(&["run", "hello"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("is not an app"));
}

#[test]
fn run_rejects_programs_outside_the_store() {
  let env = TestEnv::with_packages();

  env
    .with_file(&["run", "outside"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("is not in the store"));
}
