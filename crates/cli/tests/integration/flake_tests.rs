//! Flake installable and `sprout flake` integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn build_flake_default_package() {
  let env = TestEnv::with_flake();

  env
    .sprout_cmd()
    .current_dir(env.flake_dir())
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::ends_with("-flake-hello\n"));
}

#[test]
fn build_flake_fragment() {
  let env = TestEnv::with_flake();

  env
    .sprout_cmd()
    .args(["build", "./flake#hello"])
    .assert()
    .success()
    .stdout(predicate::str::ends_with("-flake-hello\n"));
}

#[test]
fn build_flake_missing_fragment() {
  let env = TestEnv::with_flake();

  env
    .sprout_cmd()
    .args(["build", "./flake#nope"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("cannot find installable"));
}

#[test]
fn run_flake_app() {
  let env = TestEnv::with_flake();

  env
    .sprout_cmd()
    .args(["run", "./flake#greet", "--", "-c", "echo greeted"])
    .assert()
    .success()
    .stdout("greeted\n");
}

#[test]
fn lock_file_is_written_next_to_local_flake() {
  let env = TestEnv::with_flake();

  env.sprout_cmd().args(["build", "./flake"]).assert().success();

  let lock = std::fs::read_to_string(env.flake_dir().join("flake.lock")).unwrap();
  assert!(lock.contains("\"dep\""), "lock file: {lock}");
}

#[test]
fn flake_update_rewrites_lock_file() {
  let env = TestEnv::with_flake();

  env
    .sprout_cmd()
    .args(["flake", "update", "./flake"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Updated"));

  assert!(env.flake_dir().join("flake.lock").exists());
}

#[test]
fn flake_update_rejects_remote_flakes() {
  let env = TestEnv::empty();

  env
    .sprout_cmd()
    .args(["flake", "update", "github:example/project"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("cannot update lock file of flake"));
}

#[test]
fn no_update_lock_file_leaves_directory_alone() {
  let env = TestEnv::with_flake();

  env
    .sprout_cmd()
    .args(["build", "--no-update-lock-file", "./flake"])
    .assert()
    .success();

  assert!(!env.flake_dir().join("flake.lock").exists());
}

#[test]
fn flake_info_shows_description() {
  let env = TestEnv::with_flake();

  env
    .sprout_cmd()
    .args(["flake", "info", "./flake"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Integration test flake"))
    .stdout(predicate::str::contains("sha256:"))
    .stdout(predicate::str::contains("Inputs:"))
    .stdout(predicate::str::contains("dep"));
}

#[test]
fn flake_info_json_lists_outputs() {
  let env = TestEnv::with_flake();

  let out = TestEnv::stdout_of(env.sprout_cmd().args(["flake", "info", "--json", "./flake"]));
  let json: serde_json::Value = serde_json::from_str(&out).unwrap();

  assert_eq!(json["description"], "Integration test flake");
  let outputs: Vec<&str> = json["outputs"]
    .as_array()
    .unwrap()
    .iter()
    .map(|v| v.as_str().unwrap())
    .collect();
  assert_eq!(outputs, ["apps", "checks", "defaultPackage", "packages"]);
}

#[test]
fn flake_check_builds_checks() {
  let env = TestEnv::with_flake();

  env
    .sprout_cmd()
    .args(["flake", "check", "./flake"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Checked"));

  env
    .sprout_cmd()
    .args(["build", "--no-build", "./flake#hello"])
    .assert()
    .success();
}

#[test]
fn flake_check_rejects_malformed_outputs() {
  let env = TestEnv::empty();
  env.write_file(
    "bad/flake.lua",
    "return { outputs = function() return { packages = 'oops' } end }",
  );

  env
    .sprout_cmd()
    .args(["flake", "check", "./bad"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("must be an attribute set"));
}

#[test]
fn flake_init_then_build() {
  let env = TestEnv::empty();

  env
    .sprout_cmd()
    .args(["flake", "init"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Created"));
  assert!(env.path().join("flake.lua").exists());

  env
    .sprout_cmd()
    .args(["flake", "init"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("already exists"));

  env
    .sprout_cmd()
    .arg("build")
    .assert()
    .success()
    .stdout(predicate::str::ends_with("-hello\n"));
}

#[test]
fn flake_clone_copies_source() {
  let env = TestEnv::with_flake();
  let dest = env.path().join("copy");

  env
    .sprout_cmd()
    .args(["flake", "clone", "./flake", "--dest"])
    .arg(&dest)
    .assert()
    .success();

  assert_eq!(
    std::fs::read_to_string(dest.join("flake.lua")).unwrap(),
    std::fs::read_to_string(env.flake_dir().join("flake.lua")).unwrap()
  );
}

#[test]
fn registry_add_list_remove() {
  let env = TestEnv::with_flake();
  let target = format!("path:{}", env.flake_dir().display());

  env
    .sprout_cmd()
    .args(["flake", "add", "mine", &target])
    .assert()
    .success();

  env
    .sprout_cmd()
    .args(["flake", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("flake:mine"));

  env
    .sprout_cmd()
    .args(["build", "mine#hello"])
    .assert()
    .success()
    .stdout(predicate::str::ends_with("-flake-hello\n"));

  env.sprout_cmd().args(["flake", "remove", "mine"]).assert().success();

  env
    .sprout_cmd()
    .args(["flake", "remove", "mine"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("not in the user registry"));
}

#[test]
fn override_flake_wins_over_registries() {
  let env = TestEnv::with_flake();
  let target = format!("path:{}", env.flake_dir().display());

  env
    .sprout_cmd()
    .args(["build", "--override-flake", "other", &target, "other#hello"])
    .assert()
    .success()
    .stdout(predicate::str::ends_with("-flake-hello\n"));
}
