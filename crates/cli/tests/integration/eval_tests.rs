//! Eval command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn eval_prints_strings_raw() {
  let env = TestEnv::with_packages();

  env
    .with_file(&["eval", "greeting"])
    .assert()
    .success()
    .stdout("hi there\n");
}

#[test]
fn eval_json_quotes_strings() {
  let env = TestEnv::with_packages();

  env
    .with_file(&["eval", "--json", "greeting"])
    .assert()
    .success()
    .stdout("\"hi there\"\n");
}

#[test]
fn eval_lists_as_json() {
  let env = TestEnv::with_packages();

  let out = TestEnv::stdout_of(&mut env.with_file(&["eval", "numbers"]));
  let json: serde_json::Value = serde_json::from_str(&out).unwrap();

  assert_eq!(json, serde_json::json!([1, 2, 3]));
}

#[test]
fn eval_expression() {
  let env = TestEnv::empty();

  env
    .sprout_cmd()
    .args(["eval", "(1 + 2)"])
    .assert()
    .success()
    .stdout("3\n");
}

#[test]
fn eval_store_path_fails() {
  let env = TestEnv::with_packages();
  let out = TestEnv::stdout_of(&mut env.with_file(&["build", "hello"]));

  env
    .sprout_cmd()
    .args(["eval", &out])
    .assert()
    .failure()
    .stderr(predicate::str::contains("has no expression to evaluate"));
}

#[test]
fn eval_lua_error_is_reported() {
  let env = TestEnv::empty();
  env.write_file("bad.lua", "return { boom = function() error('kaboom') end }");

  env
    .sprout_cmd()
    .args(["eval", "boom", "-f", "bad.lua"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("error evaluating 'boom'"));
}
