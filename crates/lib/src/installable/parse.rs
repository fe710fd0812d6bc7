//! Turning command-line strings into [`Installable`]s.
//!
//! Each string is tried, in order, as:
//!
//! 1. a path inside the store (`/…/store/<hash>-name/bin/x`),
//! 2. a parenthesised expression `( … )`,
//! 3. a flake reference, optionally followed by `#fragment`,
//! 4. an attribute path into the `--file` expression or the default expression.
//!
//! Fragments and attribute paths are resolved against a list of candidates
//! built from the default attribute paths and prefixes in
//! [`SourceExprOptions`]; the first candidate that exists wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use super::{Installable, InstallableError};
use crate::eval::{EvalError, Evaluator, ExprSource, Value};
use crate::flake::{FlakeRef, LockFileMode, looks_like_flake_ref};
use crate::store::{Store, StorePath};

/// Hands out the evaluator on first use.
///
/// Store-path installables never ask for one, so commands given only store
/// paths never start an interpreter.
pub trait EvaluatorProvider {
  fn evaluator(&mut self) -> Result<Rc<dyn Evaluator>, EvalError>;
}

impl EvaluatorProvider for Rc<dyn Evaluator> {
  fn evaluator(&mut self) -> Result<Rc<dyn Evaluator>, EvalError> {
    Ok(self.clone())
  }
}

#[derive(Debug, Clone)]
pub struct SourceExprOptions {
  pub file: Option<PathBuf>,
  pub lock_file_mode: LockFileMode,
  /// Full attribute paths tried for an empty fragment, and as `D.A` fallbacks.
  pub default_attr_paths: Vec<String>,
  /// Prefixes tried in front of a fragment, each ending in `.`.
  pub prefixes: Vec<String>,
  pub use_default_installables: bool,
}

impl SourceExprOptions {
  /// The search lists used for packages on `system`.
  pub fn packages(system: &str) -> Self {
    Self {
      file: None,
      lock_file_mode: LockFileMode::UpdateLockFile,
      default_attr_paths: vec![format!("defaultPackage.{system}")],
      prefixes: vec![format!("packages.{system}."), format!("legacyPackages.{system}.")],
      use_default_installables: true,
    }
  }

  /// Candidate attribute paths for `fragment`, in lookup order.
  pub fn candidates(&self, fragment: &str) -> Vec<String> {
    if fragment.is_empty() {
      return self.default_attr_paths.clone();
    }
    let mut candidates = vec![fragment.to_string()];
    candidates.extend(self.prefixes.iter().map(|prefix| format!("{prefix}{fragment}")));
    candidates.extend(self.default_attr_paths.iter().map(|d| format!("{d}.{fragment}")));
    candidates
  }
}

pub fn parse_installables(
  store: &dyn Store,
  provider: &mut dyn EvaluatorProvider,
  opts: &SourceExprOptions,
  strings: &[String],
) -> Result<Vec<Installable>, InstallableError> {
  let mut parser = Parser {
    store,
    provider,
    opts,
    expression: None,
    flakes: BTreeMap::new(),
  };

  if strings.is_empty() {
    if !opts.use_default_installables {
      return Ok(Vec::new());
    }
    return parser.default_installable().map(|i| vec![i]);
  }

  strings.iter().map(|s| parser.parse(s)).collect()
}

/// Parse exactly one installable.
pub fn parse_installable(
  store: &dyn Store,
  provider: &mut dyn EvaluatorProvider,
  opts: &SourceExprOptions,
  input: &str,
) -> Result<Installable, InstallableError> {
  let mut installables = parse_installables(store, provider, opts, &[input.to_string()])?;
  match installables.len() {
    1 => Ok(installables.remove(0)),
    count => Err(InstallableError::Ambiguous {
      what: input.to_string(),
      expected: "installable",
      count,
    }),
  }
}

struct Parser<'a> {
  store: &'a dyn Store,
  provider: &'a mut dyn EvaluatorProvider,
  opts: &'a SourceExprOptions,
  /// The `--file` or default expression, loaded on first use.
  expression: Option<Value>,
  flakes: BTreeMap<FlakeRef, Value>,
}

impl Parser<'_> {
  fn parse(&mut self, input: &str) -> Result<Installable, InstallableError> {
    let as_path = Path::new(input);
    if as_path.is_absolute()
      && let Ok(path) = StorePath::containing(self.store.store_dir(), as_path)
    {
      debug!(input, path = %path, "parsed store path installable");
      return Ok(Installable::StorePath { path });
    }

    if input.starts_with('(') && input.ends_with(')') {
      let evaluator = self.evaluator(input)?;
      let value = evaluator
        .eval_expression(input)
        .map_err(InstallableError::eval(input))?;
      return Ok(Installable::Expr {
        text: input.to_string(),
        value,
      });
    }

    if let Some((flake, fragment)) = input.split_once('#') {
      let flake = if flake.is_empty() { "." } else { flake };
      return self.flake(input, flake, fragment);
    }
    if looks_like_flake_ref(input) {
      return self.flake(input, input, "");
    }

    let root = self.expression(input)?;
    let (attr, value) = self.resolve(input, &root, input)?;
    debug!(input, attr, "parsed attribute path installable");
    Ok(Installable::AttrPath {
      attr_path: input.to_string(),
      value,
    })
  }

  fn default_installable(&mut self) -> Result<Installable, InstallableError> {
    if self.opts.file.is_some() {
      let value = self.expression("")?;
      return Ok(Installable::AttrPath {
        attr_path: String::new(),
        value,
      });
    }
    let has_flake = std::env::current_dir()
      .map(|dir| dir.join("flake.lua").is_file())
      .unwrap_or(false);
    if has_flake {
      return self.flake(".", ".", "");
    }
    let value = self.expression("")?;
    Ok(Installable::AttrPath {
      attr_path: String::new(),
      value,
    })
  }

  fn flake(&mut self, input: &str, flake: &str, fragment: &str) -> Result<Installable, InstallableError> {
    let flake_ref = FlakeRef::parse(flake).map_err(|e| InstallableError::eval(input)(e.into()))?;
    let outputs = match self.flakes.get(&flake_ref) {
      Some(outputs) => outputs.clone(),
      None => {
        let evaluator = self.evaluator(input)?;
        let loaded = evaluator
          .load_flake(&flake_ref, self.opts.lock_file_mode)
          .map_err(InstallableError::eval(input))?;
        self.flakes.insert(flake_ref.clone(), loaded.outputs.clone());
        loaded.outputs
      }
    };
    let (attr, value) = self.resolve(input, &outputs, fragment)?;
    debug!(input, flake = %flake_ref, attr, "parsed flake installable");
    Ok(Installable::Flake { flake_ref, attr, value })
  }

  /// The first candidate for `fragment` that exists in `root`.
  fn resolve(&mut self, input: &str, root: &Value, fragment: &str) -> Result<(String, Value), InstallableError> {
    let evaluator = self.evaluator(input)?;
    for candidate in self.opts.candidates(fragment) {
      if let Some(value) = evaluator
        .lookup_attr_path(root, &candidate)
        .map_err(InstallableError::eval(input))?
      {
        return Ok((candidate, value));
      }
    }
    Err(InstallableError::Unresolved {
      what: input.to_string(),
    })
  }

  fn expression(&mut self, input: &str) -> Result<Value, InstallableError> {
    if let Some(value) = &self.expression {
      return Ok(value.clone());
    }
    let source = match &self.opts.file {
      Some(file) => ExprSource::File(file.clone()),
      None => ExprSource::Default,
    };
    let evaluator = self.evaluator(input)?;
    let value = evaluator
      .load_expression(&source)
      .map_err(InstallableError::eval(input))?;
    self.expression = Some(value.clone());
    Ok(value)
  }

  fn evaluator(&mut self, input: &str) -> Result<Rc<dyn Evaluator>, InstallableError> {
    self.provider.evaluator().map_err(InstallableError::eval(input))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::eval::LuaEvaluator;
  use crate::util::testutil::{temp_store, write_file};
  use serial_test::serial;
  use tempfile::TempDir;

  const SYSTEM: &str = "x86_64-linux";

  /// Counts how often the evaluator was requested.
  struct CountingProvider {
    evaluator: Rc<dyn Evaluator>,
    calls: usize,
  }

  impl EvaluatorProvider for CountingProvider {
    fn evaluator(&mut self) -> Result<Rc<dyn Evaluator>, EvalError> {
      self.calls += 1;
      Ok(self.evaluator.clone())
    }
  }

  struct Fixture {
    temp: TempDir,
    store: Rc<dyn Store>,
    provider: CountingProvider,
  }

  fn fixture() -> Fixture {
    let (temp, store) = temp_store();
    let store: Rc<dyn Store> = Rc::new(store);
    let evaluator = LuaEvaluator::with_system(store.clone(), SYSTEM).unwrap();
    Fixture {
      temp,
      store,
      provider: CountingProvider {
        evaluator: Rc::new(evaluator),
        calls: 0,
      },
    }
  }

  const PACKAGES: &str = r#"
    local function pkg(name)
      return sprout.derivation { name = name, builder = "/bin/sh", args = { "-c", "true" } }
    end
    return {
      hello = pkg("hello-top"),
      packages = { ["x86_64-linux"] = { hello = pkg("hello-pkgs"), tool = pkg("tool") } },
      legacyPackages = { ["x86_64-linux"] = { tool = pkg("tool-legacy"), old = pkg("old") } },
      defaultPackage = { ["x86_64-linux"] = pkg("default") },
      broken = function() error("boom") end,
    }
  "#;

  fn with_file(fixture: &Fixture) -> SourceExprOptions {
    write_file(fixture.temp.path(), "pkgs.lua", PACKAGES);
    SourceExprOptions {
      file: Some(fixture.temp.path().join("pkgs.lua")),
      ..SourceExprOptions::packages(SYSTEM)
    }
  }

  fn drv_name(installable: &Installable) -> String {
    match installable {
      Installable::StorePath { .. } => panic!("expected a value"),
      Installable::AttrPath { value, .. } | Installable::Flake { value, .. } | Installable::Expr { value, .. } => {
        value.as_derivation().unwrap().unwrap().name
      }
    }
  }

  fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
  }

  mod store_paths {
    use super::*;

    #[test]
    fn store_paths_skip_the_evaluator() {
      let mut f = fixture();
      let opts = SourceExprOptions::packages(SYSTEM);
      let path = format!("{}/{}-hello/bin/hello", f.store.store_dir().display(), "a".repeat(32));

      let installables = parse_installables(f.store.as_ref(), &mut f.provider, &opts, &strings(&[&path])).unwrap();

      assert_eq!(f.provider.calls, 0);
      match &installables[..] {
        [Installable::StorePath { path }] => assert_eq!(path.name(), "hello"),
        other => panic!("unexpected {other:?}"),
      }
    }

    #[test]
    fn foreign_absolute_paths_are_flakes() {
      let mut f = fixture();
      let opts = SourceExprOptions::packages(SYSTEM);
      let missing = f.temp.path().join("nowhere");
      let err = parse_installable(
        f.store.as_ref(),
        &mut f.provider,
        &opts,
        &missing.display().to_string(),
      )
      .unwrap_err();
      assert!(matches!(err, InstallableError::Eval { .. }));
    }
  }

  mod attr_paths {
    use super::*;

    #[test]
    fn candidates_are_ordered() {
      let opts = SourceExprOptions::packages(SYSTEM);
      assert_eq!(
        opts.candidates("hello"),
        vec![
          "hello",
          "packages.x86_64-linux.hello",
          "legacyPackages.x86_64-linux.hello",
          "defaultPackage.x86_64-linux.hello",
        ]
      );
      assert_eq!(opts.candidates(""), vec!["defaultPackage.x86_64-linux"]);
    }

    #[test]
    fn first_matching_candidate_wins() {
      let mut f = fixture();
      let opts = with_file(&f);
      let installables = parse_installables(
        f.store.as_ref(),
        &mut f.provider,
        &opts,
        &strings(&["hello", "tool", "old"]),
      )
      .unwrap();
      let names: Vec<String> = installables.iter().map(drv_name).collect();
      assert_eq!(names, vec!["hello-top", "tool", "old"]);
    }

    #[test]
    fn what_is_the_text_as_written() {
      let mut f = fixture();
      let opts = with_file(&f);
      let installable = parse_installable(f.store.as_ref(), &mut f.provider, &opts, "tool").unwrap();
      assert_eq!(installable.what(), "tool");
    }

    #[test]
    fn unresolved_reports_input_verbatim() {
      let mut f = fixture();
      let opts = with_file(&f);
      let err = parse_installable(f.store.as_ref(), &mut f.provider, &opts, "nope.nothing").unwrap_err();
      assert!(matches!(err, InstallableError::Unresolved { ref what } if what == "nope.nothing"));
    }

    #[test]
    fn evaluation_errors_abort() {
      let mut f = fixture();
      let opts = with_file(&f);
      let err = parse_installable(f.store.as_ref(), &mut f.provider, &opts, "broken").unwrap_err();
      assert!(matches!(err, InstallableError::Eval { ref what, .. } if what == "broken"));
      assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn parsing_is_repeatable() {
      let mut f = fixture();
      let opts = with_file(&f);
      let first = parse_installable(f.store.as_ref(), &mut f.provider, &opts, "tool").unwrap();
      let second = parse_installable(f.store.as_ref(), &mut f.provider, &opts, "tool").unwrap();
      assert_eq!(first.what(), second.what());
      assert_eq!(drv_name(&first), drv_name(&second));
    }
  }

  mod expressions {
    use super::*;

    #[test]
    fn parenthesised_text_is_an_expression() {
      let mut f = fixture();
      let opts = SourceExprOptions::packages(SYSTEM);
      let installable = parse_installable(
        f.store.as_ref(),
        &mut f.provider,
        &opts,
        r#"(sprout.derivation { name = "inline", builder = "/bin/sh" })"#,
      )
      .unwrap();
      assert!(matches!(installable, Installable::Expr { .. }));
      assert_eq!(drv_name(&installable), "inline");
    }
  }

  mod defaults {
    use super::*;

    #[test]
    fn empty_input_uses_the_whole_file() {
      let mut f = fixture();
      let opts = with_file(&f);
      let installables = parse_installables(f.store.as_ref(), &mut f.provider, &opts, &[]).unwrap();
      assert_eq!(installables.len(), 1);
      match &installables[0] {
        Installable::AttrPath { attr_path, value } => {
          assert_eq!(attr_path, "");
          assert!(value.get_attr("packages").unwrap().is_some());
        }
        other => panic!("unexpected {other:?}"),
      }
    }

    #[test]
    fn empty_input_without_defaults_is_empty() {
      let mut f = fixture();
      let opts = SourceExprOptions {
        use_default_installables: false,
        ..with_file(&f)
      };
      let installables = parse_installables(f.store.as_ref(), &mut f.provider, &opts, &[]).unwrap();
      assert!(installables.is_empty());
      assert_eq!(f.provider.calls, 0);
    }

    #[test]
    #[serial]
    #[cfg(unix)]
    fn empty_input_falls_back_to_default_expression() {
      let mut f = fixture();
      let config = f.temp.path().join("config");
      write_file(&config, "sprout/default.lua", "return { answer = 42 }");
      let opts = SourceExprOptions::packages(SYSTEM);

      let installables = temp_env::with_var("XDG_CONFIG_HOME", Some(&config), || {
        parse_installables(f.store.as_ref(), &mut f.provider, &opts, &[]).unwrap()
      });

      assert_eq!(installables.len(), 1);
      match &installables[0] {
        Installable::AttrPath { value, .. } => assert_eq!(value.get_attr("answer").unwrap(), Some(Value::Int(42))),
        other => panic!("unexpected {other:?}"),
      }
    }
  }

  mod flakes {
    use super::*;

    fn write_flake(dir: &Path) {
      write_file(
        dir,
        "flake.lua",
        &format!("return {{ description = \"test\", outputs = function(inputs) {} end }}", PACKAGES),
      );
    }

    fn flake_opts() -> SourceExprOptions {
      SourceExprOptions {
        lock_file_mode: LockFileMode::UseUpdatedLockFile,
        ..SourceExprOptions::packages(SYSTEM)
      }
    }

    #[test]
    fn fragment_is_resolved_against_outputs() {
      let mut f = fixture();
      let dir = dunce::canonicalize(f.temp.path()).unwrap().join("proj");
      write_flake(&dir);
      let input = format!("path:{}#tool", dir.display());

      let installable = parse_installable(f.store.as_ref(), &mut f.provider, &flake_opts(), &input).unwrap();

      assert_eq!(drv_name(&installable), "tool");
      assert_eq!(
        installable.what(),
        format!("path:{}#packages.x86_64-linux.tool", dir.display())
      );
    }

    #[test]
    fn empty_fragment_uses_default_package() {
      let mut f = fixture();
      let dir = dunce::canonicalize(f.temp.path()).unwrap().join("proj");
      write_flake(&dir);

      let installable =
        parse_installable(f.store.as_ref(), &mut f.provider, &flake_opts(), &dir.display().to_string()).unwrap();
      assert_eq!(drv_name(&installable), "default");
    }

    #[test]
    fn missing_fragment_is_unresolved() {
      let mut f = fixture();
      let dir = dunce::canonicalize(f.temp.path()).unwrap().join("proj");
      write_flake(&dir);
      let input = format!("{}#missing", dir.display());

      let err = parse_installable(f.store.as_ref(), &mut f.provider, &flake_opts(), &input).unwrap_err();
      assert!(matches!(err, InstallableError::Unresolved { ref what } if *what == input));
    }
  }
}
