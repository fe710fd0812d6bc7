//! Flake references.
//!
//! | Syntax                                | Meaning                              |
//! |---------------------------------------|--------------------------------------|
//! | `.`, `./dir`, `../dir`, `/abs/dir`    | local directory                      |
//! | `path:<dir>`                          | local directory                      |
//! | `git+<url>[?ref=<ref>&rev=<rev>]`     | git repository                       |
//! | `github:<owner>/<repo>[/<ref-or-rev>]`| `git+https://github.com/<owner>/<repo>.git` |
//! | `flake:<id>[/<ref>]`, `<id>[/<ref>]`  | looked up in the flake registries    |

use std::fmt;
use std::path::{Path, PathBuf};

use super::FlakeError;

const SCHEMES: [&str; 3] = ["path:", "github:", "flake:"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FlakeRef {
  Path {
    path: PathBuf,
  },
  Git {
    url: String,
    git_ref: Option<String>,
    rev: Option<String>,
  },
  Indirect {
    id: String,
    git_ref: Option<String>,
    rev: Option<String>,
  },
}

/// Whether `s` is written as a flake reference rather than an attribute path.
pub fn looks_like_flake_ref(s: &str) -> bool {
  s == "."
    || s == ".."
    || s.starts_with("./")
    || s.starts_with("../")
    || s.starts_with('/')
    || s.starts_with("git+")
    || SCHEMES.iter().any(|scheme| s.starts_with(scheme))
}

fn invalid(input: &str, reason: impl Into<String>) -> FlakeError {
  FlakeError::InvalidRef {
    input: input.to_string(),
    reason: reason.into(),
  }
}

fn is_rev(s: &str) -> bool {
  s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_flake_id(s: &str) -> bool {
  let mut chars = s.chars();
  matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Split `<ref-or-rev>` into a ref or a rev.
fn ref_or_rev(s: Option<&str>) -> (Option<String>, Option<String>) {
  match s {
    Some(s) if is_rev(s) => (None, Some(s.to_string())),
    Some(s) => (Some(s.to_string()), None),
    None => (None, None),
  }
}

impl FlakeRef {
  /// Parse relative to the working directory.
  pub fn parse(input: &str) -> Result<Self, FlakeError> {
    let cwd = std::env::current_dir().map_err(|e| invalid(input, format!("no working directory: {e}")))?;
    Self::parse_relative(input, &cwd)
  }

  /// Parse with relative directories resolved against `base`.
  pub fn parse_relative(input: &str, base: &Path) -> Result<Self, FlakeError> {
    if let Some(path) = input.strip_prefix("path:") {
      if path.is_empty() {
        return Err(invalid(input, "empty path"));
      }
      return Ok(Self::local(base, path));
    }

    if let Some(rest) = input.strip_prefix("git+") {
      return Self::parse_git(input, rest);
    }

    if let Some(rest) = input.strip_prefix("github:") {
      let mut parts = rest.splitn(3, '/');
      let owner = parts.next().filter(|s| !s.is_empty());
      let repo = parts.next().filter(|s| !s.is_empty());
      let (Some(owner), Some(repo)) = (owner, repo) else {
        return Err(invalid(input, "expected github:<owner>/<repo>[/<ref>]"));
      };
      let (git_ref, rev) = ref_or_rev(parts.next());
      return Ok(FlakeRef::Git {
        url: format!("https://github.com/{owner}/{repo}.git"),
        git_ref,
        rev,
      });
    }

    let id_part = match input.strip_prefix("flake:") {
      Some(id_part) => id_part,
      None if looks_like_flake_ref(input) => return Ok(Self::local(base, input)),
      None => input,
    };
    let mut parts = id_part.splitn(2, '/');
    let id = parts.next().unwrap_or_default();
    if !is_flake_id(id) {
      return Err(invalid(input, "not a path, URL or flake identifier"));
    }
    let (git_ref, rev) = ref_or_rev(parts.next().filter(|s| !s.is_empty()));
    Ok(FlakeRef::Indirect {
      id: id.to_string(),
      git_ref,
      rev,
    })
  }

  fn local(base: &Path, path: &str) -> Self {
    let joined = base.join(path);
    let path = dunce::canonicalize(&joined).unwrap_or(joined);
    FlakeRef::Path { path }
  }

  fn parse_git(input: &str, rest: &str) -> Result<Self, FlakeError> {
    let (url, query) = match rest.split_once('?') {
      Some((url, query)) => (url, Some(query)),
      None => (rest, None),
    };
    if !url.contains(':') {
      return Err(invalid(input, "git URL has no scheme"));
    }
    let mut git_ref = None;
    let mut rev = None;
    for param in query.into_iter().flat_map(|q| q.split('&')) {
      match param.split_once('=') {
        Some(("ref", value)) => git_ref = Some(value.to_string()),
        Some(("rev", value)) if is_rev(value) => rev = Some(value.to_string()),
        Some(("rev", value)) => return Err(invalid(input, format!("'{value}' is not a commit hash"))),
        _ => return Err(invalid(input, format!("unsupported parameter '{param}'"))),
      }
    }
    Ok(FlakeRef::Git {
      url: url.to_string(),
      git_ref,
      rev,
    })
  }

  /// Everything except registry identifiers.
  pub fn is_direct(&self) -> bool {
    !matches!(self, FlakeRef::Indirect { .. })
  }

  pub fn path(&self) -> Option<&Path> {
    match self {
      FlakeRef::Path { path } => Some(path),
      _ => None,
    }
  }

  /// Apply a ref or rev written on an indirect reference to what it resolved to.
  pub fn with_overrides(self, git_ref: Option<String>, rev: Option<String>) -> Self {
    match self {
      FlakeRef::Git {
        url,
        git_ref: old_ref,
        rev: old_rev,
      } => FlakeRef::Git {
        url,
        git_ref: git_ref.or(old_ref),
        rev: rev.or(old_rev),
      },
      FlakeRef::Indirect {
        id,
        git_ref: old_ref,
        rev: old_rev,
      } => FlakeRef::Indirect {
        id,
        git_ref: git_ref.or(old_ref),
        rev: rev.or(old_rev),
      },
      path => path,
    }
  }
}

impl fmt::Display for FlakeRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FlakeRef::Path { path } => write!(f, "path:{}", path.display()),
      FlakeRef::Git { url, git_ref, rev } => {
        write!(f, "git+{url}")?;
        let params: Vec<String> = [("ref", git_ref), ("rev", rev)]
          .into_iter()
          .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}={v}")))
          .collect();
        if !params.is_empty() {
          write!(f, "?{}", params.join("&"))?;
        }
        Ok(())
      }
      FlakeRef::Indirect { id, git_ref, rev } => {
        write!(f, "flake:{id}")?;
        if let Some(r) = rev.as_ref().or(git_ref.as_ref()) {
          write!(f, "/{r}")?;
        }
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  const REV: &str = "0123456789abcdef0123456789abcdef01234567";

  fn parse(s: &str) -> FlakeRef {
    FlakeRef::parse_relative(s, Path::new("/work")).unwrap()
  }

  mod syntax {
    use super::*;

    #[test]
    fn local_directories() {
      assert_eq!(parse("/srv/flake"), FlakeRef::Path { path: "/srv/flake".into() });
      assert_eq!(parse("path:/srv/flake"), FlakeRef::Path { path: "/srv/flake".into() });
      assert_eq!(parse("./sub"), FlakeRef::Path { path: "/work/./sub".into() });
    }

    #[test]
    fn existing_directories_are_canonicalized() {
      let temp = TempDir::new().unwrap();
      std::fs::create_dir(temp.path().join("sub")).unwrap();
      let parsed = FlakeRef::parse_relative("./sub/../sub", temp.path()).unwrap();
      assert_eq!(
        parsed,
        FlakeRef::Path {
          path: dunce::canonicalize(temp.path().join("sub")).unwrap()
        }
      );
    }

    #[test]
    fn git_urls_with_parameters() {
      assert_eq!(
        parse(&format!("git+https://example.com/repo.git?ref=main&rev={REV}")),
        FlakeRef::Git {
          url: "https://example.com/repo.git".into(),
          git_ref: Some("main".into()),
          rev: Some(REV.into()),
        }
      );
      assert!(FlakeRef::parse_relative("git+https://x/y?rev=abc", Path::new("/")).is_err());
      assert!(FlakeRef::parse_relative("git+https://x/y?depth=1", Path::new("/")).is_err());
    }

    #[test]
    fn github_shorthand() {
      assert_eq!(
        parse("github:owner/repo/v1"),
        FlakeRef::Git {
          url: "https://github.com/owner/repo.git".into(),
          git_ref: Some("v1".into()),
          rev: None,
        }
      );
      assert_eq!(
        parse(&format!("github:owner/repo/{REV}")),
        FlakeRef::Git {
          url: "https://github.com/owner/repo.git".into(),
          git_ref: None,
          rev: Some(REV.into()),
        }
      );
      assert!(FlakeRef::parse_relative("github:owner", Path::new("/")).is_err());
    }

    #[test]
    fn indirect_ids() {
      let expected = FlakeRef::Indirect {
        id: "tools".into(),
        git_ref: Some("stable".into()),
        rev: None,
      };
      assert_eq!(parse("tools/stable"), expected);
      assert_eq!(parse("flake:tools/stable"), expected);
      assert!(FlakeRef::parse_relative("3tools", Path::new("/")).is_err());
    }
  }

  mod display {
    use super::*;

    #[test]
    fn display_reparses() {
      for input in [
        "path:/srv/flake".to_string(),
        format!("git+https://example.com/r.git?ref=main&rev={REV}"),
        "flake:tools/stable".to_string(),
      ] {
        let parsed = parse(&input);
        assert_eq!(parsed.to_string(), input);
        assert_eq!(parse(&parsed.to_string()), parsed);
      }
    }
  }

  #[test]
  fn flake_ref_detection() {
    for s in [".", "./a", "../a", "/a", "path:a", "git+https://x", "github:a/b", "flake:a"] {
      assert!(looks_like_flake_ref(s), "{s}");
    }
    for s in ["hello", "packages.x86_64-linux.hello", ""] {
      assert!(!looks_like_flake_ref(s), "{s}");
    }
  }

  #[test]
  fn overrides_apply_to_git_refs() {
    let resolved = parse("github:owner/repo").with_overrides(Some("dev".into()), None);
    assert_eq!(
      resolved,
      FlakeRef::Git {
        url: "https://github.com/owner/repo.git".into(),
        git_ref: Some("dev".into()),
        rev: None,
      }
    );
    assert!(resolved.is_direct());
    assert!(!parse("tools").is_direct());
  }
}
