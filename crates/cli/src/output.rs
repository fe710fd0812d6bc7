//! Terminal output for the CLI.
//!
//! Status lines start with a colored marker. Results a script might consume
//! (paths, values, JSON) are printed plainly on stdout; warnings and errors go
//! to stderr.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

#[derive(Clone, Copy)]
enum Status {
  Success,
  Error,
  Warning,
  Info,
}

impl Status {
  fn marker(self) -> &'static str {
    match self {
      Status::Success => "✓",
      Status::Error => "✗",
      Status::Warning => "⚠",
      Status::Info => "•",
    }
  }

  fn stream(self) -> Stream {
    match self {
      Status::Success | Status::Info => Stream::Stdout,
      Status::Error | Status::Warning => Stream::Stderr,
    }
  }

  /// The marker, colored when the target stream supports it.
  fn styled(self) -> String {
    let marker = self.marker();
    let styled = marker.if_supports_color(self.stream(), |s| match self {
      Status::Success => s.green().to_string(),
      Status::Error => s.red().to_string(),
      Status::Warning => s.yellow().to_string(),
      Status::Info => s.blue().to_string(),
    });
    styled.to_string()
  }

  fn print(self, message: &str) {
    match self.stream() {
      Stream::Stderr => eprintln!("{} {message}", self.styled()),
      _ => println!("{} {message}", self.styled()),
    }
  }
}

/// The first 12 characters of a revision or hash.
pub fn truncate_hash(hash: &str) -> &str {
  hash.get(..12).unwrap_or(hash)
}

pub fn format_duration(duration: Duration) -> String {
  let millis = duration.as_millis();
  match millis {
    0..1000 => format!("{millis}ms"),
    1000..60_000 => format!("{:.2}s", duration.as_secs_f64()),
    _ => format!("{}m {}s", duration.as_secs() / 60, duration.as_secs() % 60),
  }
}

pub fn print_success(message: &str) {
  Status::Success.print(message);
}

pub fn print_error(message: &str) {
  Status::Error.print(message);
}

pub fn print_warning(message: &str) {
  Status::Warning.print(message);
}

pub fn print_info(message: &str) {
  Status::Info.print(message);
}

/// An indented `label: value` line.
pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {value}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

/// `name → target`, used for registry entries and locked inputs.
pub fn print_mapping(name: &str, target: &str) {
  println!(
    "  {} {} {target}",
    name.if_supports_color(Stream::Stdout, |s| s.cyan()),
    "→".if_supports_color(Stream::Stdout, |s| s.dimmed()),
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}
