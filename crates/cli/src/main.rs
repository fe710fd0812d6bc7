mod cmd;
mod command;
mod output;

use std::process::ExitCode;

use clap::{Arg, ArgAction};
use tracing_subscriber::EnvFilter;

use command::{CommandRegistry, Exit};
use output::print_error;

fn root_command() -> clap::Command {
  clap::Command::new("sprout")
    .about("Build and run Lua-described software from a content-addressed store")
    .version(env!("CARGO_PKG_VERSION"))
    .subcommand_required(true)
    .arg_required_else_help(true)
    .arg(
      Arg::new("verbose")
        .short('v')
        .long("verbose")
        .help("Increase log output (-v for info, -vv for debug)")
        .action(ArgAction::Count)
        .global(true),
    )
}

/// `RUST_LOG` wins over `-v`.
fn init_tracing(verbosity: u8) {
  let level = match verbosity {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> ExitCode {
  let registry = match CommandRegistry::builtin() {
    Ok(registry) => registry,
    Err(err) => {
      print_error(&err.to_string());
      return ExitCode::FAILURE;
    }
  };

  let matches = registry.augment(root_command()).get_matches();
  init_tracing(matches.get_count("verbose"));

  let Some((name, sub_matches)) = matches.subcommand() else {
    return ExitCode::FAILURE;
  };
  let Some(spec) = registry.lookup(name) else {
    print_error(&format!("unknown command '{name}'"));
    return ExitCode::FAILURE;
  };

  let mut command = match (spec.factory)(sub_matches) {
    Ok(command) => command,
    Err(err) => err.exit(),
  };

  let result = command.run();
  // Release the evaluator and the store before exiting.
  drop(command);

  match result {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => match err.downcast_ref::<Exit>() {
      Some(Exit(code)) => ExitCode::from(*code),
      None => {
        print_error(&format!("{err:#}"));
        ExitCode::FAILURE
      }
    },
  }
}
