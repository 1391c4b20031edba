use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser};
use ember_runtime::{Runtime, RuntimeConfig};

mod attr;
mod decode;
mod pipeline;
mod report;

#[derive(Parser, Debug)]
#[command(name = "ember")]
#[command(about = "Ember runtime developer utilities.", long_about = None)]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Print the profile counters to stderr on exit.
    #[arg(long, global = true)]
    pub profile: bool,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Decode the leading scalar of a JSON, MessagePack or CBOR buffer.
    Decode(decode::DecodeArgs),
    /// Run a producer/consumer workload over one bounded channel.
    Pipeline(pipeline::PipelineArgs),
    /// Build an object layout and look up one attribute by name.
    Attr(attr::AttrArgs),
}

fn main() -> ExitCode {
    match try_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(2)
        }
    }
}

fn try_main() -> Result<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Command::Decode(args) => decode::cmd_decode(&cli.global, args),
        Command::Pipeline(args) => pipeline::cmd_pipeline(&cli.global, args),
        Command::Attr(args) => attr::cmd_attr(&cli.global, args),
    }
}

/// Builds a private runtime for one command. Environment settings apply
/// first; command-line flags override them.
pub fn start_runtime(global: &GlobalArgs, workers: Option<usize>) -> Result<Runtime> {
    let mut config = RuntimeConfig::from_env();
    config.profile |= global.profile;
    if let Some(w) = workers {
        config.workers = w.max(1);
    }
    ember_runtime::diag::init(config.debug);
    Runtime::new(config).context("start runtime")
}
