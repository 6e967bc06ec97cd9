use std::process::ExitCode;

use clap::Parser;

use pixelforge::cli::{self, CliArgs};
use pixelforge::logger;

fn main() -> ExitCode {
    let args = CliArgs::parse();
    logger::init_with_default(if args.verbose { "debug" } else { "info" });
    cli::run(args)
}
