mod cli;

use std::process::ExitCode;

use clap::Parser;

fn main() -> ExitCode {
    // Initialize session log (overwrites previous session log)
    pxtrack::logger::init();

    let args = cli::CliArgs::parse();
    cli::run(args)
}
