use clap::Parser;

use paintfe_projection::cli::{self, CliArgs};

fn main() -> std::process::ExitCode {
    let args = CliArgs::parse();
    cli::run(args)
}
