use clap::Parser;
use tradeguard::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
