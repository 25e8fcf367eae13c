use std::process::ExitCode;

use colored::Colorize;

fn main() -> ExitCode {
    match healthmate::app::run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
