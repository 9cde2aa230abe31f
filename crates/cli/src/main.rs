use std::process::ExitCode;

fn main() -> ExitCode {
    cohortly_cli::run()
}
