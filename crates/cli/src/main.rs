use std::process::ExitCode;

fn main() -> ExitCode {
    globaliq_cli::run()
}
