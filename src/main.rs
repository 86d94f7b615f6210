use std::process::ExitCode;

fn main() -> ExitCode {
    whittle::cli::run()
}
