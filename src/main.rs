use std::process::ExitCode;

fn main() -> ExitCode {
    medexpand_lib::run()
}
