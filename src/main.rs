fn main() -> std::process::ExitCode {
    airlog_lib::run()
}
