//! Process-wide logger setup.
//!
//! `RUST_LOG` always wins; otherwise the filter is `info`, or `debug` with
//! `--verbose`.

use log::LevelFilter;

pub fn default_level(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

pub fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(default_level(verbose));
    if let Ok(spec) = std::env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    if let Err(err) = builder.try_init() {
        eprintln!("logger already initialised: {err}");
    }
}
