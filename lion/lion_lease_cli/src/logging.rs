/// Install the logger.
///
/// `RUST_LOG` wins when set; otherwise `verbose` picks the level
/// (0=warn, 1=info, 2=debug, 3+=trace).
pub fn setup_logger(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_millis()
        .format_module_path(false)
        .init();
}
