use env_logger::{Builder, Env, Target};

/// Logs go to stderr so command output on stdout stays clean. `RUST_LOG`
/// still wins over the configured level when set.
pub fn init(level: &str) {
    let result = Builder::from_env(Env::default().default_filter_or(level))
        .target(Target::Stderr)
        .format_timestamp_secs()
        .try_init();
    if let Err(e) = result {
        eprintln!("logger already initialised: {}", e);
    }
}
