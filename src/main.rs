//! `testhost` binary: discovery front end and isolated discovery worker.

fn main() {
    // Logs go to stderr so `discover --json` output stays parseable; RUST_LOG overrides the info default.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();

    testhost::cli::run();
}
