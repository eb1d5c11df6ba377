/* src/setup/logging.rs */

use tracing_subscriber::EnvFilter;

// Installs the fmt subscriber; `log` records are forwarded into it as well.
pub fn init_logging(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},tower_http=debug", log_level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_err()
    {
        eprintln!("! Logger already initialized, keeping the existing one.");
    }
}
