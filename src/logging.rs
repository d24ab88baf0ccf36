//! Log output setup.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `AUTOPILOT_LOG=autopilot_core=debug`.
pub const LOG_ENV: &str = "AUTOPILOT_LOG";

/// Install the stderr subscriber. Safe to call more than once; later calls do nothing.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        init();
        init();
        tracing::info!("still alive");
    }
}
