//! Tracing subscriber setup for hosts embedding the engine

use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

/// Install a fmt subscriber. `RUST_LOG` wins over `logging.level`; a second
/// call, or a host that already installed a subscriber, is a no-op.
pub fn init_tracing(settings: &LoggingSettings) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("schema_form={}", settings.level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let settings = LoggingSettings::default();
        init_tracing(&settings);
        assert!(!init_tracing(&settings));
    }
}
