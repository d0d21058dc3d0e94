//! Library configuration.

use serde::{Deserialize, Serialize};

use crate::interface::Interface;
use crate::logger::{LogSink, Verbosity};

/// Configuration handed to [`crate::Qos::init`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Requested backend interface; `Auto` resolves at init time.
    pub interface: Interface,
    /// Logging verbosity.
    pub verbosity: Verbosity,
    /// Logging sink.
    pub log_sink: LogSink,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interface: Interface::Auto,
            verbosity: Verbosity::default(),
            log_sink: LogSink::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.interface, Interface::Auto);
        assert_eq!(cfg.verbosity, Verbosity::Default);
        assert_eq!(cfg.log_sink, LogSink::Stderr);
    }

    #[test]
    fn test_config_serialization() {
        let cfg = Config {
            interface: Interface::Os,
            verbosity: Verbosity::Verbose,
            log_sink: LogSink::Stderr,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.interface, Interface::Os);
        assert_eq!(back.verbosity, Verbosity::Verbose);
    }
}
