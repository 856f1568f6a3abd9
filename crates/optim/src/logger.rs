use std::fmt::Display;

/// Environment variable used by binaries, tests and benches to set the log level
/// (see `env_logger::Env::filter_or`)
pub const ACQOPT_LOG: &str = "ACQOPT_LOG";

/// A logger handle given to each component which wants to report its progress.
///
/// Messages go through the [`log`] facade using the handle target, so that
/// each optimizer of a pipeline logs under its own name. Components given no
/// handle stay silent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Logger {
    target: String,
}

impl Default for Logger {
    fn default() -> Self {
        Logger::new("acqopt")
    }
}

impl Logger {
    /// Constructor given the log target
    pub fn new(target: impl Into<String>) -> Self {
        Logger {
            target: target.into(),
        }
    }

    /// A handle logging under `target` nested in this handle target
    pub fn named(&self, name: &str) -> Self {
        Logger::new(format!("{}::{}", self.target, name))
    }

    /// Log target
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Logs `msg` at debug level
    pub fn debug(&self, msg: impl Display) {
        log::debug!(target: &self.target, "{}", msg);
    }

    /// Logs `msg` at info level
    pub fn info(&self, msg: impl Display) {
        log::info!(target: &self.target, "{}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named() {
        let logger = Logger::default().named("OnePlusOneCma");
        assert_eq!(logger.target(), "acqopt::OnePlusOneCma");
    }
}
