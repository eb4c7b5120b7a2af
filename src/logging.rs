//! Diagnostic sink used during plan compilation and buffer allocation.
//!
//! The sink is passed explicitly into the compiler and buffer manager. The
//! binary wires [`TracingSink`] once at startup; tests can pass a closure.

use std::fmt;
use tracing::{debug, error, info, warn};

/// Severity of a diagnostic message, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    InternalError,
    Error,
    Warning,
    Info,
    Verbose,
}

impl Severity {
    /// Decode a severity reported by the native bridge.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::InternalError,
            1 => Self::Error,
            2 => Self::Warning,
            3 => Self::Info,
            _ => Self::Verbose,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::InternalError => "INTERNAL_ERROR",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
            Self::Verbose => "VERBOSE",
        };
        f.write_str(s)
    }
}

/// Receives severity-tagged diagnostic strings.
pub trait LogSink: Send + Sync {
    fn log(&self, severity: Severity, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(Severity, &str) + Send + Sync,
{
    fn log(&self, severity: Severity, message: &str) {
        self(severity, message)
    }
}

/// Forwards diagnostics to the `tracing` subscriber installed by the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, severity: Severity, message: &str) {
        match severity {
            Severity::InternalError | Severity::Error => error!("{}", message),
            Severity::Warning => warn!("{}", message),
            Severity::Info => info!("{}", message),
            Severity::Verbose => debug!("{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn closures_are_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |severity: Severity, message: &str| {
            seen.lock().push(format!("{}: {}", severity, message));
        };
        sink.log(Severity::Error, "plan build failed");
        sink.log(Severity::Info, "binding 0");
        assert_eq!(
            *seen.lock(),
            vec!["ERROR: plan build failed".to_string(), "INFO: binding 0".to_string()]
        );
    }

    #[test]
    fn severity_codes_and_ordering() {
        assert_eq!(Severity::from_code(1), Severity::Error);
        assert_eq!(Severity::from_code(4), Severity::Verbose);
        assert!(Severity::Error < Severity::Info);
    }
}
