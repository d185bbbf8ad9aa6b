//! Structural trace switch and per-call read options.
//!
//! With debug mode on, each decoded structure (superblock, object header,
//! group listing, chunk, link hop) produces one `tracing` event at `DEBUG`
//! level. Installing a subscriber is left to the application.

use std::sync::atomic::{AtomicBool, Ordering};

static DEBUG: AtomicBool = AtomicBool::new(false);

/// Turn structural tracing on or off for the whole process.
pub fn set_debug(enabled: bool) {
    DEBUG.store(enabled, Ordering::Relaxed);
}

pub fn debug_enabled() -> bool {
    DEBUG.load(Ordering::Relaxed)
}

/// Options for a single read call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Overrides the process-wide debug switch for this call.
    pub debug: Option<bool>,
}

impl ReadOptions {
    pub fn debug(enabled: bool) -> Self {
        ReadOptions {
            debug: Some(enabled),
        }
    }

    pub(crate) fn trace(&self) -> bool {
        self.debug.unwrap_or_else(debug_enabled)
    }
}

/// Emit a structural trace event when `$on` is true.
macro_rules! structure {
    ($on:expr, $($arg:tt)+) => {
        if $on {
            tracing::debug!($($arg)+);
        }
    };
}

pub(crate) use structure;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_call_override_wins() {
        assert!(ReadOptions::debug(true).trace());
        assert!(!ReadOptions::debug(false).trace());
    }
}
