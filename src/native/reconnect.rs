//! Reconnection backoff policy for the engine

use crate::config::ReconnectSection;
use std::time::Duration;

/// Reconnection configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Delays for the first attempts in milliseconds (if empty, uses sustained delay)
    pub backoff_pattern: Vec<u64>,
    /// Delay to use after pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from(&ReconnectSection::default())
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            backoff_pattern: section.backoff_pattern_ms.clone(),
            sustained_delay: section.sustained_delay_ms,
        }
    }
}

/// What to do after a failed or lost connection
#[derive(Debug, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Wait `delay`, then attempt again
    Proceed { attempt: u32, delay: Duration },
    /// Attempts exhausted; stop the client
    GiveUp,
}

impl ReconnectConfig {
    /// Backoff delay in milliseconds for the given 1-based attempt
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }

    /// Decide whether a further attempt is allowed after `failed_attempts` failures
    pub fn next_attempt(&self, failed_attempts: u32) -> ReconnectionDecision {
        if let Some(max_attempts) = self.max_attempts {
            if failed_attempts >= max_attempts {
                return ReconnectionDecision::GiveUp;
            }
        }

        let attempt = failed_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay: Duration::from_millis(self.calculate_backoff_delay(attempt)),
        }
    }
}
