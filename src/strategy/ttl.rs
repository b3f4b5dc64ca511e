// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! TTL computation and refresh signalling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Sliding extension per recorded access (10%).
const SLIDING_STEP: f64 = 0.1;

/// Requested lifetime for a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Use the configured default TTL
    #[default]
    Default,
    /// Never expires, even when a `max_ttl` is configured
    Never,
    /// Expire after the given duration
    After(Duration),
}

impl Expiry {
    /// Map a millisecond TTL: zero or negative means [`Expiry::Never`].
    #[must_use]
    pub fn from_millis(ms: i64) -> Self {
        if ms <= 0 {
            Self::Never
        } else {
            Self::After(Duration::from_millis(ms as u64))
        }
    }
}

impl From<Duration> for Expiry {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Self::Never
        } else {
            Self::After(d)
        }
    }
}

/// How expiry reacts to reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpirationMode {
    /// Expiry fixed at write time
    #[default]
    Absolute,
    /// Each read pushes expiry out, proportional to access count
    Sliding,
}

#[derive(Debug, Clone)]
pub struct TtlStrategy {
    pub default_ttl: Option<Duration>,
    pub max_ttl: Option<Duration>,
    pub mode: ExpirationMode,
    /// Fraction of the TTL after which a refresh is suggested
    pub refresh_threshold: f64,
}

impl Default for TtlStrategy {
    fn default() -> Self {
        Self {
            default_ttl: None,
            max_ttl: None,
            mode: ExpirationMode::Absolute,
            refresh_threshold: 0.8,
        }
    }
}

impl TtlStrategy {
    /// Effective TTL for a write (or a sliding re-computation).
    ///
    /// `Default` resolves to the configured default; the result is clamped
    /// to `max_ttl`. In sliding mode the TTL grows by 10% per access, still
    /// capped at `max_ttl`. `None` means no expiry.
    #[must_use]
    pub fn calculate_ttl(&self, expiry: Expiry, access_count: u64) -> Option<Duration> {
        let base = match expiry {
            Expiry::Never => return None,
            Expiry::After(d) => d,
            Expiry::Default => self.default_ttl?,
        };
        let base = self.clamp(base);

        match self.mode {
            ExpirationMode::Absolute => Some(base),
            ExpirationMode::Sliding => {
                let factor = 1.0 + access_count as f64 * SLIDING_STEP;
                let grown = Duration::try_from_secs_f64(base.as_secs_f64() * factor).unwrap_or(Duration::MAX);
                Some(self.clamp(grown))
            }
        }
    }

    /// True once `age >= ttl × refresh_threshold`. Signal only; nothing is
    /// refreshed here.
    #[must_use]
    pub fn should_refresh(&self, created_at_ms: u64, ttl: Duration, now_ms: u64) -> bool {
        let age = now_ms.saturating_sub(created_at_ms);
        let threshold_ms = ttl.as_millis() as f64 * self.refresh_threshold;
        age as f64 >= threshold_ms
    }

    #[must_use]
    pub fn is_sliding(&self) -> bool {
        self.mode == ExpirationMode::Sliding
    }

    fn clamp(&self, ttl: Duration) -> Duration {
        match self.max_ttl {
            Some(max) => ttl.min(max),
            None => ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(default_ms: Option<u64>, max_ms: Option<u64>, mode: ExpirationMode) -> TtlStrategy {
        TtlStrategy {
            default_ttl: default_ms.map(Duration::from_millis),
            max_ttl: max_ms.map(Duration::from_millis),
            mode,
            refresh_threshold: 0.8,
        }
    }

    #[test]
    fn test_from_millis_non_positive_is_never() {
        assert_eq!(Expiry::from_millis(0), Expiry::Never);
        assert_eq!(Expiry::from_millis(-5), Expiry::Never);
        assert_eq!(Expiry::from_millis(100), Expiry::After(Duration::from_millis(100)));
        assert_eq!(Expiry::from(Duration::ZERO), Expiry::Never);
    }

    #[test]
    fn test_default_and_explicit_ttl() {
        let s = strategy(Some(1_000), None, ExpirationMode::Absolute);
        assert_eq!(s.calculate_ttl(Expiry::Default, 0), Some(Duration::from_millis(1_000)));
        assert_eq!(
            s.calculate_ttl(Expiry::After(Duration::from_millis(50)), 0),
            Some(Duration::from_millis(50))
        );
        assert_eq!(s.calculate_ttl(Expiry::Never, 0), None);
    }

    #[test]
    fn test_no_default_means_no_expiry() {
        let s = strategy(None, Some(1_000), ExpirationMode::Absolute);
        assert_eq!(s.calculate_ttl(Expiry::Default, 0), None);
    }

    #[test]
    fn test_clamped_to_max() {
        let s = strategy(None, Some(500), ExpirationMode::Absolute);
        assert_eq!(
            s.calculate_ttl(Expiry::After(Duration::from_secs(60)), 0),
            Some(Duration::from_millis(500))
        );
        // Explicit Never is not clamped
        assert_eq!(s.calculate_ttl(Expiry::Never, 0), None);
    }

    #[test]
    fn test_sliding_extends_with_access_count() {
        let s = strategy(Some(1_000), Some(1_500), ExpirationMode::Sliding);
        assert_eq!(s.calculate_ttl(Expiry::Default, 0), Some(Duration::from_millis(1_000)));
        assert_eq!(s.calculate_ttl(Expiry::Default, 2), Some(Duration::from_millis(1_200)));
        // 1000 × 2.0 capped at 1500
        assert_eq!(s.calculate_ttl(Expiry::Default, 10), Some(Duration::from_millis(1_500)));
    }

    #[test]
    fn test_should_refresh_threshold() {
        let s = strategy(None, None, ExpirationMode::Absolute);
        let ttl = Duration::from_millis(1_000);
        assert!(!s.should_refresh(0, ttl, 799));
        assert!(s.should_refresh(0, ttl, 800));
        assert!(s.should_refresh(0, ttl, 5_000));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let s = strategy(None, None, ExpirationMode::Sliding);
        assert_eq!(s.calculate_ttl(Expiry::After(Duration::MAX), 3), Some(Duration::MAX));
        let big = Duration::from_secs(u64::MAX / 2);
        assert_eq!(s.calculate_ttl(Expiry::After(big), 50), Some(Duration::MAX));
    }
}
