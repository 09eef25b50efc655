//! # Network / Resource Monitor
//!
//! Estimates available bandwidth from observed transfers (EWMA) and/or
//! an external downlink signal, maps it into discrete tiers, and feeds
//! the adaptive decisions: concurrency ceiling, texture quality, and
//! load-distance shrinkage.

use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;

/// Discrete bandwidth tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BandwidthTier {
    /// < 1 Mbps
    Slow,
    /// < 10 Mbps
    Medium,
    /// < 50 Mbps
    Fast,
    Ultra,
}

impl BandwidthTier {
    pub fn from_mbps(mbps: f32) -> Self {
        if mbps < 1.0 {
            BandwidthTier::Slow
        } else if mbps < 10.0 {
            BandwidthTier::Medium
        } else if mbps < 50.0 {
            BandwidthTier::Fast
        } else {
            BandwidthTier::Ultra
        }
    }

    /// How many assets may be in `Loading` at once on this tier.
    pub fn concurrency_ceiling(self) -> usize {
        match self {
            BandwidthTier::Slow => 2,
            BandwidthTier::Medium => 4,
            BandwidthTier::Fast | BandwidthTier::Ultra => 8,
        }
    }

    /// Shrink factor applied to `load_distance` to curb speculative
    /// loads on constrained links.
    pub fn load_distance_scale(self) -> f32 {
        match self {
            BandwidthTier::Slow => 0.5,
            BandwidthTier::Medium => 0.75,
            BandwidthTier::Fast | BandwidthTier::Ultra => 1.0,
        }
    }

    /// Largest texture resolution suffix worth requesting on this tier.
    fn max_resolution_suffix(self) -> &'static str {
        match self {
            BandwidthTier::Slow => "_512",
            BandwidthTier::Medium => "_1k",
            BandwidthTier::Fast => "_2k",
            BandwidthTier::Ultra => "_4k",
        }
    }
}

/// Resolution suffixes, smallest first. Locators following the
/// `name_<res>.ext` convention participate in adaptive quality.
const RESOLUTION_SUFFIXES: [&str; 4] = ["_512", "_1k", "_2k", "_4k"];

// Smoothing factor for the bandwidth EWMA. Higher reacts faster to
// changing conditions, lower resists one-off spikes.
const EWMA_ALPHA: f32 = 0.3;

/// Absent any signal or samples, assume a mid-range connection.
pub const DEFAULT_BANDWIDTH_MBPS: f32 = 5.0;

/// Bandwidth estimator with change notifications.
pub struct NetworkMonitor {
    estimate_mbps: RwLock<f32>,
    tier_tx: watch::Sender<BandwidthTier>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkMonitor {
    pub fn new() -> Self {
        let (tier_tx, _) = watch::channel(BandwidthTier::from_mbps(DEFAULT_BANDWIDTH_MBPS));
        Self {
            estimate_mbps: RwLock::new(DEFAULT_BANDWIDTH_MBPS),
            tier_tx,
        }
    }

    /// Current smoothed estimate in Mbps.
    pub fn current_bandwidth_estimate(&self) -> f32 {
        *self.estimate_mbps.read()
    }

    pub fn tier(&self) -> BandwidthTier {
        *self.tier_tx.borrow()
    }

    /// Subscribe to tier changes. The receiver holds the current tier
    /// immediately.
    pub fn subscribe(&self) -> watch::Receiver<BandwidthTier> {
        self.tier_tx.subscribe()
    }

    /// Feed an external downlink estimate (e.g. from the host platform).
    pub fn set_bandwidth_estimate(&self, mbps: f32) {
        if !mbps.is_finite() || mbps <= 0.0 {
            return;
        }
        *self.estimate_mbps.write() = mbps;
        self.publish_tier(mbps);
    }

    /// Feed an observed transfer sample; the estimate converges via EWMA.
    pub fn record_transfer(&self, bytes: usize, elapsed: Duration) {
        let secs = elapsed.as_secs_f32();
        if secs <= 0.0 || bytes == 0 {
            return;
        }
        let sample_mbps = (bytes as f32 * 8.0) / (secs * 1_000_000.0);
        let updated = {
            let mut estimate = self.estimate_mbps.write();
            *estimate = *estimate * (1.0 - EWMA_ALPHA) + sample_mbps * EWMA_ALPHA;
            *estimate
        };
        self.publish_tier(updated);
    }

    fn publish_tier(&self, mbps: f32) {
        let tier = BandwidthTier::from_mbps(mbps);
        self.tier_tx.send_if_modified(|current| {
            if *current != tier {
                tracing::info!(?tier, mbps, "bandwidth tier changed");
                *current = tier;
                true
            } else {
                false
            }
        });
    }

    /// Rewrite a texture locator's resolution suffix down to what the
    /// current tier can afford. Locators without a recognized suffix are
    /// returned unchanged.
    pub fn adapt_locator_quality(&self, locator: &str) -> String {
        let tier = self.tier();
        let ceiling = tier.max_resolution_suffix();
        let ceiling_rank = suffix_rank(ceiling);

        let (stem, ext) = match locator.rsplit_once('.') {
            Some((stem, ext)) => (stem, ext),
            None => return locator.to_string(),
        };
        for suffix in RESOLUTION_SUFFIXES {
            if let Some(base) = stem.strip_suffix(suffix) {
                if suffix_rank(suffix) > ceiling_rank {
                    return format!("{base}{ceiling}.{ext}");
                }
                return locator.to_string();
            }
        }
        locator.to_string()
    }
}

fn suffix_rank(suffix: &str) -> usize {
    RESOLUTION_SUFFIXES.iter().position(|s| *s == suffix).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_mapping() {
        assert_eq!(BandwidthTier::from_mbps(0.5), BandwidthTier::Slow);
        assert_eq!(BandwidthTier::from_mbps(4.0), BandwidthTier::Medium);
        assert_eq!(BandwidthTier::from_mbps(25.0), BandwidthTier::Fast);
        assert_eq!(BandwidthTier::from_mbps(200.0), BandwidthTier::Ultra);
    }

    #[test]
    fn ceilings_per_tier() {
        assert_eq!(BandwidthTier::Slow.concurrency_ceiling(), 2);
        assert_eq!(BandwidthTier::Medium.concurrency_ceiling(), 4);
        assert_eq!(BandwidthTier::Fast.concurrency_ceiling(), 8);
        assert_eq!(BandwidthTier::Ultra.concurrency_ceiling(), 8);
    }

    #[test]
    fn quality_rewrite_downgrades_only() {
        let monitor = NetworkMonitor::new();
        monitor.set_bandwidth_estimate(0.5); // Slow → _512 ceiling
        assert_eq!(monitor.adapt_locator_quality("wall_4k.png"), "wall_512.png");
        assert_eq!(monitor.adapt_locator_quality("wall_512.png"), "wall_512.png");
        assert_eq!(monitor.adapt_locator_quality("wall.png"), "wall.png");

        monitor.set_bandwidth_estimate(100.0); // Ultra keeps everything
        assert_eq!(monitor.adapt_locator_quality("wall_4k.png"), "wall_4k.png");
    }

    #[test]
    fn ewma_converges_toward_samples() {
        let monitor = NetworkMonitor::new();
        // 1 MB in 100 ms is 80 Mbps; repeated samples pull the default up.
        for _ in 0..20 {
            monitor.record_transfer(1_000_000, Duration::from_millis(100));
        }
        assert!(monitor.current_bandwidth_estimate() > 50.0);
        assert_eq!(monitor.tier(), BandwidthTier::Ultra);
    }

    #[tokio::test]
    async fn tier_change_notifies_subscribers() {
        let monitor = NetworkMonitor::new();
        let mut rx = monitor.subscribe();
        assert_eq!(*rx.borrow(), BandwidthTier::Medium);

        monitor.set_bandwidth_estimate(0.2);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), BandwidthTier::Slow);
    }
}
