//! # Streaming Registry
//!
//! Owns the per-asset state machine. Recomputes priority from spatial
//! position, camera motion, and network conditions; decides what enters
//! the load queue and what gets evicted as the viewpoint moves.
//!
//! The identity-keyed asset map is the pipeline's single shared mutable
//! structure. All state transitions for a given key happen under that
//! key's map-entry guard, so the eviction ref-count check is atomic
//! with the state write.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use glam::Vec3;
use parking_lot::Mutex;

use crate::asset::{AssetKey, AssetReference, AssetState, StreamingAsset};
use crate::config::StreamingConfig;
use crate::decode::AssetPayload;
use crate::network::NetworkMonitor;
use crate::plan::LoadingPlan;

/// Boost applied when the viewpoint is predicted to approach an asset.
const APPROACH_BOOST: f32 = 1.5;

// ============================================================================
// Stats
// ============================================================================

/// Registry counters. The cache-hit ratio counts explicit re-use checks
/// (`mark_reused`), which is the only path into `Cached`.
#[derive(Debug, Default)]
pub struct RegistryStats {
    pub cache_hits: AtomicUsize,
    pub cache_misses: AtomicUsize,
    pub soft_evictions: AtomicUsize,
    pub hard_evictions: AtomicUsize,
}

impl RegistryStats {
    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 { 0.0 } else { hits as f64 / total as f64 }
    }
}

/// Asset counts by scheduling state. `Cached` counts as loaded,
/// `Evicted` as unloaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub loaded: usize,
    pub loading: usize,
    pub queued: usize,
    pub unloaded: usize,
}

// ============================================================================
// Registry
// ============================================================================

/// Per-asset state machine plus the spatial load queue.
pub struct StreamingRegistry {
    assets: DashMap<AssetKey, StreamingAsset>,
    /// Keys in `Queued` state, kept sorted priority-descending.
    queue: Mutex<Vec<AssetKey>>,
    config: StreamingConfig,
    monitor: Arc<NetworkMonitor>,
    last_viewpoint: Mutex<Option<(Vec3, Instant)>>,
    pub stats: RegistryStats,
}

impl StreamingRegistry {
    pub fn new(config: StreamingConfig, monitor: Arc<NetworkMonitor>) -> Self {
        Self {
            assets: DashMap::new(),
            queue: Mutex::new(Vec::new()),
            config,
            monitor,
            last_viewpoint: Mutex::new(None),
            stats: RegistryStats::default(),
        }
    }

    /// Register a planned reference. The registry never holds two
    /// entries for one identity key; re-registration merges priority.
    pub fn register(&self, reference: AssetReference) {
        match self.assets.get_mut(&reference.key) {
            Some(mut existing) => {
                existing.reference.priority =
                    existing.reference.priority.max(reference.priority);
                if existing.reference.spatial_position.is_none() {
                    existing.reference.spatial_position = reference.spatial_position;
                }
            }
            None => {
                self.assets
                    .insert(reference.key.clone(), StreamingAsset::new(reference));
            }
        }
    }

    /// Register every asset of a plan.
    pub fn register_plan(&self, plan: &LoadingPlan) {
        for reference in &plan.assets {
            self.register(reference.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn get(&self, key: &AssetKey) -> Option<StreamingAsset> {
        self.assets.get(key).map(|a| a.clone())
    }

    pub fn state_of(&self, key: &AssetKey) -> Option<AssetState> {
        self.assets.get(key).map(|a| a.state)
    }

    pub fn payload_of(&self, key: &AssetKey) -> Option<Arc<AssetPayload>> {
        self.assets.get(key).and_then(|a| a.payload.clone())
    }

    /// Concurrency ceiling derived from the current bandwidth tier.
    pub fn concurrency_ceiling(&self) -> usize {
        self.monitor.tier().concurrency_ceiling()
    }

    // ------------------------------------------------------------------
    // Viewpoint-driven priority, queueing, and eviction
    // ------------------------------------------------------------------

    /// Recompute spatial priorities for the new viewpoint, queue what
    /// came into range, evict what left it.
    pub fn update_viewpoint(&self, viewpoint: Vec3) {
        let velocity = self.estimate_velocity(viewpoint);
        let load_distance =
            self.config.load_distance * self.monitor.tier().load_distance_scale();
        let unload_distance = self.config.unload_distance;

        let mut newly_queued = Vec::new();

        for mut entry in self.assets.iter_mut() {
            let Some(position) = entry.reference.spatial_position else {
                continue;
            };
            let distance = viewpoint.distance(position);
            let mut priority = (1.0 - distance / load_distance).max(0.0);

            // Predicted-approach boost: score against where the camera
            // is heading, not just where it is.
            if self.config.predictive_loading && velocity.length_squared() > 0.0 {
                let predicted = viewpoint + velocity * self.config.prediction_weight;
                let predicted_distance = predicted.distance(position);
                if predicted_distance < distance {
                    priority =
                        (1.0 - predicted_distance / load_distance).max(0.0) * APPROACH_BOOST;
                }
            }

            for zone in &self.config.priority_zones {
                if zone.contains(position) {
                    priority *= zone.multiplier;
                }
            }

            entry.reference.priority = priority;

            if distance <= load_distance && entry.state == AssetState::Unloaded {
                if entry.transition(AssetState::Queued) {
                    newly_queued.push(entry.reference.key.clone());
                }
            } else if distance > unload_distance {
                self.evict_entry(&mut entry);
            }
        }

        let mut queue = self.queue.lock();
        queue.extend(newly_queued);
        self.sort_queue(&mut queue);
    }

    fn estimate_velocity(&self, viewpoint: Vec3) -> Vec3 {
        let mut last = self.last_viewpoint.lock();
        let velocity = match *last {
            Some((prev, at)) => {
                let dt = at.elapsed().as_secs_f32();
                if dt > f32::EPSILON { (viewpoint - prev) / dt } else { Vec3::ZERO }
            }
            None => Vec3::ZERO,
        };
        *last = Some((viewpoint, Instant::now()));
        velocity
    }

    /// Eviction under the entry guard: ref-count check and state write
    /// are a single atomic step.
    fn evict_entry(&self, entry: &mut StreamingAsset) {
        match entry.state {
            AssetState::Loaded | AssetState::Cached => {
                if entry.ref_count > 0 {
                    // Soft: payload stays retrievable for live consumers.
                    if entry.transition(AssetState::Evicted) {
                        self.stats.soft_evictions.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(asset = %entry.reference.key, refs = entry.ref_count, "soft-evicted");
                    }
                } else if entry.transition(AssetState::Unloaded) {
                    entry.payload = None;
                    entry.actual_size = None;
                    self.stats.hard_evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(asset = %entry.reference.key, "evicted and released");
                }
            }
            AssetState::Evicted => {
                // A soft-evicted asset whose consumers have since released
                // it can now actually free its payload.
                if entry.ref_count == 0 && entry.transition(AssetState::Unloaded) {
                    entry.payload = None;
                    entry.actual_size = None;
                    self.stats.hard_evictions.fetch_add(1, Ordering::Relaxed);
                }
            }
            _ => {}
        }
    }

    fn sort_queue(&self, queue: &mut Vec<AssetKey>) {
        queue.retain(|key| {
            self.assets
                .get(key)
                .map(|a| a.state == AssetState::Queued)
                .unwrap_or(false)
        });
        queue.sort_by(|a, b| {
            let pa = self.assets.get(a).map(|x| x.reference.priority).unwrap_or(0.0);
            let pb = self.assets.get(b).map(|x| x.reference.priority).unwrap_or(0.0);
            pb.total_cmp(&pa)
        });
    }

    /// Snapshot of the queue, priority-descending.
    pub fn queued_keys(&self) -> Vec<AssetKey> {
        self.queue.lock().clone()
    }

    /// Pop up to `n` queued keys for the scheduler to promote. The tier
    /// ceiling gates how many the scheduler should request at once.
    pub fn take_next_queued(&self, n: usize) -> Vec<AssetKey> {
        let mut queue = self.queue.lock();
        let take = n.min(queue.len());
        queue.drain(..take).collect()
    }

    // ------------------------------------------------------------------
    // Transitions driven by the scheduler
    // ------------------------------------------------------------------

    /// Promote to `Loading`, passing through `Queued` if needed.
    pub fn mark_loading(&self, key: &AssetKey) -> bool {
        self.assets
            .get_mut(key)
            .map(|mut a| {
                if a.state == AssetState::Unloaded {
                    a.transition(AssetState::Queued);
                }
                a.transition(AssetState::Loading)
            })
            .unwrap_or(false)
    }

    pub fn mark_loaded(&self, key: &AssetKey, payload: Arc<AssetPayload>) -> bool {
        self.assets
            .get_mut(key)
            .map(|mut a| {
                let size = payload.size_bytes() as u64;
                if a.transition(AssetState::Loaded) {
                    a.actual_size = Some(size);
                    a.payload = Some(payload);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false)
    }

    /// Failure path: `Loading → Unloaded`. Assets that never reached
    /// `Loading` (cancelled while queued) are left where they are.
    pub fn mark_failed(&self, key: &AssetKey) -> bool {
        self.assets
            .get_mut(key)
            .map(|mut a| {
                if a.state == AssetState::Loading {
                    a.transition(AssetState::Unloaded)
                } else {
                    false
                }
            })
            .unwrap_or(false)
    }

    /// Explicit re-use check: a consumer asked for an already-loaded
    /// asset. The only path into `Cached`; feeds the cache-hit ratio.
    pub fn mark_reused(&self, key: &AssetKey) -> Option<Arc<AssetPayload>> {
        let payload = self.assets.get_mut(key).and_then(|mut a| {
            if a.state == AssetState::Loaded {
                a.transition(AssetState::Cached);
            }
            if matches!(a.state, AssetState::Cached | AssetState::Evicted) {
                a.last_accessed = Instant::now();
                a.payload.clone()
            } else {
                None
            }
        });
        if payload.is_some() {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        payload
    }

    // ------------------------------------------------------------------
    // Ref counting
    // ------------------------------------------------------------------

    pub fn acquire(&self, key: &AssetKey) -> bool {
        self.assets
            .get_mut(key)
            .map(|mut a| {
                a.ref_count += 1;
                true
            })
            .unwrap_or(false)
    }

    pub fn release(&self, key: &AssetKey) {
        if let Some(mut a) = self.assets.get_mut(key) {
            a.ref_count = a.ref_count.saturating_sub(1);
        }
    }

    pub fn ref_count(&self, key: &AssetKey) -> u32 {
        self.assets.get(key).map(|a| a.ref_count).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    pub fn get_status(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.assets.iter() {
            match entry.state {
                AssetState::Loaded | AssetState::Cached => counts.loaded += 1,
                AssetState::Loading => counts.loading += 1,
                AssetState::Queued => counts.queued += 1,
                AssetState::Unloaded | AssetState::Evicted => counts.unloaded += 1,
            }
        }
        counts
    }

    /// Return every in-flight asset to `Unloaded`. Called on cancel so a
    /// fresh execute starts from a clean state machine.
    pub fn fail_all_loading(&self) {
        for mut entry in self.assets.iter_mut() {
            if entry.state == AssetState::Loading {
                entry.transition(AssetState::Unloaded);
            }
        }
    }

    /// Drop every entry. Used by pipeline disposal only; eviction keeps
    /// bookkeeping alive.
    pub fn clear(&self) {
        self.assets.clear();
        self.queue.lock().clear();
        *self.last_viewpoint.lock() = None;
    }
}
