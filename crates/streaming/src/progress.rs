//! # Progress Reporting and Callback Slots
//!
//! A fixed set of typed callback slots with explicit ownership, cleared
//! on dispose. No listener lists to grow without bound or fire after
//! teardown.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::asset::AssetKey;
use crate::decode::AssetPayload;
use crate::error::StreamError;

/// Pipeline phase as exposed to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Analyzing,
    Loading,
    Applying,
    Complete,
}

/// Snapshot delivered to `on_progress`.
#[derive(Debug, Clone)]
pub struct LoadProgress {
    pub phase: LoadPhase,
    pub overall_progress_pct: f32,
    pub assets_loaded: usize,
    pub total_assets: usize,
    pub loading_time_ms: u64,
    /// Projected from the observed per-asset rate; `None` until at least
    /// one asset has settled.
    pub estimated_remaining_ms: Option<u64>,
}

impl Default for LoadProgress {
    fn default() -> Self {
        Self {
            phase: LoadPhase::Complete,
            overall_progress_pct: 0.0,
            assets_loaded: 0,
            total_assets: 0,
            loading_time_ms: 0,
            estimated_remaining_ms: None,
        }
    }
}

pub type ProgressCallback = Box<dyn Fn(&LoadProgress) + Send + Sync>;
pub type AssetLoadedCallback = Box<dyn Fn(&AssetKey, &Arc<AssetPayload>) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(&StreamError, Option<&AssetKey>) + Send + Sync>;

/// The pipeline's three callback slots.
#[derive(Default)]
pub struct CallbackSlots {
    on_progress: Mutex<Option<ProgressCallback>>,
    on_asset_loaded: Mutex<Option<AssetLoadedCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
}

impl CallbackSlots {
    pub fn set_on_progress(&self, callback: ProgressCallback) {
        *self.on_progress.lock() = Some(callback);
    }

    pub fn set_on_asset_loaded(&self, callback: AssetLoadedCallback) {
        *self.on_asset_loaded.lock() = Some(callback);
    }

    pub fn set_on_error(&self, callback: ErrorCallback) {
        *self.on_error.lock() = Some(callback);
    }

    pub fn emit_progress(&self, progress: &LoadProgress) {
        if let Some(cb) = self.on_progress.lock().as_ref() {
            cb(progress);
        }
    }

    pub fn emit_asset_loaded(&self, key: &AssetKey, payload: &Arc<AssetPayload>) {
        if let Some(cb) = self.on_asset_loaded.lock().as_ref() {
            cb(key, payload);
        }
    }

    pub fn emit_error(&self, error: &StreamError, key: Option<&AssetKey>) {
        if let Some(cb) = self.on_error.lock().as_ref() {
            cb(error, key);
        }
    }

    /// Drop all callbacks. Called on dispose so nothing fires afterward.
    pub fn clear(&self) {
        *self.on_progress.lock() = None;
        *self.on_asset_loaded.lock() = None;
        *self.on_error.lock() = None;
    }
}

/// Shared progress state updated by the scheduler as loads settle.
pub struct ProgressTracker {
    state: RwLock<LoadProgress>,
    started: RwLock<Instant>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self {
            state: RwLock::new(LoadProgress::default()),
            started: RwLock::new(Instant::now()),
        }
    }
}

impl ProgressTracker {
    /// Reset for a fresh plan of `total_assets`.
    pub fn begin(&self, total_assets: usize) {
        *self.started.write() = Instant::now();
        *self.state.write() = LoadProgress {
            phase: LoadPhase::Analyzing,
            overall_progress_pct: 0.0,
            assets_loaded: 0,
            total_assets,
            loading_time_ms: 0,
            estimated_remaining_ms: None,
        };
    }

    pub fn set_phase(&self, phase: LoadPhase) {
        let mut state = self.state.write();
        state.phase = phase;
        if phase == LoadPhase::Complete {
            state.overall_progress_pct = 100.0;
            state.estimated_remaining_ms = None;
        }
        state.loading_time_ms = self.started.read().elapsed().as_millis() as u64;
    }

    /// Record one settled asset (loaded, failed, or placeholder).
    pub fn record_settled(&self) {
        let mut state = self.state.write();
        state.assets_loaded = (state.assets_loaded + 1).min(state.total_assets.max(1));
        state.loading_time_ms = self.started.read().elapsed().as_millis() as u64;
        if state.total_assets > 0 {
            state.overall_progress_pct =
                (state.assets_loaded as f32 / state.total_assets as f32) * 100.0;
            let rate_ms = state.loading_time_ms as f32 / state.assets_loaded.max(1) as f32;
            let remaining = state.total_assets - state.assets_loaded;
            state.estimated_remaining_ms = Some((rate_ms * remaining as f32) as u64);
        }
    }

    /// Force-settle to `Complete` so observers are never left waiting.
    /// Used by cancellation; idempotent.
    pub fn force_complete(&self) {
        let mut state = self.state.write();
        state.phase = LoadPhase::Complete;
        state.overall_progress_pct = 100.0;
        state.estimated_remaining_ms = None;
    }

    pub fn snapshot(&self) -> LoadProgress {
        self.state.read().clone()
    }
}
