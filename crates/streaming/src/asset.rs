//! # Asset Identity and Runtime State
//!
//! 1. `AssetKind` / `AssetKey` - identity is `(kind, locator)`
//! 2. `AssetReference` - a planned asset as the analyzer emits it
//! 3. `AssetState` - the per-asset state machine
//! 4. `StreamingAsset` - reference + runtime bookkeeping in the registry

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::decode::AssetPayload;

// ============================================================================
// Identity
// ============================================================================

/// The three asset kinds the pipeline schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Texture,
    Model,
    Audio,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Texture => write!(f, "texture"),
            AssetKind::Model => write!(f, "model"),
            AssetKind::Audio => write!(f, "audio"),
        }
    }
}

/// Identity key for deduplication. Two references to the same kind and
/// source locator are the same asset, everywhere in the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetKey {
    pub kind: AssetKind,
    pub locator: String,
}

impl AssetKey {
    pub fn new(kind: AssetKind, locator: impl Into<String>) -> Self {
        Self { kind, locator: locator.into() }
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.locator)
    }
}

// ============================================================================
// Planned reference
// ============================================================================

/// A flat, deduplicated asset reference with computed priority, as
/// produced by the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetReference {
    /// Identity key (kind + source locator).
    pub key: AssetKey,
    /// Same-kind assets that must be loaded before this one.
    pub dependencies: Vec<AssetKey>,
    /// Load priority in [0, 1]; transient boosts may push it above 1.
    pub priority: f32,
    /// Size estimate used for ordering and bundle accounting.
    pub estimated_size_bytes: u64,
    /// World position, when the owning entity is spatially placed.
    pub spatial_position: Option<Vec3>,
}

impl AssetReference {
    pub fn new(key: AssetKey, priority: f32, estimated_size_bytes: u64) -> Self {
        Self {
            key,
            dependencies: Vec::new(),
            priority,
            estimated_size_bytes,
            spatial_position: None,
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.spatial_position = Some(position);
        self
    }
}

// ============================================================================
// State machine
// ============================================================================

/// Per-asset lifecycle state.
///
/// Legal transitions:
/// `Unloaded → Queued → Loading → Loaded ↔ Cached → Evicted`, plus
/// `Loading → Unloaded` on failure. `Evicted` is only reachable from
/// `Loaded`/`Cached`, and only when the ref count is zero does eviction
/// actually release the payload (back to `Unloaded`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssetState {
    Unloaded,
    Queued,
    Loading,
    Loaded,
    Cached,
    Evicted,
}

impl AssetState {
    /// Whether `self → to` is a legal transition.
    pub fn can_transition(self, to: AssetState) -> bool {
        use AssetState::*;
        matches!(
            (self, to),
            (Unloaded, Queued)
                | (Queued, Loading)
                | (Loading, Loaded)
                | (Loading, Unloaded) // failure path
                | (Loaded, Cached)
                | (Cached, Loaded)
                | (Loaded, Evicted)
                | (Cached, Evicted)
                | (Loaded, Unloaded)  // hard eviction, ref_count == 0
                | (Cached, Unloaded)
                | (Evicted, Unloaded)
        )
    }

    /// Terminal for scheduling purposes: the scheduler will not start
    /// another attempt for an asset in one of these states.
    pub fn is_terminal(self) -> bool {
        matches!(self, AssetState::Loaded | AssetState::Cached)
    }
}

// ============================================================================
// Runtime bookkeeping
// ============================================================================

/// An asset as tracked by the registry: the planned reference plus the
/// runtime state the streaming system mutates.
#[derive(Debug, Clone)]
pub struct StreamingAsset {
    pub reference: AssetReference,
    pub state: AssetState,
    /// Quality level currently loaded (0 = full quality).
    pub lod_level: u8,
    /// Byte size of the fetched payload, once known.
    pub actual_size: Option<u64>,
    /// Consumers currently holding this asset. Eviction only releases
    /// the payload at zero.
    pub ref_count: u32,
    pub last_accessed: Instant,
    /// Decoded payload. Cleared on hard eviction, retained on soft.
    pub payload: Option<Arc<AssetPayload>>,
}

impl StreamingAsset {
    pub fn new(reference: AssetReference) -> Self {
        Self {
            reference,
            state: AssetState::Unloaded,
            lod_level: 0,
            actual_size: None,
            ref_count: 0,
            last_accessed: Instant::now(),
            payload: None,
        }
    }

    /// Apply a transition if legal; returns whether it was applied.
    /// Illegal transitions are logged and ignored rather than panicking,
    /// since they indicate a scheduling race worth seeing in traces.
    pub fn transition(&mut self, to: AssetState) -> bool {
        if self.state == to {
            return true;
        }
        if self.state.can_transition(to) {
            self.state = to;
            self.last_accessed = Instant::now();
            true
        } else {
            tracing::warn!(
                asset = %self.reference.key,
                from = ?self.state,
                to = ?to,
                "ignoring illegal asset state transition"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_key_equality() {
        let a = AssetKey::new(AssetKind::Texture, "maps/wall_2k.png");
        let b = AssetKey::new(AssetKind::Texture, "maps/wall_2k.png");
        let c = AssetKey::new(AssetKind::Model, "maps/wall_2k.png");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn legal_transitions() {
        use AssetState::*;
        assert!(Unloaded.can_transition(Queued));
        assert!(Queued.can_transition(Loading));
        assert!(Loading.can_transition(Loaded));
        assert!(Loading.can_transition(Unloaded));
        assert!(Loaded.can_transition(Cached));
        assert!(Cached.can_transition(Loaded));
        assert!(Loaded.can_transition(Evicted));
    }

    #[test]
    fn illegal_transitions_rejected() {
        use AssetState::*;
        assert!(!Unloaded.can_transition(Loading));
        assert!(!Queued.can_transition(Loaded));
        assert!(!Evicted.can_transition(Loaded));
        assert!(!Unloaded.can_transition(Evicted));

        let mut asset = StreamingAsset::new(AssetReference::new(
            AssetKey::new(AssetKind::Audio, "sfx/door.wav"),
            0.3,
            1024,
        ));
        assert!(!asset.transition(Loaded));
        assert_eq!(asset.state, Unloaded);
        assert!(asset.transition(Queued));
        assert!(asset.transition(Loading));
        assert!(asset.transition(Loaded));
    }
}
