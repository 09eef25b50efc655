//! # Atrium Streaming
//!
//! Asset streaming pipeline for the Atrium scene editor: analyzes scene
//! descriptions into prioritized loading plans, loads assets in parallel
//! under a bandwidth-aware concurrency bound, and streams state through
//! typed callbacks while the camera moves.
//!
//! ## Modules
//!
//! - `analyzer`: Scene walk producing deduplicated loading plans
//! - `asset`: Asset identity, references, and the lifecycle state machine
//! - `config`: TOML-backed streaming configuration
//! - `decode`: Payload decoding (textures, models, audio) and placeholders
//! - `error`: Pipeline error taxonomy
//! - `network`: Bandwidth estimation and adaptive tiers
//! - `pipeline`: The dependency-injected facade the editor drives
//! - `plan`: Loading plans, bundles, and spatial bounds
//! - `progress`: Phase/progress reporting and callback slots
//! - `registry`: Per-asset state, spatial queueing, eviction
//! - `scene`: The scene description the editor hands us
//! - `scheduler`: Bounded parallel plan execution
//! - `source`: The byte-retrieval seam (`ByteProvider`)
//!
//! ## Architecture
//!
//! - **Analyze**: `SceneAssetAnalyzer` turns a scene tree into a
//!   `LoadingPlan` (flat, deduplicated, priority-sorted, bundled)
//! - **Schedule**: `ParallelLoadScheduler` drains the critical set first,
//!   then the remainder, never exceeding the tier's concurrency ceiling
//! - **Stream**: `StreamingRegistry` requeues and evicts as the viewpoint
//!   moves; `NetworkMonitor` adapts quality and ceilings to bandwidth

pub mod analyzer;
pub mod asset;
pub mod config;
pub mod decode;
pub mod error;
pub mod network;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod registry;
pub mod scene;
pub mod scheduler;
pub mod source;

pub use analyzer::SceneAssetAnalyzer;
pub use asset::{AssetKey, AssetKind, AssetReference, AssetState, StreamingAsset};
pub use config::{PriorityZone, StreamingConfig};
pub use decode::{AssetPayload, AudioPayload, ModelPayload, TexturePayload};
pub use error::StreamError;
pub use network::{BandwidthTier, NetworkMonitor};
pub use pipeline::{SceneLoadReport, StreamingPipeline};
pub use plan::{AssetBundle, LoadingPlan, SpatialBounds};
pub use progress::{CallbackSlots, LoadPhase, LoadProgress, ProgressTracker};
pub use registry::{RegistryStats, StatusCounts, StreamingRegistry};
pub use scene::{
    AudioRef, MaterialDesc, ModelRef, SceneDescription, SceneEntity, TextureSlot,
};
pub use scheduler::{ExecuteOptions, ParallelLoadScheduler};
pub use source::{ByteProvider, FsByteProvider, MemoryByteProvider};
