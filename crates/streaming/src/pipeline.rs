//! # Streaming Pipeline Facade
//!
//! Explicitly constructed, dependency-injected entry point: the host
//! editor builds one per open project, hands it a byte provider, and
//! drives it with scene loads and viewpoint updates. No globals; two
//! pipelines in one process never share state.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use glam::Vec3;

use crate::analyzer::SceneAssetAnalyzer;
use crate::asset::AssetKey;
use crate::config::StreamingConfig;
use crate::decode::AssetPayload;
use crate::error::StreamError;
use crate::network::NetworkMonitor;
use crate::plan::LoadingPlan;
use crate::progress::{
    AssetLoadedCallback, CallbackSlots, ErrorCallback, LoadProgress, ProgressCallback,
    ProgressTracker,
};
use crate::registry::{StatusCounts, StreamingRegistry};
use crate::scene::SceneDescription;
use crate::scheduler::{ExecuteOptions, ParallelLoadScheduler};
use crate::source::ByteProvider;

/// Outcome of a `load_scene` call: the plan that was executed and the
/// payloads that settled before the call returned. With progressive
/// loading the map holds at least the critical set; the rest streams
/// through `on_asset_loaded`.
#[derive(Debug)]
pub struct SceneLoadReport {
    pub plan: Arc<LoadingPlan>,
    pub loaded: HashMap<AssetKey, Arc<AssetPayload>>,
}

/// One streaming pipeline per project.
pub struct StreamingPipeline {
    config: StreamingConfig,
    analyzer: SceneAssetAnalyzer,
    registry: Arc<StreamingRegistry>,
    monitor: Arc<NetworkMonitor>,
    callbacks: Arc<CallbackSlots>,
    progress: Arc<ProgressTracker>,
    scheduler: ParallelLoadScheduler,
}

impl StreamingPipeline {
    pub fn new(config: StreamingConfig, provider: Arc<dyn ByteProvider>) -> Self {
        Self::with_monitor(config, provider, Arc::new(NetworkMonitor::new()))
    }

    /// Construct with an externally owned monitor, e.g. one fed by the
    /// host platform's downlink signal.
    pub fn with_monitor(
        config: StreamingConfig,
        provider: Arc<dyn ByteProvider>,
        monitor: Arc<NetworkMonitor>,
    ) -> Self {
        let registry = Arc::new(StreamingRegistry::new(config.clone(), monitor.clone()));
        let callbacks = Arc::new(CallbackSlots::default());
        let progress = Arc::new(ProgressTracker::default());
        let scheduler = ParallelLoadScheduler::new(
            provider,
            registry.clone(),
            monitor.clone(),
            callbacks.clone(),
            progress.clone(),
        );
        Self {
            analyzer: SceneAssetAnalyzer::new(config.clone()),
            config,
            registry,
            monitor,
            callbacks,
            progress,
            scheduler,
        }
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    pub fn set_on_progress(&self, callback: ProgressCallback) {
        self.callbacks.set_on_progress(callback);
    }

    pub fn set_on_asset_loaded(&self, callback: AssetLoadedCallback) {
        self.callbacks.set_on_asset_loaded(callback);
    }

    pub fn set_on_error(&self, callback: ErrorCallback) {
        self.callbacks.set_on_error(callback);
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Analyze, register, and execute a scene load. Critical assets have
    /// settled by the time this returns; a malformed scene fails the
    /// whole call before anything is fetched.
    pub async fn load_scene(
        &self,
        scene: &SceneDescription,
        project_root: &Path,
        options: ExecuteOptions,
    ) -> Result<SceneLoadReport, StreamError> {
        self.analyzer.begin_session();
        self.progress.begin(0);
        self.callbacks.emit_progress(&self.progress.snapshot());

        let plan = self.analyzer.analyze(scene, project_root)?;
        self.registry.register_plan(&plan);

        let loaded = self.scheduler.execute(&plan, project_root, options).await?;
        Ok(SceneLoadReport { plan, loaded })
    }

    /// Load a scene with options derived from the pipeline's config.
    pub async fn load_scene_default(
        &self,
        scene: &SceneDescription,
        project_root: &Path,
    ) -> Result<SceneLoadReport, StreamError> {
        self.load_scene(scene, project_root, ExecuteOptions::from(&self.config))
            .await
    }

    /// Re-attempt one previously failed asset.
    pub async fn retry_asset(
        &self,
        plan: &LoadingPlan,
        project_root: &Path,
        key: &AssetKey,
    ) -> Result<Arc<AssetPayload>, StreamError> {
        self.scheduler
            .retry(plan, project_root, key, ExecuteOptions::from(&self.config))
            .await
    }

    // ------------------------------------------------------------------
    // Steady-state streaming
    // ------------------------------------------------------------------

    /// Feed a camera movement into the registry's priority, queueing,
    /// and eviction pass.
    pub fn update_viewpoint(&self, viewpoint: Vec3) {
        self.registry.update_viewpoint(viewpoint);
    }

    /// Load the highest-priority assets the registry has queued since
    /// the last viewpoint update. One batch per call, sized to the
    /// current concurrency ceiling; returns how many were taken.
    pub async fn stream_queued(&self, project_root: &Path) -> usize {
        let options = ExecuteOptions::from(&self.config);
        let batch = options
            .max_concurrent_loads
            .min(self.registry.concurrency_ceiling())
            .max(1);
        let keys = self.registry.take_next_queued(batch);
        self.scheduler.load_queued(keys, project_root, options).await
    }

    pub fn get_loaded_assets(&self) -> HashMap<AssetKey, Arc<AssetPayload>> {
        self.scheduler.get_loaded_assets()
    }

    pub fn get_failed_assets(&self) -> HashMap<AssetKey, StreamError> {
        self.scheduler.get_failed_assets()
    }

    pub fn status(&self) -> StatusCounts {
        self.registry.get_status()
    }

    pub fn progress(&self) -> LoadProgress {
        self.progress.snapshot()
    }

    pub fn registry(&self) -> &Arc<StreamingRegistry> {
        &self.registry
    }

    pub fn network(&self) -> &Arc<NetworkMonitor> {
        &self.monitor
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Cancel all in-flight loading. Idempotent; the pipeline remains
    /// usable afterwards.
    pub fn cancel_loading(&self) {
        self.scheduler.cancel_all();
    }

    /// Full teardown: cancel, release payload maps, drop callbacks,
    /// forget cached plans. After this no callback fires again.
    pub fn dispose(&self) {
        self.scheduler.cancel_all();
        self.scheduler.clear();
        self.registry.clear();
        self.callbacks.clear();
        self.analyzer.clear();
        tracing::info!("pipeline disposed");
    }
}
