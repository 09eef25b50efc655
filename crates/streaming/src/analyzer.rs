//! # Scene Asset Analyzer (reference extraction)
//!
//! Walks a scene description and produces a `LoadingPlan`: a flat,
//! deduplicated asset list with computed priorities and size estimates,
//! grouped into load bundles, with the critical set marked.
//!
//! Analysis is memoized per (scene key, load session): repeated calls
//! for the same scene return the cached plan until the session is
//! advanced or the scene is invalidated.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::Vec3;
use parking_lot::Mutex;

use crate::asset::{AssetKey, AssetKind, AssetReference};
use crate::config::StreamingConfig;
use crate::error::StreamError;
use crate::plan::{AssetBundle, LoadingPlan, SpatialBounds};
use crate::scene::{SceneDescription, SceneEntity, TextureSlot};

// ============================================================================
// Size estimation tables
// ============================================================================

const MODEL_BASELINE_BYTES: u64 = 5 * 1024 * 1024;
const TEXTURE_BASELINE_BYTES: u64 = 2 * 1024 * 1024;
const AUDIO_BASELINE_BYTES: u64 = 1024 * 1024;

const MODEL_PRIORITY: f32 = 0.9;
const AUDIO_PRIORITY: f32 = 0.3;

fn model_size_estimate(locator: &str) -> u64 {
    let multiplier = match extension(locator) {
        Some("glb") => 1.0,
        Some("gltf") => 0.8,
        Some("obj") => 2.0,
        Some("fbx") => 1.5,
        _ => 1.0,
    };
    (MODEL_BASELINE_BYTES as f64 * multiplier) as u64
}

fn texture_size_estimate(locator: &str) -> u64 {
    let stem = locator.rsplit_once('.').map(|(s, _)| s).unwrap_or(locator);
    let multiplier = if stem.ends_with("_4k") {
        16.0
    } else if stem.ends_with("_2k") {
        4.0
    } else if stem.ends_with("_1k") {
        1.0
    } else if stem.ends_with("_512") {
        0.25
    } else {
        1.0
    };
    (TEXTURE_BASELINE_BYTES as f64 * multiplier) as u64
}

fn audio_size_estimate(locator: &str) -> u64 {
    let multiplier = match extension(locator) {
        Some("wav") => 2.0,
        Some("ogg") => 0.5,
        Some("mp3") => 0.6,
        _ => 1.0,
    };
    (AUDIO_BASELINE_BYTES as f64 * multiplier) as u64
}

fn extension(locator: &str) -> Option<&str> {
    locator.rsplit_once('.').map(|(_, ext)| ext)
}

// ============================================================================
// Analyzer
// ============================================================================

type PlanCacheKey = (String, u64);

/// Extracts asset references from scene descriptions.
pub struct SceneAssetAnalyzer {
    config: StreamingConfig,
    cache: Mutex<HashMap<PlanCacheKey, Arc<LoadingPlan>>>,
    /// Monotonically increasing load-session id; part of the memo key so
    /// a new session re-analyzes without racing older cached plans.
    session: AtomicU64,
}

impl SceneAssetAnalyzer {
    pub fn new(config: StreamingConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
            session: AtomicU64::new(0),
        }
    }

    /// Advance to a fresh load session; subsequent analyses re-run.
    pub fn begin_session(&self) -> u64 {
        self.session.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_session(&self) -> u64 {
        self.session.load(Ordering::SeqCst)
    }

    /// Drop the cached plan for a scene in the current session.
    pub fn invalidate(&self, scene_key: &str) {
        let session = self.current_session();
        self.cache.lock().remove(&(scene_key.to_string(), session));
    }

    /// Drop all cached plans.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    /// Analyze a scene into a loading plan. Memoized per scene key and
    /// session; a malformed description is fatal and nothing is cached.
    pub fn analyze(
        &self,
        scene: &SceneDescription,
        project_root: &Path,
    ) -> Result<Arc<LoadingPlan>, StreamError> {
        let cache_key = (scene.name.clone(), self.current_session());
        if let Some(plan) = self.cache.lock().get(&cache_key) {
            tracing::debug!(scene = %scene.name, "returning cached loading plan");
            return Ok(plan.clone());
        }

        tracing::debug!(scene = %scene.name, root = %project_root.display(), "analyzing scene");
        let plan = Arc::new(self.build_plan(scene)?);
        self.cache.lock().insert(cache_key, plan.clone());
        Ok(plan)
    }

    fn build_plan(&self, scene: &SceneDescription) -> Result<LoadingPlan, StreamError> {
        let mut references: HashMap<AssetKey, AssetReference> = HashMap::new();
        let mut seen_ids = HashSet::new();

        for entity in &scene.entities {
            self.collect_entity(entity, None, &mut references, &mut seen_ids)?;
        }

        let mut assets: Vec<AssetReference> = references.into_values().collect();
        // Priority descending; equal priorities load small assets first.
        assets.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then(a.estimated_size_bytes.cmp(&b.estimated_size_bytes))
        });

        let bundles = self.build_bundles(&assets);
        let critical_keys: Vec<AssetKey> = assets
            .iter()
            .filter(|a| a.priority > self.config.critical_threshold)
            .map(|a| a.key.clone())
            .collect();
        let total_size = assets.iter().map(|a| a.estimated_size_bytes).sum();

        tracing::info!(
            scene = %scene.name,
            assets = assets.len(),
            bundles = bundles.len(),
            critical = critical_keys.len(),
            "loading plan built"
        );

        Ok(LoadingPlan { assets, bundles, total_size, critical_keys })
    }

    fn collect_entity(
        &self,
        entity: &SceneEntity,
        inherited_position: Option<Vec3>,
        references: &mut HashMap<AssetKey, AssetReference>,
        seen_ids: &mut HashSet<String>,
    ) -> Result<(), StreamError> {
        if !seen_ids.insert(entity.id.clone()) {
            return Err(StreamError::Analysis(format!("duplicate entity id '{}'", entity.id)));
        }
        let position = entity.position.or(inherited_position);
        if let Some(p) = position {
            if !p.is_finite() {
                return Err(StreamError::Analysis(format!(
                    "entity '{}' has a non-finite position",
                    entity.id
                )));
            }
        }

        if let Some(model) = &entity.model {
            let locator = validated_locator(&entity.id, &model.path)?;
            let reference = AssetReference::new(
                AssetKey::new(AssetKind::Model, locator.clone()),
                MODEL_PRIORITY,
                model_size_estimate(&locator),
            );
            merge_reference(references, position_applied(reference, position));
        }

        if let Some(material) = &entity.material {
            // Secondary slots depend on the material's base color map so
            // the albedo is resolved before detail layers.
            let base_key = material.base_color.as_deref().map(|path| {
                AssetKey::new(AssetKind::Texture, path.to_string())
            });
            for (slot, path) in material.populated_slots() {
                let locator = validated_locator(&entity.id, path)?;
                let mut reference = AssetReference::new(
                    AssetKey::new(AssetKind::Texture, locator.clone()),
                    slot.priority_weight(),
                    texture_size_estimate(&locator),
                );
                if slot != TextureSlot::BaseColor {
                    if let Some(base) = &base_key {
                        if base.locator != locator {
                            reference.dependencies.push(base.clone());
                        }
                    }
                }
                merge_reference(references, position_applied(reference, position));
            }
        }

        if let Some(audio) = &entity.audio {
            let locator = validated_locator(&entity.id, &audio.path)?;
            let reference = AssetReference::new(
                AssetKey::new(AssetKind::Audio, locator.clone()),
                AUDIO_PRIORITY,
                audio_size_estimate(&locator),
            );
            merge_reference(references, position_applied(reference, position));
        }

        for child in &entity.children {
            self.collect_entity(child, position, references, seen_ids)?;
        }
        Ok(())
    }

    /// One bundle per kind for non-spatial assets, plus greedy
    /// proximity-clustered sub-bundles for spatial model/audio assets.
    fn build_bundles(&self, assets: &[AssetReference]) -> Vec<AssetBundle> {
        let mut bundles = Vec::new();

        // Textures batch by kind regardless of placement.
        let mut textures = AssetBundle::new("textures", AssetKind::Texture);
        for asset in assets.iter().filter(|a| a.key.kind == AssetKind::Texture) {
            textures.add_member(asset);
        }
        if !textures.is_empty() {
            bundles.push(textures);
        }

        for kind in [AssetKind::Model, AssetKind::Audio] {
            let (spatial, loose): (Vec<&AssetReference>, Vec<&AssetReference>) = assets
                .iter()
                .filter(|a| a.key.kind == kind)
                .partition(|a| a.spatial_position.is_some());

            let mut catch_all = AssetBundle::new(format!("{kind}s"), kind);
            for asset in loose {
                catch_all.add_member(asset);
            }
            if !catch_all.is_empty() {
                bundles.push(catch_all);
            }

            bundles.extend(self.cluster_spatial(kind, &spatial));
        }

        bundles
    }

    /// Single-pass greedy clustering: take an unprocessed spatial asset,
    /// absorb everything within the proximity threshold, repeat.
    fn cluster_spatial(&self, kind: AssetKind, spatial: &[&AssetReference]) -> Vec<AssetBundle> {
        let mut clusters = Vec::new();
        let mut assigned = vec![false; spatial.len()];

        for i in 0..spatial.len() {
            if assigned[i] {
                continue;
            }
            assigned[i] = true;
            let seed = spatial[i].spatial_position.unwrap();
            let mut bundle =
                AssetBundle::new(format!("{kind}s-cluster-{}", clusters.len()), kind);
            bundle.add_member(spatial[i]);
            let mut points = vec![seed];

            for j in (i + 1)..spatial.len() {
                if assigned[j] {
                    continue;
                }
                let position = spatial[j].spatial_position.unwrap();
                if seed.distance(position) <= self.config.proximity_threshold {
                    assigned[j] = true;
                    bundle.add_member(spatial[j]);
                    points.push(position);
                }
            }

            bundle.spatial_bounds = SpatialBounds::from_points(&points);
            clusters.push(bundle);
        }

        clusters
    }
}

fn validated_locator(entity_id: &str, path: &str) -> Result<String, StreamError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(StreamError::Analysis(format!(
            "entity '{entity_id}' has a blank asset locator"
        )));
    }
    Ok(trimmed.to_string())
}

fn position_applied(reference: AssetReference, position: Option<Vec3>) -> AssetReference {
    match position {
        Some(p) => reference.with_position(p),
        None => reference,
    }
}

/// Dedup merge: dependency union, max priority, first position wins.
fn merge_reference(references: &mut HashMap<AssetKey, AssetReference>, incoming: AssetReference) {
    match references.get_mut(&incoming.key) {
        Some(existing) => {
            existing.priority = existing.priority.max(incoming.priority);
            for dep in incoming.dependencies {
                if !existing.dependencies.contains(&dep) {
                    existing.dependencies.push(dep);
                }
            }
            if existing.spatial_position.is_none() {
                existing.spatial_position = incoming.spatial_position;
            }
        }
        None => {
            references.insert(incoming.key.clone(), incoming);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{AudioRef, MaterialDesc, ModelRef};

    fn analyzer() -> SceneAssetAnalyzer {
        SceneAssetAnalyzer::new(StreamingConfig::default())
    }

    fn entity_with_model(id: &str, path: &str, position: Vec3) -> SceneEntity {
        let mut entity = SceneEntity::new(id);
        entity.position = Some(position);
        entity.model = Some(ModelRef { path: path.into() });
        entity
    }

    #[test]
    fn dedup_keeps_max_priority_and_union_deps() {
        let mut a = SceneEntity::new("a");
        a.material = Some(MaterialDesc {
            base_color: Some("shared.png".into()),
            ..Default::default()
        });
        let mut b = SceneEntity::new("b");
        b.material = Some(MaterialDesc {
            base_color: Some("other.png".into()),
            emissive: Some("shared.png".into()),
            ..Default::default()
        });
        let scene = SceneDescription { name: "s".into(), entities: vec![a, b] };

        let plan = analyzer().analyze(&scene, Path::new(".")).unwrap();
        let shared = plan
            .asset(&AssetKey::new(AssetKind::Texture, "shared.png"))
            .unwrap();
        // BaseColor weight (0.9) beats Emissive (0.4).
        assert_eq!(shared.priority, 0.9);
        // Union carries the emissive usage's dependency on b's base color.
        assert!(shared
            .dependencies
            .contains(&AssetKey::new(AssetKind::Texture, "other.png")));
        assert_eq!(
            plan.assets.iter().filter(|r| r.key.locator == "shared.png").count(),
            1
        );
    }

    #[test]
    fn sorted_by_priority_then_size() {
        let mut e = SceneEntity::new("e");
        e.material = Some(MaterialDesc {
            base_color: Some("big_4k.png".into()),
            normal: Some("n.png".into()),
            sheen: Some("sheen.png".into()),
            ..Default::default()
        });
        e.model = Some(ModelRef { path: "mesh.glb".into() });
        let scene = SceneDescription { name: "s".into(), entities: vec![e] };

        let plan = analyzer().analyze(&scene, Path::new(".")).unwrap();
        for pair in plan.assets.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
            if pair[0].priority == pair[1].priority {
                assert!(pair[0].estimated_size_bytes <= pair[1].estimated_size_bytes);
            }
        }
    }

    #[test]
    fn bundle_sizes_are_member_sums() {
        let scene = SceneDescription {
            name: "s".into(),
            entities: vec![
                entity_with_model("a", "a.glb", Vec3::ZERO),
                entity_with_model("b", "b.obj", Vec3::new(10.0, 0.0, 0.0)),
                entity_with_model("c", "c.glb", Vec3::new(500.0, 0.0, 0.0)),
            ],
        };
        let plan = analyzer().analyze(&scene, Path::new(".")).unwrap();
        for bundle in &plan.bundles {
            let expected: u64 = bundle
                .member_keys
                .iter()
                .map(|k| plan.asset(k).unwrap().estimated_size_bytes)
                .sum();
            assert_eq!(bundle.total_size, expected, "bundle {}", bundle.id);
        }
    }

    #[test]
    fn proximity_clustering_splits_distant_models() {
        let scene = SceneDescription {
            name: "s".into(),
            entities: vec![
                entity_with_model("a", "a.glb", Vec3::ZERO),
                entity_with_model("b", "b.glb", Vec3::new(10.0, 0.0, 0.0)),
                entity_with_model("c", "c.glb", Vec3::new(500.0, 0.0, 0.0)),
            ],
        };
        let plan = analyzer().analyze(&scene, Path::new(".")).unwrap();
        let model_clusters: Vec<_> = plan
            .bundles
            .iter()
            .filter(|b| b.kind == AssetKind::Model)
            .collect();
        assert_eq!(model_clusters.len(), 2);
        assert!(model_clusters.iter().any(|b| b.len() == 2));
        assert!(model_clusters.iter().any(|b| b.len() == 1));
        for bundle in model_clusters {
            assert!(bundle.spatial_bounds.is_some());
        }
    }

    #[test]
    fn critical_set_uses_threshold() {
        let mut e = SceneEntity::new("e");
        e.model = Some(ModelRef { path: "hero.glb".into() });
        e.material = Some(MaterialDesc {
            base_color: Some("albedo.png".into()),
            occlusion: Some("ao.png".into()),
            ..Default::default()
        });
        e.audio = Some(AudioRef { path: "amb.ogg".into() });
        let scene = SceneDescription { name: "s".into(), entities: vec![e] };

        let plan = analyzer().analyze(&scene, Path::new(".")).unwrap();
        assert!(plan.is_critical(&AssetKey::new(AssetKind::Model, "hero.glb")));
        assert!(plan.is_critical(&AssetKey::new(AssetKind::Texture, "albedo.png")));
        assert!(!plan.is_critical(&AssetKey::new(AssetKind::Texture, "ao.png")));
        assert!(!plan.is_critical(&AssetKey::new(AssetKind::Audio, "amb.ogg")));
    }

    #[test]
    fn memoized_until_session_advances() {
        let analyzer = analyzer();
        let scene = SceneDescription {
            name: "s".into(),
            entities: vec![entity_with_model("a", "a.glb", Vec3::ZERO)],
        };
        let first = analyzer.analyze(&scene, Path::new(".")).unwrap();
        let second = analyzer.analyze(&scene, Path::new(".")).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        analyzer.begin_session();
        let third = analyzer.analyze(&scene, Path::new(".")).unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn malformed_scene_aborts_analysis() {
        let mut bad = SceneEntity::new("a");
        bad.model = Some(ModelRef { path: "   ".into() });
        let scene = SceneDescription { name: "s".into(), entities: vec![bad] };
        let err = analyzer().analyze(&scene, Path::new(".")).unwrap_err();
        assert!(err.is_fatal());

        let dup = SceneDescription {
            name: "d".into(),
            entities: vec![
                entity_with_model("same", "a.glb", Vec3::ZERO),
                entity_with_model("same", "b.glb", Vec3::ZERO),
            ],
        };
        assert!(analyzer().analyze(&dup, Path::new(".")).is_err());
    }
}
