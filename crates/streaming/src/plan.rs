//! # Load Bundles and the Loading Plan
//!
//! A `LoadingPlan` is the analyzer's output: the deduplicated asset
//! list (priority-sorted), batching bundles, and the critical set that
//! must be fully loaded before the scene is considered ready.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::asset::{AssetKey, AssetKind, AssetReference};

/// Axis-aligned bounds around a bundle's spatial members.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpatialBounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl SpatialBounds {
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = *points.first()?;
        let mut bounds = Self { min: first, max: first };
        for p in &points[1..] {
            bounds.min = bounds.min.min(*p);
            bounds.max = bounds.max.max(*p);
        }
        Some(bounds)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }
}

/// A unit of batched retrieval: same-kind assets, optionally clustered
/// by spatial proximity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetBundle {
    pub id: String,
    pub kind: AssetKind,
    pub member_keys: Vec<AssetKey>,
    /// Always the sum of the members' `estimated_size_bytes`.
    pub total_size: u64,
    /// Highest member priority; orders bundle retrieval.
    pub priority: f32,
    pub spatial_bounds: Option<SpatialBounds>,
}

impl AssetBundle {
    pub fn new(id: impl Into<String>, kind: AssetKind) -> Self {
        Self {
            id: id.into(),
            kind,
            member_keys: Vec::new(),
            total_size: 0,
            priority: 0.0,
            spatial_bounds: None,
        }
    }

    /// Add a member, keeping `total_size` and `priority` in sync.
    pub fn add_member(&mut self, reference: &AssetReference) {
        self.member_keys.push(reference.key.clone());
        self.total_size += reference.estimated_size_bytes;
        self.priority = self.priority.max(reference.priority);
    }

    pub fn len(&self) -> usize {
        self.member_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_keys.is_empty()
    }
}

/// The full prioritized loading schedule for one scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadingPlan {
    /// Deduplicated references, priority descending then size ascending.
    pub assets: Vec<AssetReference>,
    pub bundles: Vec<AssetBundle>,
    pub total_size: u64,
    /// Assets above the critical threshold; these block scene readiness.
    pub critical_keys: Vec<AssetKey>,
}

impl LoadingPlan {
    pub fn asset(&self, key: &AssetKey) -> Option<&AssetReference> {
        self.assets.iter().find(|a| &a.key == key)
    }

    pub fn is_critical(&self, key: &AssetKey) -> bool {
        self.critical_keys.contains(key)
    }

    /// References in the critical set, in plan order.
    pub fn critical_assets(&self) -> Vec<&AssetReference> {
        self.assets.iter().filter(|a| self.is_critical(&a.key)).collect()
    }

    /// References outside the critical set, in plan order.
    pub fn remaining_assets(&self) -> Vec<&AssetReference> {
        self.assets.iter().filter(|a| !self.is_critical(&a.key)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetKind;

    fn reference(locator: &str, priority: f32, size: u64) -> AssetReference {
        AssetReference::new(AssetKey::new(AssetKind::Texture, locator), priority, size)
    }

    #[test]
    fn bundle_total_size_is_member_sum() {
        let mut bundle = AssetBundle::new("textures", AssetKind::Texture);
        bundle.add_member(&reference("a.png", 0.9, 100));
        bundle.add_member(&reference("b.png", 0.5, 250));
        bundle.add_member(&reference("c.png", 0.7, 50));
        assert_eq!(bundle.total_size, 400);
        assert_eq!(bundle.priority, 0.9);
        assert_eq!(bundle.len(), 3);
    }

    #[test]
    fn bounds_cover_all_points() {
        let bounds = SpatialBounds::from_points(&[
            Vec3::new(-1.0, 0.0, 4.0),
            Vec3::new(3.0, 2.0, -6.0),
        ])
        .unwrap();
        assert_eq!(bounds.min, Vec3::new(-1.0, 0.0, -6.0));
        assert_eq!(bounds.max, Vec3::new(3.0, 2.0, 4.0));
    }
}
