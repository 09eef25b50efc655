//! # Scene Description (consumed interface)
//!
//! The editor's state store hands the pipeline a tree of entities, each
//! optionally carrying a model path, a set of texture-bearing material
//! slots, and an audio path, plus a spatial position used for priority
//! and eviction decisions.
//!
//! Entity payloads are closed structs per concern (model / material /
//! audio) resolved once at analysis time, not duck-typed property bags
//! re-inspected downstream.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Root scene description, RON on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneDescription {
    pub name: String,
    pub entities: Vec<SceneEntity>,
}

/// One entity in the scene tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneEntity {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// World position; `None` for purely logical entities.
    #[serde(default)]
    pub position: Option<Vec3>,
    #[serde(default)]
    pub model: Option<ModelRef>,
    #[serde(default)]
    pub material: Option<MaterialDesc>,
    #[serde(default)]
    pub audio: Option<AudioRef>,
    #[serde(default)]
    pub children: Vec<SceneEntity>,
}

impl SceneEntity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            position: None,
            model: None,
            material: None,
            audio: None,
            children: Vec::new(),
        }
    }
}

/// Reference to a 3D model file, relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRef {
    pub path: String,
}

/// Reference to an audio file, relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioRef {
    pub path: String,
}

/// Material description: one optional texture locator per slot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterialDesc {
    #[serde(default)]
    pub base_color: Option<String>,
    #[serde(default)]
    pub normal: Option<String>,
    #[serde(default)]
    pub metallic_roughness: Option<String>,
    #[serde(default)]
    pub occlusion: Option<String>,
    #[serde(default)]
    pub emissive: Option<String>,
    #[serde(default)]
    pub clearcoat: Option<String>,
    #[serde(default)]
    pub transmission: Option<String>,
    #[serde(default)]
    pub sheen: Option<String>,
    #[serde(default)]
    pub iridescence: Option<String>,
}

impl MaterialDesc {
    /// Populated slots with their locators, in slot-priority order.
    pub fn populated_slots(&self) -> Vec<(TextureSlot, &str)> {
        use TextureSlot::*;
        [
            (BaseColor, &self.base_color),
            (Normal, &self.normal),
            (MetallicRoughness, &self.metallic_roughness),
            (Occlusion, &self.occlusion),
            (Emissive, &self.emissive),
            (Clearcoat, &self.clearcoat),
            (Transmission, &self.transmission),
            (Sheen, &self.sheen),
            (Iridescence, &self.iridescence),
        ]
        .into_iter()
        .filter_map(|(slot, path)| path.as_deref().map(|p| (slot, p)))
        .collect()
    }
}

/// Texture-bearing material slots, base color first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureSlot {
    BaseColor,
    Normal,
    MetallicRoughness,
    Occlusion,
    Emissive,
    Clearcoat,
    Transmission,
    Sheen,
    Iridescence,
}

impl TextureSlot {
    /// Slot-specific load priority weight. Base color dominates visual
    /// fidelity; the exotic PBR slots barely register at a distance.
    pub fn priority_weight(self) -> f32 {
        match self {
            TextureSlot::BaseColor => 0.9,
            TextureSlot::Normal => 0.85,
            TextureSlot::MetallicRoughness => 0.6,
            TextureSlot::Occlusion => 0.5,
            TextureSlot::Emissive => 0.4,
            TextureSlot::Clearcoat => 0.3,
            TextureSlot::Transmission => 0.3,
            TextureSlot::Sheen => 0.25,
            TextureSlot::Iridescence => 0.2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populated_slots_skip_empty() {
        let material = MaterialDesc {
            base_color: Some("wall_albedo.png".into()),
            normal: Some("wall_normal.png".into()),
            ..Default::default()
        };
        let slots = material.populated_slots();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].0, TextureSlot::BaseColor);
        assert_eq!(slots[1].0, TextureSlot::Normal);
    }

    #[test]
    fn scene_ron_roundtrip() {
        let mut entity = SceneEntity::new("crate-1");
        entity.position = Some(Vec3::new(4.0, 0.0, -2.0));
        entity.model = Some(ModelRef { path: "props/crate.glb".into() });
        let scene = SceneDescription { name: "dock".into(), entities: vec![entity] };

        let text = ron::to_string(&scene).unwrap();
        let back: SceneDescription = ron::from_str(&text).unwrap();
        assert_eq!(back.name, "dock");
        assert_eq!(back.entities.len(), 1);
        assert_eq!(back.entities[0].model.as_ref().unwrap().path, "props/crate.glb");
    }
}
