//! # Payload Decoding
//!
//! Turns fetched bytes into the in-memory representation for each asset
//! kind, plus placeholder synthesis for failed loads.
//!
//! Decoding can run on the blocking worker pool or inline on the caller
//! thread; the two paths produce identical results, so the fallback is
//! transparent to callers. The strategy is an explicit argument chosen
//! at call time, not a runtime capability probe.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::asset::AssetKind;
use crate::error::StreamError;

// ============================================================================
// Payload types
// ============================================================================

/// Decoded RGBA texture.
#[derive(Debug, Clone)]
pub struct TexturePayload {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub placeholder: bool,
}

/// Model container formats the decoder recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFormat {
    Glb,
    Gltf,
    Obj,
}

/// Validated model payload. The pipeline does not build GPU meshes; it
/// characterizes the model and hands the bytes to the renderer.
#[derive(Debug, Clone)]
pub struct ModelPayload {
    pub format: ModelFormat,
    pub mesh_count: usize,
    pub node_count: usize,
    pub vertex_count: usize,
    pub bytes: Vec<u8>,
    pub placeholder: bool,
}

/// Decoded (or validated) audio payload.
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub channels: u16,
    pub sample_rate: u32,
    pub duration_ms: u64,
    pub bytes: Vec<u8>,
    pub placeholder: bool,
}

/// Any decoded asset payload.
#[derive(Debug, Clone)]
pub enum AssetPayload {
    Texture(TexturePayload),
    Model(ModelPayload),
    Audio(AudioPayload),
}

impl AssetPayload {
    pub fn kind(&self) -> AssetKind {
        match self {
            AssetPayload::Texture(_) => AssetKind::Texture,
            AssetPayload::Model(_) => AssetKind::Model,
            AssetPayload::Audio(_) => AssetKind::Audio,
        }
    }

    /// In-memory footprint of the payload.
    pub fn size_bytes(&self) -> usize {
        match self {
            AssetPayload::Texture(t) => t.rgba.len(),
            AssetPayload::Model(m) => m.bytes.len(),
            AssetPayload::Audio(a) => a.bytes.len(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        match self {
            AssetPayload::Texture(t) => t.placeholder,
            AssetPayload::Model(m) => m.placeholder,
            AssetPayload::Audio(a) => a.placeholder,
        }
    }
}

// ============================================================================
// Decode entry points
// ============================================================================

/// Where decode work runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// Offload to the blocking worker pool, falling back to the caller
    /// thread if the pool rejects the task.
    WorkerPool,
    /// Decode inline on the calling task.
    CallerThread,
}

/// Decode `bytes` as `kind`, on the requested strategy.
pub async fn decode_with_strategy(
    strategy: DecodeStrategy,
    kind: AssetKind,
    locator: &str,
    bytes: Vec<u8>,
) -> Result<Arc<AssetPayload>, StreamError> {
    match strategy {
        DecodeStrategy::CallerThread => decode(kind, locator, &bytes).map(Arc::new),
        DecodeStrategy::WorkerPool => {
            let owned_locator = locator.to_string();
            let pooled_bytes = bytes.clone();
            let task =
                tokio::task::spawn_blocking(move || decode(kind, &owned_locator, &pooled_bytes));
            match task.await {
                Ok(result) => result.map(Arc::new),
                Err(join_err) => {
                    // Pool unavailable or the task was cancelled under us;
                    // the caller thread can always do the work itself.
                    tracing::warn!(%locator, error = %join_err, "worker decode unavailable, falling back to caller thread");
                    decode(kind, locator, &bytes).map(Arc::new)
                }
            }
        }
    }
}

/// Synchronous decode dispatch.
pub fn decode(kind: AssetKind, locator: &str, bytes: &[u8]) -> Result<AssetPayload, StreamError> {
    match kind {
        AssetKind::Texture => decode_texture(locator, bytes).map(AssetPayload::Texture),
        AssetKind::Model => decode_model(locator, bytes).map(AssetPayload::Model),
        AssetKind::Audio => decode_audio(locator, bytes).map(AssetPayload::Audio),
    }
}

fn decode_error(locator: &str, reason: impl Into<String>) -> StreamError {
    StreamError::Decode { locator: locator.to_string(), reason: reason.into() }
}

// ============================================================================
// Texture
// ============================================================================

fn decode_texture(locator: &str, bytes: &[u8]) -> Result<TexturePayload, StreamError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| decode_error(locator, e.to_string()))?;
    let rgba = decoded.to_rgba8();
    Ok(TexturePayload {
        width: rgba.width(),
        height: rgba.height(),
        rgba: rgba.into_raw(),
        placeholder: false,
    })
}

// ============================================================================
// Model
// ============================================================================

const GLB_MAGIC: &[u8; 4] = b"glTF";
const GLB_CHUNK_JSON: u32 = 0x4E4F_534A;

fn decode_model(locator: &str, bytes: &[u8]) -> Result<ModelPayload, StreamError> {
    if bytes.starts_with(GLB_MAGIC) {
        return decode_glb(locator, bytes);
    }
    if bytes.first() == Some(&b'{') {
        return decode_gltf_json(locator, bytes);
    }
    // OBJ is plain text; anything else is not a model we understand.
    let text = std::str::from_utf8(bytes)
        .map_err(|_| decode_error(locator, "not a recognized model container"))?;
    decode_obj(locator, text, bytes)
}

fn decode_glb(locator: &str, bytes: &[u8]) -> Result<ModelPayload, StreamError> {
    if bytes.len() < 20 {
        return Err(decode_error(locator, "GLB truncated before header"));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != 2 {
        return Err(decode_error(locator, format!("unsupported GLB version {version}")));
    }
    let declared_len = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    if declared_len > bytes.len() {
        return Err(decode_error(locator, "GLB length field exceeds payload"));
    }

    // First chunk must be the JSON document.
    let chunk_len = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;
    let chunk_type = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    if chunk_type != GLB_CHUNK_JSON || bytes.len() < 20 + chunk_len {
        return Err(decode_error(locator, "GLB missing JSON chunk"));
    }
    let doc: serde_json::Value = serde_json::from_slice(&bytes[20..20 + chunk_len])
        .map_err(|e| decode_error(locator, format!("GLB JSON chunk: {e}")))?;

    let (mesh_count, node_count, vertex_count) = gltf_stats(&doc);
    Ok(ModelPayload {
        format: ModelFormat::Glb,
        mesh_count,
        node_count,
        vertex_count,
        bytes: bytes.to_vec(),
        placeholder: false,
    })
}

fn decode_gltf_json(locator: &str, bytes: &[u8]) -> Result<ModelPayload, StreamError> {
    let doc: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| decode_error(locator, e.to_string()))?;
    if doc.get("asset").is_none() {
        return Err(decode_error(locator, "JSON is not a glTF document"));
    }
    let (mesh_count, node_count, vertex_count) = gltf_stats(&doc);
    Ok(ModelPayload {
        format: ModelFormat::Gltf,
        mesh_count,
        node_count,
        vertex_count,
        bytes: bytes.to_vec(),
        placeholder: false,
    })
}

fn gltf_stats(doc: &serde_json::Value) -> (usize, usize, usize) {
    let count = |key: &str| doc.get(key).and_then(|v| v.as_array()).map_or(0, |a| a.len());
    // Vertex counts live in accessors; sum POSITION accessor counts.
    let vertex_count = doc
        .get("accessors")
        .and_then(|v| v.as_array())
        .map_or(0, |accessors| {
            accessors
                .iter()
                .filter(|a| a.get("type").and_then(|t| t.as_str()) == Some("VEC3"))
                .filter_map(|a| a.get("count").and_then(|c| c.as_u64()))
                .sum::<u64>() as usize
        });
    (count("meshes"), count("nodes"), vertex_count)
}

fn decode_obj(locator: &str, text: &str, bytes: &[u8]) -> Result<ModelPayload, StreamError> {
    let mut vertex_count = 0usize;
    let mut face_count = 0usize;
    for line in text.lines() {
        if line.starts_with("v ") {
            vertex_count += 1;
        } else if line.starts_with("f ") {
            face_count += 1;
        }
    }
    if vertex_count == 0 && face_count == 0 {
        return Err(decode_error(locator, "no OBJ geometry found"));
    }
    Ok(ModelPayload {
        format: ModelFormat::Obj,
        mesh_count: 1,
        node_count: 1,
        vertex_count,
        bytes: bytes.to_vec(),
        placeholder: false,
    })
}

// ============================================================================
// Audio
// ============================================================================

fn decode_audio(locator: &str, bytes: &[u8]) -> Result<AudioPayload, StreamError> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return decode_wav(locator, bytes);
    }
    // Compressed formats pass through validated but undecoded; the audio
    // backend owns full decode.
    if bytes.starts_with(b"OggS") || bytes.starts_with(b"ID3") {
        return Ok(AudioPayload {
            channels: 0,
            sample_rate: 0,
            duration_ms: 0,
            bytes: bytes.to_vec(),
            placeholder: false,
        });
    }
    Err(decode_error(locator, "not a recognized audio container"))
}

fn decode_wav(locator: &str, bytes: &[u8]) -> Result<AudioPayload, StreamError> {
    let mut channels = 0u16;
    let mut sample_rate = 0u32;
    let mut bits_per_sample = 0u16;
    let mut data_len = 0usize;

    let mut offset = 12;
    while offset + 8 <= bytes.len() {
        let chunk_id = &bytes[offset..offset + 4];
        let chunk_len = u32::from_le_bytes(bytes[offset + 4..offset + 8].try_into().unwrap()) as usize;
        let body = offset + 8;
        match chunk_id {
            b"fmt " if body + 16 <= bytes.len() => {
                channels = u16::from_le_bytes(bytes[body + 2..body + 4].try_into().unwrap());
                sample_rate = u32::from_le_bytes(bytes[body + 4..body + 8].try_into().unwrap());
                bits_per_sample = u16::from_le_bytes(bytes[body + 14..body + 16].try_into().unwrap());
            }
            b"data" => {
                data_len = chunk_len.min(bytes.len().saturating_sub(body));
            }
            _ => {}
        }
        // Chunks are word-aligned.
        offset = body + chunk_len + (chunk_len & 1);
    }

    if channels == 0 || sample_rate == 0 || bits_per_sample == 0 {
        return Err(decode_error(locator, "WAV missing fmt chunk"));
    }
    let bytes_per_frame = channels as usize * (bits_per_sample as usize / 8);
    let frames = if bytes_per_frame == 0 { 0 } else { data_len / bytes_per_frame };
    let duration_ms = (frames as u64 * 1000) / sample_rate as u64;

    Ok(AudioPayload {
        channels,
        sample_rate,
        duration_ms,
        bytes: bytes.to_vec(),
        placeholder: false,
    })
}

// ============================================================================
// Placeholders
// ============================================================================

/// Synthesize a minimal stand-in payload for a failed or skipped asset,
/// so downstream consumers always receive *some* value per planned key.
pub fn placeholder_for(kind: AssetKind) -> AssetPayload {
    match kind {
        // Solid mid-gray pixel.
        AssetKind::Texture => AssetPayload::Texture(TexturePayload {
            width: 1,
            height: 1,
            rgba: vec![128, 128, 128, 255],
            placeholder: true,
        }),
        // Unit box: 8 corners, 12 triangles.
        AssetKind::Model => AssetPayload::Model(ModelPayload {
            format: ModelFormat::Obj,
            mesh_count: 1,
            node_count: 1,
            vertex_count: 8,
            bytes: unit_box_obj().into_bytes(),
            placeholder: true,
        }),
        // 100 ms of mono silence at 44.1 kHz, 16-bit.
        AssetKind::Audio => AssetPayload::Audio(AudioPayload {
            channels: 1,
            sample_rate: 44_100,
            duration_ms: 100,
            bytes: vec![0u8; 4_410 * 2],
            placeholder: true,
        }),
    }
}

fn unit_box_obj() -> String {
    let mut obj = String::from("o placeholder_box\n");
    for z in [0.0, 1.0] {
        for y in [0.0, 1.0] {
            for x in [0.0, 1.0] {
                obj.push_str(&format!("v {x} {y} {z}\n"));
            }
        }
    }
    // Two triangles per face, CCW winding.
    for face in [
        [1, 2, 4, 3], // z = 0
        [5, 7, 8, 6], // z = 1
        [1, 5, 6, 2], // y = 0
        [3, 4, 8, 7], // y = 1
        [1, 3, 7, 5], // x = 0
        [2, 6, 8, 4], // x = 1
    ] {
        obj.push_str(&format!("f {} {} {}\n", face[0], face[1], face[2]));
        obj.push_str(&format!("f {} {} {}\n", face[0], face[2], face[3]));
    }
    obj
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let mut buffer = Vec::new();
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]));
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn tiny_wav() -> Vec<u8> {
        let mut wav = Vec::new();
        let data: Vec<u8> = vec![0u8; 88]; // 44 mono 16-bit frames
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&(36u32 + data.len() as u32).to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
        wav.extend_from_slice(&1u16.to_le_bytes()); // mono
        wav.extend_from_slice(&44_100u32.to_le_bytes());
        wav.extend_from_slice(&88_200u32.to_le_bytes()); // byte rate
        wav.extend_from_slice(&2u16.to_le_bytes()); // block align
        wav.extend_from_slice(&16u16.to_le_bytes()); // bits
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&(data.len() as u32).to_le_bytes());
        wav.extend_from_slice(&data);
        wav
    }

    #[test]
    fn texture_decodes_to_rgba() {
        let payload = decode(AssetKind::Texture, "red.png", &tiny_png()).unwrap();
        match payload {
            AssetPayload::Texture(t) => {
                assert_eq!((t.width, t.height), (2, 2));
                assert_eq!(t.rgba.len(), 16);
                assert!(!t.placeholder);
            }
            other => panic!("expected texture, got {:?}", other.kind()),
        }
    }

    #[test]
    fn garbage_texture_is_decode_error() {
        let err = decode(AssetKind::Texture, "junk.png", b"not an image").unwrap_err();
        assert!(matches!(err, StreamError::Decode { .. }));
    }

    #[test]
    fn obj_vertex_scan() {
        let obj = b"v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        let payload = decode(AssetKind::Model, "tri.obj", obj).unwrap();
        match payload {
            AssetPayload::Model(m) => {
                assert_eq!(m.format, ModelFormat::Obj);
                assert_eq!(m.vertex_count, 3);
            }
            other => panic!("expected model, got {:?}", other.kind()),
        }
    }

    #[test]
    fn wav_header_parse() {
        let payload = decode(AssetKind::Audio, "beep.wav", &tiny_wav()).unwrap();
        match payload {
            AssetPayload::Audio(a) => {
                assert_eq!(a.channels, 1);
                assert_eq!(a.sample_rate, 44_100);
                assert_eq!(a.duration_ms, 0); // 44 frames rounds to 0 ms
            }
            other => panic!("expected audio, got {:?}", other.kind()),
        }
    }

    #[test]
    fn placeholders_match_kind() {
        for kind in [AssetKind::Texture, AssetKind::Model, AssetKind::Audio] {
            let payload = placeholder_for(kind);
            assert_eq!(payload.kind(), kind);
            assert!(payload.is_placeholder());
            assert!(payload.size_bytes() > 0);
        }
    }

    #[test]
    fn placeholder_box_is_valid_obj() {
        let obj = unit_box_obj();
        let payload = decode(AssetKind::Model, "box.obj", obj.as_bytes()).unwrap();
        match payload {
            AssetPayload::Model(m) => {
                assert_eq!(m.vertex_count, 8);
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn strategies_agree() {
        let bytes = tiny_png();
        let pooled = decode_with_strategy(DecodeStrategy::WorkerPool, AssetKind::Texture, "a.png", bytes.clone())
            .await
            .unwrap();
        let inline = decode_with_strategy(DecodeStrategy::CallerThread, AssetKind::Texture, "a.png", bytes)
            .await
            .unwrap();
        match (pooled.as_ref(), inline.as_ref()) {
            (AssetPayload::Texture(a), AssetPayload::Texture(b)) => {
                assert_eq!(a.rgba, b.rgba);
            }
            _ => unreachable!(),
        }
    }
}
