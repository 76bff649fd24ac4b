//! Quantized on-the-wire mirrors of the semantic types in [`crate::types`].
//! Only fields that carry continuous numeric values (position, rotation,
//! scale, volume) get a wire counterpart; everything else (strings, opaque
//! payloads, enums) travels through postcard as-is.

use serde::{Deserialize, Serialize};

use crate::quantize::{
    dequantize_position, dequantize_rotation, dequantize_scale, dequantize_volume,
    quantize_position, quantize_rotation, quantize_scale, quantize_volume,
};
use crate::types::{Transform, WorldVolume};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WireTransform {
    pub px: i32,
    pub py: i32,
    pub pz: i32,
    pub rx: i32,
    pub ry: i32,
    pub rz: i32,
    pub scale: i32,
}

impl From<Transform> for WireTransform {
    fn from(t: Transform) -> Self {
        WireTransform {
            px: quantize_position(t.pos[0]),
            py: quantize_position(t.pos[1]),
            pz: quantize_position(t.pos[2]),
            rx: quantize_rotation(t.rot[0]),
            ry: quantize_rotation(t.rot[1]),
            rz: quantize_rotation(t.rot[2]),
            scale: quantize_scale(t.visual_scale),
        }
    }
}

impl From<WireTransform> for Transform {
    fn from(w: WireTransform) -> Self {
        Transform {
            pos: [
                dequantize_position(w.px),
                dequantize_position(w.py),
                dequantize_position(w.pz),
            ],
            rot: [
                dequantize_rotation(w.rx),
                dequantize_rotation(w.ry),
                dequantize_rotation(w.rz),
            ],
            visual_scale: dequantize_scale(w.scale),
        }
    }
}

pub fn quantize_volume_field(v: WorldVolume) -> u32 {
    quantize_volume(v.0)
}

pub fn dequantize_volume_field(ticks: u32) -> WorldVolume {
    WorldVolume(dequantize_volume(ticks))
}

/// One entry inside a [`crate::frame::Frame::BatchPositions`] broadcast.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WireBatchEntry {
    pub id: u32,
    pub transform: WireTransform,
    pub volume: Option<u32>,
}
