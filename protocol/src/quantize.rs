//! Fixed-point quantization applied at encode time and reversed at decode
//! time. Positions/rotations/scale/volume are carried on the wire as
//! integers so every implementation agrees on rounding behavior.

/// Positions are quantized to 1/100 m.
const POSITION_SCALE: f64 = 100.0;
/// Rotations are quantized to 1/1000 rad.
const ROTATION_SCALE: f64 = 1000.0;
/// Visual scale is quantized to 1/1000.
const SCALE_SCALE: f64 = 1000.0;
/// World volume is quantized to 1/100 m^3.
const VOLUME_SCALE: f64 = 100.0;

/// Replaces non-finite input (NaN, +-Inf) with `0.0`, as required for
/// out-of-range numeric fields before quantizing.
fn sanitize(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

pub fn quantize_position(value: f64) -> i32 {
    (sanitize(value) * POSITION_SCALE).round() as i32
}

pub fn dequantize_position(ticks: i32) -> f64 {
    ticks as f64 / POSITION_SCALE
}

pub fn quantize_rotation(value: f64) -> i32 {
    (sanitize(value) * ROTATION_SCALE).round() as i32
}

pub fn dequantize_rotation(ticks: i32) -> f64 {
    ticks as f64 / ROTATION_SCALE
}

pub fn quantize_scale(value: f64) -> i32 {
    (sanitize(value) * SCALE_SCALE).round() as i32
}

pub fn dequantize_scale(ticks: i32) -> f64 {
    ticks as f64 / SCALE_SCALE
}

/// Clamps to `[1, 1000]` (replacing non-finite input with the minimum)
/// before quantizing, so a malicious or buggy peer can never smuggle a
/// negative or unbounded volume onto the wire.
pub fn quantize_volume(value: f64) -> u32 {
    let finite = if value.is_finite() { value } else { 1.0 };
    let clamped = finite.clamp(1.0, 1000.0);
    (clamped * VOLUME_SCALE).round() as u32
}

pub fn dequantize_volume(ticks: u32) -> f64 {
    (ticks as f64 / VOLUME_SCALE).clamp(1.0, 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_round_trips_at_two_decimals() {
        let ticks = quantize_position(12.345);
        assert_eq!(ticks, 1235);
        assert!((dequantize_position(ticks) - 12.35).abs() < 1e-9);
    }

    #[test]
    fn non_finite_position_clamps_to_zero() {
        assert_eq!(quantize_position(f64::NAN), 0);
        assert_eq!(quantize_position(f64::INFINITY), 0);
    }

    #[test]
    fn volume_clamps_into_range_before_quantizing() {
        assert_eq!(dequantize_volume(quantize_volume(-5.0)), 1.0);
        assert_eq!(dequantize_volume(quantize_volume(5000.0)), 1000.0);
        assert_eq!(dequantize_volume(quantize_volume(f64::NAN)), 1.0);
    }
}
