//! Viridis colour map
//!
//! An approximation of matplotlib's 256-entry viridis table: ten evenly
//! spaced stops with linear interpolation between them. Both ends match the
//! table truncated to 8 bits. Colours in between may differ from the full
//! table by a few levels per channel (`0.5` gives `[35, 144, 140]` where the
//! table gives `[32, 144, 140]`).

/// Ten evenly spaced viridis stops, low to high
const VIRIDIS: [[u8; 3]; 10] = [
    [0x44, 0x01, 0x54],
    [0x48, 0x28, 0x78],
    [0x3E, 0x4A, 0x89],
    [0x31, 0x68, 0x8E],
    [0x26, 0x82, 0x8E],
    [0x1F, 0x9E, 0x89],
    [0x35, 0xB7, 0x79],
    [0x6D, 0xCD, 0x59],
    [0xB4, 0xDE, 0x2C],
    [0xFD, 0xE7, 0x24],
];

/// Colour for zero uncertainty
pub const ZERO_COLOR: [u8; 3] = VIRIDIS[0];

/// Map a value in [0, 1] to RGB by linear interpolation between stops.
/// Out-of-range values are clamped and NaN maps to the zero colour.
pub fn viridis(value: f32) -> [u8; 3] {
    if value.is_nan() {
        return ZERO_COLOR;
    }
    let t = value.clamp(0.0, 1.0) * (VIRIDIS.len() - 1) as f32;
    let lower = (t.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = t - lower as f32;

    let a = VIRIDIS[lower];
    let b = VIRIDIS[lower + 1];
    let mut rgb = [0u8; 3];
    for c in 0..3 {
        let mixed = f32::from(a[c]) + (f32::from(b[c]) - f32::from(a[c])) * frac;
        rgb[c] = mixed.round() as u8;
    }
    rgb
}
