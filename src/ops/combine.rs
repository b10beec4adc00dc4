// ============================================================================
// PIXEL COMBINER — one destination row from a background row, a foreground
// row and an optional mask row
// ============================================================================

use crate::buffer::{Colormap, Encoding};
use crate::ops::blend::{
    color_erase, dissolve_noise, int_blend, int_mult, int_mult3, BlendMode, ModeClass,
};

/// Which specialised routine combines a (destination, source) encoding pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CombinationMode {
    IndexedIndexed,
    IndexedIndexedA,
    IndexedAIndexedA,
    IntenAIndexed,
    IntenAIndexedA,
    IntenIntenA,
    IntenAInten,
    IntenInten,
    IntenAIntenA,
    IntenAChannelMask,
    IntenAChannelSelection,
    /// No routine exists for the pairing.
    Invalid,
}

impl CombinationMode {
    /// Resolve the routine for combining `src` onto `dest`.
    ///
    /// Indexed data only ever combines onto indexed data here; the projector
    /// picks the expanding `IntenA*Indexed*` routines itself.
    pub fn resolve(dest: Encoding, src: Encoding) -> Self {
        use Encoding::*;
        match (dest, src) {
            (Rgb, Rgb) | (Gray, Gray) => CombinationMode::IntenInten,
            (Rgb, Rgba) | (Gray, GrayA) => CombinationMode::IntenIntenA,
            (Rgba, Rgb) | (GrayA, Gray) => CombinationMode::IntenAInten,
            (Rgba, Rgba) | (GrayA, GrayA) => CombinationMode::IntenAIntenA,
            (Indexed, Indexed) => CombinationMode::IndexedIndexed,
            (Indexed, IndexedA) => CombinationMode::IndexedIndexedA,
            (IndexedA, IndexedA) => CombinationMode::IndexedAIndexedA,
            _ => CombinationMode::Invalid,
        }
    }

    pub fn is_valid(self) -> bool {
        self != CombinationMode::Invalid
    }
}

/// Routine for the first contributor to a region: nothing below to blend with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InitialMode {
    Intensity,
    IntensityAlpha,
    Indexed,
    IndexedAlpha,
    /// Opaque gray rendering of a channel.
    Channel,
}

impl InitialMode {
    /// Initial routine for a layer stored in `enc`.
    pub fn for_encoding(enc: Encoding) -> Self {
        match enc {
            Encoding::Rgb | Encoding::Gray => InitialMode::Intensity,
            Encoding::Rgba | Encoding::GrayA => InitialMode::IntensityAlpha,
            Encoding::Indexed => InitialMode::Indexed,
            Encoding::IndexedA => InitialMode::IndexedAlpha,
        }
    }
}

/// Convert a 0.0–1.0 opacity to the 0–255 integer scale.
pub fn opacity_to_int(opacity: f64) -> u32 {
    (opacity.clamp(0.0, 1.0) * 255.999) as u32
}

/// Per-call parameters shared by every row of one combine.
#[derive(Clone, Copy, Debug)]
pub struct PixelParams<'a> {
    /// 0–255.
    pub opacity: u32,
    pub mode: BlendMode,
    /// Write enable per destination channel; the alpha channel is the last
    /// one the destination has.
    pub affect: [bool; 4],
    pub colormap: Option<&'a Colormap>,
    /// Tint for channel rows.
    pub channel_color: [u8; 3],
}

impl<'a> PixelParams<'a> {
    pub fn new(opacity: u32, mode: BlendMode) -> Self {
        Self {
            opacity: opacity.min(255),
            mode,
            affect: [true; 4],
            colormap: None,
            channel_color: [0; 3],
        }
    }

    pub fn with_affect(mut self, affect: [bool; 4]) -> Self {
        self.affect = affect;
        self
    }

    pub fn with_colormap(mut self, colormap: Option<&'a Colormap>) -> Self {
        self.colormap = colormap;
        self
    }

    pub fn with_channel_color(mut self, color: [u8; 3]) -> Self {
        self.channel_color = color;
        self
    }
}

/// Encodings of the background (also the destination) and foreground rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RowLayout {
    pub bg: Encoding,
    pub fg: Encoding,
}

impl RowLayout {
    pub fn new(bg: Encoding, fg: Encoding) -> Self {
        Self { bg, fg }
    }
}

fn check_lengths(bg_bytes: usize, fg_bytes: usize, bg: &[u8], fg: &[u8], dest: &[u8], mask: Option<&[u8]>) -> usize {
    let n = dest.len() / bg_bytes;
    assert!(
        dest.len() == n * bg_bytes && bg.len() == dest.len() && fg.len() == n * fg_bytes,
        "row length mismatch: bg {} fg {} dest {}",
        bg.len(),
        fg.len(),
        dest.len()
    );
    if let Some(m) = mask {
        assert_eq!(m.len(), n, "mask row length mismatch");
    }
    n
}

#[inline]
fn luminance(c: [u8; 3]) -> u8 {
    (c[0] as f32 * 0.30 + c[1] as f32 * 0.59 + c[2] as f32 * 0.11 + 0.5).min(255.0) as u8
}

// ============================================================================
// COMBINE
// ============================================================================

/// Combine one row. `origin` is the absolute image position of the first
/// pixel (Dissolve noise is keyed on it).
///
/// Panics on `CombinationMode::Invalid` and on rows whose lengths disagree:
/// callers resolve and clip before reaching here.
#[allow(clippy::too_many_arguments)]
pub fn combine_row(
    mode: CombinationMode,
    layout: RowLayout,
    bg: &[u8],
    fg: &[u8],
    mask: Option<&[u8]>,
    dest: &mut [u8],
    params: &PixelParams,
    origin: (i32, i32),
) {
    match mode {
        CombinationMode::IntenInten
        | CombinationMode::IntenIntenA
        | CombinationMode::IntenAInten
        | CombinationMode::IntenAIntenA => combine_intensity(layout, bg, fg, mask, dest, params, origin),
        CombinationMode::IndexedIndexed
        | CombinationMode::IndexedIndexedA
        | CombinationMode::IndexedAIndexedA => combine_indexed(layout, bg, fg, mask, dest, params),
        CombinationMode::IntenAIndexed | CombinationMode::IntenAIndexedA => {
            combine_inten_a_indexed(layout, bg, fg, mask, dest, params)
        }
        CombinationMode::IntenAChannelMask => combine_channel(layout, bg, fg, dest, params, true),
        CombinationMode::IntenAChannelSelection => combine_channel(layout, bg, fg, dest, params, false),
        CombinationMode::Invalid => {
            unreachable!("invalid combination {} onto {} reached the pixel combiner", layout.fg, layout.bg)
        }
    }
}

fn combine_intensity(
    layout: RowLayout,
    bg: &[u8],
    fg: &[u8],
    mask: Option<&[u8]>,
    dest: &mut [u8],
    params: &PixelParams,
    origin: (i32, i32),
) {
    let b1 = layout.bg.bytes();
    let b2 = layout.fg.bytes();
    let n = check_lengths(b1, b2, bg, fg, dest, mask);
    let channels = layout.bg.color_channels();
    assert_eq!(channels, layout.fg.color_channels(), "{} and {} differ in color channels", layout.bg, layout.fg);

    let has_a1 = layout.bg.has_alpha();
    let has_a2 = layout.fg.has_alpha();
    let mode = params.mode;
    let class = mode.class();
    let blend = mode.color_fn();
    let op = params.opacity;
    let affect = &params.affect;
    let alpha_affected = has_a1 && affect[channels];

    let mut blended = [0u8; 3];

    for i in 0..n {
        let s1 = &bg[i * b1..(i + 1) * b1];
        let s2 = &fg[i * b2..(i + 1) * b2];
        let d = &mut dest[i * b1..(i + 1) * b1];
        let a1 = if has_a1 { s1[channels] as u32 } else { 255 };
        let a2 = if has_a2 { s2[channels] as u32 } else { 255 };
        let m = mask.map_or(255, |m| m[i] as u32);

        let weight = if class == ModeClass::Replace { int_mult(m, op) } else { int_mult3(a2, m, op) };
        if weight == 0 || (!has_a1 && mode.is_alpha_only()) {
            d.copy_from_slice(s1);
            continue;
        }

        match class {
            ModeClass::Over | ModeClass::Dissolve | ModeClass::ColorOnly => {
                let src2_alpha = match class {
                    ModeClass::Dissolve => {
                        let x = origin.0 + i as i32;
                        if dissolve_noise(x, origin.1) < weight { 255 } else { 0 }
                    }
                    ModeClass::ColorOnly => int_mult3(a1.min(a2), m, op),
                    _ => weight,
                };
                if src2_alpha == 0 {
                    d.copy_from_slice(s1);
                    continue;
                }
                blend(&s1[..channels], &s2[..channels], &mut blended[..channels]);

                if has_a1 {
                    let new_alpha = a1 + int_mult(255 - a1, src2_alpha);
                    let ratio = src2_alpha as f32 / new_alpha as f32;
                    let compl = 1.0 - ratio;
                    for c in 0..channels {
                        d[c] = if affect[c] {
                            (blended[c] as f32 * ratio + s1[c] as f32 * compl + 0.0001) as u8
                        } else {
                            s1[c]
                        };
                    }
                    // Grain merge never adds coverage.
                    d[channels] = if alpha_affected && mode != BlendMode::GrainMerge {
                        new_alpha as u8
                    } else {
                        a1 as u8
                    };
                } else {
                    for c in 0..channels {
                        d[c] = if affect[c] {
                            int_blend(blended[c] as u32, s1[c] as u32, src2_alpha) as u8
                        } else {
                            s1[c]
                        };
                    }
                }
            }
            ModeClass::Behind => {
                let new_alpha = a1 + int_mult(255 - a1, weight);
                let ratio = a1 as f32 / new_alpha as f32;
                let compl = 1.0 - ratio;
                for c in 0..channels {
                    d[c] = if affect[c] {
                        (s1[c] as f32 * ratio + s2[c] as f32 * compl + 0.0001) as u8
                    } else {
                        s1[c]
                    };
                }
                d[channels] = if alpha_affected { new_alpha as u8 } else { a1 as u8 };
            }
            ModeClass::Erase | ModeClass::AntiErase => {
                d[..channels].copy_from_slice(&s1[..channels]);
                let new_alpha = if class == ModeClass::Erase {
                    a1 - int_mult(a1, weight)
                } else {
                    a1 + int_mult(255 - a1, weight)
                };
                d[channels] = if alpha_affected { new_alpha as u8 } else { a1 as u8 };
            }
            ModeClass::ColorErase => {
                let mut px = [0.0f32; 4];
                let mut color = [0.0f32; 3];
                for c in 0..channels {
                    px[c] = s1[c] as f32 / 255.0;
                    color[c] = s2[c] as f32 / 255.0;
                }
                px[3] = a1 as f32 / 255.0;
                color_erase(&mut px, channels, &color, weight as f32 / 255.0);
                for c in 0..channels {
                    d[c] = if affect[c] {
                        (px[c].clamp(0.0, 1.0) * 255.0 + 0.5) as u8
                    } else {
                        s1[c]
                    };
                }
                d[channels] = if alpha_affected {
                    (px[3].clamp(0.0, 1.0) * 255.0 + 0.5) as u8
                } else {
                    a1 as u8
                };
            }
            ModeClass::Replace => {
                for c in 0..channels {
                    d[c] = if affect[c] {
                        int_blend(s2[c] as u32, s1[c] as u32, weight) as u8
                    } else {
                        s1[c]
                    };
                }
                if has_a1 {
                    d[channels] = if alpha_affected { int_blend(a2, a1, weight) as u8 } else { a1 as u8 };
                }
            }
        }
    }
}

/// Indexed data is never mixed: each pixel keeps the background index or
/// takes the foreground one depending on whether coverage passes 50%.
fn combine_indexed(
    layout: RowLayout,
    bg: &[u8],
    fg: &[u8],
    mask: Option<&[u8]>,
    dest: &mut [u8],
    params: &PixelParams,
) {
    let b1 = layout.bg.bytes();
    let b2 = layout.fg.bytes();
    let n = check_lengths(b1, b2, bg, fg, dest, mask);
    let has_a1 = layout.bg.has_alpha();
    let has_a2 = layout.fg.has_alpha();
    let affect = &params.affect;
    let op = params.opacity;

    for i in 0..n {
        let s1 = &bg[i * b1..(i + 1) * b1];
        let s2 = &fg[i * b2..(i + 1) * b2];
        let d = &mut dest[i * b1..(i + 1) * b1];
        d.copy_from_slice(s1);

        let a2 = if has_a2 { s2[1] as u32 } else { 255 };
        let m = mask.map_or(255, |m| m[i] as u32);
        let weight = int_mult3(a2, m, op);
        if weight <= 127 {
            continue;
        }

        if !has_a1 {
            if params.mode.is_alpha_only() {
                continue;
            }
            if affect[0] {
                d[0] = s2[0];
            }
            continue;
        }

        let alpha_affected = affect[1];
        match params.mode {
            BlendMode::Erase => {
                if alpha_affected {
                    d[1] = 0;
                }
            }
            BlendMode::AntiErase => {
                if alpha_affected {
                    d[1] = 255;
                }
            }
            BlendMode::ColorErase => {
                if alpha_affected && s1[0] == s2[0] {
                    d[1] = 0;
                }
            }
            BlendMode::Behind => {
                if s1[1] == 0 {
                    if affect[0] {
                        d[0] = s2[0];
                    }
                    if alpha_affected {
                        d[1] = 255;
                    }
                }
            }
            _ => {
                if affect[0] {
                    d[0] = s2[0];
                }
                if alpha_affected {
                    d[1] = 255;
                }
            }
        }
    }
}

/// Indexed layer over an RGBA projection: expand through the colormap.
fn combine_inten_a_indexed(
    layout: RowLayout,
    bg: &[u8],
    fg: &[u8],
    mask: Option<&[u8]>,
    dest: &mut [u8],
    params: &PixelParams,
) {
    assert_eq!(layout.bg, Encoding::Rgba, "indexed layers only project onto RGBA");
    let b2 = layout.fg.bytes();
    let n = check_lengths(4, b2, bg, fg, dest, mask);
    let has_a2 = layout.fg.has_alpha();
    let affect = &params.affect;
    let op = params.opacity;
    let empty = Colormap::default();
    let cmap = params.colormap.unwrap_or(&empty);

    for i in 0..n {
        let s1 = &bg[i * 4..(i + 1) * 4];
        let s2 = &fg[i * b2..(i + 1) * b2];
        let d = &mut dest[i * 4..(i + 1) * 4];
        d.copy_from_slice(s1);

        let a2 = if has_a2 { s2[1] as u32 } else { 255 };
        let m = mask.map_or(255, |m| m[i] as u32);
        if int_mult3(a2, m, op) <= 127 {
            continue;
        }
        let color = cmap.color(s2[0]);
        for c in 0..3 {
            if affect[c] {
                d[c] = color[c];
            }
        }
        if affect[3] {
            d[3] = 255;
        }
    }
}

/// Tint the projection with a channel. `show_masked` tints where the
/// channel is empty, otherwise where it is set.
fn combine_channel(
    layout: RowLayout,
    bg: &[u8],
    fg: &[u8],
    dest: &mut [u8],
    params: &PixelParams,
    show_masked: bool,
) {
    assert!(layout.bg.has_alpha() && !layout.bg.is_indexed(), "channels project onto RGBA or GrayA");
    assert_eq!(layout.fg, Encoding::Gray, "channel data must be one-channel gray");
    let b1 = layout.bg.bytes();
    let n = check_lengths(b1, 1, bg, fg, dest, None);
    let channels = layout.bg.color_channels();
    let alpha = channels;
    let color: [u8; 3] = if channels == 1 {
        [luminance(params.channel_color); 3]
    } else {
        params.channel_color
    };

    for i in 0..n {
        let s = &bg[i * b1..(i + 1) * b1];
        let d = &mut dest[i * b1..(i + 1) * b1];
        let value = if show_masked { 255 - fg[i] as u32 } else { fg[i] as u32 };
        let mut channel_alpha = int_mult(value, params.opacity);
        if channel_alpha == 0 {
            d.copy_from_slice(s);
            continue;
        }
        let a = s[alpha] as u32;
        let new_alpha = a + int_mult(255 - a, channel_alpha);
        if new_alpha != 255 {
            channel_alpha = channel_alpha * 255 / new_alpha;
        }
        let compl = 255 - channel_alpha;
        for c in 0..channels {
            d[c] = (int_mult(channel_alpha, color[c] as u32) + int_mult(s[c] as u32, compl)).min(255) as u8;
        }
        d[alpha] = new_alpha as u8;
    }
}

// ============================================================================
// INITIAL
// ============================================================================

/// Lay down the first contributor to a region of `dest_enc` (always an
/// alpha-carrying projection encoding).
#[allow(clippy::too_many_arguments)]
pub fn initial_row(
    mode: InitialMode,
    fg_enc: Encoding,
    dest_enc: Encoding,
    fg: &[u8],
    mask: Option<&[u8]>,
    dest: &mut [u8],
    params: &PixelParams,
    origin: (i32, i32),
) {
    assert!(dest_enc.has_alpha() && !dest_enc.is_indexed(), "initial rows target RGBA or GrayA, got {}", dest_enc);
    let bd = dest_enc.bytes();
    let bs = fg_enc.bytes();
    let n = dest.len() / bd;
    assert!(dest.len() == n * bd && fg.len() == n * bs, "initial row length mismatch");
    if let Some(m) = mask {
        assert_eq!(m.len(), n, "mask row length mismatch");
    }
    let channels = dest_enc.color_channels();
    let affect = &params.affect;
    let op = params.opacity;
    let dissolve = params.mode == BlendMode::Dissolve;

    if mode == InitialMode::Channel {
        copy_gray_row(fg, dest, dest_enc);
        return;
    }

    for i in 0..n {
        let s = &fg[i * bs..(i + 1) * bs];
        let d = &mut dest[i * bd..(i + 1) * bd];
        let m = mask.map_or(255, |m| m[i] as u32);

        let alpha = match mode {
            InitialMode::Intensity | InitialMode::Indexed => int_mult(m, op),
            _ => int_mult3(s[fg_enc.color_channels()] as u32, m, op),
        };
        let alpha = match mode {
            InitialMode::Indexed | InitialMode::IndexedAlpha => {
                if alpha > 127 { 255 } else { 0 }
            }
            _ if dissolve => {
                if dissolve_noise(origin.0 + i as i32, origin.1) < alpha { 255 } else { 0 }
            }
            _ => alpha,
        };

        let color: [u8; 3] = match mode {
            InitialMode::Indexed | InitialMode::IndexedAlpha => match params.colormap {
                Some(cmap) => cmap.color(s[0]),
                None => [s[0]; 3],
            },
            _ if channels == 3 => [s[0], s[1], s[2]],
            _ => [s[0]; 3],
        };
        if channels == 1 && fg_enc.base_type() != crate::buffer::BaseType::Gray {
            let g = luminance(color);
            d[0] = if affect[0] { g } else { 0 };
        } else {
            for c in 0..channels {
                d[c] = if affect[c] { color[c] } else { 0 };
            }
        }
        d[channels] = if affect[channels] { alpha as u8 } else { 0 };
    }
}

/// Expand one-channel gray to an opaque row of `dest_enc`.
pub fn copy_gray_row(src: &[u8], dest: &mut [u8], dest_enc: Encoding) {
    let bd = dest_enc.bytes();
    assert_eq!(dest.len(), src.len() * bd, "gray row length mismatch");
    let channels = dest_enc.color_channels();
    for (d, &g) in dest.chunks_exact_mut(bd).zip(src) {
        d[..channels].fill(g);
        if dest_enc.has_alpha() {
            d[channels] = 255;
        }
    }
}

// ============================================================================
// REPLACE
// ============================================================================

/// Replace-combine: interpolate background towards foreground by the mask,
/// coverage included, so transparent foreground pixels clear the background.
pub fn replace_row(
    layout: RowLayout,
    bg: &[u8],
    fg: &[u8],
    mask: &[u8],
    dest: &mut [u8],
    params: &PixelParams,
) {
    let b1 = layout.bg.bytes();
    let b2 = layout.fg.bytes();
    let n = check_lengths(b1, b2, bg, fg, dest, Some(mask));
    let channels = layout.bg.color_channels();
    assert_eq!(channels, layout.fg.color_channels(), "{} and {} differ in color channels", layout.bg, layout.fg);
    let has_a1 = layout.bg.has_alpha();
    let has_a2 = layout.fg.has_alpha();
    let affect = &params.affect;

    for i in 0..n {
        let s1 = &bg[i * b1..(i + 1) * b1];
        let s2 = &fg[i * b2..(i + 1) * b2];
        let d = &mut dest[i * b1..(i + 1) * b1];

        let mask_int = int_mult(mask[i] as u32, params.opacity);
        if mask_int == 0 {
            d.copy_from_slice(s1);
            continue;
        }
        let mask_val = mask_int as f64 / 255.0;
        let s1_a = if has_a1 { s1[channels] as f64 } else { 255.0 };
        let s2_a = if has_a2 { s2[channels] as f64 } else { 255.0 };
        let a_val = s1_a + mask_val * (s2_a - s1_a);

        for c in 0..channels {
            let v1 = s1[c] as f64;
            let v2 = s2[c] as f64;
            let new_val = if a_val == 0.0 {
                v1 + mask_val * (v2 - v1) + 0.5
            } else {
                (v1 * s1_a + mask_val * (v2 * s2_a - v1 * s1_a)) / a_val + 0.5
            };
            d[c] = if affect[c] { new_val.clamp(0.0, 255.0) as u8 } else { s1[c] };
        }
        if has_a1 {
            d[channels] = if affect[channels] { (a_val + 0.5).clamp(0.0, 255.0) as u8 } else { s1[channels] };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn over(mode: BlendMode, bg: &[u8], fg: &[u8], mask: Option<&[u8]>, opacity: u32) -> Vec<u8> {
        let layout = RowLayout::new(Encoding::Rgba, Encoding::Rgba);
        let mut dest = vec![0; bg.len()];
        let params = PixelParams::new(opacity, mode);
        combine_row(CombinationMode::IntenAIntenA, layout, bg, fg, mask, &mut dest, &params, (0, 0));
        dest
    }

    #[test]
    fn resolver_table() {
        use Encoding::*;
        assert_eq!(CombinationMode::resolve(Rgba, Rgba), CombinationMode::IntenAIntenA);
        assert_eq!(CombinationMode::resolve(Gray, GrayA), CombinationMode::IntenIntenA);
        assert_eq!(CombinationMode::resolve(Indexed, IndexedA), CombinationMode::IndexedIndexedA);
        assert_eq!(CombinationMode::resolve(Rgba, Indexed), CombinationMode::Invalid);
        assert_eq!(CombinationMode::resolve(GrayA, Indexed), CombinationMode::Invalid);
        assert_eq!(CombinationMode::resolve(Rgb, Gray), CombinationMode::Invalid);
        assert_eq!(CombinationMode::resolve(IndexedA, Indexed), CombinationMode::Invalid);
    }

    #[test]
    fn normal_opaque_replaces_and_transparent_keeps() {
        let bg = [10, 20, 30, 200];
        assert_eq!(over(BlendMode::Normal, &bg, &[200, 100, 50, 255], None, 255), vec![200, 100, 50, 255]);
        assert_eq!(over(BlendMode::Normal, &bg, &[200, 100, 50, 0], None, 255), bg.to_vec());
    }

    #[test]
    fn zero_mask_is_exact_noop_for_every_mode() {
        let bg = [10, 200, 30, 77, 255, 0, 128, 255];
        let fg = [250, 3, 90, 255, 1, 2, 3, 128];
        for &mode in BlendMode::all() {
            assert_eq!(over(mode, &bg, &fg, Some(&[0, 0]), 255), bg.to_vec(), "{} drifted", mode.name());
        }
    }

    #[test]
    fn grain_merge_keeps_background_alpha() {
        let out = over(BlendMode::GrainMerge, &[100, 100, 100, 128], &[200, 50, 128, 255], None, 255);
        assert_eq!(out[3], 128, "grain merge must not add coverage");
        let multiply = over(BlendMode::Multiply, &[100, 100, 100, 128], &[200, 50, 128, 255], None, 255);
        assert!(multiply[3] > 128, "multiply composites alpha with the over operator");
    }

    #[test]
    fn affect_gates_after_blend() {
        let layout = RowLayout::new(Encoding::Rgba, Encoding::Rgba);
        let bg = [100, 100, 100, 255];
        let fg = [200, 200, 200, 255];
        let mut all = [0u8; 4];
        let mut gated = [0u8; 4];
        let params = PixelParams::new(255, BlendMode::Screen);
        combine_row(CombinationMode::IntenAIntenA, layout, &bg, &fg, None, &mut all, &params, (0, 0));
        let params = params.with_affect([true, false, true, true]);
        combine_row(CombinationMode::IntenAIntenA, layout, &bg, &fg, None, &mut gated, &params, (0, 0));
        assert_eq!(gated[1], 100, "write-protected channel keeps its pre-blend value");
        assert_eq!([gated[0], gated[2], gated[3]], [all[0], all[2], all[3]]);
    }

    #[test]
    fn erase_modes_on_alphaless_destination_do_nothing() {
        let layout = RowLayout::new(Encoding::Rgb, Encoding::Rgba);
        let bg = [1, 2, 3];
        for mode in [BlendMode::Erase, BlendMode::AntiErase, BlendMode::Behind, BlendMode::ColorErase] {
            let mut dest = [0u8; 3];
            let params = PixelParams::new(255, mode);
            combine_row(CombinationMode::IntenIntenA, layout, &bg, &[9, 9, 9, 255], None, &mut dest, &params, (0, 0));
            assert_eq!(dest, bg, "{}", mode.name());
        }
    }

    #[test]
    fn erase_and_anti_erase_move_alpha() {
        assert_eq!(over(BlendMode::Erase, &[5, 6, 7, 255], &[0, 0, 0, 255], None, 255)[3], 0);
        assert_eq!(over(BlendMode::AntiErase, &[5, 6, 7, 0], &[0, 0, 0, 255], None, 255), vec![5, 6, 7, 255]);
        let half = over(BlendMode::Erase, &[5, 6, 7, 255], &[0, 0, 0, 255], None, 128);
        assert_eq!(half[3], 127);
    }

    #[test]
    fn behind_only_shows_through_transparency() {
        assert_eq!(over(BlendMode::Behind, &[5, 6, 7, 255], &[200, 200, 200, 255], None, 255), vec![5, 6, 7, 255]);
        assert_eq!(
            over(BlendMode::Behind, &[5, 6, 7, 0], &[200, 201, 202, 255], None, 255),
            vec![200, 201, 202, 255]
        );
    }

    #[test]
    fn color_only_modes_need_background_coverage() {
        let out = over(BlendMode::Multiply, &[0, 0, 0, 0], &[200, 200, 200, 255], None, 255);
        assert_eq!(out, vec![0, 0, 0, 0], "multiply onto nothing adds nothing");
    }

    #[test]
    fn dissolve_is_all_or_nothing() {
        let bg: Vec<u8> = [10, 10, 10, 255].repeat(64);
        let fg: Vec<u8> = [250, 250, 250, 255].repeat(64);
        let out = over(BlendMode::Dissolve, &bg, &fg, None, 128);
        let mut took = 0;
        for px in out.chunks_exact(4) {
            assert!(px == [10, 10, 10, 255] || px == [250, 250, 250, 255], "partial dissolve pixel {px:?}");
            if px[0] == 250 {
                took += 1;
            }
        }
        assert!(took > 0 && took < 64, "half opacity should dissolve some pixels ({took}/64)");
    }

    #[test]
    fn dissolve_at_full_opacity_keeps_every_pixel() {
        let layout = RowLayout::new(Encoding::Rgba, Encoding::Rgba);
        let params = PixelParams::new(255, BlendMode::Dissolve);
        let bg: Vec<u8> = [10, 10, 10, 255].repeat(64);
        let fg: Vec<u8> = [250, 250, 250, 255].repeat(64);
        let mut dest = vec![0u8; bg.len()];
        for y in 0..64 {
            combine_row(CombinationMode::IntenAIntenA, layout, &bg, &fg, None, &mut dest, &params, (-13, y));
            assert_eq!(dest, fg, "combine dropped a pixel on row {y}");
            initial_row(InitialMode::IntensityAlpha, Encoding::Rgba, Encoding::Rgba, &fg, None, &mut dest, &params, (-13, y));
            assert_eq!(dest, fg, "initial left a hole on row {y}");
        }
    }

    #[test]
    fn replace_clears_where_combine_keeps() {
        let red = [255, 0, 0, 255];
        let clear = [0, 0, 0, 0];
        let layout = RowLayout::new(Encoding::Rgba, Encoding::Rgba);
        let params = PixelParams::new(255, BlendMode::Normal);
        let mut dest = [9u8; 4];
        replace_row(layout, &red, &clear, &[255], &mut dest, &params);
        assert_eq!(dest[3], 0);
        assert_eq!(over(BlendMode::Normal, &red, &clear, Some(&[255]), 255), red.to_vec());

        replace_row(layout, &red, &clear, &[0], &mut dest, &params);
        assert_eq!(dest, red, "zero mask replace is a no-op");
    }

    #[test]
    fn indexed_threshold_is_categorical() {
        let layout = RowLayout::new(Encoding::Indexed, Encoding::Indexed);
        let mut dest = [0u8; 2];
        let params = PixelParams::new(255, BlendMode::Multiply);
        combine_row(CombinationMode::IndexedIndexed, layout, &[3, 3], &[7, 7], Some(&[127, 200]), &mut dest, &params, (0, 0));
        assert_eq!(dest, [3, 7]);
    }

    #[test]
    fn indexed_layer_expands_through_colormap() {
        let cmap = Colormap::new(vec![[0, 0, 0], [10, 20, 30]]);
        let layout = RowLayout::new(Encoding::Rgba, Encoding::IndexedA);
        let params = PixelParams::new(255, BlendMode::Normal).with_colormap(Some(&cmap));
        let mut dest = [0u8; 8];
        combine_row(
            CombinationMode::IntenAIndexedA,
            layout,
            &[1, 1, 1, 255, 1, 1, 1, 255],
            &[1, 255, 1, 100],
            None,
            &mut dest,
            &params,
            (0, 0),
        );
        assert_eq!(dest, [10, 20, 30, 255, 1, 1, 1, 255]);
    }

    #[test]
    fn channel_selection_tints_selected_area() {
        let layout = RowLayout::new(Encoding::Rgba, Encoding::Gray);
        let params = PixelParams::new(255, BlendMode::Normal).with_channel_color([255, 0, 0]);
        let bg = [0, 0, 255, 255, 0, 0, 255, 255];
        let mut dest = [0u8; 8];
        combine_row(CombinationMode::IntenAChannelSelection, layout, &bg, &[255, 0], None, &mut dest, &params, (0, 0));
        assert_eq!(dest, [255, 0, 0, 255, 0, 0, 255, 255]);
        combine_row(CombinationMode::IntenAChannelMask, layout, &bg, &[255, 0], None, &mut dest, &params, (0, 0));
        assert_eq!(dest, [0, 0, 255, 255, 255, 0, 0, 255]);
    }

    #[test]
    fn initial_rows_scale_alpha() {
        let params = PixelParams::new(128, BlendMode::Normal);
        let mut dest = [0u8; 4];
        initial_row(InitialMode::Intensity, Encoding::Rgb, Encoding::Rgba, &[9, 8, 7], None, &mut dest, &params, (0, 0));
        assert_eq!(dest, [9, 8, 7, 128]);
        initial_row(InitialMode::IntensityAlpha, Encoding::Rgba, Encoding::Rgba, &[9, 8, 7, 255], Some(&[0]), &mut dest, &params, (0, 0));
        assert_eq!(dest[3], 0);
        let mut gray = [0u8; 2];
        initial_row(InitialMode::Intensity, Encoding::Gray, Encoding::GrayA, &[60], None, &mut gray, &params, (0, 0));
        assert_eq!(gray, [60, 128]);
    }

    #[test]
    fn initial_row_with_hidden_alpha_writes_no_coverage() {
        let params = PixelParams::new(255, BlendMode::Normal).with_affect([true, true, true, false]);
        let mut dest = [7u8; 4];
        initial_row(InitialMode::IntensityAlpha, Encoding::Rgba, Encoding::Rgba, &[9, 8, 7, 255], None, &mut dest, &params, (0, 0));
        assert_eq!(dest, [9, 8, 7, 0]);
        let params = params.with_affect([false, true, true, true]);
        initial_row(InitialMode::Intensity, Encoding::Rgb, Encoding::Rgba, &[9, 8, 7], None, &mut dest, &params, (0, 0));
        assert_eq!(dest, [0, 8, 7, 255]);
    }

    #[test]
    fn gray_copy_is_opaque() {
        let mut dest = [0u8; 8];
        copy_gray_row(&[12, 240], &mut dest, Encoding::Rgba);
        assert_eq!(dest, [12, 12, 12, 255, 240, 240, 240, 255]);
    }
}
