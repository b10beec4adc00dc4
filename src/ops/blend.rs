// ============================================================================
// LAYER MODES — mode enum, 8-bit arithmetic helpers, per-mode color math
// ============================================================================
//
// Every color function here works on the color channels of one pixel
// (1 for gray, 3 for RGB) and never looks at alpha. How the blended color
// is composited back over the background is decided per `ModeClass` by the
// row routines in `ops::combine`.

/// `a * b / 255`, rounded.
#[inline]
pub fn int_mult(a: u32, b: u32) -> u32 {
    let t = a * b + 0x80;
    ((t >> 8) + t) >> 8
}

/// `a * b * c / 255²`, rounded.
#[inline]
pub fn int_mult3(a: u32, b: u32, c: u32) -> u32 {
    let t = a * b * c + 0x7F5B;
    ((t >> 7) + t) >> 16
}

/// Linear interpolation from `b` towards `a` by `alpha / 255`.
#[inline]
pub fn int_blend(a: u32, b: u32, alpha: u32) -> u32 {
    let diff = a as i32 - b as i32;
    let t = diff * alpha as i32 + 0x80;
    let scaled = ((t >> 8) + t) >> 8;
    (scaled + b as i32) as u32
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BlendMode {
    #[default]
    Normal = 0,
    Dissolve = 1,
    Behind = 2,
    Multiply = 3,
    Screen = 4,
    Overlay = 5,
    Difference = 6,
    Addition = 7,
    Subtract = 8,
    DarkenOnly = 9,
    LightenOnly = 10,
    Hue = 11,
    Saturation = 12,
    Color = 13,
    Value = 14,
    Divide = 15,
    Dodge = 16,
    Burn = 17,
    HardLight = 18,
    SoftLight = 19,
    GrainExtract = 20,
    GrainMerge = 21,
    ColorErase = 22,
    Erase = 23,
    Replace = 24,
    AntiErase = 25,
}

/// How a mode's blended color reaches the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeClass {
    /// Straight alpha-over.
    Over,
    /// Alpha-over with the coverage thresholded per pixel against noise.
    Dissolve,
    /// Arithmetic modes: the blended color is laid down with
    /// `min(background alpha, foreground alpha)` coverage.
    ColorOnly,
    /// Foreground painted underneath the background.
    Behind,
    Erase,
    AntiErase,
    ColorErase,
    /// Interpolate every channel, alpha included.
    Replace,
}

impl BlendMode {
    pub const COUNT: usize = 26;

    /// Returns all modes in menu order
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Dissolve,
            BlendMode::Behind,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Difference,
            BlendMode::Addition,
            BlendMode::Subtract,
            BlendMode::DarkenOnly,
            BlendMode::LightenOnly,
            BlendMode::Hue,
            BlendMode::Saturation,
            BlendMode::Color,
            BlendMode::Value,
            BlendMode::Divide,
            BlendMode::Dodge,
            BlendMode::Burn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::GrainExtract,
            BlendMode::GrainMerge,
            BlendMode::ColorErase,
            BlendMode::Erase,
            BlendMode::Replace,
            BlendMode::AntiErase,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Dissolve => "Dissolve",
            BlendMode::Behind => "Behind",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Difference => "Difference",
            BlendMode::Addition => "Addition",
            BlendMode::Subtract => "Subtract",
            BlendMode::DarkenOnly => "Darken Only",
            BlendMode::LightenOnly => "Lighten Only",
            BlendMode::Hue => "Hue",
            BlendMode::Saturation => "Saturation",
            BlendMode::Color => "Color",
            BlendMode::Value => "Value",
            BlendMode::Divide => "Divide",
            BlendMode::Dodge => "Dodge",
            BlendMode::Burn => "Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::GrainExtract => "Grain Extract",
            BlendMode::GrainMerge => "Grain Merge",
            BlendMode::ColorErase => "Color Erase",
            BlendMode::Erase => "Erase",
            BlendMode::Replace => "Replace",
            BlendMode::AntiErase => "Anti Erase",
        }
    }

    /// Stable id for undo records and the CLI.
    pub fn to_u8(&self) -> u8 {
        *self as u8
    }

    /// Reconstruct from a u8 (defaults to Normal for unknown values)
    pub fn from_u8(v: u8) -> Self {
        Self::all().get(v as usize).copied().unwrap_or(BlendMode::Normal)
    }

    /// Case-insensitive lookup by display name; spaces, dashes and
    /// underscores are ignored (`grain-merge`, `GrainMerge`, `grain merge`).
    pub fn from_name(name: &str) -> Option<Self> {
        let key: String = name
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::all().iter().copied().find(|m| {
            m.name()
                .chars()
                .filter(|c| *c != ' ')
                .map(|c| c.to_ascii_lowercase())
                .eq(key.chars())
        })
    }

    pub fn class(&self) -> ModeClass {
        match self {
            BlendMode::Normal => ModeClass::Over,
            BlendMode::Dissolve => ModeClass::Dissolve,
            BlendMode::Behind => ModeClass::Behind,
            BlendMode::Erase => ModeClass::Erase,
            BlendMode::AntiErase => ModeClass::AntiErase,
            BlendMode::ColorErase => ModeClass::ColorErase,
            BlendMode::Replace => ModeClass::Replace,
            _ => ModeClass::ColorOnly,
        }
    }

    /// Modes that can make the result more (or less) opaque than alpha-over would.
    pub fn affects_alpha(&self) -> bool {
        matches!(
            self,
            BlendMode::Behind
                | BlendMode::Erase
                | BlendMode::AntiErase
                | BlendMode::ColorErase
                | BlendMode::Replace
        )
    }

    /// Modes that only act on the destination's alpha channel. They do
    /// nothing to a destination without one.
    pub fn is_alpha_only(&self) -> bool {
        matches!(
            self,
            BlendMode::Behind | BlendMode::Erase | BlendMode::AntiErase | BlendMode::ColorErase
        )
    }

    /// Color function for this mode.
    #[inline]
    pub fn color_fn(&self) -> ColorBlendFn {
        BLEND_TABLE[*self as usize]
    }
}

impl std::fmt::Display for BlendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// COLOR FUNCTIONS — indexed by `BlendMode as usize`
// ============================================================================

/// `(background, foreground, out)`; all three slices hold the same number
/// of color channels.
pub type ColorBlendFn = fn(&[u8], &[u8], &mut [u8]);

static BLEND_TABLE: [ColorBlendFn; BlendMode::COUNT] = [
    blend_normal,        // Normal
    blend_normal,        // Dissolve
    blend_normal,        // Behind
    blend_multiply,      // Multiply
    blend_screen,        // Screen
    blend_overlay,       // Overlay
    blend_difference,    // Difference
    blend_addition,      // Addition
    blend_subtract,      // Subtract
    blend_darken,        // DarkenOnly
    blend_lighten,       // LightenOnly
    blend_hue,           // Hue
    blend_saturation,    // Saturation
    blend_color,         // Color
    blend_value,         // Value
    blend_divide,        // Divide
    blend_dodge,         // Dodge
    blend_burn,          // Burn
    blend_hardlight,     // HardLight
    blend_softlight,     // SoftLight
    blend_grain_extract, // GrainExtract
    blend_grain_merge,   // GrainMerge
    blend_normal,        // ColorErase
    blend_keep,          // Erase
    blend_normal,        // Replace
    blend_keep,          // AntiErase
];

#[inline]
fn channelwise(s1: &[u8], s2: &[u8], out: &mut [u8], f: impl Fn(u32, u32) -> u32) {
    for ((o, &a), &b) in out.iter_mut().zip(s1).zip(s2) {
        *o = f(a as u32, b as u32).min(255) as u8;
    }
}

fn blend_normal(_s1: &[u8], s2: &[u8], out: &mut [u8]) {
    out.copy_from_slice(s2);
}

fn blend_keep(s1: &[u8], _s2: &[u8], out: &mut [u8]) {
    out.copy_from_slice(s1);
}

fn blend_multiply(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, int_mult);
}

fn blend_screen(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| 255 - int_mult(255 - a, 255 - b));
}

fn blend_overlay(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| int_mult(a, a + int_mult(2 * b, 255 - a)));
}

fn blend_difference(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| a.abs_diff(b));
}

fn blend_addition(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| (a + b).min(255));
}

fn blend_subtract(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| a.saturating_sub(b));
}

fn blend_darken(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| a.min(b));
}

fn blend_lighten(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| a.max(b));
}

fn blend_divide(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| ((a * 256) / (b + 1)).min(255));
}

fn blend_dodge(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| ((a << 8) / (256 - b)).min(255));
}

fn blend_burn(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| 255 - (((255 - a) << 8) / (b + 1)).min(255));
}

fn blend_hardlight(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| {
        if b > 128 {
            let t = (255 - a) * (255 - ((b - 128) << 1));
            255 - (t >> 8).min(255)
        } else {
            ((a * (b << 1)) >> 8).min(255)
        }
    });
}

fn blend_softlight(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| {
        let m = int_mult(a, b);
        let s = 255 - int_mult(255 - a, 255 - b);
        int_mult(255 - a, m) + int_mult(a, s)
    });
}

fn blend_grain_extract(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| (a as i32 - b as i32 + 128).clamp(0, 255) as u32);
}

fn blend_grain_merge(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    channelwise(s1, s2, out, |a, b| (a as i32 + b as i32 - 128).clamp(0, 255) as u32);
}

// Hue/Saturation/Value/Color need three channels. Gray data keeps the background.

fn blend_hue(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    hsv_replace(s1, s2, out, |bg, fg| {
        // A gray foreground has no hue to give.
        if fg[1] != 0 {
            bg[0] = fg[0];
        }
    });
}

fn blend_saturation(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    hsv_replace(s1, s2, out, |bg, fg| bg[1] = fg[1]);
}

fn blend_value(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    hsv_replace(s1, s2, out, |bg, fg| bg[2] = fg[2]);
}

fn blend_color(s1: &[u8], s2: &[u8], out: &mut [u8]) {
    if out.len() < 3 {
        out.copy_from_slice(s1);
        return;
    }
    let mut bg = rgb_to_hsl_int([s1[0] as i32, s1[1] as i32, s1[2] as i32]);
    let fg = rgb_to_hsl_int([s2[0] as i32, s2[1] as i32, s2[2] as i32]);
    bg[0] = fg[0];
    bg[1] = fg[1];
    let rgb = hsl_to_rgb_int(bg);
    for (o, v) in out.iter_mut().zip(rgb) {
        *o = v.clamp(0, 255) as u8;
    }
}

fn hsv_replace(s1: &[u8], s2: &[u8], out: &mut [u8], pick: impl Fn(&mut [i32; 3], &[i32; 3])) {
    if out.len() < 3 {
        out.copy_from_slice(s1);
        return;
    }
    let mut bg = rgb_to_hsv_int([s1[0] as i32, s1[1] as i32, s1[2] as i32]);
    let fg = rgb_to_hsv_int([s2[0] as i32, s2[1] as i32, s2[2] as i32]);
    pick(&mut bg, &fg);
    let rgb = hsv_to_rgb_int(bg);
    for (o, v) in out.iter_mut().zip(rgb) {
        *o = v.clamp(0, 255) as u8;
    }
}

#[inline]
fn round(v: f64) -> i32 {
    (v + 0.5) as i32
}

/// RGB → (hue 0..360, saturation 0..255, value 0..255).
pub fn rgb_to_hsv_int([r, g, b]: [i32; 3]) -> [i32; 3] {
    let (v, min) = if r > g { (r.max(b), g.min(b)) } else { (g.max(b), r.min(b)) };
    let delta = (v - min) as f64;
    let s = if v == 0 { 0.0 } else { delta / v as f64 };
    let mut h = 0.0;
    if s != 0.0 {
        h = if r == v {
            60.0 * (g - b) as f64 / delta
        } else if g == v {
            120.0 + 60.0 * (b - r) as f64 / delta
        } else {
            240.0 + 60.0 * (r - g) as f64 / delta
        };
        if h < 0.0 {
            h += 360.0;
        }
        if h > 360.0 {
            h -= 360.0;
        }
    }
    let mut hue = round(h);
    // 0 and 360 are the same hue
    if hue == 360 {
        hue = 0;
    }
    [hue, round(s * 255.0), v]
}

pub fn hsv_to_rgb_int([h, s, v]: [i32; 3]) -> [i32; 3] {
    if s == 0 {
        return [v, v, v];
    }
    let h = if h == 360 { 0.0 } else { h as f64 } / 60.0;
    let s = s as f64 / 255.0;
    let v = v as f64 / 255.0;
    let i = h.floor() as i32;
    let f = h - i as f64;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match i {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    [round(r * 255.0), round(g * 255.0), round(b * 255.0)]
}

/// RGB → (hue 0..255, saturation 0..255, lightness 0..255).
pub fn rgb_to_hsl_int([r, g, b]: [i32; 3]) -> [i32; 3] {
    let (max, min) = if r > g { (r.max(b), g.min(b)) } else { (g.max(b), r.min(b)) };
    let l = (max + min) as f64 / 2.0;
    if max == min {
        return [0, 0, round(l)];
    }
    let delta = (max - min) as f64;
    let s = if l < 128.0 {
        255.0 * delta / (max + min) as f64
    } else {
        255.0 * delta / (511 - max - min) as f64
    };
    let mut h = if r == max {
        (g - b) as f64 / delta
    } else if g == max {
        2.0 + (b - r) as f64 / delta
    } else {
        4.0 + (r - g) as f64 / delta
    };
    h *= 42.5;
    if h < 0.0 {
        h += 255.0;
    } else if h > 255.0 {
        h -= 255.0;
    }
    [round(h), round(s), round(l)]
}

fn hsl_value_int(n1: f64, n2: f64, hue: f64) -> i32 {
    let hue = if hue > 255.0 {
        hue - 255.0
    } else if hue < 0.0 {
        hue + 255.0
    } else {
        hue
    };
    let value = if hue < 42.5 {
        n1 + (n2 - n1) * (hue / 42.5)
    } else if hue < 127.5 {
        n2
    } else if hue < 170.0 {
        n1 + (n2 - n1) * ((170.0 - hue) / 42.5)
    } else {
        n1
    };
    round(value * 255.0)
}

pub fn hsl_to_rgb_int([h, s, l]: [i32; 3]) -> [i32; 3] {
    if s == 0 {
        return [l, l, l];
    }
    let (h, s, l) = (h as f64, s as f64, l as f64);
    let m2 = if l < 128.0 {
        (l * (255.0 + s)) / 65025.0
    } else {
        (l + s - (l * s) / 255.0) / 255.0
    };
    let m1 = (l / 127.5) - m2;
    [
        hsl_value_int(m1, m2, h + 85.0),
        hsl_value_int(m1, m2, h),
        hsl_value_int(m1, m2, h - 85.0),
    ]
}

// ============================================================================
// DISSOLVE NOISE / COLOR ERASE
// ============================================================================

/// Per-pixel noise for Dissolve, a pure function of absolute image
/// coordinates so every construct of the same pixel makes the same choice.
/// Values lie in `0..=254`, so full coverage always survives.
#[inline]
pub fn dissolve_noise(x: i32, y: i32) -> u32 {
    let mut h = (x as u32).wrapping_mul(0x9E37_79B1) ^ (y as u32).wrapping_mul(0x85EB_CA77);
    h ^= h >> 15;
    h = h.wrapping_mul(0x2C1B_3C6D);
    h ^= h >> 12;
    h = h.wrapping_mul(0x297A_2D39);
    h ^= h >> 15;
    h % 255
}

/// Remove `color` (with coverage `color_alpha`) from `src`, all in 0..1.
/// `src` is `[c.., alpha]` with `channels` color entries.
pub fn color_erase(src: &mut [f32; 4], channels: usize, color: &[f32; 3], color_alpha: f32) {
    let src_alpha = src[3];
    let mut alpha = 0.0f32;
    for c in 0..channels {
        let a = if color[c] < 0.0001 {
            src[c]
        } else if src[c] > color[c] {
            (src[c] - color[c]) / (1.0 - color[c])
        } else if src[c] < color[c] {
            (color[c] - src[c]) / color[c]
        } else {
            0.0
        };
        alpha = alpha.max(a);
    }
    let mut a = (1.0 - color_alpha) + alpha * color_alpha;
    if a < 0.0001 {
        src[3] = 0.0;
        return;
    }
    for c in 0..channels {
        src[c] = (src[c] - color[c]) / a + color[c];
    }
    a *= src_alpha;
    src[3] = a;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_mult_matches_exact_division() {
        for a in (0..=255).step_by(5) {
            for b in (0..=255).step_by(3) {
                let exact = (a * b) as f64 / 255.0;
                let got = int_mult(a, b) as f64;
                assert!((got - exact).abs() <= 0.5 + 1e-9, "int_mult({a},{b}) = {got}, exact {exact}");
            }
        }
        assert_eq!(int_mult(255, 255), 255);
        assert_eq!(int_mult3(255, 255, 255), 255);
        assert_eq!(int_mult3(255, 128, 255), 128);
    }

    #[test]
    fn int_blend_hits_endpoints() {
        assert_eq!(int_blend(200, 10, 255), 200);
        assert_eq!(int_blend(200, 10, 0), 10);
        assert_eq!(int_blend(10, 200, 255), 10);
    }

    #[test]
    fn table_order_matches_discriminants() {
        for (i, mode) in BlendMode::all().iter().enumerate() {
            assert_eq!(mode.to_u8() as usize, i, "{} out of order", mode.name());
            assert_eq!(BlendMode::from_u8(i as u8), *mode);
        }
        assert_eq!(BlendMode::all().len(), BlendMode::COUNT);
        assert_eq!(BlendMode::from_u8(200), BlendMode::Normal);
    }

    #[test]
    fn names_parse_loosely() {
        assert_eq!(BlendMode::from_name("grain-merge"), Some(BlendMode::GrainMerge));
        assert_eq!(BlendMode::from_name("DARKEN_ONLY"), Some(BlendMode::DarkenOnly));
        assert_eq!(BlendMode::from_name("anti erase"), Some(BlendMode::AntiErase));
        assert_eq!(BlendMode::from_name("vivid"), None);
    }

    #[test]
    fn arithmetic_modes() {
        let mut out = [0u8; 3];
        BlendMode::Multiply.color_fn()(&[255, 128, 0], &[128, 128, 128], &mut out);
        assert_eq!(out, [128, 64, 0]);
        BlendMode::Screen.color_fn()(&[0, 128, 255], &[128, 128, 128], &mut out);
        assert_eq!(out, [128, 192, 255]);
        BlendMode::GrainMerge.color_fn()(&[200, 10, 128], &[200, 10, 128], &mut out);
        assert_eq!(out, [255, 0, 128]);
        BlendMode::GrainExtract.color_fn()(&[200, 10, 128], &[10, 200, 128], &mut out);
        assert_eq!(out, [255, 0, 128]);
        BlendMode::Subtract.color_fn()(&[10, 100, 255], &[20, 50, 0], &mut out);
        assert_eq!(out, [0, 50, 255]);
    }

    #[test]
    fn hsv_round_trip_is_stable() {
        for rgb in [[255, 0, 0], [12, 200, 99], [128, 128, 128], [0, 0, 0], [250, 251, 3]] {
            let back = hsv_to_rgb_int(rgb_to_hsv_int(rgb));
            for c in 0..3 {
                assert!((back[c] - rgb[c]).abs() <= 1, "{rgb:?} came back as {back:?}");
            }
        }
    }

    #[test]
    fn hsl_round_trip_is_stable() {
        for rgb in [[255, 0, 0], [12, 200, 99], [77, 77, 77], [0, 40, 250]] {
            let back = hsl_to_rgb_int(rgb_to_hsl_int(rgb));
            for c in 0..3 {
                assert!((back[c] - rgb[c]).abs() <= 2, "{rgb:?} came back as {back:?}");
            }
        }
    }

    #[test]
    fn hue_from_gray_keeps_background() {
        let mut out = [0u8; 3];
        BlendMode::Hue.color_fn()(&[200, 40, 40], &[90, 90, 90], &mut out);
        assert_eq!(out, [200, 40, 40]);
    }

    #[test]
    fn hsv_modes_leave_gray_alone() {
        for mode in [BlendMode::Hue, BlendMode::Saturation, BlendMode::Value, BlendMode::Color] {
            let mut out = [0u8; 1];
            mode.color_fn()(&[77], &[200], &mut out);
            assert_eq!(out, [77], "{} changed gray data", mode.name());
        }
    }

    #[test]
    fn dissolve_noise_is_deterministic_and_spread() {
        assert_eq!(dissolve_noise(3, 9), dissolve_noise(3, 9));
        let below = (0..64)
            .flat_map(|y| (0..64).map(move |x| (x, y)))
            .filter(|&(x, y)| dissolve_noise(x, y) < 128)
            .count();
        assert!((1500..2600).contains(&below), "noise badly skewed: {below}/4096 below 128");
    }

    #[test]
    fn dissolve_noise_never_reaches_full_coverage() {
        let max = (-128..128)
            .flat_map(|y| (-128..128).map(move |x| dissolve_noise(x, y)))
            .max();
        assert!(max.is_some_and(|m| m < 255), "noise hit {max:?}");
    }

    #[test]
    fn color_erase_removes_exact_color() {
        let mut px = [1.0, 1.0, 1.0, 1.0];
        color_erase(&mut px, 3, &[1.0, 1.0, 1.0], 1.0);
        assert_eq!(px[3], 0.0, "erasing white from white leaves nothing");

        let mut px = [1.0, 0.0, 0.0, 1.0];
        color_erase(&mut px, 3, &[1.0, 1.0, 1.0], 1.0);
        assert!((px[3] - 1.0).abs() < 1e-6, "red has nothing white in it");
    }
}
