// ============================================================================
// ITEMS — drawables, channels and layers
// ============================================================================

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::buffer::{Colormap, Encoding, PixelBuffer, PixelStore, Rect, Storage};
use crate::error::{CompositeError, Result};
use crate::ops::blend::{int_mult, BlendMode};

/// Identity of a layer, channel or mask. Survives reordering, so undo
/// records can find their target again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ItemId(Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything with pixels and a position on the canvas.
#[derive(Clone, Debug)]
pub struct Drawable {
    pub id: ItemId,
    pub name: String,
    /// Top-left corner in image coordinates.
    pub offset: (i32, i32),
    pub pixels: Storage,
    /// Palette for indexed pixels.
    pub colormap: Option<Arc<Colormap>>,
}

impl Drawable {
    pub fn new(name: impl Into<String>, pixels: impl Into<Storage>, offset: (i32, i32)) -> Self {
        Self {
            id: ItemId::new(),
            name: name.into(),
            offset,
            pixels: pixels.into(),
            colormap: None,
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.pixels.encoding()
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Bounds in image coordinates.
    pub fn bounds(&self) -> Rect {
        Rect::new(self.offset.0, self.offset.1, self.width() as i32, self.height() as i32)
    }
}

// ============================================================================
// CHANNEL
// ============================================================================

/// One-channel mask: layer masks, the selection and extra channels.
#[derive(Clone, Debug)]
pub struct Channel {
    pub drawable: Drawable,
    /// Overlay tint when the channel is shown on the projection.
    pub color: [u8; 3],
    pub opacity: f64,
    /// Tint the unselected area instead of the selected one.
    pub show_masked: bool,
    pub visible: bool,
}

impl Channel {
    /// Empty (all-zero) channel.
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self::from_drawable(Drawable::new(name, PixelBuffer::new(Encoding::Gray, width, height), (0, 0)))
    }

    /// Channel with every pixel set to `value`.
    pub fn new_filled(name: impl Into<String>, width: u32, height: u32, value: u8) -> Self {
        let buf = PixelBuffer::new_filled(Encoding::Gray, width, height, &[value]);
        Self::from_drawable(Drawable::new(name, buf, (0, 0)))
    }

    pub fn from_buffer(name: impl Into<String>, buf: PixelBuffer) -> Result<Self> {
        if buf.encoding() != Encoding::Gray {
            return Err(CompositeError::EncodingMismatch { expected: Encoding::Gray, actual: buf.encoding() });
        }
        Ok(Self::from_drawable(Drawable::new(name, buf, (0, 0))))
    }

    fn from_drawable(drawable: Drawable) -> Self {
        Self {
            drawable,
            color: [0, 0, 0],
            opacity: 0.5,
            show_masked: false,
            visible: false,
        }
    }

    pub fn id(&self) -> ItemId {
        self.drawable.id
    }

    pub fn bounds(&self) -> Rect {
        self.drawable.bounds()
    }

    /// True when no pixel is set. An empty selection means "no selection".
    pub fn is_empty(&self) -> bool {
        let w = self.drawable.width() as usize;
        let mut row = vec![0u8; w];
        (0..self.drawable.height()).all(|y| {
            self.drawable.pixels.read_row(0, y, &mut row);
            row.iter().all(|&v| v == 0)
        })
    }
}

// ============================================================================
// LAYER
// ============================================================================

#[derive(Clone, Debug)]
pub struct Layer {
    pub drawable: Drawable,
    pub visible: bool,
    pub opacity: f64,
    pub mode: BlendMode,
    /// Same size as the layer; carries its own offset.
    pub mask: Option<Channel>,
    pub apply_mask: bool,
    /// Project the mask's gray content instead of the layer.
    pub show_mask: bool,
    /// Floating selections are skipped by the regular stack walk.
    pub floating: bool,
    pub lock_alpha: bool,
}

impl Layer {
    pub fn new(name: impl Into<String>, pixels: impl Into<Storage>, offset: (i32, i32)) -> Self {
        Self {
            drawable: Drawable::new(name, pixels, offset),
            visible: true,
            opacity: 1.0,
            mode: BlendMode::Normal,
            mask: None,
            apply_mask: true,
            show_mask: false,
            floating: false,
            lock_alpha: false,
        }
    }

    pub fn with_mode(mut self, mode: BlendMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    pub fn with_colormap(mut self, colormap: Arc<Colormap>) -> Self {
        self.drawable.colormap = Some(colormap);
        self
    }

    pub fn id(&self) -> ItemId {
        self.drawable.id
    }

    pub fn name(&self) -> &str {
        &self.drawable.name
    }

    pub fn encoding(&self) -> Encoding {
        self.drawable.encoding()
    }

    pub fn has_alpha(&self) -> bool {
        self.encoding().has_alpha()
    }

    pub fn bounds(&self) -> Rect {
        self.drawable.bounds()
    }

    /// Fully opaque Normal layer with nothing modulating it.
    pub fn is_opaque_normal(&self) -> bool {
        self.visible
            && !self.has_alpha()
            && self.mask.is_none()
            && self.mode == BlendMode::Normal
            && self.opacity >= 1.0
    }

    /// Multiply the mask into the layer's alpha and drop the mask. Layers
    /// without alpha gain an alpha channel first.
    pub fn bake_mask(&mut self) -> Option<Rect> {
        let mask = self.mask.take()?;
        let src = self.drawable.pixels.to_buffer();
        let enc = src.encoding();
        let out_enc = enc.with_alpha();
        let (w, h) = (src.width(), src.height());
        let mut out = PixelBuffer::new(out_enc, w, h);
        let dx = self.drawable.offset.0 - mask.drawable.offset.0;
        let dy = self.drawable.offset.1 - mask.drawable.offset.1;
        let mut mrow = vec![0u8; w as usize];
        let bin = enc.bytes();
        let bout = out_enc.bytes();
        let alpha = out_enc.color_channels();
        for y in 0..h {
            crate::buffer::read_row_clipped(&mask.drawable.pixels, dx, y as i32 + dy, &mut mrow);
            for x in 0..w {
                let s = src.pixel(x, y);
                let mut px = [0u8; 4];
                px[..alpha].copy_from_slice(&s[..alpha]);
                let a = if enc.has_alpha() { s[bin - 1] as u32 } else { 255 };
                px[alpha] = int_mult(a, mrow[x as usize] as u32) as u8;
                out.put_pixel(x, y, &px[..bout]);
            }
        }
        self.drawable.pixels = out.into();
        self.apply_mask = true;
        self.show_mask = false;
        Some(self.bounds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_channel_detection() {
        let mut ch = Channel::new("sel", 8, 8);
        assert!(ch.is_empty());
        ch.drawable.pixels.write_row(7, 7, &[1]);
        assert!(!ch.is_empty());
    }

    #[test]
    fn channel_requires_gray() {
        let err = Channel::from_buffer("bad", PixelBuffer::new(Encoding::Rgb, 2, 2)).unwrap_err();
        assert!(matches!(err, CompositeError::EncodingMismatch { .. }));
    }

    #[test]
    fn opaque_normal_needs_every_condition() {
        let layer = Layer::new("bg", PixelBuffer::new(Encoding::Rgb, 4, 4), (0, 0));
        assert!(layer.is_opaque_normal());
        assert!(!layer.clone().with_opacity(0.99).is_opaque_normal());
        assert!(!layer.clone().with_mode(BlendMode::Multiply).is_opaque_normal());
        let rgba = Layer::new("fg", PixelBuffer::new(Encoding::Rgba, 4, 4), (0, 0));
        assert!(!rgba.is_opaque_normal());
    }

    #[test]
    fn baking_mask_adds_alpha() {
        let mut layer = Layer::new("l", PixelBuffer::new_filled(Encoding::Gray, 2, 1, &[80]), (3, 3));
        let mut mask = Channel::new("mask", 2, 1);
        mask.drawable.offset = (3, 3);
        mask.drawable.pixels.write_row(1, 0, &[128]);
        layer.mask = Some(mask);
        assert_eq!(layer.bake_mask(), Some(Rect::new(3, 3, 2, 1)));
        assert_eq!(layer.encoding(), Encoding::GrayA);
        assert_eq!(layer.drawable.pixels.to_buffer().as_raw(), &[80, 0, 80, 128]);
        assert!(layer.mask.is_none());
    }
}
