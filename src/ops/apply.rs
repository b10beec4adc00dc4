// ============================================================================
// APPLY / REPLACE — merge an external buffer into a drawable
// ============================================================================

use crate::buffer::{Encoding, PixelBuffer, PixelStore, Rect};
use crate::error::{CompositeError, Result};
use crate::history::{DrawableUndo, FadeInfo, History, PixelPatch, UndoSink};
use crate::stack::Image;
use crate::item::{Channel, ItemId};
use crate::ops::blend::{int_mult, BlendMode};
use crate::ops::combine::{opacity_to_int, CombinationMode, PixelParams};
use crate::ops::region::{Background, DestRegion, SrcRegion};
use crate::{log_info, log_warn};

/// Paint parameters for [`apply_buffer`] and [`replace_buffer`].
pub struct ApplyOptions<'a> {
    pub opacity: f64,
    pub mode: BlendMode,
    /// Blend over this (drawable-local) buffer instead of the current pixels.
    pub base: Option<&'a PixelBuffer>,
    /// Write here (drawable-local) instead of into the drawable. No undo
    /// record is made and the projection is left alone.
    pub dest: Option<&'a mut PixelBuffer>,
    /// Undo description; a record is only pushed when this and a sink are given.
    pub undo: Option<String>,
}

impl<'a> ApplyOptions<'a> {
    pub fn new(opacity: f64, mode: BlendMode) -> Self {
        Self { opacity, mode, base: None, dest: None, undo: None }
    }

    pub fn with_undo(mut self, description: impl Into<String>) -> Self {
        self.undo = Some(description.into());
        self
    }

    pub fn with_base(mut self, base: &'a PixelBuffer) -> Self {
        self.base = Some(base);
        self
    }

    pub fn with_dest(mut self, dest: &'a mut PixelBuffer) -> Self {
        self.dest = Some(dest);
        self
    }
}

/// Clipped placement shared by apply and replace.
struct Placement {
    /// Drawable-local destination rectangle.
    rect: Rect,
    /// Source position of `rect`'s first pixel.
    src_x: i32,
    src_y: i32,
    drawable_offset: (i32, i32),
}

/// Clip `source_rect` placed at `(x, y)` to the destination and then to the
/// selection (stored in image space, hence offset by the drawable position).
fn place(
    source: &PixelBuffer,
    source_rect: Rect,
    x: i32,
    y: i32,
    dest_bounds: Rect,
    selection: Option<&Channel>,
    drawable_offset: (i32, i32),
) -> Option<Placement> {
    let src = source_rect.intersect(&source.bounds());
    let x = x + (src.x - source_rect.x);
    let y = y + (src.y - source_rect.y);
    let mut rect = Rect::new(x, y, src.width, src.height).intersect(&dest_bounds);
    if let Some(sel) = selection {
        rect = rect.intersect(&sel.bounds().translate(-drawable_offset.0, -drawable_offset.1));
    }
    if rect.is_empty() {
        return None;
    }
    Some(Placement {
        rect,
        src_x: src.x + (rect.x - x),
        src_y: src.y + (rect.y - y),
        drawable_offset,
    })
}

fn check_base(base: Option<&PixelBuffer>, dest_enc: Encoding) -> Result<()> {
    match base {
        Some(b) if b.encoding() != dest_enc => {
            Err(CompositeError::EncodingMismatch { expected: dest_enc, actual: b.encoding() })
        }
        _ => Ok(()),
    }
}

/// Combine `source_rect` of `source` into drawable `target` at drawable-local
/// `(x, y)`, limited by the selection.
///
/// Returns the drawable-local rectangle that was written, `None` when the
/// request clips away. An illegal encoding pairing fails before anything is
/// touched.
#[allow(clippy::too_many_arguments)]
pub fn apply_buffer(
    image: &mut Image,
    target: ItemId,
    source: &PixelBuffer,
    source_rect: Rect,
    x: i32,
    y: i32,
    mut opts: ApplyOptions<'_>,
    undo: Option<&mut dyn UndoSink>,
) -> Result<Option<Rect>> {
    let combiner = *image.projection().combiner();
    let t = image.target_mut(target)?;
    let drawable_enc = t.drawable.encoding();
    let dest_enc = opts.dest.as_ref().map_or(drawable_enc, |d| d.encoding());

    let mode = CombinationMode::resolve(dest_enc, source.encoding());
    if !mode.is_valid() {
        log_warn!(
            "apply to '{}' refused: cannot combine {} onto {}",
            t.drawable.name,
            source.encoding(),
            dest_enc
        );
        return Err(CompositeError::IllegalCombination { dest: dest_enc, src: source.encoding() });
    }
    check_base(opts.base, dest_enc)?;

    let mut bounds = t.drawable.pixels.bounds();
    if let Some(d) = &opts.dest {
        bounds = bounds.intersect(&d.bounds());
    }
    let Some(p) = place(source, source_rect, x, y, bounds, t.selection, t.drawable.offset) else {
        return Ok(None);
    };
    let rect = p.rect;
    let live = opts.dest.is_none();
    let record = live && undo.is_some() && opts.undo.is_some();
    let before = record.then(|| PixelPatch::capture(target, t.drawable, rect));

    let params = PixelParams::new(opacity_to_int(opts.opacity), opts.mode)
        .with_affect(t.affect)
        .with_colormap(t.drawable.colormap.as_deref());
    let bg = match opts.base {
        Some(b) => Background::Region(SrcRegion::new(b, rect.x, rect.y)),
        None => Background::Dest,
    };
    let src = SrcRegion::new(source, p.src_x, p.src_y);
    let mask = t.selection.map(|s| {
        SrcRegion::new(
            &s.drawable.pixels,
            rect.x + p.drawable_offset.0 - s.drawable.offset.0,
            rect.y + p.drawable_offset.1 - s.drawable.offset.1,
        )
    });
    let store: &mut dyn PixelStore = match opts.dest.as_deref_mut() {
        Some(d) => d,
        None => &mut t.drawable.pixels,
    };
    let mut region = DestRegion::new(store, rect.x, rect.y)
        .with_origin(rect.x + p.drawable_offset.0, rect.y + p.drawable_offset.1);
    combiner.combine_regions(
        &bg,
        &src,
        mask.as_ref(),
        &mut region,
        rect.width as u32,
        rect.height as u32,
        mode,
        &params,
    )?;

    if let (Some(before), Some(sink), Some(desc)) = (before, undo, opts.undo.take()) {
        let after = PixelPatch::capture(target, image.drawable(target)?, rect);
        let fade = FadeInfo {
            target,
            mode: opts.mode,
            opacity: opts.opacity,
            applied: PixelBuffer::copy_from(source, Rect::new(p.src_x, p.src_y, rect.width, rect.height)),
            x: rect.x,
            y: rect.y,
        };
        log_info!("apply '{}' on {} at {}", desc, target, rect);
        sink.push_undo(Box::new(DrawableUndo::new(desc, before, after).with_fade(fade)));
    }
    if live {
        image.drawable_changed(target, rect.translate(p.drawable_offset.0, p.drawable_offset.1));
    }
    Ok(Some(rect))
}

/// Like [`apply_buffer`], but transparent source pixels clear the drawable
/// where `mask` allows. The mask is positioned independently at
/// `(mask_x, mask_y)` and must be one-channel and cover the source rectangle;
/// a non-empty selection further limits it.
#[allow(clippy::too_many_arguments)]
pub fn replace_buffer(
    image: &mut Image,
    target: ItemId,
    source: &PixelBuffer,
    source_rect: Rect,
    mask: &PixelBuffer,
    mask_x: i32,
    mask_y: i32,
    x: i32,
    y: i32,
    mut opts: ApplyOptions<'_>,
    undo: Option<&mut dyn UndoSink>,
) -> Result<Option<Rect>> {
    if mask.encoding() != Encoding::Gray {
        return Err(CompositeError::MaskSizeMismatch(format!(
            "replace mask must be one-channel, got {}",
            mask.encoding()
        )));
    }
    let src_clip = source_rect.intersect(&source.bounds());
    let needed = Rect::new(
        mask_x + (src_clip.x - source_rect.x),
        mask_y + (src_clip.y - source_rect.y),
        src_clip.width,
        src_clip.height,
    );
    if !src_clip.is_empty() && !mask.bounds().contains(&needed) {
        return Err(CompositeError::MaskSizeMismatch(format!(
            "mask {}x{} does not cover {}",
            mask.width(),
            mask.height(),
            needed
        )));
    }

    let combiner = *image.projection().combiner();
    let t = image.target_mut(target)?;
    let drawable_enc = t.drawable.encoding();
    let dest_enc = opts.dest.as_ref().map_or(drawable_enc, |d| d.encoding());
    if !CombinationMode::resolve(dest_enc, source.encoding()).is_valid() {
        log_warn!(
            "replace on '{}' refused: cannot combine {} onto {}",
            t.drawable.name,
            source.encoding(),
            dest_enc
        );
        return Err(CompositeError::IllegalCombination { dest: dest_enc, src: source.encoding() });
    }
    check_base(opts.base, dest_enc)?;

    let mut bounds = t.drawable.pixels.bounds();
    if let Some(d) = &opts.dest {
        bounds = bounds.intersect(&d.bounds());
    }
    let Some(p) = place(source, source_rect, x, y, bounds, t.selection, t.drawable.offset) else {
        return Ok(None);
    };
    let rect = p.rect;
    let (w, h) = (rect.width as u32, rect.height as u32);
    let mx = mask_x + (p.src_x - source_rect.x);
    let my = mask_y + (p.src_y - source_rect.y);

    // Fold the selection into a private copy of the mask.
    let mut combined = PixelBuffer::copy_from(mask, Rect::new(mx, my, rect.width, rect.height));
    if let Some(sel) = t.selection {
        let sel_part = PixelBuffer::copy_from(
            &sel.drawable.pixels,
            Rect::new(
                rect.x + p.drawable_offset.0 - sel.drawable.offset.0,
                rect.y + p.drawable_offset.1 - sel.drawable.offset.1,
                rect.width,
                rect.height,
            ),
        );
        let merged: Vec<u8> = combined
            .as_raw()
            .iter()
            .zip(sel_part.as_raw())
            .map(|(&m, &s)| int_mult(m as u32, s as u32) as u8)
            .collect();
        if let Some(buf) = PixelBuffer::from_raw(Encoding::Gray, w, h, merged) {
            combined = buf;
        }
    }

    let live = opts.dest.is_none();
    let record = live && undo.is_some() && opts.undo.is_some();
    let before = record.then(|| PixelPatch::capture(target, t.drawable, rect));

    let params = PixelParams::new(opacity_to_int(opts.opacity), opts.mode)
        .with_affect(t.affect)
        .with_colormap(t.drawable.colormap.as_deref());
    let bg = match opts.base {
        Some(b) => Background::Region(SrcRegion::new(b, rect.x, rect.y)),
        None => Background::Dest,
    };
    let src = SrcRegion::new(source, p.src_x, p.src_y);
    let mask_region = SrcRegion::new(&combined, 0, 0);
    let store: &mut dyn PixelStore = match opts.dest.as_deref_mut() {
        Some(d) => d,
        None => &mut t.drawable.pixels,
    };
    let mut region = DestRegion::new(store, rect.x, rect.y)
        .with_origin(rect.x + p.drawable_offset.0, rect.y + p.drawable_offset.1);
    combiner.combine_regions_replace(&bg, &src, &mask_region, &mut region, w, h, &params);

    if let (Some(before), Some(sink), Some(desc)) = (before, undo, opts.undo.take()) {
        let after = PixelPatch::capture(target, image.drawable(target)?, rect);
        log_info!("replace '{}' on {} at {}", desc, target, rect);
        sink.push_undo(Box::new(DrawableUndo::new(desc, before, after)));
    }
    if live {
        image.drawable_changed(target, rect.translate(p.drawable_offset.0, p.drawable_offset.1));
    }
    Ok(Some(rect))
}

/// Re-blend the most recent apply at a new mode and opacity: the pre-image is
/// restored and the applied pixels go down again. The fade becomes the new
/// most recent undo step. Returns `None` when the last step isn't fadeable.
pub fn fade_last(image: &mut Image, history: &mut History, mode: BlendMode, opacity: f64) -> Result<Option<Rect>> {
    let Some(info) = history.last_fade().cloned() else {
        return Ok(None);
    };
    history.undo(image);
    let opts = ApplyOptions::new(opacity, mode).with_undo(format!("Fade {}", mode.name()));
    let bounds = info.applied.bounds();
    apply_buffer(image, info.target, &info.applied, bounds, info.x, info.y, opts, Some(history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BaseType;
    use crate::item::Layer;
    use crate::settings::ProjectionSettings;

    fn rgb_image() -> (Image, ItemId) {
        let mut img = Image::new(BaseType::Rgb, 16, 16, &ProjectionSettings::default());
        let layer = Layer::new("bg", PixelBuffer::new_filled(Encoding::Rgba, 8, 8, &[0, 0, 255, 255]), (4, 4));
        let id = img.add_layer(layer, None).unwrap();
        (img, id)
    }

    #[test]
    fn placement_clips_source_and_destination() {
        let src = PixelBuffer::new(Encoding::Rgba, 10, 10);
        let p = place(&src, Rect::new(-2, 0, 10, 10), -3, 1, Rect::new(0, 0, 8, 8), None, (0, 0)).unwrap();
        assert_eq!(p.rect, Rect::new(0, 1, 5, 7));
        assert_eq!((p.src_x, p.src_y), (3, 0));
    }

    #[test]
    fn apply_outside_drawable_is_a_noop() {
        let (mut img, id) = rgb_image();
        let src = PixelBuffer::new_filled(Encoding::Rgba, 4, 4, &[255, 0, 0, 255]);
        let out = apply_buffer(&mut img, id, &src, src.bounds(), 20, 20, ApplyOptions::new(1.0, BlendMode::Normal), None);
        assert!(matches!(out, Ok(None)));
    }

    #[test]
    fn apply_respects_selection_offset() {
        let (mut img, id) = rgb_image();
        let mut sel = Channel::new("sel", 16, 16);
        sel.drawable.pixels.write_row(5, 5, &[255]);
        img.set_selection(sel).unwrap();
        let src = PixelBuffer::new_filled(Encoding::Rgba, 8, 8, &[255, 0, 0, 255]);
        let written = apply_buffer(&mut img, id, &src, src.bounds(), 0, 0, ApplyOptions::new(1.0, BlendMode::Normal), None)
            .unwrap()
            .unwrap();
        assert_eq!(written, Rect::new(0, 0, 8, 8));
        let px = img.layer(id).unwrap().drawable.pixels.to_buffer();
        assert_eq!(px.pixel(1, 1), &[255, 0, 0, 255]);
        assert_eq!(px.pixel(0, 0), &[0, 0, 255, 255]);
    }

    #[test]
    fn scratch_destination_leaves_drawable_alone() {
        let (mut img, id) = rgb_image();
        let base = PixelBuffer::new_filled(Encoding::Rgba, 8, 8, &[0, 255, 0, 255]);
        let mut scratch = PixelBuffer::new(Encoding::Rgba, 8, 8);
        let src = PixelBuffer::new_filled(Encoding::Rgba, 2, 2, &[255, 0, 0, 255]);
        let mut history = History::default();
        let opts = ApplyOptions::new(1.0, BlendMode::Normal).with_base(&base).with_dest(&mut scratch).with_undo("paint");
        apply_buffer(&mut img, id, &src, src.bounds(), 3, 3, opts, Some(&mut history)).unwrap();
        assert_eq!(scratch.pixel(3, 3), &[255, 0, 0, 255]);
        assert_eq!(scratch.pixel(0, 0), &[0, 0, 0, 0]);
        assert_eq!(img.layer(id).unwrap().drawable.pixels.to_buffer().pixel(3, 3), &[0, 0, 255, 255]);
        assert!(!history.can_undo());
    }

    #[test]
    fn replace_mask_must_be_gray_and_large_enough() {
        let (mut img, id) = rgb_image();
        let src = PixelBuffer::new(Encoding::Rgba, 4, 4);
        let rgb_mask = PixelBuffer::new(Encoding::Rgb, 4, 4);
        let small = PixelBuffer::new(Encoding::Gray, 2, 2);
        let opts = || ApplyOptions::new(1.0, BlendMode::Replace);
        assert!(matches!(
            replace_buffer(&mut img, id, &src, src.bounds(), &rgb_mask, 0, 0, 0, 0, opts(), None),
            Err(CompositeError::MaskSizeMismatch(_))
        ));
        assert!(matches!(
            replace_buffer(&mut img, id, &src, src.bounds(), &small, 0, 0, 0, 0, opts(), None),
            Err(CompositeError::MaskSizeMismatch(_))
        ));
    }

    #[test]
    fn base_must_share_destination_encoding() {
        let (mut img, id) = rgb_image();
        let base = PixelBuffer::new(Encoding::Rgb, 8, 8);
        let src = PixelBuffer::new(Encoding::Rgba, 2, 2);
        let err = apply_buffer(&mut img, id, &src, src.bounds(), 0, 0, ApplyOptions::new(1.0, BlendMode::Normal).with_base(&base), None)
            .unwrap_err();
        assert!(matches!(err, CompositeError::EncodingMismatch { expected: Encoding::Rgba, actual: Encoding::Rgb }));
    }
}
