// ============================================================================
// REGION COMBINER — drives the row routines over rectangular regions
// ============================================================================
//
// Work is done in bands of `band_rows` rows: every input row of the band is
// read serially, the output rows are computed in parallel (rows are
// independent), then written back serially. Bands never overlap, so writing
// one band never disturbs the inputs of the next.

use rayon::prelude::*;

use crate::buffer::{read_row_clipped, Encoding, PixelStore};
use crate::ops::combine::{
    combine_row, copy_gray_row, initial_row, replace_row, CombinationMode, InitialMode, PixelParams, RowLayout,
};
use crate::error::{CompositeError, Result};
use crate::settings::ProjectionSettings;

/// Read-only view of a store starting at `(x, y)`. Rows that hang off the
/// store's edges read as zero.
#[derive(Clone, Copy)]
pub struct SrcRegion<'a> {
    pub store: &'a dyn PixelStore,
    pub x: i32,
    pub y: i32,
}

impl<'a> SrcRegion<'a> {
    pub fn new(store: &'a dyn PixelStore, x: i32, y: i32) -> Self {
        Self { store, x, y }
    }
}

/// Writable view of a store starting at `(x, y)`. Must lie inside the store.
pub struct DestRegion<'a> {
    pub store: &'a mut dyn PixelStore,
    pub x: i32,
    pub y: i32,
    /// Canvas position of the region's first pixel; Dissolve noise is keyed on it.
    pub origin: (i32, i32),
}

impl<'a> DestRegion<'a> {
    pub fn new(store: &'a mut dyn PixelStore, x: i32, y: i32) -> Self {
        Self { store, x, y, origin: (x, y) }
    }

    pub fn with_origin(mut self, x: i32, y: i32) -> Self {
        self.origin = (x, y);
        self
    }
}

/// Where the background of a combine comes from.
#[derive(Clone, Copy)]
pub enum Background<'a> {
    /// The destination's current contents (in-place combine).
    Dest,
    /// A separate buffer in the destination's encoding.
    Region(SrcRegion<'a>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionCombiner {
    pub band_rows: u32,
    /// Below this many pixels the band is computed on the calling thread.
    pub parallel_min_pixels: u64,
}

impl Default for RegionCombiner {
    fn default() -> Self {
        Self::from_settings(&ProjectionSettings::default())
    }
}

struct RowLens {
    bg: usize,
    fg: usize,
    mask: usize,
    out: usize,
}

fn row(buf: &[u8], r: usize, len: usize) -> &[u8] {
    &buf[r * len..(r + 1) * len]
}

fn row_mut(buf: &mut [u8], r: usize, len: usize) -> &mut [u8] {
    &mut buf[r * len..(r + 1) * len]
}

impl RegionCombiner {
    pub fn from_settings(settings: &ProjectionSettings) -> Self {
        Self {
            band_rows: settings.band_rows.max(1),
            parallel_min_pixels: settings.parallel_min_pixels,
        }
    }

    /// Compute on the calling thread only.
    pub fn serial() -> Self {
        Self { band_rows: 64, parallel_min_pixels: u64::MAX }
    }

    /// First contribution: expand `src` into `dest` with no background.
    #[allow(clippy::too_many_arguments)]
    pub fn initial_region(
        &self,
        src: &SrcRegion,
        mask: Option<&SrcRegion>,
        dest: &mut DestRegion,
        width: u32,
        height: u32,
        mode: InitialMode,
        params: &PixelParams,
    ) {
        let fg_enc = src.store.encoding();
        let dest_enc = dest.store.encoding();
        let origin_x = dest.origin.0;
        self.drive(dest, None, Some(src), mask, width, height, |y, _bg, fg, m, out| {
            initial_row(mode, fg_enc, dest_enc, fg, m, out, params, (origin_x, y));
        });
    }

    /// Combine `src` over `bg` (optionally masked) into `dest`.
    ///
    /// An invalid `mode` is refused before any row is read, leaving `dest`
    /// untouched; what that means for the operation is the caller's call.
    #[allow(clippy::too_many_arguments)]
    pub fn combine_regions(
        &self,
        bg: &Background,
        src: &SrcRegion,
        mask: Option<&SrcRegion>,
        dest: &mut DestRegion,
        width: u32,
        height: u32,
        mode: CombinationMode,
        params: &PixelParams,
    ) -> Result<()> {
        let layout = RowLayout::new(dest.store.encoding(), src.store.encoding());
        if !mode.is_valid() {
            return Err(CompositeError::IllegalCombination { dest: layout.bg, src: layout.fg });
        }
        let origin_x = dest.origin.0;
        self.drive(dest, Some(bg), Some(src), mask, width, height, |y, bg_row, fg, m, out| {
            combine_row(mode, layout, bg_row, fg, m, out, params, (origin_x, y));
        });
        Ok(())
    }

    /// Like [`combine_regions`](Self::combine_regions), but coverage is
    /// interpolated too: transparent source pixels clear the background.
    #[allow(clippy::too_many_arguments)]
    pub fn combine_regions_replace(
        &self,
        bg: &Background,
        src: &SrcRegion,
        mask: &SrcRegion,
        dest: &mut DestRegion,
        width: u32,
        height: u32,
        params: &PixelParams,
    ) {
        let layout = RowLayout::new(dest.store.encoding(), src.store.encoding());
        self.drive(dest, Some(bg), Some(src), Some(mask), width, height, |_y, bg_row, fg, m, out| {
            let m = m.unwrap_or(&[]);
            replace_row(layout, bg_row, fg, m, out, params);
        });
    }

    /// Expand one-channel gray into `dest` at full opacity.
    pub fn copy_gray_to_region(&self, src: &SrcRegion, dest: &mut DestRegion, width: u32, height: u32) {
        assert_eq!(src.store.encoding(), Encoding::Gray, "copy_gray_to_region needs gray input");
        let dest_enc = dest.store.encoding();
        self.drive(dest, None, Some(src), None, width, height, |_y, _bg, fg, _m, out| {
            copy_gray_row(fg, out, dest_enc);
        });
    }

    /// Band loop shared by every region operation. `compute` gets the
    /// canvas row (from the region's origin), then the background,
    /// foreground and mask rows.
    #[allow(clippy::too_many_arguments)]
    fn drive<C>(
        &self,
        dest: &mut DestRegion,
        bg: Option<&Background>,
        fg: Option<&SrcRegion>,
        mask: Option<&SrcRegion>,
        width: u32,
        height: u32,
        compute: C,
    ) where
        C: Fn(i32, &[u8], &[u8], Option<&[u8]>, &mut [u8]) + Sync,
    {
        if width == 0 || height == 0 {
            return;
        }
        let w = width as usize;
        let dest_bytes = dest.store.bytes();
        if let Some(Background::Region(b)) = bg {
            assert_eq!(
                b.store.encoding(),
                dest.store.encoding(),
                "background region must share the destination encoding"
            );
        }
        if let Some(m) = mask {
            assert_eq!(m.store.bytes(), 1, "mask regions are one byte per pixel");
        }
        let lens = RowLens {
            bg: if bg.is_some() { w * dest_bytes } else { 0 },
            fg: fg.map_or(0, |f| w * f.store.bytes()),
            mask: if mask.is_some() { w } else { 0 },
            out: w * dest_bytes,
        };

        let band = self.band_rows.max(1) as usize;
        let parallel = width as u64 * height as u64 >= self.parallel_min_pixels;
        let (mut bg_buf, mut fg_buf, mut mask_buf, mut out_buf) = (Vec::new(), Vec::new(), Vec::new(), Vec::new());

        let mut y0 = 0usize;
        while y0 < height as usize {
            let rows = band.min(height as usize - y0);
            bg_buf.resize(rows * lens.bg, 0);
            fg_buf.resize(rows * lens.fg, 0);
            mask_buf.resize(rows * lens.mask, 0);
            out_buf.resize(rows * lens.out, 0);

            for r in 0..rows {
                let dy = (y0 + r) as i32;
                match bg {
                    Some(Background::Dest) => dest.store.read_row(
                        dest.x as u32,
                        (dest.y + dy) as u32,
                        row_mut(&mut bg_buf, r, lens.bg),
                    ),
                    Some(Background::Region(b)) => {
                        read_row_clipped(b.store, b.x, b.y + dy, row_mut(&mut bg_buf, r, lens.bg))
                    }
                    None => {}
                }
                if let Some(f) = fg {
                    read_row_clipped(f.store, f.x, f.y + dy, row_mut(&mut fg_buf, r, lens.fg));
                }
                if let Some(m) = mask {
                    read_row_clipped(m.store, m.x, m.y + dy, row_mut(&mut mask_buf, r, lens.mask));
                }
            }

            let base_y = dest.origin.1 + y0 as i32;
            let job = |(r, out_row): (usize, &mut [u8])| {
                let m = if lens.mask > 0 { Some(row(&mask_buf, r, lens.mask)) } else { None };
                compute(base_y + r as i32, row(&bg_buf, r, lens.bg), row(&fg_buf, r, lens.fg), m, out_row);
            };
            if parallel && rows > 1 {
                out_buf.par_chunks_mut(lens.out).enumerate().for_each(job);
            } else {
                out_buf.chunks_mut(lens.out).enumerate().for_each(job);
            }

            for r in 0..rows {
                dest.store.write_row(
                    dest.x as u32,
                    (dest.y + (y0 + r) as i32) as u32,
                    row(&out_buf, r, lens.out),
                );
            }
            y0 += rows;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{PixelBuffer, Rect, TiledBuffer};
    use crate::ops::blend::BlendMode;

    fn parallel() -> RegionCombiner {
        RegionCombiner { band_rows: 3, parallel_min_pixels: 0 }
    }

    #[test]
    fn combine_in_place_over_offset_regions() {
        let mut dest = PixelBuffer::new_filled(Encoding::Rgba, 8, 8, &[0, 0, 255, 255]);
        let src = PixelBuffer::new_filled(Encoding::Rgba, 4, 4, &[255, 0, 0, 255]);
        let params = PixelParams::new(255, BlendMode::Normal);
        parallel().combine_regions(
            &Background::Dest,
            &SrcRegion::new(&src, 1, 1),
            None,
            &mut DestRegion::new(&mut dest, 2, 2),
            3,
            3,
            CombinationMode::IntenAIntenA,
            &params,
        ).unwrap();
        assert_eq!(dest.pixel(1, 1), &[0, 0, 255, 255]);
        assert_eq!(dest.pixel(2, 2), &[255, 0, 0, 255]);
        assert_eq!(dest.pixel(4, 4), &[255, 0, 0, 255]);
        assert_eq!(dest.pixel(5, 5), &[0, 0, 255, 255]);
    }

    #[test]
    fn serial_and_parallel_agree_on_tiled_destinations() {
        let src = PixelBuffer::from_raw(
            Encoding::Rgba,
            70,
            70,
            (0..70 * 70 * 4).map(|i| (i * 37 % 251) as u8).collect(),
        )
        .unwrap();
        let params = PixelParams::new(200, BlendMode::Overlay);
        let mut results = Vec::new();
        for combiner in [RegionCombiner::serial(), parallel()] {
            let mut dest = TiledBuffer::from_buffer(&PixelBuffer::new_filled(Encoding::Rgba, 70, 70, &[90, 140, 30, 200]));
            combiner.combine_regions(
                &Background::Dest,
                &SrcRegion::new(&src, 0, 0),
                None,
                &mut DestRegion::new(&mut dest, 0, 0),
                70,
                70,
                CombinationMode::IntenAIntenA,
                &params,
            ).unwrap();
            results.push(dest.to_buffer());
        }
        assert_eq!(results[0], results[1]);
    }

    #[test]
    fn separate_background_leaves_it_untouched() {
        let base = PixelBuffer::new_filled(Encoding::GrayA, 4, 4, &[100, 255]);
        let src = PixelBuffer::new_filled(Encoding::GrayA, 4, 4, &[200, 255]);
        let mut dest = PixelBuffer::new(Encoding::GrayA, 4, 4);
        let params = PixelParams::new(255, BlendMode::Multiply);
        RegionCombiner::serial().combine_regions(
            &Background::Region(SrcRegion::new(&base, 0, 0)),
            &SrcRegion::new(&src, 0, 0),
            None,
            &mut DestRegion::new(&mut dest, 0, 0),
            4,
            4,
            CombinationMode::IntenAIntenA,
            &params,
        ).unwrap();
        assert_eq!(dest.pixel(3, 3), &[78, 255]);
        assert_eq!(base.pixel(3, 3), &[100, 255]);
    }

    #[test]
    fn masked_replace_clears_only_under_the_mask() {
        let mut dest = PixelBuffer::new_filled(Encoding::Rgba, 4, 1, &[255, 0, 0, 255]);
        let src = PixelBuffer::new(Encoding::Rgba, 4, 1);
        let mut mask = PixelBuffer::new(Encoding::Gray, 4, 1);
        mask.fill_rect(Rect::new(0, 0, 2, 1), &[255]);
        RegionCombiner::serial().combine_regions_replace(
            &Background::Dest,
            &SrcRegion::new(&src, 0, 0),
            &SrcRegion::new(&mask, 0, 0),
            &mut DestRegion::new(&mut dest, 0, 0),
            4,
            1,
            &PixelParams::new(255, BlendMode::Replace),
        );
        assert_eq!(dest.pixel(0, 0)[3], 0);
        assert_eq!(dest.pixel(3, 0), &[255, 0, 0, 255]);
    }

    #[test]
    fn gray_copy_fills_region() {
        let src = PixelBuffer::new_filled(Encoding::Gray, 2, 2, &[33]);
        let mut dest = PixelBuffer::new(Encoding::Rgba, 3, 3);
        RegionCombiner::serial().copy_gray_to_region(&SrcRegion::new(&src, 0, 0), &mut DestRegion::new(&mut dest, 1, 1), 2, 2);
        assert_eq!(dest.pixel(2, 2), &[33, 33, 33, 255]);
        assert_eq!(dest.pixel(0, 0), &[0, 0, 0, 0]);
    }
}
