use crate::buffer::{Encoding, PixelStore, Rect};
use crate::stack::{affect_mask, LayerStack};
use crate::item::{Channel, Layer};
use crate::ops::blend::BlendMode;
use crate::ops::combine::{opacity_to_int, CombinationMode, InitialMode, PixelParams};
use crate::ops::region::{Background, DestRegion, RegionCombiner, SrcRegion};
use crate::log_warn;

use super::{Contributor, Step};

/// Renders single layers and channels into a projection-encoded buffer.
pub struct LayerProjector<'a> {
    combiner: &'a RegionCombiner,
    /// Image-space position of projection pixel (0, 0).
    offset: (i32, i32),
    /// Visible components of the whole image (R/G/B or gray, then alpha).
    components: [bool; 4],
}

impl<'a> LayerProjector<'a> {
    pub fn new(combiner: &'a RegionCombiner, offset: (i32, i32), components: [bool; 4]) -> Self {
        Self { combiner, offset, components }
    }

    /// Routines for a layer stored in `enc`: (first contributor, stacked).
    pub fn modes_for(enc: Encoding) -> (InitialMode, CombinationMode) {
        match enc {
            Encoding::Rgb | Encoding::Gray => (InitialMode::Intensity, CombinationMode::IntenAInten),
            Encoding::Rgba | Encoding::GrayA => (InitialMode::IntensityAlpha, CombinationMode::IntenAIntenA),
            Encoding::Indexed => (InitialMode::Indexed, CombinationMode::IntenAIndexed),
            Encoding::IndexedA => (InitialMode::IndexedAlpha, CombinationMode::IntenAIndexedA),
        }
    }

    /// Render one planned step, clipped to `clip` (projection space).
    pub fn project_step(
        &self,
        stack: &LayerStack,
        step: &Step,
        clip: Rect,
        dest: &mut dyn PixelStore,
        dest_origin: (i32, i32),
    ) {
        let rect = step.rect.intersect(&clip);
        match step.item {
            Contributor::Layer(i) => self.project_layer(&stack.layers[i], dest, dest_origin, rect, step.combine),
            Contributor::Channel(i) => {
                self.project_channel(&stack.channels[i], dest, dest_origin, rect, step.combine)
            }
        }
    }

    /// Project `layer` over projection-space `rect`. `dest` holds the
    /// projection pixels starting at projection position `dest_origin`.
    pub fn project_layer(
        &self,
        layer: &Layer,
        dest: &mut dyn PixelStore,
        dest_origin: (i32, i32),
        rect: Rect,
        combine: bool,
    ) {
        if rect.is_empty() {
            return;
        }
        let enc = layer.encoding();
        let dest_enc = dest.encoding();
        assert_eq!(
            enc.base_type().projection_encoding(),
            dest_enc,
            "layer '{}' ({}) cannot project onto {}",
            layer.name(),
            enc,
            dest_enc
        );
        let (w, h) = (rect.width as u32, rect.height as u32);
        let image_x = rect.x + self.offset.0;
        let image_y = rect.y + self.offset.1;
        let mut region = DestRegion::new(dest, rect.x - dest_origin.0, rect.y - dest_origin.1)
            .with_origin(rect.x, rect.y);

        if layer.show_mask
            && let Some(mask) = &layer.mask
        {
            let src = SrcRegion::new(
                &mask.drawable.pixels,
                image_x - mask.drawable.offset.0,
                image_y - mask.drawable.offset.1,
            );
            self.combiner.copy_gray_to_region(&src, &mut region, w, h);
            return;
        }

        let mask = if layer.apply_mask {
            layer.mask.as_ref().map(|m| {
                SrcRegion::new(&m.drawable.pixels, image_x - m.drawable.offset.0, image_y - m.drawable.offset.1)
            })
        } else {
            None
        };
        let src = SrcRegion::new(
            &layer.drawable.pixels,
            image_x - layer.drawable.offset.0,
            image_y - layer.drawable.offset.1,
        );
        let params = PixelParams::new(opacity_to_int(layer.opacity), layer.mode)
            .with_affect(affect_mask(dest_enc, self.components))
            .with_colormap(layer.drawable.colormap.as_deref());

        let (initial, combination) = Self::modes_for(enc);
        if combine {
            if let Err(e) =
                self.combiner.combine_regions(&Background::Dest, &src, mask.as_ref(), &mut region, w, h, combination, &params)
            {
                log_warn!("layer '{}' skipped: {}", layer.name(), e);
            }
        } else {
            self.combiner.initial_region(&src, mask.as_ref(), &mut region, w, h, initial, &params);
        }
    }

    /// Project a channel as a tinted overlay (or, first, as opaque gray).
    pub fn project_channel(
        &self,
        channel: &Channel,
        dest: &mut dyn PixelStore,
        dest_origin: (i32, i32),
        rect: Rect,
        combine: bool,
    ) {
        if rect.is_empty() {
            return;
        }
        let (w, h) = (rect.width as u32, rect.height as u32);
        let src = SrcRegion::new(
            &channel.drawable.pixels,
            rect.x + self.offset.0 - channel.drawable.offset.0,
            rect.y + self.offset.1 - channel.drawable.offset.1,
        );
        let mut region = DestRegion::new(dest, rect.x - dest_origin.0, rect.y - dest_origin.1)
            .with_origin(rect.x, rect.y);
        let params = PixelParams::new(opacity_to_int(channel.opacity), BlendMode::Normal)
            .with_channel_color(channel.color);

        if combine {
            let mode = if channel.show_masked {
                CombinationMode::IntenAChannelMask
            } else {
                CombinationMode::IntenAChannelSelection
            };
            if let Err(e) = self.combiner.combine_regions(&Background::Dest, &src, None, &mut region, w, h, mode, &params) {
                log_warn!("channel '{}' skipped: {}", channel.drawable.name, e);
            }
        } else {
            self.combiner.initial_region(&src, None, &mut region, w, h, InitialMode::Channel, &params);
        }
    }
}
