// ============================================================================
// STACK — layer stack, selection and the projection that flattens them
// ============================================================================

use std::sync::Arc;

use crate::buffer::{BaseType, Colormap, Encoding, PixelBuffer, Rect};
use crate::error::{CompositeError, Result};
use crate::item::{Channel, Drawable, ItemId, Layer};
use crate::ops::blend::BlendMode;
use crate::projection::{ConstructStrategy, Projection};
use crate::settings::{Engine, ProjectionSettings};
use crate::{log_info, log_warn};

/// Component slots used by the visible/active toggles.
pub const COMPONENT_RED: usize = 0;
pub const COMPONENT_GREEN: usize = 1;
pub const COMPONENT_BLUE: usize = 2;
pub const COMPONENT_GRAY: usize = 0;
pub const COMPONENT_ALPHA: usize = 3;

/// Map image component toggles onto the channel slots of `enc`: three
/// color channels use R/G/B then alpha; one-channel data uses gray then alpha.
pub fn affect_mask(enc: Encoding, components: [bool; 4]) -> [bool; 4] {
    if enc.color_channels() == 3 {
        components
    } else {
        [components[COMPONENT_GRAY], components[COMPONENT_ALPHA], true, true]
    }
}

/// Everything the projection reads. Kept apart from [`Image`] so the
/// projection can borrow it while being mutated itself.
#[derive(Clone, Debug)]
pub struct LayerStack {
    pub width: u32,
    pub height: u32,
    pub base_type: BaseType,
    pub colormap: Option<Arc<Colormap>>,
    /// Index 0 is the bottom layer.
    pub layers: Vec<Layer>,
    /// Index 0 is the top channel.
    pub channels: Vec<Channel>,
    pub visible_components: [bool; 4],
    pub active_components: [bool; 4],
}

impl LayerStack {
    pub fn new(base_type: BaseType, width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            base_type,
            colormap: None,
            layers: Vec::new(),
            channels: Vec::new(),
            visible_components: [true; 4],
            active_components: [true; 4],
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::from_size(self.width, self.height)
    }

    pub fn layer_index(&self, id: ItemId) -> Option<usize> {
        self.layers.iter().position(|l| l.id() == id)
    }

    pub fn channel_index(&self, id: ItemId) -> Option<usize> {
        self.channels.iter().position(|c| c.id() == id)
    }
}

/// The drawable an edit writes to, with what limits the edit.
pub struct Target<'a> {
    pub drawable: &'a mut Drawable,
    /// `None` when the target is the selection itself or nothing is selected.
    pub selection: Option<&'a Channel>,
    pub affect: [bool; 4],
}

#[derive(Debug)]
pub struct Image {
    stack: LayerStack,
    selection: Channel,
    projection: Projection,
}

impl Image {
    pub fn new(base_type: BaseType, width: u32, height: u32, settings: &ProjectionSettings) -> Self {
        Self {
            stack: LayerStack::new(base_type, width, height),
            selection: Channel::new("Selection Mask", width, height),
            projection: Projection::new(base_type, width, height, settings),
        }
    }

    pub fn width(&self) -> u32 {
        self.stack.width
    }

    pub fn height(&self) -> u32 {
        self.stack.height
    }

    pub fn base_type(&self) -> BaseType {
        self.stack.base_type
    }

    pub fn bounds(&self) -> Rect {
        self.stack.bounds()
    }

    pub fn stack(&self) -> &LayerStack {
        &self.stack
    }

    pub fn layers(&self) -> &[Layer] {
        &self.stack.layers
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn projection_mut(&mut self) -> &mut Projection {
        &mut self.projection
    }

    // ========================================================================
    // PROJECTION
    // ========================================================================

    pub fn invalidate(&mut self, rect: Rect) {
        self.projection.invalidate(rect);
    }

    /// Recompute `rect` right away; returns the constructed image rectangle.
    pub fn construct(&mut self, rect: Rect) -> Rect {
        self.projection.construct(&self.stack, rect)
    }

    /// Construct every pending dirty rectangle.
    pub fn flush(&mut self) -> usize {
        self.projection.flush(&self.stack)
    }

    /// Projection pixels for `rect`, constructing whatever is still dirty.
    pub fn projection_pixels(&mut self, rect: Rect) -> PixelBuffer {
        self.projection.valid_pixels(&self.stack, rect)
    }

    pub fn set_engine(&mut self, engine: Engine) {
        self.projection.replace_strategy(crate::projection::strategy_for(engine));
    }

    pub fn set_strategy(&mut self, strategy: Box<dyn ConstructStrategy>) {
        self.projection.replace_strategy(strategy);
    }

    /// Change the canvas size. Layers keep their offsets; the selection is
    /// dropped.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.stack.width = width;
        self.stack.height = height;
        self.selection = Channel::new("Selection Mask", width, height);
        for channel in &mut self.stack.channels {
            if channel.drawable.width() != width || channel.drawable.height() != height {
                log_warn!("channel '{}' dropped its contents on resize", channel.drawable.name);
                let fresh = Channel::new(channel.drawable.name.clone(), width, height);
                channel.drawable.pixels = fresh.drawable.pixels;
            }
        }
        self.projection.resize(width, height);
    }

    // ========================================================================
    // LAYERS
    // ========================================================================

    pub fn layer(&self, id: ItemId) -> Result<&Layer> {
        self.stack
            .layer_index(id)
            .map(|i| &self.stack.layers[i])
            .ok_or(CompositeError::UnknownItem(id))
    }

    fn index_of(&self, id: ItemId) -> Result<usize> {
        self.stack.layer_index(id).ok_or(CompositeError::UnknownItem(id))
    }

    /// Mutate a layer; whatever it covered before and after is invalidated.
    fn edit_layer<T>(&mut self, id: ItemId, edit: impl FnOnce(&mut Layer) -> T) -> Result<T> {
        let index = self.index_of(id)?;
        let layer = &mut self.stack.layers[index];
        let before = layer.bounds();
        let out = edit(layer);
        let after = layer.bounds();
        self.projection.invalidate(before);
        if after != before {
            self.projection.invalidate(after);
        }
        Ok(out)
    }

    /// Insert `layer` at `position` (bottom = 0) or on top.
    pub fn add_layer(&mut self, mut layer: Layer, position: Option<usize>) -> Result<ItemId> {
        let enc = layer.encoding();
        if enc.base_type() != self.stack.base_type {
            return Err(CompositeError::EncodingMismatch {
                expected: self.stack.base_type.encoding(enc.has_alpha()),
                actual: enc,
            });
        }
        if enc.is_indexed() && layer.drawable.colormap.is_none() {
            layer.drawable.colormap = self.stack.colormap.clone();
        }
        let id = layer.id();
        let bounds = layer.bounds();
        let at = position.unwrap_or(self.stack.layers.len()).min(self.stack.layers.len());
        log_info!("add layer '{}' ({}) at {} bounds {}", layer.name(), enc, at, bounds);
        self.stack.layers.insert(at, layer);
        self.projection.invalidate(bounds);
        Ok(id)
    }

    pub fn remove_layer(&mut self, id: ItemId) -> Result<Layer> {
        let index = self.index_of(id)?;
        let layer = self.stack.layers.remove(index);
        self.projection.invalidate(layer.bounds());
        Ok(layer)
    }

    /// Move a layer to `index` (clamped to the stack).
    pub fn reorder_layer(&mut self, id: ItemId, index: usize) -> Result<()> {
        let from = self.index_of(id)?;
        let to = index.min(self.stack.layers.len() - 1);
        if from == to {
            return Ok(());
        }
        let layer = self.stack.layers.remove(from);
        let bounds = layer.bounds();
        self.stack.layers.insert(to, layer);
        self.projection.invalidate(bounds);
        Ok(())
    }

    pub fn raise_layer(&mut self, id: ItemId) -> Result<()> {
        let from = self.index_of(id)?;
        self.reorder_layer(id, from + 1)
    }

    pub fn lower_layer(&mut self, id: ItemId) -> Result<()> {
        let from = self.index_of(id)?;
        self.reorder_layer(id, from.saturating_sub(1))
    }

    pub fn set_layer_visible(&mut self, id: ItemId, visible: bool) -> Result<()> {
        self.edit_layer(id, |l| l.visible = visible)
    }

    pub fn set_layer_opacity(&mut self, id: ItemId, opacity: f64) -> Result<()> {
        self.edit_layer(id, |l| l.opacity = opacity.clamp(0.0, 1.0))
    }

    pub fn set_layer_mode(&mut self, id: ItemId, mode: BlendMode) -> Result<()> {
        self.edit_layer(id, |l| l.mode = mode)
    }

    /// Move a layer (and its mask) to a new image position.
    pub fn set_layer_offset(&mut self, id: ItemId, offset: (i32, i32)) -> Result<()> {
        self.edit_layer(id, |l| {
            let dx = offset.0 - l.drawable.offset.0;
            let dy = offset.1 - l.drawable.offset.1;
            l.drawable.offset = offset;
            if let Some(mask) = &mut l.mask {
                mask.drawable.offset.0 += dx;
                mask.drawable.offset.1 += dy;
            }
        })
    }

    pub fn set_floating(&mut self, id: ItemId, floating: bool) -> Result<()> {
        self.edit_layer(id, |l| l.floating = floating)
    }

    pub fn set_lock_alpha(&mut self, id: ItemId, locked: bool) -> Result<()> {
        let index = self.index_of(id)?;
        self.stack.layers[index].lock_alpha = locked;
        Ok(())
    }

    // ========================================================================
    // LAYER MASKS
    // ========================================================================

    /// Attach `mask` to a layer. The mask must match the layer's size and is
    /// placed at the layer's offset.
    pub fn add_mask(&mut self, id: ItemId, mut mask: Channel) -> Result<()> {
        let index = self.index_of(id)?;
        let layer = &self.stack.layers[index];
        if mask.drawable.width() != layer.drawable.width() || mask.drawable.height() != layer.drawable.height() {
            return Err(CompositeError::MaskSizeMismatch(format!(
                "mask is {}x{} but layer '{}' is {}x{}",
                mask.drawable.width(),
                mask.drawable.height(),
                layer.name(),
                layer.drawable.width(),
                layer.drawable.height()
            )));
        }
        if layer.mask.is_some() {
            log_warn!("layer '{}' already has a mask; replacing it", layer.name());
        }
        mask.drawable.offset = layer.drawable.offset;
        self.edit_layer(id, |l| {
            l.mask = Some(mask);
            l.apply_mask = true;
        })
    }

    pub fn remove_mask(&mut self, id: ItemId) -> Result<Option<Channel>> {
        self.edit_layer(id, |l| {
            l.show_mask = false;
            l.mask.take()
        })
    }

    pub fn set_apply_mask(&mut self, id: ItemId, apply: bool) -> Result<()> {
        self.edit_layer(id, |l| l.apply_mask = apply)
    }

    pub fn set_show_mask(&mut self, id: ItemId, show: bool) -> Result<()> {
        self.edit_layer(id, |l| l.show_mask = show)
    }

    /// Bake the mask into the layer's alpha. Returns false if there was none.
    pub fn apply_layer_mask(&mut self, id: ItemId) -> Result<bool> {
        self.edit_layer(id, |l| l.bake_mask().is_some())
    }

    // ========================================================================
    // CHANNELS, SELECTION AND COMPONENTS
    // ========================================================================

    /// Add a channel on top of the channel list.
    pub fn add_channel(&mut self, mut channel: Channel) -> Result<ItemId> {
        if channel.drawable.width() != self.width() || channel.drawable.height() != self.height() {
            return Err(CompositeError::MaskSizeMismatch(format!(
                "channel '{}' is {}x{} but the image is {}x{}",
                channel.drawable.name,
                channel.drawable.width(),
                channel.drawable.height(),
                self.width(),
                self.height()
            )));
        }
        channel.drawable.offset = (0, 0);
        let id = channel.id();
        if channel.visible {
            self.projection.invalidate(channel.bounds());
        }
        self.stack.channels.insert(0, channel);
        Ok(id)
    }

    pub fn remove_channel(&mut self, id: ItemId) -> Result<Channel> {
        let index = self.stack.channel_index(id).ok_or(CompositeError::UnknownItem(id))?;
        let channel = self.stack.channels.remove(index);
        if channel.visible {
            self.projection.invalidate(channel.bounds());
        }
        Ok(channel)
    }

    pub fn channel(&self, id: ItemId) -> Result<&Channel> {
        self.stack
            .channel_index(id)
            .map(|i| &self.stack.channels[i])
            .ok_or(CompositeError::UnknownItem(id))
    }

    pub fn set_channel_visible(&mut self, id: ItemId, visible: bool) -> Result<()> {
        let index = self.stack.channel_index(id).ok_or(CompositeError::UnknownItem(id))?;
        let channel = &mut self.stack.channels[index];
        if channel.visible != visible {
            channel.visible = visible;
            let bounds = channel.bounds();
            self.projection.invalidate(bounds);
        }
        Ok(())
    }

    pub fn set_channel_color(&mut self, id: ItemId, color: [u8; 3], opacity: f64) -> Result<()> {
        let index = self.stack.channel_index(id).ok_or(CompositeError::UnknownItem(id))?;
        let channel = &mut self.stack.channels[index];
        channel.color = color;
        channel.opacity = opacity.clamp(0.0, 1.0);
        if channel.visible {
            let bounds = channel.bounds();
            self.projection.invalidate(bounds);
        }
        Ok(())
    }

    pub fn selection(&self) -> &Channel {
        &self.selection
    }

    /// Replace the selection mask. It must cover the whole image.
    pub fn set_selection(&mut self, mut selection: Channel) -> Result<()> {
        if selection.drawable.width() != self.width() || selection.drawable.height() != self.height() {
            return Err(CompositeError::MaskSizeMismatch(format!(
                "selection is {}x{} but the image is {}x{}",
                selection.drawable.width(),
                selection.drawable.height(),
                self.width(),
                self.height()
            )));
        }
        selection.drawable.offset = (0, 0);
        self.selection = selection;
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection = Channel::new("Selection Mask", self.width(), self.height());
    }

    pub fn set_component_visible(&mut self, component: usize, visible: bool) {
        if let Some(slot) = self.stack.visible_components.get_mut(component)
            && *slot != visible
        {
            *slot = visible;
            self.projection.invalidate_all();
        }
    }

    pub fn set_component_active(&mut self, component: usize, active: bool) {
        if let Some(slot) = self.stack.active_components.get_mut(component) {
            *slot = active;
        }
    }

    /// Install a palette and hand it to indexed layers that have none.
    pub fn set_colormap(&mut self, colormap: Colormap) {
        let cmap = Arc::new(colormap);
        for layer in &mut self.stack.layers {
            if layer.encoding().is_indexed() && layer.drawable.colormap.is_none() {
                layer.drawable.colormap = Some(Arc::clone(&cmap));
            }
        }
        self.stack.colormap = Some(cmap);
        self.projection.invalidate_all();
    }

    // ========================================================================
    // EDIT TARGETS
    // ========================================================================

    /// Any drawable by id: layers, their masks, channels or the selection.
    pub fn drawable(&self, id: ItemId) -> Result<&Drawable> {
        if self.selection.id() == id {
            return Ok(&self.selection.drawable);
        }
        for layer in &self.stack.layers {
            if layer.id() == id {
                return Ok(&layer.drawable);
            }
            if let Some(mask) = &layer.mask
                && mask.id() == id
            {
                return Ok(&mask.drawable);
            }
        }
        self.stack
            .channels
            .iter()
            .find(|c| c.id() == id)
            .map(|c| &c.drawable)
            .ok_or(CompositeError::UnknownItem(id))
    }

    /// Borrow a drawable for writing together with the selection that
    /// limits the write and the channels it may touch.
    pub fn target_mut(&mut self, id: ItemId) -> Result<Target<'_>> {
        let Self { stack, selection, .. } = self;
        let active = stack.active_components;

        if selection.id() == id {
            return Ok(Target { drawable: &mut selection.drawable, selection: None, affect: [true; 4] });
        }
        let sel = if selection.is_empty() { None } else { Some(&*selection) };

        for layer in &mut stack.layers {
            if layer.id() == id {
                let enc = layer.encoding();
                let mut affect = affect_mask(enc, active);
                if layer.lock_alpha && enc.has_alpha() {
                    affect[enc.color_channels()] = false;
                }
                return Ok(Target { drawable: &mut layer.drawable, selection: sel, affect });
            }
            if let Some(mask) = &mut layer.mask
                && mask.id() == id
            {
                return Ok(Target { drawable: &mut mask.drawable, selection: sel, affect: [true; 4] });
            }
        }
        stack
            .channels
            .iter_mut()
            .find(|c| c.id() == id)
            .map(|c| Target { drawable: &mut c.drawable, selection: sel, affect: [true; 4] })
            .ok_or(CompositeError::UnknownItem(id))
    }

    /// Image rectangle a drawable edit has to refresh, if the drawable shows
    /// up in the projection at all.
    pub fn drawable_changed(&mut self, id: ItemId, rect: Rect) {
        let shows = self.stack.layers.iter().any(|l| {
            l.id() == id || l.mask.as_ref().is_some_and(|m| m.id() == id)
        }) || self.stack.channels.iter().any(|c| c.id() == id && c.visible);
        if shows {
            self.projection.invalidate(rect);
        }
    }
}
