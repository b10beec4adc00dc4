use std::collections::VecDeque;

use crate::buffer::{PixelBuffer, PixelStore, Rect};
use crate::stack::Image;
use crate::item::{Drawable, ItemId};
use crate::ops::blend::BlendMode;
use crate::settings::ProjectionSettings;
use crate::{log_info, log_warn};

// ============================================================================
// COMMAND TRAIT
// ============================================================================

/// Trait for undoable/redoable commands.
pub trait Command: Send + Sync {
    fn undo(&self, image: &mut Image);
    fn redo(&self, image: &mut Image);
    fn description(&self) -> String;
    fn memory_size(&self) -> usize;

    /// What a fade needs to re-blend this command, if it is fadeable.
    fn fade_info(&self) -> Option<&FadeInfo> {
        None
    }
}

/// Where edits hand their undo records. The bounded [`History`] is one;
/// callers with their own stack implement this instead.
pub trait UndoSink {
    fn push_undo(&mut self, command: Box<dyn Command>);
}

// ============================================================================
// PIXEL PATCH — drawable pixels of one rectangle
// ============================================================================

/// A rectangular patch of drawable pixels for undo/redo.
#[derive(Clone, Debug)]
pub struct PixelPatch {
    pub target: ItemId,
    /// Drawable-local.
    pub rect: Rect,
    pub pixels: PixelBuffer,
}

impl PixelPatch {
    pub fn capture(target: ItemId, drawable: &Drawable, rect: Rect) -> Self {
        let rect = rect.intersect(&drawable.pixels.bounds());
        Self {
            target,
            rect,
            pixels: PixelBuffer::copy_from(&drawable.pixels, rect),
        }
    }

    /// Write the patch back and dirty the projection under it.
    pub fn apply(&self, image: &mut Image) {
        let offset = match image.target_mut(self.target) {
            Ok(target) => {
                let store = &mut target.drawable.pixels;
                if store.encoding() != self.pixels.encoding() || !store.bounds().contains(&self.rect) {
                    log_warn!("PixelPatch: drawable {} no longer fits the patch {}", self.target, self.rect);
                    return;
                }
                let row_len = self.rect.width as usize * self.pixels.encoding().bytes();
                if row_len > 0 {
                    for (r, row) in self.pixels.as_raw().chunks_exact(row_len).enumerate() {
                        store.write_row(self.rect.x as u32, (self.rect.y + r as i32) as u32, row);
                    }
                }
                target.drawable.offset
            }
            Err(e) => {
                log_warn!("PixelPatch: {}", e);
                return;
            }
        };
        image.drawable_changed(self.target, self.rect.translate(offset.0, offset.1));
    }

    pub fn memory_size(&self) -> usize {
        self.pixels.as_raw().len()
    }
}

// ============================================================================
// DRAWABLE UNDO — pre-image and post-image of one apply/replace
// ============================================================================

/// Paint metadata kept with an apply so it can be faded later.
#[derive(Clone, Debug)]
pub struct FadeInfo {
    pub target: ItemId,
    pub mode: BlendMode,
    pub opacity: f64,
    /// The source pixels that were applied, already clipped.
    pub applied: PixelBuffer,
    /// Drawable-local position of `applied`.
    pub x: i32,
    pub y: i32,
}

impl FadeInfo {
    pub fn memory_size(&self) -> usize {
        self.applied.as_raw().len()
    }
}

pub struct DrawableUndo {
    description: String,
    before: PixelPatch,
    after: PixelPatch,
    fade: Option<FadeInfo>,
}

impl DrawableUndo {
    pub fn new(description: impl Into<String>, before: PixelPatch, after: PixelPatch) -> Self {
        Self { description: description.into(), before, after, fade: None }
    }

    pub fn with_fade(mut self, fade: FadeInfo) -> Self {
        self.fade = Some(fade);
        self
    }

    pub fn before(&self) -> &PixelPatch {
        &self.before
    }
}

impl Command for DrawableUndo {
    fn undo(&self, image: &mut Image) {
        self.before.apply(image);
    }

    fn redo(&self, image: &mut Image) {
        self.after.apply(image);
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn memory_size(&self) -> usize {
        self.before.memory_size()
            + self.after.memory_size()
            + self.fade.as_ref().map_or(0, |f| f.memory_size())
    }

    fn fade_info(&self) -> Option<&FadeInfo> {
        self.fade.as_ref()
    }
}

// ============================================================================
// HISTORY
// ============================================================================

pub struct History {
    undo_stack: VecDeque<Box<dyn Command>>,
    redo_stack: VecDeque<Box<dyn Command>>,
    max_steps: usize,
    /// Optional memory cap in bytes.
    max_memory_bytes: Option<usize>,
    /// Running memory total across both stacks.
    total_memory: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(100)
    }
}

impl History {
    pub fn new(max_steps: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_steps: max_steps.max(1),
            max_memory_bytes: Some(256 * 1024 * 1024),
            total_memory: 0,
        }
    }

    pub fn from_settings(settings: &ProjectionSettings) -> Self {
        Self::new(settings.max_undo_steps)
    }

    pub fn with_memory_limit(mut self, bytes: Option<usize>) -> Self {
        self.max_memory_bytes = bytes;
        self.prune();
        self
    }

    pub fn push(&mut self, command: Box<dyn Command>) {
        for cmd in self.redo_stack.drain(..) {
            self.total_memory = self.total_memory.saturating_sub(cmd.memory_size());
        }
        log_info!("undo push '{}' ({} bytes)", command.description(), command.memory_size());
        self.total_memory += command.memory_size();
        self.undo_stack.push_back(command);
        self.prune();
    }

    pub fn undo(&mut self, image: &mut Image) -> Option<String> {
        let command = self.undo_stack.pop_back()?;
        let description = command.description();
        command.undo(image);
        self.redo_stack.push_back(command);
        Some(description)
    }

    pub fn redo(&mut self, image: &mut Image) -> Option<String> {
        let command = self.redo_stack.pop_back()?;
        let description = command.description();
        command.redo(image);
        self.undo_stack.push_back(command);
        Some(description)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn redo_description(&self) -> Option<String> {
        self.redo_stack.back().map(|c| c.description())
    }

    /// Most recent first.
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|c| c.description()).collect()
    }

    /// Fade metadata of the most recent command, if it can be faded.
    pub fn last_fade(&self) -> Option<&FadeInfo> {
        self.undo_stack.back().and_then(|c| c.fade_info())
    }

    pub fn memory_usage(&self) -> usize {
        self.total_memory
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.total_memory = 0;
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_steps {
            if let Some(removed) = self.undo_stack.pop_front() {
                self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
            }
        }
        if let Some(max_bytes) = self.max_memory_bytes {
            while self.total_memory > max_bytes && self.undo_stack.len() > 1 {
                if let Some(removed) = self.undo_stack.pop_front() {
                    self.total_memory = self.total_memory.saturating_sub(removed.memory_size());
                }
            }
        }
    }
}

impl UndoSink for History {
    fn push_undo(&mut self, command: Box<dyn Command>) {
        self.push(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BaseType, Encoding};
    use crate::item::Layer;

    struct Named(&'static str, usize);

    impl Command for Named {
        fn undo(&self, _image: &mut Image) {}
        fn redo(&self, _image: &mut Image) {}
        fn description(&self) -> String {
            self.0.to_string()
        }
        fn memory_size(&self) -> usize {
            self.1
        }
    }

    fn image() -> Image {
        Image::new(BaseType::Gray, 8, 8, &ProjectionSettings::default())
    }

    #[test]
    fn push_clears_redo_and_prunes_by_count() {
        let mut img = image();
        let mut history = History::new(2);
        history.push(Box::new(Named("a", 10)));
        history.push(Box::new(Named("b", 10)));
        history.push(Box::new(Named("c", 10)));
        assert_eq!(history.undo_history(), vec!["c", "b"]);
        assert_eq!(history.memory_usage(), 20);

        assert_eq!(history.undo(&mut img).as_deref(), Some("c"));
        assert!(history.can_redo());
        history.push(Box::new(Named("d", 5)));
        assert!(!history.can_redo());
        assert_eq!(history.memory_usage(), 15);
    }

    #[test]
    fn memory_cap_keeps_newest() {
        let mut history = History::new(10).with_memory_limit(Some(25));
        history.push(Box::new(Named("a", 10)));
        history.push(Box::new(Named("b", 10)));
        history.push(Box::new(Named("c", 10)));
        assert_eq!(history.undo_count(), 2);
        assert_eq!(history.undo_description().as_deref(), Some("c"));
    }

    #[test]
    fn patch_restores_pixels() {
        let mut img = image();
        let layer = Layer::new("l", PixelBuffer::new_filled(Encoding::Gray, 4, 4, &[10]), (2, 2));
        let id = img.add_layer(layer, None).unwrap();
        let before = PixelPatch::capture(id, &img.layer(id).unwrap().drawable, Rect::new(1, 1, 10, 10));
        assert_eq!(before.rect, Rect::new(1, 1, 3, 3));

        img.target_mut(id).unwrap().drawable.pixels.write_row(1, 1, &[99, 99]);
        img.flush();
        before.apply(&mut img);
        assert_eq!(img.layer(id).unwrap().drawable.pixels.to_buffer().pixel(2, 1), &[10]);
        assert!(!img.projection().is_valid(Rect::new(3, 3, 1, 1)));
    }
}
