// ============================================================================
// PROJECTION — the flattened composite of a layer stack, rebuilt per dirty rect
// ============================================================================

mod graph;
mod legacy;
mod project;

pub use graph::{Graph, GraphStrategy, Processor};
pub use legacy::LegacyStrategy;
pub use project::LayerProjector;

use crate::buffer::{BaseType, Encoding, PixelBuffer, PixelStore, Rect, TiledBuffer};
use crate::stack::LayerStack;
use crate::ops::region::RegionCombiner;
use crate::settings::{Engine, ProjectionSettings};
use crate::{log_info, log_warn};

/// How the contributors of a dirty rectangle are composited.
///
/// Implementations must produce identical pixels for identical stacks;
/// they differ only in how the work is scheduled.
pub trait ConstructStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Composite `rect` (projection space, already inside `buffer` and
    /// already initialized) from `stack`.
    fn construct(
        &self,
        stack: &LayerStack,
        offset: (i32, i32),
        buffer: &mut TiledBuffer,
        rect: Rect,
        combiner: &RegionCombiner,
    );
}

pub fn strategy_for(engine: Engine) -> Box<dyn ConstructStrategy> {
    match engine {
        Engine::Legacy => Box::new(LegacyStrategy),
        Engine::Graph => Box::new(GraphStrategy),
    }
}

/// Which stack entry a step renders.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Contributor {
    /// Index into `LayerStack::layers`.
    Layer(usize),
    /// Index into `LayerStack::channels`.
    Channel(usize),
}

/// One contributor clipped to the dirty rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Step {
    pub item: Contributor,
    /// Projection space.
    pub rect: Rect,
    /// False only for the first contributor that touches the rectangle.
    pub combine: bool,
}

/// Back-to-front contributor list for `rect`: visible layers bottom to top,
/// then visible channels bottom to top. Items outside `rect` are dropped
/// and don't count as the first contributor.
pub fn plan(stack: &LayerStack, offset: (i32, i32), rect: Rect) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut combine = false;
    let (ox, oy) = offset;

    for (i, layer) in stack.layers.iter().enumerate() {
        if !layer.visible || layer.floating {
            continue;
        }
        let r = layer.bounds().translate(-ox, -oy).intersect(&rect);
        if r.is_empty() {
            continue;
        }
        steps.push(Step { item: Contributor::Layer(i), rect: r, combine });
        combine = true;
    }

    // channels[0] is the top channel
    for (i, channel) in stack.channels.iter().enumerate().rev() {
        if !channel.visible {
            continue;
        }
        let r = channel.bounds().translate(-ox, -oy).intersect(&rect);
        if r.is_empty() {
            continue;
        }
        steps.push(Step { item: Contributor::Channel(i), rect: r, combine });
        combine = true;
    }

    steps
}

/// True when one visible, opaque, unmasked, full-opacity Normal layer covers
/// `rect` and every color component is shown, so the region needs no clearing.
pub fn is_covered(stack: &LayerStack, offset: (i32, i32), rect: Rect) -> bool {
    if !stack.visible_components.iter().all(|&c| c) {
        return false;
    }
    stack.layers.iter().any(|layer| {
        !layer.floating
            && layer.is_opaque_normal()
            && layer.bounds().translate(-offset.0, -offset.1).contains(&rect)
    })
}

pub struct Projection {
    buffer: TiledBuffer,
    /// Image-space position of the buffer's top-left pixel.
    offset: (i32, i32),
    strategy: Box<dyn ConstructStrategy>,
    combiner: RegionCombiner,
    /// Image-space dirty rectangles, overlapping ones merged.
    invalid: Vec<Rect>,
    valid: Rect,
    generation: u64,
    coverage_shortcut: bool,
}

impl std::fmt::Debug for Projection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projection")
            .field("buffer", &self.buffer)
            .field("strategy", &self.strategy.name())
            .field("invalid", &self.invalid)
            .field("generation", &self.generation)
            .finish()
    }
}

impl Projection {
    pub fn new(base: BaseType, width: u32, height: u32, settings: &ProjectionSettings) -> Self {
        Self::with_strategy(base, width, height, settings, strategy_for(settings.engine))
    }

    pub fn with_strategy(
        base: BaseType,
        width: u32,
        height: u32,
        settings: &ProjectionSettings,
        strategy: Box<dyn ConstructStrategy>,
    ) -> Self {
        let buffer = TiledBuffer::with_tile_size(base.projection_encoding(), width, height, settings.tile_size);
        let mut proj = Self {
            buffer,
            offset: (0, 0),
            strategy,
            combiner: RegionCombiner::from_settings(settings),
            invalid: Vec::new(),
            valid: Rect::default(),
            generation: 0,
            coverage_shortcut: true,
        };
        proj.invalidate_all();
        proj
    }

    /// Swap the compositing strategy. Everything is invalidated.
    pub fn replace_strategy(&mut self, strategy: Box<dyn ConstructStrategy>) {
        log_info!("projection strategy {} -> {}", self.strategy.name(), strategy.name());
        self.strategy = strategy;
        self.invalidate_all();
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn combiner(&self) -> &RegionCombiner {
        &self.combiner
    }

    pub fn buffer(&self) -> &TiledBuffer {
        &self.buffer
    }

    pub fn encoding(&self) -> Encoding {
        self.buffer.encoding()
    }

    pub fn width(&self) -> u32 {
        PixelStore::width(&self.buffer)
    }

    pub fn height(&self) -> u32 {
        PixelStore::height(&self.buffer)
    }

    pub fn offset(&self) -> (i32, i32) {
        self.offset
    }

    /// Image-space bounds of the projection.
    pub fn bounds(&self) -> Rect {
        self.buffer.bounds().translate(self.offset.0, self.offset.1)
    }

    /// Bumped after every construct pass.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Union of the rectangles constructed since the last invalidation.
    pub fn valid_region(&self) -> Rect {
        self.valid
    }

    pub fn invalid_rects(&self) -> &[Rect] {
        &self.invalid
    }

    /// Disable the skip-clear-when-covered optimization (results are the same).
    pub fn set_coverage_shortcut(&mut self, enabled: bool) {
        self.coverage_shortcut = enabled;
    }

    pub fn set_offset(&mut self, offset: (i32, i32)) {
        if self.offset != offset {
            self.offset = offset;
            self.invalidate_all();
        }
    }

    /// Queue an image-space rectangle for reconstruction.
    pub fn invalidate(&mut self, rect: Rect) {
        let mut merged = rect.intersect(&self.bounds());
        if merged.is_empty() {
            return;
        }
        loop {
            let before = self.invalid.len();
            self.invalid.retain(|r| {
                if r.intersects(&merged) {
                    merged = merged.union(r);
                    false
                } else {
                    true
                }
            });
            if self.invalid.len() == before {
                break;
            }
        }
        self.invalid.push(merged);
        self.valid = Rect::default();
    }

    pub fn invalidate_all(&mut self) {
        self.invalid.clear();
        let all = self.bounds();
        self.invalidate(all);
    }

    /// True when no queued dirty rectangle touches `rect`.
    pub fn is_valid(&self, rect: Rect) -> bool {
        !self.invalid.iter().any(|r| r.intersects(&rect))
    }

    /// Reallocate for a new canvas size; the whole projection becomes dirty.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.buffer.resize(width, height);
        self.valid = Rect::default();
        self.invalidate_all();
    }

    /// Recompute `rect` (image space) from `stack`. Returns the clipped
    /// image-space rectangle that was constructed; empty when `rect` lies
    /// outside the projection.
    pub fn construct(&mut self, stack: &LayerStack, rect: Rect) -> Rect {
        if stack.width != self.width() || stack.height != self.height() {
            log_warn!(
                "projection is {}x{} but stack is {}x{}; resizing",
                self.width(),
                self.height(),
                stack.width,
                stack.height
            );
            self.resize(stack.width, stack.height);
        }
        let (ox, oy) = self.offset;
        let r = rect.translate(-ox, -oy).intersect(&self.buffer.bounds());
        if r.is_empty() {
            return Rect::default();
        }

        log_info!("construct {} via {}", r, self.strategy.name());
        self.initialize(stack, r);
        self.strategy.construct(stack, self.offset, &mut self.buffer, r, &self.combiner);

        let done = r.translate(ox, oy);
        // Keep only what is still dirty outside the rebuilt rectangle.
        self.invalid = self.invalid.iter().flat_map(|inv| inv.subtract(&done)).collect();
        self.valid = self.valid.union(&done);
        self.generation += 1;
        done
    }

    /// Clear `rect` to transparent unless a single layer is known to cover it.
    fn initialize(&mut self, stack: &LayerStack, rect: Rect) {
        if self.coverage_shortcut && is_covered(stack, self.offset, rect) {
            return;
        }
        self.buffer.clear_rect(rect);
    }

    /// Construct every queued dirty rectangle. Returns how many were rebuilt.
    pub fn flush(&mut self, stack: &LayerStack) -> usize {
        let pending = std::mem::take(&mut self.invalid);
        let count = pending.len();
        for rect in pending {
            self.construct(stack, rect);
        }
        count
    }

    /// Make `rect` valid if needed, then copy it out.
    pub fn valid_pixels(&mut self, stack: &LayerStack, rect: Rect) -> PixelBuffer {
        let dirty: Vec<Rect> = self
            .invalid
            .iter()
            .map(|r| r.intersect(&rect))
            .filter(|r| !r.is_empty())
            .collect();
        for r in dirty {
            self.construct(stack, r);
        }
        self.read_rect(rect)
    }

    /// Copy an image-space rectangle out of the projection as it stands.
    pub fn read_rect(&self, rect: Rect) -> PixelBuffer {
        PixelBuffer::copy_from(&self.buffer, rect.translate(-self.offset.0, -self.offset.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelBuffer;
    use crate::item::Layer;

    fn stack_with(layers: Vec<Layer>) -> LayerStack {
        let mut stack = LayerStack::new(BaseType::Rgb, 32, 32);
        stack.layers = layers;
        stack
    }

    #[test]
    fn plan_skips_invisible_floating_and_disjoint() {
        let mut hidden = Layer::new("hidden", PixelBuffer::new(Encoding::Rgba, 8, 8), (0, 0));
        hidden.visible = false;
        let mut floating = Layer::new("float", PixelBuffer::new(Encoding::Rgba, 8, 8), (0, 0));
        floating.floating = true;
        let far = Layer::new("far", PixelBuffer::new(Encoding::Rgba, 4, 4), (20, 20));
        let near = Layer::new("near", PixelBuffer::new(Encoding::Rgba, 8, 8), (4, 4));
        let top = Layer::new("top", PixelBuffer::new(Encoding::Rgba, 8, 8), (0, 0));
        let stack = stack_with(vec![hidden, floating, far, near, top]);

        let steps = plan(&stack, (0, 0), Rect::new(0, 0, 10, 10));
        assert_eq!(
            steps,
            vec![
                Step { item: Contributor::Layer(3), rect: Rect::new(4, 4, 6, 6), combine: false },
                Step { item: Contributor::Layer(4), rect: Rect::new(0, 0, 8, 8), combine: true },
            ]
        );
    }

    #[test]
    fn plan_translates_by_offset() {
        let layer = Layer::new("l", PixelBuffer::new(Encoding::Rgb, 4, 4), (10, 10));
        let stack = stack_with(vec![layer]);
        let steps = plan(&stack, (8, 8), Rect::new(0, 0, 4, 4));
        assert_eq!(steps[0].rect, Rect::new(2, 2, 2, 2));
    }

    #[test]
    fn coverage_needs_all_components() {
        let layer = Layer::new("bg", PixelBuffer::new(Encoding::Rgb, 32, 32), (0, 0));
        let mut stack = stack_with(vec![layer]);
        assert!(is_covered(&stack, (0, 0), Rect::new(0, 0, 32, 32)));
        assert!(!is_covered(&stack, (0, 0), Rect::new(0, 0, 33, 32)));
        stack.visible_components[1] = false;
        assert!(!is_covered(&stack, (0, 0), Rect::new(0, 0, 8, 8)));
    }

    #[test]
    fn invalidation_merges_and_construct_clears() {
        let stack = LayerStack::new(BaseType::Rgb, 64, 64);
        let mut proj = Projection::new(BaseType::Rgb, 64, 64, &ProjectionSettings::default());
        assert_eq!(proj.flush(&stack), 1);
        assert!(proj.is_valid(Rect::new(0, 0, 64, 64)));
        assert_eq!(proj.valid_region(), Rect::new(0, 0, 64, 64));

        proj.invalidate(Rect::new(0, 0, 10, 10));
        proj.invalidate(Rect::new(5, 5, 10, 10));
        proj.invalidate(Rect::new(40, 40, 4, 4));
        assert_eq!(proj.invalid_rects().len(), 2);
        assert!(proj.invalid_rects().contains(&Rect::new(0, 0, 15, 15)));
        assert!(!proj.is_valid(Rect::new(12, 12, 1, 1)));

        let generation = proj.generation();
        proj.construct(&stack, Rect::new(0, 0, 20, 20));
        assert_eq!(proj.generation(), generation + 1);
        assert_eq!(proj.invalid_rects(), &[Rect::new(40, 40, 4, 4)]);
    }

    #[test]
    fn partial_reads_only_rebuild_what_is_still_dirty() {
        let stack = LayerStack::new(BaseType::Rgb, 64, 64);
        let mut proj = Projection::new(BaseType::Rgb, 64, 64, &ProjectionSettings::default());
        proj.flush(&stack);
        proj.invalidate(Rect::new(0, 0, 40, 40));

        proj.valid_pixels(&stack, Rect::new(0, 0, 10, 10));
        assert!(proj.is_valid(Rect::new(0, 0, 10, 10)));
        assert!(!proj.is_valid(Rect::new(10, 0, 1, 1)));
        let remaining: i64 = proj.invalid_rects().iter().map(Rect::area).sum();
        assert_eq!(remaining, 40 * 40 - 10 * 10);

        let generation = proj.generation();
        proj.valid_pixels(&stack, Rect::new(0, 0, 10, 10));
        assert_eq!(proj.generation(), generation, "a valid area was rebuilt");

        proj.valid_pixels(&stack, Rect::new(0, 0, 64, 64));
        assert!(proj.invalid_rects().is_empty());
        assert!(proj.is_valid(Rect::new(0, 0, 64, 64)));
    }

    #[test]
    fn construct_outside_is_a_noop() {
        let stack = LayerStack::new(BaseType::Gray, 16, 16);
        let mut proj = Projection::new(BaseType::Gray, 16, 16, &ProjectionSettings::default());
        assert!(proj.construct(&stack, Rect::new(100, 100, 5, 5)).is_empty());
        assert_eq!(proj.generation(), 0);
        assert_eq!(proj.encoding(), Encoding::GrayA);
    }
}
