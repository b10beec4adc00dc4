use crate::buffer::{Rect, TiledBuffer};
use crate::stack::LayerStack;
use crate::ops::region::RegionCombiner;

use super::{plan, ConstructStrategy, LayerProjector};

/// Walks the stack back to front and composites each contributor straight
/// into the projection buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct LegacyStrategy;

impl ConstructStrategy for LegacyStrategy {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn construct(
        &self,
        stack: &LayerStack,
        offset: (i32, i32),
        buffer: &mut TiledBuffer,
        rect: Rect,
        combiner: &RegionCombiner,
    ) {
        let projector = LayerProjector::new(combiner, offset, stack.visible_components);
        for step in plan(stack, offset, rect) {
            projector.project_step(stack, &step, rect, buffer, (0, 0));
        }
    }
}
