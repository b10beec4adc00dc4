// ============================================================================
// GRAPH STRATEGY — contributors as a node chain evaluated tile by tile
// ============================================================================
//
// The chain is built once per construct. A `Processor` then walks the dirty
// rectangle one row of tiles per `work()` call; tiles of a row are rendered in
// parallel into private buffers and written back afterwards.

use rayon::prelude::*;

use crate::buffer::{PixelBuffer, PixelStore, Rect, TiledBuffer};
use crate::stack::LayerStack;
use crate::ops::region::RegionCombiner;

use super::{plan, ConstructStrategy, Contributor, LayerProjector, Step};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    /// Whatever the projection already holds (the initialized region).
    Backdrop,
    Contribute(Step),
}

/// Node chain for one dirty rectangle, backdrop first.
#[derive(Clone, Debug)]
pub struct Graph {
    pub nodes: Vec<Node>,
    /// Projection space.
    pub rect: Rect,
}

impl Graph {
    pub fn build(stack: &LayerStack, offset: (i32, i32), rect: Rect) -> Self {
        let mut nodes = vec![Node::Backdrop];
        nodes.extend(plan(stack, offset, rect).into_iter().map(Node::Contribute));
        Self { nodes, rect }
    }

    pub fn contributors(&self) -> impl Iterator<Item = &Step> {
        self.nodes.iter().filter_map(|n| match n {
            Node::Contribute(step) => Some(step),
            Node::Backdrop => None,
        })
    }

    /// Layers the chain reads, bottom first.
    pub fn layer_indices(&self) -> Vec<usize> {
        self.contributors()
            .filter_map(|s| match s.item {
                Contributor::Layer(i) => Some(i),
                Contributor::Channel(_) => None,
            })
            .collect()
    }
}

/// Incremental evaluator for a [`Graph`].
pub struct Processor<'a> {
    graph: &'a Graph,
    stack: &'a LayerStack,
    projector: LayerProjector<'a>,
    rows: Vec<Vec<Rect>>,
    next_row: usize,
}

impl<'a> Processor<'a> {
    pub fn new(graph: &'a Graph, stack: &'a LayerStack, projector: LayerProjector<'a>, tile_size: u32) -> Self {
        let mut rows: Vec<Vec<Rect>> = Vec::new();
        for tile in graph.rect.tiles(tile_size) {
            match rows.last_mut() {
                Some(row) if row[0].y == tile.y => row.push(tile),
                _ => rows.push(vec![tile]),
            }
        }
        Self { graph, stack, projector, rows, next_row: 0 }
    }

    /// Fraction of the rectangle already written back.
    pub fn progress(&self) -> f32 {
        if self.rows.is_empty() {
            1.0
        } else {
            self.next_row as f32 / self.rows.len() as f32
        }
    }

    /// Render and write back one row of tiles. Returns `true` while more
    /// work remains.
    pub fn work(&mut self, buffer: &mut TiledBuffer) -> bool {
        let Some(row) = self.rows.get(self.next_row) else {
            return false;
        };
        let rendered: Vec<(Rect, PixelBuffer)> = {
            let backdrop: &TiledBuffer = buffer;
            row.par_iter().map(|&tile| (tile, self.render_tile(backdrop, tile))).collect()
        };
        for (tile, pixels) in rendered {
            let len = tile.width as usize * pixels.encoding().bytes();
            for (r, data) in pixels.as_raw().chunks_exact(len).enumerate() {
                buffer.write_row(tile.x as u32, (tile.y + r as i32) as u32, data);
            }
        }
        self.next_row += 1;
        self.next_row < self.rows.len()
    }

    fn render_tile(&self, backdrop: &TiledBuffer, tile: Rect) -> PixelBuffer {
        let mut local = PixelBuffer::copy_from(backdrop, tile);
        for node in &self.graph.nodes {
            if let Node::Contribute(step) = node
                && step.rect.intersects(&tile)
            {
                self.projector.project_step(self.stack, step, tile, &mut local, (tile.x, tile.y));
            }
        }
        local
    }
}

/// Same pixels as the legacy walk, scheduled per tile.
#[derive(Clone, Copy, Debug, Default)]
pub struct GraphStrategy;

impl ConstructStrategy for GraphStrategy {
    fn name(&self) -> &'static str {
        "graph"
    }

    fn construct(
        &self,
        stack: &LayerStack,
        offset: (i32, i32),
        buffer: &mut TiledBuffer,
        rect: Rect,
        combiner: &RegionCombiner,
    ) {
        let graph = Graph::build(stack, offset, rect);
        let projector = LayerProjector::new(combiner, offset, stack.visible_components);
        let mut processor = Processor::new(&graph, stack, projector, buffer.tile_size());
        while processor.work(buffer) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BaseType, Encoding};
    use crate::item::Layer;

    #[test]
    fn graph_lists_backdrop_then_contributors() {
        let mut stack = LayerStack::new(BaseType::Rgb, 16, 16);
        stack.layers.push(Layer::new("a", PixelBuffer::new(Encoding::Rgb, 16, 16), (0, 0)));
        stack.layers.push(Layer::new("b", PixelBuffer::new(Encoding::Rgba, 4, 4), (30, 30)));
        stack.layers.push(Layer::new("c", PixelBuffer::new(Encoding::Rgba, 4, 4), (2, 2)));
        let graph = Graph::build(&stack, (0, 0), Rect::new(0, 0, 16, 16));
        assert_eq!(graph.nodes[0], Node::Backdrop);
        assert_eq!(graph.layer_indices(), vec![0, 2]);
    }

    #[test]
    fn processor_walks_tile_rows() {
        let stack = LayerStack::new(BaseType::Gray, 100, 70);
        let graph = Graph::build(&stack, (0, 0), Rect::new(0, 0, 100, 70));
        let combiner = RegionCombiner::serial();
        let projector = LayerProjector::new(&combiner, (0, 0), [true; 4]);
        let mut buffer = TiledBuffer::new(Encoding::GrayA, 100, 70);
        let mut processor = Processor::new(&graph, &stack, projector, 64);
        assert!(processor.work(&mut buffer));
        assert_eq!(processor.progress(), 0.5);
        assert!(!processor.work(&mut buffer));
        assert!(!processor.work(&mut buffer));
    }
}
