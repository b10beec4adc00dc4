// ============================================================================
// PIXEL STORAGE — encodings, rectangles, flat and tiled pixel buffers
// ============================================================================

use std::fmt;
use std::sync::Arc;

use image::{DynamicImage, RgbaImage};

/// Edge length of one tile in a [`TiledBuffer`].
pub const CHUNK_SIZE: u32 = 64;

// ============================================================================
// ENCODINGS
// ============================================================================

/// Pixel encoding of a drawable, mask or projection buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Encoding {
    Rgb,
    Rgba,
    Gray,
    GrayA,
    Indexed,
    IndexedA,
}

impl Encoding {
    /// Bytes per pixel.
    pub fn bytes(self) -> usize {
        match self {
            Encoding::Rgb => 3,
            Encoding::Rgba => 4,
            Encoding::Gray => 1,
            Encoding::GrayA => 2,
            Encoding::Indexed => 1,
            Encoding::IndexedA => 2,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, Encoding::Rgba | Encoding::GrayA | Encoding::IndexedA)
    }

    /// Number of non-alpha channels.
    pub fn color_channels(self) -> usize {
        self.bytes() - usize::from(self.has_alpha())
    }

    pub fn is_indexed(self) -> bool {
        matches!(self, Encoding::Indexed | Encoding::IndexedA)
    }

    pub fn base_type(self) -> BaseType {
        match self {
            Encoding::Rgb | Encoding::Rgba => BaseType::Rgb,
            Encoding::Gray | Encoding::GrayA => BaseType::Gray,
            Encoding::Indexed | Encoding::IndexedA => BaseType::Indexed,
        }
    }

    pub fn with_alpha(self) -> Self {
        self.base_type().encoding(true)
    }

    pub fn without_alpha(self) -> Self {
        self.base_type().encoding(false)
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoding::Rgb => "RGB",
            Encoding::Rgba => "RGBA",
            Encoding::Gray => "Gray",
            Encoding::GrayA => "GrayA",
            Encoding::Indexed => "Indexed",
            Encoding::IndexedA => "IndexedA",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Base type of a whole image. All layers of an image share it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BaseType {
    Rgb,
    Gray,
    Indexed,
}

impl BaseType {
    pub fn encoding(self, alpha: bool) -> Encoding {
        match (self, alpha) {
            (BaseType::Rgb, false) => Encoding::Rgb,
            (BaseType::Rgb, true) => Encoding::Rgba,
            (BaseType::Gray, false) => Encoding::Gray,
            (BaseType::Gray, true) => Encoding::GrayA,
            (BaseType::Indexed, false) => Encoding::Indexed,
            (BaseType::Indexed, true) => Encoding::IndexedA,
        }
    }

    /// Encoding of the flattened projection. Indexed images project to RGBA.
    pub fn projection_encoding(self) -> Encoding {
        match self {
            BaseType::Rgb | BaseType::Indexed => Encoding::Rgba,
            BaseType::Gray => Encoding::GrayA,
        }
    }
}

/// Palette for indexed drawables.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Colormap {
    entries: Vec<[u8; 3]>,
}

impl Colormap {
    pub fn new(entries: Vec<[u8; 3]>) -> Self {
        Self { entries }
    }

    /// Build from a flat `r,g,b,r,g,b,...` slice; a trailing partial entry is dropped.
    pub fn from_flat(data: &[u8]) -> Self {
        let entries = data.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[[u8; 3]] {
        &self.entries
    }

    /// Color for `index`. Indices past the end of the palette read as black.
    pub fn color(&self, index: u8) -> [u8; 3] {
        self.entries.get(index as usize).copied().unwrap_or([0, 0, 0])
    }
}

// ============================================================================
// RECTANGLES
// ============================================================================

/// Integer rectangle. Zero or negative extents are empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn right(&self) -> i32 { self.x + self.width }

    pub fn bottom(&self) -> i32 { self.y + self.height }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() { 0 } else { self.width as i64 * self.height as i64 }
    }

    /// Intersection; the result has zero extent when the rectangles don't overlap.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());
        Rect::new(x1, y1, (x2 - x1).max(0), (y2 - y1).max(0))
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Bounding union. Empty rectangles are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = self.right().max(other.right());
        let y2 = self.bottom().max(other.bottom());
        Rect::new(x1, y1, x2 - x1, y2 - y1)
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// The parts of `self` not covered by `other`, as up to four disjoint
    /// bands (top, bottom, then left and right of the overlap).
    pub fn subtract(&self, other: &Rect) -> Vec<Rect> {
        let cut = self.intersect(other);
        if cut.is_empty() {
            return if self.is_empty() { Vec::new() } else { vec![*self] };
        }
        let pieces = [
            Rect::new(self.x, self.y, self.width, cut.y - self.y),
            Rect::new(self.x, cut.bottom(), self.width, self.bottom() - cut.bottom()),
            Rect::new(self.x, cut.y, cut.x - self.x, cut.height),
            Rect::new(cut.right(), cut.y, self.right() - cut.right(), cut.height),
        ];
        pieces.into_iter().filter(|r| !r.is_empty()).collect()
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Split into pieces aligned to a `tile`-sized grid anchored at the origin.
    pub fn tiles(&self, tile: u32) -> Vec<Rect> {
        let mut out = Vec::new();
        if self.is_empty() || tile == 0 {
            return out;
        }
        let t = tile as i32;
        let mut y = self.y;
        while y < self.bottom() {
            let y_end = ((y.div_euclid(t) + 1) * t).min(self.bottom());
            let mut x = self.x;
            while x < self.right() {
                let x_end = ((x.div_euclid(t) + 1) * t).min(self.right());
                out.push(Rect::new(x, y, x_end - x, y_end - y));
                x = x_end;
            }
            y = y_end;
        }
        out
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

// ============================================================================
// PIXEL STORE TRAIT — row-at-a-time access regardless of backing
// ============================================================================

/// Row-oriented pixel access shared by flat and tiled buffers.
///
/// Callers pass rows that lie fully inside the store; reading or writing
/// past the edge is a programming error and panics.
pub trait PixelStore: Send + Sync {
    fn encoding(&self) -> Encoding;
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Copy `out.len() / bytes` pixels starting at `(x, y)` into `out`.
    fn read_row(&self, x: u32, y: u32, out: &mut [u8]);

    /// Overwrite `data.len() / bytes` pixels starting at `(x, y)`.
    fn write_row(&mut self, x: u32, y: u32, data: &[u8]);

    fn bytes(&self) -> usize {
        self.encoding().bytes()
    }

    fn bounds(&self) -> Rect {
        Rect::from_size(self.width(), self.height())
    }

    /// Reset the part of `rect` inside the store to all-zero (transparent) pixels.
    fn clear_rect(&mut self, rect: Rect) {
        let r = rect.intersect(&self.bounds());
        if r.is_empty() {
            return;
        }
        let zeros = vec![0u8; r.width as usize * self.bytes()];
        for y in r.y..r.bottom() {
            self.write_row(r.x as u32, y as u32, &zeros);
        }
    }
}

/// Read a row that may hang off the store's edges; outside pixels read as zero.
pub fn read_row_clipped(store: &dyn PixelStore, x: i32, y: i32, out: &mut [u8]) {
    out.fill(0);
    let bpp = store.bytes();
    let len = (out.len() / bpp) as i32;
    if y < 0 || y >= store.height() as i32 {
        return;
    }
    let x1 = x.max(0);
    let x2 = (x + len).min(store.width() as i32);
    if x2 <= x1 {
        return;
    }
    let start = (x1 - x) as usize * bpp;
    let end = (x2 - x) as usize * bpp;
    store.read_row(x1 as u32, y as u32, &mut out[start..end]);
}

fn check_row(store: &dyn PixelStore, x: u32, y: u32, len: usize) {
    let bpp = store.bytes();
    assert!(len % bpp == 0, "row length {} is not a multiple of {} bytes", len, bpp);
    let px = (len / bpp) as u32;
    assert!(
        y < store.height() && x + px <= store.width(),
        "row {}..{} at y={} outside {}x{} store",
        x, x + px, y, store.width(), store.height()
    );
}

// ============================================================================
// FLAT BUFFER
// ============================================================================

/// Contiguous pixel buffer, rows packed without padding.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    encoding: Encoding,
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("encoding", &self.encoding)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("checksum", &self.checksum())
            .finish()
    }
}

impl PixelBuffer {
    /// All-zero buffer.
    pub fn new(encoding: Encoding, width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * encoding.bytes();
        Self { encoding, width, height, data: vec![0; len] }
    }

    pub fn new_filled(encoding: Encoding, width: u32, height: u32, pixel: &[u8]) -> Self {
        assert_eq!(pixel.len(), encoding.bytes(), "fill pixel does not match {}", encoding);
        let mut buf = Self::new(encoding, width, height);
        for px in buf.data.chunks_exact_mut(encoding.bytes()) {
            px.copy_from_slice(pixel);
        }
        buf
    }

    /// Wrap raw bytes; `None` when the length doesn't match the dimensions.
    pub fn from_raw(encoding: Encoding, width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * encoding.bytes() {
            return None;
        }
        Some(Self { encoding, width, height, data })
    }

    /// Snapshot `rect` of any store into a new buffer.
    pub fn copy_from(store: &dyn PixelStore, rect: Rect) -> Self {
        let mut buf = Self::new(store.encoding(), rect.width.max(0) as u32, rect.height.max(0) as u32);
        let row_len = buf.row_len();
        if row_len == 0 {
            return buf;
        }
        for (i, row) in buf.data.chunks_exact_mut(row_len).enumerate() {
            read_row_clipped(store, rect.x, rect.y + i as i32, row);
        }
        buf
    }

    pub fn encoding(&self) -> Encoding { self.encoding }

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    pub fn as_raw(&self) -> &[u8] { &self.data }

    pub fn into_raw(self) -> Vec<u8> { self.data }

    fn row_len(&self) -> usize {
        self.width as usize * self.encoding.bytes()
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * self.encoding.bytes()
    }

    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let off = self.offset(x, y);
        &self.data[off..off + self.encoding.bytes()]
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: &[u8]) {
        let off = self.offset(x, y);
        let bpp = self.encoding.bytes();
        self.data[off..off + bpp].copy_from_slice(pixel);
    }

    /// Fill the part of `rect` inside the buffer with `pixel`.
    pub fn fill_rect(&mut self, rect: Rect, pixel: &[u8]) {
        let r = rect.intersect(&Rect::from_size(self.width, self.height));
        for y in r.y..r.bottom() {
            for x in r.x..r.right() {
                self.put_pixel(x as u32, y as u32, pixel);
            }
        }
    }

    /// FNV-1a over the raw bytes; cheap before/after comparison in tests and logs.
    pub fn checksum(&self) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for &b in &self.data {
            hash ^= b as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash
    }

    /// Import a decoded image, keeping gray and alpha-less sources in their
    /// narrowest encoding.
    pub fn from_dynamic(img: &DynamicImage) -> Self {
        match img {
            DynamicImage::ImageLuma8(g) => Self {
                encoding: Encoding::Gray,
                width: g.width(),
                height: g.height(),
                data: g.as_raw().clone(),
            },
            DynamicImage::ImageLumaA8(g) => Self {
                encoding: Encoding::GrayA,
                width: g.width(),
                height: g.height(),
                data: g.as_raw().clone(),
            },
            DynamicImage::ImageRgb8(rgb) => Self {
                encoding: Encoding::Rgb,
                width: rgb.width(),
                height: rgb.height(),
                data: rgb.as_raw().clone(),
            },
            other => Self::from_rgba_image(&other.to_rgba8()),
        }
    }

    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        Self {
            encoding: Encoding::Rgba,
            width: src.width(),
            height: src.height(),
            data: src.as_raw().clone(),
        }
    }

    /// Expand to straight RGBA. Indexed data needs its `colormap`.
    pub fn to_rgba_image(&self, colormap: Option<&Colormap>) -> RgbaImage {
        let bpp = self.encoding.bytes();
        let mut out = Vec::with_capacity(self.width as usize * self.height as usize * 4);
        for px in self.data.chunks_exact(bpp) {
            let rgba = match self.encoding {
                Encoding::Rgb => [px[0], px[1], px[2], 255],
                Encoding::Rgba => [px[0], px[1], px[2], px[3]],
                Encoding::Gray => [px[0], px[0], px[0], 255],
                Encoding::GrayA => [px[0], px[0], px[0], px[1]],
                Encoding::Indexed | Encoding::IndexedA => {
                    let [r, g, b] = colormap.map(|c| c.color(px[0])).unwrap_or([px[0]; 3]);
                    let a = if self.encoding.has_alpha() { px[1] } else { 255 };
                    [r, g, b, a]
                }
            };
            out.extend_from_slice(&rgba);
        }
        RgbaImage::from_raw(self.width, self.height, out).unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }
}

impl PixelStore for PixelBuffer {
    fn encoding(&self) -> Encoding { self.encoding }

    fn width(&self) -> u32 { self.width }

    fn height(&self) -> u32 { self.height }

    fn read_row(&self, x: u32, y: u32, out: &mut [u8]) {
        check_row(self, x, y, out.len());
        let off = self.offset(x, y);
        out.copy_from_slice(&self.data[off..off + out.len()]);
    }

    fn write_row(&mut self, x: u32, y: u32, data: &[u8]) {
        check_row(self, x, y, data.len());
        let off = self.offset(x, y);
        self.data[off..off + data.len()].copy_from_slice(data);
    }
}

// ============================================================================
// TILED BUFFER – sparse CHUNK_SIZE² tiles (Vec-indexed, copy-on-write)
// ============================================================================

/// Sparse tiled buffer backed by a flat `Vec<Option<Arc<Vec<u8>>>>`.
/// Tile coordinates are mapped to a flat index via `ty * tiles_per_row + tx`.
/// Missing tiles read as all-zero pixels.
///
/// Tiles are wrapped in `Arc` for copy-on-write semantics: `clone()` only
/// bumps reference counts, and row writes use `Arc::make_mut` to clone only
/// the touched tile.
#[derive(Clone)]
pub struct TiledBuffer {
    encoding: Encoding,
    width: u32,
    height: u32,
    tile_size: u32,
    tiles_per_row: u32,
    tiles: Vec<Option<Arc<Vec<u8>>>>,
}

impl fmt::Debug for TiledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TiledBuffer")
            .field("encoding", &self.encoding)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("tile_size", &self.tile_size)
            .field("tiles_stored", &self.tile_count())
            .finish()
    }
}

impl TiledBuffer {
    pub fn new(encoding: Encoding, width: u32, height: u32) -> Self {
        Self::with_tile_size(encoding, width, height, CHUNK_SIZE)
    }

    pub fn with_tile_size(encoding: Encoding, width: u32, height: u32, tile_size: u32) -> Self {
        let tile_size = tile_size.max(1);
        let tiles_per_row = width.div_ceil(tile_size);
        let tiles_per_col = height.div_ceil(tile_size);
        Self {
            encoding,
            width,
            height,
            tile_size,
            tiles_per_row,
            tiles: vec![None; (tiles_per_row * tiles_per_col) as usize],
        }
    }

    /// Import a flat buffer. All-zero tiles are not stored.
    pub fn from_buffer(src: &PixelBuffer) -> Self {
        let mut tiled = Self::new(src.encoding(), src.width(), src.height());
        let row_len = src.width() as usize * src.encoding().bytes();
        if row_len == 0 {
            return tiled;
        }
        for (y, row) in src.as_raw().chunks_exact(row_len).enumerate() {
            tiled.write_row(0, y as u32, row);
        }
        tiled
    }

    pub fn to_buffer(&self) -> PixelBuffer {
        PixelBuffer::copy_from(self, self.bounds())
    }

    pub fn tile_size(&self) -> u32 { self.tile_size }

    /// Drop all tiles (everything reads as transparent).
    pub fn clear(&mut self) {
        for slot in &mut self.tiles {
            *slot = None;
        }
    }

    /// Reallocate for a new canvas size; contents are discarded.
    pub fn resize(&mut self, width: u32, height: u32) {
        *self = Self::with_tile_size(self.encoding, width, height, self.tile_size);
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_some()).count()
    }

    /// Approximate memory usage in bytes. Tiles shared with a clone are
    /// counted at pointer cost only.
    pub fn memory_bytes(&self) -> usize {
        let tile_bytes = (self.tile_size * self.tile_size) as usize * self.encoding.bytes();
        self.tiles
            .iter()
            .filter_map(|t| t.as_ref())
            .map(|arc| {
                if Arc::strong_count(arc) == 1 {
                    tile_bytes
                } else {
                    std::mem::size_of::<usize>() * 2
                }
            })
            .sum()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Vec<u8> {
        let mut out = vec![0u8; self.encoding.bytes()];
        self.read_row(x, y, &mut out);
        out
    }

    fn tile_index(&self, tx: u32, ty: u32) -> usize {
        (ty * self.tiles_per_row + tx) as usize
    }
}

impl PixelStore for TiledBuffer {
    fn encoding(&self) -> Encoding { self.encoding }

    fn width(&self) -> u32 { self.width }

    fn height(&self) -> u32 { self.height }

    fn read_row(&self, x: u32, y: u32, out: &mut [u8]) {
        check_row(self, x, y, out.len());
        let bpp = self.encoding.bytes();
        let ts = self.tile_size;
        let ty = y / ts;
        let ly = y % ts;
        let end = x + (out.len() / bpp) as u32;
        let mut px = x;
        while px < end {
            let tx = px / ts;
            let lx = px % ts;
            let span = (ts - lx).min(end - px);
            let dst = (px - x) as usize * bpp..(px - x + span) as usize * bpp;
            match &self.tiles[self.tile_index(tx, ty)] {
                Some(tile) => {
                    let src = ((ly * ts + lx) as usize) * bpp;
                    out[dst.clone()].copy_from_slice(&tile[src..src + span as usize * bpp]);
                }
                None => out[dst].fill(0),
            }
            px += span;
        }
    }

    fn write_row(&mut self, x: u32, y: u32, data: &[u8]) {
        check_row(self, x, y, data.len());
        let bpp = self.encoding.bytes();
        let ts = self.tile_size;
        let tile_bytes = (ts * ts) as usize * bpp;
        let ty = y / ts;
        let ly = y % ts;
        let end = x + (data.len() / bpp) as u32;
        let mut px = x;
        while px < end {
            let tx = px / ts;
            let lx = px % ts;
            let span = (ts - lx).min(end - px);
            let src = &data[(px - x) as usize * bpp..(px - x + span) as usize * bpp];
            let idx = self.tile_index(tx, ty);
            let slot = &mut self.tiles[idx];
            // Writing zeros into a missing tile changes nothing.
            if slot.is_some() || src.iter().any(|&b| b != 0) {
                let tile = slot.get_or_insert_with(|| Arc::new(vec![0; tile_bytes]));
                let dst = ((ly * ts + lx) as usize) * bpp;
                Arc::make_mut(tile)[dst..dst + src.len()].copy_from_slice(src);
            }
            px += span;
        }
    }

    fn clear_rect(&mut self, rect: Rect) {
        let r = rect.intersect(&self.bounds());
        if r.is_empty() {
            return;
        }
        let ts = self.tile_size as i32;
        let bpp = self.encoding.bytes();
        for tile_rect in r.tiles(self.tile_size) {
            let tx = (tile_rect.x / ts) as u32;
            let ty = (tile_rect.y / ts) as u32;
            let idx = self.tile_index(tx, ty);
            if self.tiles[idx].is_none() {
                continue;
            }
            let full = Rect::new(tx as i32 * ts, ty as i32 * ts, ts, ts).intersect(&self.bounds());
            if tile_rect.contains(&full) {
                self.tiles[idx] = None;
            } else {
                let zeros = vec![0u8; tile_rect.width as usize * bpp];
                for y in tile_rect.y..tile_rect.bottom() {
                    self.write_row(tile_rect.x as u32, y as u32, &zeros);
                }
            }
        }
    }
}

// ============================================================================
// STORAGE — what a drawable actually owns
// ============================================================================

/// Backing store of a drawable: flat or tiled, interchangeable behind [`PixelStore`].
#[derive(Clone, Debug)]
pub enum Storage {
    Flat(PixelBuffer),
    Tiled(TiledBuffer),
}

impl Storage {
    pub fn to_buffer(&self) -> PixelBuffer {
        match self {
            Storage::Flat(buf) => buf.clone(),
            Storage::Tiled(tiled) => tiled.to_buffer(),
        }
    }
}

impl From<PixelBuffer> for Storage {
    fn from(buf: PixelBuffer) -> Self {
        Storage::Flat(buf)
    }
}

impl From<TiledBuffer> for Storage {
    fn from(buf: TiledBuffer) -> Self {
        Storage::Tiled(buf)
    }
}

impl PixelStore for Storage {
    fn encoding(&self) -> Encoding {
        match self {
            Storage::Flat(b) => b.encoding(),
            Storage::Tiled(b) => b.encoding(),
        }
    }

    fn width(&self) -> u32 {
        match self {
            Storage::Flat(b) => b.width(),
            Storage::Tiled(b) => PixelStore::width(b),
        }
    }

    fn height(&self) -> u32 {
        match self {
            Storage::Flat(b) => b.height(),
            Storage::Tiled(b) => PixelStore::height(b),
        }
    }

    fn read_row(&self, x: u32, y: u32, out: &mut [u8]) {
        match self {
            Storage::Flat(b) => b.read_row(x, y, out),
            Storage::Tiled(b) => b.read_row(x, y, out),
        }
    }

    fn write_row(&mut self, x: u32, y: u32, data: &[u8]) {
        match self {
            Storage::Flat(b) => b.write_row(x, y, data),
            Storage::Tiled(b) => b.write_row(x, y, data),
        }
    }

    fn clear_rect(&mut self, rect: Rect) {
        match self {
            Storage::Flat(b) => b.clear_rect(rect),
            Storage::Tiled(b) => b.clear_rect(rect),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_intersection_clips_to_zero_area() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(20, 20, 5, 5);
        assert!(a.intersect(&b).is_empty(), "disjoint rects must not intersect");
        assert_eq!(a.intersect(&Rect::new(5, -5, 10, 10)), Rect::new(5, 0, 5, 5));
    }

    #[test]
    fn rect_subtract_leaves_the_frame() {
        let outer = Rect::new(0, 0, 10, 10);
        let pieces = outer.subtract(&Rect::new(3, 4, 4, 2));
        assert_eq!(pieces.len(), 4);
        assert_eq!(pieces.iter().map(Rect::area).sum::<i64>(), 100 - 8);
        assert!(pieces.iter().all(|p| !p.intersects(&Rect::new(3, 4, 4, 2))));
        assert_eq!(outer.subtract(&Rect::new(0, 0, 10, 4)), vec![Rect::new(0, 4, 10, 6)]);
        assert_eq!(outer.subtract(&Rect::new(-5, -5, 30, 30)), Vec::<Rect>::new());
        assert_eq!(outer.subtract(&Rect::new(20, 20, 2, 2)), vec![outer]);
    }

    #[test]
    fn rect_tiles_align_to_grid() {
        let tiles = Rect::new(60, 0, 10, 70).tiles(64);
        assert_eq!(tiles.len(), 4, "10x70 rect at x=60 crosses one vertical and one horizontal tile edge");
        assert_eq!(tiles[0], Rect::new(60, 0, 4, 64));
        assert_eq!(tiles[3], Rect::new(64, 64, 6, 6));
        let total: i64 = tiles.iter().map(|t| t.area()).sum();
        assert_eq!(total, 700);
    }

    #[test]
    fn tiled_rows_cross_tile_boundaries() {
        let mut tiled = TiledBuffer::with_tile_size(Encoding::GrayA, 10, 4, 4);
        let row: Vec<u8> = (0..20).collect();
        tiled.write_row(0, 2, &row);
        let mut back = vec![0u8; 14];
        tiled.read_row(3, 2, &mut back);
        assert_eq!(back, row[6..20].to_vec());
        assert_eq!(tiled.tile_count(), 3, "row 2 touches three tiles");
    }

    #[test]
    fn tiled_clear_drops_whole_tiles() {
        let flat = PixelBuffer::new_filled(Encoding::Rgba, 128, 64, &[1, 2, 3, 255]);
        let mut tiled = TiledBuffer::from_buffer(&flat);
        assert_eq!(tiled.tile_count(), 2);
        tiled.clear_rect(Rect::new(0, 0, 64, 64));
        assert_eq!(tiled.tile_count(), 1);
        tiled.clear_rect(Rect::new(64, 0, 1, 1));
        assert_eq!(tiled.pixel(64, 0), vec![0, 0, 0, 0]);
        assert_eq!(tiled.pixel(65, 0), vec![1, 2, 3, 255]);
    }

    #[test]
    fn tiled_clone_is_copy_on_write() {
        let flat = PixelBuffer::new_filled(Encoding::Gray, 64, 64, &[7]);
        let a = TiledBuffer::from_buffer(&flat);
        let mut b = a.clone();
        b.write_row(0, 0, &[9]);
        assert_eq!(a.pixel(0, 0), vec![7]);
        assert_eq!(b.pixel(0, 0), vec![9]);
    }

    #[test]
    fn clipped_reads_fill_outside_with_zero() {
        let buf = PixelBuffer::new_filled(Encoding::Gray, 4, 4, &[200]);
        let mut row = [1u8; 6];
        read_row_clipped(&buf, -1, 0, &mut row);
        assert_eq!(row, [0, 200, 200, 200, 200, 0]);
        read_row_clipped(&buf, 0, 9, &mut row);
        assert_eq!(row, [0; 6]);
    }

    #[test]
    fn indexed_expands_through_colormap() {
        let cmap = Colormap::new(vec![[10, 20, 30], [40, 50, 60]]);
        let buf = PixelBuffer::from_raw(Encoding::IndexedA, 2, 1, vec![1, 255, 0, 0]).unwrap();
        let rgba = buf.to_rgba_image(Some(&cmap));
        assert_eq!(rgba.get_pixel(0, 0).0, [40, 50, 60, 255]);
        assert_eq!(rgba.get_pixel(1, 0).0, [10, 20, 30, 0]);
    }
}
