use crate::resources::{IndexBufferHandle, ResourceAllocator, TileVertex, VertexBufferHandle};
use bevy::utils::HashMap;
use itertools::iproduct;

/// The level of detail of the four edges of a terrain tile.
///
/// Each divisor is a power of two and states how many of the tile's edge
/// quads are collapsed into one coarse segment, so that the edge lines up
/// with a neighbor of lower detail without gaps. A divisor of one leaves the
/// edge at the regular grid resolution.
///
/// The key hashes and compares by all four divisors and is used to cache
/// generated index buffers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EdgeTessellation {
    pub top: u16,
    pub bottom: u16,
    pub left: u16,
    pub right: u16,
}

impl EdgeTessellation {
    pub fn uniform(divisor: u16) -> Self {
        Self {
            top: divisor,
            bottom: divisor,
            left: divisor,
            right: divisor,
        }
    }

    /// Componentwise maximum, used to keep visible tiles hole free for the
    /// morph frame of a LOD switch.
    pub fn max(self, other: Self) -> Self {
        Self {
            top: self.top.max(other.top),
            bottom: self.bottom.max(other.bottom),
            left: self.left.max(other.left),
            right: self.right.max(other.right),
        }
    }
}

impl Default for EdgeTessellation {
    fn default() -> Self {
        Self::uniform(1)
    }
}

/// Generates and caches the vertex and index buffers for the tiles of one
/// terrain sheet.
///
/// All tiles share a single vertex buffer with the regular interior grid;
/// edge stitching only changes the triangulation, so one index buffer is
/// cached per [`EdgeTessellation`] key. Requesting a key marks it pending,
/// the actual buffers are built in the resource upload phase
/// ([`Self::load_resources`]) to batch GPU uploads.
pub struct SheetTessellator {
    tessellation: u16,
    indices: HashMap<EdgeTessellation, Option<IndexBufferHandle>>,
    needed_edges: Vec<EdgeTessellation>,
    vertices: Option<VertexBufferHandle>,
    index_scratch: Vec<u16>,
}

impl SheetTessellator {
    /// `tessellation` is the number of quads along a tile edge. It has to be
    /// a power of two so that edge divisors always split it evenly, and at
    /// most 128 so that the grid stays addressable with 16 bit indices.
    pub fn new(tessellation: u16) -> Self {
        assert!(
            tessellation.is_power_of_two() && tessellation <= 128,
            "tile tessellation must be a power of two of at most 128, got {tessellation}"
        );

        Self {
            tessellation,
            indices: HashMap::default(),
            needed_edges: Vec::new(),
            vertices: None,
            index_scratch: Vec::new(),
        }
    }

    pub fn tessellation(&self) -> u16 {
        self.tessellation
    }

    /// Marks the edge key for generation. Idempotent; a key that is already
    /// cached or pending is not generated twice.
    pub fn request_edge_tessellation(&mut self, edge: EdgeTessellation) {
        if !self.indices.contains_key(&edge) {
            self.indices.insert(edge, None);
            self.needed_edges.push(edge);
        }
    }

    pub fn is_tessellation_available(&self, edge: EdgeTessellation) -> bool {
        matches!(self.indices.get(&edge), Some(Some(_)))
    }

    pub fn index_buffer(&self, edge: EdgeTessellation) -> Option<IndexBufferHandle> {
        self.indices.get(&edge).copied().flatten()
    }

    pub fn vertex_buffer(&self) -> Option<VertexBufferHandle> {
        self.vertices
    }

    /// True while buffer generation is still outstanding.
    pub fn loading_required(&self) -> bool {
        !self.needed_edges.is_empty() || self.vertices.is_none()
    }

    /// Generates all pending buffers. Called from the upload phase, never
    /// from the LOD update itself.
    pub fn load_resources(&mut self, allocator: &dyn ResourceAllocator) {
        while let Some(edge) = self.needed_edges.pop() {
            self.generate_index_data(edge);
            let handle = allocator.create_index_buffer(&self.index_scratch);
            self.indices.insert(edge, Some(handle));
        }

        if self.vertices.is_none() {
            let vertices = self.generate_vertices();
            self.vertices = Some(allocator.create_vertex_buffer(&vertices));
        }
    }

    pub fn release_resources(&mut self, allocator: &dyn ResourceAllocator) {
        for handle in self.indices.drain().filter_map(|(_, handle)| handle) {
            allocator.release_index_buffer(handle);
        }
        self.needed_edges.clear();

        if let Some(handle) = self.vertices.take() {
            allocator.release_vertex_buffer(handle);
        }
    }

    fn generate_vertices(&self) -> Vec<TileVertex> {
        let tessellation = self.tessellation as u32;

        iproduct!(0..=tessellation, 0..=tessellation)
            .map(|(z, x)| TileVertex {
                position: [x as f32, 0.0, z as f32],
                normal: [0.0, 1.0, 0.0],
                uv: [
                    x as f32 / tessellation as f32,
                    z as f32 / tessellation as f32,
                ],
            })
            .collect()
    }

    fn generate_index_data(&mut self, edge: EdgeTessellation) {
        let tessellation = self.tessellation as i32;
        let row_len = tessellation + 1;
        self.index_scratch.clear();

        // the regular interior grid, leaving the outermost quad ring to the edge strips
        for (y, x) in iproduct!(1..row_len - 2, 1..row_len - 2) {
            let start = y * row_len + x;

            push_triangle(&mut self.index_scratch, start, start + row_len, start + row_len + 1, false);
            push_triangle(&mut self.index_scratch, start, start + row_len + 1, start + 1, false);
        }

        let scratch = &mut self.index_scratch;
        edge_strip(scratch, tessellation, edge.top as i32, 0, 1, row_len, false);
        edge_strip(scratch, tessellation, edge.bottom as i32, row_len * row_len - 1, -1, -row_len, false);
        edge_strip(scratch, tessellation, edge.left as i32, 0, row_len, 1, true);
        edge_strip(scratch, tessellation, edge.right as i32, row_len * row_len - 1, -row_len, -1, true);
    }
}

/// Triangulates one edge of the tile. Each coarse segment of `divisor` quads
/// becomes a fan anchored at its outer corner, consuming the extra vertices
/// of the finer grid row without leaving T-junctions.
fn edge_strip(
    scratch: &mut Vec<u16>,
    tessellation: i32,
    divisor: i32,
    start: i32,
    dx: i32,
    dy: i32,
    flip: bool,
) {
    let divisor = divisor.clamp(1, tessellation);
    let half = (divisor + 1) / 2;

    let mut bx = 0;
    while bx < tessellation {
        let base = start + dx * bx;
        let t_max = divisor.min(tessellation - bx - 1);

        let mut t = i32::from(bx == 0);
        while t < t_max {
            let anchor = base + dx * divisor * i32::from(t >= half);
            push_triangle(scratch, anchor, base + dx * t + dy, base + dx * (t + 1) + dy, flip);
            t += 1;
        }

        let half_block = half - i32::from(bx + half == tessellation);
        push_triangle(scratch, base, base + dx * half_block + dy, base + dx * divisor, flip);

        bx += divisor;
    }
}

fn push_triangle(scratch: &mut Vec<u16>, a: i32, b: i32, c: i32, flip: bool) {
    scratch.push(a as u16);
    if flip {
        scratch.push(c as u16);
        scratch.push(b as u16);
    } else {
        scratch.push(b as u16);
        scratch.push(c as u16);
    }
}
