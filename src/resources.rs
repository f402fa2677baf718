use bevy::prelude::*;
use bytemuck::{Pod, Zeroable};
use derive_more::From;
use std::sync::Arc;

/// Opaque handle to a vertex buffer owned by the [`ResourceAllocator`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, From)]
pub struct VertexBufferHandle(pub u64);

/// Opaque handle to an index buffer owned by the [`ResourceAllocator`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, From)]
pub struct IndexBufferHandle(pub u64);

/// Vertex layout of the shared tile grid.
///
/// Positions are in tile tessellation space (x and z in quad units, y zero),
/// displacement and curvature are applied downstream by the renderer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct TileVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Creates and uploads the GPU buffers backing tile geometry.
///
/// The graphics backend is out of scope for this crate, so buffers are only
/// ever addressed through the opaque handles minted here. Buffer creation is
/// driven from the dedicated upload phase
/// ([`upload_tessellator_buffers`](crate::plugin::upload_tessellator_buffers)),
/// never from the LOD update itself.
pub trait ResourceAllocator: Send + Sync {
    fn create_vertex_buffer(&self, vertices: &[TileVertex]) -> VertexBufferHandle;

    fn create_index_buffer(&self, indices: &[u16]) -> IndexBufferHandle;

    fn release_vertex_buffer(&self, handle: VertexBufferHandle);

    fn release_index_buffer(&self, handle: IndexBufferHandle);
}

/// The allocator used by all terrain sheets, inserted by the application.
#[derive(Resource, Clone)]
pub struct TerrainResources(pub Arc<dyn ResourceAllocator>);
