use super::DocumentId;

pub const MIN_ZOOM: f32 = 0.5;
pub const MAX_ZOOM: f32 = 3.0;
pub const ZOOM_STEP: f32 = 0.2;
pub const DEFAULT_ZOOM: f32 = 1.2;

/// Largest backing store the renderer will allocate (64 Mpx, 256 MiB of RGBA).
pub const MAX_SURFACE_PIXELS: u64 = 64 * 1024 * 1024;
pub const MAX_SURFACE_SIDE: u32 = 16_384;
/// Upper bound for the configured device pixel ratio.
pub const MAX_DEVICE_PIXEL_RATIO: f32 = 4.0;

#[derive(Debug, Clone, PartialEq)]
pub enum RenderStatus {
    Idle,
    Loading,
    Ready,
    Error(String),
}

/// Pagination and zoom of the open document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub page_number: u32,
    pub zoom: f32,
    pub page_count: u32,
}

/// Page box in points at zoom 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

/// Backing vs. displayed size of the raster surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceGeometry {
    pub output_scale: f32,
    pub display_width: f32,
    pub display_height: f32,
    pub backing_width: u32,
    pub backing_height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderSnapshot {
    pub status: RenderStatus,
    pub document_id: Option<DocumentId>,
    pub state: Option<RenderState>,
    pub surface: Option<SurfaceGeometry>,
}
