use std::sync::Arc;

use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::notes_client::NotesApi;
use crate::error::{Error, Result};
use crate::models::{
    DocumentId, PageSize, RenderSnapshot, RenderState, RenderStatus, SurfaceGeometry,
    DEFAULT_ZOOM, MAX_SURFACE_PIXELS, MAX_SURFACE_SIDE, MAX_ZOOM, MIN_ZOOM, ZOOM_STEP,
};

/// Turns raw bytes into a paginated document.
pub trait DocumentDecoder: Send + Sync + 'static {
    fn decode(&self, bytes: Vec<u8>) -> Result<Box<dyn DecodedDocument>>;
}

/// A decoded document. Page numbers are 1-based.
pub trait DecodedDocument: Send + Sync {
    fn page_count(&self) -> u32;

    fn page_size(&self, page_number: u32) -> Result<PageSize>;

    /// Draw `page_number` at `scale` into `target`, which is already sized to the backing resolution.
    fn rasterize(&self, page_number: u32, scale: f32, target: &mut RgbaImage) -> Result<()>;
}

/// Raster output of one page.
#[derive(Debug, Clone)]
pub struct PageSurface {
    pub geometry: SurfaceGeometry,
    pub pixels: RgbaImage,
}

/// Backing resolution is `ceil(viewport * max(1, dpr))`; display size stays the viewport.
///
/// Oversampling is reduced towards 1.0 when the backing store would exceed
/// [`MAX_SURFACE_PIXELS`] or [`MAX_SURFACE_SIDE`]. A page that is too large
/// even at 1.0 is a `Decode` error, so nothing is allocated for it.
pub fn surface_geometry(
    page: PageSize,
    zoom: f32,
    device_pixel_ratio: f32,
) -> Result<SurfaceGeometry> {
    let display_width = page.width * zoom;
    let display_height = page.height * zoom;
    let valid = |v: f32| v.is_finite() && v > 0.0;
    if !valid(display_width) || !valid(display_height) {
        return Err(Error::Decode(format!(
            "invalid page size {}x{}",
            page.width, page.height
        )));
    }

    let backing = |scale: f32| {
        (
            (display_width * scale).ceil().max(1.0),
            (display_height * scale).ceil().max(1.0),
        )
    };
    let fits = |scale: f32| {
        let (width, height) = backing(scale);
        let side = MAX_SURFACE_SIDE as f32;
        width <= side && height <= side && (width as u64) * (height as u64) <= MAX_SURFACE_PIXELS
    };

    if !fits(1.0) {
        return Err(Error::Decode(format!(
            "page too large to render ({:.0}x{:.0} at zoom {})",
            page.width, page.height, zoom
        )));
    }

    let mut output_scale = if device_pixel_ratio.is_finite() {
        device_pixel_ratio.max(1.0)
    } else {
        1.0
    };
    if !fits(output_scale) {
        let side = MAX_SURFACE_SIDE as f32;
        let display_area = f64::from(display_width) * f64::from(display_height);
        let area = (MAX_SURFACE_PIXELS as f64 / display_area).sqrt() as f32;
        output_scale = (side / display_width)
            .min(side / display_height)
            .min(area)
            .clamp(1.0, output_scale);
        // ceil() can still push one side over by a pixel
        while output_scale > 1.0 && !fits(output_scale) {
            output_scale = (output_scale * 0.99).max(1.0);
        }
        debug!(output_scale, "reduced oversampling to fit the surface budget");
    }

    let (backing_width, backing_height) = backing(output_scale);
    Ok(SurfaceGeometry {
        output_scale,
        display_width,
        display_height,
        backing_width: backing_width as u32,
        backing_height: backing_height as u32,
    })
}

pub fn clamp_zoom(zoom: f32) -> f32 {
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}

fn clamp_page(requested: i64, page_count: u32) -> u32 {
    requested.clamp(1, i64::from(page_count.max(1))) as u32
}

#[derive(Debug, Clone, Copy)]
pub struct RenderSettings {
    pub device_pixel_ratio: f32,
    pub default_zoom: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            device_pixel_ratio: 1.0,
            default_zoom: DEFAULT_ZOOM,
        }
    }
}

struct RendererState {
    epoch: u64,
    draw_seq: u64,
    status: RenderStatus,
    document_id: Option<DocumentId>,
    document: Option<Arc<dyn DecodedDocument>>,
    render: Option<RenderState>,
    surface: Option<PageSurface>,
}

impl RendererState {
    fn idle() -> Self {
        Self {
            epoch: 0,
            draw_seq: 0,
            status: RenderStatus::Idle,
            document_id: None,
            document: None,
            render: None,
            surface: None,
        }
    }

    /// Drop everything belonging to the previous document and start a new epoch.
    fn reset(&mut self, status: RenderStatus, document_id: Option<DocumentId>) -> u64 {
        self.epoch += 1;
        self.status = status;
        self.document_id = document_id;
        self.document = None;
        self.render = None;
        self.surface = None;
        self.epoch
    }
}

struct DrawJob {
    epoch: u64,
    seq: u64,
    document: Arc<dyn DecodedDocument>,
    page_number: u32,
    zoom: f32,
}

pub struct SecureRenderer {
    api: Arc<dyn NotesApi>,
    decoder: Arc<dyn DocumentDecoder>,
    settings: RenderSettings,
    state: Mutex<RendererState>,
}

impl SecureRenderer {
    pub fn new(
        api: Arc<dyn NotesApi>,
        decoder: Arc<dyn DocumentDecoder>,
        settings: RenderSettings,
    ) -> Self {
        Self {
            api,
            decoder,
            settings,
            state: Mutex::new(RendererState::idle()),
        }
    }

    /// Fetch, decode and draw page 1 of `document_id`.
    ///
    /// Errors are returned only while this open is still the current one;
    /// a superseded open finishes with `Ok(())` and changes nothing.
    pub async fn open(&self, document_id: DocumentId) -> Result<()> {
        let epoch = self
            .state
            .lock()
            .reset(RenderStatus::Loading, Some(document_id));
        info!(document_id, epoch, "opening document");

        match self.load(epoch, document_id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut state = self.state.lock();
                if state.epoch != epoch {
                    debug!(document_id, "discarding failure of superseded open");
                    return Ok(());
                }
                warn!(document_id, error = %err, "failed to open document");
                state.document = None;
                state.render = None;
                state.surface = None;
                state.status = RenderStatus::Error(err.to_string());
                Err(err)
            }
        }
    }

    async fn load(&self, epoch: u64, document_id: DocumentId) -> Result<()> {
        let bytes = self.api.fetch_content_bytes(document_id).await?;
        if !self.is_current(epoch) {
            return Ok(());
        }
        debug!(document_id, len = bytes.len(), "fetched document bytes");

        let decoder = self.decoder.clone();
        let decoded = tokio::task::spawn_blocking(move || decoder.decode(bytes))
            .await
            .map_err(|e| Error::Decode(format!("decode task failed: {}", e)))??;
        let document: Arc<dyn DecodedDocument> = Arc::from(decoded);

        let page_count = document.page_count();
        if page_count == 0 {
            return Err(Error::Decode("document has no pages".to_string()));
        }

        let zoom = clamp_zoom(self.settings.default_zoom);
        let surface = rasterize(document.clone(), 1, zoom, self.settings.device_pixel_ratio).await?;

        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!(document_id, "discarding superseded open");
            return Ok(());
        }
        state.status = RenderStatus::Ready;
        state.document = Some(document);
        state.render = Some(RenderState {
            page_number: 1,
            zoom,
            page_count,
        });
        state.surface = Some(surface);
        info!(document_id, page_count, "document ready");
        Ok(())
    }

    /// Back to `Idle`, discarding the decoded document and any in-flight open.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.reset(RenderStatus::Idle, None);
        debug!("renderer closed");
    }

    /// Jump to `page_number`, clamped to `[1, page_count]`. No-op unless ready.
    pub async fn go_to_page(&self, page_number: i64) -> Result<()> {
        let job = self.update(|render| {
            render.page_number = clamp_page(page_number, render.page_count);
        });
        self.draw(job).await
    }

    pub async fn next_page(&self) -> Result<()> {
        let job = self.update(|render| {
            render.page_number = clamp_page(i64::from(render.page_number) + 1, render.page_count);
        });
        self.draw(job).await
    }

    pub async fn previous_page(&self) -> Result<()> {
        let job = self.update(|render| {
            render.page_number = clamp_page(i64::from(render.page_number) - 1, render.page_count);
        });
        self.draw(job).await
    }

    /// Set zoom, clamped to `[0.5, 3.0]`. Non-finite input is ignored.
    pub async fn set_zoom(&self, zoom: f32) -> Result<()> {
        if !zoom.is_finite() {
            return Ok(());
        }
        let job = self.update(|render| render.zoom = clamp_zoom(zoom));
        self.draw(job).await
    }

    pub async fn zoom_in(&self) -> Result<()> {
        let job = self.update(|render| render.zoom = clamp_zoom(render.zoom + ZOOM_STEP));
        self.draw(job).await
    }

    pub async fn zoom_out(&self) -> Result<()> {
        let job = self.update(|render| render.zoom = clamp_zoom(render.zoom - ZOOM_STEP));
        self.draw(job).await
    }

    /// Apply `change` while ready; returns a redraw job only if page or zoom moved.
    fn update(&self, change: impl FnOnce(&mut RenderState)) -> Option<DrawJob> {
        let mut state = self.state.lock();
        if state.status != RenderStatus::Ready {
            return None;
        }
        let document = state.document.clone()?;
        let render = state.render.as_mut()?;

        let before = *render;
        change(render);
        if *render == before {
            return None;
        }
        let (page_number, zoom) = (render.page_number, render.zoom);

        state.draw_seq += 1;
        Some(DrawJob {
            epoch: state.epoch,
            seq: state.draw_seq,
            document,
            page_number,
            zoom,
        })
    }

    async fn draw(&self, job: Option<DrawJob>) -> Result<()> {
        let Some(job) = job else {
            return Ok(());
        };

        let result = rasterize(
            job.document,
            job.page_number,
            job.zoom,
            self.settings.device_pixel_ratio,
        )
        .await;

        let mut state = self.state.lock();
        // a newer page/zoom change or a different document owns the surface now
        if state.epoch != job.epoch || state.draw_seq != job.seq {
            return Ok(());
        }
        match result {
            Ok(surface) => {
                state.surface = Some(surface);
                Ok(())
            }
            Err(err) => {
                warn!(page = job.page_number, error = %err, "page rasterization failed");
                state.status = RenderStatus::Error(err.to_string());
                state.document = None;
                state.render = None;
                state.surface = None;
                Err(err)
            }
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.state.lock().epoch == epoch
    }

    pub fn status(&self) -> RenderStatus {
        self.state.lock().status.clone()
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        let state = self.state.lock();
        RenderSnapshot {
            status: state.status.clone(),
            document_id: state.document_id,
            state: state.render,
            surface: state.surface.as_ref().map(|surface| surface.geometry),
        }
    }

    /// Borrow the current surface, e.g. to blit it to the screen.
    pub fn with_surface<R>(&self, f: impl FnOnce(&PageSurface) -> R) -> Option<R> {
        let state = self.state.lock();
        state.surface.as_ref().map(f)
    }
}

async fn rasterize(
    document: Arc<dyn DecodedDocument>,
    page_number: u32,
    zoom: f32,
    device_pixel_ratio: f32,
) -> Result<PageSurface> {
    tokio::task::spawn_blocking(move || {
        let page = document.page_size(page_number)?;
        let geometry = surface_geometry(page, zoom, device_pixel_ratio)?;
        let mut pixels = RgbaImage::from_pixel(
            geometry.backing_width,
            geometry.backing_height,
            Rgba([255, 255, 255, 255]),
        );
        document.rasterize(page_number, zoom * geometry.output_scale, &mut pixels)?;
        Ok(PageSurface { geometry, pixels })
    })
    .await
    .map_err(|e| Error::Decode(format!("render task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    const LETTER: PageSize = PageSize {
        width: 612.0,
        height: 792.0,
    };

    #[test]
    fn backing_store_scales_with_device_pixels() {
        let geometry = surface_geometry(LETTER, 1.0, 2.0).unwrap();
        assert_eq!(geometry.output_scale, 2.0);
        assert_eq!(geometry.backing_width, 1224);
        assert_eq!(geometry.backing_height, 1584);
        assert_eq!(geometry.display_width, 612.0);
        assert_eq!(geometry.display_height, 792.0);
    }

    #[test]
    fn low_density_displays_never_downscale() {
        let geometry = surface_geometry(LETTER, 1.0, 0.5).unwrap();
        assert_eq!(geometry.output_scale, 1.0);
        assert_eq!(geometry.backing_width, 612);
    }

    #[test]
    fn backing_size_rounds_up() {
        let page = PageSize {
            width: 100.3,
            height: 50.1,
        };
        let geometry = surface_geometry(page, 1.0, 1.5).unwrap();
        assert_eq!(geometry.backing_width, 151); // 150.45
        assert_eq!(geometry.backing_height, 76); // 75.15
    }

    #[test]
    fn oversized_page_is_refused_before_allocating() {
        let poster = PageSize {
            width: 14400.0,
            height: 14400.0,
        };
        let err = surface_geometry(poster, MAX_ZOOM, 2.0).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));

        let degenerate = PageSize {
            width: 0.0,
            height: f32::NAN,
        };
        assert!(matches!(
            surface_geometry(degenerate, 1.0, 1.0),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn oversampling_shrinks_to_the_pixel_budget() {
        let geometry = surface_geometry(LETTER, MAX_ZOOM, 8.0).unwrap();
        assert!(geometry.output_scale >= 1.0 && geometry.output_scale < 8.0);
        assert!(geometry.backing_width <= MAX_SURFACE_SIDE);
        assert!(geometry.backing_height <= MAX_SURFACE_SIDE);
        assert!(
            u64::from(geometry.backing_width) * u64::from(geometry.backing_height)
                <= MAX_SURFACE_PIXELS
        );
        // the displayed size does not depend on the backing store
        assert_eq!(geometry.display_width, 612.0 * MAX_ZOOM);
    }

    #[test]
    fn zoom_and_page_clamping() {
        assert_eq!(clamp_zoom(-4.0), MIN_ZOOM);
        assert_eq!(clamp_zoom(1e9), MAX_ZOOM);
        assert_eq!(clamp_zoom(1.7), 1.7);
        assert_eq!(clamp_page(0, 5), 1);
        assert_eq!(clamp_page(10, 5), 5);
        assert_eq!(clamp_page(i64::MIN, 5), 1);
        assert_eq!(clamp_page(3, 5), 3);
    }
}
