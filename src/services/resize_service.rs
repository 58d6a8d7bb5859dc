use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_CHAT_WIDTH: f32 = 450.0;
/// Widths must fall strictly between these bounds to be applied.
pub const MIN_CHAT_WIDTH: f32 = 300.0;
pub const MAX_CHAT_WIDTH: f32 = 800.0;

pub type ListenerId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerEvent {
    Move,
    Release,
}

#[derive(Default)]
struct Registrations {
    next_id: ListenerId,
    active: Vec<(ListenerId, PointerEvent)>,
}

/// Global pointer listeners, as a window would hold them.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<Registrations>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event: PointerEvent) -> ListenerId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.active.push((id, event));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.active.len();
        inner.active.retain(|(registered, _)| *registered != id);
        inner.active.len() != before
    }

    pub fn count(&self, event: PointerEvent) -> usize {
        self.inner
            .lock()
            .active
            .iter()
            .filter(|(_, registered)| *registered == event)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().active.is_empty()
    }
}

struct PanelState {
    width: f32,
    resizing: bool,
}

pub struct ChatPanel {
    registry: Arc<ListenerRegistry>,
    state: Mutex<PanelState>,
}

impl ChatPanel {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(PanelState {
                width: DEFAULT_CHAT_WIDTH,
                resizing: false,
            }),
        }
    }

    pub fn width(&self) -> f32 {
        self.state.lock().width
    }

    pub fn is_resizing(&self) -> bool {
        self.state.lock().resizing
    }

    /// Start a drag. Fails while another gesture is still live.
    pub fn begin_resize(&self) -> Result<ResizeGesture<'_>> {
        {
            let mut state = self.state.lock();
            if state.resizing {
                return Err(Error::Validation(
                    "a resize gesture is already in progress".to_string(),
                ));
            }
            state.resizing = true;
        }

        let on_move = self.registry.register(PointerEvent::Move);
        let on_release = self.registry.register(PointerEvent::Release);
        debug!(on_move, on_release, "resize started");

        Ok(ResizeGesture {
            panel: self,
            on_move,
            on_release,
        })
    }
}

#[must_use = "dropping the gesture ends it immediately"]
pub struct ResizeGesture<'a> {
    panel: &'a ChatPanel,
    on_move: ListenerId,
    on_release: ListenerId,
}

impl ResizeGesture<'_> {
    /// Pointer moved to `pointer_x` in a viewport `viewport_width` wide.
    /// Returns whether the width changed.
    pub fn update(&self, pointer_x: f32, viewport_width: f32) -> bool {
        let width = viewport_width - pointer_x;
        if !(width > MIN_CHAT_WIDTH && width < MAX_CHAT_WIDTH) {
            return false;
        }
        self.panel.state.lock().width = width;
        true
    }

    /// Pointer released.
    pub fn finish(self) -> f32 {
        self.panel.width()
    }
}

impl Drop for ResizeGesture<'_> {
    fn drop(&mut self) {
        self.panel.registry.unregister(self.on_move);
        self.panel.registry.unregister(self.on_release);
        self.panel.state.lock().resizing = false;
        debug!("resize ended");
    }
}
