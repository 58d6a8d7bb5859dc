mod error;
pub mod models;
pub mod services;

pub use error::{Error, Result};
pub use services::auth_service::{AuthStore, Credential};
pub use services::chat_service::ChatSessionManager;
pub use services::config_service::{get_effective_config, Config, EffectiveConfig};
pub use services::notes_client::{NotesApi, NotesClient, ReplyStream};
pub use services::pdf_service::{DecodedDocument, DocumentDecoder, PageSurface, SecureRenderer};
pub use services::resize_service::{ChatPanel, ListenerRegistry, ResizeGesture};
pub use services::workspace_service::{Workspace, WorkspaceOptions, WorkspaceSnapshot};

#[cfg(feature = "mupdf")]
pub use services::mupdf_decoder::MupdfDecoder;

use tracing_subscriber::EnvFilter;

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `prepdesk_lib=info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("prepdesk_lib=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
