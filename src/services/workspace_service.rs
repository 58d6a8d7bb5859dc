use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::auth_service::AuthStore;
use super::chat_service::ChatSessionManager;
use super::config_service::{get_effective_config, EffectiveConfig};
use super::notes_client::{NotesApi, NotesClient};
use super::pdf_service::{DocumentDecoder, RenderSettings, SecureRenderer};
use crate::error::{Error, Result};
use crate::models::{ChatSnapshot, Document, DocumentId, Notice, RenderSnapshot, SendOutcome};

const PDF_MAGIC: &[u8] = b"%PDF-";

#[derive(Debug, Clone, Copy)]
pub struct WorkspaceOptions {
    pub render: RenderSettings,
    pub max_upload_bytes: u64,
}

impl WorkspaceOptions {
    pub fn from_config(config: &EffectiveConfig) -> Self {
        Self {
            render: RenderSettings {
                device_pixel_ratio: config.device_pixel_ratio,
                default_zoom: config.default_zoom,
            },
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

/// Everything the UI draws, captured under each owner's lock in turn.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceSnapshot {
    pub documents: Vec<Document>,
    pub selected: Option<Document>,
    pub renaming: Option<DocumentId>,
    pub render: RenderSnapshot,
    pub chat: ChatSnapshot,
    pub notice: Option<Notice>,
}

impl WorkspaceSnapshot {
    /// Title shown above the viewer.
    pub fn title(&self) -> Option<&str> {
        self.selected.as_ref().map(|doc| doc.filename.as_str())
    }
}

#[derive(Default)]
struct WorkspaceState {
    documents: Vec<Document>,
    selected: Option<DocumentId>,
    /// Bumped on every selection change, including re-selecting the same id.
    selection_epoch: u64,
    renaming: Option<DocumentId>,
    notice: Option<Notice>,
}

pub struct Workspace {
    api: Arc<dyn NotesApi>,
    renderer: SecureRenderer,
    chat: ChatSessionManager,
    max_upload_bytes: u64,
    state: Mutex<WorkspaceState>,
}

impl Workspace {
    pub fn new(
        api: Arc<dyn NotesApi>,
        decoder: Arc<dyn DocumentDecoder>,
        options: WorkspaceOptions,
    ) -> Self {
        Self {
            renderer: SecureRenderer::new(api.clone(), decoder, options.render),
            chat: ChatSessionManager::new(api.clone()),
            api,
            max_upload_bytes: options.max_upload_bytes,
            state: Mutex::new(WorkspaceState::default()),
        }
    }

    /// Wire a workspace to the configured backend and the stored credential.
    pub fn from_config(decoder: Arc<dyn DocumentDecoder>) -> Result<Self> {
        let config = get_effective_config()?;
        let client = NotesClient::from_config(&config, AuthStore::from_app_data()?)?;
        Ok(Self::new(
            Arc::new(client),
            decoder,
            WorkspaceOptions::from_config(&config),
        ))
    }

    pub fn renderer(&self) -> &SecureRenderer {
        &self.renderer
    }

    pub fn chat(&self) -> &ChatSessionManager {
        &self.chat
    }

    pub async fn load_documents(&self) -> Result<Vec<Document>> {
        let documents = self.api.list().await.map_err(|e| self.report(e))?;
        info!(count = documents.len(), "loaded documents");

        let vanished = {
            let mut state = self.state.lock();
            state.documents = documents.clone();
            let listed = |id: &DocumentId| documents.iter().any(|doc| doc.id == *id);
            if !state.renaming.as_ref().map_or(true, listed) {
                state.renaming = None;
            }
            state.selected.filter(|id| !listed(id))
        };
        if let Some(id) = vanished {
            warn!(document_id = id, "selected document is gone from the server");
            self.forget(id);
        }
        Ok(documents)
    }

    /// Validate, upload, prepend to the list and select the new document.
    ///
    /// A failure to open the freshly uploaded document only produces a notice.
    pub async fn upload_document(&self, bytes: Vec<u8>, filename: &str) -> Result<Document> {
        validate_upload(&bytes, filename, self.max_upload_bytes).map_err(|e| self.report(e))?;

        let document = self
            .api
            .upload(bytes, filename)
            .await
            .map_err(|e| self.report(e))?;
        info!(document_id = document.id, filename = %document.filename, "uploaded document");

        self.state.lock().documents.insert(0, document.clone());
        if let Err(err) = self.select_document(document.id).await {
            debug!(document_id = document.id, error = %err, "uploaded document failed to open");
        }
        Ok(document)
    }

    /// Select `id` and open it in both the renderer and the chat panel.
    ///
    /// Ignored while a rename edit is pending for `id`. The open and the
    /// session resolution run concurrently and each only touches its own
    /// state; a stale reference drops the document from the list.
    pub async fn select_document(&self, id: DocumentId) -> Result<()> {
        let (document, epoch) = {
            let mut state = self.state.lock();
            if state.renaming == Some(id) {
                debug!(document_id = id, "rename pending, ignoring selection");
                return Ok(());
            }
            let found = state.documents.iter().find(|doc| doc.id == id).cloned();
            let Some(document) = found else {
                drop(state);
                return Err(self.report(Error::NotFound(format!("document {}", id))));
            };
            state.selected = Some(id);
            state.selection_epoch += 1;
            state.notice = None;
            (document, state.selection_epoch)
        };
        self.chat.clear();
        info!(document_id = id, "selected document");

        let (opened, resolved) = tokio::join!(self.renderer.open(id), self.chat.resolve(&document));

        if self.state.lock().selection_epoch != epoch {
            debug!(document_id = id, "selection moved on, ignoring results");
            return Ok(());
        }

        let failure = match (opened, resolved) {
            (Err(err), _) | (Ok(()), Err(err)) => err,
            (Ok(()), Ok(_)) => return Ok(()),
        };

        if matches!(failure, Error::NotFound(_)) {
            warn!(document_id = id, "document no longer exists on the server");
            self.forget(id);
        }
        Err(self.report(failure))
    }

    /// Remove `id` locally; if it was selected, reset the viewer and the chat.
    fn forget(&self, id: DocumentId) {
        let was_selected = {
            let mut state = self.state.lock();
            state.documents.retain(|doc| doc.id != id);
            if state.renaming == Some(id) {
                state.renaming = None;
            }
            let was_selected = state.selected == Some(id);
            if was_selected {
                state.selected = None;
                state.selection_epoch += 1;
            }
            was_selected
        };
        if was_selected {
            self.renderer.close();
            self.chat.clear();
        }
    }

    /// Delete `id` on the server, then locally.
    ///
    /// A 404 means someone else already deleted it, so local removal still happens.
    pub async fn delete_document(&self, id: DocumentId) -> Result<()> {
        match self.api.remove(id).await {
            Ok(()) => info!(document_id = id, "deleted document"),
            Err(Error::NotFound(detail)) => {
                warn!(document_id = id, %detail, "document was already deleted");
            }
            Err(err) => return Err(self.report(err)),
        }

        self.forget(id);
        Ok(())
    }

    /// Start editing the name of `id`; selection of `id` is ignored meanwhile.
    pub fn begin_rename(&self, id: DocumentId) {
        self.state.lock().renaming = Some(id);
    }

    pub fn cancel_rename(&self) {
        self.state.lock().renaming = None;
    }

    /// Rename on the server, then update the list entry (and with it the
    /// title, when selected) in one step. The name is stored trimmed.
    pub async fn rename_document(&self, id: DocumentId, new_name: &str) -> Result<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(self.report(Error::Validation("Name cannot be empty".to_string())));
        }

        self.api
            .rename(id, new_name)
            .await
            .map_err(|e| self.report(e))?;

        let mut state = self.state.lock();
        if let Some(document) = state.documents.iter_mut().find(|doc| doc.id == id) {
            document.filename = new_name.to_string();
        }
        if state.renaming == Some(id) {
            state.renaming = None;
        }
        info!(document_id = id, new_name, "renamed document");
        Ok(())
    }

    /// Send `text` in the resolved session. No-op when none is resolved.
    pub async fn send_message(&self, text: &str) -> Result<SendOutcome> {
        let session_id = self.chat.session_id();
        self.chat
            .send(session_id.as_deref(), text)
            .await
            .map_err(|e| self.report(e))
    }

    pub async fn go_to_page(&self, page_number: i64) -> Result<()> {
        self.renderer
            .go_to_page(page_number)
            .await
            .map_err(|e| self.report(e))
    }

    pub async fn set_zoom(&self, zoom: f32) -> Result<()> {
        self.renderer.set_zoom(zoom).await.map_err(|e| self.report(e))
    }

    pub fn dismiss_notice(&self) {
        self.state.lock().notice = None;
    }

    pub fn selected_id(&self) -> Option<DocumentId> {
        self.state.lock().selected
    }

    pub fn snapshot(&self) -> WorkspaceSnapshot {
        let (documents, selected, renaming, notice) = {
            let state = self.state.lock();
            let selected = state
                .selected
                .and_then(|id| state.documents.iter().find(|doc| doc.id == id).cloned());
            (
                state.documents.clone(),
                selected,
                state.renaming,
                state.notice.clone(),
            )
        };

        WorkspaceSnapshot {
            documents,
            selected,
            renaming,
            render: self.renderer.snapshot(),
            chat: self.chat.snapshot(),
            notice,
        }
    }

    /// Record `err` as the current notice and hand it back to the caller.
    fn report(&self, err: Error) -> Error {
        warn!(error = %err, "workspace operation failed");
        self.state.lock().notice = Some(Notice::from_error(&err));
        err
    }
}

/// Local checks run before any bytes leave the machine.
pub fn validate_upload(bytes: &[u8], filename: &str, max_bytes: u64) -> Result<()> {
    let is_pdf_name = Path::new(filename)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf_name {
        return Err(Error::Validation(format!("{} is not a PDF file", filename)));
    }
    if bytes.is_empty() {
        return Err(Error::Validation(format!("{} is empty", filename)));
    }
    if bytes.len() as u64 > max_bytes {
        return Err(Error::Validation(format!(
            "{} exceeds the {} MiB upload limit",
            filename,
            max_bytes / (1024 * 1024)
        )));
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(Error::Validation(format!(
            "{} does not look like a PDF document",
            filename
        )));
    }
    Ok(())
}
