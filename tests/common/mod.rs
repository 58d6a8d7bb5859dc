#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use prepdesk_lib::models::{ChatSession, Document, DocumentId, Message, PageSize};
use prepdesk_lib::services::workspace_service::WorkspaceOptions;
use prepdesk_lib::services::pdf_service::RenderSettings;
use prepdesk_lib::{DecodedDocument, DocumentDecoder, Error, NotesApi, ReplyStream, Result, Workspace};
use tokio::sync::{mpsc, Notify};
use tokio_stream::wrappers::UnboundedReceiverStream;

pub const LETTER: PageSize = PageSize {
    width: 612.0,
    height: 792.0,
};

/// Bytes the fake decoder understands: `%PDF-` header plus a page count.
pub fn pdf(pages: u32) -> Vec<u8> {
    format!("%PDF-1.7 pages={}", pages).into_bytes()
}

/// Like `pdf(1)` but every page is `width` x `height` points.
pub fn pdf_with_page_size(width: f32, height: f32) -> Vec<u8> {
    format!("%PDF-1.7 pages=1 size={}x{}", width, height).into_bytes()
}

pub fn corrupt_pdf() -> Vec<u8> {
    b"%PDF-1.7 corrupt".to_vec()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Upload,
    Rename,
    Remove,
    Content,
    ListSessions,
    CreateSession,
    History,
    Reply,
}

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Auth,
    NotFound,
    Network,
}

impl Failure {
    fn to_error(self) -> Error {
        match self {
            Failure::Auth => Error::Auth("Not authenticated".into()),
            Failure::NotFound => Error::NotFound("gone".into()),
            Failure::Network => Error::Network("connection reset".into()),
        }
    }
}

pub type ReplySender = mpsc::UnboundedSender<Result<String>>;

#[derive(Default)]
struct FakeState {
    next_document_id: DocumentId,
    next_session: u32,
    documents: Vec<Document>,
    contents: HashMap<DocumentId, Vec<u8>>,
    sessions: HashMap<DocumentId, Vec<ChatSession>>,
    histories: HashMap<String, Vec<Message>>,
    content_gates: HashMap<DocumentId, Arc<Notify>>,
    session_gates: HashMap<DocumentId, Arc<Notify>>,
    failures: HashMap<Op, Failure>,
    replies: VecDeque<mpsc::UnboundedReceiver<Result<String>>>,
    prompts: Vec<(String, String)>,
    calls: Vec<Op>,
}

/// In-memory backend with gates for interleaving and one-shot failures.
#[derive(Default)]
pub struct FakeNotesApi {
    state: Mutex<FakeState>,
}

impl FakeNotesApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_document(&self, filename: &str, bytes: Vec<u8>) -> Document {
        let mut state = self.state.lock();
        state.next_document_id += 1;
        let document = Document {
            id: state.next_document_id,
            filename: filename.to_string(),
            created_at: Utc::now(),
        };
        state.documents.push(document.clone());
        state.contents.insert(document.id, bytes);
        document
    }

    /// Seed an existing session with history; it becomes the newest one.
    pub fn add_session(&self, document_id: DocumentId, history: Vec<Message>) -> ChatSession {
        let mut state = self.state.lock();
        let session = Self::new_session(&mut state, document_id, "Chat - earlier");
        state.histories.insert(session.id.clone(), history);
        session
    }

    fn new_session(state: &mut FakeState, document_id: DocumentId, name: &str) -> ChatSession {
        state.next_session += 1;
        let session = ChatSession {
            id: format!("session-{}", state.next_session),
            name: name.to_string(),
            created_at: Utc::now(),
            document_id,
        };
        state
            .sessions
            .entry(document_id)
            .or_default()
            .insert(0, session.clone());
        session
    }

    /// Delete on the "server" without telling the client.
    pub fn delete_remotely(&self, id: DocumentId) {
        let mut state = self.state.lock();
        state.documents.retain(|doc| doc.id != id);
        state.contents.remove(&id);
    }

    /// Hold `fetch_content_bytes(id)` until the returned gate is notified.
    pub fn gate_content(&self, id: DocumentId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().content_gates.insert(id, gate.clone());
        gate
    }

    /// Hold `list_sessions(id)` until the returned gate is notified.
    pub fn gate_sessions(&self, id: DocumentId) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().session_gates.insert(id, gate.clone());
        gate
    }

    /// Make the next call of `op` fail.
    pub fn fail_next(&self, op: Op, failure: Failure) {
        self.state.lock().failures.insert(op, failure);
    }

    /// Queue a reply for the next `stream_reply`; the test drives it through the sender.
    pub fn script_reply(&self) -> ReplySender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().replies.push_back(rx);
        tx
    }

    pub fn prompts(&self) -> Vec<(String, String)> {
        self.state.lock().prompts.clone()
    }

    pub fn calls(&self, op: Op) -> usize {
        self.state.lock().calls.iter().filter(|call| **call == op).count()
    }

    pub fn sessions_of(&self, id: DocumentId) -> Vec<ChatSession> {
        self.state.lock().sessions.get(&id).cloned().unwrap_or_default()
    }

    pub fn filename_of(&self, id: DocumentId) -> Option<String> {
        self.state
            .lock()
            .documents
            .iter()
            .find(|doc| doc.id == id)
            .map(|doc| doc.filename.clone())
    }

    fn enter(&self, op: Op) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(op);
        match state.failures.remove(&op) {
            Some(failure) => Err(failure.to_error()),
            None => Ok(()),
        }
    }

    fn gate(&self, gates: impl FnOnce(&FakeState) -> Option<Arc<Notify>>) -> Option<Arc<Notify>> {
        gates(&self.state.lock())
    }
}

#[async_trait]
impl NotesApi for FakeNotesApi {
    async fn list(&self) -> Result<Vec<Document>> {
        self.enter(Op::List)?;
        Ok(self.state.lock().documents.clone())
    }

    async fn upload(&self, file_bytes: Vec<u8>, filename: &str) -> Result<Document> {
        self.enter(Op::Upload)?;
        Ok(self.add_document(filename, file_bytes))
    }

    async fn rename(&self, id: DocumentId, new_name: &str) -> Result<()> {
        self.enter(Op::Rename)?;
        let mut state = self.state.lock();
        let document = state
            .documents
            .iter_mut()
            .find(|doc| doc.id == id)
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))?;
        document.filename = new_name.to_string();
        Ok(())
    }

    async fn remove(&self, id: DocumentId) -> Result<()> {
        self.enter(Op::Remove)?;
        let mut state = self.state.lock();
        if state.contents.remove(&id).is_none() {
            return Err(Error::NotFound(format!("document {}", id)));
        }
        state.documents.retain(|doc| doc.id != id);
        Ok(())
    }

    async fn fetch_content_bytes(&self, id: DocumentId) -> Result<Vec<u8>> {
        if let Some(gate) = self.gate(|state| state.content_gates.get(&id).cloned()) {
            gate.notified().await;
        }
        self.enter(Op::Content)?;
        self.state
            .lock()
            .contents
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("document {}", id)))
    }

    async fn list_sessions(&self, document_id: DocumentId) -> Result<Vec<ChatSession>> {
        if let Some(gate) = self.gate(|state| state.session_gates.get(&document_id).cloned()) {
            gate.notified().await;
        }
        self.enter(Op::ListSessions)?;
        Ok(self.sessions_of(document_id))
    }

    async fn create_session(&self, document_id: DocumentId, name: &str) -> Result<ChatSession> {
        self.enter(Op::CreateSession)?;
        let mut state = self.state.lock();
        Ok(Self::new_session(&mut state, document_id, name))
    }

    async fn fetch_history(&self, session_id: &str) -> Result<Vec<Message>> {
        self.enter(Op::History)?;
        Ok(self
            .state
            .lock()
            .histories
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    fn stream_reply(&self, session_id: &str, user_text: &str) -> ReplyStream {
        if let Err(err) = self.enter(Op::Reply) {
            return stream::once(async move { Err(err) }).boxed();
        }
        let mut state = self.state.lock();
        state
            .prompts
            .push((session_id.to_string(), user_text.to_string()));
        match state.replies.pop_front() {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => stream::empty().boxed(),
        }
    }
}

/// Decoder for the `pdf(n)` fixtures. Counts rasterizations.
#[derive(Default)]
pub struct FakeDecoder {
    pub rasterized: Arc<AtomicUsize>,
}

impl FakeDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rasterized(&self) -> usize {
        self.rasterized.load(Ordering::SeqCst)
    }
}

impl DocumentDecoder for FakeDecoder {
    fn decode(&self, bytes: Vec<u8>) -> Result<Box<dyn DecodedDocument>> {
        let text = String::from_utf8_lossy(&bytes);
        if !text.starts_with("%PDF-") || text.contains("corrupt") {
            return Err(Error::Decode("bad xref table".into()));
        }
        let pages = text
            .split_whitespace()
            .find_map(|token| token.strip_prefix("pages="))
            .and_then(|count| count.parse().ok())
            .unwrap_or(1);
        let page_size = text
            .split_whitespace()
            .find_map(|token| token.strip_prefix("size="))
            .and_then(|size| size.split_once('x'))
            .and_then(|(w, h)| Some(PageSize {
                width: w.parse().ok()?,
                height: h.parse().ok()?,
            }))
            .unwrap_or(LETTER);

        Ok(Box::new(FakeDocument {
            pages,
            page_size,
            rasterized: self.rasterized.clone(),
        }))
    }
}

struct FakeDocument {
    pages: u32,
    page_size: PageSize,
    rasterized: Arc<AtomicUsize>,
}

impl DecodedDocument for FakeDocument {
    fn page_count(&self) -> u32 {
        self.pages
    }

    fn page_size(&self, page_number: u32) -> Result<PageSize> {
        if page_number == 0 || page_number > self.pages {
            return Err(Error::Decode(format!("no page {}", page_number)));
        }
        Ok(self.page_size)
    }

    fn rasterize(&self, _page_number: u32, _scale: f32, target: &mut RgbaImage) -> Result<()> {
        self.rasterized.fetch_add(1, Ordering::SeqCst);
        target.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        Ok(())
    }
}

pub fn options() -> WorkspaceOptions {
    WorkspaceOptions {
        render: RenderSettings::default(),
        max_upload_bytes: 1024 * 1024,
    }
}

pub fn workspace(api: &Arc<FakeNotesApi>, decoder: &Arc<FakeDecoder>) -> Arc<Workspace> {
    Arc::new(Workspace::new(api.clone(), decoder.clone(), options()))
}

/// Let every other branch of a `join!` run until it blocks.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
