use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::notes_client::NotesApi;
use crate::error::Result;
use crate::models::{ChatSession, ChatSnapshot, Document, Message, SendOutcome};

pub fn session_name(filename: &str) -> String {
    format!("Chat - {}", filename)
}

pub fn greeting(filename: &str) -> String {
    format!("Ready to chat about {}!", filename)
}

struct ChatState {
    epoch: u64,
    session: Option<ChatSession>,
    transcript: Vec<Message>,
    streaming: bool,
    cancel: CancellationToken,
}

impl ChatState {
    fn reset(&mut self) -> u64 {
        self.epoch += 1;
        self.cancel.cancel();
        self.cancel = CancellationToken::new();
        self.session = None;
        self.transcript.clear();
        self.streaming = false;
        self.epoch
    }
}

pub struct ChatSessionManager {
    api: Arc<dyn NotesApi>,
    state: Mutex<ChatState>,
}

impl ChatSessionManager {
    pub fn new(api: Arc<dyn NotesApi>) -> Self {
        Self {
            api,
            state: Mutex::new(ChatState {
                epoch: 0,
                session: None,
                transcript: Vec::new(),
                streaming: false,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Drop the session and transcript, cancelling any reply in flight.
    pub fn clear(&self) {
        self.state.lock().reset();
        debug!("chat session cleared");
    }

    /// Adopt the newest existing session for `document`, or create one.
    ///
    /// Returns `Ok(None)` when a later `resolve`/`clear` superseded this one,
    /// whether it succeeded or failed.
    pub async fn resolve(&self, document: &Document) -> Result<Option<ChatSession>> {
        let epoch = self.state.lock().reset();

        let resolved = self.fetch_or_create(document).await;

        let mut state = self.state.lock();
        if state.epoch != epoch {
            debug!(document_id = document.id, "discarding superseded session resolution");
            return Ok(None);
        }
        let (session, transcript) = resolved?;
        info!(
            document_id = document.id,
            session_id = %session.id,
            messages = transcript.len(),
            "chat session resolved"
        );
        state.session = Some(session.clone());
        state.transcript = transcript;
        Ok(Some(session))
    }

    async fn fetch_or_create(&self, document: &Document) -> Result<(ChatSession, Vec<Message>)> {
        let sessions = self.api.list_sessions(document.id).await?;

        if let Some(session) = sessions.into_iter().next() {
            let history = self.api.fetch_history(&session.id).await?;
            return Ok((session, history));
        }

        let session = self
            .api
            .create_session(document.id, &session_name(&document.filename))
            .await?;
        // local only, the backend never stores it
        let seeded = vec![Message::assistant(&greeting(&document.filename))];
        Ok((session, seeded))
    }

    /// Send `text` and stream the reply into the transcript.
    ///
    /// The user message and an empty assistant message are appended first;
    /// fragments are concatenated onto the latter. A failed stream keeps the
    /// partial reply and returns the error. Nothing is retried.
    pub async fn send(&self, session_id: Option<&str>, text: &str) -> Result<SendOutcome> {
        let Some(session_id) = session_id else {
            return Ok(SendOutcome::Ignored);
        };
        if text.trim().is_empty() {
            return Ok(SendOutcome::Ignored);
        }

        let (epoch, cancel, reply_index) = {
            let mut state = self.state.lock();
            let active = state.session.as_ref().is_some_and(|s| s.id == session_id);
            if !active || state.streaming {
                debug!(session_id, "ignoring send");
                return Ok(SendOutcome::Ignored);
            }
            state.transcript.push(Message::user(text));
            state.transcript.push(Message::assistant(""));
            state.streaming = true;
            (state.epoch, state.cancel.clone(), state.transcript.len() - 1)
        };

        debug!(session_id, "streaming reply");
        let mut reply = self.api.stream_reply(session_id, text);
        let mut fragments = 0usize;

        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(SendOutcome::Cancelled),
                next = reply.next() => next,
            };

            match next {
                None => break Ok(SendOutcome::Completed),
                Some(Ok(fragment)) => {
                    if !self.append(epoch, reply_index, &fragment) {
                        break Ok(SendOutcome::Cancelled);
                    }
                    fragments += 1;
                }
                Some(Err(err)) => break Err(err),
            }
        };
        drop(reply);

        let current = {
            let mut state = self.state.lock();
            let current = state.epoch == epoch;
            if current {
                state.streaming = false;
            }
            current
        };

        match outcome {
            Ok(outcome) => {
                debug!(session_id, fragments, ?outcome, "reply finished");
                Ok(outcome)
            }
            Err(err) if current => {
                warn!(session_id, fragments, error = %err, "reply stream failed");
                Err(err)
            }
            Err(err) => {
                debug!(session_id, error = %err, "ignoring failure of superseded reply");
                Ok(SendOutcome::Cancelled)
            }
        }
    }

    fn append(&self, epoch: u64, index: usize, fragment: &str) -> bool {
        let mut state = self.state.lock();
        if state.epoch != epoch {
            return false;
        }
        if let Some(message) = state.transcript.get_mut(index) {
            message.content.push_str(fragment);
        }
        true
    }

    pub fn session_id(&self) -> Option<String> {
        self.state.lock().session.as_ref().map(|s| s.id.clone())
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        let state = self.state.lock();
        ChatSnapshot {
            session: state.session.clone(),
            transcript: state.transcript.clone(),
            is_streaming: state.streaming,
        }
    }
}
