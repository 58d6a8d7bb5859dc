use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::auth_service::AuthStore;
use super::config_service::EffectiveConfig;
use crate::error::{Error, Result};
use crate::models::{ChatSession, Document, DocumentId, Message};

/// Assistant reply fragments in arrival order. At most one `Err`, after which
/// the stream ends. Dropping it aborts the underlying connection.
pub type ReplyStream = BoxStream<'static, Result<String>>;

/// Document and transcript operations the workspace depends on.
#[async_trait]
pub trait NotesApi: Send + Sync {
    /// All documents, in server order.
    async fn list(&self) -> Result<Vec<Document>>;

    /// Upload a file. Callers validate type and size beforehand.
    async fn upload(&self, file_bytes: Vec<u8>, filename: &str) -> Result<Document>;

    async fn rename(&self, id: DocumentId, new_name: &str) -> Result<()>;

    async fn remove(&self, id: DocumentId) -> Result<()>;

    /// Raw document bytes.
    async fn fetch_content_bytes(&self, id: DocumentId) -> Result<Vec<u8>>;

    /// Sessions for a document, most recent first.
    async fn list_sessions(&self, document_id: DocumentId) -> Result<Vec<ChatSession>>;

    async fn create_session(&self, document_id: DocumentId, name: &str) -> Result<ChatSession>;

    /// Messages of a session, oldest first.
    async fn fetch_history(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Cold stream of reply fragments; nothing is sent until it is first polled.
    fn stream_reply(&self, session_id: &str, user_text: &str) -> ReplyStream;
}

#[derive(Debug, Serialize)]
struct RenameRequest<'a> {
    new_filename: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateSessionRequest<'a> {
    pdf_id: DocumentId,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    doc_id: DocumentId,
    filename: String,
}

/// HTTP implementation of [`NotesApi`].
#[derive(Clone)]
pub struct NotesClient {
    client: Client,
    base_url: Url,
    auth: AuthStore,
}

impl NotesClient {
    pub fn new(base_url: Url, timeout: Duration, auth: AuthStore) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    pub fn from_config(config: &EffectiveConfig, auth: AuthStore) -> Result<Self> {
        Self::new(config.base_url.clone(), config.request_timeout, auth)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Attach the credential, send, and turn non-success statuses into errors.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let credential = self.auth.bearer()?;
        let response = request.bearer_auth(credential.token()).send().await?;
        check_status(response).await
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        debug!(%url, "GET");
        let response = self.send(self.client.get(url)).await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response.text().await.unwrap_or_default();
    warn!(%status, "request failed");
    Err(Error::from_status(status, error_text))
}

#[async_trait]
impl NotesApi for NotesClient {
    async fn list(&self) -> Result<Vec<Document>> {
        self.get_json("notes/").await
    }

    async fn upload(&self, file_bytes: Vec<u8>, filename: &str) -> Result<Document> {
        let url = self.endpoint("notes/upload_notes")?;
        let part = Part::bytes(file_bytes)
            .file_name(filename.to_string())
            .mime_str("application/pdf")?;
        let form = Form::new().part("file", part);

        debug!(%url, filename, "POST upload");
        let response = self.send(self.client.post(url).multipart(form)).await?;
        let body = response.bytes().await?;
        let uploaded: UploadResponse = serde_json::from_slice(&body)?;

        Ok(Document {
            id: uploaded.doc_id,
            filename: uploaded.filename,
            created_at: Utc::now(),
        })
    }

    async fn rename(&self, id: DocumentId, new_name: &str) -> Result<()> {
        let url = self.endpoint(&format!("notes/{}", id))?;
        debug!(%url, "PUT rename");
        self.send(self.client.put(url).json(&RenameRequest {
            new_filename: new_name,
        }))
        .await?;
        Ok(())
    }

    async fn remove(&self, id: DocumentId) -> Result<()> {
        let url = self.endpoint(&format!("notes/{}", id))?;
        debug!(%url, "DELETE");
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn fetch_content_bytes(&self, id: DocumentId) -> Result<Vec<u8>> {
        let url = self.endpoint(&format!("notes/{}/content", id))?;
        debug!(%url, "GET content");
        let response = self.send(self.client.get(url)).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn list_sessions(&self, document_id: DocumentId) -> Result<Vec<ChatSession>> {
        self.get_json(&format!("notes/sessions/{}", document_id)).await
    }

    async fn create_session(&self, document_id: DocumentId, name: &str) -> Result<ChatSession> {
        let url = self.endpoint("notes/sessions")?;
        debug!(%url, document_id, "POST session");
        let response = self
            .send(self.client.post(url).json(&CreateSessionRequest {
                pdf_id: document_id,
                name,
            }))
            .await?;
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn fetch_history(&self, session_id: &str) -> Result<Vec<Message>> {
        self.get_json(&format!(
            "notes/history/{}",
            urlencoding::encode(session_id)
        ))
        .await
    }

    fn stream_reply(&self, session_id: &str, user_text: &str) -> ReplyStream {
        let client = self.client.clone();
        let auth = self.auth.clone();
        let url = self.endpoint(&format!("notes/chat/{}", urlencoding::encode(session_id)));
        let user_text = user_text.to_string();

        let open = async move {
            let mut url = url?;
            url.query_pairs_mut().append_pair("user_prompt", &user_text);
            debug!(url = %url.path(), "POST chat stream");

            let credential = auth.bearer()?;
            let response = client
                .post(url)
                .bearer_auth(credential.token())
                .send()
                .await?;
            let response = check_status(response).await?;
            Ok::<_, Error>(decode_utf8_chunks(response.bytes_stream()))
        };

        stream::once(open).try_flatten().boxed()
    }
}

/// Adapt a reply stream to chunk/error callbacks.
///
/// `on_chunk` runs synchronously for every fragment in arrival order;
/// `on_error` runs at most once and ends delivery.
pub async fn forward_reply<C, E>(mut reply: ReplyStream, mut on_chunk: C, on_error: E)
where
    C: FnMut(&str),
    E: FnOnce(Error),
{
    while let Some(item) = reply.next().await {
        match item {
            Ok(fragment) => on_chunk(&fragment),
            Err(err) => {
                on_error(err);
                return;
            }
        }
    }
}

/// Incremental UTF-8 decoder that holds back a character split across chunks.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut decoded = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    decoded.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // incomplete sequence at the end; wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(bad) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }

        decoded
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

/// Decode a byte stream into non-empty text fragments.
pub fn decode_utf8_chunks<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let bytes: Pin<Box<S>> = Box::pin(bytes);

    stream::unfold(
        Some((bytes, Utf8ChunkDecoder::default())),
        |state| async move {
            let (mut bytes, mut decoder) = state?;
            loop {
                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        let text = decoder.push(chunk.as_ref());
                        if !text.is_empty() {
                            return Some((Ok(text), Some((bytes, decoder))));
                        }
                    }
                    Some(Err(err)) => {
                        return Some((Err(Error::Stream(err.to_string())), None));
                    }
                    None => return decoder.finish().map(|tail| (Ok(tail), None)),
                }
            }
        },
    )
}
