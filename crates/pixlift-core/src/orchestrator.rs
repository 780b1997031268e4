//! Request/response orchestration: inbound update in, exactly one reply out.

use std::{path::PathBuf, sync::Arc};

use tokio::sync::Semaphore;

use crate::{
    domain::{ChatId, MessageRef},
    enhance::{EnhanceBackend, EnhanceError, EnhanceJob, Enhanced},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, Command, IncomingUpdate, PhotoMessage},
    },
    scratch::ScopedImageFiles,
};

pub const WELCOME_TEXT: &str = "Привет! Пришли мне фото, и я улучшу его качество с помощью ИИ 🤖.";
pub const FAILURE_TEXT: &str = "Не удалось улучшить изображение 😢";

const RESULT_FILE_NAME: &str = "enhanced.jpg";

/// What goes back to the user for one request.
enum Reply {
    Text(String),
    PhotoUrl(String),
    PhotoBytes(Vec<u8>),
}

pub fn failure_text(err: &EnhanceError) -> String {
    match err {
        EnhanceError::TooLarge { limit, .. } => format!(
            "Фото слишком большое 😢 Максимум {limit} пикселей, пришли изображение поменьше."
        ),
        _ => FAILURE_TEXT.to_string(),
    }
}

pub struct Orchestrator {
    messenger: Arc<dyn MessagingPort>,
    backend: Arc<dyn EnhanceBackend>,
    temp_dir: PathBuf,
    jobs: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        backend: Arc<dyn EnhanceBackend>,
        temp_dir: PathBuf,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            messenger,
            backend,
            temp_dir,
            jobs: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
        }
    }

    pub async fn handle(&self, update: IncomingUpdate) {
        match update {
            IncomingUpdate::Command(cmd) => self.handle_command(cmd).await,
            IncomingUpdate::Photo(msg) => self.handle_photo(&msg).await,
        }
    }

    async fn handle_command(&self, cmd: Command) {
        match cmd.name.as_str() {
            "start" | "help" => self.handle_start(cmd.chat_id).await,
            other => {
                tracing::debug!(chat_id = cmd.chat_id.0, command = other, "ignoring command");
            }
        }
    }

    pub async fn handle_start(&self, chat_id: ChatId) {
        self.deliver(chat_id, Reply::Text(WELCOME_TEXT.to_string()))
            .await;
    }

    /// Download the largest variant, enhance it, reply once. Temp files are
    /// gone by the time this returns.
    pub async fn handle_photo(&self, msg: &PhotoMessage) {
        let chat_id = msg.chat_id;
        let user_id = msg.user_id.map(|u| u.0);
        let backend = self.backend.kind().as_str();
        tracing::info!(chat_id = chat_id.0, user_id, backend, "photo received");

        if let Err(e) = self
            .messenger
            .send_chat_action(chat_id, ChatAction::UploadPhoto)
            .await
        {
            tracing::debug!(chat_id = chat_id.0, "chat action failed: {e}");
        }

        let reply = match self.enhance_photo(msg).await {
            Ok(reply) => {
                tracing::info!(chat_id = chat_id.0, backend, "photo enhanced");
                reply
            }
            Err(err) => {
                match &err {
                    EnhanceError::Decode(_) | EnhanceError::TooLarge { .. } => {
                        tracing::info!(chat_id = chat_id.0, backend, "rejected input: {err}")
                    }
                    _ => tracing::warn!(chat_id = chat_id.0, backend, "enhancement failed: {err}"),
                }
                Reply::Text(failure_text(&err))
            }
        };

        self.deliver(chat_id, reply).await;
    }

    async fn enhance_photo(&self, msg: &PhotoMessage) -> Result<Reply, EnhanceError> {
        let photo = msg
            .largest()
            .ok_or_else(|| EnhanceError::Download("message carries no photo".to_string()))?;

        let permit = Arc::clone(&self.jobs)
            .acquire_owned()
            .await
            .map_err(|_| EnhanceError::Backend("job queue closed".to_string()))?;

        let files = ScopedImageFiles::acquire(&self.temp_dir)
            .map_err(|e| EnhanceError::Backend(format!("temp file: {e}")))?;

        let bytes = self
            .messenger
            .download_file(&photo.file_id, files.input())
            .await
            .map_err(|e| EnhanceError::Download(e.to_string()))?;
        tracing::debug!(
            chat_id = msg.chat_id.0,
            bytes,
            width = photo.width,
            height = photo.height,
            "photo downloaded"
        );

        // The task owns the permit and the files: a panicking backend becomes a
        // failed reply, and a dropped handler cannot delete paths the backend
        // is still using.
        let backend = Arc::clone(&self.backend);
        let chat_id = msg.chat_id.0;
        tokio::spawn(async move {
            let _permit = permit;
            let reply = run_backend(backend.as_ref(), &files).await;
            if let Err(e) = files.release() {
                tracing::warn!(chat_id, "temp file cleanup failed: {e}");
            }
            reply
        })
        .await
        .unwrap_or_else(|e| Err(EnhanceError::Backend(format!("backend task failed: {e}"))))
    }

    async fn deliver(&self, chat_id: ChatId, reply: Reply) {
        let sent = match reply {
            Reply::Text(text) => self.messenger.send_text(chat_id, &text).await,
            Reply::PhotoUrl(url) => match self.messenger.send_photo_url(chat_id, &url).await {
                Ok(sent) => Ok(sent),
                Err(e) => {
                    tracing::warn!(chat_id = chat_id.0, "photo url rejected: {e}");
                    self.messenger.send_text(chat_id, FAILURE_TEXT).await
                }
            },
            Reply::PhotoBytes(bytes) => self.deliver_file(chat_id, bytes).await,
        };
        if let Err(e) = sent {
            tracing::error!(chat_id = chat_id.0, "failed to send reply: {e}");
        }
    }

    /// Photo first, then the same bytes as a document (no dimension limits),
    /// then the failure text.
    async fn deliver_file(&self, chat_id: ChatId, bytes: Vec<u8>) -> crate::Result<MessageRef> {
        match self
            .messenger
            .send_photo_bytes(chat_id, bytes.clone(), RESULT_FILE_NAME)
            .await
        {
            Ok(sent) => return Ok(sent),
            Err(e) => tracing::warn!(
                chat_id = chat_id.0,
                bytes = bytes.len(),
                "photo upload rejected, retrying as document: {e}"
            ),
        }

        match self
            .messenger
            .send_document_bytes(chat_id, bytes, RESULT_FILE_NAME)
            .await
        {
            Ok(sent) => Ok(sent),
            Err(e) => {
                tracing::warn!(chat_id = chat_id.0, "document upload rejected: {e}");
                self.messenger.send_text(chat_id, FAILURE_TEXT).await
            }
        }
    }
}

async fn run_backend(
    backend: &dyn EnhanceBackend,
    files: &ScopedImageFiles,
) -> Result<Reply, EnhanceError> {
    let outcome = backend
        .enhance(EnhanceJob {
            input: files.input(),
            output: files.output(),
        })
        .await?;

    match outcome {
        Enhanced::Url(url) => Ok(Reply::PhotoUrl(url)),
        Enhanced::File(path) => {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| EnhanceError::Backend(format!("reading result: {e}")))?;
            if bytes.is_empty() {
                return Err(EnhanceError::NoResult);
            }
            Ok(Reply::PhotoBytes(bytes))
        }
    }
}
