use std::path::Path;

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::types::ChatAction,
    Result,
};

/// Messenger port.
///
/// Telegram is the only implementation; the orchestrator only ever talks to
/// this trait so it can be exercised against a recording stub.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;

    /// Reply with a photo the messenger fetches from a public URL.
    async fn send_photo_url(&self, chat_id: ChatId, url: &str) -> Result<MessageRef>;

    /// Reply with a photo uploaded from raw bytes.
    async fn send_photo_bytes(
        &self,
        chat_id: ChatId,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageRef>;

    /// Upload raw bytes as a document. No size or dimension limits beyond the
    /// messenger's file size cap, so it is the fallback for rejected photos.
    async fn send_document_bytes(
        &self,
        chat_id: ChatId,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageRef>;

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()>;

    /// Download a previously received file into `dst` (overwriting it).
    async fn download_file(&self, file_id: &str, dst: &Path) -> Result<u64>;
}
