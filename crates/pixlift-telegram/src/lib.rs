//! Telegram adapter (teloxide).
//!
//! This crate implements the `pixlift-core` MessagingPort over Telegram Bot API
//! and wires the update dispatcher to the orchestrator.

use std::path::Path;

use async_trait::async_trait;

use teloxide::{net::Download, prelude::*, types::InputFile};

use tokio::{io::AsyncWriteExt, time::sleep};

pub mod handlers;
pub mod router;

use pixlift_core::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{port::MessagingPort, types::ChatAction},
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    fn msg_ref(chat_id: ChatId, msg: &Message) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        }
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        tracing::debug!(?d, "telegram asked us to back off");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), text.to_string())
            })
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn send_photo_url(&self, chat_id: ChatId, url: &str) -> Result<MessageRef> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| Error::External(format!("invalid photo url `{url}`: {e}")))?;
        let photo = InputFile::url(url);

        let msg = self
            .with_retry(|| self.bot.send_photo(Self::tg_chat(chat_id), photo.clone()))
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn send_photo_bytes(
        &self,
        chat_id: ChatId,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageRef> {
        let photo = InputFile::memory(bytes).file_name(file_name.to_string());

        let msg = self
            .with_retry(|| self.bot.send_photo(Self::tg_chat(chat_id), photo.clone()))
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn send_document_bytes(
        &self,
        chat_id: ChatId,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<MessageRef> {
        let doc = InputFile::memory(bytes).file_name(file_name.to_string());

        let msg = self
            .with_retry(|| self.bot.send_document(Self::tg_chat(chat_id), doc.clone()))
            .await?;
        Ok(Self::msg_ref(chat_id, &msg))
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        let tg_action = match action {
            ChatAction::UploadPhoto => teloxide::types::ChatAction::UploadPhoto,
        };
        self.with_retry(|| self.bot.send_chat_action(Self::tg_chat(chat_id), tg_action))
            .await?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str, dst: &Path) -> Result<u64> {
        let file = self
            .bot
            .get_file(file_id.to_string())
            .await
            .map_err(Self::map_err)?;

        let mut out = tokio::fs::File::create(dst).await?;
        self.bot
            .download_file(&file.path, &mut out)
            .await
            .map_err(|e| Error::External(format!("telegram download error: {e}")))?;
        out.flush().await?;

        Ok(out.metadata().await?.len())
    }
}
