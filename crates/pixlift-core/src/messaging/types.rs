use crate::domain::{ChatId, UserId};

/// Messenger-agnostic incoming update model.
///
/// Telegram-specific fields live in the Telegram adapter.
#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Command(Command),
    Photo(PhotoMessage),
}

#[derive(Clone, Debug)]
pub struct Command {
    pub chat_id: ChatId,
    pub user_id: Option<UserId>,
    pub name: String,
}

impl Command {
    /// Parse `/cmd@botname ...`. Arguments are ignored. Returns `None` for
    /// non-command text.
    pub fn parse(chat_id: ChatId, user_id: Option<UserId>, text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;

        let first = rest.split(char::is_whitespace).next().unwrap_or("");
        let name = first.split('@').next().unwrap_or("").to_lowercase();
        if name.is_empty() {
            return None;
        }

        Some(Self {
            chat_id,
            user_id,
            name,
        })
    }
}

/// One resolution variant of an uploaded photo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
    pub file_size: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct PhotoMessage {
    pub chat_id: ChatId,
    pub user_id: Option<UserId>,
    /// Ordered smallest to largest, as Telegram delivers them.
    pub sizes: Vec<PhotoSize>,
}

impl PhotoMessage {
    /// The highest-resolution variant (the last one).
    pub fn largest(&self) -> Option<&PhotoSize> {
        self.sizes.last()
    }
}

/// Outgoing "chat action" shown while a request is in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    UploadPhoto,
}
