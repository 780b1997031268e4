//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - checks the allow-list (and, for photos, the rate limit)
//! - converts the teloxide message into a core `IncomingUpdate`
//! - hands it to the orchestrator, which owns the reply

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use pixlift_core::{domain::UserId, security::is_authorized};

use crate::router::AppState;

mod commands;
mod photo;

/// What to do with an inbound message.
#[derive(Debug, PartialEq, Eq)]
enum Route {
    Unauthorized,
    Command,
    Photo,
    Ignore,
}

fn route(msg: &Message, allowed_users: &[i64]) -> Route {
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));
    if !is_authorized(user_id, allowed_users) {
        return Route::Unauthorized;
    }
    if let Some(text) = msg.text() {
        return if text.starts_with('/') {
            Route::Command
        } else {
            Route::Ignore
        };
    }
    if msg.photo().is_some() {
        return Route::Photo;
    }
    Route::Ignore
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;

    match route(&msg, &state.cfg.telegram_allowed_users) {
        Route::Unauthorized => {
            let user_id = msg.from().map(|u| u.id.0);
            tracing::info!(chat_id, user_id, "unauthorized message");
            let _ = bot
                .send_message(msg.chat.id, "Этот бот приватный. Обратись к владельцу за доступом.")
                .await;
            Ok(())
        }
        Route::Command => commands::handle_command(msg, state).await,
        Route::Photo => {
            let _guard = state.chat_locks.lock_chat(chat_id).await;
            photo::handle_photo(bot, msg, state).await
        }
        Route::Ignore => {
            tracing::debug!(chat_id, "ignoring message");
            Ok(())
        }
    }
}
