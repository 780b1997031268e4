use std::sync::Arc;

use teloxide::prelude::*;

use pixlift_core::{
    domain::{ChatId, UserId},
    messaging::types::{Command, IncomingUpdate},
};

use crate::router::AppState;

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let chat_id = ChatId(msg.chat.id.0);
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));

    let Some(cmd) = Command::parse(chat_id, user_id, text) else {
        return Ok(());
    };
    tracing::debug!(chat_id = chat_id.0, command = %cmd.name, "command received");

    state.orchestrator.handle(IncomingUpdate::Command(cmd)).await;
    Ok(())
}
