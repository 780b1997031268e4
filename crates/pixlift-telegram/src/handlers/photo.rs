use std::{sync::Arc, time::Duration};

use teloxide::prelude::*;

use pixlift_core::{
    domain::{ChatId, UserId},
    messaging::types::{IncomingUpdate, PhotoMessage, PhotoSize},
};

use crate::router::AppState;

fn rate_limited_text(retry_after: Duration) -> String {
    let secs = retry_after.as_secs_f64().ceil().max(1.0);
    format!("⏳ Слишком много фото. Подожди {secs:.0} сек. и попробуй снова.")
}

fn photo_sizes(photos: &[teloxide::types::PhotoSize]) -> Vec<PhotoSize> {
    photos
        .iter()
        .map(|p| PhotoSize {
            file_id: p.file.id.clone(),
            width: p.width,
            height: p.height,
            file_size: Some(p.file.size),
        })
        .collect()
}

pub async fn handle_photo(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(photos) = msg.photo() else {
        return Ok(());
    };

    let chat_id = ChatId(msg.chat.id.0);
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));

    if let Some(uid) = user_id {
        let checked = { state.rate_limiter.lock().await.check(uid) };
        if let Err(retry_after) = checked {
            tracing::info!(
                chat_id = chat_id.0,
                user_id = uid.0,
                retry_after_secs = retry_after.as_secs_f64(),
                "rate limited"
            );
            let _ = bot
                .send_message(msg.chat.id, rate_limited_text(retry_after))
                .await;
            return Ok(());
        }
    }

    let update = IncomingUpdate::Photo(PhotoMessage {
        chat_id,
        user_id,
        sizes: photo_sizes(photos),
    });
    state.orchestrator.handle(update).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn photo_sizes_keep_telegram_order_and_metadata() {
        let msg = crate::handlers::tests::message(crate::handlers::tests::photo_json());
        let sizes = photo_sizes(msg.photo().unwrap());

        assert_eq!(sizes.len(), 2);
        assert_eq!(
            sizes[1],
            PhotoSize {
                file_id: "large".to_string(),
                width: 1280,
                height: 853,
                file_size: Some(98000),
            }
        );
        assert_eq!(sizes[0].file_id, "small");
    }

    #[test]
    fn rate_limited_text_rounds_up_seconds() {
        assert!(rate_limited_text(Duration::from_millis(1200)).contains(" 2 сек."));
        assert!(rate_limited_text(Duration::from_millis(10)).contains(" 1 сек."));
        assert!(rate_limited_text(Duration::from_secs(30)).contains(" 30 сек."));
    }
}
