use std::{collections::HashMap, sync::Arc};

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::{Mutex, OwnedMutexGuard};

use pixlift_core::{
    config::Config, enhance::EnhanceBackend, messaging::port::MessagingPort,
    orchestrator::Orchestrator, security::RateLimiter,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub chat_locks: Arc<ChatLocks>,
}

/// One photo at a time per chat. Entries nobody holds or waits on are dropped
/// on the next lock call, so the map tracks only active chats.
#[derive(Default)]
pub struct ChatLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl ChatLocks {
    pub async fn lock_chat(&self, chat_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(chat_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub async fn run_polling(
    cfg: Arc<Config>,
    backend: Arc<dyn EnhanceBackend>,
) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    // Fails fast on a bad token instead of on the first photo.
    let me = bot.get_me().await?;
    tracing::info!(
        username = %me.username(),
        backend = backend.kind().as_str(),
        temp_dir = %cfg.temp_dir.display(),
        allowed_users = cfg.telegram_allowed_users.len(),
        "pixlift started"
    );

    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        messenger,
        backend,
        cfg.temp_dir.clone(),
        cfg.max_concurrent_jobs,
    ));

    let state = Arc::new(AppState {
        cfg: cfg.clone(),
        orchestrator,
        rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
            cfg.rate_limit_enabled,
            cfg.rate_limit_requests,
            cfg.rate_limit_window,
        ))),
        chat_locks: Arc::new(ChatLocks::default()),
    });

    let handler =
        dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|_upd| async move {
            tracing::debug!("unhandled update");
        })
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    tracing::info!("pixlift stopped");
    Ok(())
}
