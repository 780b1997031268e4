use std::sync::Arc;

use pixlift_core::{
    config::{BackendConfig, Config},
    enhance::EnhanceBackend,
    Error,
};
use pixlift_deepai::DeepaiClient;
use pixlift_local::LocalBackend;

fn build_backend(cfg: &Config) -> Result<Arc<dyn EnhanceBackend>, Error> {
    match &cfg.backend {
        BackendConfig::Deepai(deepai) => Ok(Arc::new(DeepaiClient::new(deepai)?)),
        BackendConfig::Local(local) => {
            let runtime = pixlift_local::default_runtime().ok_or_else(|| {
                Error::Config(
                    "ENHANCE_BACKEND=local needs a build with the `candle` feature".to_string(),
                )
            })?;
            Ok(Arc::new(LocalBackend::new(local.clone(), runtime)))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pixlift_core::logging::init("pixlift")?;

    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            tracing::error!("{e}");
            return Err(e.into());
        }
    };
    let backend = build_backend(&cfg)?;

    pixlift_telegram::router::run_polling(cfg, backend)
        .await
        .map_err(|e| anyhow::anyhow!("telegram bot failed: {e}"))?;

    Ok(())
}
