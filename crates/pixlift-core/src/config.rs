use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

pub const DEFAULT_DEEPAI_ENDPOINT: &str = "https://api.deepai.org/api/torch-srgan";

/// Which enhancement backend this process runs with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Remote super-resolution HTTP API.
    Deepai,
    /// Local upscaler + face restorer models.
    Local,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Deepai => "deepai",
            BackendKind::Local => "local",
        }
    }
}

#[derive(Clone, Debug)]
pub struct DeepaiConfig {
    pub api_key: String,
    pub endpoint: String,
    pub timeout: Duration,
}

/// A pretrained weight file: where it comes from and where it lives locally.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WeightSpec {
    pub url: String,
    pub file_name: String,
}

#[derive(Clone, Debug)]
pub struct LocalModelConfig {
    pub model_dir: PathBuf,
    pub upscaler: WeightSpec,
    pub face_restorer: WeightSpec,
    pub upscale_factor: u32,
    /// `None` disables the input size check.
    pub max_input_pixels: Option<u64>,
    /// Share of the restored frame in the final blend; `0` skips restoration.
    pub face_restore_weight: f32,
    /// Restoration is skipped when the upscaled frame's longer side exceeds this.
    pub face_restore_max_side: u32,
}

#[derive(Clone, Debug)]
pub enum BackendConfig {
    Deepai(DeepaiConfig),
    Local(LocalModelConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Deepai(_) => BackendKind::Deepai,
            BackendConfig::Local(_) => BackendKind::Local,
        }
    }
}

/// Typed configuration, validated eagerly at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub telegram_allowed_users: Vec<i64>,

    // Enhancement
    pub backend: BackendConfig,
    pub temp_dir: PathBuf,
    pub max_concurrent_jobs: usize,

    // Rate limiting
    pub rate_limit_enabled: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    /// Load from the process environment (after `.env`, if present) and make
    /// sure the temp dir exists.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let cfg = Self::from_lookup(|key| env::var(key).ok())?;
        fs::create_dir_all(&cfg.temp_dir)?;
        Ok(cfg)
    }

    /// Build a config from an arbitrary key lookup. No filesystem side effects.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN")
            .or_else(|| get("BOT_TOKEN"))
            .ok_or_else(|| {
                Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
            })?;
        let telegram_allowed_users = parse_csv_i64(get("TELEGRAM_ALLOWED_USERS"));

        let kind = match get("ENHANCE_BACKEND")
            .map(|s| s.trim().to_lowercase())
            .as_deref()
        {
            None | Some("deepai") | Some("api") => BackendKind::Deepai,
            Some("local") => BackendKind::Local,
            Some(other) => {
                return Err(Error::Config(format!(
                    "ENHANCE_BACKEND must be `deepai` or `local`, got `{other}`"
                )))
            }
        };

        let backend = match kind {
            BackendKind::Deepai => {
                let api_key = get("DEEPAI_API_KEY").ok_or_else(|| {
                    Error::Config(
                        "DEEPAI_API_KEY environment variable is required for the deepai backend"
                            .to_string(),
                    )
                })?;
                BackendConfig::Deepai(DeepaiConfig {
                    api_key,
                    endpoint: get("DEEPAI_ENDPOINT")
                        .unwrap_or_else(|| DEFAULT_DEEPAI_ENDPOINT.to_string()),
                    timeout: Duration::from_secs(
                        parse_num(&get, "ENHANCE_TIMEOUT_SECS")?.unwrap_or(120),
                    ),
                })
            }
            BackendKind::Local => {
                let upscale_factor: u32 = parse_num(&get, "UPSCALE_FACTOR")?.unwrap_or(4);
                if !(1..=8).contains(&upscale_factor) {
                    return Err(Error::Config(format!(
                        "UPSCALE_FACTOR must be between 1 and 8, got {upscale_factor}"
                    )));
                }
                let max_input_pixels = match parse_num::<u64>(&get, "MAX_INPUT_PIXELS")? {
                    Some(0) => None,
                    Some(n) => Some(n),
                    None => Some(4_000_000),
                };
                let face_restore_weight: f32 =
                    parse_num(&get, "FACE_RESTORE_WEIGHT")?.unwrap_or(0.5);
                if !(0.0..=1.0).contains(&face_restore_weight) {
                    return Err(Error::Config(format!(
                        "FACE_RESTORE_WEIGHT must be between 0 and 1, got {face_restore_weight}"
                    )));
                }

                BackendConfig::Local(LocalModelConfig {
                    model_dir: PathBuf::from(get("MODEL_DIR").unwrap_or("weights".to_string())),
                    upscaler: WeightSpec {
                        url: require_url(&get, "UPSCALER_MODEL_URL")?,
                        file_name: get("UPSCALER_MODEL_FILE")
                            .unwrap_or("realesrgan_x4plus.onnx".to_string()),
                    },
                    face_restorer: WeightSpec {
                        url: require_url(&get, "FACE_RESTORER_MODEL_URL")?,
                        file_name: get("FACE_RESTORER_MODEL_FILE")
                            .unwrap_or("gfpgan_v1.4.onnx".to_string()),
                    },
                    upscale_factor,
                    max_input_pixels,
                    face_restore_weight,
                    face_restore_max_side: parse_num(&get, "FACE_RESTORE_MAX_SIDE")?
                        .unwrap_or(1024),
                })
            }
        };

        let temp_dir = PathBuf::from(get("TEMP_DIR").unwrap_or("/tmp/pixlift".to_string()));
        let max_concurrent_jobs = parse_num(&get, "MAX_CONCURRENT_JOBS")?
            .unwrap_or(2usize)
            .max(1);

        let rate_limit_enabled = get("RATE_LIMIT_ENABLED")
            .map(|s| parse_bool(&s))
            .unwrap_or(true);
        let rate_limit_requests = parse_num(&get, "RATE_LIMIT_REQUESTS")?.unwrap_or(5);
        let rate_limit_window =
            Duration::from_secs(parse_num(&get, "RATE_LIMIT_WINDOW")?.unwrap_or(60));

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            backend,
            temp_dir,
            max_concurrent_jobs,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_window,
        })
    }
}

fn require_url(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    let url = get(key).ok_or_else(|| {
        Error::Config(format!(
            "{key} environment variable is required for the local backend"
        ))
    })?;
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::Config(format!("{key} must be an http(s) URL")));
    }
    Ok(url)
}

fn parse_num<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key} must be a number, got `{raw}`"))),
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_quotes(v.trim()));
    }
}

fn strip_quotes(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn token_is_required() {
        let err = Config::from_lookup(lookup(&[("DEEPAI_API_KEY", "k")])).unwrap_err();
        assert!(err.to_string().contains("TELEGRAM_BOT_TOKEN"));
    }

    #[test]
    fn legacy_bot_token_name_is_accepted() {
        let cfg =
            Config::from_lookup(lookup(&[("BOT_TOKEN", "t"), ("DEEPAI_API_KEY", "k")])).unwrap();
        assert_eq!(cfg.telegram_bot_token, "t");
    }

    #[test]
    fn deepai_is_default_and_needs_api_key() {
        let err = Config::from_lookup(lookup(&[("TELEGRAM_BOT_TOKEN", "t")])).unwrap_err();
        assert!(err.to_string().contains("DEEPAI_API_KEY"));

        let cfg = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("DEEPAI_API_KEY", "secret"),
        ]))
        .unwrap();
        let BackendConfig::Deepai(d) = &cfg.backend else {
            panic!("expected deepai backend");
        };
        assert_eq!(d.api_key, "secret");
        assert_eq!(d.endpoint, DEFAULT_DEEPAI_ENDPOINT);
        assert_eq!(d.timeout, Duration::from_secs(120));
        assert_eq!(cfg.max_concurrent_jobs, 2);
        assert!(cfg.rate_limit_enabled);
        assert!(cfg.telegram_allowed_users.is_empty());
    }

    #[test]
    fn local_backend_requires_model_urls() {
        let err = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("ENHANCE_BACKEND", "local"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("UPSCALER_MODEL_URL"));

        let cfg = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("ENHANCE_BACKEND", "Local"),
            ("UPSCALER_MODEL_URL", "https://example.com/up.onnx"),
            ("FACE_RESTORER_MODEL_URL", "https://example.com/face.onnx"),
            ("MAX_INPUT_PIXELS", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.backend.kind(), BackendKind::Local);
        let BackendConfig::Local(l) = &cfg.backend else {
            panic!("expected local backend");
        };
        assert_eq!(l.upscale_factor, 4);
        assert_eq!(l.max_input_pixels, None);
        assert_eq!(l.upscaler.file_name, "realesrgan_x4plus.onnx");
        assert_eq!(l.model_dir, PathBuf::from("weights"));
        assert_eq!(l.face_restore_weight, 0.5);
        assert_eq!(l.face_restore_max_side, 1024);
    }

    #[test]
    fn face_restore_weight_is_range_checked() {
        let local = |extra: &[(&'static str, &'static str)]| {
            let mut pairs = vec![
                ("TELEGRAM_BOT_TOKEN", "t"),
                ("ENHANCE_BACKEND", "local"),
                ("UPSCALER_MODEL_URL", "https://example.com/up.onnx"),
                ("FACE_RESTORER_MODEL_URL", "https://example.com/face.onnx"),
            ];
            pairs.extend_from_slice(extra);
            Config::from_lookup(lookup(&pairs))
        };

        let err = local(&[("FACE_RESTORE_WEIGHT", "1.5")]).unwrap_err();
        assert!(err.to_string().contains("FACE_RESTORE_WEIGHT"));

        let cfg = local(&[("FACE_RESTORE_WEIGHT", "0"), ("FACE_RESTORE_MAX_SIDE", "4096")]).unwrap();
        let BackendConfig::Local(l) = &cfg.backend else {
            panic!("expected local backend");
        };
        assert_eq!(l.face_restore_weight, 0.0);
        assert_eq!(l.face_restore_max_side, 4096);
    }

    #[test]
    fn rejects_unknown_backend_and_bad_numbers() {
        let err = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("ENHANCE_BACKEND", "magic"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("magic"));

        let err = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("DEEPAI_API_KEY", "k"),
            ("MAX_CONCURRENT_JOBS", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MAX_CONCURRENT_JOBS"));
    }

    #[test]
    fn allowed_users_and_rate_limit_parse() {
        let cfg = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("DEEPAI_API_KEY", "k"),
            ("TELEGRAM_ALLOWED_USERS", "1, 2,x,3"),
            ("RATE_LIMIT_ENABLED", "off"),
            ("RATE_LIMIT_WINDOW", "30"),
            ("MAX_CONCURRENT_JOBS", "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.telegram_allowed_users, vec![1, 2, 3]);
        assert!(!cfg.rate_limit_enabled);
        assert_eq!(cfg.rate_limit_window, Duration::from_secs(30));
        assert_eq!(cfg.max_concurrent_jobs, 1);
    }

    #[test]
    fn strips_matching_quotes_only() {
        assert_eq!(strip_quotes("\"abc\""), "abc");
        assert_eq!(strip_quotes("'abc'"), "abc");
        assert_eq!(strip_quotes("\"abc'"), "\"abc'");
    }
}
