use std::path::PathBuf;
use std::time::Duration;

use crate::error::CoreError;

/// Default hard ceiling for the WebSocket stream phase (5 minutes).
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 300;

/// Default idle delay before the backend is asked to free memory (10 minutes).
pub const DEFAULT_INACTIVITY_TIMEOUT_SECS: u64 = 600;

/// Model used when a request does not name one.
pub const DEFAULT_MODEL: &str = "paSanctuary";

/// Service configuration loaded from environment variables.
///
/// Backend address and output paths are optional here; they are checked
/// when first needed so that a missing value surfaces as a typed
/// configuration error before any I/O instead of a startup panic.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// ComfyUI `host:port`, without scheme.
    pub comfyui_address: Option<String>,
    /// Local directory generated images are written to.
    pub folder_path: Option<PathBuf>,
    /// Public URL prefix that replaces `folder_path` in returned paths.
    pub domain_path: Option<String>,
    /// Workflow graph template.
    pub workflow_path: PathBuf,
    /// Model catalog JSON.
    pub model_config_path: PathBuf,
    /// Model name used when the request leaves it empty.
    pub default_model: String,
    /// Command prefix recognised by the prompt parser.
    pub trigger_word: String,
    /// Hard ceiling on the stream phase of a generation.
    pub stream_timeout: Duration,
    /// Idle delay before models are unloaded.
    pub inactivity_timeout: Duration,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                   |
    /// |---------------------------|---------------------------|
    /// | `COMFYUI_ADDRESS`         | unset                     |
    /// | `COMFYUI_FOLDER_PATH`     | unset                     |
    /// | `COMFYUI_DOMAIN_PATH`     | unset                     |
    /// | `COMFYUI_WORKFLOW_PATH`   | `workflows/SDXL.json`     |
    /// | `MODEL_CONFIG_PATH`       | `modelConfiguration.json` |
    /// | `DEFAULT_MODEL`           | `paSanctuary`             |
    /// | `TRIGGER_WORD`            | `!fate`                   |
    /// | `STREAM_TIMEOUT_SECS`     | `300`                     |
    /// | `INACTIVITY_TIMEOUT_SECS` | `600`                     |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let stream_timeout_secs =
            parse_secs(&lookup, "STREAM_TIMEOUT_SECS", DEFAULT_STREAM_TIMEOUT_SECS)?;
        let inactivity_timeout_secs = parse_secs(
            &lookup,
            "INACTIVITY_TIMEOUT_SECS",
            DEFAULT_INACTIVITY_TIMEOUT_SECS,
        )?;

        Ok(Self {
            comfyui_address: non_empty("COMFYUI_ADDRESS"),
            folder_path: non_empty("COMFYUI_FOLDER_PATH").map(PathBuf::from),
            domain_path: non_empty("COMFYUI_DOMAIN_PATH"),
            workflow_path: non_empty("COMFYUI_WORKFLOW_PATH")
                .unwrap_or_else(|| "workflows/SDXL.json".into())
                .into(),
            model_config_path: non_empty("MODEL_CONFIG_PATH")
                .unwrap_or_else(|| "modelConfiguration.json".into())
                .into(),
            default_model: non_empty("DEFAULT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
            trigger_word: non_empty("TRIGGER_WORD").unwrap_or_else(|| "!fate".into()),
            stream_timeout: Duration::from_secs(stream_timeout_secs),
            inactivity_timeout: Duration::from_secs(inactivity_timeout_secs),
        })
    }
}

fn parse_secs<F>(lookup: &F, key: &str, default: u64) -> Result<u64, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| {
            CoreError::Configuration(format!("{key} must be a whole number of seconds, got '{raw}'"))
        }),
    }
}
