//! Chat command parsing into a structured [`GenerationRequest`].
//!
//! Accepted shape:
//!
//! ```text
//! !trigger <prompt> --width=W --height=H --model=M --no <negative> --count=N --seed=S
//! ```
//!
//! Every flag is optional. Width and height fall back to the selected
//! model's native size. A seed of `-1` (the default) asks for a random
//! seed at workflow build time.

use rand::Rng;

use crate::error::CoreError;

pub const DEFAULT_COUNT: u32 = 4;
/// Largest batch a single request may ask for.
pub const MAX_COUNT: u32 = 8;
/// Sentinel seed meaning "pick one at random".
pub const RANDOM_SEED: i64 = -1;

/// Structured parameters for one generation job.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    /// `None` means "use the model's `imageWidth`".
    pub width: Option<u32>,
    /// `None` means "use the model's `imageHeight`".
    pub height: Option<u32>,
    /// Empty means "use the default model".
    pub model: String,
    pub count: u32,
    pub seed: i64,
}

impl Default for GenerationRequest {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            width: None,
            height: None,
            model: String::new(),
            count: DEFAULT_COUNT,
            seed: RANDOM_SEED,
        }
    }
}

impl GenerationRequest {
    /// The model to use, falling back to `default_model` when unset.
    pub fn model_or<'a>(&'a self, default_model: &'a str) -> &'a str {
        if self.model.is_empty() {
            default_model
        } else {
            &self.model
        }
    }

    /// The concrete seed to submit: the requested one, or a random value
    /// in `1..=1_000_000` for [`RANDOM_SEED`].
    pub fn resolve_seed(&self) -> u64 {
        if self.seed < 0 {
            rand::rng().random_range(1..=1_000_000)
        } else {
            self.seed as u64
        }
    }
}

/// Parse a chat message that starts with `trigger`.
pub fn parse_command(trigger: &str, message: &str) -> Result<GenerationRequest, CoreError> {
    let body = message
        .trim_start()
        .strip_prefix(trigger)
        .ok_or_else(|| CoreError::Validation("Prompt trigger is missing".into()))?;

    let mut parts = body.split("--");
    let mut request = GenerationRequest {
        prompt: parts.next().unwrap_or_default().trim().to_string(),
        ..Default::default()
    };

    for part in parts {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("width=") {
            request.width = Some(parse_number("width", value)?);
        } else if let Some(value) = part.strip_prefix("height=") {
            request.height = Some(parse_number("height", value)?);
        } else if let Some(value) = part.strip_prefix("model=") {
            request.model = value.trim().to_string();
        } else if let Some(value) = part.strip_prefix("count=") {
            let count: u32 = parse_number("count", value)?;
            request.count = count.clamp(1, MAX_COUNT);
        } else if let Some(value) = part.strip_prefix("seed=") {
            request.seed = parse_number("seed", value)?;
        } else if let Some(value) = part.strip_prefix("no") {
            request.negative_prompt = value.trim_start_matches('=').trim().to_string();
        } else {
            tracing::debug!(flag = %part, "Ignoring unknown prompt flag");
        }
    }

    if request.prompt.is_empty() {
        return Err(CoreError::Validation("Prompt text is empty".into()));
    }
    if request.width == Some(0) || request.height == Some(0) {
        return Err(CoreError::Validation(
            "Width and height must be greater than zero".into(),
        ));
    }

    Ok(request)
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, CoreError> {
    value
        .trim()
        .parse()
        .map_err(|_| CoreError::Validation(format!("--{flag} expects a number, got '{}'", value.trim())))
}
