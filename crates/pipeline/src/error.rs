use fate_comfyui::error::ComfyUIError;
use fate_core::error::CoreError;

/// Failure of one generation request.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The request named a model that is not in the catalog.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error(transparent)]
    ComfyUI(#[from] ComfyUIError),

    #[error("No images were generated")]
    EmptyResult,

    #[error("Failed to compose image grid: {0}")]
    Compose(String),

    #[error("Failed to store image: {0}")]
    Storage(String),
}

/// Flat classification of a [`GenerationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    /// Bad user input, reported back as an input error.
    InvalidRequest,
    Transport,
    Backend,
    Protocol,
    Timeout,
    Execution,
    EmptyResult,
    Compose,
    Storage,
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::UnknownModel(_) => ErrorKind::InvalidRequest,
            Self::ComfyUI(e) => match e {
                ComfyUIError::Configuration(_) => ErrorKind::Configuration,
                ComfyUIError::Transport { .. } => ErrorKind::Transport,
                ComfyUIError::Backend { .. } => ErrorKind::Backend,
                ComfyUIError::Protocol(_) => ErrorKind::Protocol,
                ComfyUIError::Timeout(_) => ErrorKind::Timeout,
                ComfyUIError::Execution { .. } => ErrorKind::Execution,
            },
            Self::EmptyResult => ErrorKind::EmptyResult,
            Self::Compose(_) => ErrorKind::Compose,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Short text suitable for a chat reply. Internal details stay in logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::UnknownModel(name) => format!(
                "Input error: Unknown model '{name}'. Use --models to list the available models."
            ),
            Self::ComfyUI(ComfyUIError::Backend { status, .. }) => format!(
                "A system error occurred. Please try again later. (Error ID: {status})"
            ),
            Self::ComfyUI(ComfyUIError::Timeout(_)) => {
                "Image generation timed out. Please try again later.".to_string()
            }
            Self::ComfyUI(ComfyUIError::Execution { .. }) => {
                "The image server failed while generating. Please try again later.".to_string()
            }
            Self::ComfyUI(ComfyUIError::Transport { .. }) => {
                "The image server is unreachable. Please try again later.".to_string()
            }
            Self::EmptyResult => "No images were generated.".to_string(),
            _ => "A system error occurred. Please try again later. (Error ID: INTERNAL)"
                .to_string(),
        }
    }
}

impl From<CoreError> for GenerationError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Configuration(msg) | CoreError::Validation(msg) => Self::Configuration(msg),
            CoreError::NotFound { entity, name } => {
                Self::Configuration(format!("{entity} not found: {name}"))
            }
        }
    }
}
