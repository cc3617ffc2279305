//! Chat command routing.
//!
//! A message is handled only when it contains the trigger word. The
//! `--help`, `--models` and `--unload-vram` flags select a command;
//! anything else is a generation request that is parsed and queued.

use std::fmt;
use std::sync::Arc;

use fate_core::error::CoreError;
use fate_core::prompt::parse_command;
use fate_pipeline::generator::ImageGenerator;
use fate_pipeline::inactivity::InactivityMonitor;
use fate_pipeline::queue::JobQueue;
use tokio::sync::mpsc;

/// Who a reply is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Public message to the channel.
    Channel(String),
    /// Private notice to one user.
    Notice { nick: String, text: String },
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(text) => f.write_str(text),
            Self::Notice { nick, text } => write!(f, "-{nick}- {text}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    ListModels,
    UnloadVram,
    Generate,
}

impl Command {
    const FLAGS: [(&'static str, Command); 3] = [
        ("--help", Command::Help),
        ("--models", Command::ListModels),
        ("--unload-vram", Command::UnloadVram),
    ];

    /// Route a message, or `None` when it does not mention `trigger`.
    pub fn route(trigger: &str, message: &str) -> Option<Self> {
        if !message.to_lowercase().contains(&trigger.to_lowercase()) {
            return None;
        }
        let command = Self::FLAGS
            .iter()
            .find(|(flag, _)| message.contains(flag))
            .map(|(_, command)| *command)
            .unwrap_or(Command::Generate);
        Some(command)
    }
}

pub struct CommandHandler {
    trigger: String,
    generator: ImageGenerator,
    queue: JobQueue,
    monitor: Arc<InactivityMonitor>,
    replies: mpsc::UnboundedSender<Reply>,
}

impl CommandHandler {
    pub fn new(
        trigger: impl Into<String>,
        generator: ImageGenerator,
        queue: JobQueue,
        monitor: Arc<InactivityMonitor>,
        replies: mpsc::UnboundedSender<Reply>,
    ) -> Self {
        Self {
            trigger: trigger.into(),
            generator,
            queue,
            monitor,
            replies,
        }
    }

    /// Handle one incoming chat message from `nick`.
    pub async fn handle(&self, nick: &str, message: &str) {
        let Some(command) = Command::route(&self.trigger, message) else {
            return;
        };
        tracing::debug!(nick, ?command, "Received request");

        match command {
            Command::Help => self.help(nick),
            Command::ListModels => self.list_models(nick),
            Command::UnloadVram => self.unload_vram(nick).await,
            Command::Generate => self.generate(nick, message),
        }
    }

    fn help(&self, nick: &str) {
        tracing::info!(nick, "Help requested");
        let t = &self.trigger;
        for text in [
            format!("To generate an image, type: {t} <your_prompt>"),
            format!(
                "{t} <prompt_text> --width=<width> --height=<height> --model=<model> \
                 --no <negative_prompt_text> --count=<count> --seed=<seed>"
            ),
            format!("Example: {t} a beautiful landscape --width=1024 --height=768 --no=ugly, blurry"),
        ] {
            self.notice(nick, text);
        }
    }

    fn list_models(&self, nick: &str) {
        tracing::info!(nick, "Models list requested");
        let names = self.generator.catalog().names().join(", ");
        self.notice(nick, format!("Available models: {names}"));
    }

    async fn unload_vram(&self, nick: &str) {
        tracing::info!(nick, "Manual VRAM unload requested");
        self.generator.free_memory().await;
        self.notice(nick, "Successfully requested VRAM unload.".to_string());
    }

    fn generate(&self, nick: &str, message: &str) {
        let request = match parse_command(&self.trigger, message) {
            Ok(request) => request,
            Err(CoreError::Validation(msg)) => {
                self.say(format!("{nick}: Error parsing your request: {msg}"));
                return;
            }
            Err(e) => {
                tracing::error!(nick, error = %e, "Error during message handling");
                self.say(format!(
                    "{nick}: An error occurred while processing your request."
                ));
                return;
            }
        };

        let model = if request.model.is_empty() {
            "default"
        } else {
            request.model.as_str()
        };
        tracing::debug!(
            nick,
            width = ?request.width,
            height = ?request.height,
            model,
            count = request.count,
            "Parsed prompt",
        );

        self.monitor.clear_timer();

        let generator = self.generator.clone();
        let replies = self.replies.clone();
        let owner = nick.to_string();
        let position = self.queue.enqueue(move || async move {
            let text = match generator.generate(&request).await {
                Ok(result) => format!("{owner}: Your image is ready! {}", result.public_path()),
                Err(e) => format!("{owner}: {}", e.user_message()),
            };
            let _ = replies.send(Reply::Channel(text));
            Ok(())
        });

        self.say(format!(
            "{nick}: Starting image generation... You are #{position} in the queue."
        ));
    }

    fn say(&self, text: String) {
        let _ = self.replies.send(Reply::Channel(text));
    }

    fn notice(&self, nick: &str, text: String) {
        let _ = self.replies.send(Reply::Notice {
            nick: nick.to_string(),
            text,
        });
    }
}
