use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::AppError;
use crate::models::ProgressEvent;
use crate::session::SessionId;
use crate::state::SharedState;

pub const CONNECTION_LOST: &str = "Lost connection to progress updates";

/// A connection counts as healthy, and resets the retry budget, once it has
/// delivered a valid event or stayed up this long.
const STABLE_UPTIME: Duration = Duration::from_secs(1);

const UPLOAD_PHRASES: [&str; 1] = ["Uploading..."];
const ANALYSIS_PHRASES: [&str; 4] = [
    "Starting analysis...",
    "Analyzing columns...",
    "Finalizing metadata...",
    "Analysis Complete",
];
const PROCESSING_PHRASES: [&str; 7] = [
    "Starting processing...",
    "Processing...",
    "Applying filter...",
    "Aggregating data...",
    "Generating summary...",
    "Generating charts...",
    "Processing Complete",
];

/// Which counter a progress message drives. The server sends no phase code,
/// so this is read off the message text.
// TODO: switch to a phase field once the backend emits one alongside `message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Upload,
    Analysis,
    Processing,
}

impl ProgressPhase {
    pub fn classify(message: &str) -> Option<ProgressPhase> {
        if contains_any(message, &UPLOAD_PHRASES) {
            Some(ProgressPhase::Upload)
        } else if contains_any(message, &ANALYSIS_PHRASES) {
            Some(ProgressPhase::Analysis)
        } else if contains_any(message, &PROCESSING_PHRASES) {
            Some(ProgressPhase::Processing)
        } else {
            None
        }
    }
}

fn contains_any(message: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| message.contains(phrase))
}

pub fn is_error_message(message: &str) -> bool {
    message.contains("Error")
}

enum ChannelEnd {
    Shutdown,
    Dropped { stable: bool },
}

/// Handle to the session's progress listener. Dropping it without `close`
/// leaves the task running until the runtime shuts down.
pub struct ProgressChannel {
    shutdown: CancellationToken,
    task: JoinHandle<Result<(), AppError>>,
}

impl ProgressChannel {
    pub fn open(config: &Config, session_id: &SessionId, state: SharedState) -> Self {
        let shutdown = CancellationToken::new();
        let listener = Listener {
            url: config.progress_url(&session_id.as_string()),
            state,
            max_attempts: config.reconnect_attempts,
            base_delay: config.reconnect_delay,
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(listener.run());
        Self { shutdown, task }
    }

    /// True once the listener has stopped for good (closed or out of retries).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn close(self) {
        self.shutdown.cancel();
        match self.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Progress listener had already stopped: {}", e),
            Err(e) => tracing::warn!("Progress listener ended abnormally: {}", e),
        }
    }
}

struct Listener {
    url: String,
    state: SharedState,
    max_attempts: u32,
    base_delay: Duration,
    shutdown: CancellationToken,
}

impl Listener {
    async fn run(self) -> Result<(), AppError> {
        let mut attempt: u32 = 0;

        loop {
            let generation = self.state.lock().open_channel();

            match self.listen(generation).await {
                ChannelEnd::Shutdown => {
                    tracing::info!("Progress channel closed");
                    return Ok(());
                }
                ChannelEnd::Dropped { stable } => {
                    if stable {
                        attempt = 0;
                    }
                }
            }

            attempt += 1;
            if attempt > self.max_attempts {
                tracing::error!(
                    "Progress channel gave up after {} reconnect attempts",
                    self.max_attempts
                );
                self.state.lock().connection_lost(CONNECTION_LOST);
                return Err(AppError::Connection(format!(
                    "{} after {} reconnect attempts",
                    CONNECTION_LOST, self.max_attempts
                )));
            }

            let delay = self.base_delay * attempt;
            tracing::info!(
                "Reconnecting progress channel in {:?} (attempt {}/{})",
                delay,
                attempt,
                self.max_attempts
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn listen(&self, generation: u64) -> ChannelEnd {
        let connected = tokio::select! {
            _ = self.shutdown.cancelled() => return ChannelEnd::Shutdown,
            result = connect_async(self.url.as_str()) => result,
        };

        let mut stream = match connected {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", self.url, e);
                return ChannelEnd::Dropped { stable: false };
            }
        };
        tracing::info!("Progress channel connected: {}", self.url);
        self.state.lock().connection_restored();
        let opened_at = Instant::now();
        let mut delivered = false;

        loop {
            let frame = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = stream.close(None).await;
                    return ChannelEnd::Shutdown;
                }
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => {
                    delivered |= self.handle_text(generation, &text);
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::warn!("Progress channel closed by server");
                    return ChannelEnd::Dropped {
                        stable: delivered || opened_at.elapsed() >= STABLE_UPTIME,
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Progress channel error: {}", e);
                    return ChannelEnd::Dropped {
                        stable: delivered || opened_at.elapsed() >= STABLE_UPTIME,
                    };
                }
            }
        }
    }

    /// Returns whether the frame was a well-formed event.
    fn handle_text(&self, generation: u64, text: &str) -> bool {
        let event: ProgressEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Ignoring malformed progress frame: {}", e);
                return false;
            }
        };
        tracing::debug!("Progress {}%: {}", event.progress, event.message);
        self.state.lock().apply_progress(generation, &event);
        true
    }
}
