use std::time::Duration;

/// Default bound of each client's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// How long a single write may take before the client is considered stalled.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether a relayed message is also queued back to the client that sent it.
///
/// Defaults to echoing: the bundled page shows a sender's own messages only
/// when they come back from the hub. `ExcludeSender` gives strict
/// "everyone but me" fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EchoPolicy {
    /// Every member receives every message, sender included.
    #[default]
    IncludeSender,
    /// The sender is skipped when its own message is fanned out.
    ExcludeSender,
}

/// Tunables shared by a room and every session attached to it.
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub queue_capacity: usize,
    pub echo: EchoPolicy,
    pub write_timeout: Duration,
}

impl HubConfig {
    /// Queue bound actually used; tokio channels reject a zero capacity.
    pub fn effective_queue_capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            echo: EchoPolicy::default(),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}
