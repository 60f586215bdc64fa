use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::config::{DEFAULT_QUEUE_CAPACITY, EchoPolicy, HubConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the hub: serve the chat page and relay WebSocket messages.
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address to bind. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// HTML page served at `/`.
    #[arg(long, default_value = "index.html")]
    pub index: PathBuf,

    /// Messages buffered per client before it is evicted as unresponsive.
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    pub queue_capacity: usize,

    /// Milliseconds a single write may take before the client is dropped.
    #[arg(long, default_value_t = 10_000)]
    pub write_timeout_ms: u64,

    /// Do not echo a message back to the client that sent it.
    #[arg(long)]
    pub exclude_sender: bool,
}

impl ServeArgs {
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.queue_capacity,
            echo: if self.exclude_sender {
                EchoPolicy::ExcludeSender
            } else {
                EchoPolicy::IncludeSender
            },
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}
