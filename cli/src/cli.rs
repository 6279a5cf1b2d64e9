use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "Named asynchronous message channels")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Publish an echo service on a channel and expose it on a socket
    Serve(ServeArgs),

    /// Send one request to a running service and print the reply
    Send(SendArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Channel name to publish the service under
    #[arg(long)]
    pub channel: Option<String>,

    /// Process id reported in replies (defaults to this process)
    #[arg(long)]
    pub pid: Option<u32>,

    #[command(flatten)]
    pub bridge: BridgeArgs,
}

#[derive(Args)]
pub struct SendArgs {
    /// Message text to send
    #[arg(short, long, default_value = "hello")]
    pub message: String,

    /// Package name identifying the client
    #[arg(long, default_value = env!("CARGO_PKG_NAME"))]
    pub package: String,

    /// Process id to send (defaults to this process)
    #[arg(long)]
    pub pid: Option<u32>,

    /// Seconds to wait for the reply
    #[arg(long, env = "TETHER_REPLY_TIMEOUT")]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub bridge: BridgeArgs,
}

/// Options shared by every command that touches the socket
#[derive(Args, Clone)]
pub struct BridgeArgs {
    /// Path of the bridge socket
    #[arg(long, env = "TETHER_SOCKET")]
    pub socket: Option<PathBuf>,

    /// Largest accepted frame in bytes
    #[arg(long)]
    pub max_frame_len: Option<usize>,
}
