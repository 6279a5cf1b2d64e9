use anyhow::{Context, Result};
use serde::Serialize;

use tether::{BridgeConfig, ClientRequest, RemoteClient, RenderedState, ServiceReply};

use crate::cli::SendArgs;

/// Rendered reply as printed on stdout
#[derive(Serialize)]
struct Output {
    server_pid: String,
    message: String,
    connection_count: String,
}

impl From<RenderedState> for Output {
    fn from(state: RenderedState) -> Self {
        Self {
            server_pid: state.server_pid,
            message: state.message,
            connection_count: state.connection_count,
        }
    }
}

/// Send one request over the bridge and render the reply
pub async fn request(args: SendArgs, config: &BridgeConfig) -> Result<RenderedState> {
    let socket = config.socket_path().display();
    let mut client = RemoteClient::connect(config)
        .await
        .with_context(|| format!("failed to connect to {socket}"))?;

    let request = match args.pid {
        Some(pid) => ClientRequest::new(i64::from(pid), args.message, args.package),
        None => ClientRequest::from_current_process(args.message, args.package),
    };
    tracing::debug!(socket = %socket, pid = request.pid, "sending request");

    let reply = client
        .request(request.into_payload())
        .await
        .with_context(|| format!("no reply from {socket}"))?;

    Ok(RenderedState::from(ServiceReply::from_payload(reply.payload())))
}

/// Send one request over the bridge and print the rendered reply
pub async fn execute(args: SendArgs, config: BridgeConfig) -> Result<()> {
    let state = request(args, &config).await?;
    let json = serde_json::to_string_pretty(&Output::from(state))?;
    println!("{json}");
    Ok(())
}
