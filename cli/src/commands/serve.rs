use std::sync::Arc;

use anyhow::{Context, Result};
use executor_core::tokio::TokioGlobal;

use tether::{
    BridgeConfig, BridgeServer, Dispatcher, DispatcherHandle, EchoService, Endpoint, Registry,
};

use crate::cli::ServeArgs;

/// A running echo service and the bridge exposing it
pub struct Service {
    endpoint: Endpoint,
    dispatcher: DispatcherHandle,
    server: BridgeServer,
}

impl Service {
    /// Stop accepting, close the service endpoint and wait for its dispatcher
    pub async fn shutdown(self) -> usize {
        self.server.stop();
        self.endpoint.close();
        self.dispatcher.join().await
    }
}

/// Publish the echo service under the configured channel and bind the socket
pub async fn start(args: &ServeArgs, config: &BridgeConfig) -> Result<Service> {
    let registry = Arc::new(Registry::new());

    let endpoint = Endpoint::create(&registry);
    endpoint
        .register(config.channel())
        .with_context(|| format!("failed to publish channel {}", config.channel()))?;

    let echo = match args.pid {
        Some(pid) => EchoService::new(i64::from(pid)),
        None => EchoService::for_current_process(),
    };
    let dispatcher = Dispatcher::spawn(&endpoint, echo, &TokioGlobal)
        .context("failed to start service dispatcher")?;

    let server = BridgeServer::bind(&registry, config, TokioGlobal)
        .await
        .with_context(|| format!("failed to bind {}", config.socket_path().display()))?;

    tracing::info!(
        channel = %config.channel(),
        address = %endpoint.address(),
        socket = %server.socket_path().display(),
        "serving"
    );

    Ok(Service {
        endpoint,
        dispatcher,
        server,
    })
}

/// Serve until Ctrl-C
pub async fn execute(args: ServeArgs, config: BridgeConfig) -> Result<()> {
    let service = start(&args, &config).await?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("shutting down");
    let handled = service.shutdown().await;
    tracing::info!(handled, "service stopped");
    Ok(())
}
