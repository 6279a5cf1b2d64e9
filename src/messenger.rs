//! The messenger conversation
//!
//! A client binds to a service, sends its pid, package name and a free-text
//! message, and renders what the service answers: the service's pid, the
//! echoed message, and how many clients are bound to it. Rendering goes to a
//! caller-supplied [`RenderSink`]; whenever the client leaves the bound state
//! the sink is cleared.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use executor_core::Executor;

use crate::address::Address;
use crate::connection::{Connection, ConnectionObserver, ConnectionStatus};
use crate::dispatcher::{DispatchContext, Dispatcher, DispatcherHandle, Handler};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::message::{Message, Payload};
use crate::registry::Registry;

/// Channel name the messenger service answers on by default
pub const DEFAULT_CHANNEL: &str = "messengerexample";

// Payload keys
pub const PID: &str = "pid";
pub const CONNECTION_COUNT: &str = "connection_count";
pub const PACKAGE_NAME: &str = "package_name";
pub const MESSAGE: &str = "message";

/// What a client sends to the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRequest {
    pub pid: i64,
    pub message: String,
    pub package_name: String,
}

impl ClientRequest {
    pub fn new(pid: i64, message: impl Into<String>, package_name: impl Into<String>) -> Self {
        Self {
            pid,
            message: message.into(),
            package_name: package_name.into(),
        }
    }

    /// Request carrying this process's pid
    pub fn from_current_process(message: impl Into<String>, package_name: impl Into<String>) -> Self {
        Self::new(i64::from(std::process::id()), message, package_name)
    }

    pub fn into_payload(self) -> Payload {
        Payload::new()
            .with_int(PID, self.pid)
            .with_str(MESSAGE, self.message)
            .with_str(PACKAGE_NAME, self.package_name)
    }

    /// Read a request back; missing fields default to zero or empty
    pub fn from_payload(payload: &Payload) -> Self {
        Self {
            pid: payload.get_int(PID).unwrap_or_default(),
            message: payload.get_str(MESSAGE).unwrap_or_default().to_string(),
            package_name: payload.get_str(PACKAGE_NAME).unwrap_or_default().to_string(),
        }
    }
}

/// What the service answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReply {
    pub server_pid: i64,
    pub message: String,
    pub connection_count: i64,
}

impl ServiceReply {
    pub fn into_payload(self) -> Payload {
        Payload::new()
            .with_int(PID, self.server_pid)
            .with_str(MESSAGE, self.message)
            .with_int(CONNECTION_COUNT, self.connection_count)
    }

    pub fn from_payload(payload: &Payload) -> Self {
        Self {
            server_pid: payload.get_int(PID).unwrap_or_default(),
            message: payload.get_str(MESSAGE).unwrap_or_default().to_string(),
            connection_count: payload.get_int(CONNECTION_COUNT).unwrap_or_default(),
        }
    }
}

/// Service side: answers every request with its pid, the echoed message and
/// the current connection count
pub struct EchoService {
    pid: i64,
}

impl EchoService {
    pub fn new(pid: i64) -> Self {
        Self { pid }
    }

    pub fn for_current_process() -> Self {
        Self::new(i64::from(std::process::id()))
    }
}

impl Handler for EchoService {
    async fn handle(&mut self, ctx: &DispatchContext, message: Message) {
        if !message.is_request() {
            tracing::debug!(address = %ctx.address(), "ignoring non-request message");
            return;
        }
        let request = ClientRequest::from_payload(message.payload());
        tracing::debug!(
            client_pid = request.pid,
            package = %request.package_name,
            "messenger request"
        );

        let reply = ServiceReply {
            server_pid: self.pid,
            message: request.message,
            connection_count: i64::from(ctx.connection_count()),
        };
        if let Err(e) = ctx.reply(&message, reply.into_payload()) {
            tracing::warn!(error = %e, "reply dropped");
        }
    }
}

/// What the client displays
///
/// The default value is the cleared state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedState {
    pub server_pid: String,
    pub message: String,
    pub connection_count: String,
}

impl From<ServiceReply> for RenderedState {
    fn from(reply: ServiceReply) -> Self {
        Self {
            server_pid: reply.server_pid.to_string(),
            message: reply.message,
            connection_count: reply.connection_count.to_string(),
        }
    }
}

/// Where rendered state goes
pub trait RenderSink: Send + Sync + 'static {
    fn render(&self, state: RenderedState);

    fn clear(&self);
}

/// Sink keeping the latest rendered state in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<RenderedState>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RenderedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of what is currently displayed
    pub fn current(&self) -> RenderedState {
        self.lock().clone()
    }
}

impl RenderSink for MemorySink {
    fn render(&self, state: RenderedState) {
        *self.lock() = state;
    }

    fn clear(&self) {
        *self.lock() = RenderedState::default();
    }
}

/// Server whose replies may currently be rendered
///
/// Shared between a [`ClearOnUnbind`] observer and the [`ReplyRenderer`]
/// built from it. Rendering and clearing both happen under this lock.
#[derive(Default)]
struct BoundServer {
    server: Mutex<Option<Address>>,
}

impl BoundServer {
    fn lock(&self) -> MutexGuard<'_, Option<Address>> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Client side handler rendering replies into a sink
pub struct ReplyRenderer<S> {
    sink: Arc<S>,
    bound: Option<Arc<BoundServer>>,
}

impl<S: RenderSink> ReplyRenderer<S> {
    /// Render every reply that reaches the endpoint
    pub fn new(sink: Arc<S>) -> Self {
        Self { sink, bound: None }
    }

    /// Render only replies sent by the server `observer` reports as bound
    pub fn gated(observer: &ClearOnUnbind<S>) -> Self {
        Self {
            sink: Arc::clone(&observer.sink),
            bound: Some(Arc::clone(&observer.bound)),
        }
    }
}

impl<S: RenderSink> Handler for ReplyRenderer<S> {
    async fn handle(&mut self, _ctx: &DispatchContext, message: Message) {
        if !message.is_reply() {
            return;
        }
        let state = RenderedState::from(ServiceReply::from_payload(message.payload()));

        let Some(bound) = &self.bound else {
            self.sink.render(state);
            return;
        };
        let current = bound.lock();
        if current.is_some() && *current == message.sender() {
            self.sink.render(state);
        } else {
            tracing::debug!(sender = ?message.sender(), "reply from unbound server dropped");
        }
    }
}

/// Observer resetting the sink on every path that leaves `Bound`
pub struct ClearOnUnbind<S> {
    sink: Arc<S>,
    bound: Arc<BoundServer>,
}

impl<S: RenderSink> ClearOnUnbind<S> {
    pub fn new(sink: Arc<S>) -> Self {
        Self {
            sink,
            bound: Arc::default(),
        }
    }

    fn reset(&self) {
        let mut current = self.bound.lock();
        *current = None;
        self.sink.clear();
    }
}

impl<S: RenderSink> ConnectionObserver for ClearOnUnbind<S> {
    fn on_bound(&self, _channel: &str, server: Address) {
        *self.bound.lock() = Some(server);
    }

    fn on_unbound(&self, channel: &str) {
        tracing::debug!(channel, "unbound, clearing rendered state");
        self.reset();
    }

    fn on_failed(&self, channel: &str) {
        tracing::debug!(channel, "bind failed, clearing rendered state");
        self.reset();
    }
}

/// A client that binds to the messenger service on demand
///
/// The client owns its endpoint, the dispatcher rendering replies, and at
/// most one connection. Only replies from the currently bound server are
/// rendered.
pub struct MessengerClient<S: RenderSink> {
    channel: String,
    endpoint: Endpoint,
    observer: Arc<ClearOnUnbind<S>>,
    connection: Option<Connection>,
    dispatcher: DispatcherHandle,
}

impl<S: RenderSink> MessengerClient<S> {
    /// Create the client endpoint and start rendering replies into `sink`
    pub fn new<E: Executor>(
        registry: &Arc<Registry>,
        channel: impl Into<String>,
        sink: Arc<S>,
        executor: &E,
    ) -> Result<Self> {
        let endpoint = Endpoint::create(registry);
        let observer = Arc::new(ClearOnUnbind::new(sink));
        let dispatcher = Dispatcher::spawn(&endpoint, ReplyRenderer::gated(&observer), executor)?;
        Ok(Self {
            channel: channel.into(),
            endpoint,
            observer,
            connection: None,
            dispatcher,
        })
    }

    pub fn address(&self) -> Address {
        self.endpoint.address()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.connection
            .as_ref()
            .map(Connection::status)
            .unwrap_or(ConnectionStatus::Unbound)
    }

    pub fn is_bound(&self) -> bool {
        self.status() == ConnectionStatus::Bound
    }

    /// Bind if needed and send `request`
    ///
    /// Returns the connection status after binding. A failed bind sends
    /// nothing and leaves the sink cleared.
    pub fn connect_and_send(&mut self, request: ClientRequest) -> Result<ConnectionStatus> {
        let status = match &self.connection {
            Some(connection) => connection.bind(),
            None => {
                let observer: Arc<dyn ConnectionObserver> = self.observer.clone();
                let connection =
                    Connection::connect_with_observer(self.channel.clone(), &self.endpoint, observer);
                let status = connection.status();
                self.connection = Some(connection);
                status
            }
        };

        if status == ConnectionStatus::Failed {
            // Failed is terminal; start over with a fresh lease next time.
            self.connection = None;
            return Ok(status);
        }

        if let Some(connection) = &self.connection {
            connection.send(Message::request(request.into_payload()))?;
        }
        Ok(status)
    }

    /// Release the connection; idempotent
    pub fn disconnect(&mut self) {
        if let Some(connection) = &self.connection {
            connection.disconnect();
        }
    }

    /// Unbind when bound, otherwise bind and send `request`
    pub fn toggle(&mut self, request: ClientRequest) -> Result<ConnectionStatus> {
        if self.is_bound() {
            self.disconnect();
            Ok(self.status())
        } else {
            self.connect_and_send(request)
        }
    }

    /// Tear down: unbind, close the endpoint, and wait for the last reply
    pub async fn shutdown(mut self) -> usize {
        self.connection.take();
        self.endpoint.close();
        self.dispatcher.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use executor_core::tokio::TokioGlobal;

    /// Sink that also reports renders on a channel so tests can await them
    struct NotifyingSink {
        memory: MemorySink,
        renders: smol::channel::Sender<RenderedState>,
    }

    impl RenderSink for NotifyingSink {
        fn render(&self, state: RenderedState) {
            self.memory.render(state.clone());
            let _ = self.renders.try_send(state);
        }

        fn clear(&self) {
            self.memory.clear();
        }
    }

    fn notifying_sink() -> (Arc<NotifyingSink>, smol::channel::Receiver<RenderedState>) {
        let (tx, rx) = smol::channel::unbounded();
        let sink = Arc::new(NotifyingSink {
            memory: MemorySink::new(),
            renders: tx,
        });
        (sink, rx)
    }

    #[test]
    fn test_request_payload_fields() {
        let payload = ClientRequest::new(4321, "hello", "demo").into_payload();
        assert_eq!(payload.get_int(PID), Some(4321));
        assert_eq!(payload.get_str(MESSAGE), Some("hello"));
        assert_eq!(payload.get_str(PACKAGE_NAME), Some("demo"));
    }

    #[test]
    fn test_reply_from_partial_payload() {
        let payload = Payload::new().with_int(PID, 9999);
        let reply = ServiceReply::from_payload(&payload);
        assert_eq!(reply.server_pid, 9999);
        assert_eq!(reply.message, "");
        assert_eq!(reply.connection_count, 0);
    }

    #[test]
    fn test_rendered_state_from_reply() {
        let state = RenderedState::from(ServiceReply {
            server_pid: 9999,
            message: "hello".to_string(),
            connection_count: 1,
        });
        assert_eq!(state.server_pid, "9999");
        assert_eq!(state.message, "hello");
        assert_eq!(state.connection_count, "1");
    }

    #[test]
    fn test_memory_sink_clear() {
        let sink = MemorySink::new();
        sink.render(RenderedState {
            server_pid: "1".to_string(),
            message: "m".to_string(),
            connection_count: "1".to_string(),
        });
        sink.clear();
        assert_eq!(sink.current(), RenderedState::default());
    }

    #[tokio::test]
    async fn test_end_to_end_channel_x() {
        let registry = Arc::new(Registry::new());

        let server = Endpoint::create(&registry);
        server.register("channel-x").unwrap();
        let _service = Dispatcher::spawn(&server, EchoService::new(9999), &TokioGlobal).unwrap();

        let client = Endpoint::create(&registry);
        let (sink, renders) = notifying_sink();
        let _renderer =
            Dispatcher::spawn(&client, ReplyRenderer::new(Arc::clone(&sink)), &TokioGlobal)
                .unwrap();

        let conn = Connection::connect("channel-x", &client);
        assert_eq!(conn.status(), ConnectionStatus::Bound);
        conn.send(Message::request(
            ClientRequest::new(4321, "hello", "demo").into_payload(),
        ))
        .unwrap();

        let rendered = renders.recv().await.unwrap();
        assert_eq!(
            rendered,
            RenderedState {
                server_pid: "9999".to_string(),
                message: "hello".to_string(),
                connection_count: "1".to_string(),
            }
        );
        assert_eq!(sink.memory.current(), rendered);
    }

    #[tokio::test]
    async fn test_ghost_channel_fails_quietly() {
        let registry = Arc::new(Registry::new());
        let (sink, renders) = notifying_sink();
        let mut client =
            MessengerClient::new(&registry, "ghost", Arc::clone(&sink), &TokioGlobal).unwrap();

        let status = client
            .connect_and_send(ClientRequest::new(4321, "hello", "demo"))
            .unwrap();
        assert_eq!(status, ConnectionStatus::Failed);
        assert_eq!(client.status(), ConnectionStatus::Unbound);

        // Nothing was sent, so nothing is rendered
        assert_eq!(client.shutdown().await, 0);
        assert!(renders.try_recv().is_err());
        assert_eq!(sink.memory.current(), RenderedState::default());
    }

    #[tokio::test]
    async fn test_toggle_and_server_death_clear_state() {
        let registry = Arc::new(Registry::new());
        let server = Endpoint::create(&registry);
        server.register(DEFAULT_CHANNEL).unwrap();
        let _service = Dispatcher::spawn(&server, EchoService::new(77), &TokioGlobal).unwrap();

        let (sink, renders) = notifying_sink();
        let mut client =
            MessengerClient::new(&registry, DEFAULT_CHANNEL, Arc::clone(&sink), &TokioGlobal)
                .unwrap();

        // First toggle binds and sends
        let status = client
            .toggle(ClientRequest::new(1, "first", "demo"))
            .unwrap();
        assert_eq!(status, ConnectionStatus::Bound);
        let rendered = renders.recv().await.unwrap();
        assert_eq!(rendered.message, "first");
        assert_eq!(server.connection_count(), 1);

        // Second toggle unbinds and clears
        let status = client.toggle(ClientRequest::new(1, "ignored", "demo")).unwrap();
        assert_eq!(status, ConnectionStatus::Unbound);
        assert_eq!(sink.memory.current(), RenderedState::default());
        assert_eq!(server.connection_count(), 0);

        // Rebind, then the server dies: state is cleared again
        client
            .toggle(ClientRequest::new(1, "second", "demo"))
            .unwrap();
        let rendered = renders.recv().await.unwrap();
        assert_eq!(rendered.message, "second");
        assert_eq!(rendered.connection_count, "1");

        server.close();
        assert_eq!(client.status(), ConnectionStatus::Unbound);
        assert_eq!(sink.memory.current(), RenderedState::default());
    }

    #[tokio::test]
    async fn test_connection_count_tracks_clients() {
        let registry = Arc::new(Registry::new());
        let server = Endpoint::create(&registry);
        server.register("svc").unwrap();
        let _service = Dispatcher::spawn(&server, EchoService::new(1), &TokioGlobal).unwrap();

        let (first_sink, first_renders) = notifying_sink();
        let mut first =
            MessengerClient::new(&registry, "svc", first_sink, &TokioGlobal).unwrap();
        let (second_sink, second_renders) = notifying_sink();
        let mut second =
            MessengerClient::new(&registry, "svc", second_sink, &TokioGlobal).unwrap();

        first.connect_and_send(ClientRequest::new(1, "a", "p")).unwrap();
        assert_eq!(first_renders.recv().await.unwrap().connection_count, "1");

        second.connect_and_send(ClientRequest::new(2, "b", "p")).unwrap();
        assert_eq!(second_renders.recv().await.unwrap().connection_count, "2");
    }

    fn echo_reply(server: Address, message: &str) -> Message {
        Message::reply(
            ServiceReply {
                server_pid: 9999,
                message: message.to_string(),
                connection_count: 1,
            }
            .into_payload(),
        )
        .with_sender(server)
    }

    #[tokio::test]
    async fn test_reply_after_disconnect_stays_cleared() {
        let registry = Arc::new(Registry::new());
        // No dispatcher: the reply is delivered by hand after unbinding
        let server = Endpoint::create(&registry);
        server.register("channel-x").unwrap();

        let (sink, renders) = notifying_sink();
        let mut client =
            MessengerClient::new(&registry, "channel-x", Arc::clone(&sink), &TokioGlobal).unwrap();
        client
            .connect_and_send(ClientRequest::new(4321, "hello", "demo"))
            .unwrap();
        assert_eq!(server.pending(), 1);

        client.disconnect();
        assert_eq!(client.status(), ConnectionStatus::Unbound);
        registry
            .deliver(client.address(), echo_reply(server.address(), "hello"))
            .unwrap();

        // Shutdown drains the late reply before returning
        assert_eq!(client.shutdown().await, 1);
        assert!(renders.try_recv().is_err());
        assert_eq!(sink.memory.current(), RenderedState::default());
    }

    #[tokio::test]
    async fn test_only_bound_server_is_rendered() {
        let registry = Arc::new(Registry::new());
        let server = Endpoint::create(&registry);
        server.register("channel-x").unwrap();
        let stale = Endpoint::create(&registry);

        let (sink, renders) = notifying_sink();
        let mut client =
            MessengerClient::new(&registry, "channel-x", Arc::clone(&sink), &TokioGlobal).unwrap();
        client
            .connect_and_send(ClientRequest::new(4321, "hello", "demo"))
            .unwrap();

        registry
            .deliver(client.address(), echo_reply(stale.address(), "stale"))
            .unwrap();
        registry
            .deliver(client.address(), echo_reply(server.address(), "fresh"))
            .unwrap();

        assert_eq!(renders.recv().await.unwrap().message, "fresh");
        assert_eq!(client.shutdown().await, 2);
        assert!(renders.try_recv().is_err());
    }
}
