//! Dispatchers drain a mailbox and hand each message to a handler
//!
//! A dispatcher runs on its own task. It takes messages one at a time in the
//! order they were enqueued, suspends while the mailbox is empty, and after
//! the endpoint closes keeps going until every queued message has been
//! delivered.

use std::future::Future;
use std::sync::Arc;

use executor_core::{Executor, Task};
use smol::channel::Receiver;

use crate::address::Address;
use crate::endpoint::{Endpoint, Mailbox};
use crate::error::{Error, Result};
use crate::message::{Message, Payload};
use crate::registry::Registry;

/// Processes messages delivered by a dispatcher
///
/// # Example
///
/// ```rust,ignore
/// struct Echo;
///
/// impl Handler for Echo {
///     async fn handle(&mut self, ctx: &DispatchContext, message: Message) {
///         let payload = message.payload().clone();
///         let _ = ctx.reply(&message, payload);
///     }
/// }
/// ```
pub trait Handler: Send + 'static {
    fn handle(
        &mut self,
        ctx: &DispatchContext,
        message: Message,
    ) -> impl Future<Output = ()> + Send;
}

/// Handler backed by a synchronous closure
pub struct HandlerFn<F>(F);

/// Wrap a closure as a [`Handler`]
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: FnMut(&DispatchContext, Message) + Send + 'static,
{
    HandlerFn(f)
}

impl<F> Handler for HandlerFn<F>
where
    F: FnMut(&DispatchContext, Message) + Send + 'static,
{
    fn handle(
        &mut self,
        ctx: &DispatchContext,
        message: Message,
    ) -> impl Future<Output = ()> + Send {
        (self.0)(ctx, message);
        std::future::ready(())
    }
}

/// What a handler can do besides reading the message
#[derive(Clone)]
pub struct DispatchContext {
    mailbox: Arc<Mailbox>,
    registry: Arc<Registry>,
}

impl DispatchContext {
    /// Address of the endpoint being drained
    pub fn address(&self) -> Address {
        self.mailbox.address()
    }

    /// Connections currently bound to the endpoint being drained
    pub fn connection_count(&self) -> u32 {
        self.mailbox.connection_count()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Reply to `request` using its return address
    pub fn reply(&self, request: &Message, payload: Payload) -> Result<()> {
        let to = request.sender().ok_or(Error::NoReturnAddress)?;
        self.registry
            .deliver(to, Message::reply(payload).with_sender(self.address()))
    }

    /// Send `message` to `address`, stamped with this endpoint as sender
    pub fn send_to(&self, address: Address, message: Message) -> Result<()> {
        self.registry
            .deliver(address, message.with_sender(self.address()))
    }
}

/// Entry points for draining an endpoint
pub struct Dispatcher;

impl Dispatcher {
    /// Build the drain loop for `endpoint` without spawning it
    ///
    /// The future resolves to the number of delivered messages once the
    /// endpoint has closed and its mailbox is empty.
    pub fn run<H: Handler>(
        endpoint: &Endpoint,
        handler: H,
    ) -> Result<impl Future<Output = usize> + Send + use<H>> {
        let receiver = endpoint.mailbox().claim_receiver()?;
        let ctx = DispatchContext {
            mailbox: Arc::clone(endpoint.mailbox()),
            registry: Arc::clone(endpoint.registry()),
        };
        Ok(drain(receiver, handler, ctx))
    }

    /// Spawn the drain loop for `endpoint` on `executor`
    pub fn spawn<H: Handler, E: Executor>(
        endpoint: &Endpoint,
        handler: H,
        executor: &E,
    ) -> Result<DispatcherHandle> {
        let run = Self::run(endpoint, handler)?;
        let (done_tx, done_rx) = smol::channel::bounded(1);
        executor
            .spawn(async move {
                let delivered = run.await;
                let _ = done_tx.send(delivered).await;
            })
            .detach();
        Ok(DispatcherHandle {
            address: endpoint.address(),
            done: done_rx,
        })
    }
}

async fn drain<H: Handler>(
    receiver: Receiver<Message>,
    mut handler: H,
    ctx: DispatchContext,
) -> usize {
    let address = ctx.address();
    tracing::debug!(address = %address, "dispatcher started");

    let mut delivered = 0;
    // recv() keeps yielding queued messages after close and only then errors.
    while let Ok(message) = receiver.recv().await {
        handler.handle(&ctx, message).await;
        delivered += 1;
    }

    tracing::debug!(address = %address, delivered, "dispatcher finished");
    delivered
}

/// Handle to a spawned dispatcher
#[derive(Debug)]
pub struct DispatcherHandle {
    address: Address,
    done: Receiver<usize>,
}

impl DispatcherHandle {
    pub fn address(&self) -> Address {
        self.address
    }

    /// Whether the drain loop has terminated
    pub fn is_finished(&self) -> bool {
        !self.done.is_empty() || self.done.is_closed()
    }

    /// Wait for the loop to terminate, returning the delivered count
    pub async fn join(self) -> usize {
        self.done.recv().await.unwrap_or(0)
    }
}
