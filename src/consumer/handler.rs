//! Message handlers invoked by the delivery task.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use super::MessageContext;
use crate::codec::Message;
use crate::error::Result;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Receives every message of a subscription, one at a time.
///
/// An error is logged and delivery continues with the next message.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, ctx: MessageContext, message: Message) -> BoxFuture<'static, HandlerResult>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F, Fut>
where
    F: Fn(MessageContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(MessageContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> MessageHandler for FnHandler<F, Fut>
where
    F: Fn(MessageContext, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn handle(&self, ctx: MessageContext, message: Message) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self.handler)(ctx, message))
    }
}
