//! Chain-of-responsibility utilities
//!
//! An ordered sequence of handlers where the first handler producing a
//! result wins. Used for correlation key derivation and release voting.

use std::fmt;

/// A handler that may or may not produce a result for an input
pub trait Handler<I: ?Sized, O>: Send + Sync {
    /// Handle the input, returning `None` to pass it along the chain
    fn handle(&self, input: &I) -> Option<O>;
}

/// Adapter turning a plain function into a [`Handler`]
pub struct FnHandler<F>(F);

impl<I: ?Sized, O, F> Handler<I, O> for FnHandler<F>
where
    F: Fn(&I) -> Option<O> + Send + Sync,
{
    fn handle(&self, input: &I) -> Option<O> {
        (self.0)(input)
    }
}

/// An ordered chain of handlers; the first non-`None` result wins
pub struct HandlerChain<I: ?Sized, O> {
    handlers: Vec<Box<dyn Handler<I, O>>>,
}

impl<I: ?Sized, O> HandlerChain<I, O> {
    /// Create an empty chain
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Append a handler to the end of the chain
    pub fn with(mut self, handler: impl Handler<I, O> + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Append a plain function handler to the end of the chain
    pub fn with_fn<F>(self, f: F) -> Self
    where
        F: Fn(&I) -> Option<O> + Send + Sync + 'static,
    {
        self.with(FnHandler(f))
    }

    /// Run the input through the chain, returning the first result
    pub fn handle(&self, input: &I) -> Option<O> {
        self.handlers.iter().find_map(|handler| handler.handle(input))
    }

    /// Number of handlers in the chain
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the chain has no handlers
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<I: ?Sized, O> Default for HandlerChain<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: ?Sized, O> fmt::Debug for HandlerChain<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
