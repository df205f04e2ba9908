//! Typed hook capabilities supplied at construction.
//!
//! The set is closed: a validation predicate and a before-shutdown callback. Both are plain
//! Rust callables; closures implement the traits through blanket impls.

use std::fmt;
use std::sync::Arc;

/// Decides whether an event may enter the queue.
pub trait ValidationHook<T>: Send + Sync {
    fn is_valid(&self, event: &T) -> bool;
}

impl<T, F> ValidationHook<T> for F
where
    F: Fn(&T) -> bool + Send + Sync,
{
    fn is_valid(&self, event: &T) -> bool {
        self(event)
    }
}

/// Runs right before a final forced flush: on unload, and once on shutdown.
pub trait BeforeShutdownHook: Send + Sync {
    fn before_shutdown(&self);
}

impl<F> BeforeShutdownHook for F
where
    F: Fn() + Send + Sync,
{
    fn before_shutdown(&self) {
        self()
    }
}

/// Optional hooks for one queue.
pub struct Hooks<T> {
    validate: Option<Arc<dyn ValidationHook<T>>>,
    before_shutdown: Option<Arc<dyn BeforeShutdownHook>>,
}

impl<T> Hooks<T> {
    pub fn new() -> Self {
        Self { validate: None, before_shutdown: None }
    }

    pub fn with_validation<V>(mut self, hook: V) -> Self
    where
        V: ValidationHook<T> + 'static,
    {
        self.validate = Some(Arc::new(hook));
        self
    }

    pub fn with_before_shutdown<H>(mut self, hook: H) -> Self
    where
        H: BeforeShutdownHook + 'static,
    {
        self.before_shutdown = Some(Arc::new(hook));
        self
    }

    /// Absent hook means every event is valid.
    pub fn is_valid(&self, event: &T) -> bool {
        self.validate.as_ref().map_or(true, |hook| hook.is_valid(event))
    }

    pub fn run_before_shutdown(&self) {
        if let Some(hook) = &self.before_shutdown {
            hook.before_shutdown();
        }
    }

    pub fn has_validation(&self) -> bool {
        self.validate.is_some()
    }
}

impl<T> Clone for Hooks<T> {
    fn clone(&self) -> Self {
        Self { validate: self.validate.clone(), before_shutdown: self.before_shutdown.clone() }
    }
}

impl<T> Default for Hooks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Hooks<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("validate", &self.validate.as_ref().map(|_| "<predicate>"))
            .field("before_shutdown", &self.before_shutdown.as_ref().map(|_| "<callback>"))
            .finish()
    }
}
