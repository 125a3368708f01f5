//! Handler registry -- a named collection of task handlers.
//!
//! The scheduler looks up handlers by the task's `name` field at dispatch
//! time; a task whose name has no registered handler fails immediately with
//! no retry (see [`crate::error::HandlerError`] and the retry policy).

use std::collections::HashMap;

use async_trait::async_trait;

use crate::context::TaskContext;
use crate::error::HandlerError;

/// A unit of work registered under a task name.
///
/// Implementations are `async fn`; they receive a [`TaskContext`] by value
/// and return the success payload or a [`HandlerError`] to persist.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: TaskContext) -> Result<serde_json::Value, HandlerError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<serde_json::Value, HandlerError>> + Send,
{
    async fn call(&self, ctx: TaskContext) -> Result<serde_json::Value, HandlerError> {
        (self)(ctx).await
    }
}

/// A collection of registered [`Handler`] implementations, keyed by task name.
///
/// # Example
///
/// ```ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register("send_email", |ctx| async move { Ok(serde_json::json!({})) });
/// let handler = registry.get("send_email").unwrap();
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `name`.
    ///
    /// If a handler is already registered under that name, it is replaced
    /// and the old one returned — last registration wins.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Option<Box<dyn Handler>> {
        self.handlers.insert(name.into(), Box::new(handler))
    }

    /// Look up a handler by task name.
    pub fn get(&self, name: &str) -> Option<&dyn Handler> {
        self.handlers.get(name).map(|b| b.as_ref())
    }

    /// List the names of all registered handlers.
    ///
    /// The order is not guaranteed (HashMap iteration order).
    pub fn list(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    /// Return the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Return `true` if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_handler(
        ctx: TaskContext,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<serde_json::Value, HandlerError>> + Send>>
    {
        Box::pin(async move { Ok(serde_json::json!({"echo": ctx.name})) })
    }

    #[test]
    fn registry_starts_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn register_and_get() {
        let mut registry = HandlerRegistry::new();
        let old = registry.register("alpha", ok_handler);
        assert!(old.is_none());
        assert!(registry.get("alpha").is_some());
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = HandlerRegistry::new();
        registry.register("alpha", ok_handler);
        let old = registry.register("alpha", ok_handler);
        assert!(old.is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_missing_returns_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn list_returns_all_names() {
        let mut registry = HandlerRegistry::new();
        registry.register("alpha", ok_handler);
        registry.register("beta", ok_handler);
        registry.register("gamma", ok_handler);

        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn registered_handler_executes() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", ok_handler);

        let handler = registry.get("echo").unwrap();
        let ctx = TaskContext::new(1, "echo".into(), serde_json::json!({}), 0, 1, 60);
        let result = handler.call(ctx).await.unwrap();
        assert_eq!(result, serde_json::json!({"echo": "echo"}));
    }
}
