//! Handler registry of named in-process functions for the function context.
//!
//! Callers register handlers at startup; jobs and workflow steps reference
//! them by name. This replaces "arbitrary callable" action payloads with a
//! resolved-by-name table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::TaskError;
use crate::executor::action::FunctionArgs;

/// An in-process unit of work invocable by name.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Unique handler name.
    fn name(&self) -> &str;

    /// Run the handler. The returned value becomes the job/step result.
    async fn run(&self, args: FunctionArgs) -> Result<serde_json::Value, String>;
}

impl std::fmt::Debug for dyn Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").field("name", &self.name()).finish()
    }
}

/// A handler built from an async closure.
pub struct FnHandler<F> {
    name: String,
    func: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(FunctionArgs) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<serde_json::Value, String>> + Send,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(FunctionArgs) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<serde_json::Value, String>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, args: FunctionArgs) -> Result<serde_json::Value, String> {
        (self.func)(args).await
    }
}

/// Registry of available handlers.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler, replacing any existing handler of the same name.
    pub async fn register(&self, handler: Arc<dyn Handler>) {
        let name = handler.name().to_string();
        self.handlers.write().await.insert(name.clone(), handler);
        tracing::debug!("Registered handler: {}", name);
    }

    /// Register an async closure as a handler.
    pub async fn register_fn<F, Fut>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(FunctionArgs) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<serde_json::Value, String>> + Send + 'static,
    {
        self.register(Arc::new(FnHandler::new(name, func))).await;
    }

    /// Unregister a handler.
    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.write().await.remove(name)
    }

    /// Resolve a handler by name.
    pub async fn get(&self, name: &str) -> Result<Arc<dyn Handler>, TaskError> {
        self.handlers
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| TaskError::HandlerNotFound {
                name: name.to_string(),
            })
    }

    /// Check if a handler exists.
    pub async fn has(&self, name: &str) -> bool {
        self.handlers.read().await.contains_key(name)
    }

    /// List all handler names.
    pub async fn list(&self) -> Vec<String> {
        self.handlers.read().await.keys().cloned().collect()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
