// ABOUTME: Ordered handler pipeline sharing one execution context per trigger
// ABOUTME: Priority ordering, per-handler timeout and error isolation, explicit stop

use crate::traits::IncomingMessage;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Responses and Errors
// =============================================================================

/// Outcome a handler appends to the context. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    pub handler: String,
    pub handled: bool,
    pub should_stop: bool,
    pub payload: Option<Value>,
}

impl HandlerResponse {
    /// Handled, later handlers still run
    pub fn handled(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            handled: true,
            should_stop: false,
            payload: None,
        }
    }

    /// Handled, and no later handler runs
    pub fn stop(handler: impl Into<String>) -> Self {
        Self {
            should_stop: true,
            ..Self::handled(handler)
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// A failure recorded against a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    pub handler: String,
    pub error: String,
}

// =============================================================================
// Execution Context
// =============================================================================

/// State shared by all handlers of one pipeline run.
///
/// Keys keep the order they were first written in and are a stringly-typed
/// contract between handlers. The first handler to
/// write a key owns it; only the owner may remove it.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    values: Vec<(String, Value)>,
    owners: HashMap<String, String>,
    responses: Vec<HandlerResponse>,
    errors: Vec<HandlerError>,
    current: Option<String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.values.iter().position(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.position(key).map(|i| &self.values[i].1)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Keys in first-write order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(k, _)| k.as_str())
    }

    /// Handler that first wrote `key`
    pub fn owner_of(&self, key: &str) -> Option<&str> {
        self.owners.get(key).map(String::as_str)
    }

    /// Write a key. Overwriting another handler's key is allowed but logged.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let writer = self.current.clone().unwrap_or_default();
        match self.owners.get(&key) {
            Some(owner) if *owner != writer => {
                tracing::warn!(key = %key, owner = %owner, writer = %writer, "Overwriting context key owned by another handler");
            }
            Some(_) => {}
            None => {
                self.owners.insert(key.clone(), writer);
            }
        }
        let value = value.into();
        match self.position(&key) {
            Some(i) => self.values[i].1 = value,
            None => self.values.push((key, value)),
        }
    }

    /// Remove a key the current writer owns. Other handlers' keys are kept.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let writer = self.current.as_deref().unwrap_or_default();
        match self.owners.get(key) {
            Some(owner) if owner == writer => {
                self.owners.remove(key);
                let i = self.position(key)?;
                Some(self.values.remove(i).1)
            }
            Some(owner) => {
                tracing::warn!(key = %key, owner = %owner, writer = %writer, "Refusing to remove context key owned by another handler");
                None
            }
            None => None,
        }
    }

    pub fn add_response(&mut self, response: HandlerResponse) {
        self.responses.push(response);
    }

    pub fn responses(&self) -> &[HandlerResponse] {
        &self.responses
    }

    pub fn add_error(&mut self, handler: impl Into<String>, error: impl Into<String>) {
        self.errors.push(HandlerError {
            handler: handler.into(),
            error: error.into(),
        });
    }

    pub fn errors(&self) -> &[HandlerError] {
        &self.errors
    }

    /// True if any handler reported the message handled
    pub fn is_handled(&self) -> bool {
        self.responses.iter().any(|r| r.handled)
    }

    fn enter(&mut self, handler: &str) {
        self.current = Some(handler.to_string());
    }

    fn leave(&mut self) {
        self.current = None;
    }
}

// =============================================================================
// Handler
// =============================================================================

/// A processing unit in the pipeline
#[async_trait]
pub trait Handler: Send + Sync {
    /// Identity used for error records and key ownership
    fn name(&self) -> &str;

    /// Higher values run first. Default is 0.
    fn priority(&self) -> i32 {
        0
    }

    /// Process the message. Append a response with `should_stop` to end the run.
    async fn handle(&self, message: &IncomingMessage, ctx: &mut ExecutionContext) -> Result<()>;
}

// =============================================================================
// Pipeline
// =============================================================================

/// What happened during one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Handlers invoked, in order
    pub executed: Vec<String>,
    /// Handler whose response ended the run early
    pub stopped_by: Option<String>,
}

/// Runs handlers in priority order against a shared context
pub struct HandlerPipeline {
    handlers: Vec<Arc<dyn Handler>>,
    handler_timeout: Duration,
}

impl Default for HandlerPipeline {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl HandlerPipeline {
    pub fn new(handler_timeout: Duration) -> Self {
        Self {
            handlers: Vec::new(),
            handler_timeout,
        }
    }

    /// Register a handler. Higher priority first; equal priorities keep
    /// registration order (stable sort).
    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        tracing::info!(
            handler = handler.name(),
            priority = handler.priority(),
            "Handler registered"
        );
        self.handlers.push(handler);
        self.handlers
            .sort_by_key(|h| std::cmp::Reverse(h.priority()));
    }

    pub fn with_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.register(handler);
        self
    }

    /// Handler names in execution order
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler in order until one asks to stop
    pub async fn run(&self, message: &IncomingMessage, ctx: &mut ExecutionContext) -> RunSummary {
        let mut summary = RunSummary::default();

        for handler in &self.handlers {
            let name = handler.name().to_string();
            let responses_before = ctx.responses().len();

            ctx.enter(&name);
            let outcome =
                tokio::time::timeout(self.handler_timeout, handler.handle(message, ctx)).await;
            ctx.leave();
            summary.executed.push(name.clone());

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(handler = %name, error = %e, "Handler failed");
                    ctx.add_error(&name, e.to_string());
                }
                Err(_) => {
                    tracing::error!(handler = %name, timeout = ?self.handler_timeout, "Handler timed out");
                    ctx.add_error(
                        &name,
                        format!("timed out after {:?}", self.handler_timeout),
                    );
                }
            }

            if ctx.responses()[responses_before..]
                .iter()
                .any(|r| r.should_stop)
            {
                tracing::debug!(handler = %name, "Pipeline stopped by handler");
                summary.stopped_by = Some(name);
                break;
            }
        }

        summary
    }

    /// Run with a fresh context and return it
    pub async fn dispatch(&self, message: &IncomingMessage) -> (ExecutionContext, RunSummary) {
        let mut ctx = ExecutionContext::new();
        let summary = self.run(message, &mut ctx).await;
        (ctx, summary)
    }
}
