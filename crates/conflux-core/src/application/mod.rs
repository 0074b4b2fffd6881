use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::events::DomainEvent;
use crate::CoreError;

/// Process instance controller
pub mod process_instance_controller;

/// Process definition deployment
pub mod process_definition_service;

pub(crate) mod cancellation;
pub(crate) mod evaluation;
pub(crate) mod flow_navigation;
pub(crate) mod runtime;

/// Event handler for domain events
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handle a domain event
    async fn handle_event(&self, event: Arc<dyn DomainEvent>) -> Result<(), CoreError>;
}

/// Handler that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventHandler;

#[async_trait]
impl DomainEventHandler for NoopEventHandler {
    async fn handle_event(&self, _event: Arc<dyn DomainEvent>) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Fans every event out to several handlers
#[derive(Default, Clone)]
pub struct CompositeEventHandler {
    handlers: Vec<Arc<dyn DomainEventHandler>>,
}

impl CompositeEventHandler {
    /// Empty composite
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler
    pub fn with(mut self, handler: Arc<dyn DomainEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }
}

#[async_trait]
impl DomainEventHandler for CompositeEventHandler {
    /// Every handler sees the event; the first error is returned
    async fn handle_event(&self, event: Arc<dyn DomainEvent>) -> Result<(), CoreError> {
        let mut first_error = None;
        for handler in &self.handlers {
            if let Err(e) = handler.handle_event(Arc::clone(&event)).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
