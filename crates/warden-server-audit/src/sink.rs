// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit sinks.
//!
//! The core records mutations through [`AuditSink`]; real deployments wire a
//! durable sink at assembly time. [`TracingAuditSink`] emits structured log
//! lines and is the default; [`InMemoryAuditSink`] captures events for tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::AuditError;
use crate::event::Event;

#[async_trait]
pub trait AuditSink: Send + Sync {
	async fn record_event(&self, event: Event) -> Result<(), AuditError>;
}

/// Emits every event as a structured tracing line.
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
	async fn record_event(&self, event: Event) -> Result<(), AuditError> {
		tracing::info!(
			event_type = %event.event_type,
			actor = %event.actor,
			object = %event.object_name,
			extra = ?event.extra_info,
			"audit event"
		);
		Ok(())
	}
}

/// Captures events in memory so tests can assert on what was recorded.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditSink {
	events: Arc<Mutex<Vec<Event>>>,
}

impl InMemoryAuditSink {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn events(&self) -> Vec<Event> {
		self.events.lock().await.clone()
	}
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
	async fn record_event(&self, event: Event) -> Result<(), AuditError> {
		self.events.lock().await.push(event);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::event::EventTag;

	#[tokio::test]
	async fn in_memory_sink_captures_in_order() {
		let sink = InMemoryAuditSink::new();
		sink.record_event(Event::new(EventTag::ClientCreate, "admin", "ci"))
			.await
			.unwrap();
		sink.record_event(Event::new(EventTag::ClientDelete, "admin", "ci"))
			.await
			.unwrap();

		let events = sink.events().await;
		assert_eq!(events.len(), 2);
		assert_eq!(events[0].event_type, EventTag::ClientCreate);
		assert_eq!(events[1].event_type, EventTag::ClientDelete);
	}
}
