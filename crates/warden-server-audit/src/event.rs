// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit event types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kinds of mutation this core records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventTag {
	ClientCreate,
	ClientDelete,
	GroupCreate,
	GroupDelete,
	SecretCreate,
	SecretCreateOrUpdate,
	SecretDelete,
	SecretChangeVersion,
	GroupAddClient,
	GroupRemoveClient,
	SecretAddGroup,
	SecretRemoveGroup,
}

impl std::fmt::Display for EventTag {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			EventTag::ClientCreate => "CLIENT_CREATE",
			EventTag::ClientDelete => "CLIENT_DELETE",
			EventTag::GroupCreate => "GROUP_CREATE",
			EventTag::GroupDelete => "GROUP_DELETE",
			EventTag::SecretCreate => "SECRET_CREATE",
			EventTag::SecretCreateOrUpdate => "SECRET_CREATEORUPDATE",
			EventTag::SecretDelete => "SECRET_DELETE",
			EventTag::SecretChangeVersion => "SECRET_CHANGEVERSION",
			EventTag::GroupAddClient => "GROUP_ADD_CLIENT",
			EventTag::GroupRemoveClient => "GROUP_REMOVE_CLIENT",
			EventTag::SecretAddGroup => "SECRET_ADD_GROUP",
			EventTag::SecretRemoveGroup => "SECRET_REMOVE_GROUP",
		};
		f.write_str(s)
	}
}

/// One recorded mutation: who did what to which object, when, with any
/// structured extra info the operation wants preserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
	pub timestamp: DateTime<Utc>,
	pub event_type: EventTag,
	/// The acting principal's name.
	pub actor: String,
	/// The name of the affected object.
	pub object_name: String,
	pub extra_info: BTreeMap<String, String>,
}

impl Event {
	pub fn new(
		event_type: EventTag,
		actor: impl Into<String>,
		object_name: impl Into<String>,
	) -> Self {
		Self {
			timestamp: Utc::now(),
			event_type,
			actor: actor.into(),
			object_name: object_name.into(),
			extra_info: BTreeMap::new(),
		}
	}

	pub fn with_extra_info(mut self, extra_info: BTreeMap<String, String>) -> Self {
		self.extra_info = extra_info;
		self
	}
}

impl std::fmt::Display for Event {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(
			f,
			"{} Affected object: \"{}\" Timestamp: \"{}\" User: \"{}\" Additional information: \"{:?}\"",
			self.event_type,
			self.object_name,
			self.timestamp.format("%Y-%m-%d %H:%M:%S"),
			self.actor,
			self.extra_info
		)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_includes_the_essentials() {
		let mut extra = BTreeMap::new();
		extra.insert("expiry".to_string(), "0".to_string());
		let event = Event::new(EventTag::SecretCreateOrUpdate, "ci", "db-password")
			.with_extra_info(extra);

		let line = event.to_string();
		assert!(line.contains("SECRET_CREATEORUPDATE"));
		assert!(line.contains("db-password"));
		assert!(line.contains("ci"));
		assert!(line.contains("expiry"));
	}

	#[test]
	fn serde_roundtrip() {
		let event = Event::new(EventTag::GroupAddClient, "admin", "infra");
		let json = serde_json::to_string(&event).unwrap();
		let back: Event = serde_json::from_str(&json).unwrap();
		assert_eq!(event, back);
	}
}
