// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Type definitions for permission gate evaluation.
//!
//! - [`Principal`]: Describes the caller (a machine client or a human user,
//!   with the group names it belongs to)
//! - [`Action`]: The operation being attempted
//! - [`Target`]: Describes the object being accessed (kind, name, owner)
//!
//! Gate decisions are pure functions over these attributes: every relevant
//! fact is an explicit field, pre-loaded by the caller, so checks never
//! touch the database.

use serde::{Deserialize, Serialize};

/// What kind of caller a principal is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrincipalKind {
	/// A machine client authenticated by the excluded API layer.
	Automation,
	/// A human user.
	User,
}

/// Attributes describing the caller requesting access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
	pub name: String,
	pub kind: PrincipalKind,
	/// Names of the groups the caller belongs to.
	pub groups: Vec<String>,
	/// Whether the caller is cleared for automation operations.
	pub automation_allowed: bool,
}

impl Principal {
	/// Creates an automation principal with no memberships.
	pub fn automation(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			kind: PrincipalKind::Automation,
			groups: Vec::new(),
			automation_allowed: true,
		}
	}

	/// Creates a user principal with no memberships.
	pub fn user(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			kind: PrincipalKind::User,
			groups: Vec::new(),
			automation_allowed: false,
		}
	}

	pub fn with_groups(mut self, groups: Vec<String>) -> Self {
		self.groups = groups;
		self
	}

	pub fn is_member_of(&self, group: &str) -> bool {
		self.groups.iter().any(|g| g == group)
	}
}

impl std::fmt::Display for Principal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.name)
	}
}

/// The operation being attempted against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
	Create,
	Read,
	Update,
	Delete,
	/// Create-or-update in one call, used by batch operations.
	AddOrUpdate,
}

impl std::fmt::Display for Action {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Action::Create => "CREATE",
			Action::Read => "READ",
			Action::Update => "UPDATE",
			Action::Delete => "DELETE",
			Action::AddOrUpdate => "ADD_OR_UPDATE",
		};
		f.write_str(s)
	}
}

/// What kind of object a target is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
	Secret,
	Client,
	Group,
}

/// Attributes describing the object being accessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
	pub kind: TargetKind,
	pub name: String,
	/// Name of the owning group, when the object has one.
	pub owner: Option<String>,
}

impl Target {
	pub fn secret(name: impl Into<String>, owner: Option<String>) -> Self {
		Self {
			kind: TargetKind::Secret,
			name: name.into(),
			owner,
		}
	}

	pub fn client(name: impl Into<String>) -> Self {
		Self {
			kind: TargetKind::Client,
			name: name.into(),
			owner: None,
		}
	}

	pub fn group(name: impl Into<String>) -> Self {
		Self {
			kind: TargetKind::Group,
			name: name.into(),
			owner: None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn membership_lookup() {
		let p = Principal::automation("ci").with_groups(vec!["infra".into(), "web".into()]);
		assert!(p.is_member_of("infra"));
		assert!(!p.is_member_of("payments"));
	}

	#[test]
	fn action_display_is_stable() {
		assert_eq!(Action::AddOrUpdate.to_string(), "ADD_OR_UPDATE");
		assert_eq!(Action::Read.to_string(), "READ");
	}
}
