// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The permission gate consulted from inside data-access operations.
//!
//! Every secret-touching store operation calls [`PermissionCheck::check_allowed`]
//! before doing any work. Placing the gate at the data boundary (rather than
//! only at the API layer) means no access path can bypass policy, including
//! internal automation that never goes through a resource handler. A denial
//! raises [`AuthError::Denied`], which callers propagate untouched; the
//! guarded operation performs no side effects.

use tracing::instrument;

use crate::error::AuthError;
use crate::types::{Action, Principal, PrincipalKind, Target};

/// Decides whether a principal may perform an action on a target.
pub trait PermissionCheck: Send + Sync {
	/// Returns `Ok(())` when allowed, `Err(AuthError::Denied)` otherwise.
	fn check_allowed(
		&self,
		principal: &Principal,
		action: Action,
		target: Option<&Target>,
	) -> Result<(), AuthError>;
}

fn denial(principal: &Principal, action: Action, target: Option<&Target>) -> AuthError {
	AuthError::Denied {
		principal: principal.name.clone(),
		action: action.to_string(),
		target: target.map(|t| t.name.clone()),
	}
}

/// Allows everything. Deployment configurations that delegate all policy to
/// the API layer install this at the data boundary.
#[derive(Debug, Default, Clone)]
pub struct AlwaysAllowPermissionCheck;

impl PermissionCheck for AlwaysAllowPermissionCheck {
	fn check_allowed(
		&self,
		_principal: &Principal,
		_action: Action,
		_target: Option<&Target>,
	) -> Result<(), AuthError> {
		Ok(())
	}
}

/// Allows automation principals that carry the automation clearance flag.
#[derive(Debug, Default, Clone)]
pub struct AutomationClientPermissionCheck;

impl PermissionCheck for AutomationClientPermissionCheck {
	#[instrument(level = "debug", skip(self, principal, target), fields(principal = %principal, action = %action))]
	fn check_allowed(
		&self,
		principal: &Principal,
		action: Action,
		target: Option<&Target>,
	) -> Result<(), AuthError> {
		if principal.kind == PrincipalKind::Automation && principal.automation_allowed {
			return Ok(());
		}
		Err(denial(principal, action, target))
	}
}

/// Allows a principal to act on targets owned by a group it belongs to.
///
/// Targets without an owner are not covered by this check; combine with
/// another check for ownerless objects.
#[derive(Debug, Default, Clone)]
pub struct OwnershipPermissionCheck;

impl PermissionCheck for OwnershipPermissionCheck {
	#[instrument(level = "debug", skip(self, principal, target), fields(principal = %principal, action = %action))]
	fn check_allowed(
		&self,
		principal: &Principal,
		action: Action,
		target: Option<&Target>,
	) -> Result<(), AuthError> {
		if let Some(owner) = target.and_then(|t| t.owner.as_deref()) {
			if principal.is_member_of(owner) {
				return Ok(());
			}
		}
		Err(denial(principal, action, target))
	}
}

/// First-allow combinator: permits the action if any subordinate check does.
pub struct AnyPermissionCheck {
	subordinate_checks: Vec<Box<dyn PermissionCheck>>,
}

impl AnyPermissionCheck {
	pub fn new(subordinate_checks: Vec<Box<dyn PermissionCheck>>) -> Self {
		Self { subordinate_checks }
	}
}

impl PermissionCheck for AnyPermissionCheck {
	fn check_allowed(
		&self,
		principal: &Principal,
		action: Action,
		target: Option<&Target>,
	) -> Result<(), AuthError> {
		let allowed = self
			.subordinate_checks
			.iter()
			.any(|check| check.check_allowed(principal, action, target).is_ok());

		tracing::info!(
			principal = %principal,
			action = %action,
			target = target.map(|t| t.name.as_str()).unwrap_or("-"),
			allowed,
			"permission gate decision"
		);

		if allowed {
			Ok(())
		} else {
			Err(denial(principal, action, target))
		}
	}
}

/// Denies everything. Used in tests to verify that guarded operations
/// perform no side effects on denial.
#[derive(Debug, Default, Clone)]
pub struct DenyAllPermissionCheck;

impl PermissionCheck for DenyAllPermissionCheck {
	fn check_allowed(
		&self,
		principal: &Principal,
		action: Action,
		target: Option<&Target>,
	) -> Result<(), AuthError> {
		Err(denial(principal, action, target))
	}
}
