// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
	#[error("Access denied: {principal} may not {action} {target:?}")]
	Denied {
		principal: String,
		action: String,
		target: Option<String>,
	},
}

pub type AuthResult<T> = std::result::Result<T, AuthError>;
