// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
	#[error("Audit sink error: {0}")]
	Sink(String),
}

pub type AuditResult<T> = std::result::Result<T, AuditError>;
