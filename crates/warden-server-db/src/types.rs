// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Row types for the warden schema.
//!
//! Metadata-style maps are `BTreeMap` so their JSON serialization is
//! deterministic; row integrity tags are computed over that serialization.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A machine client known to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
	pub id: i64,
	pub name: String,
	pub description: String,
	pub created_at: i64,
	pub created_by: String,
	pub updated_at: i64,
	pub updated_by: String,
	pub enabled: bool,
	pub automation_allowed: bool,
}

/// A group relating clients to the secrets they may read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
	pub id: i64,
	pub name: String,
	pub description: String,
	pub metadata: BTreeMap<String, String>,
	pub created_at: i64,
	pub created_by: String,
	pub updated_at: i64,
	pub updated_by: String,
}

/// The stable identity of a secret across content revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSeries {
	pub id: i64,
	pub name: String,
	pub description: String,
	pub secret_type: Option<String>,
	/// Name of the owning group, if any.
	pub owner: Option<String>,
	pub generation_options: BTreeMap<String, String>,
	/// The content revision this series currently resolves to.
	pub current_version: Option<i64>,
	pub created_at: i64,
	pub created_by: String,
	pub updated_at: i64,
	pub updated_by: String,
}

/// One immutable content revision belonging to a series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretContent {
	pub id: i64,
	pub secret_series_id: i64,
	/// Self-describing ciphertext envelope.
	pub encrypted_content: String,
	pub content_checksum: String,
	/// Legacy free-text version label; coexists with the current pointer.
	pub version: Option<String>,
	pub metadata: BTreeMap<String, String>,
	/// Epoch seconds; 0 means no expiry.
	pub expiry: i64,
	pub created_at: i64,
	pub created_by: String,
	pub updated_at: i64,
	pub updated_by: String,
}

/// A series paired with one of its content revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretSeriesAndContent {
	pub series: SecretSeries,
	pub content: SecretContent,
}
