// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

/// How to pick an owner for a newly created secret when the request does not
/// name one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerStrategy {
	/// Leave the owner unset.
	#[default]
	None,
	/// Assign the creating client's group when it belongs to exactly one;
	/// ambiguous memberships leave the owner unset.
	InferFromClient,
}

/// Controller and batch coordinator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
	/// Inclusive upper bound on the decoded payload size in bytes.
	/// `None` means unlimited.
	pub maximum_secret_size_bytes: Option<u64>,
	pub owner_strategy: OwnerStrategy,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_permissive() {
		let config = SecretsConfig::default();
		assert!(config.maximum_secret_size_bytes.is_none());
		assert_eq!(config.owner_strategy, OwnerStrategy::None);
	}

	#[test]
	fn owner_strategy_parses_from_config_files() {
		let config: SecretsConfig = serde_json::from_str(
			r#"{"maximum_secret_size_bytes": 65536, "owner_strategy": "INFER_FROM_CLIENT"}"#,
		)
		.unwrap();
		assert_eq!(config.maximum_secret_size_bytes, Some(65536));
		assert_eq!(config.owner_strategy, OwnerStrategy::InferFromClient);
	}
}
