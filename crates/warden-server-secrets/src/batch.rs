// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Batch create-or-update of secrets under a selectable transaction policy.
//!
//! - `ALL_OR_NONE`: one transaction spans the batch; any failure rolls back
//!   every operation.
//! - `FAIL_FAST`: per-operation transactions in order; the first failure
//!   stops the batch, work committed before it stays committed.
//! - `BEST_EFFORT`: per-operation transactions; failures are logged and
//!   recorded per operation, the batch always runs to the end.
//!
//! An unrecognized mode string fails to parse before any store access.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use warden_server_audit::EventTag;
use warden_server_auth::{Action, Principal, Target};

use crate::config::OwnerStrategy;
use crate::controller::SecretController;
use crate::error::{Result, SecretsError};

/// Transaction policy for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchMode {
	AllOrNone,
	BestEffort,
	FailFast,
}

impl FromStr for BatchMode {
	type Err = SecretsError;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"ALL_OR_NONE" => Ok(BatchMode::AllOrNone),
			"BEST_EFFORT" => Ok(BatchMode::BestEffort),
			"FAIL_FAST" => Ok(BatchMode::FailFast),
			other => Err(SecretsError::UnknownBatchMode(other.to_string())),
		}
	}
}

impl std::fmt::Display for BatchMode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			BatchMode::AllOrNone => "ALL_OR_NONE",
			BatchMode::BestEffort => "BEST_EFFORT",
			BatchMode::FailFast => "FAIL_FAST",
		};
		f.write_str(s)
	}
}

/// One create-or-update operation within a batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOrUpdateSecretOp {
	pub name: String,
	/// Base64-encoded payload.
	pub content: String,
	pub description: String,
	pub metadata: BTreeMap<String, String>,
	/// Epoch seconds; 0 means no expiry.
	pub expiry: i64,
	pub secret_type: Option<String>,
	/// Explicit owner group; `None` may be inferred depending on
	/// configuration.
	pub owner: Option<String>,
	pub version_label: Option<String>,
}

/// Per-operation outcome. `error` is populated only under `BEST_EFFORT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOpResult {
	pub name: String,
	pub error: Option<String>,
}

/// Applies batches of create-or-update operations through the controller.
#[derive(Clone)]
pub struct BatchCoordinator {
	controller: SecretController,
}

impl BatchCoordinator {
	pub fn new(controller: SecretController) -> Self {
		Self { controller }
	}

	/// Apply a batch on behalf of a client under the given mode.
	#[tracing::instrument(skip(self, client, ops), fields(client = %client, mode = %mode, count = ops.len()))]
	pub async fn apply(
		&self,
		client: &Principal,
		ops: &[CreateOrUpdateSecretOp],
		mode: BatchMode,
	) -> Result<Vec<BatchOpResult>> {
		self.controller.check(Some(client), Action::Create, None)?;

		let mut results = Vec::with_capacity(ops.len());
		match mode {
			BatchMode::AllOrNone => {
				let mut tx = self
					.controller
					.secrets()
					.pool()
					.begin()
					.await
					.map_err(warden_server_db::DbError::from)?;
				for op in ops {
					// Any failure drops the transaction, rolling back the
					// whole batch.
					self.apply_one_tx(&mut tx, client, op).await?;
					results.push(BatchOpResult {
						name: op.name.clone(),
						error: None,
					});
				}
				tx.commit().await.map_err(warden_server_db::DbError::from)?;

				for op in ops {
					self.emit_audit(client, op).await;
				}
			}
			BatchMode::FailFast => {
				for op in ops {
					self.apply_one(client, op).await?;
					results.push(BatchOpResult {
						name: op.name.clone(),
						error: None,
					});
				}
			}
			BatchMode::BestEffort => {
				for op in ops {
					match self.apply_one(client, op).await {
						Ok(()) => results.push(BatchOpResult {
							name: op.name.clone(),
							error: None,
						}),
						Err(e) => {
							tracing::error!(secret = %op.name, error = %e, "failed to create or update secret");
							results.push(BatchOpResult {
								name: op.name.clone(),
								error: Some(e.to_string()),
							});
						}
					}
				}
			}
		}

		tracing::info!(mode = %mode, applied = results.len(), "batch finished");
		Ok(results)
	}

	/// Apply one operation in its own transaction and record it.
	async fn apply_one(&self, client: &Principal, op: &CreateOrUpdateSecretOp) -> Result<()> {
		let mut tx = self
			.controller
			.secrets()
			.pool()
			.begin()
			.await
			.map_err(warden_server_db::DbError::from)?;
		self.apply_one_tx(&mut tx, client, op).await?;
		tx.commit().await.map_err(warden_server_db::DbError::from)?;

		self.emit_audit(client, op).await;
		Ok(())
	}

	async fn apply_one_tx(
		&self,
		conn: &mut SqliteConnection,
		client: &Principal,
		op: &CreateOrUpdateSecretOp,
	) -> Result<()> {
		let existing = self
			.controller
			.secrets()
			.get_secret_by_name_tx(conn, &op.name)
			.await?;

		let owner = match &existing {
			Some(secret) => {
				let target = Target::secret(op.name.clone(), secret.series.owner.clone());
				self.controller.check(Some(client), Action::Update, Some(&target))?;
				op.owner.clone()
			}
			None => {
				self.controller.check(Some(client), Action::Create, None)?;
				self.owner_for_creation_tx(conn, client, op.owner.clone()).await?
			}
		};

		let mut secret = self
			.controller
			.prepare_new_secret(&op.name, &op.content, &client.name, op.expiry)?;
		secret.description = op.description.clone();
		secret.metadata = op.metadata.clone();
		secret.secret_type = op.secret_type.clone();
		secret.owner = owner;
		secret.version = op.version_label.clone();

		self.controller
			.secrets()
			.create_or_update_secret_tx(conn, &secret)
			.await?;
		Ok(())
	}

	/// Pick the owner for a new secret when the operation names none.
	///
	/// With `INFER_FROM_CLIENT`, a client in exactly one group donates that
	/// group; zero or several memberships are ambiguous, logged, and never
	/// guessed.
	async fn owner_for_creation_tx(
		&self,
		conn: &mut SqliteConnection,
		client: &Principal,
		explicit_owner: Option<String>,
	) -> Result<Option<String>> {
		if explicit_owner.as_deref().is_some_and(|o| !o.is_empty()) {
			return Ok(explicit_owner);
		}
		if self.controller.config().owner_strategy != OwnerStrategy::InferFromClient {
			return Ok(None);
		}

		let groups = self
			.controller
			.acl()
			.groups_for_client_tx(conn, &client.name)
			.await?;
		match groups.as_slice() {
			[only] => Ok(Some(only.name.clone())),
			[] => {
				tracing::warn!(client = %client, "client does not belong to any group");
				Ok(None)
			}
			_ => {
				let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
				tracing::warn!(client = %client, groups = ?names, "client belongs to more than one group");
				Ok(None)
			}
		}
	}

	async fn emit_audit(&self, client: &Principal, op: &CreateOrUpdateSecretOp) {
		let mut extra = BTreeMap::new();
		if !op.description.is_empty() {
			extra.insert("description".to_string(), op.description.clone());
		}
		if !op.metadata.is_empty() {
			extra.insert("metadata".to_string(), format!("{:?}", op.metadata));
		}
		extra.insert("expiry".to_string(), op.expiry.to_string());

		self.controller
			.record_event(EventTag::SecretCreateOrUpdate, &client.name, &op.name, extra)
			.await;
	}
}
