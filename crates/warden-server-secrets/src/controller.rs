// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The secret controller.
//!
//! Owns the policy for turning a create/update request into persisted series
//! and content rows: payload size limits, content encryption and checksums,
//! versioning, and cursor-paginated listing. Every operation accepts an
//! optional principal; when present the permission gate runs before any
//! work, so internal callers that bypass the API layer still hit policy.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use warden_server_audit::{AuditSink, Event, EventTag};
use warden_server_auth::{Action, PermissionCheck, Principal, Target};
use warden_server_crypto::ContentCryptographer;
use warden_server_db::{
	AclRepository, NewSecret, SecretContent, SecretRepository, SecretSeriesAndContent,
};

use crate::config::SecretsConfig;
use crate::cursor::SecretCursor;
use crate::error::{Result, SecretsError};

/// A secret resolved to one content revision. Content stays encrypted;
/// callers decrypt explicitly via [`SecretController::decrypt_content`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
	pub id: i64,
	pub name: String,
	pub description: String,
	pub owner: Option<String>,
	pub secret_type: Option<String>,
	pub generation_options: BTreeMap<String, String>,
	pub encrypted_content: String,
	pub checksum: String,
	/// Legacy free-text version label of this revision, if any.
	pub version: Option<String>,
	pub metadata: BTreeMap<String, String>,
	/// Epoch seconds; 0 means no expiry.
	pub expiry: i64,
	pub current_version: Option<i64>,
	pub created_at: i64,
	pub created_by: String,
	pub updated_at: i64,
	pub updated_by: String,
}

impl From<SecretSeriesAndContent> for Secret {
	fn from(s: SecretSeriesAndContent) -> Self {
		Secret {
			id: s.series.id,
			name: s.series.name,
			description: s.series.description,
			owner: s.series.owner,
			secret_type: s.series.secret_type,
			generation_options: s.series.generation_options,
			encrypted_content: s.content.encrypted_content,
			checksum: s.content.content_checksum,
			version: s.content.version,
			metadata: s.content.metadata,
			expiry: s.content.expiry,
			current_version: s.series.current_version,
			created_at: s.series.created_at,
			created_by: s.series.created_by,
			updated_at: s.series.updated_at,
			updated_by: s.series.updated_by,
		}
	}
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone)]
pub struct SecretListPage {
	pub secrets: Vec<Secret>,
	/// Pass back to [`SecretController::list`] to fetch the next page;
	/// `None` when the listing is exhausted.
	pub next_cursor: Option<String>,
}

/// Orchestrates secret persistence on top of the repositories and the
/// cryptography collaborator.
#[derive(Clone)]
pub struct SecretController {
	secrets: SecretRepository,
	acl: AclRepository,
	cryptographer: ContentCryptographer,
	gate: Arc<dyn PermissionCheck>,
	audit: Arc<dyn AuditSink>,
	config: SecretsConfig,
}

impl SecretController {
	pub fn new(
		secrets: SecretRepository,
		acl: AclRepository,
		cryptographer: ContentCryptographer,
		gate: Arc<dyn PermissionCheck>,
		audit: Arc<dyn AuditSink>,
		config: SecretsConfig,
	) -> Self {
		Self {
			secrets,
			acl,
			cryptographer,
			gate,
			audit,
			config,
		}
	}

	pub fn secrets(&self) -> &SecretRepository {
		&self.secrets
	}

	pub fn acl(&self) -> &AclRepository {
		&self.acl
	}

	pub(crate) fn config(&self) -> &SecretsConfig {
		&self.config
	}

	pub(crate) fn audit(&self) -> &dyn AuditSink {
		self.audit.as_ref()
	}

	pub(crate) fn check(
		&self,
		principal: Option<&Principal>,
		action: Action,
		target: Option<&Target>,
	) -> Result<()> {
		if let Some(principal) = principal {
			self.gate.check_allowed(principal, action, target)?;
		}
		Ok(())
	}

	/// Start building a secret revision.
	///
	/// Validates the size limit against the decoded payload, computes the
	/// content checksum, and encrypts under a key derived from the name -
	/// all before any write.
	///
	/// # Arguments
	/// * `content_base64` - base64-encoded payload
	/// * `expiry` - epoch seconds; 0 means no expiry
	pub fn builder(
		&self,
		name: &str,
		content_base64: &str,
		creator: &str,
		expiry: i64,
	) -> Result<SecretBuilder<'_>> {
		let secret = self.prepare_new_secret(name, content_base64, creator, expiry)?;
		Ok(SecretBuilder {
			controller: self,
			secret,
		})
	}

	pub(crate) fn prepare_new_secret(
		&self,
		name: &str,
		content_base64: &str,
		creator: &str,
		expiry: i64,
	) -> Result<NewSecret> {
		if name.is_empty() {
			return Err(SecretsError::InvalidArgument("secret name must not be empty".into()));
		}
		if content_base64.is_empty() {
			return Err(SecretsError::InvalidArgument("secret content must not be empty".into()));
		}
		if creator.is_empty() {
			return Err(SecretsError::InvalidArgument("creator must not be empty".into()));
		}

		let plaintext = Zeroizing::new(BASE64.decode(content_base64).map_err(|_| {
			SecretsError::InvalidArgument("secret content must be base64-encoded".into())
		})?);
		self.validate_secret_size(plaintext.len())?;

		// The checksum covers the base64 encoding, matching what clients
		// upload and can recompute without decrypting.
		let checksum = self.cryptographer.compute_checksum(content_base64.as_bytes())?;
		let encrypted_content = self.cryptographer.encrypter(name)?.encrypt(&plaintext)?;

		Ok(NewSecret {
			name: name.to_string(),
			encrypted_content,
			content_checksum: checksum,
			creator: creator.to_string(),
			expiry,
			..NewSecret::default()
		})
	}

	fn validate_secret_size(&self, size: usize) -> Result<()> {
		let Some(max) = self.config.maximum_secret_size_bytes else {
			return Ok(());
		};
		if size as u64 > max {
			return Err(SecretsError::ContentTooLarge { size, max });
		}
		Ok(())
	}

	/// Look up a secret by series id.
	#[tracing::instrument(skip(self, principal), fields(secret_id = %id))]
	pub async fn secret_by_id(&self, principal: Option<&Principal>, id: i64) -> Result<Option<Secret>> {
		self.check(principal, Action::Read, None)?;
		Ok(self.secrets.get_secret_by_id(id).await?.map(Secret::from))
	}

	/// Look up a secret by name.
	#[tracing::instrument(skip(self, principal), fields(name = %name))]
	pub async fn secret_by_name(&self, principal: Option<&Principal>, name: &str) -> Result<Option<Secret>> {
		self.check(principal, Action::Read, Some(&Target::secret(name, None)))?;
		Ok(self.secrets.get_secret_by_name(name).await?.map(Secret::from))
	}

	/// Look up several secrets by name; absent names are skipped.
	#[tracing::instrument(skip(self, principal, names), fields(count = names.len()))]
	pub async fn secrets_by_names(
		&self,
		principal: Option<&Principal>,
		names: &[String],
	) -> Result<Vec<Secret>> {
		self.check(principal, Action::Read, None)?;
		let found = self.secrets.get_secrets_by_names(names).await?;
		Ok(found.into_iter().map(Secret::from).collect())
	}

	/// Decrypt a secret's content. The ciphertext envelope is
	/// self-describing; no name is re-supplied.
	pub fn decrypt_content(&self, secret: &Secret) -> Result<Zeroizing<Vec<u8>>> {
		Ok(self.cryptographer.decrypt(&secret.encrypted_content)?)
	}

	/// List secrets with stable cursor pagination.
	///
	/// Ordering is by monotonic series id, so for any `limit` >= 1 the
	/// concatenation of pages equals the single unlimited call's result, in
	/// the same order, regardless of concurrent unrelated writes.
	///
	/// # Arguments
	/// * `owner` - restrict to secrets owned by this group
	/// * `expire_max_time` - exclusive upper bound on expiry; only expiring
	///   secrets are returned when set
	/// * `limit` - page size; `None` returns everything
	/// * `cursor` - token from the previous page's `next_cursor`
	#[tracing::instrument(skip(self, principal, cursor))]
	pub async fn list(
		&self,
		principal: Option<&Principal>,
		owner: Option<&str>,
		expire_max_time: Option<i64>,
		limit: Option<i64>,
		cursor: Option<&str>,
	) -> Result<SecretListPage> {
		self.check(principal, Action::Read, None)?;

		if let Some(limit) = limit {
			if limit < 1 {
				return Err(SecretsError::InvalidArgument("limit must be at least 1".into()));
			}
		}

		let min_id = cursor.map(SecretCursor::decode).transpose()?.map(|c| c.last_id);

		// Fetch one extra row to detect whether another page exists.
		let fetch_limit = limit.map(|l| l + 1);
		let mut rows = self
			.secrets
			.list_secrets(owner, expire_max_time, min_id, fetch_limit)
			.await?;

		let next_cursor = match limit {
			Some(limit) if rows.len() > limit as usize => {
				rows.truncate(limit as usize);
				let last_id = rows.last().map(|s| s.series.id).unwrap_or_default();
				Some(SecretCursor::new(last_id).encode()?)
			}
			_ => None,
		};

		Ok(SecretListPage {
			secrets: rows.into_iter().map(Secret::from).collect(),
			next_cursor,
		})
	}

	/// Page through secrets by creation time.
	#[tracing::instrument(skip(self, principal))]
	pub async fn list_batched(
		&self,
		principal: Option<&Principal>,
		idx: i64,
		num: i64,
		newest_first: bool,
	) -> Result<Vec<Secret>> {
		self.check(principal, Action::Read, None)?;
		if idx < 0 {
			return Err(SecretsError::InvalidArgument("index must be non-negative".into()));
		}
		if num < 0 {
			return Err(SecretsError::InvalidArgument("count must be non-negative".into()));
		}

		let rows = self.secrets.list_batched(idx, num, newest_first).await?;
		Ok(rows.into_iter().map(Secret::from).collect())
	}

	/// All revisions of a secret, newest first.
	#[tracing::instrument(skip(self, principal), fields(name = %name))]
	pub async fn secret_versions(
		&self,
		principal: Option<&Principal>,
		name: &str,
		idx: i64,
		num: i64,
	) -> Result<Vec<SecretContent>> {
		self.check(principal, Action::Read, Some(&Target::secret(name, None)))?;

		let series = self
			.secrets
			.series()
			.get_secret_series_by_name(name)
			.await?
			.ok_or_else(|| SecretsError::Db(warden_server_db::DbError::NotFound(format!(
				"secret {name} not found"
			))))?;

		Ok(self.secrets.content().get_versions_paged(series.id, idx, num).await?)
	}

	/// Roll a secret back (or forward) to one of its revisions.
	///
	/// The target revision must belong to the secret; pointing at a foreign
	/// revision is rejected before any mutation.
	#[tracing::instrument(skip(self, principal), fields(name = %name, version_id))]
	pub async fn set_current_version(
		&self,
		principal: Option<&Principal>,
		name: &str,
		version_id: i64,
		updater: &str,
	) -> Result<()> {
		self.check(principal, Action::Update, Some(&Target::secret(name, None)))?;

		self.secrets
			.set_current_version_by_name(name, version_id, updater)
			.await?;

		let mut extra = BTreeMap::new();
		extra.insert("version".to_string(), version_id.to_string());
		self.record_event(EventTag::SecretChangeVersion, updater, name, extra).await;
		Ok(())
	}

	/// Rename a secret series.
	#[tracing::instrument(skip(self, principal), fields(secret_id, name = %new_name))]
	pub async fn rename_secret(
		&self,
		principal: Option<&Principal>,
		secret_id: i64,
		new_name: &str,
		updater: &str,
	) -> Result<()> {
		self.check(principal, Action::Update, None)?;
		if new_name.is_empty() {
			return Err(SecretsError::InvalidArgument("secret name must not be empty".into()));
		}
		Ok(self.secrets.series().rename_secret_series(secret_id, new_name, updater).await?)
	}

	/// Merge a new expiry into the current revision, keeping the earlier
	/// deadline.
	#[tracing::instrument(skip(self, principal), fields(name = %name, expiry))]
	pub async fn set_expiration(
		&self,
		principal: Option<&Principal>,
		name: &str,
		expiry: i64,
	) -> Result<()> {
		self.check(principal, Action::Update, Some(&Target::secret(name, None)))?;
		Ok(self.secrets.set_expiration_by_name(name, expiry).await?)
	}

	/// Delete a secret; revisions and access grants cascade.
	#[tracing::instrument(skip(self, principal), fields(name = %name, actor = %actor))]
	pub async fn delete_secret(
		&self,
		principal: Option<&Principal>,
		name: &str,
		actor: &str,
	) -> Result<()> {
		let owner = self
			.secrets
			.series()
			.get_secret_series_by_name(name)
			.await?
			.and_then(|s| s.owner);
		self.check(principal, Action::Delete, Some(&Target::secret(name, owner)))?;

		self.secrets.delete_secret_by_name(name).await?;
		self.record_event(EventTag::SecretDelete, actor, name, BTreeMap::new()).await;
		Ok(())
	}

	pub(crate) async fn record_event(
		&self,
		event_type: EventTag,
		actor: &str,
		object_name: &str,
		extra_info: BTreeMap<String, String>,
	) {
		let event = Event::new(event_type, actor, object_name).with_extra_info(extra_info);
		// Audit failures never undo a committed mutation.
		if let Err(e) = self.audit.record_event(event).await {
			tracing::warn!(error = %e, "failed to record audit event");
		}
	}
}

/// Builder to assemble new secret series or revisions.
pub struct SecretBuilder<'a> {
	controller: &'a SecretController,
	pub(crate) secret: NewSecret,
}

impl std::fmt::Debug for SecretBuilder<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SecretBuilder")
			.field("secret", &self.secret)
			.finish_non_exhaustive()
	}
}

impl<'a> SecretBuilder<'a> {
	/// Supply an optional owner group name.
	pub fn with_owner(mut self, owner: Option<String>) -> Self {
		self.secret.owner = owner;
		self
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.secret.description = description.into();
		self
	}

	pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
		self.secret.metadata = metadata;
		self
	}

	pub fn with_type(mut self, secret_type: impl Into<String>) -> Self {
		self.secret.secret_type = Some(secret_type.into());
		self
	}

	/// Supply a legacy free-text version label for this revision.
	pub fn with_version_label(mut self, version: impl Into<String>) -> Self {
		self.secret.version = Some(version.into());
		self
	}

	pub fn with_generation_options(mut self, generation_options: BTreeMap<String, String>) -> Self {
		self.secret.generation_options = generation_options;
		self
	}

	/// Finalize creation of a new secret.
	///
	/// # Errors
	/// `DbError::Conflict` (wrapped) when the name is already taken.
	pub async fn create(self, principal: Option<&Principal>) -> Result<Secret> {
		let target = Target::secret(self.secret.name.clone(), self.secret.owner.clone());
		self.controller.check(principal, Action::Create, Some(&target))?;

		let (series_id, _) = self.controller.secrets.create_secret(&self.secret).await?;
		let created = self.fetch(series_id).await?;

		self.controller
			.record_event(
				EventTag::SecretCreate,
				&self.secret.creator,
				&self.secret.name,
				audit_extra(&self.secret),
			)
			.await;
		Ok(created)
	}

	/// Create the secret or add a revision to the existing series of the
	/// same name, advancing its current pointer.
	pub async fn create_or_update(self, principal: Option<&Principal>) -> Result<Secret> {
		let target = Target::secret(self.secret.name.clone(), self.secret.owner.clone());
		self.controller.check(principal, Action::AddOrUpdate, Some(&target))?;

		let (series_id, _) = self.controller.secrets.create_or_update_secret(&self.secret).await?;
		let updated = self.fetch(series_id).await?;

		self.controller
			.record_event(
				EventTag::SecretCreateOrUpdate,
				&self.secret.creator,
				&self.secret.name,
				audit_extra(&self.secret),
			)
			.await;
		Ok(updated)
	}

	async fn fetch(&self, series_id: i64) -> Result<Secret> {
		self.controller
			.secrets
			.get_secret_by_id(series_id)
			.await?
			.map(Secret::from)
			.ok_or_else(|| {
				SecretsError::Db(warden_server_db::DbError::Internal(format!(
					"secret {series_id} vanished after write"
				)))
			})
	}
}

fn audit_extra(secret: &NewSecret) -> BTreeMap<String, String> {
	let mut extra = BTreeMap::new();
	if !secret.description.is_empty() {
		extra.insert("description".to_string(), secret.description.clone());
	}
	if !secret.metadata.is_empty() {
		extra.insert("metadata".to_string(), format!("{:?}", secret.metadata));
	}
	extra.insert("expiry".to_string(), secret.expiry.to_string());
	extra
}

#[cfg(test)]
mod tests {
	use super::*;

	use warden_server_audit::InMemoryAuditSink;
	use warden_server_auth::{AlwaysAllowPermissionCheck, DenyAllPermissionCheck};
	use warden_server_db::testing::{create_test_pool, test_cryptographer, test_tagger};
	use warden_server_db::DbError;

	async fn make_controller(config: SecretsConfig) -> (SecretController, Arc<InMemoryAuditSink>) {
		make_controller_with_gate(config, Arc::new(AlwaysAllowPermissionCheck)).await
	}

	async fn make_controller_with_gate(
		config: SecretsConfig,
		gate: Arc<dyn PermissionCheck>,
	) -> (SecretController, Arc<InMemoryAuditSink>) {
		let pool = create_test_pool().await;
		let tagger = test_tagger();
		let audit = Arc::new(InMemoryAuditSink::new());
		let controller = SecretController::new(
			SecretRepository::new(pool.clone(), tagger.clone()),
			AclRepository::new(pool, tagger, gate.clone()),
			test_cryptographer(),
			gate,
			audit.clone(),
			config,
		);
		(controller, audit)
	}

	fn b64(content: &[u8]) -> String {
		BASE64.encode(content)
	}

	#[tokio::test]
	async fn create_read_decrypt_roundtrip() {
		let (controller, audit) = make_controller(SecretsConfig::default()).await;

		let created = controller
			.builder("db-password", &b64(b"hunter2"), "admin", 0)
			.unwrap()
			.with_description("database password")
			.create(None)
			.await
			.unwrap();
		assert_eq!(created.name, "db-password");
		assert!(created.current_version.is_some());

		let fetched = controller
			.secret_by_name(None, "db-password")
			.await
			.unwrap()
			.unwrap();
		assert_eq!(fetched.id, created.id);

		let plaintext = controller.decrypt_content(&fetched).unwrap();
		assert_eq!(plaintext.as_slice(), b"hunter2");

		let events = audit.events().await;
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].event_type, EventTag::SecretCreate);
		assert_eq!(events[0].object_name, "db-password");
	}

	#[tokio::test]
	async fn create_or_update_rotates_in_place() {
		let (controller, audit) = make_controller(SecretsConfig::default()).await;

		let v1 = controller
			.builder("db-password", &b64(b"old"), "admin", 0)
			.unwrap()
			.create_or_update(None)
			.await
			.unwrap();
		let v2 = controller
			.builder("db-password", &b64(b"new"), "admin", 0)
			.unwrap()
			.create_or_update(None)
			.await
			.unwrap();

		assert_eq!(v1.id, v2.id);
		assert_ne!(v1.current_version, v2.current_version);

		let plaintext = controller
			.decrypt_content(&controller.secret_by_name(None, "db-password").await.unwrap().unwrap())
			.unwrap();
		assert_eq!(plaintext.as_slice(), b"new");

		let tags: Vec<EventTag> = audit.events().await.iter().map(|e| e.event_type).collect();
		assert_eq!(tags, vec![EventTag::SecretCreateOrUpdate, EventTag::SecretCreateOrUpdate]);
	}

	#[tokio::test]
	async fn plain_create_conflicts_on_duplicate_name() {
		let (controller, _) = make_controller(SecretsConfig::default()).await;
		controller
			.builder("db-password", &b64(b"v"), "admin", 0)
			.unwrap()
			.create(None)
			.await
			.unwrap();

		let err = controller
			.builder("db-password", &b64(b"v"), "admin", 0)
			.unwrap()
			.create(None)
			.await
			.unwrap_err();
		assert!(matches!(err, SecretsError::Db(DbError::Conflict(_))));
	}

	#[tokio::test]
	async fn size_limit_boundaries() {
		let config = SecretsConfig {
			maximum_secret_size_bytes: Some(16),
			..SecretsConfig::default()
		};
		let (controller, _) = make_controller(config).await;

		// Exactly at the limit is accepted.
		controller
			.builder("at-limit", &b64(&[0u8; 16]), "admin", 0)
			.unwrap()
			.create(None)
			.await
			.unwrap();

		// One byte over is rejected before any write.
		let err = controller
			.builder("over-limit", &b64(&[0u8; 17]), "admin", 0)
			.unwrap_err();
		assert!(matches!(
			err,
			SecretsError::ContentTooLarge { size: 17, max: 16 }
		));
		assert!(controller.secret_by_name(None, "over-limit").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn no_limit_accepts_large_payloads() {
		let (controller, _) = make_controller(SecretsConfig::default()).await;
		let payload = vec![7u8; 65 * 1024];

		let secret = controller
			.builder("big", &b64(&payload), "admin", 0)
			.unwrap()
			.create(None)
			.await
			.unwrap();
		let plaintext = controller.decrypt_content(&secret).unwrap();
		assert_eq!(plaintext.len(), payload.len());
	}

	#[tokio::test]
	async fn invalid_content_is_rejected() {
		let (controller, _) = make_controller(SecretsConfig::default()).await;
		assert!(matches!(
			controller.builder("bad", "not base64!!!", "admin", 0),
			Err(SecretsError::InvalidArgument(_))
		));
		assert!(matches!(
			controller.builder("", &b64(b"v"), "admin", 0),
			Err(SecretsError::InvalidArgument(_))
		));
	}

	#[tokio::test]
	async fn denied_principal_writes_nothing() {
		let (controller, audit) =
			make_controller_with_gate(SecretsConfig::default(), Arc::new(DenyAllPermissionCheck)).await;
		let principal = Principal::automation("ci");

		let err = controller
			.builder("db-password", &b64(b"v"), "ci", 0)
			.unwrap()
			.create(Some(&principal))
			.await
			.unwrap_err();
		assert!(matches!(err, SecretsError::Denied(_)));

		// No row, no audit event.
		assert!(controller.secret_by_name(None, "db-password").await.unwrap().is_none());
		assert!(audit.events().await.is_empty());
	}

	#[tokio::test]
	async fn legacy_labels_coexist_with_current_pointer() {
		let (controller, _) = make_controller(SecretsConfig::default()).await;

		controller
			.builder("db-password", &b64(b"v1"), "admin", 0)
			.unwrap()
			.with_version_label("1.0")
			.create(None)
			.await
			.unwrap();
		let v2 = controller
			.builder("db-password", &b64(b"v2"), "admin", 0)
			.unwrap()
			.create_or_update(None)
			.await
			.unwrap();
		assert!(v2.version.is_none());

		let versions = controller
			.secret_versions(None, "db-password", 0, 10)
			.await
			.unwrap();
		assert_eq!(versions.len(), 2);
		assert!(versions.iter().any(|v| v.version.as_deref() == Some("1.0")));

		// Reusing a label within the series is a conflict.
		let err = controller
			.builder("db-password", &b64(b"v3"), "admin", 0)
			.unwrap()
			.with_version_label("1.0")
			.create_or_update(None)
			.await
			.unwrap_err();
		assert!(matches!(err, SecretsError::Db(DbError::Conflict(_))));
	}

	#[tokio::test]
	async fn rollback_via_set_current_version() {
		let (controller, audit) = make_controller(SecretsConfig::default()).await;

		let v1 = controller
			.builder("db-password", &b64(b"old"), "admin", 0)
			.unwrap()
			.create(None)
			.await
			.unwrap();
		controller
			.builder("db-password", &b64(b"new"), "admin", 0)
			.unwrap()
			.create_or_update(None)
			.await
			.unwrap();

		controller
			.set_current_version(None, "db-password", v1.current_version.unwrap(), "admin")
			.await
			.unwrap();

		let plaintext = controller
			.decrypt_content(&controller.secret_by_name(None, "db-password").await.unwrap().unwrap())
			.unwrap();
		assert_eq!(plaintext.as_slice(), b"old");

		// A foreign revision is rejected.
		let other = controller
			.builder("other", &b64(b"x"), "admin", 0)
			.unwrap()
			.create(None)
			.await
			.unwrap();
		let err = controller
			.set_current_version(None, "db-password", other.current_version.unwrap(), "admin")
			.await
			.unwrap_err();
		assert!(matches!(err, SecretsError::Db(DbError::InvalidArgument(_))));

		assert!(audit
			.events()
			.await
			.iter()
			.any(|e| e.event_type == EventTag::SecretChangeVersion));
	}

	#[tokio::test]
	async fn delete_emits_audit_and_cascades() {
		let (controller, audit) = make_controller(SecretsConfig::default()).await;
		controller
			.builder("doomed", &b64(b"v"), "admin", 0)
			.unwrap()
			.create(None)
			.await
			.unwrap();

		controller.delete_secret(None, "doomed", "admin").await.unwrap();
		assert!(controller.secret_by_name(None, "doomed").await.unwrap().is_none());
		assert!(audit
			.events()
			.await
			.iter()
			.any(|e| e.event_type == EventTag::SecretDelete));

		let err = controller.delete_secret(None, "doomed", "admin").await.unwrap_err();
		assert!(err.is_not_found());
	}

	async fn seed_expiring_secrets(controller: &SecretController) {
		// Five secrets; two share the farthest expiry.
		for (name, expiry) in [
			("s1", 10_000),
			("s2", 20_000),
			("s3", 30_000),
			("s4", 40_000),
			("s5", 40_000),
		] {
			controller
				.builder(name, &b64(b"v"), "admin", expiry)
				.unwrap()
				.create(None)
				.await
				.unwrap();
		}
	}

	#[tokio::test]
	async fn expiry_filtered_pagination_matches_the_unlimited_call() {
		let (controller, _) = make_controller(SecretsConfig::default()).await;
		seed_expiring_secrets(&controller).await;

		let unlimited = controller
			.list(None, None, Some(40_000 - 100), None, None)
			.await
			.unwrap();
		let expected: Vec<String> = unlimited.secrets.iter().map(|s| s.name.clone()).collect();
		assert_eq!(expected, vec!["s1", "s2", "s3"]);
		assert!(unlimited.next_cursor.is_none());

		// Page one at a time until the cursor runs dry.
		let mut paged = Vec::new();
		let mut cursor: Option<String> = None;
		loop {
			let page = controller
				.list(None, None, Some(40_000 - 100), Some(1), cursor.as_deref())
				.await
				.unwrap();
			assert!(page.secrets.len() <= 1);
			paged.extend(page.secrets.into_iter().map(|s| s.name));
			match page.next_cursor {
				Some(next) => cursor = Some(next),
				None => break,
			}
		}
		assert_eq!(paged, expected);
	}

	#[tokio::test]
	async fn pagination_rechunks_identically_for_every_limit() {
		let (controller, _) = make_controller(SecretsConfig::default()).await;
		for i in 0..7 {
			controller
				.builder(&format!("secret-{i}"), &b64(b"v"), "admin", 0)
				.unwrap()
				.create(None)
				.await
				.unwrap();
		}

		let unlimited: Vec<String> = controller
			.list(None, None, None, None, None)
			.await
			.unwrap()
			.secrets
			.into_iter()
			.map(|s| s.name)
			.collect();
		assert_eq!(unlimited.len(), 7);

		for limit in 1..=8i64 {
			let mut paged = Vec::new();
			let mut cursor: Option<String> = None;
			loop {
				let page = controller
					.list(None, None, None, Some(limit), cursor.as_deref())
					.await
					.unwrap();
				paged.extend(page.secrets.into_iter().map(|s| s.name));
				match page.next_cursor {
					Some(next) => cursor = Some(next),
					None => break,
				}
			}
			assert_eq!(paged, unlimited, "limit {limit} must re-chunk the same result");
		}
	}

	#[tokio::test]
	async fn list_rejects_nonsense_arguments() {
		let (controller, _) = make_controller(SecretsConfig::default()).await;
		assert!(matches!(
			controller.list(None, None, None, Some(0), None).await.unwrap_err(),
			SecretsError::InvalidArgument(_)
		));
		assert!(matches!(
			controller.list(None, None, None, None, Some("garbage")).await.unwrap_err(),
			SecretsError::InvalidCursor
		));
	}

	#[tokio::test]
	async fn owner_filter_restricts_listing() {
		let (controller, _) = make_controller(SecretsConfig::default()).await;
		controller
			.builder("owned", &b64(b"v"), "admin", 0)
			.unwrap()
			.with_owner(Some("infra".to_string()))
			.create(None)
			.await
			.unwrap();
		controller
			.builder("unowned", &b64(b"v"), "admin", 0)
			.unwrap()
			.create(None)
			.await
			.unwrap();

		let page = controller.list(None, Some("infra"), None, None, None).await.unwrap();
		let names: Vec<&str> = page.secrets.iter().map(|s| s.name.as_str()).collect();
		assert_eq!(names, vec!["owned"]);
	}

	#[tokio::test]
	async fn batched_listing_orders_by_creation() {
		let (controller, _) = make_controller(SecretsConfig::default()).await;
		for name in ["first", "second", "third"] {
			controller
				.builder(name, &b64(b"v"), "admin", 0)
				.unwrap()
				.create(None)
				.await
				.unwrap();
		}

		let newest = controller.list_batched(None, 0, 2, true).await.unwrap();
		let names: Vec<&str> = newest.iter().map(|s| s.name.as_str()).collect();
		assert_eq!(names, vec!["third", "second"]);

		let oldest = controller.list_batched(None, 1, 2, false).await.unwrap();
		let names: Vec<&str> = oldest.iter().map(|s| s.name.as_str()).collect();
		assert_eq!(names, vec!["second", "third"]);

		assert!(matches!(
			controller.list_batched(None, -1, 2, true).await.unwrap_err(),
			SecretsError::InvalidArgument(_)
		));
	}

	#[tokio::test]
	async fn rename_and_refetch() {
		let (controller, _) = make_controller(SecretsConfig::default()).await;
		let secret = controller
			.builder("old-name", &b64(b"v"), "admin", 0)
			.unwrap()
			.create(None)
			.await
			.unwrap();

		controller.rename_secret(None, secret.id, "new-name", "admin").await.unwrap();
		assert!(controller.secret_by_name(None, "old-name").await.unwrap().is_none());

		let renamed = controller.secret_by_name(None, "new-name").await.unwrap().unwrap();
		assert_eq!(renamed.id, secret.id);
		assert_eq!(
			controller.decrypt_content(&renamed).unwrap().as_slice(),
			b"v"
		);
	}
}
