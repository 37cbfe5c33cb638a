// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! ACL graph repository.
//!
//! Operations over the Client/Group/Secret graph:
//! - memberships: client belongs to group
//! - access grants: group may read secret
//! - traversals: one-hop neighbor sets and the two-hop client-to-secret
//!   reachability set, always deduplicated
//!
//! Secret-touching operations take an optional principal; when present the
//! permission gate runs before any side effect. The `find_and_*` variants
//! resolve both endpoints first (absence is a distinct not-found), run in one
//! transaction, and record the mutation through an audit context.

use std::collections::BTreeMap;
use std::sync::Arc;

use sqlx::sqlite::SqlitePool;
use sqlx::{Row, SqliteConnection};

use warden_server_audit::{AuditSink, Event, EventTag};
use warden_server_auth::{Action, PermissionCheck, Principal, Target};
use warden_server_crypto::RowIntegrityTagger;

use crate::client::ClientRepository;
use crate::error::DbError;
use crate::group::{parse_group_row, GroupRepository};
use crate::secret_content::SecretContentRepository;
use crate::secret_series::SecretSeriesRepository;
use crate::types::{Client, Group, SecretSeries, SecretSeriesAndContent};

const MEMBERSHIPS_TABLE: &str = "memberships";
const ACCESSGRANTS_TABLE: &str = "accessgrants";

/// Who performed a mutation and where to record it.
pub struct AuditContext<'a> {
	pub actor: String,
	pub sink: &'a dyn AuditSink,
	pub extra_info: BTreeMap<String, String>,
}

impl<'a> AuditContext<'a> {
	pub fn new(actor: impl Into<String>, sink: &'a dyn AuditSink) -> Self {
		Self {
			actor: actor.into(),
			sink,
			extra_info: BTreeMap::new(),
		}
	}

	pub fn with_extra_info(mut self, extra_info: BTreeMap<String, String>) -> Self {
		self.extra_info = extra_info;
		self
	}

	async fn record(&self, event_type: EventTag, object_name: &str, extra: BTreeMap<String, String>) {
		let mut extra_info = self.extra_info.clone();
		extra_info.extend(extra);
		let event = Event::new(event_type, self.actor.clone(), object_name)
			.with_extra_info(extra_info);

		// The mutation is already committed; a failing sink must not undo it.
		if let Err(e) = self.sink.record_event(event).await {
			tracing::warn!(error = %e, "failed to record audit event");
		}
	}
}

/// Repository for the ACL graph.
#[derive(Clone)]
pub struct AclRepository {
	pool: SqlitePool,
	tagger: RowIntegrityTagger,
	clients: ClientRepository,
	groups: GroupRepository,
	series: SecretSeriesRepository,
	content: SecretContentRepository,
	gate: Arc<dyn PermissionCheck>,
}

impl AclRepository {
	pub fn new(pool: SqlitePool, tagger: RowIntegrityTagger, gate: Arc<dyn PermissionCheck>) -> Self {
		Self {
			clients: ClientRepository::new(pool.clone(), tagger.clone()),
			groups: GroupRepository::new(pool.clone()),
			series: SecretSeriesRepository::new(pool.clone(), tagger.clone()),
			content: SecretContentRepository::new(pool.clone(), tagger.clone()),
			pool,
			tagger,
			gate,
		}
	}

	fn check_allowed(
		&self,
		principal: Option<&Principal>,
		action: Action,
		target: Option<&Target>,
	) -> Result<(), DbError> {
		if let Some(principal) = principal {
			self.gate.check_allowed(principal, action, target)?;
		}
		Ok(())
	}

	// =========================================================================
	// Grant and membership mutations
	// =========================================================================

	/// Grant a group read access to a secret.
	///
	/// # Errors
	/// - `DbError::Conflict` when the grant already exists
	/// - `DbError::NotFound` when either endpoint id does not exist
	#[tracing::instrument(skip(self, principal), fields(secret_id, group_id))]
	pub async fn allow_access(
		&self,
		principal: Option<&Principal>,
		secret_id: i64,
		group_id: i64,
	) -> Result<(), DbError> {
		self.check_allowed(principal, Action::Update, None)?;

		let mut tx = self.pool.begin().await?;
		self.allow_access_tx(&mut tx, secret_id, group_id).await?;
		tx.commit().await?;

		tracing::info!(secret_id, group_id, "access granted");
		Ok(())
	}

	pub(crate) async fn allow_access_tx(
		&self,
		conn: &mut SqliteConnection,
		secret_id: i64,
		group_id: i64,
	) -> Result<(), DbError> {
		let row_hmac = self.tagger.tag(
			ACCESSGRANTS_TABLE,
			&[&secret_id.to_string(), &group_id.to_string()],
		);
		sqlx::query("INSERT INTO accessgrants (secretid, groupid, row_hmac) VALUES (?, ?, ?)")
			.bind(secret_id)
			.bind(group_id)
			.bind(&row_hmac)
			.execute(&mut *conn)
			.await
			.map_err(|e| map_junction_insert_error(e, secret_id, group_id))?;
		Ok(())
	}

	/// Revoke a group's access to a secret. Revoking an absent grant is a
	/// no-op.
	///
	/// # Returns
	/// `true` if a grant was removed.
	#[tracing::instrument(skip(self, principal), fields(secret_id, group_id))]
	pub async fn revoke_access(
		&self,
		principal: Option<&Principal>,
		secret_id: i64,
		group_id: i64,
	) -> Result<bool, DbError> {
		self.check_allowed(principal, Action::Update, None)?;

		let mut tx = self.pool.begin().await?;
		let revoked = self.revoke_access_tx(&mut tx, secret_id, group_id).await?;
		tx.commit().await?;

		if revoked {
			tracing::info!(secret_id, group_id, "access revoked");
		}
		Ok(revoked)
	}

	pub(crate) async fn revoke_access_tx(
		&self,
		conn: &mut SqliteConnection,
		secret_id: i64,
		group_id: i64,
	) -> Result<bool, DbError> {
		let result = sqlx::query("DELETE FROM accessgrants WHERE secretid = ? AND groupid = ?")
			.bind(secret_id)
			.bind(group_id)
			.execute(&mut *conn)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	/// Enroll a client in a group.
	///
	/// # Errors
	/// - `DbError::Conflict` when the membership already exists
	/// - `DbError::NotFound` when either endpoint id does not exist
	#[tracing::instrument(skip(self), fields(client_id, group_id))]
	pub async fn enroll_client(&self, client_id: i64, group_id: i64) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;
		self.enroll_client_tx(&mut tx, client_id, group_id).await?;
		tx.commit().await?;

		tracing::info!(client_id, group_id, "client enrolled");
		Ok(())
	}

	pub(crate) async fn enroll_client_tx(
		&self,
		conn: &mut SqliteConnection,
		client_id: i64,
		group_id: i64,
	) -> Result<(), DbError> {
		let row_hmac = self.tagger.tag(
			MEMBERSHIPS_TABLE,
			&[&client_id.to_string(), &group_id.to_string()],
		);
		sqlx::query("INSERT INTO memberships (clientid, groupid, row_hmac) VALUES (?, ?, ?)")
			.bind(client_id)
			.bind(group_id)
			.bind(&row_hmac)
			.execute(&mut *conn)
			.await
			.map_err(|e| map_junction_insert_error(e, client_id, group_id))?;
		Ok(())
	}

	/// Remove a client from a group. Evicting an absent membership is a
	/// no-op.
	#[tracing::instrument(skip(self), fields(client_id, group_id))]
	pub async fn evict_client(&self, client_id: i64, group_id: i64) -> Result<bool, DbError> {
		let mut tx = self.pool.begin().await?;
		let evicted = self.evict_client_tx(&mut tx, client_id, group_id).await?;
		tx.commit().await?;

		if evicted {
			tracing::info!(client_id, group_id, "client evicted");
		}
		Ok(evicted)
	}

	pub(crate) async fn evict_client_tx(
		&self,
		conn: &mut SqliteConnection,
		client_id: i64,
		group_id: i64,
	) -> Result<bool, DbError> {
		let result = sqlx::query("DELETE FROM memberships WHERE clientid = ? AND groupid = ?")
			.bind(client_id)
			.bind(group_id)
			.execute(&mut *conn)
			.await?;
		Ok(result.rows_affected() > 0)
	}

	// =========================================================================
	// Find-and-X variants: resolve endpoints, mutate, audit
	// =========================================================================

	/// Resolve both endpoints, grant access, and record the mutation.
	///
	/// Absence of either endpoint is a `DbError::NotFound`, distinct from the
	/// plain mutation's behavior, so callers can map it to a not-found
	/// response.
	#[tracing::instrument(skip(self, principal, audit), fields(secret_id, group_id))]
	pub async fn find_and_allow_access(
		&self,
		principal: Option<&Principal>,
		secret_id: i64,
		group_id: i64,
		audit: Option<&AuditContext<'_>>,
	) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;
		let (series, group) = self.resolve_grant_endpoints_tx(&mut tx, secret_id, group_id).await?;

		let target = Target::secret(series.name.clone(), series.owner.clone());
		self.check_allowed(principal, Action::Update, Some(&target))?;

		self.allow_access_tx(&mut tx, secret_id, group_id).await?;
		tx.commit().await?;

		tracing::info!(secret_id, group_id, "access granted");
		if let Some(audit) = audit {
			let mut extra = BTreeMap::new();
			extra.insert("group".to_string(), group.name);
			audit.record(EventTag::SecretAddGroup, &series.name, extra).await;
		}
		Ok(())
	}

	/// Resolve both endpoints, revoke access, and record the mutation.
	#[tracing::instrument(skip(self, principal, audit), fields(secret_id, group_id))]
	pub async fn find_and_revoke_access(
		&self,
		principal: Option<&Principal>,
		secret_id: i64,
		group_id: i64,
		audit: Option<&AuditContext<'_>>,
	) -> Result<bool, DbError> {
		let mut tx = self.pool.begin().await?;
		let (series, group) = self.resolve_grant_endpoints_tx(&mut tx, secret_id, group_id).await?;

		let target = Target::secret(series.name.clone(), series.owner.clone());
		self.check_allowed(principal, Action::Update, Some(&target))?;

		let revoked = self.revoke_access_tx(&mut tx, secret_id, group_id).await?;
		tx.commit().await?;

		tracing::info!(secret_id, group_id, revoked, "access revocation applied");
		if let Some(audit) = audit {
			let mut extra = BTreeMap::new();
			extra.insert("group".to_string(), group.name);
			audit.record(EventTag::SecretRemoveGroup, &series.name, extra).await;
		}
		Ok(revoked)
	}

	/// Resolve both endpoints, enroll the client, and record the mutation.
	#[tracing::instrument(skip(self, audit), fields(client_id, group_id))]
	pub async fn find_and_enroll_client(
		&self,
		client_id: i64,
		group_id: i64,
		audit: Option<&AuditContext<'_>>,
	) -> Result<(), DbError> {
		let mut tx = self.pool.begin().await?;
		let (client, group) = self.resolve_membership_endpoints_tx(&mut tx, client_id, group_id).await?;

		self.enroll_client_tx(&mut tx, client_id, group_id).await?;
		tx.commit().await?;

		tracing::info!(client_id, group_id, "client enrolled");
		if let Some(audit) = audit {
			let mut extra = BTreeMap::new();
			extra.insert("client".to_string(), client.name);
			audit.record(EventTag::GroupAddClient, &group.name, extra).await;
		}
		Ok(())
	}

	/// Resolve both endpoints, evict the client, and record the mutation.
	#[tracing::instrument(skip(self, audit), fields(client_id, group_id))]
	pub async fn find_and_evict_client(
		&self,
		client_id: i64,
		group_id: i64,
		audit: Option<&AuditContext<'_>>,
	) -> Result<bool, DbError> {
		let mut tx = self.pool.begin().await?;
		let (client, group) = self.resolve_membership_endpoints_tx(&mut tx, client_id, group_id).await?;

		let evicted = self.evict_client_tx(&mut tx, client_id, group_id).await?;
		tx.commit().await?;

		tracing::info!(client_id, group_id, evicted, "client eviction applied");
		if let Some(audit) = audit {
			let mut extra = BTreeMap::new();
			extra.insert("client".to_string(), client.name);
			audit.record(EventTag::GroupRemoveClient, &group.name, extra).await;
		}
		Ok(evicted)
	}

	async fn resolve_grant_endpoints_tx(
		&self,
		conn: &mut SqliteConnection,
		secret_id: i64,
		group_id: i64,
	) -> Result<(SecretSeries, Group), DbError> {
		let group = self
			.groups
			.get_group_by_id_tx(conn, group_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("group {group_id} not found")))?;
		let series = self
			.series
			.get_secret_series_by_id_tx(conn, secret_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("secret {secret_id} not found")))?;
		Ok((series, group))
	}

	async fn resolve_membership_endpoints_tx(
		&self,
		conn: &mut SqliteConnection,
		client_id: i64,
		group_id: i64,
	) -> Result<(Client, Group), DbError> {
		let client = self
			.clients
			.get_client_by_id_tx(conn, client_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("client {client_id} not found")))?;
		let group = self
			.groups
			.get_group_by_id_tx(conn, group_id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("group {group_id} not found")))?;
		Ok((client, group))
	}

	// =========================================================================
	// Traversals
	// =========================================================================

	/// Groups a client belongs to.
	#[tracing::instrument(skip(self), fields(client = %client_name))]
	pub async fn groups_for_client(&self, client_name: &str) -> Result<Vec<Group>, DbError> {
		let mut conn = self.pool.acquire().await?;
		self.groups_for_client_tx(&mut conn, client_name).await
	}

	pub async fn groups_for_client_tx(
		&self,
		conn: &mut SqliteConnection,
		client_name: &str,
	) -> Result<Vec<Group>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT g.id, g.name, g.description, g.metadata, g.created_at, g.created_by,
			       g.updated_at, g.updated_by,
			       m.clientid AS m_clientid, m.groupid AS m_groupid, m.row_hmac AS m_row_hmac
			FROM groups g
			JOIN memberships m ON g.id = m.groupid
			JOIN clients c ON c.id = m.clientid
			WHERE c.name = ?
			"#,
		)
		.bind(client_name)
		.fetch_all(&mut *conn)
		.await?;

		let mut groups = Vec::with_capacity(rows.len());
		for row in &rows {
			self.verify_junction_row(row, MEMBERSHIPS_TABLE, "m_clientid", "m_groupid", "m_row_hmac")?;
			groups.push(parse_group_row(row)?);
		}
		Ok(groups)
	}

	/// Groups granted access to a secret.
	#[tracing::instrument(skip(self), fields(secret = %secret_name))]
	pub async fn groups_for_secret(&self, secret_name: &str) -> Result<Vec<Group>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT g.id, g.name, g.description, g.metadata, g.created_at, g.created_by,
			       g.updated_at, g.updated_by,
			       ag.secretid AS ag_secretid, ag.groupid AS ag_groupid, ag.row_hmac AS ag_row_hmac
			FROM groups g
			JOIN accessgrants ag ON g.id = ag.groupid
			JOIN secrets s ON s.id = ag.secretid
			WHERE s.name = ?
			"#,
		)
		.bind(secret_name)
		.fetch_all(&self.pool)
		.await?;

		let mut groups = Vec::with_capacity(rows.len());
		for row in &rows {
			self.verify_junction_row(row, ACCESSGRANTS_TABLE, "ag_secretid", "ag_groupid", "ag_row_hmac")?;
			groups.push(parse_group_row(row)?);
		}
		Ok(groups)
	}

	/// Clients enrolled in a group.
	#[tracing::instrument(skip(self), fields(group = %group_name))]
	pub async fn clients_for_group(&self, group_name: &str) -> Result<Vec<Client>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT c.id, c.name, c.description, c.created_at, c.created_by, c.updated_at,
			       c.updated_by, c.enabled, c.automation_allowed, c.row_hmac,
			       m.clientid AS m_clientid, m.groupid AS m_groupid, m.row_hmac AS m_row_hmac
			FROM clients c
			JOIN memberships m ON c.id = m.clientid
			JOIN groups g ON g.id = m.groupid
			WHERE g.name = ?
			"#,
		)
		.bind(group_name)
		.fetch_all(&self.pool)
		.await?;

		let mut clients = Vec::with_capacity(rows.len());
		for row in &rows {
			self.verify_junction_row(row, MEMBERSHIPS_TABLE, "m_clientid", "m_groupid", "m_row_hmac")?;
			clients.push(self.verified_client_row(row)?);
		}
		Ok(clients)
	}

	/// Clients that can reach a secret through any group, deduplicated.
	#[tracing::instrument(skip(self), fields(secret = %secret_name))]
	pub async fn clients_for_secret(&self, secret_name: &str) -> Result<Vec<Client>, DbError> {
		let rows = sqlx::query(
			r#"
			SELECT DISTINCT c.id, c.name, c.description, c.created_at, c.created_by,
			       c.updated_at, c.updated_by, c.enabled, c.automation_allowed, c.row_hmac
			FROM clients c
			JOIN memberships m ON c.id = m.clientid
			JOIN accessgrants ag ON m.groupid = ag.groupid
			JOIN secrets s ON s.id = ag.secretid
			WHERE s.name = ?
			ORDER BY c.id ASC
			"#,
		)
		.bind(secret_name)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(|r| self.verified_client_row(r)).collect()
	}

	/// Secrets granted to a group.
	#[tracing::instrument(skip(self, principal), fields(group = %group_name))]
	pub async fn secrets_for_group(
		&self,
		principal: Option<&Principal>,
		group_name: &str,
	) -> Result<Vec<SecretSeries>, DbError> {
		self.check_allowed(principal, Action::Read, None)?;

		let rows = sqlx::query(
			r#"
			SELECT s.id, s.name, s.description, s.type, s.owner, s.generation_options,
			       s.current, s.row_hmac, s.created_at, s.created_by, s.updated_at, s.updated_by,
			       ag.secretid AS ag_secretid, ag.groupid AS ag_groupid, ag.row_hmac AS ag_row_hmac
			FROM secrets s
			JOIN accessgrants ag ON s.id = ag.secretid
			JOIN groups g ON g.id = ag.groupid
			WHERE g.name = ?
			ORDER BY s.id ASC
			"#,
		)
		.bind(group_name)
		.fetch_all(&self.pool)
		.await?;

		let mut secrets = Vec::with_capacity(rows.len());
		for row in &rows {
			self.verify_junction_row(row, ACCESSGRANTS_TABLE, "ag_secretid", "ag_groupid", "ag_row_hmac")?;
			secrets.push(self.series.verified_series(row)?);
		}
		Ok(secrets)
	}

	/// The two-hop reachable-secret set of a client: the union over its
	/// groups of each group's granted secrets.
	///
	/// A secret reachable through several memberships appears exactly once.
	#[tracing::instrument(skip(self, principal), fields(client = %client_name))]
	pub async fn secrets_for_client(
		&self,
		principal: Option<&Principal>,
		client_name: &str,
	) -> Result<Vec<SecretSeries>, DbError> {
		self.check_allowed(principal, Action::Read, None)?;

		let rows = sqlx::query(
			r#"
			SELECT DISTINCT s.id, s.name, s.description, s.type, s.owner, s.generation_options,
			       s.current, s.row_hmac, s.created_at, s.created_by, s.updated_at, s.updated_by
			FROM secrets s
			JOIN accessgrants ag ON s.id = ag.secretid
			JOIN memberships m ON ag.groupid = m.groupid
			JOIN clients c ON c.id = m.clientid
			WHERE c.name = ?
			ORDER BY s.id ASC
			"#,
		)
		.bind(client_name)
		.fetch_all(&self.pool)
		.await?;

		rows.iter().map(|r| self.series.verified_series(r)).collect()
	}

	/// Combined existence and access check: the secret is returned only when
	/// it exists *and* is reachable from the client. Callers cannot
	/// distinguish "absent" from "denied" through this call; the existence
	/// side is checked one layer up when a distinct response is needed.
	///
	/// # Arguments
	/// * `version` - legacy version label to resolve; `None` resolves the
	///   current revision
	#[tracing::instrument(skip(self, principal), fields(client = %client_name, secret = %secret_name))]
	pub async fn secret_for_client(
		&self,
		principal: Option<&Principal>,
		client_name: &str,
		secret_name: &str,
		version: Option<&str>,
	) -> Result<Option<SecretSeriesAndContent>, DbError> {
		self.check_allowed(principal, Action::Read, None)?;

		let mut tx = self.pool.begin().await?;

		let row = sqlx::query(
			r#"
			SELECT DISTINCT s.id, s.name, s.description, s.type, s.owner, s.generation_options,
			       s.current, s.row_hmac, s.created_at, s.created_by, s.updated_at, s.updated_by
			FROM secrets s
			JOIN secrets_content sc ON s.id = sc.secretid
			JOIN accessgrants ag ON s.id = ag.secretid
			JOIN memberships m ON ag.groupid = m.groupid
			JOIN clients c ON c.id = m.clientid
			WHERE s.name = ? AND c.name = ?
			"#,
		)
		.bind(secret_name)
		.bind(client_name)
		.fetch_optional(&mut *tx)
		.await?;

		let Some(row) = row else {
			return Ok(None);
		};
		let series = self.series.verified_series(&row)?;

		let content = match version {
			Some(label) => {
				let row = sqlx::query(
					r#"
					SELECT id, secretid, encrypted_content, content_hmac, version, metadata,
					       expiry, row_hmac, created_at, created_by, updated_at, updated_by
					FROM secrets_content
					WHERE secretid = ? AND version = ?
					"#,
				)
				.bind(series.id)
				.bind(label)
				.fetch_optional(&mut *tx)
				.await?;
				match row {
					Some(row) => self.content.verified_content(&row)?,
					None => return Ok(None),
				}
			}
			None => {
				let Some(current_id) = series.current_version else {
					return Ok(None);
				};
				match self.content.get_secret_content_by_id_tx(&mut tx, current_id).await? {
					Some(content) => content,
					None => return Ok(None),
				}
			}
		};
		tx.commit().await?;

		Ok(Some(SecretSeriesAndContent { series, content }))
	}

	/// The subset of the named secrets the client may access. Used instead
	/// of N separate permission checks.
	#[tracing::instrument(skip(self, principal, names), fields(client = %client_name, count = names.len()))]
	pub async fn secrets_for_client_by_names(
		&self,
		principal: Option<&Principal>,
		client_name: &str,
		names: &[String],
	) -> Result<Vec<SecretSeries>, DbError> {
		self.check_allowed(principal, Action::Read, None)?;

		if names.is_empty() {
			return Ok(Vec::new());
		}

		let placeholders = vec!["?"; names.len()].join(", ");
		let sql = format!(
			r#"
			SELECT DISTINCT s.id, s.name, s.description, s.type, s.owner, s.generation_options,
			       s.current, s.row_hmac, s.created_at, s.created_by, s.updated_at, s.updated_by
			FROM secrets s
			JOIN accessgrants ag ON s.id = ag.secretid
			JOIN memberships m ON ag.groupid = m.groupid
			JOIN clients c ON c.id = m.clientid
			WHERE c.name = ? AND s.name IN ({placeholders})
			ORDER BY s.id ASC
			"#
		);

		let mut query = sqlx::query(&sql).bind(client_name);
		for name in names {
			query = query.bind(name);
		}
		let rows = query.fetch_all(&self.pool).await?;

		rows.iter().map(|r| self.series.verified_series(r)).collect()
	}

	// =========================================================================
	// Row verification helpers
	// =========================================================================

	fn verify_junction_row(
		&self,
		row: &sqlx::sqlite::SqliteRow,
		table: &str,
		left_col: &str,
		right_col: &str,
		hmac_col: &str,
	) -> Result<(), DbError> {
		let left: i64 = row.get(left_col);
		let right: i64 = row.get(right_col);
		let stored: Option<String> = row.get(hmac_col);

		if !self.tagger.verify(
			stored.as_deref().unwrap_or(""),
			table,
			&[&left.to_string(), &right.to_string()],
		) {
			return Err(DbError::IntegrityViolation(format!(
				"{table} row ({left}, {right}) failed integrity verification"
			)));
		}
		Ok(())
	}

	fn verified_client_row(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Client, DbError> {
		let id: i64 = row.get("id");
		let name: String = row.get("name");
		let stored: Option<String> = row.get("row_hmac");

		if !self
			.tagger
			.verify(stored.as_deref().unwrap_or(""), "clients", &[&name, &id.to_string()])
		{
			return Err(DbError::IntegrityViolation(format!(
				"client row {id} failed integrity verification"
			)));
		}

		let enabled: i64 = row.get("enabled");
		let automation_allowed: i64 = row.get("automation_allowed");
		Ok(Client {
			id,
			name,
			description: row.get("description"),
			created_at: row.get("created_at"),
			created_by: row.get("created_by"),
			updated_at: row.get("updated_at"),
			updated_by: row.get("updated_by"),
			enabled: enabled != 0,
			automation_allowed: automation_allowed != 0,
		})
	}
}

fn map_junction_insert_error(err: sqlx::Error, left: i64, right: i64) -> DbError {
	match err.as_database_error() {
		Some(db) if db.is_unique_violation() => {
			DbError::Conflict(format!("relation ({left}, {right}) already exists"))
		}
		Some(db) if db.is_foreign_key_violation() => {
			DbError::NotFound(format!("relation endpoint ({left}, {right}) does not exist"))
		}
		_ => DbError::Sqlx(err),
	}
}
