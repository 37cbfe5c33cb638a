// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod acl;
pub mod backfill;
pub mod client;
pub mod error;
pub mod group;
pub mod pool;
pub mod schema;
pub mod secret;
pub mod secret_content;
pub mod secret_series;
pub mod testing;
pub mod types;

pub use acl::{AclRepository, AuditContext};
pub use backfill::{BackfillReport, BackfillRunner};
pub use client::ClientRepository;
pub use error::DbError;
pub use group::GroupRepository;
pub use pool::create_pool;
pub use schema::create_schema;
pub use secret::{NewSecret, SecretRepository};
pub use secret_content::SecretContentRepository;
pub use secret_series::SecretSeriesRepository;
pub use types::{Client, Group, SecretContent, SecretSeries, SecretSeriesAndContent};
