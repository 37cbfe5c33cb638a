// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

pub mod batch;
pub mod config;
pub mod controller;
pub mod cursor;
pub mod error;

pub use batch::{BatchCoordinator, BatchMode, BatchOpResult, CreateOrUpdateSecretOp};
pub use config::{OwnerStrategy, SecretsConfig};
pub use controller::{Secret, SecretBuilder, SecretController, SecretListPage};
pub use cursor::SecretCursor;
pub use error::{Result, SecretsError};
