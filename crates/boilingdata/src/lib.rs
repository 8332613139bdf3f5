// Copyright (C) 2025 Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

//! # BoilingData instances
//!
//! Host-facing layer over `boilingdata-ws`: an [`Instance`] pairs one client
//! with an [`Authenticator`] and reconnects on demand, and a [`Registry`]
//! keeps one instance per user.
//!
//! ```no_run
//! use boilingdata::{Registry, StaticHeaders};
//! use boilingdata_ws::ClientConfig;
//!
//! # async fn run() -> boilingdata::Result<()> {
//! let registry = Registry::new(ClientConfig::new("wss://example.invalid/dev"));
//! let instance = registry.get_or_create("ada@example.com", StaticHeaders::default);
//! let response = instance.query_sql("SELECT 1 AS one").await?;
//! println!("{:?}", response.keys);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod instance;
pub mod registry;

pub use auth::{Authenticator, StaticHeaders};
pub use error::{AuthError, InstanceError, Result};
pub use instance::Instance;
pub use registry::{Registry, token_user};
