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

//! Credential seam
//!
//! Signing the upgrade request is left to the embedding application. An
//! instance only asks for fresh headers when its connection is closed.

use crate::error::AuthError;
use async_trait::async_trait;
use boilingdata_ws::HeaderMap;

#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Log in and return a short-lived identity token
    async fn authenticate(&self) -> Result<String, AuthError>;

    /// Produce the signed headers for the next WebSocket upgrade
    async fn signed_headers(&self, id_token: &str) -> Result<HeaderMap, AuthError>;
}

/// Authenticator that hands out a fixed token and header set
///
/// Useful for endpoints that take a pre-signed header, and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticHeaders {
    id_token: String,
    headers: HeaderMap,
}

impl StaticHeaders {
    pub fn new(id_token: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            id_token: id_token.into(),
            headers,
        }
    }
}

#[async_trait]
impl Authenticator for StaticHeaders {
    async fn authenticate(&self) -> Result<String, AuthError> {
        Ok(self.id_token.clone())
    }

    async fn signed_headers(&self, _id_token: &str) -> Result<HeaderMap, AuthError> {
        Ok(self.headers.clone())
    }
}
