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

//! Errors surfaced by instances and the registry

use boilingdata_ws::ClientError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, InstanceError>;

/// Failure reported by an `Authenticator`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct AuthError(pub String);

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstanceError {
    #[error("Error : {0}")]
    Auth(AuthError),

    #[error("Error Signing wssUrl: {0}")]
    Signing(AuthError),

    /// The connection was still closed after dialing
    #[error("{0}")]
    Connect(String),

    #[error(transparent)]
    Client(#[from] ClientError),

    /// The service answered without any rows
    #[error("No data in response")]
    NoData,

    #[error("Invalid token claims: {0}")]
    InvalidToken(String),

    #[error("Token not valid, please login using credentials")]
    UnknownUser(String),
}
