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

//! Thread-safe registry of instances, one per user

use crate::auth::Authenticator;
use crate::error::{InstanceError, Result};
use crate::instance::Instance;
use boilingdata_ws::{ClientConfig, WssClient};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Read the `email` claim of an identity token
///
/// The signature is not verified: the token only selects an instance that
/// was created with real credentials earlier.
pub fn token_user(token: &str) -> Result<String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<Map<String, Value>>(
        token,
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .map_err(|e| InstanceError::InvalidToken(e.to_string()))?;

    match data.claims.get("email") {
        Some(Value::String(email)) => Ok(email.clone()),
        Some(_) => Err(InstanceError::InvalidToken(
            "Failed to convert username claim to string".to_string(),
        )),
        None => Err(InstanceError::InvalidToken("missing email claim".to_string())),
    }
}

/// Instances keyed by user name
///
/// Every instance gets its own client built from the registry's config.
pub struct Registry<A> {
    config: ClientConfig,
    instances: Mutex<HashMap<String, Arc<Instance<A>>>>,
}

impl<A: Authenticator> Registry<A> {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Return the user's instance, creating it with `auth` on first use
    ///
    /// `auth` is only called when no instance exists yet; an existing
    /// instance keeps the credentials it was created with.
    pub fn get_or_create(&self, user: &str, auth: impl FnOnce() -> A) -> Arc<Instance<A>> {
        let mut instances = self.lock();
        let instance = instances.entry(user.to_string()).or_insert_with(|| {
            debug!(user = %user, "Creating instance");
            Arc::new(Instance::new(WssClient::new(self.config.clone()), auth()))
        });
        Arc::clone(instance)
    }

    pub fn get(&self, user: &str) -> Option<Arc<Instance<A>>> {
        self.lock().get(user).cloned()
    }

    /// Look an instance up by the user named in an identity token
    pub fn get_by_token(&self, token: &str) -> Result<Arc<Instance<A>>> {
        let user = token_user(token)?;
        self.get(&user).ok_or(InstanceError::UnknownUser(user))
    }

    /// Forget the user's instance
    ///
    /// The connection is left as is; it closes on its idle timeout or when
    /// the returned instance is closed.
    pub fn remove(&self, user: &str) -> Option<Arc<Instance<A>>> {
        let removed = self.lock().remove(user);
        if removed.is_some() {
            debug!(user = %user, "Removed instance");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.lock().keys().cloned().collect();
        users.sort();
        users
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Instance<A>>>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
