//! Password onboarding of chat users.
//!
//! Each configured password admits one segment of
//! [`PASSWORD_SEGMENT_SIZE`] users: the first segment uses the first
//! password, and so on. Authorized identities persist in a [`DurableSet`].

use std::collections::HashSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PASSWORD_SEGMENT_SIZE;
use crate::store::DurableSet;

/// What happened to an unauthorized user's message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthOutcome {
    /// The user was asked for the password.
    Prompted,
    Accepted,
    /// Wrong password; the user may try again.
    Rejected,
    /// No room for new users.
    CapacityReached,
}

pub struct AccessGate {
    passwords: Vec<String>,
    users: DurableSet,
    awaiting: Mutex<HashSet<i64>>,
}

impl AccessGate {
    pub fn new(passwords: Vec<String>, users: DurableSet) -> Self {
        Self {
            passwords,
            users,
            awaiting: Mutex::new(HashSet::new()),
        }
    }

    pub fn users(&self) -> &DurableSet {
        &self.users
    }

    pub fn is_authorized(&self, user_id: i64) -> bool {
        self.users.contains(user_id)
    }

    pub fn capacity(&self) -> usize {
        self.passwords.len() * PASSWORD_SEGMENT_SIZE
    }

    pub fn is_capacity_reached(&self) -> bool {
        self.passwords.is_empty() || self.users.len() >= self.capacity()
    }

    /// The password the next user must send.
    pub fn expected_password(&self) -> Option<&str> {
        self.passwords
            .get(self.users.len() / PASSWORD_SEGMENT_SIZE)
            .map(String::as_str)
    }

    pub fn is_awaiting(&self, user_id: i64) -> bool {
        self.awaiting.lock().contains(&user_id)
    }

    /// Ask `user_id` for the password, unless there is no room left.
    pub fn prompt(&self, user_id: i64) -> AuthOutcome {
        if self.is_capacity_reached() {
            self.awaiting.lock().remove(&user_id);
            return AuthOutcome::CapacityReached;
        }
        self.awaiting.lock().insert(user_id);
        AuthOutcome::Prompted
    }

    /// Handle a text message from a user who is not authorized yet.
    pub fn submit(&self, user_id: i64, text: &str) -> AuthOutcome {
        let Some(expected) = self
            .expected_password()
            .filter(|_| !self.is_capacity_reached())
        else {
            self.awaiting.lock().remove(&user_id);
            return AuthOutcome::CapacityReached;
        };

        let text = text.trim();
        if !self.is_awaiting(user_id) || text.is_empty() {
            return self.prompt(user_id);
        }

        if text == expected {
            self.awaiting.lock().remove(&user_id);
            self.users.add(user_id);
            info!(user_id, authorized = self.users.len(), "User authorized");
            AuthOutcome::Accepted
        } else {
            AuthOutcome::Rejected
        }
    }
}
