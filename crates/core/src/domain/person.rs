use std::fmt;

use serde::{Deserialize, Serialize};

/// Case-insensitive identity key for approvers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmailKey(String);

impl EmailKey {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, raw: &str) -> bool {
        self.0 == raw.trim().to_ascii_lowercase()
    }
}

impl fmt::Display for EmailKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Value snapshot of someone in the org chart. Chains copy these at
/// assignment time so later directory edits do not rewrite history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub department: String,
}

impl Person {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        role: impl Into<String>,
        department: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            role: role.into(),
            department: department.into(),
        }
    }

    pub fn email_key(&self) -> EmailKey {
        EmailKey::new(&self.email)
    }

    pub fn has_email(&self, raw: &str) -> bool {
        self.email_key().matches(raw)
    }

    pub fn same_identity(&self, other: &Person) -> bool {
        self.email_key() == other.email_key()
    }

    pub(crate) fn in_department(mut self, department: &str) -> Self {
        if self.department.trim().is_empty() {
            self.department = department.to_string();
        }
        self
    }
}
