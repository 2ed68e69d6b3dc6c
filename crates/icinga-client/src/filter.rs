//! Local notification filters.
//!
//! A [`Filter`] is a set of field-equality predicates; unset (empty) fields
//! are ignored. Filters are grouped into a [`FilterSet`] which matches either
//! disjunctively (`Any`) or conjunctively (`All`). The supervisor applies the
//! configured set as an admission filter before the decision engine.

use crate::event::Notification;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

/// Field-equality predicates over a notification. Empty fields are unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Filter {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub host: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub author: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(rename = "notification_type", skip_serializing_if = "String::is_empty")]
    pub notification_type: String,
}

impl Filter {
    fn is_empty(&self) -> bool {
        self.host.is_empty()
            && self.service.is_empty()
            && self.users.is_empty()
            && self.author.is_empty()
            && self.text.is_empty()
            && self.notification_type.is_empty()
    }

    /// True if every set field matches the notification.
    ///
    /// For `users`, every user of the notification must appear in the
    /// filter's list. The comparison is shallow; the check result is not
    /// considered.
    pub fn all(&self, n: &Notification) -> bool {
        if !self.author.is_empty() && self.author != n.author {
            return false;
        }
        if !self.host.is_empty() && self.host != n.host {
            return false;
        }
        if !self.notification_type.is_empty() && self.notification_type != n.notification_type {
            return false;
        }
        if !self.service.is_empty() && self.service != n.service {
            return false;
        }
        if !self.text.is_empty() && self.text != n.text {
            return false;
        }
        if !self.users.is_empty() && !n.users.iter().all(|u| self.users.contains(u)) {
            return false;
        }
        true
    }

    /// True if at least one set field matches the notification.
    ///
    /// For `users`, one common user suffices. An empty filter matches
    /// everything.
    pub fn any(&self, n: &Notification) -> bool {
        if self.is_empty() {
            return true;
        }
        if !self.author.is_empty() && self.author == n.author {
            return true;
        }
        if !self.host.is_empty() && self.host == n.host {
            return true;
        }
        if !self.notification_type.is_empty() && self.notification_type == n.notification_type {
            return true;
        }
        if !self.service.is_empty() && self.service == n.service {
            return true;
        }
        if !self.text.is_empty() && self.text == n.text {
            return true;
        }
        if !self.users.is_empty() && self.users.iter().any(|u| n.users.contains(u)) {
            return true;
        }
        false
    }
}

// ---------------------------------------------------------------------------
// FilterSet
// ---------------------------------------------------------------------------

/// A set of filters with disjunctive or conjunctive matching.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterSet {
    /// Matches when any member filter matches all of its set fields.
    Any(Vec<Filter>),
    /// Matches when every member filter matches at least one of its set fields.
    All(Vec<Filter>),
}

impl FilterSet {
    pub fn matches(&self, n: &Notification) -> bool {
        match self {
            FilterSet::Any(filters) => filters.iter().any(|f| f.all(n)),
            FilterSet::All(filters) => filters.iter().all(|f| f.any(n)),
        }
    }
}
