// src/sync/subscription.rs

//! Subscription filtering
//!
//! Decides which log entries a peer subscription should see. Table
//! subscriptions match on table name; record subscriptions additionally
//! check the entry's primary key against the subscription filter; query
//! subscriptions match the table dimension only, with predicate evaluation
//! left to the host. Expired subscriptions see nothing.

use crate::hash::canonical_json;
use crate::sync::log::SyncLogEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionType {
    Record,
    Table,
    Query,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSubscription {
    pub subscription_id: String,
    pub origin_id: String,
    #[serde(rename = "type")]
    pub subscription_type: SubscriptionType,
    pub table_name: String,
    pub filter: Option<String>,
    pub created_at: String,
    pub expires_at: Option<String>,
}

impl SyncSubscription {
    /// Strict precedence: a subscription expiring exactly at `now` is still live
    pub fn is_expired(&self, now: &str) -> bool {
        match &self.expires_at {
            Some(expires_at) => expires_at.as_str() < now,
            None => false,
        }
    }
}

/// Whether `entry` should be delivered to `subscription` at time `now`
pub fn matches(entry: &SyncLogEntry, subscription: &SyncSubscription, now: &str) -> bool {
    if subscription.is_expired(now) {
        return false;
    }
    if !entry
        .table_name
        .eq_ignore_ascii_case(&subscription.table_name)
    {
        return false;
    }
    match subscription.subscription_type {
        SubscriptionType::Table | SubscriptionType::Query => true,
        SubscriptionType::Record => match &subscription.filter {
            Some(filter) => pk_in_filter(&entry.pk_value, filter),
            None => false,
        },
    }
}

/// Entries a subscription should see, in original order
pub fn filter_entries<'a>(
    entries: &'a [SyncLogEntry],
    subscription: &SyncSubscription,
    now: &str,
) -> Vec<&'a SyncLogEntry> {
    entries
        .iter()
        .filter(|e| matches(e, subscription, now))
        .collect()
}

/// A record filter is ideally a JSON array containing the entry's PK (either
/// the whole PK object or a bare value for single-column keys); non-JSON
/// filters fall back to a substring check.
fn pk_in_filter(pk: &Value, filter: &str) -> bool {
    let candidates = pk_candidates(pk);
    match serde_json::from_str::<Value>(filter) {
        Ok(Value::Array(items)) => items.iter().any(|item| {
            let rendered = scalar_string(item).unwrap_or_else(|| canonical_json(item));
            candidates.iter().any(|c| c == &rendered)
        }),
        _ => candidates.iter().any(|c| filter.contains(c.as_str())),
    }
}

fn pk_candidates(pk: &Value) -> Vec<String> {
    let mut candidates = vec![canonical_json(pk)];
    if let Value::Object(map) = pk {
        for value in map.values() {
            if let Some(s) = scalar_string(value) {
                candidates.push(s);
            }
        }
    }
    candidates
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
