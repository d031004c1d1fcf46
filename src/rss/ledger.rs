//! Per-subscriber delivery ledger and reconciliation.
//!
//! A [`Ledger`] records which item identities were already delivered to one
//! subscriber for one subscription. [`reconcile`] compares it with a fresh
//! fetch and yields the items that still need delivering. Reconciliation is
//! pure: persisting the updated ledger is up to the caller, and only needed
//! when [`Reconciliation::changed`] is set.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use super::types::{Item, ItemId};

/// Delivery metadata for one item identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryRecord {
    /// When the item was recorded as delivered.
    pub delivered_at: DateTime<Utc>,
}

/// Delivered item identities for one (subscriber, subscription) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ledger {
    entries: BTreeMap<ItemId, DeliveryRecord>,
    high_watermark: Option<DateTime<Utc>>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ledger that marks every item of an initial fetch as delivered.
    ///
    /// Used on subscribe so that existing items never produce notifications.
    pub fn seeded(items: &[Item], now: DateTime<Utc>) -> Self {
        let mut ledger = Self::new();
        for item in items.iter().filter(|item| !item.id.is_empty()) {
            ledger.record(item.id.clone(), now);
        }
        ledger.high_watermark = items.iter().filter_map(|item| item.published_at).max();
        ledger
    }

    /// Record an identity as delivered at `delivered_at`.
    pub fn record(&mut self, id: ItemId, delivered_at: DateTime<Utc>) {
        self.entries.insert(id, DeliveryRecord { delivered_at });
    }

    /// Whether an identity has been delivered.
    pub fn contains(&self, id: &ItemId) -> bool {
        self.entries.contains_key(id)
    }

    /// Delivery metadata for an identity.
    pub fn get(&self, id: &ItemId) -> Option<&DeliveryRecord> {
        self.entries.get(id)
    }

    /// Number of recorded identities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over recorded identities in identity order.
    pub fn iter(&self) -> impl Iterator<Item = (&ItemId, &DeliveryRecord)> {
        self.entries.iter()
    }

    /// Latest publish time admitted so far, if tracked.
    pub fn high_watermark(&self) -> Option<DateTime<Utc>> {
        self.high_watermark
    }

    /// Replace the high-watermark.
    pub fn set_high_watermark(&mut self, watermark: Option<DateTime<Utc>>) {
        self.high_watermark = watermark;
    }
}

/// Which never-seen items reconciliation admits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Admit every identity not in the ledger.
    #[default]
    All,
    /// Additionally skip items published before the ledger's high-watermark.
    ///
    /// Items without a publish time are still admitted.
    Watermark,
}

impl AdmissionPolicy {
    /// Policy for the `use_watermark` configuration flag.
    pub fn from_flag(use_watermark: bool) -> Self {
        if use_watermark {
            AdmissionPolicy::Watermark
        } else {
            AdmissionPolicy::All
        }
    }
}

/// Outcome of reconciling a ledger against a fresh fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// Items to deliver, in fetch order.
    pub new_items: Vec<Item>,
    /// The ledger after eviction and admission.
    pub ledger: Ledger,
    /// Whether the ledger differs from the input and must be persisted.
    pub changed: bool,
}

/// Reconcile `ledger` with the items of a fresh fetch.
///
/// 1. Identities in the ledger but absent from `fresh` are evicted, so an
///    item that later reappears is delivered again.
/// 2. Items of `fresh` whose identity is not in the ledger are recorded
///    with `now` and returned in fetch order.
/// 3. Items already in the ledger are skipped.
///
/// Items with an empty identity are ignored entirely.
pub fn reconcile(
    ledger: &Ledger,
    fresh: &[Item],
    policy: AdmissionPolicy,
    now: DateTime<Utc>,
) -> Reconciliation {
    let present: HashSet<&ItemId> = fresh
        .iter()
        .map(|item| &item.id)
        .filter(|id| !id.is_empty())
        .collect();

    let mut updated = ledger.clone();
    let before = updated.entries.len();
    updated.entries.retain(|id, _| present.contains(id));
    let mut changed = updated.entries.len() != before;

    let watermark = ledger.high_watermark;
    let mut newest_admitted: Option<DateTime<Utc>> = None;
    let mut new_items = Vec::new();

    for item in fresh {
        if item.id.is_empty() || updated.contains(&item.id) {
            continue;
        }

        if policy == AdmissionPolicy::Watermark {
            if let (Some(watermark), Some(published_at)) = (watermark, item.published_at) {
                if published_at < watermark {
                    continue;
                }
            }
        }

        updated.record(item.id.clone(), now);
        if let Some(published_at) = item.published_at {
            newest_admitted = newest_admitted.max(Some(published_at));
        }
        new_items.push(item.clone());
        changed = true;
    }

    if policy == AdmissionPolicy::Watermark && newest_admitted > watermark {
        updated.high_watermark = newest_admitted;
    }

    Reconciliation {
        new_items,
        ledger: updated,
        changed,
    }
}
