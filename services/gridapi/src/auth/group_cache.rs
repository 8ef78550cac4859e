//! Group→role cache.
//!
//! # Purpose
//! Holds an immutable, versioned snapshot of the group→role mappings so that
//! role resolution on the request path never touches the store or a lock.
//!
//! # Key invariants
//! - Readers do a single atomic load and always see a complete snapshot.
//! - Refresh rebuilds the whole map from the store and publishes it with a
//!   single atomic store; the generation grows by one per successful refresh.
//! - Refreshes are serialized so generations are published in order.
//! - A failed refresh keeps the previous snapshot and is retried on the next
//!   tick.
use crate::model::GroupRoleAssignment;
use crate::observability::{GROUP_CACHE_GENERATION, GROUP_CACHE_REFRESHES};
use crate::store::{CredentialStore, StoreResult};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use grid_authz::{PrincipalKind, namespaced};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

/// One published generation of the group→role mappings.
#[derive(Debug, Clone)]
pub struct GroupRoleSnapshot {
    pub generation: u64,
    /// Bare group name → namespaced roles.
    pub mappings: HashMap<String, Vec<String>>,
    pub refreshed_at: DateTime<Utc>,
}

impl GroupRoleSnapshot {
    pub fn empty() -> Self {
        Self {
            generation: 0,
            mappings: HashMap::new(),
            refreshed_at: Utc::now(),
        }
    }

    fn build(generation: u64, assignments: Vec<GroupRoleAssignment>) -> Self {
        let mut mappings: HashMap<String, Vec<String>> = HashMap::new();
        for assignment in assignments {
            let role = namespaced(PrincipalKind::Role, &assignment.role);
            let roles = mappings.entry(bare_group(&assignment.group).to_string()).or_default();
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        Self {
            generation,
            mappings,
            refreshed_at: Utc::now(),
        }
    }

    /// Roles reachable from `groups`, in group order, without duplicates.
    pub fn roles_for<'a>(&self, groups: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut roles = Vec::new();
        for group in groups {
            let Some(mapped) = self.mappings.get(bare_group(group)) else {
                continue;
            };
            for role in mapped {
                if !roles.contains(role) {
                    roles.push(role.clone());
                }
            }
        }
        roles
    }
}

fn bare_group(group: &str) -> &str {
    group
        .strip_prefix(PrincipalKind::Group.prefix())
        .unwrap_or(group)
}

pub struct GroupRoleCache {
    store: Arc<dyn CredentialStore>,
    current: ArcSwap<GroupRoleSnapshot>,
    refresh_lock: Mutex<()>,
}

impl GroupRoleCache {
    /// Cache with an empty generation-0 snapshot. Call [`Self::refresh`]
    /// before serving traffic.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            current: ArcSwap::from_pointee(GroupRoleSnapshot::empty()),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Build and load the first snapshot (process start trigger).
    pub async fn load(store: Arc<dyn CredentialStore>) -> StoreResult<Self> {
        let cache = Self::new(store);
        cache.refresh().await?;
        Ok(cache)
    }

    /// Current snapshot. Holding the `Arc` pins that generation; a concurrent
    /// refresh does not change what the caller sees.
    pub fn snapshot(&self) -> Arc<GroupRoleSnapshot> {
        self.current.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.current.load().generation
    }

    /// Rebuild the full mapping from the store and swap it in. Returns the
    /// new generation.
    ///
    /// # Errors
    /// - Store failures, counted as `outcome="error"`. The previous snapshot
    ///   stays live and the generation does not move.
    pub async fn refresh(&self) -> StoreResult<u64> {
        let _guard = self.refresh_lock.lock().await;
        let assignments = match self.store.list_group_roles().await {
            Ok(assignments) => assignments,
            Err(err) => {
                metrics::counter!(GROUP_CACHE_REFRESHES, "outcome" => "error").increment(1);
                tracing::warn!(error = %err, "group role cache refresh failed");
                return Err(err);
            }
        };
        let generation = self.current.load().generation + 1;
        let snapshot = GroupRoleSnapshot::build(generation, assignments);
        let groups = snapshot.mappings.len();
        self.current.store(Arc::new(snapshot));
        metrics::counter!(GROUP_CACHE_REFRESHES, "outcome" => "ok").increment(1);
        metrics::gauge!(GROUP_CACHE_GENERATION).set(generation as f64);
        tracing::info!(generation, groups, "group role cache refreshed");
        Ok(generation)
    }

    /// Refresh on a fixed interval until `shutdown` flips to `true`.
    pub fn spawn_refresher(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; startup already refreshed.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Errors are logged inside refresh and retried next tick.
                        let _ = cache.refresh().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("group role refresher stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
