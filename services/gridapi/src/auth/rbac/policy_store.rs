//! Engine adapter between persisted policy rows and the in-memory engine.
//!
//! # Key invariants
//! - Loads skip blank rows, collapse duplicates and drop (with a warning)
//!   rows that do not parse, so one bad row cannot take the table down.
//! - Every tuple is validated before anything reaches the store.
//! - Mutations are written in one store transaction, then the engine is
//!   rebuilt from the full table and swapped in atomically. Readers never
//!   observe a half-applied batch.
//! - A failed write leaves both the table and the live engine untouched.
use crate::auth::error::AuthError;
use crate::store::CredentialStore;
use grid_authz::{
    AUTHENTICATED_ROLE, Action, PermissionRule, PolicyEngine, PolicyFilter, PolicyTuple,
    normalize_rows_skipping_invalid,
};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Scope that confines a rule to the caller's own data.
pub const SELF_SCOPE: &str = "principal_id == caller_id";

/// Rules letting every principal list and revoke its own sessions and read
/// its own permissions. Seeded into an empty table at startup.
pub fn self_service_policy() -> Vec<PolicyTuple> {
    [
        Action::SessionList,
        Action::SessionRevoke,
        Action::PermissionRead,
    ]
    .into_iter()
    .map(|action| {
        PolicyTuple::Permission(PermissionRule::allow(
            AUTHENTICATED_ROLE,
            action.object_type().as_str(),
            action.as_str(),
            SELF_SCOPE,
        ))
    })
    .collect()
}

/// Serializes policy writes and keeps the live engine in step with the table.
pub struct PolicyTupleStore {
    store: Arc<dyn CredentialStore>,
    engine: Arc<PolicyEngine>,
    write_lock: Mutex<()>,
}

impl PolicyTupleStore {
    /// Load every persisted row and build the first engine generation.
    ///
    /// # Errors
    /// - [`AuthError::Storage`] when the table cannot be read.
    /// - [`AuthError::Policy`] when the engine rejects the model.
    pub async fn load(store: Arc<dyn CredentialStore>) -> Result<Self, AuthError> {
        let rows = store.load_policy_rows().await?;
        let tuples = normalize_rows_skipping_invalid(&rows);
        let engine = Arc::new(PolicyEngine::from_tuples(&tuples).await?);
        tracing::info!(tuples = tuples.len(), "policy engine loaded");
        Ok(Self {
            store,
            engine,
            write_lock: Mutex::new(()),
        })
    }

    pub fn engine(&self) -> Arc<PolicyEngine> {
        self.engine.clone()
    }

    /// Every parseable tuple in the table. Bad rows are skipped.
    pub async fn load_all(&self) -> Result<Vec<PolicyTuple>, AuthError> {
        let rows = self.store.load_policy_rows().await?;
        Ok(normalize_rows_skipping_invalid(&rows))
    }

    pub async fn load_filtered(&self, filter: &PolicyFilter) -> Result<Vec<PolicyTuple>, AuthError> {
        let rows = self.store.load_filtered_policy_rows(filter).await?;
        Ok(normalize_rows_skipping_invalid(&rows))
    }

    /// Remove then add in one transaction and reload the engine. Returns the
    /// new engine generation.
    ///
    /// # Errors
    /// - [`AuthError::InvalidPolicy`] if any added tuple is malformed; the
    ///   store is not touched.
    /// - [`AuthError::Storage`] if the transaction fails.
    pub async fn apply_batch(
        &self,
        add: &[PolicyTuple],
        remove: &[PolicyTuple],
    ) -> Result<u64, AuthError> {
        validate_all(add)?;
        let _guard = self.write_lock.lock().await;
        let add_rows: Vec<_> = add.iter().map(PolicyTuple::to_row).collect();
        let remove_rows: Vec<_> = remove.iter().map(PolicyTuple::to_row).collect();
        self.store.apply_policy_batch(&add_rows, &remove_rows).await?;
        tracing::info!(
            target: "audit",
            added = add.len(),
            removed = remove.len(),
            "policy batch applied"
        );
        self.reload_locked().await
    }

    /// Replace the whole table with `tuples` and reload the engine.
    ///
    /// # Errors
    /// - [`AuthError::InvalidPolicy`] if any tuple is malformed; the existing
    ///   table stays as it was.
    pub async fn save_all(&self, tuples: &[PolicyTuple]) -> Result<u64, AuthError> {
        validate_all(tuples)?;
        let _guard = self.write_lock.lock().await;
        let rows: Vec<_> = tuples.iter().map(PolicyTuple::to_row).collect();
        self.store.replace_policy_rows(&rows).await?;
        tracing::info!(target: "audit", tuples = tuples.len(), "policy table replaced");
        self.reload_locked().await
    }

    /// Write `tuples` only if the table holds no rows at all. Returns whether
    /// anything was written.
    ///
    /// An operator who deletes every rule keeps an empty table only until the
    /// next restart; set `seed_self_service_policy: false` to opt out.
    ///
    /// # Errors
    /// Same as [`Self::apply_batch`].
    pub async fn seed_if_empty(&self, tuples: &[PolicyTuple]) -> Result<bool, AuthError> {
        validate_all(tuples)?;
        let _guard = self.write_lock.lock().await;
        if !self.store.load_policy_rows().await?.is_empty() {
            return Ok(false);
        }
        let rows: Vec<_> = tuples.iter().map(PolicyTuple::to_row).collect();
        self.store.apply_policy_batch(&rows, &[]).await?;
        tracing::info!(target: "audit", tuples = tuples.len(), "policy table seeded");
        self.reload_locked().await?;
        Ok(true)
    }

    /// Rebuild the engine from the persisted table.
    pub async fn reload(&self) -> Result<u64, AuthError> {
        let _guard = self.write_lock.lock().await;
        self.reload_locked().await
    }

    async fn reload_locked(&self) -> Result<u64, AuthError> {
        let tuples = self.load_all().await?;
        Ok(self.engine.reload(&tuples).await?)
    }
}

fn validate_all(tuples: &[PolicyTuple]) -> Result<(), AuthError> {
    for tuple in tuples {
        tuple
            .validate()
            .map_err(|err| AuthError::InvalidPolicy(err.to_string()))?;
    }
    Ok(())
}
