//! Per-principal permission overrides.
//!
//! [`OverrideStore`] is the administrative write boundary and the read
//! path for decisions. It validates grants and revokes against the catalog
//! and a [`PrincipalDirectory`], then hands the write to an
//! [`OverrideRepository`] which must apply the row change and its history
//! event as one atomic unit.
//!
//! Expiry is lazy: `active_overrides_for` filters on the clock at read
//! time, so an override stops counting the instant it expires whether or
//! not a sweep has run.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use metrics::counter;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::catalog::PermissionCatalog;
use super::clock::{system_clock, SharedClock};
use super::models::{
    OverrideEvent, OverrideEventKind, PermissionName, PermissionOverride, PrincipalId,
};
use crate::error::{Result, WardenError};

// ═══════════════════════════════════════════════════════════════════════════════
// Collaborator traits
// ═══════════════════════════════════════════════════════════════════════════════

/// Persistence collaborator for override rows and their history.
///
/// Every mutating method must commit the row change and the accompanying
/// event together; no reader may observe one without the other or a row in
/// a half-updated state.
#[async_trait]
pub trait OverrideRepository: Send + Sync {
    /// Insert or replace the `(principal_id, permission)` row with a granted
    /// record and append `event`.
    async fn upsert_grant(&self, record: &PermissionOverride, event: &OverrideEvent) -> Result<()>;

    /// Mark the row as not granted, creating it if missing, and append
    /// `event`. Returns the row as stored.
    async fn mark_revoked(
        &self,
        principal_id: &PrincipalId,
        permission: &str,
        revoked_by: Option<&PrincipalId>,
        at: DateTime<Utc>,
        event: &OverrideEvent,
    ) -> Result<PermissionOverride>;

    /// All rows for a principal, granted or not.
    async fn list_for(&self, principal_id: &PrincipalId) -> Result<Vec<PermissionOverride>>;

    /// History events for a principal, oldest first, optionally narrowed to
    /// one permission.
    async fn history(
        &self,
        principal_id: &PrincipalId,
        permission: Option<&str>,
    ) -> Result<Vec<OverrideEvent>>;

    /// Flip every granted row whose expiry is at or before `now` to not
    /// granted, appending an `Expired` event for each. Returns the flipped
    /// rows.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<PermissionOverride>>;
}

/// Answers whether a principal exists, for write-time validation.
#[async_trait]
pub trait PrincipalDirectory: Send + Sync {
    async fn principal_exists(&self, principal_id: &PrincipalId) -> Result<bool>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-memory implementations
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
struct InMemoryState {
    rows: HashMap<(PrincipalId, String), PermissionOverride>,
    events: Vec<OverrideEvent>,
}

/// Override repository held in process memory.
///
/// A single write lock covers both the row map and the event log, which
/// gives the same atomicity as the transactional Postgres repository.
#[derive(Debug, Default)]
pub struct InMemoryOverrideRepository {
    state: RwLock<InMemoryState>,
}

impl InMemoryOverrideRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OverrideRepository for InMemoryOverrideRepository {
    async fn upsert_grant(&self, record: &PermissionOverride, event: &OverrideEvent) -> Result<()> {
        let mut state = self.state.write();
        state.rows.insert(
            (record.principal_id.clone(), record.permission.clone()),
            record.clone(),
        );
        state.events.push(event.clone());
        Ok(())
    }

    async fn mark_revoked(
        &self,
        principal_id: &PrincipalId,
        permission: &str,
        revoked_by: Option<&PrincipalId>,
        at: DateTime<Utc>,
        event: &OverrideEvent,
    ) -> Result<PermissionOverride> {
        let mut state = self.state.write();
        let row = state
            .rows
            .entry((principal_id.clone(), permission.to_string()))
            .or_insert_with(|| PermissionOverride {
                principal_id: principal_id.clone(),
                permission: permission.to_string(),
                is_granted: false,
                granted_by: None,
                granted_at: at,
                expires_at: None,
                reason: None,
                revoked_by: None,
                revoked_at: None,
            });
        row.is_granted = false;
        row.revoked_by = revoked_by.cloned();
        row.revoked_at = Some(at);
        let stored = row.clone();
        state.events.push(event.clone());
        Ok(stored)
    }

    async fn list_for(&self, principal_id: &PrincipalId) -> Result<Vec<PermissionOverride>> {
        let state = self.state.read();
        let mut rows: Vec<PermissionOverride> = state
            .rows
            .values()
            .filter(|r| &r.principal_id == principal_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.permission.cmp(&b.permission));
        Ok(rows)
    }

    async fn history(
        &self,
        principal_id: &PrincipalId,
        permission: Option<&str>,
    ) -> Result<Vec<OverrideEvent>> {
        let state = self.state.read();
        Ok(state
            .events
            .iter()
            .filter(|e| &e.principal_id == principal_id)
            .filter(|e| permission.map_or(true, |p| e.permission == p))
            .cloned()
            .collect())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<PermissionOverride>> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let mut expired = Vec::new();
        for row in state.rows.values_mut() {
            if row.is_expired_at(now) {
                row.is_granted = false;
                expired.push(row.clone());
                let mut event = OverrideEvent::new(
                    row.principal_id.clone(),
                    row.permission.clone(),
                    OverrideEventKind::Expired,
                    now,
                );
                event.expires_at = row.expires_at;
                state.events.push(event);
            }
        }
        Ok(expired)
    }
}

/// Fixed set of known principals.
#[derive(Debug, Default)]
pub struct StaticPrincipalDirectory {
    ids: RwLock<HashSet<PrincipalId>>,
}

impl StaticPrincipalDirectory {
    pub fn new<I, P>(ids: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PrincipalId>,
    {
        Self {
            ids: RwLock::new(ids.into_iter().map(Into::into).collect()),
        }
    }

    pub fn insert(&self, id: impl Into<PrincipalId>) {
        self.ids.write().insert(id.into());
    }

    pub fn remove(&self, id: &PrincipalId) -> bool {
        self.ids.write().remove(id)
    }
}

#[async_trait]
impl PrincipalDirectory for StaticPrincipalDirectory {
    async fn principal_exists(&self, principal_id: &PrincipalId) -> Result<bool> {
        Ok(self.ids.read().contains(principal_id))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct CachedRows {
    rows: Vec<PermissionOverride>,
    loaded_at: DateTime<Utc>,
}

/// Per-principal cache of raw override rows.
///
/// Rows are cached rather than computed sets, so expiry is still evaluated
/// against the clock on every read and a cached grant never outlives its
/// `expires_at`. Any write for a principal drops that principal's entry.
#[derive(Debug)]
pub struct OverrideCache {
    entries: DashMap<PrincipalId, CachedRows>,
    ttl: Duration,
    /// Bumped on every invalidation; a load that raced with a write is not
    /// stored.
    generation: AtomicU64,
}

impl OverrideCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            generation: AtomicU64::new(0),
        }
    }

    fn get(&self, principal_id: &PrincipalId, now: DateTime<Utc>) -> Option<Vec<PermissionOverride>> {
        let entry = self.entries.get(principal_id)?;
        if now - entry.loaded_at < self.ttl && now >= entry.loaded_at {
            Some(entry.rows.clone())
        } else {
            drop(entry);
            self.entries.remove(principal_id);
            None
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn insert_if_current(
        &self,
        principal_id: &PrincipalId,
        generation: u64,
        rows: Vec<PermissionOverride>,
        now: DateTime<Utc>,
    ) {
        // The generation is compared while holding the entry's shard lock.
        // `invalidate` bumps the generation before taking the same lock to
        // remove, so either this insert sees the bump or the removal runs
        // after it.
        let entry = self.entries.entry(principal_id.clone());
        if self.generation() == generation {
            entry.insert(CachedRows {
                rows,
                loaded_at: now,
            });
        }
    }

    pub fn invalidate(&self, principal_id: &PrincipalId) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(principal_id);
    }

    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Grant request
// ═══════════════════════════════════════════════════════════════════════════════

/// Arguments of an administrative grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    pub principal_id: PrincipalId,
    pub permission: String,
    pub granted_by: PrincipalId,
    pub expires_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl GrantRequest {
    pub fn new(
        principal_id: impl Into<PrincipalId>,
        permission: impl Into<String>,
        granted_by: impl Into<PrincipalId>,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            permission: permission.into(),
            granted_by: granted_by.into(),
            expires_at: None,
            reason: None,
        }
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Validating front of the override persistence.
pub struct OverrideStore {
    repository: Arc<dyn OverrideRepository>,
    directory: Arc<dyn PrincipalDirectory>,
    catalog: Arc<PermissionCatalog>,
    clock: SharedClock,
    cache: Option<OverrideCache>,
}

impl OverrideStore {
    pub fn new(
        repository: Arc<dyn OverrideRepository>,
        directory: Arc<dyn PrincipalDirectory>,
        catalog: Arc<PermissionCatalog>,
    ) -> Self {
        Self {
            repository,
            directory,
            catalog,
            clock: system_clock(),
            cache: None,
        }
    }

    /// In-memory store over a fixed principal set. Convenient for tests and
    /// embedded use.
    pub fn in_memory<I, P>(catalog: Arc<PermissionCatalog>, principals: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PrincipalId>,
    {
        Self::new(
            Arc::new(InMemoryOverrideRepository::new()),
            Arc::new(StaticPrincipalDirectory::new(principals)),
            catalog,
        )
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cache(mut self, ttl: Duration) -> Self {
        self.cache = Some(OverrideCache::new(ttl));
        self
    }

    pub fn catalog(&self) -> &Arc<PermissionCatalog> {
        &self.catalog
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Grant `request.permission` to `request.principal_id`.
    ///
    /// Upserts the single row for the pair; a repeated grant refreshes
    /// `granted_by`, `granted_at`, `expires_at` and `reason` to this call's
    /// values, while earlier values stay in the history.
    pub async fn grant(&self, request: GrantRequest) -> Result<PermissionOverride> {
        let now = self.clock.now();
        if request.granted_by.is_empty() {
            return Err(WardenError::invalid_grant("grant requires a grantor"));
        }
        self.validate_principal(&request.principal_id).await?;
        self.validate_grantable(&request.permission)?;
        if let Some(expires_at) = request.expires_at {
            if expires_at <= now {
                return Err(WardenError::expiry_not_in_future(expires_at, now));
            }
        }

        let record = PermissionOverride {
            principal_id: request.principal_id.clone(),
            permission: request.permission.clone(),
            is_granted: true,
            granted_by: Some(request.granted_by.clone()),
            granted_at: now,
            expires_at: request.expires_at,
            reason: request.reason.clone(),
            revoked_by: None,
            revoked_at: None,
        };

        let mut event = OverrideEvent::new(
            request.principal_id.clone(),
            request.permission.clone(),
            OverrideEventKind::Granted,
            now,
        );
        event.actor = Some(request.granted_by.clone());
        event.expires_at = request.expires_at;
        event.reason = request.reason.clone();

        self.repository.upsert_grant(&record, &event).await?;
        self.invalidate(&request.principal_id);

        counter!("warden_override_writes_total", "op" => "grant").increment(1);
        info!(
            principal_id = %request.principal_id,
            permission = %request.permission,
            granted_by = %request.granted_by,
            expires_at = ?request.expires_at,
            "Permission override granted"
        );

        Ok(record)
    }

    /// Soft-revoke: the row stays, with `is_granted = false`.
    pub async fn revoke(
        &self,
        principal_id: &PrincipalId,
        permission: &str,
        revoked_by: Option<&PrincipalId>,
    ) -> Result<PermissionOverride> {
        let now = self.clock.now();
        self.validate_principal(principal_id).await?;
        if !PermissionName::is_valid(permission) {
            return Err(WardenError::invalid_permission_name(permission));
        }
        // Deactivated permissions may still be revoked.
        if self.catalog.permission(permission).is_none() {
            return Err(WardenError::unknown_permission(permission));
        }

        let mut event = OverrideEvent::new(
            principal_id.clone(),
            permission,
            OverrideEventKind::Revoked,
            now,
        );
        event.actor = revoked_by.cloned();

        let stored = self
            .repository
            .mark_revoked(principal_id, permission, revoked_by, now, &event)
            .await?;
        self.invalidate(principal_id);

        counter!("warden_override_writes_total", "op" => "revoke").increment(1);
        info!(
            principal_id = %principal_id,
            permission = %permission,
            revoked_by = ?revoked_by.map(PrincipalId::as_str),
            "Permission override revoked"
        );

        Ok(stored)
    }

    /// Flip expired grants to not granted and record `Expired` events.
    ///
    /// Pure hygiene: decisions already ignore expired overrides.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let expired = self.repository.expire_due(now).await?;
        for row in &expired {
            self.invalidate(&row.principal_id);
        }
        if !expired.is_empty() {
            counter!("warden_sweep_expired_total").increment(expired.len() as u64);
            info!(count = expired.len(), "Swept expired permission overrides");
        }
        Ok(expired.len())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Names of overrides that are granted and unexpired right now.
    pub async fn active_overrides_for(&self, principal_id: &PrincipalId) -> Result<HashSet<String>> {
        let now = self.clock.now();
        let rows = self.rows_for(principal_id, now).await?;
        Ok(rows
            .into_iter()
            .filter(|r| r.is_active_at(now))
            .map(|r| r.permission)
            .collect())
    }

    /// Every row for the principal, including revoked and expired ones.
    pub async fn overrides_for(&self, principal_id: &PrincipalId) -> Result<Vec<PermissionOverride>> {
        self.repository.list_for(principal_id).await
    }

    /// Append-only history, oldest first.
    pub async fn history_for(
        &self,
        principal_id: &PrincipalId,
        permission: Option<&str>,
    ) -> Result<Vec<OverrideEvent>> {
        self.repository.history(principal_id, permission).await
    }

    async fn rows_for(
        &self,
        principal_id: &PrincipalId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PermissionOverride>> {
        let Some(cache) = &self.cache else {
            return self.repository.list_for(principal_id).await;
        };

        if let Some(rows) = cache.get(principal_id, now) {
            counter!("warden_override_cache_total", "result" => "hit").increment(1);
            return Ok(rows);
        }

        counter!("warden_override_cache_total", "result" => "miss").increment(1);
        let generation = cache.generation();
        let rows = self.repository.list_for(principal_id).await?;
        cache.insert_if_current(principal_id, generation, rows.clone(), now);
        Ok(rows)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Validation
    // ─────────────────────────────────────────────────────────────────────────

    async fn validate_principal(&self, principal_id: &PrincipalId) -> Result<()> {
        if principal_id.is_empty() || !self.directory.principal_exists(principal_id).await? {
            debug!(principal_id = %principal_id, "Rejecting write for unknown principal");
            return Err(WardenError::unknown_principal(principal_id.as_str()));
        }
        Ok(())
    }

    fn validate_grantable(&self, permission: &str) -> Result<()> {
        if !PermissionName::is_valid(permission) {
            return Err(WardenError::invalid_permission_name(permission));
        }
        if !self.catalog.is_known_permission(permission) {
            return Err(WardenError::unknown_permission(permission));
        }
        Ok(())
    }

    fn invalidate(&self, principal_id: &PrincipalId) {
        if let Some(cache) = &self.cache {
            cache.invalidate(principal_id);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
