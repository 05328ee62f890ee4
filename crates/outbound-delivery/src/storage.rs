//! Storage abstraction for the delivery engine.
//!
//! The store is the only state workers share. Every operation that changes a
//! record happens under one lock acquisition, which is what makes claims
//! exclusive and commits compare-and-set on the claim token.

use std::{future::Future, pin::Pin, time::Duration};

use outbound_core::{
    error::Result, ClaimToken, DeliveryCommit, DeliveryId, DeliveryRecord, DeliveryStatus, Page,
    PageRequest,
};

/// Storage operations required by the delivery engine.
///
/// Implementations must guarantee:
///
/// - `claim_due` never hands the same record to two callers while a lease is
///   live. An expired lease makes the record claimable again.
/// - `commit_result` applies only if the caller's claim token is still the
///   record's current token, and fails with `CoreError::StaleClaim`
///   otherwise.
/// - Every mutation is durable before the call returns.
pub trait DeliveryStore: Send + Sync + 'static {
    /// Persists a new pending record and returns its id.
    fn enqueue(
        &self,
        record: DeliveryRecord,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryId>> + Send + '_>>;

    /// Atomically claims up to `limit` due records.
    ///
    /// Records are due when pending with `next_attempt_at <= now`, or
    /// claimed with an expired lease. Each claimed record gets a fresh token,
    /// an incremented attempt count, and a lease of `lease`. Oldest due
    /// records are claimed first.
    fn claim_due(
        &self,
        limit: usize,
        lease: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DeliveryRecord>>> + Send + '_>>;

    /// Appends a round's results and applies its scheduling decision.
    fn commit_result(
        &self,
        id: DeliveryId,
        token: ClaimToken,
        commit: DeliveryCommit,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryRecord>> + Send + '_>>;

    /// Reads one record.
    fn find(
        &self,
        id: DeliveryId,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryRecord>> + Send + '_>>;

    /// Lists records in a status, oldest first.
    fn list_by_status(
        &self,
        status: DeliveryStatus,
        page: PageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Page<DeliveryRecord>>> + Send + '_>>;

    /// Moves a failed or dead-lettered record back to pending with a fresh
    /// attempt budget.
    fn requeue(
        &self,
        id: DeliveryId,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryRecord>> + Send + '_>>;

    /// Verifies the store is reachable.
    fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

pub mod memory {
    //! In-memory store with optional JSON snapshot persistence.
    //!
    //! Without a snapshot path the store is purely in-memory, which is what
    //! tests use. With one, every mutation rewrites the snapshot (temp file,
    //! then rename) before returning, so a restart reloads exactly the
    //! committed state. Claimed records come back with their lease intact
    //! and are reclaimed once it expires.
    //!
    //! A mutation whose snapshot write fails is rolled back before the error
    //! is returned, so memory never runs ahead of the file.
    //!
    //! Each write serializes the whole map while holding the write lock.
    //! Claims and commits therefore cost O(records held) when a snapshot path
    //! is set. That suits a single-node service with a bounded backlog; a
    //! larger one needs an incremental store behind the same trait.

    use std::{
        collections::HashMap,
        future::Future,
        path::{Path, PathBuf},
        pin::Pin,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use outbound_core::{
        error::Result, ClaimToken, Clock, CoreError, DeliveryCommit, DeliveryId, DeliveryRecord,
        DeliveryStatus, Page, PageRequest,
    };
    use serde::{Deserialize, Serialize};
    use tokio::sync::RwLock;
    use tracing::{debug, info, warn};

    use super::DeliveryStore;

    const SNAPSHOT_VERSION: u32 = 1;

    #[derive(Debug, Serialize, Deserialize)]
    struct Snapshot {
        version: u32,
        records: Vec<DeliveryRecord>,
    }

    /// Delivery store backed by a `HashMap` behind an async lock.
    #[derive(Debug, Clone)]
    pub struct InMemoryDeliveryStore {
        records: Arc<RwLock<HashMap<DeliveryId, DeliveryRecord>>>,
        clock: Arc<dyn Clock>,
        snapshot_path: Option<PathBuf>,
        unavailable: Arc<AtomicUsize>,
    }

    impl InMemoryDeliveryStore {
        /// Creates an empty, non-persistent store.
        pub fn new(clock: Arc<dyn Clock>) -> Self {
            Self {
                records: Arc::new(RwLock::new(HashMap::new())),
                clock,
                snapshot_path: None,
                unavailable: Arc::new(AtomicUsize::new(0)),
            }
        }

        /// Opens a store persisted at `path`, loading any existing snapshot.
        ///
        /// # Errors
        ///
        /// Returns `CoreError::StoreUnavailable` if the snapshot exists but
        /// cannot be read or parsed.
        pub async fn open(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Self> {
            let path = path.as_ref().to_path_buf();
            let records = match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    let snapshot: Snapshot = serde_json::from_slice(&bytes).map_err(|e| {
                        CoreError::unavailable(format!(
                            "corrupt snapshot {}: {e}",
                            path.display()
                        ))
                    })?;
                    if snapshot.version != SNAPSHOT_VERSION {
                        return Err(CoreError::unavailable(format!(
                            "unsupported snapshot version {}",
                            snapshot.version
                        )));
                    }
                    snapshot.records
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                Err(e) => {
                    return Err(CoreError::unavailable(format!(
                        "failed to read snapshot {}: {e}",
                        path.display()
                    )))
                },
            };

            info!(path = %path.display(), records = records.len(), "opened delivery store");

            Ok(Self {
                records: Arc::new(RwLock::new(
                    records.into_iter().map(|record| (record.id, record)).collect(),
                )),
                clock,
                snapshot_path: Some(path),
                unavailable: Arc::new(AtomicUsize::new(0)),
            })
        }

        /// Makes the next `count` operations fail with `StoreUnavailable`.
        pub fn inject_unavailable(&self, count: usize) {
            self.unavailable.store(count, Ordering::Release);
        }

        /// Number of records held.
        pub async fn len(&self) -> usize {
            self.records.read().await.len()
        }

        /// Returns true if the store holds no records.
        pub async fn is_empty(&self) -> bool {
            self.records.read().await.is_empty()
        }

        /// Every record, oldest first.
        pub async fn all(&self) -> Vec<DeliveryRecord> {
            let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
            sort_oldest_first(&mut records);
            records
        }

        fn check_available(&self) -> Result<()> {
            let tripped = self
                .unavailable
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok();
            if tripped {
                return Err(CoreError::unavailable("injected store outage"));
            }
            Ok(())
        }

        /// Persists `records`, restoring the `previous` values on failure.
        ///
        /// `previous` holds, for every record the caller changed, the value
        /// it had before the change (`None` for an insert).
        async fn persist_or_rollback(
            &self,
            records: &mut HashMap<DeliveryId, DeliveryRecord>,
            previous: Vec<(DeliveryId, Option<DeliveryRecord>)>,
        ) -> Result<()> {
            let Err(error) = self.persist(records).await else {
                return Ok(());
            };

            warn!(error = %error, changed = previous.len(), "snapshot write failed, rolling back");
            for (id, before) in previous {
                match before {
                    Some(record) => {
                        records.insert(id, record);
                    },
                    None => {
                        records.remove(&id);
                    },
                }
            }
            Err(error)
        }

        async fn persist(&self, records: &HashMap<DeliveryId, DeliveryRecord>) -> Result<()> {
            let Some(path) = &self.snapshot_path else {
                return Ok(());
            };

            let mut ordered: Vec<_> = records.values().cloned().collect();
            sort_oldest_first(&mut ordered);
            let bytes = serde_json::to_vec(&Snapshot { version: SNAPSHOT_VERSION, records: ordered })
                .map_err(|e| CoreError::unavailable(format!("failed to encode snapshot: {e}")))?;

            let tmp = path.with_extension("tmp");
            tokio::fs::write(&tmp, &bytes)
                .await
                .map_err(|e| CoreError::unavailable(format!("failed to write snapshot: {e}")))?;
            tokio::fs::rename(&tmp, path)
                .await
                .map_err(|e| CoreError::unavailable(format!("failed to replace snapshot: {e}")))?;

            debug!(path = %path.display(), bytes = bytes.len(), "snapshot written");
            Ok(())
        }
    }

    fn sort_oldest_first(records: &mut [DeliveryRecord]) {
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
    }

    impl DeliveryStore for InMemoryDeliveryStore {
        fn enqueue(
            &self,
            record: DeliveryRecord,
        ) -> Pin<Box<dyn Future<Output = Result<DeliveryId>> + Send + '_>> {
            Box::pin(async move {
                self.check_available()?;
                let id = record.id;
                let mut records = self.records.write().await;
                let before = records.insert(id, record);
                self.persist_or_rollback(&mut records, vec![(id, before)]).await?;
                Ok(id)
            })
        }

        fn claim_due(
            &self,
            limit: usize,
            lease: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<DeliveryRecord>>> + Send + '_>> {
            Box::pin(async move {
                self.check_available()?;
                let lease = chrono::Duration::from_std(lease)
                    .map_err(|e| CoreError::invalid(format!("lease out of range: {e}")))?;

                let mut records = self.records.write().await;
                let now = self.clock.now_utc();

                let mut due: Vec<_> = records
                    .values()
                    .filter(|record| record.is_claimable(now))
                    .map(|record| (record.next_attempt_at, record.created_at, record.id))
                    .collect();
                due.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2 .0.cmp(&b.2 .0)));

                let mut claimed = Vec::with_capacity(limit.min(due.len()));
                let mut previous = Vec::with_capacity(claimed.capacity());
                for (_, _, id) in due.into_iter().take(limit) {
                    if let Some(record) = records.get_mut(&id) {
                        previous.push((id, Some(record.clone())));
                        record.claim(ClaimToken::new(), lease, now);
                        claimed.push(record.clone());
                    }
                }

                if !claimed.is_empty() {
                    self.persist_or_rollback(&mut records, previous).await?;
                }
                Ok(claimed)
            })
        }

        fn commit_result(
            &self,
            id: DeliveryId,
            token: ClaimToken,
            commit: DeliveryCommit,
        ) -> Pin<Box<dyn Future<Output = Result<DeliveryRecord>> + Send + '_>> {
            Box::pin(async move {
                self.check_available()?;
                let mut records = self.records.write().await;
                let now = self.clock.now_utc();

                let record = records.get(&id).ok_or_else(|| CoreError::delivery_not_found(id))?;
                if !record.holds_claim(token) {
                    return Err(CoreError::StaleClaim(id));
                }
                let mut updated = record.clone();
                updated.apply_commit(commit, now)?;
                let before = records.insert(id, updated.clone());

                self.persist_or_rollback(&mut records, vec![(id, before)]).await?;
                Ok(updated)
            })
        }

        fn find(
            &self,
            id: DeliveryId,
        ) -> Pin<Box<dyn Future<Output = Result<DeliveryRecord>> + Send + '_>> {
            Box::pin(async move {
                self.check_available()?;
                self.records
                    .read()
                    .await
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| CoreError::delivery_not_found(id))
            })
        }

        fn list_by_status(
            &self,
            status: DeliveryStatus,
            page: PageRequest,
        ) -> Pin<Box<dyn Future<Output = Result<Page<DeliveryRecord>>> + Send + '_>> {
            Box::pin(async move {
                self.check_available()?;
                let mut matching: Vec<_> = self
                    .records
                    .read()
                    .await
                    .values()
                    .filter(|record| record.status == status)
                    .cloned()
                    .collect();
                sort_oldest_first(&mut matching);
                Ok(Page::from_ordered(matching, page))
            })
        }

        fn requeue(
            &self,
            id: DeliveryId,
        ) -> Pin<Box<dyn Future<Output = Result<DeliveryRecord>> + Send + '_>> {
            Box::pin(async move {
                self.check_available()?;
                let mut records = self.records.write().await;
                let now = self.clock.now_utc();

                let mut updated =
                    records.get(&id).cloned().ok_or_else(|| CoreError::delivery_not_found(id))?;
                updated.requeue(now)?;
                let before = records.insert(id, updated.clone());

                self.persist_or_rollback(&mut records, vec![(id, before)]).await?;
                Ok(updated)
            })
        }

        fn health_check(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move { self.check_available() })
        }
    }

}
