//! In-process [`CacheStore`] used by tests and single-node deployments.
//!
//! Sorted sets keep a member -> score map next to a `(score, member)` index,
//! so equal scores are ordered by member bytes exactly like Redis.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::lock::{rw_read, rw_write};
use super::store::{CacheStore, Order, StoreError, WriteBatch, WriteOp};

const SOURCE: &str = "cache::memory";

/// How often a long-lived store drops expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// f64 with a total order, so it can live in a `BTreeSet`.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, Score>,
    index: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn add(&mut self, member: String, score: f64) {
        let score = Score(score);
        if let Some(previous) = self.scores.insert(member.clone(), score) {
            self.index.remove(&(previous, member.clone()));
        }
        self.index.insert((score, member));
    }

    fn remove(&mut self, member: &str) {
        if let Some(score) = self.scores.remove(member) {
            self.index.remove(&(score, member.to_string()));
        }
    }

    fn rank(&self, member: &str, order: Order) -> Option<u64> {
        let score = *self.scores.get(member)?;
        let ascending = self.index.range(..(score, member.to_string())).count() as u64;
        Some(match order {
            Order::Ascending => ascending,
            Order::Descending => self.scores.len() as u64 - ascending - 1,
        })
    }

    fn ordered(&self, order: Order) -> Box<dyn Iterator<Item = &(Score, String)> + '_> {
        match order {
            Order::Ascending => Box::new(self.index.iter()),
            Order::Descending => Box::new(self.index.iter().rev()),
        }
    }
}

#[derive(Debug)]
enum Slot {
    Value(String),
    Sorted(SortedSet),
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// Thread-safe, TTL-aware key/value and sorted-set store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "purge_expired");
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        before - entries.len()
    }

    /// Purge expired entries every `every` until the store is dropped.
    ///
    /// Reads already ignore expired entries; the sweep only bounds memory for
    /// keys nobody touches again, such as blank markers for one-off ids.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(target: "reseed::cache::memory", purged, "Swept expired entries");
                }
            }
        })
    }

    fn with_sorted<R>(
        &self,
        op: &'static str,
        key: &str,
        f: impl FnOnce(&SortedSet) -> R,
    ) -> Result<Option<R>, StoreError> {
        let now = Instant::now();
        let entries = rw_read(&self.entries, SOURCE, op);
        match entries.get(key).filter(|entry| entry.is_live(now)) {
            None => Ok(None),
            Some(Entry {
                slot: Slot::Sorted(set),
                ..
            }) => Ok(Some(f(set))),
            Some(_) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
        }
    }
}

fn sorted_entry<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
    now: Instant,
) -> Result<&'a mut SortedSet, StoreError> {
    if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
        entries.remove(key);
    }
    let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
        slot: Slot::Sorted(SortedSet::default()),
        expires_at: None,
    });
    match &mut entry.slot {
        Slot::Sorted(set) => Ok(set),
        Slot::Value(_) => Err(StoreError::WrongType {
            key: key.to_string(),
        }),
    }
}

/// Apply one op. Mirrors Redis: a failing op does not undo earlier ones.
fn apply_op(
    entries: &mut HashMap<String, Entry>,
    op: WriteOp,
    now: Instant,
) -> Result<(), StoreError> {
    match op {
        WriteOp::Set { key, value, ttl } => {
            entries.insert(
                key,
                Entry {
                    slot: Slot::Value(value),
                    expires_at: Some(now + ttl),
                },
            );
        }
        WriteOp::Delete { key } => {
            entries.remove(&key);
        }
        WriteOp::ZAdd { key, member, score } => {
            sorted_entry(entries, &key, now)?.add(member, score);
        }
        WriteOp::ZRem { key, member } => {
            let emptied = match entries.get_mut(&key).filter(|entry| entry.is_live(now)) {
                Some(Entry {
                    slot: Slot::Sorted(set),
                    ..
                }) => {
                    set.remove(&member);
                    set.scores.is_empty()
                }
                Some(_) => return Err(StoreError::WrongType { key }),
                None => false,
            };
            if emptied {
                entries.remove(&key);
            }
        }
        WriteOp::Expire { key, ttl } => {
            if let Some(entry) = entries.get_mut(&key).filter(|entry| entry.is_live(now)) {
                entry.expires_at = Some(now + ttl);
            }
        }
    }
    Ok(())
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let entries = rw_read(&self.entries, SOURCE, "get");
        match entries.get(key).filter(|entry| entry.is_live(now)) {
            None => Ok(None),
            Some(Entry {
                slot: Slot::Value(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "expire");
        match entries.get_mut(key).filter(|entry| entry.is_live(now)) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn apply(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "apply");
        let mut first_error = None;
        for op in batch.into_ops() {
            if let Err(err) = apply_op(&mut entries, op, now) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>, StoreError> {
        Ok(self
            .with_sorted("zscore", key, |set| set.scores.get(member).map(|s| s.0))?
            .flatten())
    }

    async fn zrank(
        &self,
        key: &str,
        member: &str,
        order: Order,
    ) -> Result<Option<u64>, StoreError> {
        Ok(self
            .with_sorted("zrank", key, |set| set.rank(member, order))?
            .flatten())
    }

    async fn zrange(
        &self,
        key: &str,
        order: Order,
        start: u64,
        stop: u64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        if stop < start {
            return Ok(Vec::new());
        }
        let take = usize::try_from((stop - start).saturating_add(1)).unwrap_or(usize::MAX);
        Ok(self
            .with_sorted("zrange", key, |set| {
                set.ordered(order)
                    .skip(start as usize)
                    .take(take)
                    .map(|(score, member)| (member.clone(), score.0))
                    .collect()
            })?
            .unwrap_or_default())
    }

    async fn zrange_by_score(
        &self,
        key: &str,
        order: Order,
        min: f64,
        max: f64,
    ) -> Result<Vec<(String, f64)>, StoreError> {
        Ok(self
            .with_sorted("zrange_by_score", key, |set| {
                set.ordered(order)
                    .filter(|(score, _)| score.0 >= min && score.0 <= max)
                    .map(|(score, member)| (member.clone(), score.0))
                    .collect()
            })?
            .unwrap_or_default())
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self
            .with_sorted("zcard", key, |set| set.scores.len() as u64)?
            .unwrap_or(0))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
