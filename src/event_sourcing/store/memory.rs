use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::dead_letters::{DeadLetter, DeadLetterSink, DeadLetterStats};
use super::event_store::EventStore;
use super::state_store::StateStore;
use crate::error::EsError;
use crate::event_sourcing::core::Event;

// ============================================================================
// In-Memory Backends
// ============================================================================
//
// Process-local implementations of the store traits. They honor the same
// contracts as the durable backends (duplicate-id conflict, ordering
// validation, no-op removes) and back the unit tests and the demo wiring.
//
// ============================================================================

#[derive(Default)]
struct EventLog {
    by_root: HashMap<(Uuid, Uuid), Vec<Event>>,
    ids: HashSet<Uuid>,
}

#[derive(Default)]
pub struct MemoryEventStore {
    log: RwLock<EventLog>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.ids.len()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: Event) -> Result<Event, EsError> {
        let mut log = self.log.write().await;

        if log.ids.contains(&event.id) {
            return Err(EsError::DuplicateEvent { id: event.id });
        }

        let lane = log
            .by_root
            .entry((event.tenant_id, event.aggregate_root_id))
            .or_default();

        if let Some(newest) = lane.last() {
            if event.timestamp < newest.timestamp {
                return Err(EsError::OutOfOrder {
                    event_id: event.id,
                    aggregate_root_id: event.aggregate_root_id,
                    timestamp: event.timestamp,
                    last_applied: newest.timestamp,
                });
            }
        }

        lane.push(event.clone());
        log.ids.insert(event.id);
        Ok(event)
    }

    async fn read_history(
        &self,
        tenant_id: Uuid,
        aggregate_root_id: Uuid,
        upper_bound: Option<DateTime<Utc>>,
    ) -> Result<Vec<Event>, EsError> {
        let log = self.log.read().await;
        let lane = match log.by_root.get(&(tenant_id, aggregate_root_id)) {
            Some(lane) => lane,
            None => return Ok(Vec::new()),
        };

        Ok(lane
            .iter()
            .filter(|e| upper_bound.map_or(true, |bound| e.timestamp <= bound))
            .cloned()
            .collect())
    }

    async fn aggregate_roots(&self) -> Result<Vec<(Uuid, Uuid)>, EsError> {
        Ok(self.log.read().await.by_root.keys().copied().collect())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    containers: RwLock<HashMap<String, HashMap<(Uuid, Uuid), serde_json::Value>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live rows in one container. Test/demo helper.
    pub async fn rows(&self, container: &str) -> usize {
        self.containers
            .read()
            .await
            .get(container)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(
        &self,
        container: &str,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<serde_json::Value>, EsError> {
        Ok(self
            .containers
            .read()
            .await
            .get(container)
            .and_then(|rows| rows.get(&(tenant_id, id)))
            .cloned())
    }

    async fn upsert(
        &self,
        container: &str,
        tenant_id: Uuid,
        id: Uuid,
        doc: serde_json::Value,
    ) -> Result<(), EsError> {
        self.containers
            .write()
            .await
            .entry(container.to_string())
            .or_default()
            .insert((tenant_id, id), doc);
        Ok(())
    }

    async fn remove(&self, container: &str, tenant_id: Uuid, id: Uuid) -> Result<(), EsError> {
        if let Some(rows) = self.containers.write().await.get_mut(container) {
            rows.remove(&(tenant_id, id));
        }
        Ok(())
    }

    async fn reset(&self, container: &str) -> Result<(), EsError> {
        self.containers.write().await.remove(container);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryDeadLetterSink {
    letters: RwLock<Vec<DeadLetter>>,
}

impl MemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterSink for MemoryDeadLetterSink {
    async fn record(&self, letter: DeadLetter) -> Result<(), EsError> {
        self.letters.write().await.push(letter);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<DeadLetter>, EsError> {
        let letters = self.letters.read().await;
        Ok(letters.iter().rev().take(limit).cloned().collect())
    }

    async fn stats(&self) -> Result<DeadLetterStats, EsError> {
        let letters = self.letters.read().await;
        let mut stats = DeadLetterStats::default();
        for letter in letters.iter() {
            stats.total += 1;
            *stats.by_source.entry(letter.source.clone()).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{payload_from, Command, CommandKind};
    use chrono::Duration;
    use serde_json::json;

    fn create_cmd() -> Command {
        Command::new("Create_Site", CommandKind::Create)
    }

    #[tokio::test]
    async fn append_then_read_preserves_order() {
        let store = MemoryEventStore::new();
        let tenant = Uuid::new_v4();
        let root = Uuid::new_v4();
        let t0 = Utc::now();

        for i in 0..3 {
            let event = Event::new(
                root,
                tenant,
                &create_cmd(),
                payload_from(&[("name", json!(format!("v{i}")))]),
            )
            .at(t0 + Duration::seconds(i));
            store.append(event).await.unwrap();
        }

        let history = store.read_history(tenant, root, None).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn duplicate_id_is_a_conflict() {
        let store = MemoryEventStore::new();
        let tenant = Uuid::new_v4();
        let root = Uuid::new_v4();

        let event = Event::new(root, tenant, &create_cmd(), payload_from(&[]));
        let id = event.id;
        store.append(event.clone()).await.unwrap();

        let err = store.append(event).await.unwrap_err();
        assert!(matches!(err, EsError::DuplicateEvent { id: dup } if dup == id));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn append_rejects_timestamp_regression() {
        let store = MemoryEventStore::new();
        let tenant = Uuid::new_v4();
        let root = Uuid::new_v4();
        let t0 = Utc::now();

        store
            .append(Event::new(root, tenant, &create_cmd(), payload_from(&[])).at(t0))
            .await
            .unwrap();

        let stale = Event::new(root, tenant, &create_cmd(), payload_from(&[]))
            .at(t0 - Duration::seconds(5));
        assert!(matches!(
            store.append(stale).await,
            Err(EsError::OutOfOrder { .. })
        ));
    }

    #[tokio::test]
    async fn upper_bound_is_inclusive() {
        let store = MemoryEventStore::new();
        let tenant = Uuid::new_v4();
        let root = Uuid::new_v4();
        let t0 = Utc::now();

        for i in 0..3 {
            store
                .append(
                    Event::new(root, tenant, &create_cmd(), payload_from(&[]))
                        .at(t0 + Duration::seconds(i)),
                )
                .await
                .unwrap();
        }

        let capped = store
            .read_history(tenant, root, Some(t0 + Duration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[tokio::test]
    async fn remove_of_absent_row_is_a_noop() {
        let store = MemoryStateStore::new();
        store
            .remove("Site", Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(store.rows("Site").await, 0);
    }

    #[tokio::test]
    async fn dead_letter_stats_group_by_source() {
        let sink = MemoryDeadLetterSink::new();
        sink.record(DeadLetter::for_raw("site-consumer", "bad json", "{".into()))
            .await
            .unwrap();
        sink.record(DeadLetter::for_raw("site-consumer", "bad json", "[".into()))
            .await
            .unwrap();
        sink.record(DeadLetter::for_raw("dashboard-consumer", "seed", "{}".into()))
            .await
            .unwrap();

        let stats = sink.stats().await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_source["site-consumer"], 2);
        assert_eq!(stats.by_source["dashboard-consumer"], 1);
    }
}
