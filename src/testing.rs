//! In-memory collaborators for unit tests.
//!
//! Each fake implements one of the seam traits and counts the calls made to
//! it, so tests can assert on "zero sink writes" or "one create retry"
//! without any network or database.

use crate::broker::{
    BrokerError, ContextBroker, CreateResponse, EntityLookup, EntitySpec, SubscriptionRecord,
    SubscriptionSpec,
};
use crate::model::{Reading, ResultDocument, StoredDocument};
use crate::sink::{DocumentSink, RecordId, WriteError};
use crate::source::{SourceError, SourceReader};
use crate::stream::StreamKind;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Builds a reading with a fixed source time.
pub fn reading(values: &[(&str, f64)]) -> Reading {
    Reading {
        source_time: json!(1_700_000_000_000i64),
        values: values
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect(),
    }
}

/// Source with a canned answer per stream. Streams without one have no data.
#[derive(Default)]
pub struct FakeSource {
    answers: Mutex<HashMap<StreamKind, Result<Option<Reading>, SourceError>>>,
    fetch_calls: AtomicUsize,
    ping_calls: AtomicUsize,
    down: AtomicBool,
    /// How long each fetch takes
    delay: Duration,
    fetches_in_flight: AtomicUsize,
    max_fetches_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reading(self, stream: StreamKind, reading: Reading) -> Self {
        self.set(stream, Ok(Some(reading)));
        self
    }

    pub fn with_error(self, stream: StreamKind, error: SourceError) -> Self {
        self.set(stream, Err(error));
        self
    }

    /// Every ping fails.
    pub fn down(self) -> Self {
        self.down.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set(&self, stream: StreamKind, answer: Result<Option<Reading>, SourceError>) {
        self.answers.lock().unwrap().insert(stream, answer);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn ping_calls(&self) -> usize {
        self.ping_calls.load(Ordering::SeqCst)
    }

    /// Most fetches that were ever running at the same time.
    pub fn max_fetches_in_flight(&self) -> usize {
        self.max_fetches_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceReader for FakeSource {
    async fn fetch_latest(&self, stream: StreamKind) -> Result<Option<Reading>, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.fetches_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_fetches_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.fetches_in_flight.fetch_sub(1, Ordering::SeqCst);

        self.answers
            .lock()
            .unwrap()
            .get(&stream)
            .cloned()
            .unwrap_or(Ok(None))
    }

    async fn ping(&self) -> Result<(), SourceError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(SourceError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Sink that keeps appended documents in memory, newest last.
#[derive(Default)]
pub struct RecordingSink {
    documents: Mutex<Vec<(String, StoredDocument)>>,
    append_calls: AtomicUsize,
    failing: AtomicBool,
    down: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every append fails.
    pub fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }

    /// Every ping fails.
    pub fn down(self) -> Self {
        self.down.store(true, Ordering::SeqCst);
        self
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }

    /// Documents appended to `collection`, oldest first.
    pub fn documents(&self, collection: &str) -> Vec<StoredDocument> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| c == collection)
            .map(|(_, doc)| doc.clone())
            .collect()
    }
}

#[async_trait]
impl DocumentSink for RecordingSink {
    async fn append(
        &self,
        collection: &str,
        document: &ResultDocument,
    ) -> Result<RecordId, WriteError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(WriteError::Unavailable("disk full".to_string()));
        }
        let id = Uuid::now_v7().to_string();
        self.documents.lock().unwrap().push((
            collection.to_string(),
            StoredDocument {
                id: id.clone(),
                document: document.clone(),
            },
        ));
        Ok(id)
    }

    async fn latest(&self, collection: &str) -> Result<Option<StoredDocument>> {
        Ok(self.documents(collection).pop())
    }

    async fn history(&self, collection: &str, limit: usize) -> Result<Vec<StoredDocument>> {
        Ok(self
            .documents(collection)
            .into_iter()
            .rev()
            .take(limit)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(anyhow!("document store unreachable"));
        }
        Ok(())
    }
}

/// Call counters of a [`FakeBroker`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BrokerCalls {
    pub version: usize,
    pub create_subscription: usize,
    pub list_subscriptions: usize,
    pub create_entity: usize,
    pub get_entity: usize,
    pub patch: usize,
}

#[derive(Default)]
struct BrokerState {
    subscriptions: Vec<SubscriptionRecord>,
    entities: BTreeMap<String, Value>,
    calls: BrokerCalls,
    /// Probes that fail before the broker answers; `usize::MAX` never answers
    failing_probes: usize,
    /// Entity ids that conflict on create this many more times while absent
    ghost_entities: HashMap<String, usize>,
    /// Descriptions that conflict on create but never show up in listings
    phantom_subscriptions: Vec<String>,
    /// Status and body every create answers with
    reject: Option<(u16, String)>,
    fail_patch: bool,
    patches: Vec<(String, Map<String, Value>)>,
}

/// Broker that behaves like Orion: 422 on duplicate description or id.
#[derive(Default)]
pub struct FakeBroker {
    state: Mutex<BrokerState>,
}

impl FakeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failing_probes(self, count: usize) -> Self {
        self.state.lock().unwrap().failing_probes = count;
        self
    }

    /// Liveness never succeeds.
    pub fn unreachable(self) -> Self {
        self.with_failing_probes(usize::MAX)
    }

    pub fn with_ghost_entity(self, id: &str, conflicts: usize) -> Self {
        self.state
            .lock()
            .unwrap()
            .ghost_entities
            .insert(id.to_string(), conflicts);
        self
    }

    pub fn with_phantom_subscription(self, description: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .phantom_subscriptions
            .push(description.to_string());
        self
    }

    pub fn rejecting(self, status: u16, body: &str) -> Self {
        self.state.lock().unwrap().reject = Some((status, body.to_string()));
        self
    }

    pub fn failing_patch(self) -> Self {
        self.state.lock().unwrap().fail_patch = true;
        self
    }

    pub fn calls(&self) -> BrokerCalls {
        self.state.lock().unwrap().calls
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().unwrap().subscriptions.len()
    }

    pub fn entity(&self, id: &str) -> Option<Value> {
        self.state.lock().unwrap().entities.get(id).cloned()
    }

    pub fn patches(&self) -> Vec<(String, Map<String, Value>)> {
        self.state.lock().unwrap().patches.clone()
    }
}

#[async_trait]
impl ContextBroker for FakeBroker {
    async fn version(&self) -> Result<Value, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.version += 1;
        if state.failing_probes > 0 {
            if state.failing_probes != usize::MAX {
                state.failing_probes -= 1;
            }
            return Err(BrokerError::Transport("connection refused".to_string()));
        }
        Ok(json!({"orion": {"version": "3.10.1"}}))
    }

    async fn create_subscription(
        &self,
        spec: &SubscriptionSpec,
    ) -> Result<CreateResponse, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.create_subscription += 1;
        if let Some((status, body)) = &state.reject {
            return Ok(CreateResponse::Rejected {
                status: *status,
                body: body.clone(),
            });
        }
        let duplicate = state
            .subscriptions
            .iter()
            .any(|s| s.description.as_deref() == Some(spec.description.as_str()));
        if duplicate || state.phantom_subscriptions.contains(&spec.description) {
            return Ok(CreateResponse::AlreadyExists);
        }
        let id = Uuid::now_v7().simple().to_string();
        state.subscriptions.push(SubscriptionRecord {
            id: id.clone(),
            description: Some(spec.description.clone()),
            rest: Map::new(),
        });
        Ok(CreateResponse::Created { id: Some(id) })
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.list_subscriptions += 1;
        Ok(state.subscriptions.clone())
    }

    async fn list_default_tenant_subscriptions(
        &self,
    ) -> Result<Vec<SubscriptionRecord>, BrokerError> {
        Ok(Vec::new())
    }

    async fn create_entity(&self, spec: &EntitySpec) -> Result<CreateResponse, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.create_entity += 1;
        if let Some((status, body)) = &state.reject {
            return Ok(CreateResponse::Rejected {
                status: *status,
                body: body.clone(),
            });
        }
        if let Some(remaining) = state.ghost_entities.get_mut(&spec.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(CreateResponse::AlreadyExists);
            }
        }
        if state.entities.contains_key(&spec.id) {
            return Ok(CreateResponse::AlreadyExists);
        }
        state.entities.insert(spec.id.clone(), spec.to_payload());
        Ok(CreateResponse::Created { id: None })
    }

    async fn get_entity(&self, id: &str) -> Result<EntityLookup, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.get_entity += 1;
        Ok(match state.entities.get(id) {
            Some(entity) => EntityLookup::Found(entity.clone()),
            None => EntityLookup::NotFound,
        })
    }

    async fn patch_entity_attrs(
        &self,
        id: &str,
        attrs: &Map<String, Value>,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.patch += 1;
        if state.fail_patch {
            return Err(BrokerError::Transport("connection reset".to_string()));
        }
        let Some(Value::Object(entity)) = state.entities.get_mut(id) else {
            return Err(BrokerError::Status {
                status: 404,
                body: r#"{"error":"NotFound"}"#.to_string(),
            });
        };
        for (name, value) in attrs {
            entity.insert(name.clone(), value.clone());
        }
        state.patches.push((id.to_string(), attrs.clone()));
        Ok(())
    }

    async fn list_entities(&self) -> Result<Vec<Value>, BrokerError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .entities
            .values()
            .cloned()
            .collect())
    }

    fn endpoint(&self) -> &str {
        "fake://orion"
    }
}
