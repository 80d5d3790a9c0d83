use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{EndpointHandler, MetricEndpoint, SendError};
use crate::reading::{MetricDefinition, MetricReading};
use crate::writer::{EncodeScratch, PayloadFraming};
use crate::MetricResult;

#[derive(Default)]
struct LocalStore {
    readings: BTreeMap<(String, String), MetricReading>,
    definitions: BTreeMap<String, MetricDefinition>,
}

/// An in-process sink that keeps the most recent reading per
/// name+suffix, mainly for tests and debugging surfaces.
///
/// The sink itself stays with the caller; [`endpoint`](Self::endpoint)
/// produces the handler handed to the collector. Flushing is a no-op:
/// readings are captured during serialization.
#[derive(Clone, Default)]
pub struct LocalSink {
    store: Arc<Mutex<LocalStore>>,
}

impl LocalSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the endpoint to register with the collector.
    #[must_use]
    pub fn endpoint(&self, name: impl Into<String>) -> MetricEndpoint {
        let store = self.store.clone();
        MetricEndpoint::new(
            name,
            Box::new(LocalHandler {
                framing: Arc::new(LocalFraming { store: store.clone() }),
                store,
            }),
        )
    }

    /// The most recent reading recorded under `name` + `suffix`.
    #[must_use]
    pub fn latest(&self, name: &str, suffix: &str) -> Option<MetricReading> {
        self.store
            .lock()
            .readings
            .get(&(name.to_owned(), suffix.to_owned()))
            .cloned()
    }

    /// Every retained reading, ordered by name and suffix.
    #[must_use]
    pub fn readings(&self) -> Vec<MetricReading> {
        self.store.lock().readings.values().cloned().collect()
    }

    /// The metric definitions seen so far, deduped by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<MetricDefinition> {
        self.store.lock().definitions.values().cloned().collect()
    }

    /// Forgets all retained readings and definitions.
    pub fn clear(&self) {
        let mut store = self.store.lock();
        store.readings.clear();
        store.definitions.clear();
    }
}

struct LocalHandler {
    framing: Arc<LocalFraming>,
    store: Arc<Mutex<LocalStore>>,
}

impl EndpointHandler for LocalHandler {
    fn framing(&self) -> Arc<dyn PayloadFraming> {
        self.framing.clone()
    }

    fn send(&mut self, _payload: &[u8]) -> Result<(), SendError> {
        Ok(())
    }

    fn serialize_metadata(&mut self, definitions: &[MetricDefinition]) -> MetricResult<()> {
        let mut store = self.store.lock();
        for def in definitions {
            store
                .definitions
                .entry(def.full_name.clone())
                .or_insert_with(|| def.clone());
        }
        Ok(())
    }
}

// Captures readings at encode time and writes no wire bytes, so nothing
// ever reaches the pending queue.
struct LocalFraming {
    store: Arc<Mutex<LocalStore>>,
}

impl PayloadFraming for LocalFraming {
    fn open(&self, _buf: &mut Vec<u8>, _first: &MetricReading) {}

    fn encode_reading(
        &self,
        _buf: &mut Vec<u8>,
        reading: &MetricReading,
        _scratch: &mut EncodeScratch,
    ) -> MetricResult<()> {
        self.store.lock().readings.insert(
            (reading.name.to_string(), reading.suffix.to_string()),
            reading.clone(),
        );
        Ok(())
    }

    fn separator(&self) -> &'static [u8] {
        b""
    }

    fn close(&self, _buf: &mut Vec<u8>) {}
}
