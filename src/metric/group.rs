use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::Metric;
use crate::collector::CollectorShared;
use crate::MetricResult;

/// A family of sibling metrics sharing one name and varying in a single
/// tag value.
///
/// `add` registers a member through the owning collector's registry, so
/// siblings are deduped exactly like directly registered metrics; the
/// group keeps a fast-path map of members it has already attached.
pub struct MetricGroup<T> {
    shared: Arc<CollectorShared>,
    name: String,
    unit: String,
    description: String,
    factory: Box<dyn Fn(&str) -> T + Send + Sync>,
    members: Mutex<HashMap<String, Arc<T>>>,
}

impl<T: Metric> MetricGroup<T> {
    pub(crate) fn new(
        shared: Arc<CollectorShared>,
        name: String,
        unit: String,
        description: String,
        factory: Box<dyn Fn(&str) -> T + Send + Sync>,
    ) -> Self {
        Self {
            shared,
            name,
            unit,
            description,
            factory,
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the member for `tag_value`, creating and attaching it on
    /// first use.
    ///
    /// # Errors
    /// Fails with the same registration errors as
    /// [`MetricsCollector::get_metric`](crate::MetricsCollector::get_metric).
    pub fn add(&self, tag_value: &str) -> MetricResult<Arc<T>> {
        if let Some(existing) = self.members.lock().get(tag_value) {
            return Ok(existing.clone());
        }
        let metric = self.shared.register(
            &self.name,
            &self.unit,
            &self.description,
            || (self.factory)(tag_value),
        )?;
        self.members
            .lock()
            .insert(tag_value.to_owned(), metric.clone());
        Ok(metric)
    }

    /// The member for `tag_value`, if one was already added.
    #[must_use]
    pub fn get(&self, tag_value: &str) -> Option<Arc<T>> {
        self.members.lock().get(tag_value).cloned()
    }

    /// Number of members added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    /// Whether no members were added yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }
}
