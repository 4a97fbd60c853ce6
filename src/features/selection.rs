//! The one piece of shared mutable state: which test the user is scanning.
//!
//! The store is handed to whoever needs it (link handling, capture screen)
//! instead of living in a global. Every successful `set` is broadcast as a
//! [`SelectionEvent`]; listeners run on the tokio runtime after `set` has
//! returned, one event per `set`, in `set` order.

use crate::features::deep_link::{self, ParseError};
use crate::features::test_type::TestType;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSelection {
    test_type: TestType,
    auxiliary_fields: Vec<String>,
}

impl TestSelection {
    pub fn new(test_type: TestType, auxiliary_fields: Vec<String>) -> Self {
        Self {
            test_type,
            auxiliary_fields,
        }
    }

    pub fn test_type(&self) -> TestType {
        self.test_type
    }

    /// Extra link fields in the order they appeared after the type token.
    pub fn auxiliary_fields(&self) -> &[String] {
        &self.auxiliary_fields
    }

    /// Printed kits put the batch/lot number right after the test type.
    pub fn batch_number(&self) -> Option<&str> {
        self.auxiliary_fields.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SelectionEvent {
    Changed {
        sequence: u64,
        selection: TestSelection,
    },
}

impl SelectionEvent {
    pub fn sequence(&self) -> u64 {
        match self {
            SelectionEvent::Changed { sequence, .. } => *sequence,
        }
    }

    pub fn selection(&self) -> &TestSelection {
        match self {
            SelectionEvent::Changed { selection, .. } => selection,
        }
    }
}

struct Slot {
    current: Option<Arc<TestSelection>>,
    sequence: u64,
}

struct Inner {
    slot: Mutex<Slot>,
    events: broadcast::Sender<SelectionEvent>,
}

/// Cheap to clone; clones share the same selection.
#[derive(Clone)]
pub struct SelectionStore {
    inner: Arc<Inner>,
}

impl Default for SelectionStore {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl SelectionStore {
    /// `capacity` is how many events a slow listener may fall behind before it
    /// starts skipping.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(Slot {
                    current: None,
                    sequence: 0,
                }),
                events,
            }),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        // A panic elsewhere cannot leave a half-written Arc behind, so the
        // value is still whole.
        self.inner
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the current selection and notify listeners.
    pub fn set(&self, selection: TestSelection) {
        let mut slot = self.slot();
        slot.sequence += 1;
        let sequence = slot.sequence;
        slot.current = Some(Arc::new(selection.clone()));

        tracing::info!(
            sequence,
            test_type = %selection.test_type(),
            fields = selection.auxiliary_fields().len(),
            "test selection updated"
        );

        // Sent under the lock so concurrent sets are observed in set order.
        if self
            .inner
            .events
            .send(SelectionEvent::Changed {
                sequence,
                selection,
            })
            .is_err()
        {
            tracing::debug!(sequence, "selection changed with no listeners");
        }
    }

    pub fn get(&self) -> Option<TestSelection> {
        self.slot().current.as_deref().cloned()
    }

    /// Number of successful `set` calls so far.
    pub fn sequence(&self) -> u64 {
        self.slot().sequence
    }

    pub fn subscribe(&self) -> SelectionSubscriber {
        SelectionSubscriber {
            rx: self.inner.events.subscribe(),
        }
    }

    #[cfg(test)]
    pub fn listener_count(&self) -> usize {
        self.inner.events.receiver_count()
    }

    /// Run `handler` once for every later `set`, on the current tokio runtime.
    ///
    /// The task ends when every store clone is dropped. Panics if called
    /// outside a runtime.
    pub fn on_change<F>(&self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(&SelectionEvent) + Send + 'static,
    {
        let mut subscriber = self.subscribe();
        tokio::spawn(async move {
            while let Some(event) = subscriber.recv().await {
                handler(&event);
            }
        })
    }
}

pub struct SelectionSubscriber {
    rx: broadcast::Receiver<SelectionEvent>,
}

impl SelectionSubscriber {
    /// Next event, or `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<SelectionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "selection listener fell behind");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant; `None` when nothing is queued.
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<SelectionEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "selection listener fell behind");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }
}

/// Parse `raw_link` and, only if that succeeds, make it the current selection.
pub fn commit_link(
    store: &SelectionStore,
    parser: &deep_link::LinkParser,
    raw_link: &str,
) -> Result<TestSelection, ParseError> {
    match parser.parse(raw_link) {
        Ok(selection) => {
            store.set(selection.clone());
            Ok(selection)
        }
        Err(err) => {
            tracing::warn!(error = %err, "deep link rejected, keeping previous selection");
            Err(err)
        }
    }
}
