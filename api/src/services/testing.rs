//! Recording transaction source for tests

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;

use super::db::{TransactionHandle, TransactionSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Begin(u64),
    Commit(u64),
    Rollback(u64),
}

impl Event {
    fn is_final(&self) -> bool {
        matches!(self, Event::Commit(_) | Event::Rollback(_))
    }
}

#[derive(Debug, Error)]
#[error("mock database error: {0}")]
pub struct MockError(pub &'static str);

#[derive(Debug, Default)]
pub struct Ledger {
    events: Mutex<Vec<Event>>,
    changed: Notify,
    next_id: AtomicU64,
}

impl Ledger {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
        self.changed.notify_one();
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until `count` transactions have committed or rolled back.
    pub async fn wait_for_finalized(&self, count: usize) -> Vec<Event> {
        let wait = async {
            loop {
                let done = self.events().iter().filter(|e| e.is_final()).count();
                if done >= count {
                    return self.events();
                }
                self.changed.notified().await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("transactions finalized in time")
    }
}

#[derive(Clone, Default)]
pub struct MockSource {
    pub ledger: Arc<Ledger>,
    fail_begin: bool,
    fail_finish: bool,
    closed: bool,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail_begin: true,
            ..Self::default()
        }
    }

    /// Begins normally; every commit and rollback is recorded, then fails.
    pub fn failing_finish() -> Self {
        Self {
            fail_finish: true,
            ..Self::default()
        }
    }

    pub fn closed() -> Self {
        Self {
            closed: true,
            ..Self::default()
        }
    }

    pub fn begin_now(&self) -> MockTrx {
        let id = self.ledger.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.ledger.record(Event::Begin(id));
        MockTrx {
            id,
            ledger: Arc::clone(&self.ledger),
            fail_finish: self.fail_finish,
        }
    }
}

impl TransactionSource for MockSource {
    type Transaction = MockTrx;

    async fn begin(&self) -> Result<MockTrx, MockError> {
        tokio::task::yield_now().await;
        if self.fail_begin {
            return Err(MockError("connection refused"));
        }
        Ok(self.begin_now())
    }

    fn check(&self) -> Result<(), String> {
        if self.closed {
            return Err("client is closed".to_string());
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MockTrx {
    id: u64,
    ledger: Arc<Ledger>,
    fail_finish: bool,
}

impl MockTrx {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn finish(&self, event: Event) -> Result<(), MockError> {
        self.ledger.record(event);
        if self.fail_finish {
            return Err(MockError("connection lost"));
        }
        Ok(())
    }
}

impl TransactionHandle for MockTrx {
    type Error = MockError;

    async fn commit(self) -> Result<(), MockError> {
        tokio::task::yield_now().await;
        self.finish(Event::Commit(self.id))
    }

    async fn rollback(self) -> Result<(), MockError> {
        tokio::task::yield_now().await;
        self.finish(Event::Rollback(self.id))
    }
}
