//! Queue publisher.
//!
//! Enqueueing is two steps: store the [`DeployRequest`] under its deploy ID,
//! then publish a [`Cds`] for the same ID. The CDS is persisted with an entry
//! in the notification log (for worker processes polling the database) and
//! broadcast to in-process subscribers.
//!
//! The web handlers only enqueue, read status, delete and store leads. The
//! deploy worker consumes the rest: [`Queue::take_next`], [`Queue::put_result`],
//! [`Queue::subscribe`] in the same process, or [`Queue::events_since`] when it
//! polls the database from another one. [`Queue::lead`] is for follow-up on
//! trial signups.
//!
//! SQLite calls are blocking, so each one runs on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::db::{Db, EventRow};
use crate::error::RelayError;
use crate::message::{Cds, DeployRequest};

const NOTIFY_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct Queue {
    db: Arc<Mutex<Db>>,
    notify: broadcast::Sender<Cds>,
}

fn encode<T: Serialize>(value: &T) -> Result<String, RelayError> {
    serde_json::to_string(value).map_err(|e| RelayError::Storage(format!("encode failed: {e}")))
}

fn decode<T: DeserializeOwned>(raw: &str) -> Result<T, RelayError> {
    serde_json::from_str(raw).map_err(|e| RelayError::Storage(format!("corrupt record: {e}")))
}

impl Queue {
    pub fn new(db: Db) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            db: Arc::new(Mutex::new(db)),
            notify,
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RelayError> {
        Ok(Self::new(Db::open(path)?))
    }

    pub fn open_memory() -> Result<Self, RelayError> {
        Ok(Self::new(Db::open_memory()?))
    }

    async fn with_db<T, F>(&self, f: F) -> Result<T, RelayError>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> rusqlite::Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || f(&*db.lock())).await?;
        Ok(result?)
    }

    /// Store the request, then publish its CDS. Both must succeed.
    pub async fn enqueue(&self, request: &DeployRequest) -> Result<Cds, RelayError> {
        let payload = encode(request)?;
        let deploy_id = request.deploy_id.clone();
        self.with_db(move |db| db.insert_request(&deploy_id, &payload))
            .await?;

        let cds = Cds::new(&request.deploy_id);
        self.publish(&cds).await?;
        Ok(cds)
    }

    /// Persist a CDS, log the notification and wake subscribers.
    pub async fn publish(&self, cds: &Cds) -> Result<(), RelayError> {
        let payload = encode(cds)?;
        let deploy_id = cds.deploy_id.clone();
        let event_id = self
            .with_db(move |db| db.publish_cds(&deploy_id, &payload))
            .await?;
        tracing::debug!(deploy_id = %cds.deploy_id, event_id, "cds published");
        // No subscribers is fine; the notification log still has the entry.
        let _ = self.notify.send(cds.clone());
        Ok(())
    }

    /// Status record for a deploy, `None` if the ID is unknown.
    pub async fn retrieve(&self, deploy_id: &str) -> Result<Option<Cds>, RelayError> {
        let id = deploy_id.to_string();
        let raw = self.with_db(move |db| db.get_cds(&id)).await?;
        raw.as_deref().map(decode).transpose()
    }

    /// Remove a queued request and its status. Unknown IDs are not an error.
    pub async fn delete(&self, deploy_id: &str) -> Result<(), RelayError> {
        let id = deploy_id.to_string();
        let removed = self.with_db(move |db| db.delete(&id)).await?;
        tracing::info!(deploy_id, removed, "deploy request deleted");
        Ok(())
    }

    /// Currently queued deploy IDs, oldest first.
    pub async fn keys(&self) -> Result<Vec<String>, RelayError> {
        self.with_db(|db| db.request_ids()).await
    }

    /// Keep the posted trial form (the lead) under its deploy ID.
    pub async fn put_lead(&self, deploy_id: &str, fields: &Map<String, Value>) -> Result<(), RelayError> {
        let payload = encode(fields)?;
        let id = deploy_id.to_string();
        self.with_db(move |db| db.put_lead(&id, &payload)).await
    }

    pub async fn lead(&self, deploy_id: &str) -> Result<Option<Map<String, Value>>, RelayError> {
        let id = deploy_id.to_string();
        let raw = self.with_db(move |db| db.get_lead(&id)).await?;
        raw.as_deref().map(decode).transpose()
    }

    // Worker side.

    /// Dequeue the oldest request for processing.
    pub async fn take_next(&self) -> Result<Option<DeployRequest>, RelayError> {
        let row = self.with_db(|db| db.take_oldest_request()).await?;
        row.map(|(_, payload)| decode(&payload)).transpose()
    }

    /// Record deploy progress reported by the worker.
    pub async fn put_result(&self, cds: &Cds) -> Result<(), RelayError> {
        let payload = encode(cds)?;
        let id = cds.deploy_id.clone();
        self.with_db(move |db| db.put_cds(&id, &payload)).await
    }

    /// Notification log entries after `after_id`.
    pub async fn events_since(&self, after_id: i64) -> Result<Vec<EventRow>, RelayError> {
        self.with_db(move |db| db.events_since(after_id)).await
    }

    /// Live feed of published CDS records. Subscribers that fall behind
    /// by more than the channel capacity miss entries; `events_since` has them.
    pub fn subscribe(&self) -> broadcast::Receiver<Cds> {
        self.notify.subscribe()
    }
}
