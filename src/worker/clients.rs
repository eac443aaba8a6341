//! Pages connected to the worker.
//!
//! Each page ("client") holds a [`Subscription`] that receives
//! [`WorkerMessage`]s. Messages addressed to a page that is no longer
//! connected, or sent without an addressee, go to every connected page.
//!
//! Progress frames travel through a bounded buffer and are dropped for a page
//! that has stopped reading. Completion messages use their own queue and are
//! always delivered, after any progress already buffered.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use super::{
    lock::{rw_read, rw_write},
    messages::WorkerMessage,
};

const SOURCE: &str = "worker::clients";
const PROGRESS_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct ClientSlot {
    progress: mpsc::Sender<WorkerMessage>,
    completions: mpsc::UnboundedSender<WorkerMessage>,
    controller: Option<String>,
}

impl ClientSlot {
    /// Hand `message` to the page. False once the page has disconnected.
    fn deliver(&self, id: &ClientId, message: WorkerMessage) -> bool {
        if matches!(message, WorkerMessage::CacheComplete(_)) {
            return self.completions.send(message).is_ok();
        }

        match self.progress.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(client = %id, "progress buffer full, dropping frame");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    fn is_closed(&self) -> bool {
        self.progress.is_closed()
    }
}

#[derive(Default)]
pub struct ClientRegistry {
    clients: RwLock<HashMap<ClientId, ClientSlot>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a page, replacing any earlier connection under the same id.
    ///
    /// The page is uncontrolled until the next activation claims it.
    pub fn subscribe(self: &Arc<Self>, id: ClientId) -> Subscription {
        let (progress_tx, progress) = mpsc::channel(PROGRESS_BUFFER);
        let (completions_tx, completions) = mpsc::unbounded_channel();
        rw_write(&self.clients, SOURCE, "subscribe").insert(
            id.clone(),
            ClientSlot {
                progress: progress_tx,
                completions: completions_tx,
                controller: None,
            },
        );
        debug!(client = %id, "client connected");

        Subscription {
            registry: Arc::clone(self),
            client: id,
            progress,
            completions,
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.clients, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take control of every connected page on behalf of `generation`.
    pub fn claim(&self, generation: &str) -> usize {
        let mut guard = rw_write(&self.clients, SOURCE, "claim");
        for slot in guard.values_mut() {
            slot.controller = Some(generation.to_string());
        }
        guard.len()
    }

    /// The generation controlling `id`, if it has been claimed.
    pub fn controller(&self, id: &ClientId) -> Option<String> {
        rw_read(&self.clients, SOURCE, "controller")
            .get(id)
            .and_then(|slot| slot.controller.clone())
    }

    /// Deliver `message` to `target`, or to every page when `target` is
    /// unknown. Returns the number of pages reached.
    pub fn post(&self, target: Option<&ClientId>, message: WorkerMessage) -> usize {
        let mut guard = rw_write(&self.clients, SOURCE, "post");

        if let Some((id, slot)) = target.and_then(|id| guard.get_key_value(id))
            && slot.deliver(id, message.clone())
        {
            return 1;
        }

        guard.retain(|_, slot| !slot.is_closed());
        guard
            .iter()
            .filter(|(id, slot)| slot.deliver(id, message.clone()))
            .count()
    }

    fn release(&self, id: &ClientId) {
        let mut guard = rw_write(&self.clients, SOURCE, "release");
        if guard.get(id).is_some_and(ClientSlot::is_closed) {
            guard.remove(id);
            debug!(client = %id, "client disconnected");
        }
    }
}

/// Receiving end of a connected page. Dropping it disconnects the page.
pub struct Subscription {
    registry: Arc<ClientRegistry>,
    client: ClientId,
    progress: mpsc::Receiver<WorkerMessage>,
    completions: mpsc::UnboundedReceiver<WorkerMessage>,
}

impl Subscription {
    pub fn client(&self) -> &ClientId {
        &self.client
    }

    pub async fn recv(&mut self) -> Option<WorkerMessage> {
        tokio::select! {
            biased;
            Some(message) = self.progress.recv() => Some(message),
            Some(message) = self.completions.recv() => Some(message),
            else => None,
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.progress.close();
        self.completions.close();
        self.registry.release(&self.client);
    }
}
