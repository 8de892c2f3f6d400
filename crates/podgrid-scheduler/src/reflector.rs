//! List-then-watch reflector for one kind.
//!
//! ```text
//!   ┌──► list ──diff vs local store──► on_add / on_update / on_delete
//!   │      │
//!   │      ▼
//!   │    watch(from list version) ──event──► dedupe by version ──► handler
//!   │      │
//!   │   error / stream end
//!   └── sleep(resync) ◄┘
//! ```
//!
//! The local store is what makes duplicate and stale delivery harmless:
//! an event whose resource version is not newer than the stored copy is
//! dropped, and deletes for unknown keys are ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, trace, warn};

use podgrid_types::WatchEvent;

use crate::client::{ClientError, ClientResult, FieldSelector, ResourceClient, Selectable};
use crate::error::HandlerResult;

/// Callbacks for one informer; errors are logged and the stream continues.
pub trait EventHandler<T>: Send + Sync {
    fn on_add(&self, obj: &T) -> HandlerResult;

    fn on_update(&self, old: &T, new: &T) -> HandlerResult;

    /// `obj` is the object as the delete event carried it, which for a pod
    /// leaving a field selector is its new state. Deletes found by a relist
    /// pass the last stored copy.
    fn on_delete(&self, obj: &T) -> HandlerResult;
}

pub struct Reflector<T, C> {
    name: &'static str,
    client: Arc<C>,
    selector: FieldSelector,
    handler: Arc<dyn EventHandler<T>>,
    resync: Duration,
    store: HashMap<String, T>,
    synced: watch::Sender<bool>,
}

impl<T, C> Reflector<T, C>
where
    T: Selectable,
    C: ResourceClient<T> + 'static,
{
    pub fn new(
        name: &'static str,
        client: Arc<C>,
        selector: FieldSelector,
        handler: Arc<dyn EventHandler<T>>,
        resync: Duration,
    ) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            name,
            client,
            selector,
            handler,
            resync,
            store: HashMap::new(),
            synced,
        }
    }

    /// Flips to `true` after the first successful list.
    pub fn synced(&self) -> watch::Receiver<bool> {
        self.synced.subscribe()
    }

    /// Run until `shutdown` flips.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        debug!(informer = self.name, "reflector starting");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.list_and_watch(&mut shutdown).await {
                Ok(()) => break,
                Err(e) => warn!(informer = self.name, error = %e, "watch ended, relisting"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.resync) => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!(informer = self.name, "reflector stopped");
    }

    /// `Ok` only on shutdown; every other exit is an error to resync from.
    async fn list_and_watch(&mut self, shutdown: &mut watch::Receiver<bool>) -> ClientResult<()> {
        let listed = self.client.list(&self.selector).await?;
        self.replace(listed.items);
        self.synced.send_replace(true);

        let mut stream = self.client.watch(&self.selector, listed.resource_version).await?;
        loop {
            tokio::select! {
                event = stream.recv() => match event {
                    Some(Ok(event)) => self.apply(event),
                    Some(Err(e)) => return Err(e),
                    None => return Err(ClientError::Disconnected("watch stream closed".to_string())),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Reconcile the local store with a full listing.
    fn replace(&mut self, items: Vec<T>) {
        let mut fresh: HashMap<String, T> = items.into_iter().map(|o| (o.key(), o)).collect();

        let gone: Vec<String> = self
            .store
            .keys()
            .filter(|k| !fresh.contains_key(*k))
            .cloned()
            .collect();
        for key in gone {
            if let Some(old) = self.store.remove(&key) {
                self.report("delete", &key, self.handler.on_delete(&old));
            }
        }

        for (key, obj) in fresh.drain() {
            match self.store.get(&key) {
                Some(old) if old.resource_version() == obj.resource_version() => {}
                Some(old) => {
                    let result = self.handler.on_update(old, &obj);
                    self.report("update", &key, result);
                    self.store.insert(key, obj);
                }
                None => {
                    let result = self.handler.on_add(&obj);
                    self.report("add", &key, result);
                    self.store.insert(key, obj);
                }
            }
        }
    }

    fn apply(&mut self, event: WatchEvent<T>) {
        match event {
            WatchEvent::Added(obj) | WatchEvent::Modified(obj) => {
                let key = obj.key();
                match self.store.get(&key) {
                    Some(old) if old.resource_version() >= obj.resource_version() => {
                        trace!(informer = self.name, %key, "dropping stale event");
                    }
                    Some(old) => {
                        let result = self.handler.on_update(old, &obj);
                        self.report("update", &key, result);
                        self.store.insert(key, obj);
                    }
                    None => {
                        let result = self.handler.on_add(&obj);
                        self.report("add", &key, result);
                        self.store.insert(key, obj);
                    }
                }
            }
            WatchEvent::Deleted(obj) => {
                let key = obj.key();
                match self.store.remove(&key) {
                    Some(_) => {
                        let result = self.handler.on_delete(&obj);
                        self.report("delete", &key, result);
                    }
                    None => trace!(informer = self.name, %key, "delete for unknown key"),
                }
            }
        }
    }

    fn report(&self, op: &'static str, key: &str, result: HandlerResult) {
        if let Err(e) = result {
            warn!(informer = self.name, op, %key, error = %e, "event handler failed");
        }
    }
}
