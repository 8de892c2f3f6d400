//! FIFO of unscheduled pods, keyed by pod so each pod is queued at most once.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};

use podgrid_types::Pod;

#[derive(Default)]
struct Inner {
    order: VecDeque<String>,
    items: HashMap<String, Pod>,
}

#[derive(Default)]
pub struct SchedulingQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl SchedulingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue, or replace the queued copy in place.
    pub fn add(&self, pod: Pod) {
        let key = pod.key();
        {
            let mut inner = self.inner.lock();
            if inner.items.insert(key.clone(), pod).is_none() {
                inner.order.push_back(key);
            }
        }
        self.notify.notify_one();
    }

    /// Enqueue only if absent; returns whether it was added.
    pub fn add_if_not_present(&self, pod: Pod) -> bool {
        let key = pod.key();
        {
            let mut inner = self.inner.lock();
            if inner.items.contains_key(&key) {
                return false;
            }
            inner.items.insert(key.clone(), pod);
            inner.order.push_back(key);
        }
        self.notify.notify_one();
        true
    }

    /// Refresh a queued pod; pods not in the queue are left out.
    pub fn update(&self, pod: Pod) -> bool {
        let mut inner = self.inner.lock();
        match inner.items.get_mut(&pod.key()) {
            Some(slot) => {
                *slot = pod;
                true
            }
            None => false,
        }
    }

    pub fn delete(&self, key: &str) -> Option<Pod> {
        let mut inner = self.inner.lock();
        let pod = inner.items.remove(key)?;
        inner.order.retain(|k| k != key);
        Some(pod)
    }

    pub fn try_pop(&self) -> Option<Pod> {
        let mut inner = self.inner.lock();
        while let Some(key) = inner.order.pop_front() {
            if let Some(pod) = inner.items.remove(&key) {
                return Some(pod);
            }
        }
        None
    }

    /// Wait for the next pod; `None` once `shutdown` flips.
    pub async fn pop(&self, shutdown: &mut watch::Receiver<bool>) -> Option<Pod> {
        loop {
            if *shutdown.borrow() {
                return None;
            }
            if let Some(pod) = self.try_pop() {
                return Some(pod);
            }
            tokio::select! {
                _ = self.notify.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().items.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
