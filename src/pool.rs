//! # Pool: bounded, lazily populated set of reusable resources.
//!
//! ```text
//! get()                                   return_instance(r, clean)
//!   lock                                    lock
//!   ├─ available.pop()  ─► assigned         ├─ remove r from assigned (panics if absent)
//!   │   (unhealthy ones are dropped)        │
//!   ├─ assigned < max   ─► factory.create   ├─ clean  ─► available
//!   └─ otherwise        ─► Exhausted        └─ !clean ─► dropped
//! ```
//!
//! A resource is always in exactly one of `available` and `assigned`. Identity is
//! pointer identity of the shared handle. `get` never waits for a resource to be
//! returned; it fails fast once the pool is at capacity.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::PoolError;
use crate::events::{Bus, Event, EventKind};

/// Creates pool resources on demand.
#[async_trait]
pub trait Factory: Send + Sync + 'static {
    /// Resource type handed out by the pool.
    type Item: Send + Sync + 'static;
    /// Creation failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Creates resource number `id` (ids are assigned sequentially from 0).
    async fn create(&self, id: usize) -> Result<Arc<Self::Item>, Self::Error>;

    /// Whether an idle resource can still be handed out. Checked by `get` before
    /// reuse; unhealthy resources are dropped and their capacity freed.
    fn is_healthy(&self, _item: &Self::Item) -> bool {
        true
    }
}

struct Lists<T> {
    available: Vec<Arc<T>>,
    assigned: Vec<Arc<T>>,
    next_id: usize,
}

/// Bounded pool over resources created by `F`.
pub struct Pool<F: Factory> {
    factory: F,
    max: usize,
    lists: Mutex<Lists<F::Item>>,
    bus: Bus,
}

impl<F: Factory> Pool<F> {
    /// Creates an empty pool holding at most `max` resources (at least 1).
    pub fn new(factory: F, max: usize, bus: Bus) -> Self {
        Self {
            factory,
            max: max.max(1),
            lists: Mutex::new(Lists {
                available: Vec::new(),
                assigned: Vec::new(),
                next_id: 0,
            }),
            bus,
        }
    }

    /// Checks out a resource, reusing a healthy returned one before creating a new one.
    pub async fn get(&self) -> Result<Arc<F::Item>, PoolError<F::Error>> {
        let mut lists = self.lists.lock().await;
        while let Some(item) = lists.available.pop() {
            if self.factory.is_healthy(&item) {
                lists.assigned.push(Arc::clone(&item));
                return Ok(item);
            }
            self.bus.publish(
                Event::new(EventKind::PoolInstanceDiscarded)
                    .with_count(lists.assigned.len() + lists.available.len()),
            );
        }

        if lists.assigned.len() >= self.max {
            return Err(PoolError::Exhausted { max: self.max });
        }

        let id = lists.next_id;
        let item = self.factory.create(id).await.map_err(PoolError::Create)?;
        lists.next_id += 1;
        lists.assigned.push(Arc::clone(&item));
        self.bus.publish(
            Event::new(EventKind::PoolInstanceCreated)
                .with_controller(id)
                .with_count(lists.assigned.len()),
        );
        Ok(item)
    }

    /// Hands a checked-out resource back. Unclean resources are dropped.
    ///
    /// # Panics
    /// If `item` is not currently assigned by this pool.
    pub async fn return_instance(&self, item: Arc<F::Item>, clean: bool) {
        let mut lists = self.lists.lock().await;
        let Some(pos) = lists.assigned.iter().position(|a| Arc::ptr_eq(a, &item)) else {
            panic!("returned instance was not assigned by this pool");
        };
        let item = lists.assigned.swap_remove(pos);

        if clean {
            lists.available.push(item);
        } else {
            self.bus.publish(
                Event::new(EventKind::PoolInstanceDiscarded)
                    .with_count(lists.assigned.len() + lists.available.len()),
            );
        }
    }

    /// Maximum number of resources.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Returns `(available, assigned)` counts.
    pub async fn counts(&self) -> (usize, usize) {
        let lists = self.lists.lock().await;
        (lists.available.len(), lists.assigned.len())
    }
}
