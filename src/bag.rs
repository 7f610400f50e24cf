//! Generational buckets of cache nodes.
//!
//! An [`AgeBag`] holds every node that was last touched during one
//! Lifespan Manager time slice, as a singly linked chain: the bag owns the
//! head strongly (`Arc<Node<T>>`), and each node owns the rest of the
//! chain through its own `next` link. A node that is swept out of a bag
//! (or whose bag is emptied wholesale) simply has its link dropped; there
//! is no separate deallocation step.
//!
//! [`OrderedBagRing`] is the fixed-size ring of bags indexed by generation
//! number modulo the ring length. Sizing and indexing are owned entirely
//! by the [`LifespanManager`](crate::manager::LifespanManager); this
//! module only provides the storage and the chain-manipulation primitives.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::CacheError;
use crate::node::Node;

/// Number of bags kept in the ring. Large enough to cover the 240 time
/// slices a `max_age` window is divided into, plus slack for bags that are
/// open (the current bag), about to open (pre-allocated next), and lag
/// behind `oldest` before being reclaimed.
pub(crate) const RING_SIZE: usize = 265;

/// One generation's worth of cache nodes.
pub(crate) struct AgeBag<T> {
    start_millis: AtomicU64,
    stop_millis: AtomicU64,
    first: Mutex<Option<Arc<Node<T>>>>,
}

impl<T> AgeBag<T> {
    fn new() -> Self {
        Self {
            start_millis: AtomicU64::new(0),
            stop_millis: AtomicU64::new(u64::MAX),
            first: Mutex::new(None),
        }
    }

    /// Reopens this bag as the current one, recording `now_millis` as its
    /// start and clearing any stale stop marker left by its previous
    /// occupant.
    pub(crate) fn open(&self, now_millis: u64) {
        self.start_millis.store(now_millis, Ordering::Release);
        self.stop_millis.store(u64::MAX, Ordering::Release);
    }

    /// Marks this bag as no longer current: new touches will not land
    /// here.
    pub(crate) fn close(&self, now_millis: u64) {
        self.stop_millis.store(now_millis, Ordering::Release);
    }

    pub(crate) fn start_millis(&self) -> u64 {
        self.start_millis.load(Ordering::Acquire)
    }

    /// `u64::MAX` if this bag is still open (never closed since it was
    /// last reopened).
    pub(crate) fn stop_millis(&self) -> u64 {
        self.stop_millis.load(Ordering::Acquire)
    }

    /// Pushes `node` onto the front of this bag's chain. Caller must hold
    /// the Lifespan Manager mutex.
    pub(crate) fn attach(&self, node: &Arc<Node<T>>) {
        let mut first = self.first.lock();
        node.set_next(first.take());
        *first = Some(Arc::clone(node));
    }

    /// Detaches and returns this bag's entire chain, leaving it empty.
    pub(crate) fn take_chain(&self) -> Option<Arc<Node<T>>> {
        self.first.lock().take()
    }

    /// Returns a clone of the chain head without detaching it. Used by
    /// read-only enumeration, which walks the chain without disturbing it.
    pub(crate) fn peek_chain(&self) -> Option<Arc<Node<T>>> {
        self.first.lock().clone()
    }

    #[cfg(test)]
    pub(crate) fn chain_len(&self) -> usize {
        let mut count = 0;
        let mut cur = self.first.lock().clone();
        while let Some(node) = cur {
            count += 1;
            cur = node.next().clone();
        }
        count
    }
}

/// Fixed-size ring of [`AgeBag`]s addressed by generation number.
pub(crate) struct OrderedBagRing<T> {
    bags: Box<[AgeBag<T>]>,
}

impl<T> OrderedBagRing<T> {
    pub(crate) fn new() -> Self {
        let bags = (0..RING_SIZE).map(|_| AgeBag::new()).collect();
        Self { bags }
    }

    /// Looks up the bag for `generation`, validating it is non-negative.
    /// Overflow of the generation counter itself is detected by the
    /// caller before it ever reaches the ring.
    pub(crate) fn get(&self, generation: i64) -> Result<&AgeBag<T>, CacheError> {
        if generation < 0 {
            return Err(CacheError::BagNumberInvalid(generation));
        }
        let index = (generation as u64 % RING_SIZE as u64) as usize;
        Ok(&self.bags[index])
    }

    /// Walks every bag in the ring, detaching its chain and clearing each
    /// node's generation marker. Used by a full cache clear.
    pub(crate) fn empty(&self) {
        for bag in self.bags.iter() {
            let mut cur = bag.take_chain();
            while let Some(node) = cur {
                node.clear_generation();
                cur = node.next().take();
            }
        }
    }
}
