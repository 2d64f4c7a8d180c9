use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
#[cfg(feature = "multithreaded")]
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(feature = "multithreaded")]
use std::sync::Arc;

#[cfg(feature = "multithreaded")]
use dashmap::DashMap;
use indexmap::IndexSet;
use once_cell::sync::Lazy;

use crate::parse::ftrace::Row;

const CAPACITY_LEDGER: usize = 512;

// Fixed seeds, so that a fingerprint means the same thing in every thread and every run.
static FINGERPRINT_STATE: Lazy<ahash::RandomState> = Lazy::new(|| {
    ahash::RandomState::with_seeds(
        0x243f_6a88_85a3_08d3,
        0x1319_8a2e_0370_7344,
        0xa409_3822_299f_31d0,
        0x082e_fa98_ec4e_6c89,
    )
});

/// A digest of the shape of a call pattern: the ordered `(depth, function)` pairs of its rows.
///
/// The CPU a pattern ran on and the task it ran for do not contribute. Equal shapes always give
/// equal fingerprints; distinct shapes give distinct fingerprints except for hash collisions,
/// which are accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Computes the fingerprint of a sequence of rows.
    pub fn of<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a Row>,
    {
        let mut hasher = FINGERPRINT_STATE.build_hasher();
        for row in rows {
            row.depth.hash(&mut hasher);
            row.function.hash(&mut hasher);
        }
        Fingerprint(hasher.finish())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The outcome of [`Ledger::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Registration {
    /// Whether this is the first time the fingerprint was seen.
    pub is_new: bool,
    /// The position at which the fingerprint was first registered.
    pub index: usize,
}

/// The set of pattern fingerprints emitted so far, in the order they were first seen.
///
/// A ledger only grows. It uses:
/// * an insertion-ordered set if single-threaded
/// * a `DashMap` and a shared counter if multi-threaded
#[derive(Clone, Debug)]
pub enum Ledger {
    /// Owned by a single thread.
    SingleThreaded(IndexSet<Fingerprint, ahash::RandomState>),
    /// Shared by every clone of the ledger.
    #[cfg(feature = "multithreaded")]
    MultiThreaded {
        /// Fingerprint to emission index.
        seen: Arc<DashMap<Fingerprint, usize, ahash::RandomState>>,
        /// The next index to hand out.
        next: Arc<AtomicUsize>,
    },
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Ledger {
    /// Creates a ledger suitable for `nthreads` concurrent users.
    pub fn new(nthreads: usize) -> Self {
        assert_ne!(nthreads, 0);
        #[cfg(feature = "multithreaded")]
        {
            if nthreads > 1 {
                let seen =
                    DashMap::with_capacity_and_hasher(CAPACITY_LEDGER, ahash::RandomState::new());
                return Ledger::MultiThreaded {
                    seen: Arc::new(seen),
                    next: Arc::new(AtomicUsize::new(0)),
                };
            }
        }
        Ledger::SingleThreaded(IndexSet::with_capacity_and_hasher(
            CAPACITY_LEDGER,
            ahash::RandomState::new(),
        ))
    }

    /// Registers `fingerprint`, assigning it the next emission index if it has not been seen
    /// before.
    ///
    /// Checking and inserting happen as one step, also across clones of a multi-threaded ledger:
    /// two racing registrations of the same fingerprint never both come back as new.
    pub fn register(&mut self, fingerprint: Fingerprint) -> Registration {
        use self::Ledger::*;
        match self {
            SingleThreaded(set) => {
                let (index, is_new) = set.insert_full(fingerprint);
                Registration { is_new, index }
            }
            #[cfg(feature = "multithreaded")]
            MultiThreaded { seen, next } => {
                use dashmap::mapref::entry::Entry;
                // The entry holds its shard's write lock until it is dropped.
                match seen.entry(fingerprint) {
                    Entry::Occupied(entry) => Registration {
                        is_new: false,
                        index: *entry.get(),
                    },
                    Entry::Vacant(entry) => {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        entry.insert(index);
                        Registration {
                            is_new: true,
                            index,
                        }
                    }
                }
            }
        }
    }

    /// Number of distinct fingerprints registered.
    pub fn len(&self) -> usize {
        use self::Ledger::*;
        match self {
            SingleThreaded(set) => set.len(),
            #[cfg(feature = "multithreaded")]
            MultiThreaded { seen, .. } => seen.len(),
        }
    }

    /// Whether nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether clones of this ledger share their contents.
    pub fn is_concurrent(&self) -> bool {
        use self::Ledger::*;
        match self {
            SingleThreaded(_) => false,
            #[cfg(feature = "multithreaded")]
            MultiThreaded { .. } => true,
        }
    }
}
