/*!
 * ID Generation System
 * Type-safe identifier wrappers and the allocator shared by every manager
 */

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Type-Safe ID Wrappers
// ============================================================================

/// User session identifier
pub type UserId = i32;

/// Process-lifetime unique record identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

/// Connection record identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

/// Mission identifier (positive once generated)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissionId(pub i32);

/// Identity of a connection callback object supplied by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(pub u64);

/// Opaque handle that re-identifies a record across the process boundary.
///
/// Created once together with the record and never reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(Uuid);

impl Token {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Token {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable
        let simple = self.0.simple().to_string();
        write!(f, "{}", &simple[..8])
    }
}

// ============================================================================
// ID Generator Trait
// ============================================================================

/// Generic ID generator interface
pub trait IdGenerator<T> {
    /// Generate next ID
    fn next(&self) -> T;

    /// Get current counter value (for debugging)
    fn current(&self) -> T;
}

// ============================================================================
// Atomic Counter Generator
// ============================================================================

/// Lock-free monotonic counter
///
/// # Performance
/// - Cache-line aligned to prevent false sharing
/// - Clones share the same counter
#[repr(C, align(64))]
pub struct AtomicGenerator<T> {
    counter: Arc<AtomicU64>,
    _marker: PhantomData<T>,
}

impl<T> AtomicGenerator<T> {
    /// Create new generator starting at given value
    #[inline]
    pub fn new(start: u64) -> Self {
        Self {
            counter: Arc::new(AtomicU64::new(start)),
            _marker: PhantomData,
        }
    }

    /// Create new generator starting at 1
    #[inline]
    pub fn default_start() -> Self {
        Self::new(1)
    }
}

impl<T> Clone for AtomicGenerator<T> {
    fn clone(&self) -> Self {
        Self {
            counter: Arc::clone(&self.counter),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for AtomicGenerator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicGenerator")
            .field("current", &self.counter.load(Ordering::Relaxed))
            .finish()
    }
}

impl IdGenerator<u64> for AtomicGenerator<u64> {
    #[inline]
    fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    fn current(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

macro_rules! impl_wrapped_generator {
    ($ty:ty, $inner:ty) => {
        impl IdGenerator<$ty> for AtomicGenerator<$ty> {
            #[inline]
            fn next(&self) -> $ty {
                <$ty>::from(self.counter.fetch_add(1, Ordering::SeqCst) as $inner)
            }

            #[inline]
            fn current(&self) -> $ty {
                <$ty>::from(self.counter.load(Ordering::SeqCst) as $inner)
            }
        }

        impl From<$inner> for $ty {
            #[inline]
            fn from(raw: $inner) -> Self {
                Self(raw)
            }
        }
    };
}

impl_wrapped_generator!(RecordId, u64);
impl_wrapped_generator!(ConnectionId, u64);
impl_wrapped_generator!(MissionId, i32);

// ============================================================================
// Shared Allocator
// ============================================================================

/// Every counter the managers draw from.
///
/// One allocator is shared by all sessions of a service so record ids stay
/// unique for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    records: AtomicGenerator<RecordId>,
    connections: AtomicGenerator<ConnectionId>,
    missions: AtomicGenerator<MissionId>,
    events: AtomicGenerator<u64>,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            records: AtomicGenerator::default_start(),
            connections: AtomicGenerator::default_start(),
            missions: AtomicGenerator::default_start(),
            events: AtomicGenerator::default_start(),
        }
    }

    #[inline]
    pub fn next_record(&self) -> RecordId {
        self.records.next()
    }

    #[inline]
    pub fn next_connection(&self) -> ConnectionId {
        self.connections.next()
    }

    #[inline]
    pub fn next_mission(&self) -> MissionId {
        self.missions.next()
    }

    /// Unique id attached to every lifecycle request with a timeout
    #[inline]
    pub fn next_event(&self) -> u64 {
        self.events.next()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
