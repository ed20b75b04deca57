//! Domain event bus for the Strata cache synchronization engine.
//!
//! Events cover the lifecycle of a synchronization run and the individual
//! file moves within it, so diagnostics and UI collaborators can observe
//! progress without touching engine state. Internally the bus wraps
//! `tokio::broadcast` with a bounded buffer; slow subscribers that lag are
//! skipped forward rather than stalling publishers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use uuid::Uuid;

/// Identifier assigned to each event emitted by the engine.
pub type EventId = u64;

/// Default broadcast channel capacity.
const DEFAULT_CAPACITY: usize = 256;

/// Typed domain events surfaced by the engine.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A synchronization run entered the planning phase.
    RunStarted {
        /// Identifier of the run.
        run_id: Uuid,
        /// Whether the run simulates moves without touching the filesystem.
        dry_run: bool,
    },
    /// The planner finished computing the promote and evict sets.
    RunPlanned {
        /// Identifier of the run.
        run_id: Uuid,
        /// Number of files selected for promotion.
        promote: u64,
        /// Number of files selected for eviction.
        evict: u64,
        /// Number of cache entries refreshed without a move.
        refresh: u64,
        /// Number of candidates skipped because the budget was exhausted.
        skipped_budget: u64,
    },
    /// A file was promoted onto the cache tier.
    FilePromoted {
        /// Identifier of the run.
        run_id: Uuid,
        /// Cache-tier path of the promoted file, in the engine namespace.
        cache_path: String,
        /// Size of the promoted file in bytes.
        size_bytes: u64,
    },
    /// A file was evicted back to the archive tier.
    FileEvicted {
        /// Identifier of the run.
        run_id: Uuid,
        /// Archive-tier path of the evicted file, in the engine namespace.
        archive_path: String,
        /// Size of the evicted file in bytes.
        size_bytes: u64,
    },
    /// A single move failed; the run continues.
    MoveFailed {
        /// Identifier of the run.
        run_id: Uuid,
        /// Move direction, `promote` or `evict`.
        kind: String,
        /// Source path of the failed move.
        path: String,
        /// Failure detail.
        message: String,
    },
    /// A synchronization run reached a terminal status.
    RunCompleted {
        /// Identifier of the run.
        run_id: Uuid,
        /// Terminal status string.
        status: String,
        /// Number of files promoted during the run.
        promoted: u64,
        /// Number of files evicted during the run.
        evicted: u64,
        /// Number of failed moves during the run.
        failed: u64,
    },
    /// Engine health changed; carries the currently degraded components.
    HealthChanged {
        /// Component labels currently degraded, empty when recovered.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for stream consumers.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run_started",
            Self::RunPlanned { .. } => "run_planned",
            Self::FilePromoted { .. } => "file_promoted",
            Self::FileEvicted { .. } => "file_evicted",
            Self::MoveFailed { .. } => "move_failed",
            Self::RunCompleted { .. } => "run_completed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Sequential identifier of the event.
    pub id: EventId,
    /// Emission timestamp.
    pub timestamp: DateTime<Utc>,
    /// The event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Construct a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    ///
    /// Events published while no subscriber is attached are dropped.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
        }
    }

    /// The identifier that will be assigned to the next published event.
    #[must_use]
    pub fn next_event_id(&self) -> EventId {
        self.next_id.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events from the live broadcast channel,
/// skipping forward when the subscriber has lagged past the buffer.
pub struct EventStream {
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, or `None` once the bus has shut down.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
