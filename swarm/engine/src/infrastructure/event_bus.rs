// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus - Pub/Sub for Coordination Events
//
// In-memory event streaming over tokio broadcast channels. The bus is
// injected explicitly into each component; there is no global emitter, so
// event ordering stays testable.

use aegis_swarm_core::domain::events::{
    AssignmentEvent, ConflictEvent, DroneEvent, TopologyEvent,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified event type carried on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SwarmEvent {
    Topology(TopologyEvent),
    Drone(DroneEvent),
    Assignment(AssignmentEvent),
    Conflict(ConflictEvent),
}

/// Event bus for publishing and subscribing to coordination events.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<SwarmEvent>>,
}

impl EventBus {
    /// Create a new event bus; `capacity` bounds how many events are buffered
    /// before slow subscribers start lagging.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_topology_event(&self, event: TopologyEvent) {
        self.publish(SwarmEvent::Topology(event));
    }

    pub fn publish_drone_event(&self, event: DroneEvent) {
        self.publish(SwarmEvent::Drone(event));
    }

    pub fn publish_assignment_event(&self, event: AssignmentEvent) {
        self.publish(SwarmEvent::Assignment(event));
    }

    pub fn publish_conflict_event(&self, event: ConflictEvent) {
        self.publish(SwarmEvent::Conflict(event));
    }

    fn publish(&self, event: SwarmEvent) {
        debug!(?event, "publishing event");

        // send() returns the number of receivers; zero subscribers is fine.
        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("no subscribers listening to event");
        }
    }

    /// Subscribe to all coordination events.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for coordination events.
pub struct EventReceiver {
    receiver: broadcast::Receiver<SwarmEvent>,
}

impl EventReceiver {
    /// Receive the next event, waiting until one is available.
    pub async fn recv(&mut self) -> Result<SwarmEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Result<SwarmEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus is closed")]
    Closed,

    #[error("no events available")]
    Empty,

    #[error("receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
