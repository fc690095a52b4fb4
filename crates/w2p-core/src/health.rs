//! Health check system for monitoring component status.
//!
//! Tracks the event source and Pub/Sub sink as named components, plus the
//! ingestion loop's connection state and the time of the last publish.

use crate::engine::ConnectionState;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Component name for the event stream.
pub const SOURCE: &str = "source";
/// Component name for the Pub/Sub sink.
pub const SINK: &str = "sink";

/// Health status of a component.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentStatus {
    /// Component is healthy
    Healthy,
    /// Component is degraded but operational
    Degraded(String),
    /// Component is unhealthy
    Unhealthy(String),
    /// Component status is unknown
    Unknown,
}

/// Overall system health status.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    /// All components healthy
    Healthy,
    /// Some components degraded
    Degraded,
    /// System is unhealthy
    Unhealthy,
}

/// Health check manager for tracking component health.
pub struct HealthCheck {
    components: RwLock<HashMap<String, ComponentStatus>>,
    connection_state: RwLock<ConnectionState>,
    last_published_at: RwLock<Option<DateTime<Utc>>>,
}

impl HealthCheck {
    /// Create a new health check manager.
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
            connection_state: RwLock::new(ConnectionState::Disconnected),
            last_published_at: RwLock::new(None),
        }
    }

    /// Create a manager with the source and sink registered.
    pub fn for_relay() -> Self {
        let health = Self::new();
        health.register_component(SOURCE);
        health.register_component(SINK);
        health
    }

    /// Register a component to track.
    pub fn register_component(&self, name: &str) {
        self.components
            .write()
            .insert(name.to_string(), ComponentStatus::Unknown);
    }

    /// Mark a component as healthy.
    pub fn mark_healthy(&self, name: &str) {
        self.set(name, ComponentStatus::Healthy);
    }

    /// Mark a component as degraded.
    pub fn mark_degraded(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Degraded(reason.to_string()));
    }

    /// Mark a component as unhealthy.
    pub fn mark_unhealthy(&self, name: &str, reason: &str) {
        self.set(name, ComponentStatus::Unhealthy(reason.to_string()));
    }

    fn set(&self, name: &str, status: ComponentStatus) {
        self.components.write().insert(name.to_string(), status);
    }

    /// Get the status of a specific component.
    pub fn get_component_status(&self, name: &str) -> Option<ComponentStatus> {
        self.components.read().get(name).cloned()
    }

    /// Get all component statuses.
    pub fn get_all_statuses(&self) -> HashMap<String, ComponentStatus> {
        self.components.read().clone()
    }

    /// Get overall system health status.
    pub fn overall_status(&self) -> HealthStatus {
        if *self.connection_state.read() == ConnectionState::Stopped {
            return HealthStatus::Unhealthy;
        }

        let components = self.components.read();

        let mut has_degraded = false;
        for status in components.values() {
            match status {
                ComponentStatus::Unhealthy(_) => return HealthStatus::Unhealthy,
                ComponentStatus::Degraded(_) => has_degraded = true,
                _ => {}
            }
        }

        if has_degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Check if the system is operational (healthy or degraded).
    pub fn is_operational(&self) -> bool {
        matches!(
            self.overall_status(),
            HealthStatus::Healthy | HealthStatus::Degraded
        )
    }

    /// Record the loop's current connection state.
    pub fn set_connection_state(&self, state: ConnectionState) {
        *self.connection_state.write() = state;
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read()
    }

    /// Record a successful publish.
    pub fn mark_published(&self) {
        *self.last_published_at.write() = Some(Utc::now());
    }

    /// When the last event was published, if ever.
    pub fn last_published_at(&self) -> Option<DateTime<Utc>> {
        *self.last_published_at.read()
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new()
    }
}
