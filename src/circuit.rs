//! Circuit State Store (§4.5): a per-service Closed/Open/HalfOpen state
//! machine with sliding-window failure accounting.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Options controlling when a circuit opens and how long it stays open
/// before probing again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerOptions {
    /// Failures within `window_seconds` needed to trip the circuit.
    pub failure_threshold: u32,
    /// The sliding window over which failures are counted.
    pub window_seconds: i64,
    /// How long the circuit stays Open before allowing a HalfOpen probe.
    pub open_duration_seconds: i64,
    /// Consecutive HalfOpen successes needed to close the circuit again.
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_seconds: 60,
            open_duration_seconds: 30,
            half_open_success_threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitStateInfo {
    pub state: CircuitState,
    pub failure_count: u32,
    pub half_open_success_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    /// Timestamp of the most recent failure recorded for this service,
    /// regardless of the circuit's current state.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// Timestamp of the most recent Closed/Open/HalfOpen transition.
    pub last_state_transition_at: Option<DateTime<Utc>>,
}

impl CircuitStateInfo {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            half_open_success_count: 0,
            opened_at: None,
            last_failure_time: None,
            last_state_transition_at: None,
        }
    }
}

/// Per-service circuit state, guarded independently so one service's traffic
/// never blocks another's (§4.5 fine-grained locking).
#[derive(Debug, Clone)]
struct ServiceCircuit {
    info: CircuitStateInfo,
    failure_timestamps: Vec<DateTime<Utc>>,
}

impl ServiceCircuit {
    fn new() -> Self {
        Self {
            info: CircuitStateInfo::closed(),
            failure_timestamps: Vec::new(),
        }
    }
}

/// A circuit-breaker state store keyed by service name.
#[derive(Debug, Clone, Default)]
pub struct CircuitStateStore {
    services: Arc<RwLock<HashMap<String, ServiceCircuit>>>,
}

impl CircuitStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state for `service`, folding the lazy Open -> HalfOpen
    /// transition into the read itself (§4.5 stricter variant): a caller
    /// never observes a stale `Open` past `open_duration_seconds`.
    pub async fn get_state(
        &self,
        service: &str,
        options: &CircuitBreakerOptions,
        now: DateTime<Utc>,
    ) -> CircuitStateInfo {
        let mut services = self.services.write().await;
        let circuit = services
            .entry(service.to_string())
            .or_insert_with(ServiceCircuit::new);
        maybe_transition_to_half_open(circuit, options, now);
        circuit.info.clone()
    }

    /// Record a failure; may trip the circuit to Open.
    pub async fn record_failure(
        &self,
        service: &str,
        options: &CircuitBreakerOptions,
        now: DateTime<Utc>,
    ) -> CircuitStateInfo {
        let mut services = self.services.write().await;
        let circuit = services
            .entry(service.to_string())
            .or_insert_with(ServiceCircuit::new);
        maybe_transition_to_half_open(circuit, options, now);
        circuit.info.last_failure_time = Some(now);

        match circuit.info.state {
            CircuitState::HalfOpen => open_circuit(circuit, now),
            CircuitState::Open => {}
            CircuitState::Closed => {
                circuit.failure_timestamps.push(now);
                let window_start = now - ChronoDuration::seconds(options.window_seconds);
                circuit
                    .failure_timestamps
                    .retain(|ts| *ts >= window_start);
                circuit.info.failure_count = circuit.failure_timestamps.len() as u32;
                if circuit.info.failure_count >= options.failure_threshold {
                    open_circuit(circuit, now);
                }
            }
        }
        circuit.info.clone()
    }

    /// Record a success; in HalfOpen this may close the circuit, in Closed it
    /// resets the failure window.
    pub async fn record_success(
        &self,
        service: &str,
        options: &CircuitBreakerOptions,
        now: DateTime<Utc>,
    ) -> CircuitStateInfo {
        let mut services = self.services.write().await;
        let circuit = services
            .entry(service.to_string())
            .or_insert_with(ServiceCircuit::new);
        maybe_transition_to_half_open(circuit, options, now);

        match circuit.info.state {
            CircuitState::HalfOpen => {
                circuit.info.half_open_success_count += 1;
                if circuit.info.half_open_success_count >= options.half_open_success_threshold {
                    close_circuit(circuit, now);
                }
            }
            CircuitState::Closed => {
                circuit.failure_timestamps.clear();
                circuit.info.failure_count = 0;
            }
            CircuitState::Open => {}
        }
        circuit.info.clone()
    }

    /// Explicitly persist a state, bypassing the transition rules. Used by
    /// operators to force-reset a misbehaving circuit.
    pub async fn save_state(&self, service: &str, info: CircuitStateInfo) {
        let mut services = self.services.write().await;
        let circuit = services
            .entry(service.to_string())
            .or_insert_with(ServiceCircuit::new);
        circuit.info = info;
        circuit.failure_timestamps.clear();
    }

    pub async fn get_all_states(&self) -> HashMap<String, CircuitStateInfo> {
        let services = self.services.read().await;
        services
            .iter()
            .map(|(k, v)| (k.clone(), v.info.clone()))
            .collect()
    }

    pub async fn remove_state(&self, service: &str) {
        let mut services = self.services.write().await;
        services.remove(service);
    }

    pub async fn clear_all(&self) {
        let mut services = self.services.write().await;
        services.clear();
    }

    pub async fn is_healthy(
        &self,
        service: &str,
        options: &CircuitBreakerOptions,
        now: DateTime<Utc>,
    ) -> bool {
        !matches!(self.get_state(service, options, now).await.state, CircuitState::Open)
    }
}

fn maybe_transition_to_half_open(
    circuit: &mut ServiceCircuit,
    options: &CircuitBreakerOptions,
    now: DateTime<Utc>,
) {
    if circuit.info.state != CircuitState::Open {
        return;
    }
    let Some(opened_at) = circuit.info.opened_at else {
        return;
    };
    if now - opened_at >= ChronoDuration::seconds(options.open_duration_seconds) {
        circuit.info.state = CircuitState::HalfOpen;
        circuit.info.half_open_success_count = 0;
        circuit.info.last_state_transition_at = Some(now);
    }
}

fn open_circuit(circuit: &mut ServiceCircuit, now: DateTime<Utc>) {
    warn!(failure_count = circuit.info.failure_count, "circuit tripped open");
    circuit.info.state = CircuitState::Open;
    circuit.info.opened_at = Some(now);
    circuit.info.half_open_success_count = 0;
    circuit.info.last_state_transition_at = Some(now);
}

fn close_circuit(circuit: &mut ServiceCircuit, now: DateTime<Utc>) {
    circuit.info.state = CircuitState::Closed;
    circuit.info.opened_at = None;
    circuit.info.failure_count = 0;
    circuit.info.half_open_success_count = 0;
    circuit.info.last_state_transition_at = Some(now);
    circuit.failure_timestamps.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CircuitBreakerOptions {
        CircuitBreakerOptions {
            failure_threshold: 3,
            window_seconds: 60,
            open_duration_seconds: 30,
            half_open_success_threshold: 2,
        }
    }

    #[tokio::test]
    async fn trips_open_after_threshold_failures() {
        let store = CircuitStateStore::new();
        let options = options();
        let t0 = Utc::now();
        for i in 0..3 {
            store
                .record_failure("svc", &options, t0 + ChronoDuration::seconds(i))
                .await;
        }
        let state = store.get_state("svc", &options, t0 + ChronoDuration::seconds(3)).await;
        assert_eq!(state.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn stays_closed_below_threshold() {
        let store = CircuitStateStore::new();
        let options = options();
        let t0 = Utc::now();
        store.record_failure("svc", &options, t0).await;
        store.record_failure("svc", &options, t0 + ChronoDuration::seconds(1)).await;
        let state = store.get_state("svc", &options, t0 + ChronoDuration::seconds(2)).await;
        assert_eq!(state.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn failures_outside_window_do_not_count() {
        let store = CircuitStateStore::new();
        let options = options();
        let t0 = Utc::now();
        store.record_failure("svc", &options, t0).await;
        store.record_failure("svc", &options, t0 + ChronoDuration::seconds(1)).await;
        // third failure long after the window resets the older two
        let state = store
            .record_failure("svc", &options, t0 + ChronoDuration::seconds(200))
            .await;
        assert_eq!(state.state, CircuitState::Closed);
        assert_eq!(state.failure_count, 1);
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_open_duration() {
        let store = CircuitStateStore::new();
        let options = options();
        let t0 = Utc::now();
        for i in 0..3 {
            store
                .record_failure("svc", &options, t0 + ChronoDuration::seconds(i))
                .await;
        }
        let state = store
            .get_state("svc", &options, t0 + ChronoDuration::seconds(40))
            .await;
        assert_eq!(state.state, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_immediately() {
        let store = CircuitStateStore::new();
        let options = options();
        let t0 = Utc::now();
        for i in 0..3 {
            store
                .record_failure("svc", &options, t0 + ChronoDuration::seconds(i))
                .await;
        }
        let probe_time = t0 + ChronoDuration::seconds(40);
        let state = store.record_failure("svc", &options, probe_time).await;
        assert_eq!(state.state, CircuitState::Open);
        assert_eq!(state.opened_at, Some(probe_time));
    }

    #[tokio::test]
    async fn half_open_closes_after_success_threshold() {
        let store = CircuitStateStore::new();
        let options = options();
        let t0 = Utc::now();
        for i in 0..3 {
            store
                .record_failure("svc", &options, t0 + ChronoDuration::seconds(i))
                .await;
        }
        let probe_time = t0 + ChronoDuration::seconds(40);
        store.record_success("svc", &options, probe_time).await;
        let state = store
            .record_success("svc", &options, probe_time + ChronoDuration::seconds(1))
            .await;
        assert_eq!(state.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn is_healthy_reflects_open_state() {
        let store = CircuitStateStore::new();
        let options = options();
        let t0 = Utc::now();
        assert!(store.is_healthy("svc", &options, t0).await);
        for i in 0..3 {
            store
                .record_failure("svc", &options, t0 + ChronoDuration::seconds(i))
                .await;
        }
        assert!(!store.is_healthy("svc", &options, t0 + ChronoDuration::seconds(4)).await);
    }

    #[tokio::test]
    async fn remove_and_clear_reset_tracked_services() {
        let store = CircuitStateStore::new();
        let options = options();
        let t0 = Utc::now();
        store.record_failure("a", &options, t0).await;
        store.record_failure("b", &options, t0).await;
        store.remove_state("a").await;
        assert_eq!(store.get_all_states().await.len(), 1);
        store.clear_all().await;
        assert!(store.get_all_states().await.is_empty());
    }
}
