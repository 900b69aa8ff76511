//! The controller's authoritative mirror of pod status.
//!
//! `PodState` is the single unit of persisted state: identity, setup
//! progress, alert configuration, suspend state, the first captured fault,
//! timing, transport counters, and the dose ledger. It is pure — every
//! method that needs wall-clock time takes `now` as a parameter — and it is
//! mutated exclusively through the owning [`Session`](crate::Session).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use podlink_types::{
    AlertSet, AlertSlot, DeliveryKind, DeliveryKindSet, Lot, PodAddress, PodAlert, SetupProgress,
    SuspendState, Tid, Units, consts,
};
use podlink_wire::{DetailedStatus, NonceGenerator, StatusResponse};

use crate::dose::{DoseLedger, ResumeDose, ScheduledCertainty, SuspendDose};
use crate::transport::MessageTransportState;

/// How much later a recomputed expiry must be before we accept it; filters
/// round-trip jitter that would otherwise make the expiry oscillate.
const EXPIRY_FORWARD_TOLERANCE_SECS: i64 = 60;

/// Cumulative insulin and reservoir level snapshot from a status response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsulinMeasurements {
    pub delivered: Units,
    pub reservoir: Option<Units>,
    pub validity_time: DateTime<Utc>,
}

/// Persistent state of one pod, from pairing to deactivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodState {
    pub address: PodAddress,
    pub pi_version: String,
    pub pm_version: String,
    pub lot: Lot,
    pub tid: Tid,
    pub nonce_state: NonceGenerator,
    #[serde(default)]
    pub activated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub setup_progress: SetupProgress,
    pub suspend_state: SuspendState,
    #[serde(flatten)]
    pub doses: DoseLedger,
    #[serde(default)]
    pub fault: Option<DetailedStatus>,
    #[serde(default)]
    pub configured_alerts: Vec<PodAlert>,
    #[serde(default)]
    pub active_alert_slots: AlertSet,
    #[serde(default)]
    pub last_insulin_measurements: Option<InsulinMeasurements>,
    #[serde(default)]
    pub message_transport_state: MessageTransportState,
    #[serde(default)]
    pub prime_finish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub setup_units_delivered: Option<Units>,
}

impl PodState {
    /// Creates the state for a freshly-paired pod. The nonce generator is
    /// seeded from the pod's factory identifiers.
    pub fn new(
        address: PodAddress,
        pi_version: String,
        pm_version: String,
        lot: Lot,
        tid: Tid,
        paired_at: DateTime<Utc>,
    ) -> Self {
        Self {
            address,
            pi_version,
            pm_version,
            lot,
            tid,
            nonce_state: NonceGenerator::new(lot, tid),
            activated_at: Some(paired_at),
            expires_at: None,
            setup_progress: SetupProgress::AddressAssigned,
            suspend_state: SuspendState::Resumed { at: paired_at },
            doses: DoseLedger::new(),
            fault: None,
            configured_alerts: Vec::new(),
            active_alert_slots: AlertSet::empty(),
            last_insulin_measurements: None,
            message_transport_state: MessageTransportState::default(),
            prime_finish_time: None,
            setup_units_delivered: None,
        }
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_state.is_suspended()
    }

    pub fn setup_completed(&self) -> bool {
        self.setup_progress.is_completed()
    }

    // ========================================================================
    // Setup progress (invariant: monotonic)
    // ========================================================================

    /// Advances setup progress. Moves to a lower ordinal are ignored; the
    /// terminal activation-timeout state is always accepted.
    pub fn advance_setup_progress(&mut self, progress: SetupProgress) {
        if progress.is_terminal() || progress.ordinal() >= self.setup_progress.ordinal() {
            if progress != self.setup_progress {
                tracing::info!(from = ?self.setup_progress, to = ?progress, "setup progress");
            }
            self.setup_progress = progress;
        } else {
            tracing::warn!(
                current = ?self.setup_progress,
                requested = ?progress,
                "ignoring backwards setup progress transition"
            );
        }
    }

    // ========================================================================
    // Fault capture (invariant: sticky)
    // ========================================================================

    /// Stores the first fault observed. Returns `false` — and changes
    /// nothing — if a fault is already recorded.
    pub fn register_fault(&mut self, fault: DetailedStatus) -> bool {
        if self.fault.is_some() {
            return false;
        }
        tracing::error!(
            code = %fault.fault_event_code,
            progress = ?fault.pod_progress,
            "pod fault captured"
        );
        self.fault = Some(fault);
        true
    }

    // ========================================================================
    // Status integration
    // ========================================================================

    /// Applies a regular status response: pod times, certainty
    /// reconciliation, insulin snapshot, active alerts — in that order.
    pub fn update_from_status_response(&mut self, status: &StatusResponse, now: DateTime<Utc>) {
        self.update_pod_times(status.time_active, now);
        self.reconcile_delivery_status(status.delivery_status, now);
        self.last_insulin_measurements = Some(InsulinMeasurements {
            delivered: status.insulin_delivered,
            reservoir: status.reservoir,
            validity_time: now,
        });
        self.active_alert_slots = status.active_alerts;
    }

    /// Applies a detailed status (same effects, richer source).
    pub fn update_from_detailed_status(&mut self, status: &DetailedStatus, now: DateTime<Utc>) {
        self.update_pod_times(status.time_active, now);
        self.reconcile_delivery_status(status.delivery_status, now);
        self.last_insulin_measurements = Some(InsulinMeasurements {
            delivered: status.insulin_delivered,
            reservoir: status.reservoir,
            validity_time: now,
        });
        self.active_alert_slots = status.unacknowledged_alerts;
    }

    /// Recomputes activation and expiry from the pod's reported time-active
    /// counter. The expiry may only move earlier, or later by more than the
    /// jitter tolerance.
    fn update_pod_times(&mut self, time_active: Duration, now: DateTime<Utc>) {
        let activated = now - time_active;
        let expiry = activated + consts::nominal_pod_life();
        let accept = match self.expires_at {
            None => true,
            Some(current) => {
                expiry < current
                    || expiry > current + Duration::seconds(EXPIRY_FORWARD_TOLERANCE_SECS)
            }
        };
        if accept {
            self.activated_at = Some(activated);
            self.expires_at = Some(expiry);
        }
    }

    fn reconcile_delivery_status(
        &mut self,
        delivery: podlink_types::DeliveryStatus,
        _now: DateTime<Utc>,
    ) {
        let outcome = self.doses.reconcile_delivery_status(delivery);
        if let Some(at) = outcome.suspend_confirmed {
            self.suspend_state = SuspendState::Suspended { at };
        }
        if let Some(at) = outcome.resume_confirmed {
            self.suspend_state = SuspendState::Resumed { at };
        }
        self.doses.pair_suspend_resume();
    }

    // ========================================================================
    // Dosing cleanup
    // ========================================================================

    /// Updates the ledger after deliveries were cancelled — by an explicit
    /// cancel command or by a pod fault.
    ///
    /// Each targeted kind with a live, unfinished record is truncated now.
    /// Cancelling basal suspends the pod; cancelling only the temp basal
    /// returns it to the schedule, which the ledger sees as a resume.
    pub fn handle_cancel_dosing(
        &mut self,
        kinds: DeliveryKindSet,
        bolus_not_delivered: Units,
        now: DateTime<Utc>,
    ) {
        if kinds.contains(DeliveryKind::Bolus) && self.doses.has_unfinished_bolus(now) {
            self.doses.cancel_bolus(now, bolus_not_delivered);
        }
        if kinds.contains(DeliveryKind::TempBasal) && self.doses.has_unfinished_temp_basal(now) {
            self.doses.cancel_temp_basal(now);
        }
        if kinds.contains(DeliveryKind::Basal) {
            if let Err(err) = self.doses.record_suspend(SuspendDose {
                start_time: now,
                certainty: ScheduledCertainty::Certain,
            }) {
                tracing::warn!(%err, "suspend already recorded while cancelling basal");
            }
            self.suspend_state = SuspendState::Suspended { at: now };
        } else if kinds.contains(DeliveryKind::TempBasal) {
            if let Err(err) = self.doses.record_resume(ResumeDose {
                start_time: now,
                certainty: ScheduledCertainty::Certain,
            }) {
                tracing::warn!(%err, "resume already recorded while cancelling temp basal");
            }
        }
        self.doses.finalize_finished_doses(now);
    }

    /// Records a resume of scheduled delivery. A certain resume flips the
    /// suspend state immediately; an uncertain one waits for a status
    /// response to confirm it.
    pub fn record_resume(&mut self, at: DateTime<Utc>, certainty: ScheduledCertainty) {
        if let Err(err) = self.doses.record_resume(ResumeDose {
            start_time: at,
            certainty,
        }) {
            tracing::warn!(%err, "could not record resume dose");
        }
        if certainty == ScheduledCertainty::Certain {
            self.suspend_state = SuspendState::Resumed { at };
        }
        self.doses.pair_suspend_resume();
    }

    // ========================================================================
    // Alert configuration
    // ========================================================================

    /// Remembers the configuration sent for the given slots, replacing any
    /// prior configuration of the same slots.
    pub fn record_configured_alerts(&mut self, alerts: &[PodAlert]) {
        for alert in alerts {
            self.configured_alerts.retain(|a| a.slot != alert.slot);
            self.configured_alerts.push(*alert);
        }
    }

    pub fn configured_alert(&self, slot: AlertSlot) -> Option<&PodAlert> {
        self.configured_alerts.iter().find(|a| a.slot == slot)
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Serializes the state as a self-describing blob.
    pub fn to_blob(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Restores a state blob, migrating the legacy boolean `suspended`
    /// field to `suspendState` if present.
    ///
    /// The migration stamps `now` as the transition time; the true
    /// transition happened some time before the last persistence, so dose
    /// reports derived from it are approximate by that gap.
    pub fn from_blob(blob: &str, now: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        let mut value: serde_json::Value = serde_json::from_str(blob)?;
        if let Some(object) = value.as_object_mut() {
            let legacy = object
                .remove("suspended")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if !object.contains_key("suspendState") {
                let tag = if legacy { "suspended" } else { "resumed" };
                object.insert(
                    "suspendState".to_string(),
                    serde_json::json!({ "state": tag, "at": now }),
                );
            }
        }
        serde_json::from_value(value)
    }
}
