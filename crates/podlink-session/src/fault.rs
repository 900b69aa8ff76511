//! First-fault capture and cleanup.
//!
//! A pod fault terminates all dosing. The first fault observed is stored
//! permanently, in-flight doses are closed out with the pod-reported
//! undelivered units, and the fault's detailed status is folded into the
//! pod state. Later fault reports change nothing.

use chrono::{DateTime, Utc};

use podlink_types::{PodProgressStatus, all_deliveries};
use podlink_wire::DetailedStatus;

use crate::error::PodCommsError;
use crate::session::Session;
use crate::transport::MessageTransport;

impl<T: MessageTransport> Session<T> {
    /// Captures a fault without raising an error; used by status reads that
    /// intentionally report the fault to their caller.
    pub(crate) fn record_fault(&mut self, fault: DetailedStatus, now: DateTime<Utc>) {
        self.mutate(|state| {
            if state.register_fault(fault) {
                state.handle_cancel_dosing(all_deliveries(), fault.bolus_not_delivered, now);
                state.update_from_detailed_status(&fault, now);
            }
        });
    }

    /// Captures a fault and produces the error to raise. A fault whose
    /// progress is activation-time-exceeded surfaces as the distinct
    /// [`PodCommsError::ActivationTimeExceeded`].
    pub(crate) fn throw_pod_fault(&mut self, fault: DetailedStatus) -> PodCommsError {
        self.record_fault(fault, Utc::now());
        if fault.pod_progress == PodProgressStatus::ActivationTimeExceeded {
            PodCommsError::ActivationTimeExceeded
        } else {
            PodCommsError::PodFault(fault)
        }
    }
}
