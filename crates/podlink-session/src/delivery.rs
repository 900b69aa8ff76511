//! Delivery operations: bolus, temp basal, cancel, schedule, status,
//! deactivation, alert acknowledgement, beep configuration.
//!
//! Dosing operations never return `Result`. Their outcome is the
//! three-valued [`DeliveryCommandResult`]: succeeded, certainly failed, or
//! failed with unknown disposition. The distinction is a patient-safety
//! property — a caller that conflates "not delivered" with "maybe
//! delivered" will either under-dose or double-dose — so it is kept in the
//! type system rather than in error inspection.

use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};

use podlink_types::{
    AlertSet, BasalSchedule, BeepType, DeliveryKind, DeliveryKindSet, Units, UnitsPerHour,
    all_but_basal, all_deliveries, consts,
};
use podlink_wire::{
    AcknowledgeAlertCommand, BasalScheduleExtraCommand, BeepConfigCommand, BlockType,
    BolusExtraCommand, CancelDeliveryCommand, DeactivatePodCommand, DetailedStatus,
    GetStatusCommand, InsulinProgram, MessageBlock, PodInfoResponse, PodInfoType, PulseLog,
    SetInsulinScheduleCommand, StatusResponse, TempBasalExtraCommand, segments_for,
};

use crate::dose::{BolusDose, ScheduledCertainty, TempBasalDose};
use crate::error::PodCommsError;
use crate::session::Session;
use crate::transport::MessageTransport;

/// Outcome of a dosing command.
#[derive(Debug)]
pub enum DeliveryCommandResult {
    /// The pod confirmed the command.
    Success(StatusResponse),
    /// The command certainly did not execute; it is safe to re-dose.
    CertainFailure(PodCommsError),
    /// The command may have executed; the ledger holds an uncertain record
    /// pending reconciliation. Re-dosing risks a double dose.
    UncertainFailure(PodCommsError),
}

impl DeliveryCommandResult {
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryCommandResult::Success(_))
    }
}

/// Outcome of a cancel-delivery command.
#[derive(Debug)]
pub enum CancelDeliveryResult {
    Success(StatusResponse),
    CertainFailure(PodCommsError),
    UncertainFailure(PodCommsError),
}

impl CancelDeliveryResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CancelDeliveryResult::Success(_))
    }

    /// The error, for callers that must abort on any failure.
    pub fn into_error(self) -> Option<PodCommsError> {
        match self {
            CancelDeliveryResult::Success(_) => None,
            CancelDeliveryResult::CertainFailure(err)
            | CancelDeliveryResult::UncertainFailure(err) => Some(err),
        }
    }
}

impl<T: MessageTransport> Session<T> {
    // ========================================================================
    // Bolus
    // ========================================================================

    /// Programs an immediate bolus.
    ///
    /// On a transport failure the pod is polled once: if it reports
    /// bolusing, the command landed and this is a success; if it reports
    /// otherwise, a certain failure; if the poll itself fails, an uncertain
    /// record is kept for later reconciliation.
    pub fn bolus(
        &mut self,
        units: Units,
        acknowledgement_beep: bool,
        completion_beep: bool,
        reminder_interval_minutes: u8,
    ) -> DeliveryCommandResult {
        let now = Utc::now();
        self.mutate(|state| state.doses.finalize_finished_doses(now));
        if self.state.is_suspended() {
            return DeliveryCommandResult::CertainFailure(PodCommsError::PodSuspended);
        }
        if self.state.doses.unfinalized_bolus().is_some() {
            return DeliveryCommandResult::CertainFailure(PodCommsError::UnfinalizedBolus);
        }

        tracing::info!(%units, "bolus");
        let blocks = vec![
            MessageBlock::SetInsulinSchedule(SetInsulinScheduleCommand {
                nonce: 0,
                program: InsulinProgram::Bolus {
                    amount: units,
                    seconds_per_pulse: consts::SECONDS_PER_BOLUS_PULSE as u8,
                },
            }),
            MessageBlock::BolusExtra(BolusExtraCommand {
                amount: units,
                seconds_per_pulse: consts::SECONDS_PER_BOLUS_PULSE as u8,
                acknowledgement_beep,
                completion_beep,
                reminder_interval_minutes,
            }),
        ];

        match self.send_status_update(blocks, false) {
            Ok(status) => {
                self.record_bolus_dose(units, ScheduledCertainty::Certain, consts::comms_offset());
                DeliveryCommandResult::Success(status)
            }
            Err(err) if err.is_certain_failure() => DeliveryCommandResult::CertainFailure(err),
            Err(err) => self.verify_unacknowledged_bolus(units, err),
        }
    }

    /// The command round-trip failed; ask the pod whether the bolus started.
    fn verify_unacknowledged_bolus(
        &mut self,
        units: Units,
        original: PodCommsError,
    ) -> DeliveryCommandResult {
        match self.get_status() {
            Ok(status) if status.delivery_status.bolusing() => {
                tracing::info!("unacknowledged bolus confirmed by status poll");
                self.record_bolus_dose(units, ScheduledCertainty::Certain, consts::comms_offset());
                DeliveryCommandResult::Success(status)
            }
            Ok(_) => {
                tracing::warn!(%original, "bolus did not start");
                DeliveryCommandResult::CertainFailure(original)
            }
            Err(poll_err) => {
                tracing::warn!(%original, %poll_err, "bolus disposition unknown");
                self.record_bolus_dose(units, ScheduledCertainty::Uncertain, Duration::zero());
                DeliveryCommandResult::UncertainFailure(original)
            }
        }
    }

    fn record_bolus_dose(
        &mut self,
        units: Units,
        certainty: ScheduledCertainty,
        start_offset: Duration,
    ) {
        let start_time = Utc::now() + start_offset;
        self.mutate(|state| {
            if let Err(err) = state.doses.record_bolus(BolusDose {
                start_time,
                duration: consts::bolus_duration(units),
                units,
                certainty,
                cancelled_at: None,
                units_not_delivered: None,
            }) {
                tracing::warn!(%err, "could not record bolus dose");
            }
        });
    }

    // ========================================================================
    // Temp basal
    // ========================================================================

    /// Programs a temporary basal rate override.
    ///
    /// Unlike [`Session::bolus`] there is no status-poll verification on
    /// failure; an uncertain record is kept and reconciled by the next
    /// status response.
    pub fn set_temp_basal(
        &mut self,
        rate: UnitsPerHour,
        duration: Duration,
        acknowledgement_beep: bool,
        completion_beep: bool,
    ) -> DeliveryCommandResult {
        let now = Utc::now();
        self.mutate(|state| state.doses.finalize_finished_doses(now));
        if self.state.is_suspended() {
            return DeliveryCommandResult::CertainFailure(PodCommsError::PodSuspended);
        }
        if self.state.doses.has_unfinished_bolus(now) {
            return DeliveryCommandResult::CertainFailure(PodCommsError::UnfinalizedBolus);
        }
        if self.state.doses.unfinalized_temp_basal().is_some() {
            return DeliveryCommandResult::CertainFailure(PodCommsError::UnfinalizedTempBasal);
        }

        let duration_minutes = duration.num_minutes() as u16;
        tracing::info!(%rate, duration_minutes, "temp basal");
        let blocks = vec![
            MessageBlock::SetInsulinSchedule(SetInsulinScheduleCommand {
                nonce: 0,
                program: InsulinProgram::TempBasal {
                    rate,
                    duration_minutes,
                },
            }),
            MessageBlock::TempBasalExtra(TempBasalExtraCommand {
                rate,
                duration_minutes,
                acknowledgement_beep,
                completion_beep,
            }),
        ];

        let record = |certainty| TempBasalDose {
            start_time: Utc::now(),
            duration,
            rate,
            certainty,
            cancelled_at: None,
        };

        match self.send_status_update(blocks, false) {
            Ok(status) => {
                let dose = record(ScheduledCertainty::Certain);
                self.mutate(|state| {
                    if let Err(err) = state.doses.record_temp_basal(dose) {
                        tracing::warn!(%err, "could not record temp basal dose");
                    }
                });
                DeliveryCommandResult::Success(status)
            }
            Err(err) if err.is_certain_failure() => DeliveryCommandResult::CertainFailure(err),
            Err(err) => {
                let dose = record(ScheduledCertainty::Uncertain);
                self.mutate(|state| {
                    if let Err(record_err) = state.doses.record_temp_basal(dose) {
                        tracing::warn!(%record_err, "could not record uncertain temp basal");
                    }
                });
                DeliveryCommandResult::UncertainFailure(err)
            }
        }
    }

    // ========================================================================
    // Cancel
    // ========================================================================

    /// Cancels the selected delivery kinds.
    ///
    /// Cancelling everything with a beep is sent as two cancel blocks in
    /// one message — a silent all-but-basal followed by a beeping basal —
    /// so the pod emits one beep sequence instead of three.
    pub fn cancel_delivery(
        &mut self,
        kinds: DeliveryKindSet,
        beep_type: BeepType,
    ) -> CancelDeliveryResult {
        let blocks = if !beep_type.is_silent() && kinds == all_deliveries() {
            vec![
                MessageBlock::CancelDelivery(CancelDeliveryCommand {
                    nonce: 0,
                    kinds: all_but_basal(),
                    beep_type: BeepType::NoBeep,
                }),
                MessageBlock::CancelDelivery(CancelDeliveryCommand {
                    nonce: 0,
                    kinds: DeliveryKind::Basal.into(),
                    beep_type,
                }),
            ]
        } else {
            vec![MessageBlock::CancelDelivery(CancelDeliveryCommand {
                nonce: 0,
                kinds,
                beep_type,
            })]
        };

        tracing::info!(kinds = ?kinds, "cancel delivery");
        match self.send_status_update(blocks, false) {
            Ok(status) => {
                let now = Utc::now();
                self.mutate(|state| {
                    state.handle_cancel_dosing(kinds, status.bolus_not_delivered, now);
                });
                CancelDeliveryResult::Success(status)
            }
            Err(err) if err.is_certain_failure() => CancelDeliveryResult::CertainFailure(err),
            Err(err) => CancelDeliveryResult::UncertainFailure(err),
        }
    }

    /// Cancels nothing: a status read that also validates the nonce.
    pub fn cancel_none(&mut self) -> Result<StatusResponse, PodCommsError> {
        self.send_status_update(
            vec![MessageBlock::CancelDelivery(CancelDeliveryCommand {
                nonce: 0,
                kinds: DeliveryKindSet::empty(),
                beep_type: BeepType::NoBeep,
            })],
            false,
        )
    }

    // ========================================================================
    // Basal schedule
    // ========================================================================

    /// Programs the full daily basal schedule, resuming scheduled delivery.
    ///
    /// `schedule_offset` is the time already elapsed since midnight in the
    /// pod's time zone.
    pub fn set_basal_schedule(
        &mut self,
        schedule: &BasalSchedule,
        schedule_offset: Duration,
        acknowledgement_beep: bool,
        completion_beep: bool,
    ) -> Result<StatusResponse, PodCommsError> {
        let schedule_offset_minutes = schedule_offset.num_minutes() as u16;
        let segments = segments_for(schedule);
        let blocks = vec![
            MessageBlock::SetInsulinSchedule(SetInsulinScheduleCommand {
                nonce: 0,
                program: InsulinProgram::BasalSchedule {
                    schedule_offset_minutes,
                    segments: segments.clone(),
                },
            }),
            MessageBlock::BasalScheduleExtra(BasalScheduleExtraCommand {
                schedule_offset_minutes,
                segments,
                acknowledgement_beep,
                completion_beep,
            }),
        ];

        match self.send_status_update(blocks, false) {
            Ok(status) => {
                let now = Utc::now();
                self.mutate(|state| {
                    state.record_resume(now, ScheduledCertainty::Certain);
                });
                Ok(status)
            }
            Err(err) => {
                if !err.is_certain_failure() {
                    let now = Utc::now();
                    self.mutate(|state| {
                        state.record_resume(now, ScheduledCertainty::Uncertain);
                    });
                }
                Err(err)
            }
        }
    }

    /// Re-programs the schedule against a new time zone: delivery is
    /// cancelled outright (any failure aborts), then the schedule is set
    /// with the new zone's offset from midnight.
    pub fn set_time(
        &mut self,
        time_zone: FixedOffset,
        schedule: &BasalSchedule,
        date: DateTime<Utc>,
        confirmation_beeps: bool,
    ) -> Result<StatusResponse, PodCommsError> {
        if let Some(err) = self
            .cancel_delivery(all_deliveries(), BeepType::NoBeep)
            .into_error()
        {
            return Err(err);
        }
        let local = date.with_timezone(&time_zone);
        let schedule_offset = Duration::seconds(i64::from(local.num_seconds_from_midnight()));
        self.set_basal_schedule(
            schedule,
            schedule_offset,
            confirmation_beeps,
            confirmation_beeps,
        )
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// Reads the pod's status and folds it into the state.
    pub fn get_status(&mut self) -> Result<StatusResponse, PodCommsError> {
        if self.config.use_cancel_none_for_status {
            return self.cancel_none();
        }
        self.send_status_update(
            vec![MessageBlock::GetStatus(GetStatusCommand {
                pod_info_type: PodInfoType::Normal,
            })],
            false,
        )
    }

    /// Reads the pod's detailed status.
    ///
    /// If the pod reports a fault not yet recorded, it is captured here
    /// without raising — this call's purpose is to report fault state to
    /// the caller.
    pub fn get_detailed_status(&mut self) -> Result<DetailedStatus, PodCommsError> {
        let info: PodInfoResponse = self.send(
            vec![MessageBlock::GetStatus(GetStatusCommand {
                pod_info_type: PodInfoType::DetailedStatus,
            })],
            false,
        )?;
        let Some(detail) = info.detailed_status().copied() else {
            return Err(PodCommsError::UnexpectedResponse(BlockType::PodInfoResponse));
        };

        let now = Utc::now();
        if detail.is_faulted() && !self.state.is_faulted() {
            self.record_fault(detail, now);
        } else {
            self.mutate(|state| state.update_from_detailed_status(&detail, now));
        }
        Ok(detail)
    }

    /// Reads the pod's recent pulse log.
    pub fn read_pulse_log(&mut self) -> Result<PulseLog, PodCommsError> {
        let info: PodInfoResponse = self.send(
            vec![MessageBlock::GetStatus(GetStatusCommand {
                pod_info_type: PodInfoType::PulseLogRecent,
            })],
            false,
        )?;
        info.pulse_log()
            .cloned()
            .ok_or(PodCommsError::UnexpectedResponse(BlockType::PodInfoResponse))
    }

    // ========================================================================
    // Alerts and beeps
    // ========================================================================

    /// Acknowledges the given alert slots; returns the alerts still active
    /// afterwards.
    pub fn acknowledge_alerts(&mut self, alerts: AlertSet) -> Result<AlertSet, PodCommsError> {
        let status = self.send_status_update(
            vec![MessageBlock::AcknowledgeAlert(AcknowledgeAlertCommand {
                nonce: 0,
                alerts,
            })],
            false,
        )?;
        Ok(status.active_alerts)
    }

    /// Sets confirmation beep preferences.
    pub fn configure_beeps(
        &mut self,
        beep_type: BeepType,
        basal_completion_beep: bool,
        temp_basal_completion_beep: bool,
        bolus_completion_beep: bool,
    ) -> Result<StatusResponse, PodCommsError> {
        self.send_status_update(
            vec![MessageBlock::BeepConfig(BeepConfigCommand {
                beep_type,
                basal_completion_beep,
                temp_basal_completion_beep,
                bolus_completion_beep,
            })],
            false,
        )
    }

    // ========================================================================
    // Deactivation
    // ========================================================================

    /// Permanently shuts the pod down.
    ///
    /// A running pod has its deliveries cancelled first (any failure
    /// aborts). A faulted pod gets a best-effort pulse-log read for
    /// postmortem logging. The final deactivate tolerates the pod dying
    /// mid-command.
    pub fn deactivate_pod(&mut self) -> Result<(), PodCommsError> {
        let now = Utc::now();
        self.mutate(|state| state.doses.finalize_finished_doses(now));

        if self.state.setup_completed() && !self.state.is_faulted() && !self.state.is_suspended() {
            if let Some(err) = self
                .cancel_delivery(all_deliveries(), BeepType::NoBeep)
                .into_error()
            {
                return Err(err);
            }
        }

        if self.state.is_faulted() {
            match self.read_pulse_log() {
                Ok(log) => tracing::info!(words = log.words.len(), "postmortem pulse log captured"),
                Err(err) => tracing::warn!(%err, "postmortem pulse log unavailable"),
            }
        }

        let result: Result<StatusResponse, PodCommsError> = self.send_status_update(
            vec![MessageBlock::DeactivatePod(DeactivatePodCommand { nonce: 0 })],
            false,
        );
        match result {
            Ok(_) => {
                tracing::info!("pod deactivated");
                Ok(())
            }
            // The pod may self-terminate during the command.
            Err(
                PodCommsError::PodFault(_)
                | PodCommsError::ActivationTimeExceeded
                | PodCommsError::UnexpectedResponse(_),
            ) => {
                tracing::info!("pod deactivated (terminal response swallowed)");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
