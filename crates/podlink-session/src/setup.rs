//! The setup sequencer: pair → prime → basal → cannula → ready.
//!
//! Every entry point is idempotent and keyed by the controller's setup
//! progress. When a prior attempt's confirmation may have been lost over
//! the radio, the sequencer polls the pod's own progress before re-issuing
//! a command, so a retry never double-delivers setup insulin.

use chrono::{DateTime, Duration, Utc};

use podlink_types::{
    BasalSchedule, PodAlert, PodProgressStatus, SetupProgress, Units, consts,
};
use podlink_wire::{
    BolusExtraCommand, ConfigureAlertsCommand, FaultConfigCommand, InsulinProgram, MessageBlock,
    SetInsulinScheduleCommand, StatusResponse,
};

use crate::dose::ScheduledCertainty;
use crate::error::PodCommsError;
use crate::session::Session;
use crate::transport::MessageTransport;

impl<T: MessageTransport> Session<T> {
    // ========================================================================
    // Prime
    // ========================================================================

    /// Charges the fluid path. Returns the estimated time until priming
    /// finishes.
    pub fn prime(&mut self) -> Result<Duration, PodCommsError> {
        if self.state.setup_progress < SetupProgress::StartingPrime {
            // Disable the $6x fault family until setup completes, then arm
            // the finish-setup reminder.
            let _: StatusResponse = self.send_status_update(
                vec![MessageBlock::FaultConfig(FaultConfigCommand {
                    nonce: 0,
                    tab5_sub16: 0,
                    tab5_sub17: 0,
                })],
                false,
            )?;
            self.configure_alerts(&[PodAlert::finish_setup_reminder()])?;
        }

        if self.state.setup_progress == SetupProgress::StartingPrime {
            // The prime command may have landed without us hearing back.
            let status = self.get_status()?;
            if matches!(
                status.pod_progress,
                PodProgressStatus::Priming | PodProgressStatus::PrimingCompleted
            ) {
                tracing::info!("prime already underway on pod");
                self.mutate(|state| state.advance_setup_progress(SetupProgress::Priming));
                return Ok(self.prime_time_remaining(Utc::now()));
            }
        }

        let finish_time = Utc::now() + consts::prime_finish_estimate();
        self.mutate(|state| {
            state.prime_finish_time = Some(finish_time);
            state.advance_setup_progress(SetupProgress::StartingPrime);
        });

        let status = self.send_status_update(
            setup_bolus_blocks(consts::PRIME_UNITS),
            false,
        )?;
        tracing::info!(progress = ?status.pod_progress, "prime started");
        self.mutate(|state| state.advance_setup_progress(SetupProgress::Priming));
        Ok(consts::prime_finish_estimate())
    }

    fn prime_time_remaining(&self, now: DateTime<Utc>) -> Duration {
        self.state
            .prime_finish_time
            .map_or_else(consts::prime_finish_estimate, |finish| {
                (finish - now).max(Duration::zero())
            })
    }

    // ========================================================================
    // Initial basal schedule
    // ========================================================================

    /// Programs the first basal schedule after priming.
    pub fn program_initial_basal_schedule(
        &mut self,
        schedule: &BasalSchedule,
        schedule_offset: Duration,
    ) -> Result<(), PodCommsError> {
        if self.state.setup_progress == SetupProgress::SettingInitialBasalSchedule {
            // The schedule command may have landed without confirmation.
            let status = self.get_status()?;
            if status.pod_progress.as_byte() >= PodProgressStatus::BasalInitialized.as_byte() {
                tracing::info!("initial basal schedule already set on pod");
                let now = Utc::now();
                self.mutate(|state| {
                    state.advance_setup_progress(SetupProgress::InitialBasalScheduleSet);
                    state.record_resume(now, ScheduledCertainty::Certain);
                });
                return Ok(());
            }
        }

        self.mutate(|state| {
            state.advance_setup_progress(SetupProgress::SettingInitialBasalSchedule);
        });
        self.set_basal_schedule(schedule, schedule_offset, false, false)?;
        self.mutate(|state| {
            state.advance_setup_progress(SetupProgress::InitialBasalScheduleSet);
        });
        Ok(())
    }

    // ========================================================================
    // Cannula insertion
    // ========================================================================

    /// Starts the automated cannula insertion. Returns the time to wait
    /// before checking for completion.
    pub fn insert_cannula(&mut self) -> Result<Duration, PodCommsError> {
        if self.state.activated_at.is_none() {
            return Err(PodCommsError::NoPodPaired);
        }
        let insertion_wait = consts::prime_duration(consts::CANNULA_INSERTION_UNITS);

        if matches!(
            self.state.setup_progress,
            SetupProgress::StartingInsertCannula | SetupProgress::CannulaInserting
        ) {
            // The insertion command may have landed without confirmation.
            let status = self.get_status()?;
            if status.pod_progress.ready_for_delivery() {
                self.mark_setup_complete(status.insulin_delivered);
                return Ok(Duration::zero());
            }
            if status.pod_progress == PodProgressStatus::InsertingCannula {
                self.mutate(|state| {
                    state.advance_setup_progress(SetupProgress::CannulaInserting);
                });
                return Ok(insertion_wait);
            }
        } else {
            // First attempt: arm the lifetime alarms relative to activation.
            let advisory_offset =
                consts::nominal_pod_life() - consts::expiration_advisory_window();
            let shutdown_offset =
                consts::service_duration() - consts::end_of_service_imminent_window();
            self.configure_alerts(&[
                PodAlert::expiration_advisory(advisory_offset),
                PodAlert::shutdown_imminent(shutdown_offset),
            ])?;
        }

        self.mutate(|state| {
            state.advance_setup_progress(SetupProgress::StartingInsertCannula);
        });
        let status = self.send_status_update(
            setup_bolus_blocks(consts::CANNULA_INSERTION_UNITS),
            false,
        )?;
        tracing::info!(progress = ?status.pod_progress, "cannula insertion started");
        self.mutate(|state| {
            state.advance_setup_progress(SetupProgress::CannulaInserting);
        });
        Ok(insertion_wait)
    }

    /// Polls the pod once insertion should have finished and, if it reports
    /// ready, marks setup complete.
    pub fn check_insertion_completed(&mut self) -> Result<(), PodCommsError> {
        let status = self.get_status()?;
        if status.pod_progress.ready_for_delivery() {
            self.mark_setup_complete(status.insulin_delivered);
        }
        Ok(())
    }

    fn mark_setup_complete(&mut self, insulin_delivered: Units) {
        tracing::info!(setup_units = %insulin_delivered, "setup complete");
        self.mutate(|state| {
            state.advance_setup_progress(SetupProgress::Completed);
            if state.setup_units_delivered.is_none() {
                state.setup_units_delivered = Some(insulin_delivered);
            }
        });
    }

    // ========================================================================
    // Alert configuration
    // ========================================================================

    /// Programs the given alert slots and remembers the configuration.
    pub fn configure_alerts(
        &mut self,
        alerts: &[PodAlert],
    ) -> Result<StatusResponse, PodCommsError> {
        let status = self.send_status_update(
            vec![MessageBlock::ConfigureAlerts(ConfigureAlertsCommand {
                nonce: 0,
                alerts: alerts.to_vec(),
            })],
            false,
        )?;
        self.mutate(|state| state.record_configured_alerts(alerts));
        Ok(status)
    }
}

/// The prime and cannula-insertion boluses run at the faster setup pulse
/// interval and never carry beeps.
fn setup_bolus_blocks(units: Units) -> Vec<MessageBlock> {
    vec![
        MessageBlock::SetInsulinSchedule(SetInsulinScheduleCommand {
            nonce: 0,
            program: InsulinProgram::Bolus {
                amount: units,
                seconds_per_pulse: consts::SECONDS_PER_PRIME_PULSE as u8,
            },
        }),
        MessageBlock::BolusExtra(BolusExtraCommand {
            amount: units,
            seconds_per_pulse: consts::SECONDS_PER_PRIME_PULSE as u8,
            acknowledgement_beep: false,
            completion_beep: false,
            reminder_interval_minutes: 0,
        }),
    ]
}
