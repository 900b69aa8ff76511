//! The dose ledger.
//!
//! Tracks in-flight insulin deliveries, ages them past their finish times,
//! and accumulates finalized records until a therapy-management host drains
//! them. At most one record of each kind is in flight at a time; a suspend
//! or resume may coexist with the dose it interrupts.
//!
//! Certainty is the ledger's load-bearing concept: a record created after an
//! ambiguous transport failure is tagged [`ScheduledCertainty::Uncertain`]
//! until a later status response either confirms it (upgrade to certain) or
//! disproves it (drop the record).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use podlink_types::{DeliveryStatus, Units, UnitsPerHour, time_serde};

/// Whether the controller knows a commanded dose actually began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScheduledCertainty {
    /// Confirmed by a command response or status poll.
    Certain,
    /// The command may or may not have reached the pod.
    Uncertain,
}

/// An in-flight or completed bolus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BolusDose {
    pub start_time: DateTime<Utc>,
    #[serde(with = "time_serde::duration_secs")]
    pub duration: Duration,
    pub units: Units,
    pub certainty: ScheduledCertainty,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub units_not_delivered: Option<Units>,
}

impl BolusDose {
    pub fn finish_time(&self) -> DateTime<Utc> {
        self.start_time + self.duration
    }

    pub fn is_finished(&self, now: DateTime<Utc>) -> bool {
        self.finish_time() <= now
    }

    /// Insulin actually delivered, net of any reported shortfall.
    pub fn delivered_units(&self) -> Units {
        self.units
            .saturating_sub(self.units_not_delivered.unwrap_or(Units::ZERO))
    }
}

/// An in-flight or completed temp basal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempBasalDose {
    pub start_time: DateTime<Utc>,
    #[serde(with = "time_serde::duration_secs")]
    pub duration: Duration,
    pub rate: UnitsPerHour,
    pub certainty: ScheduledCertainty,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TempBasalDose {
    pub fn finish_time(&self) -> DateTime<Utc> {
        self.start_time + self.duration
    }

    pub fn is_finished(&self, now: DateTime<Utc>) -> bool {
        self.finish_time() <= now
    }
}

/// A suspension of scheduled delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspendDose {
    pub start_time: DateTime<Utc>,
    pub certainty: ScheduledCertainty,
}

/// A resumption of scheduled delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeDose {
    pub start_time: DateTime<Utc>,
    pub certainty: ScheduledCertainty,
}

/// A dose record, in flight or finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "doseType", rename_all = "camelCase")]
pub enum DoseRecord {
    Bolus(BolusDose),
    TempBasal(TempBasalDose),
    Suspend(SuspendDose),
    Resume(ResumeDose),
}

/// A record of the given kind is already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DoseError {
    #[error("an unfinalized bolus is already recorded")]
    BolusInFlight,

    #[error("an unfinalized temp basal is already recorded")]
    TempBasalInFlight,

    #[error("an unfinalized suspend is already recorded")]
    SuspendInFlight,

    #[error("an unfinalized resume is already recorded")]
    ResumeInFlight,
}

/// Outcome of reconciling uncertain records against a status response; the
/// pod state uses the confirmations to update its suspend state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub suspend_confirmed: Option<DateTime<Utc>>,
    pub resume_confirmed: Option<DateTime<Utc>>,
}

/// In-flight and finalized dose records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoseLedger {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unfinalized_bolus: Option<BolusDose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unfinalized_temp_basal: Option<TempBasalDose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unfinalized_suspend: Option<SuspendDose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    unfinalized_resume: Option<ResumeDose>,
    #[serde(default)]
    finalized_doses: Vec<DoseRecord>,
}

impl DoseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unfinalized_bolus(&self) -> Option<&BolusDose> {
        self.unfinalized_bolus.as_ref()
    }

    pub fn unfinalized_temp_basal(&self) -> Option<&TempBasalDose> {
        self.unfinalized_temp_basal.as_ref()
    }

    pub fn unfinalized_suspend(&self) -> Option<&SuspendDose> {
        self.unfinalized_suspend.as_ref()
    }

    pub fn unfinalized_resume(&self) -> Option<&ResumeDose> {
        self.unfinalized_resume.as_ref()
    }

    pub fn finalized_doses(&self) -> &[DoseRecord] {
        &self.finalized_doses
    }

    /// A bolus is recorded and still running at `now`.
    pub fn has_unfinished_bolus(&self, now: DateTime<Utc>) -> bool {
        self.unfinalized_bolus
            .as_ref()
            .is_some_and(|bolus| !bolus.is_finished(now))
    }

    /// A temp basal is recorded and still running at `now`.
    pub fn has_unfinished_temp_basal(&self, now: DateTime<Utc>) -> bool {
        self.unfinalized_temp_basal
            .as_ref()
            .is_some_and(|temp| !temp.is_finished(now))
    }

    // ========================================================================
    // Recording
    // ========================================================================

    pub fn record_bolus(&mut self, dose: BolusDose) -> Result<(), DoseError> {
        if self.unfinalized_bolus.is_some() {
            return Err(DoseError::BolusInFlight);
        }
        tracing::debug!(units = %dose.units, certainty = ?dose.certainty, "recording bolus");
        self.unfinalized_bolus = Some(dose);
        Ok(())
    }

    pub fn record_temp_basal(&mut self, dose: TempBasalDose) -> Result<(), DoseError> {
        if self.unfinalized_temp_basal.is_some() {
            return Err(DoseError::TempBasalInFlight);
        }
        tracing::debug!(rate = %dose.rate, certainty = ?dose.certainty, "recording temp basal");
        self.unfinalized_temp_basal = Some(dose);
        Ok(())
    }

    pub fn record_suspend(&mut self, dose: SuspendDose) -> Result<(), DoseError> {
        if self.unfinalized_suspend.is_some() {
            return Err(DoseError::SuspendInFlight);
        }
        self.unfinalized_suspend = Some(dose);
        Ok(())
    }

    pub fn record_resume(&mut self, dose: ResumeDose) -> Result<(), DoseError> {
        if self.unfinalized_resume.is_some() {
            return Err(DoseError::ResumeInFlight);
        }
        self.unfinalized_resume = Some(dose);
        Ok(())
    }

    // ========================================================================
    // Finalization
    // ========================================================================

    /// Moves time-complete boluses and temp basals to the finalized list and
    /// pairs off completed suspend/resume cycles.
    pub fn finalize_finished_doses(&mut self, now: DateTime<Utc>) {
        if let Some(bolus) = self.unfinalized_bolus.take_if(|bolus| bolus.is_finished(now)) {
            self.finalized_doses.push(DoseRecord::Bolus(bolus));
        }
        if let Some(temp) = self
            .unfinalized_temp_basal
            .take_if(|temp| temp.is_finished(now))
        {
            self.finalized_doses.push(DoseRecord::TempBasal(temp));
        }
        self.pair_suspend_resume();
    }

    /// A suspend is terminal until a later resume appears; once both exist
    /// in order they finalize together, suspend first.
    pub fn pair_suspend_resume(&mut self) {
        if let (Some(suspend), Some(resume)) = (self.unfinalized_suspend, self.unfinalized_resume)
            && resume.start_time > suspend.start_time
        {
            self.unfinalized_suspend = None;
            self.unfinalized_resume = None;
            self.finalized_doses.push(DoseRecord::Suspend(suspend));
            self.finalized_doses.push(DoseRecord::Resume(resume));
        }
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Truncates the running bolus at `at`, recording the pod-reported
    /// undelivered remainder.
    pub fn cancel_bolus(&mut self, at: DateTime<Utc>, remaining: Units) {
        if let Some(bolus) = &mut self.unfinalized_bolus {
            bolus.duration = (at - bolus.start_time).max(Duration::zero());
            bolus.cancelled_at = Some(at);
            bolus.units_not_delivered = Some(remaining);
            tracing::info!(units = %bolus.units, remaining = %remaining, "bolus cancelled");
        }
    }

    /// Truncates the running temp basal at `at`.
    pub fn cancel_temp_basal(&mut self, at: DateTime<Utc>) {
        if let Some(temp) = &mut self.unfinalized_temp_basal {
            temp.duration = (at - temp.start_time).max(Duration::zero());
            temp.cancelled_at = Some(at);
            tracing::info!(rate = %temp.rate, "temp basal cancelled");
        }
    }

    // ========================================================================
    // Certainty reconciliation
    // ========================================================================

    /// Reconciles uncertain records against the pod's reported delivery
    /// status: records the pod confirms upgrade to certain, records it
    /// disproves are dropped as never having happened.
    pub fn reconcile_delivery_status(&mut self, status: DeliveryStatus) -> Reconciliation {
        let mut outcome = Reconciliation::default();

        if let Some(bolus) = &mut self.unfinalized_bolus
            && bolus.certainty == ScheduledCertainty::Uncertain
        {
            if status.bolusing() {
                bolus.certainty = ScheduledCertainty::Certain;
            } else {
                tracing::warn!("dropping uncertain bolus the pod never started");
                self.unfinalized_bolus = None;
            }
        }

        if let Some(temp) = &mut self.unfinalized_temp_basal
            && temp.certainty == ScheduledCertainty::Uncertain
        {
            if status.temp_basal_running() {
                temp.certainty = ScheduledCertainty::Certain;
            } else {
                tracing::warn!("dropping uncertain temp basal the pod never started");
                self.unfinalized_temp_basal = None;
            }
        }

        if let Some(resume) = &mut self.unfinalized_resume
            && resume.certainty == ScheduledCertainty::Uncertain
        {
            if status.suspended() {
                tracing::warn!("dropping uncertain resume; pod still suspended");
                self.unfinalized_resume = None;
            } else {
                resume.certainty = ScheduledCertainty::Certain;
                outcome.resume_confirmed = Some(resume.start_time);
            }
        }

        if let Some(suspend) = &mut self.unfinalized_suspend
            && suspend.certainty == ScheduledCertainty::Uncertain
        {
            if status.suspended() {
                suspend.certainty = ScheduledCertainty::Certain;
                outcome.suspend_confirmed = Some(suspend.start_time);
            } else {
                tracing::warn!("dropping uncertain suspend; pod not suspended");
                self.unfinalized_suspend = None;
            }
        }

        outcome
    }

    // ========================================================================
    // Export
    // ========================================================================

    /// Hands finalized plus live records to `handler`; if the handler
    /// reports durable storage, clears the finalized list. Live records are
    /// included for visibility but never cleared.
    pub fn drain(&mut self, handler: impl FnOnce(&[DoseRecord]) -> bool) -> bool {
        let mut snapshot = self.finalized_doses.clone();
        if let Some(bolus) = self.unfinalized_bolus {
            snapshot.push(DoseRecord::Bolus(bolus));
        }
        if let Some(temp) = self.unfinalized_temp_basal {
            snapshot.push(DoseRecord::TempBasal(temp));
        }
        if let Some(suspend) = self.unfinalized_suspend {
            snapshot.push(DoseRecord::Suspend(suspend));
        }
        if let Some(resume) = self.unfinalized_resume {
            snapshot.push(DoseRecord::Resume(resume));
        }

        let stored = handler(&snapshot);
        if stored {
            self.finalized_doses.clear();
        } else {
            tracing::warn!(
                pending = self.finalized_doses.len(),
                "dose export handler declined; keeping finalized records"
            );
        }
        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use podlink_types::consts::bolus_duration;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap()
    }

    fn bolus(start: DateTime<Utc>, units: f64, certainty: ScheduledCertainty) -> BolusDose {
        let units = Units::from_f64(units);
        BolusDose {
            start_time: start,
            duration: bolus_duration(units),
            units,
            certainty,
            cancelled_at: None,
            units_not_delivered: None,
        }
    }

    #[test]
    fn rejects_second_bolus_in_flight() {
        let mut ledger = DoseLedger::new();
        ledger
            .record_bolus(bolus(t0(), 1.0, ScheduledCertainty::Certain))
            .unwrap();
        assert_eq!(
            ledger.record_bolus(bolus(t0(), 2.0, ScheduledCertainty::Certain)),
            Err(DoseError::BolusInFlight)
        );
    }

    #[test]
    fn suspend_coexists_with_interrupted_dose() {
        let mut ledger = DoseLedger::new();
        ledger
            .record_temp_basal(TempBasalDose {
                start_time: t0(),
                duration: Duration::minutes(30),
                rate: UnitsPerHour::from_f64(1.0),
                certainty: ScheduledCertainty::Certain,
                cancelled_at: None,
            })
            .unwrap();
        ledger
            .record_suspend(SuspendDose {
                start_time: t0() + Duration::minutes(5),
                certainty: ScheduledCertainty::Certain,
            })
            .unwrap();
        assert!(ledger.unfinalized_temp_basal().is_some());
        assert!(ledger.unfinalized_suspend().is_some());
    }

    #[test]
    fn finalize_moves_finished_doses_only() {
        let mut ledger = DoseLedger::new();
        ledger
            .record_bolus(bolus(t0(), 1.0, ScheduledCertainty::Certain))
            .unwrap();

        // 1.0 U = 20 pulses = 40 s; not finished 10 s in
        ledger.finalize_finished_doses(t0() + Duration::seconds(10));
        assert!(ledger.unfinalized_bolus().is_some());
        assert!(ledger.finalized_doses().is_empty());

        ledger.finalize_finished_doses(t0() + Duration::seconds(40));
        assert!(ledger.unfinalized_bolus().is_none());
        assert_eq!(ledger.finalized_doses().len(), 1);
    }

    #[test]
    fn suspend_resume_pair_finalizes_in_order() {
        let mut ledger = DoseLedger::new();
        ledger
            .record_suspend(SuspendDose {
                start_time: t0(),
                certainty: ScheduledCertainty::Certain,
            })
            .unwrap();
        ledger.pair_suspend_resume();
        assert!(ledger.finalized_doses().is_empty(), "suspend alone is terminal");

        ledger
            .record_resume(ResumeDose {
                start_time: t0() + Duration::minutes(30),
                certainty: ScheduledCertainty::Certain,
            })
            .unwrap();
        ledger.pair_suspend_resume();

        assert!(ledger.unfinalized_suspend().is_none());
        assert!(ledger.unfinalized_resume().is_none());
        assert!(matches!(
            ledger.finalized_doses(),
            [DoseRecord::Suspend(_), DoseRecord::Resume(_)]
        ));
    }

    #[test]
    fn out_of_order_resume_does_not_pair() {
        let mut ledger = DoseLedger::new();
        ledger
            .record_suspend(SuspendDose {
                start_time: t0(),
                certainty: ScheduledCertainty::Certain,
            })
            .unwrap();
        ledger
            .record_resume(ResumeDose {
                start_time: t0() - Duration::minutes(1),
                certainty: ScheduledCertainty::Certain,
            })
            .unwrap();
        ledger.pair_suspend_resume();
        assert!(ledger.finalized_doses().is_empty());
    }

    #[test]
    fn cancel_bolus_truncates_and_records_remainder() {
        let mut ledger = DoseLedger::new();
        ledger
            .record_bolus(bolus(t0(), 2.0, ScheduledCertainty::Certain))
            .unwrap();
        let at = t0() + Duration::seconds(20);
        ledger.cancel_bolus(at, Units::from_f64(0.4));

        let cancelled = ledger.unfinalized_bolus().unwrap();
        assert_eq!(cancelled.cancelled_at, Some(at));
        assert_eq!(cancelled.duration, Duration::seconds(20));
        assert_eq!(cancelled.units_not_delivered, Some(Units::from_f64(0.4)));
        assert_eq!(cancelled.delivered_units(), Units::from_f64(1.6));

        ledger.finalize_finished_doses(at);
        assert!(ledger.unfinalized_bolus().is_none());
        assert_eq!(ledger.finalized_doses().len(), 1);
    }

    #[test]
    fn reconcile_upgrades_confirmed_bolus() {
        let mut ledger = DoseLedger::new();
        ledger
            .record_bolus(bolus(t0(), 1.5, ScheduledCertainty::Uncertain))
            .unwrap();
        ledger.reconcile_delivery_status(DeliveryStatus::BolusInProgress);
        assert_eq!(
            ledger.unfinalized_bolus().unwrap().certainty,
            ScheduledCertainty::Certain
        );
    }

    #[test]
    fn reconcile_drops_disproved_bolus() {
        let mut ledger = DoseLedger::new();
        ledger
            .record_bolus(bolus(t0(), 1.5, ScheduledCertainty::Uncertain))
            .unwrap();
        ledger.reconcile_delivery_status(DeliveryStatus::ScheduledBasal);
        assert!(ledger.unfinalized_bolus().is_none());
    }

    #[test]
    fn reconcile_leaves_certain_records_alone() {
        let mut ledger = DoseLedger::new();
        ledger
            .record_bolus(bolus(t0(), 1.5, ScheduledCertainty::Certain))
            .unwrap();
        ledger.reconcile_delivery_status(DeliveryStatus::ScheduledBasal);
        assert!(ledger.unfinalized_bolus().is_some());
    }

    #[test]
    fn reconcile_suspend_and_resume() {
        let mut ledger = DoseLedger::new();
        ledger
            .record_suspend(SuspendDose {
                start_time: t0(),
                certainty: ScheduledCertainty::Uncertain,
            })
            .unwrap();
        let outcome = ledger.reconcile_delivery_status(DeliveryStatus::Suspended);
        assert_eq!(outcome.suspend_confirmed, Some(t0()));

        let mut ledger = DoseLedger::new();
        ledger
            .record_resume(ResumeDose {
                start_time: t0(),
                certainty: ScheduledCertainty::Uncertain,
            })
            .unwrap();
        let outcome = ledger.reconcile_delivery_status(DeliveryStatus::Suspended);
        assert_eq!(outcome.resume_confirmed, None);
        assert!(ledger.unfinalized_resume().is_none());
    }

    #[test]
    fn drain_clears_finalized_only_on_success() {
        let mut ledger = DoseLedger::new();
        ledger
            .record_bolus(bolus(t0(), 1.0, ScheduledCertainty::Certain))
            .unwrap();
        ledger.finalize_finished_doses(t0() + Duration::hours(1));
        ledger
            .record_bolus(bolus(t0() + Duration::hours(2), 0.5, ScheduledCertainty::Certain))
            .unwrap();

        assert!(!ledger.drain(|doses| {
            assert_eq!(doses.len(), 2); // one finalized + one live
            false
        }));
        assert_eq!(ledger.finalized_doses().len(), 1, "declined handler keeps records");

        assert!(ledger.drain(|doses| {
            assert_eq!(doses.len(), 2);
            true
        }));
        assert!(ledger.finalized_doses().is_empty());
        assert!(ledger.unfinalized_bolus().is_some(), "live dose survives drain");
    }

    proptest! {
        /// The finalized-dose count never decreases under any interleaving
        /// of recordings, finalizations, and reconciliations.
        #[test]
        fn finalized_count_is_monotonic(
            ops in prop::collection::vec((0u8..6, 0i64..10_000, any::<bool>()), 1..60)
        ) {
            let mut ledger = DoseLedger::new();
            let mut last_len = 0usize;
            for (op, offset_secs, flag) in ops {
                let at = t0() + Duration::seconds(offset_secs);
                let certainty = if flag {
                    ScheduledCertainty::Certain
                } else {
                    ScheduledCertainty::Uncertain
                };
                match op {
                    0 => { let _ = ledger.record_bolus(bolus(at, 1.0, certainty)); }
                    1 => { let _ = ledger.record_temp_basal(TempBasalDose {
                        start_time: at,
                        duration: Duration::minutes(30),
                        rate: UnitsPerHour::from_f64(0.5),
                        certainty,
                        cancelled_at: None,
                    }); }
                    2 => { let _ = ledger.record_suspend(SuspendDose { start_time: at, certainty }); }
                    3 => { let _ = ledger.record_resume(ResumeDose { start_time: at, certainty }); }
                    4 => ledger.finalize_finished_doses(at),
                    _ => { ledger.reconcile_delivery_status(if flag {
                        DeliveryStatus::BolusAndTempBasal
                    } else {
                        DeliveryStatus::Suspended
                    }); }
                }
                prop_assert!(ledger.finalized_doses().len() >= last_len);
                last_len = ledger.finalized_doses().len();
            }
        }
    }
}
