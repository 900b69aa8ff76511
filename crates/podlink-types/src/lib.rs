//! # podlink-types: Core types for podlink
//!
//! This crate contains the shared domain types used across the podlink
//! system:
//! - Pod identifiers ([`PodAddress`], [`Lot`], [`Tid`])
//! - Insulin quantities ([`Units`], [`UnitsPerHour`])
//! - Alert configuration ([`AlertSlot`], [`AlertSet`], [`PodAlert`])
//! - Lifecycle enums ([`SetupProgress`], [`PodProgressStatus`],
//!   [`DeliveryStatus`], [`SuspendState`])
//! - Fault identification ([`FaultEventCode`])
//! - Basal programming ([`BasalSchedule`])
//! - Protocol constants ([`consts`])

mod alerts;
pub mod consts;
mod ids;
mod schedule;
mod status;
pub mod time_serde;
mod units;

pub use alerts::{AlertSet, AlertSlot, AlertTrigger, PodAlert};
pub use ids::{Lot, PodAddress, Tid};
pub use schedule::{BasalSchedule, BasalScheduleEntry, ScheduleError};
pub use status::{
    BeepType, DeliveryKind, DeliveryKindSet, DeliveryStatus, FaultEventCode, PodProgressStatus,
    SetupProgress, SuspendState, all_but_basal, all_deliveries,
};
pub use units::{Units, UnitsPerHour};
