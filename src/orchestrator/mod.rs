//! Application-level orchestration.
//!
//! This module owns the guarded campaign lifecycle operations (start, pause,
//! resume, stop, status, validate). CLI layers call into this module instead
//! of touching the engine directly.

mod controller;

pub use controller::{
    CampaignController, ControlError, StartReceipt, StartRequest, StatusResponse,
};
