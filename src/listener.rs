//! Callback interfaces implemented by the hosting integration.
//!
//! Callbacks run synchronously on the request processor: a slow listener
//! delays every request queued behind it, so implementations must return
//! promptly and must never block indefinitely.

use crate::error::RequestError;
use crate::models::uplink::{AlarmInfo, Category, Mode, Parameter, SoftwareInfo, System, SystemId};

/// Receives results for one system. All methods default to no-ops.
pub trait SystemListener: Send + Sync {
    fn system_updated(&self, _system: &System) {}

    fn status_updated(&self, _system_id: SystemId, _status: &[Category]) {}

    fn parameters_updated(&self, _system_id: SystemId, _parameters: &[Parameter]) {}

    fn mode_updated(&self, _system_id: SystemId, _mode: Mode) {}

    fn software_info_updated(&self, _system_id: SystemId, _info: &SoftwareInfo) {}

    /// `None` when the system has no active alarm.
    fn alarm_info_updated(&self, _system_id: SystemId, _alarm: Option<&AlarmInfo>) {}
}

/// Connectivity signal for the owning bridge.
pub trait ConnectionObserver: Send + Sync {
    /// The remote service answered with a server error; polling is suspended.
    fn outage(&self, error: &RequestError);

    /// The alive-check reached the service again; polling resumed.
    fn recovered(&self);
}
