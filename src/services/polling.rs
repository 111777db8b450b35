//! Request builders for the periodic producers.
//!
//! Each function reads the system table once and returns the requests to
//! append to the tail of the queue, in the order they should be sent.

use crate::cache::SystemTable;
use crate::request::Request;

/// Record, status and tracked parameters of every system with a listener.
pub fn standard_poll(systems: &SystemTable) -> Vec<Request> {
    let mut requests = Vec::new();
    for id in systems.listened_systems() {
        requests.push(Request::system(id));
        requests.push(Request::status(id));
        let tracked = systems.tracked(id);
        requests.extend(Request::parameters_chunked(id, &tracked));
    }
    requests
}

pub fn software_poll(systems: &SystemTable) -> Vec<Request> {
    systems.listened_systems().into_iter().map(Request::software).collect()
}

/// Re-submit every live thermostat unchanged so the service keeps it.
pub fn thermostat_heartbeat(systems: &SystemTable) -> Vec<Request> {
    systems
        .thermostats()
        .into_iter()
        .flat_map(|(id, thermostats)| {
            thermostats
                .into_iter()
                .map(move |t| Request::upsert_thermostat(id, &t))
        })
        .collect()
}

/// Re-submit every non-default mode override.
pub fn mode_heartbeat(systems: &SystemTable) -> Vec<Request> {
    systems
        .mode_overrides()
        .into_iter()
        .map(|(id, mode)| Request::set_mode(id, mode))
        .collect()
}
