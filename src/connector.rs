//! Public entry point used by the hosting integration.
//!
//! - Synchronous lookups (`list_systems`, `get_system_config`,
//!   `get_categories`) await one round trip at the head of the queue, or
//!   answer from the cache.
//! - `request_*` and `set_*` calls enqueue and return at once; results
//!   arrive through the system's [`SystemListener`].

use log::{debug, info};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::client::RequestExecutor;
use crate::decode;
use crate::error::RequestError;
use crate::listener::{ConnectionObserver, SystemListener};
use crate::models::uplink::{Category, Mode, ParameterId, System, SystemConfig, SystemId, Thermostat, ThermostatId};
use crate::queue::Position;
use crate::request::Request;
use crate::services::scheduler::{EngineSettings, Scheduler, SchedulerPhase};

pub struct UplinkConnector {
    scheduler: Arc<Scheduler>,
}

impl UplinkConnector {
    /// Must be called from within a Tokio runtime.
    pub fn new(
        executor: RequestExecutor,
        settings: EngineSettings,
        observer: Option<Arc<dyn ConnectionObserver>>,
    ) -> Self {
        UplinkConnector {
            scheduler: Scheduler::new(executor, settings, observer),
        }
    }

    fn enqueue_on_demand(&self, request: Request) -> bool {
        self.scheduler.enqueue(request, Position::Head)
    }

    // ---- synchronous lookups ----

    pub async fn list_systems(&self) -> Result<Vec<System>, RequestError> {
        let body = self.scheduler.round_trip(Request::list_systems()).await?;
        let systems = decode::systems(&body)?;
        self.scheduler.systems().merge_systems(&systems);
        debug!("Listed {} system(s)", systems.len());
        Ok(systems)
    }

    pub async fn get_system_config(&self, id: SystemId) -> Result<SystemConfig, RequestError> {
        if let Some(config) = self.scheduler.systems().capabilities(id) {
            return Ok(config);
        }
        let body = self.scheduler.round_trip(Request::config(id)).await?;
        let config = decode::system_config(&body)?;
        self.scheduler.systems().set_capabilities(id, config);
        Ok(config)
    }

    pub async fn get_categories(&self, id: SystemId, include_parameters: bool) -> Result<Vec<Category>, RequestError> {
        if let Some(categories) = self.scheduler.systems().categories(id, include_parameters) {
            return Ok(categories);
        }
        let body = self
            .scheduler
            .round_trip(Request::categories(id, include_parameters))
            .await?;
        let categories = decode::categories(&body)?;
        self.scheduler
            .systems()
            .set_categories(id, include_parameters, categories.clone());
        Ok(categories)
    }

    /// Last known record, without a round trip.
    pub fn cached_system(&self, id: SystemId) -> Option<System> {
        self.scheduler.systems().system(id)
    }

    // ---- asynchronous requests ----

    pub fn request_system(&self, id: SystemId) -> bool {
        self.enqueue_on_demand(Request::system(id))
    }

    pub fn request_status(&self, id: SystemId) -> bool {
        self.enqueue_on_demand(Request::status(id))
    }

    pub fn request_latest_alarm(&self, id: SystemId) -> bool {
        self.enqueue_on_demand(Request::latest_alarm(id))
    }

    pub fn request_software_info(&self, id: SystemId) -> bool {
        self.enqueue_on_demand(Request::software(id))
    }

    pub fn request_mode(&self, id: SystemId) -> bool {
        self.enqueue_on_demand(Request::mode(id))
    }

    /// Reads `ids` in chunks the API accepts.
    pub fn request_parameters(&self, id: SystemId, ids: &[ParameterId]) -> bool {
        Request::parameters_chunked(id, ids)
            .into_iter()
            .fold(true, |all, request| self.enqueue_on_demand(request) && all)
    }

    pub fn set_parameters(&self, id: SystemId, values: &BTreeMap<ParameterId, i64>) -> bool {
        self.enqueue_on_demand(Request::set_parameters(id, values))
    }

    /// Send the mode and keep re-sending it while it is not the default.
    pub fn set_mode(&self, id: SystemId, mode: Mode) -> bool {
        self.scheduler.systems().set_mode(id, mode);
        self.enqueue_on_demand(Request::set_mode(id, mode))
    }

    /// Submit the thermostat and keep it alive until removed.
    pub fn set_thermostat(&self, id: SystemId, thermostat: Thermostat) -> bool {
        let request = Request::upsert_thermostat(id, &thermostat);
        self.scheduler.systems().put_thermostat(id, thermostat);
        self.enqueue_on_demand(request)
    }

    /// Stop re-submitting a thermostat; the service expires it on its own.
    pub fn remove_thermostat(&self, id: SystemId, thermostat: ThermostatId) -> bool {
        let removed = self.scheduler.systems().remove_thermostat(id, thermostat).is_some();
        if !removed {
            debug!("Thermostat {} of system {} was not registered", thermostat.0, id);
        }
        removed
    }

    // ---- tracking & listeners ----

    pub fn add_tracked_parameter(&self, id: SystemId, parameter: ParameterId) -> bool {
        self.scheduler.systems().add_tracked(id, parameter)
    }

    pub fn remove_tracked_parameter(&self, id: SystemId, parameter: ParameterId) -> bool {
        self.scheduler.systems().remove_tracked(id, parameter)
    }

    pub fn tracked_parameters(&self, id: SystemId) -> Vec<ParameterId> {
        self.scheduler.systems().tracked(id)
    }

    pub fn add_callback_listener(&self, id: SystemId, listener: Arc<dyn SystemListener>) {
        self.scheduler.add_listener(id, listener);
    }

    pub fn remove_callback_listener(&self, id: SystemId, listener: &Arc<dyn SystemListener>) -> bool {
        self.scheduler.remove_listener(id, listener)
    }

    // ---- configuration ----

    pub fn set_update_interval(&self, seconds: u64) {
        self.scheduler.set_update_interval(Duration::from_secs(seconds));
    }

    pub fn set_software_update_check_interval(&self, days: i64) {
        self.scheduler.set_software_check_days(days);
    }

    // ---- diagnostics ----

    pub fn phase(&self) -> SchedulerPhase {
        self.scheduler.phase()
    }

    pub fn queue_len(&self) -> usize {
        self.scheduler.queue().len()
    }

    /// Queued requests, head first.
    pub fn queued_requests(&self) -> Vec<Request> {
        self.scheduler.queue().snapshot()
    }

    pub fn shutdown(&self) {
        info!("Shutting down uplink connector");
        self.scheduler.shutdown();
    }
}

impl Drop for UplinkConnector {
    fn drop(&mut self) {
        self.scheduler.shutdown();
    }
}
