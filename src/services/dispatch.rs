//! Delivery of completed asynchronous requests: decode by kind, update the
//! cache, notify the system's listener.

use log::{debug, warn};

use crate::cache::SystemTable;
use crate::decode;
use crate::error::ParseError;
use crate::listener::SystemListener;
use crate::models::uplink::{AlarmInfo, Category, Mode, Parameter, SoftwareInfo, System, SystemId};
use crate::request::{Request, RequestKind};

/// Decoded result worth a callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    System(System),
    Status(Vec<Category>),
    Parameters(Vec<Parameter>),
    Mode(Mode),
    Software(SoftwareInfo),
    Alarm(Option<AlarmInfo>),
}

impl Update {
    fn deliver(&self, system_id: SystemId, listener: &dyn SystemListener) {
        match self {
            Update::System(system) => listener.system_updated(system),
            Update::Status(status) => listener.status_updated(system_id, status),
            Update::Parameters(parameters) => listener.parameters_updated(system_id, parameters),
            Update::Mode(mode) => listener.mode_updated(system_id, *mode),
            Update::Software(info) => listener.software_info_updated(system_id, info),
            Update::Alarm(alarm) => listener.alarm_info_updated(system_id, alarm.as_ref()),
        }
    }
}

/// Decode `body` for `request` and fold cacheable data into `systems`.
pub fn decode_update(systems: &SystemTable, request: &Request, body: &str) -> Result<Option<Update>, ParseError> {
    let Some(id) = request.system_id() else {
        systems.merge_systems(&decode::systems(body)?);
        return Ok(None);
    };

    let update = match request.kind() {
        RequestKind::ListSystems => {
            systems.merge_systems(&decode::systems(body)?);
            None
        }
        RequestKind::GetSystem => Some(Update::System(systems.update_system(decode::system(body)?))),
        RequestKind::GetStatus => Some(Update::Status(decode::status(body)?)),
        RequestKind::GetConfig => {
            systems.set_capabilities(id, decode::system_config(body)?);
            None
        }
        RequestKind::GetCategories => {
            let with_parameters = request
                .query()
                .get("parameters")
                .is_some_and(|v| v.contains("true"));
            systems.set_categories(id, with_parameters, decode::categories(body)?);
            None
        }
        RequestKind::GetSoftware => Some(Update::Software(decode::software_info(body)?)),
        RequestKind::GetAlarm => Some(Update::Alarm(decode::latest_alarm(body)?)),
        RequestKind::GetParameters => Some(Update::Parameters(decode::parameters(body)?)),
        RequestKind::SetParameters if body.trim().is_empty() => None,
        RequestKind::SetParameters => Some(Update::Parameters(decode::parameter_set_results(body)?)),
        RequestKind::GetMode => Some(Update::Mode(decode::mode(body)?)),
        RequestKind::SetMode if body.trim().is_empty() => None,
        RequestKind::SetMode => Some(Update::Mode(decode::mode(body)?)),
        RequestKind::UpsertThermostat => None,
    };
    Ok(update)
}

/// Handle a successful asynchronous request. Decode failures are logged and
/// the result dropped.
pub fn dispatch(systems: &SystemTable, request: &Request, body: &str) {
    let update = match decode_update(systems, request, body) {
        Ok(Some(update)) => update,
        Ok(None) => {
            debug!("{} completed", request.kind().name());
            return;
        }
        Err(e) => {
            warn!("Dropping {} result: {}", request.kind().name(), e);
            return;
        }
    };

    let Some(id) = request.system_id() else {
        return;
    };
    match systems.listener(id) {
        Some(listener) => update.deliver(id, listener.as_ref()),
        None => debug!(
            "No listener for system {}; dropping {} result",
            id,
            request.kind().name()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::uplink::ParameterId;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl SystemListener for Recorder {
        fn system_updated(&self, system: &System) {
            self.events.lock().unwrap().push(format!("system:{}", system.name));
        }

        fn parameters_updated(&self, system_id: SystemId, parameters: &[Parameter]) {
            self.events
                .lock()
                .unwrap()
                .push(format!("parameters:{}:{}", system_id, parameters.len()));
        }

        fn alarm_info_updated(&self, _system_id: SystemId, alarm: Option<&AlarmInfo>) {
            self.events
                .lock()
                .unwrap()
                .push(format!("alarm:{}", alarm.map(|a| a.header.as_str()).unwrap_or("none")));
        }

        fn mode_updated(&self, _system_id: SystemId, mode: Mode) {
            self.events.lock().unwrap().push(format!("mode:{:?}", mode));
        }
    }

    fn setup() -> (SystemTable, Arc<Recorder>) {
        let table = SystemTable::default();
        let recorder = Arc::new(Recorder::default());
        table.register_listener(SystemId(42), recorder.clone());
        (table, recorder)
    }

    #[test]
    fn system_fetch_updates_cache_and_notifies() {
        let (table, recorder) = setup();
        dispatch(
            &table,
            &Request::system(SystemId(42)),
            r#"{"systemId":42,"name":"Villa","connectionStatus":"ONLINE"}"#,
        );
        assert_eq!(*recorder.events.lock().unwrap(), vec!["system:Villa"]);
        assert_eq!(table.system(SystemId(42)).map(|s| s.name), Some("Villa".to_string()));
    }

    #[test]
    fn alarm_dispatch_is_a_single_case() {
        let (table, recorder) = setup();
        dispatch(&table, &Request::latest_alarm(SystemId(42)), r#"{"objects":[]}"#);
        dispatch(
            &table,
            &Request::latest_alarm(SystemId(42)),
            r#"{"objects":[{"notificationId":1,"header":"High pressure"}]}"#,
        );
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["alarm:none", "alarm:High pressure"]
        );
    }

    #[test]
    fn decode_failure_is_dropped() {
        let (table, recorder) = setup();
        dispatch(&table, &Request::parameters(SystemId(42), &[ParameterId(1)]), "{\"oops\":1}");
        assert!(recorder.events.lock().unwrap().is_empty());
    }

    #[test]
    fn empty_write_responses_are_silent() {
        let (table, recorder) = setup();
        dispatch(&table, &Request::set_mode(SystemId(42), Mode::Vacation), "");
        dispatch(
            &table,
            &Request::set_mode(SystemId(42), Mode::Vacation),
            r#"{"mode":"VACATION"}"#,
        );
        assert_eq!(*recorder.events.lock().unwrap(), vec!["mode:Vacation"]);
    }

    #[test]
    fn results_without_listener_are_dropped() {
        let table = SystemTable::default();
        dispatch(
            &table,
            &Request::parameters(SystemId(9), &[ParameterId(1)]),
            r#"[{"parameterId":1,"rawValue":3}]"#,
        );
        assert!(table.listener(SystemId(9)).is_none());
    }

    #[test]
    fn config_and_categories_are_cached() {
        let (table, _) = setup();
        dispatch(
            &table,
            &Request::system(SystemId(42)),
            r#"{"systemId":42,"name":"Villa","connectionStatus":"ONLINE"}"#,
        );
        dispatch(&table, &Request::config(SystemId(42)), r#"{"hasHeating":true}"#);
        dispatch(
            &table,
            &Request::categories(SystemId(42), true),
            r#"[{"categoryId":"STATUS","name":"status","parameters":[]}]"#,
        );
        assert!(table.capabilities(SystemId(42)).is_some_and(|c| c.has_heating));
        assert_eq!(table.categories(SystemId(42), true).map(|c| c.len()), Some(1));
    }
}
