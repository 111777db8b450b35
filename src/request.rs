//! Request descriptors: immutable values describing one outbound API call.
//!
//! The HTTP method and path are pure functions of the request kind and the
//! target system, so a descriptor can be re-queued and replayed verbatim.

use crate::models::uplink::{Mode, ModeEnvelope, ParameterId, SystemId, Thermostat};
use http::Method;
use std::collections::{BTreeMap, BTreeSet};

/// The remote API rejects parameter reads naming more ids than this.
pub const MAX_PARAMETERS_PER_REQUEST: usize = 15;

/// Query parameters: name to the set of values sent under that name.
pub type Query = BTreeMap<String, BTreeSet<String>>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RequestKind {
    ListSystems,
    GetSystem,
    GetStatus,
    GetConfig,
    GetCategories,
    GetSoftware,
    GetAlarm,
    GetParameters,
    SetParameters,
    GetMode,
    SetMode,
    UpsertThermostat,
}

impl RequestKind {
    pub fn method(self) -> Method {
        match self {
            RequestKind::SetParameters | RequestKind::SetMode => Method::PUT,
            RequestKind::UpsertThermostat => Method::POST,
            _ => Method::GET,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RequestKind::ListSystems => "list-systems",
            RequestKind::GetSystem => "get-system",
            RequestKind::GetStatus => "get-status",
            RequestKind::GetConfig => "get-config",
            RequestKind::GetCategories => "get-categories",
            RequestKind::GetSoftware => "get-software",
            RequestKind::GetAlarm => "get-alarm",
            RequestKind::GetParameters => "get-parameters",
            RequestKind::SetParameters => "set-parameters",
            RequestKind::GetMode => "get-mode",
            RequestKind::SetMode => "set-mode",
            RequestKind::UpsertThermostat => "upsert-thermostat",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    kind: RequestKind,
    system_id: Option<SystemId>,
    query: Query,
    body: Option<String>,
}

impl Request {
    fn for_system(kind: RequestKind, system_id: SystemId) -> Self {
        Request {
            kind,
            system_id: Some(system_id),
            query: Query::new(),
            body: None,
        }
    }

    fn with_query(mut self, name: &str, values: impl IntoIterator<Item = String>) -> Self {
        self.query.entry(name.to_string()).or_default().extend(values);
        self
    }

    fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn list_systems() -> Self {
        Request {
            kind: RequestKind::ListSystems,
            system_id: None,
            query: Query::new(),
            body: None,
        }
    }

    pub fn system(system_id: SystemId) -> Self {
        Self::for_system(RequestKind::GetSystem, system_id)
    }

    pub fn status(system_id: SystemId) -> Self {
        Self::for_system(RequestKind::GetStatus, system_id)
    }

    pub fn config(system_id: SystemId) -> Self {
        Self::for_system(RequestKind::GetConfig, system_id)
    }

    pub fn categories(system_id: SystemId, include_parameters: bool) -> Self {
        Self::for_system(RequestKind::GetCategories, system_id)
            .with_query("parameters", [include_parameters.to_string()])
    }

    pub fn software(system_id: SystemId) -> Self {
        Self::for_system(RequestKind::GetSoftware, system_id)
    }

    /// Most recent active alarm only.
    pub fn latest_alarm(system_id: SystemId) -> Self {
        Self::for_system(RequestKind::GetAlarm, system_id)
            .with_query("active", ["true".to_string()])
            .with_query("itemsPerPage", ["1".to_string()])
    }

    /// Read of at most [`MAX_PARAMETERS_PER_REQUEST`] parameters; use
    /// [`Request::parameters_chunked`] for arbitrary id sets.
    pub fn parameters(system_id: SystemId, ids: &[ParameterId]) -> Self {
        debug_assert!(ids.len() <= MAX_PARAMETERS_PER_REQUEST);
        Self::for_system(RequestKind::GetParameters, system_id)
            .with_query("parameterIds", ids.iter().map(|id| id.0.to_string()))
    }

    /// One read request per group of at most [`MAX_PARAMETERS_PER_REQUEST`] ids.
    pub fn parameters_chunked(system_id: SystemId, ids: &[ParameterId]) -> Vec<Self> {
        ids.chunks(MAX_PARAMETERS_PER_REQUEST)
            .map(|chunk| Self::parameters(system_id, chunk))
            .collect()
    }

    pub fn set_parameters(system_id: SystemId, values: &BTreeMap<ParameterId, i64>) -> Self {
        let settings: serde_json::Map<String, serde_json::Value> = values
            .iter()
            .map(|(id, value)| (id.0.to_string(), serde_json::Value::from(*value)))
            .collect();
        let body = serde_json::json!({ "settings": settings }).to_string();
        Self::for_system(RequestKind::SetParameters, system_id).with_body(body)
    }

    pub fn mode(system_id: SystemId) -> Self {
        Self::for_system(RequestKind::GetMode, system_id)
    }

    pub fn set_mode(system_id: SystemId, mode: Mode) -> Self {
        let body = serde_json::to_value(ModeEnvelope { mode })
            .unwrap_or_default()
            .to_string();
        Self::for_system(RequestKind::SetMode, system_id).with_body(body)
    }

    pub fn upsert_thermostat(system_id: SystemId, thermostat: &Thermostat) -> Self {
        let body = serde_json::to_value(thermostat).unwrap_or_default().to_string();
        Self::for_system(RequestKind::UpsertThermostat, system_id).with_body(body)
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    pub fn system_id(&self) -> Option<SystemId> {
        self.system_id
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn method(&self) -> Method {
        self.kind.method()
    }

    /// Path relative to the versioned API base.
    pub fn path(&self) -> String {
        let Some(SystemId(id)) = self.system_id else {
            return "/systems".to_string();
        };
        match self.kind {
            RequestKind::ListSystems => "/systems".to_string(),
            RequestKind::GetSystem => format!("/systems/{id}"),
            RequestKind::GetStatus => format!("/systems/{id}/status/system"),
            RequestKind::GetConfig => format!("/systems/{id}/config"),
            RequestKind::GetCategories => format!("/systems/{id}/serviceinfo/categories"),
            RequestKind::GetSoftware => format!("/systems/{id}/software"),
            RequestKind::GetAlarm => format!("/systems/{id}/notifications"),
            RequestKind::GetParameters | RequestKind::SetParameters => format!("/systems/{id}/parameters"),
            RequestKind::GetMode | RequestKind::SetMode => format!("/systems/{id}/smarthome/mode"),
            RequestKind::UpsertThermostat => format!("/systems/{id}/smarthome/thermostats"),
        }
    }

    /// Parameter ids named by a read request.
    pub fn parameter_ids(&self) -> Vec<ParameterId> {
        self.query
            .get("parameterIds")
            .into_iter()
            .flatten()
            .filter_map(|v| v.parse().ok().map(ParameterId))
            .collect()
    }
}
