//! Response decoding: response body to typed value, or a `ParseError` naming
//! the JSON path that did not match.

use serde::de::DeserializeOwned;

use crate::error::ParseError;
use crate::models::uplink::{
    AlarmInfo, Category, Mode, ModeEnvelope, Paged, Parameter, ParameterSetResult, SoftwareInfo, System,
    SystemConfig,
};

fn parse<T: DeserializeOwned>(what: &'static str, body: &str) -> Result<T, ParseError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| ParseError {
        what,
        path: e.path().to_string(),
        message: e.inner().to_string(),
    })
}

pub fn systems(body: &str) -> Result<Vec<System>, ParseError> {
    parse::<Paged<System>>("system list", body).map(|p| p.objects)
}

pub fn system(body: &str) -> Result<System, ParseError> {
    parse("system", body)
}

pub fn system_config(body: &str) -> Result<SystemConfig, ParseError> {
    parse("system config", body)
}

pub fn categories(body: &str) -> Result<Vec<Category>, ParseError> {
    parse("categories", body)
}

/// The status endpoint groups its values like the category listing.
pub fn status(body: &str) -> Result<Vec<Category>, ParseError> {
    parse("system status", body)
}

pub fn software_info(body: &str) -> Result<SoftwareInfo, ParseError> {
    parse("software info", body)
}

/// Newest alarm of a notification page, `None` when nothing is active.
pub fn latest_alarm(body: &str) -> Result<Option<AlarmInfo>, ParseError> {
    parse::<Paged<AlarmInfo>>("notifications", body).map(|p| p.objects.into_iter().next())
}

pub fn parameters(body: &str) -> Result<Vec<Parameter>, ParseError> {
    parse("parameters", body)
}

/// Parameters echoed back by a write.
pub fn parameter_set_results(body: &str) -> Result<Vec<Parameter>, ParseError> {
    parse::<Vec<ParameterSetResult>>("parameter write result", body)
        .map(|results| results.into_iter().map(|r| r.parameter).collect())
}

pub fn mode(body: &str) -> Result<Mode, ParseError> {
    parse::<ModeEnvelope>("mode", body).map(|m| m.mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::uplink::{ConnectionStatus, ParameterId, SecurityLevel, SystemId};

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/data/{}", name)).expect("fixture present")
    }

    #[test]
    fn decodes_system_listing() {
        let systems = systems(&fixture("systems.json")).unwrap();
        assert_eq!(systems.len(), 2);
        assert_eq!(systems[0].system_id, SystemId(42));
        assert_eq!(systems[0].security_level, Some(SecurityLevel::Admin));
        assert_eq!(systems[0].connection_status, ConnectionStatus::Online);
        assert!(systems[0].last_activity_date.is_some());
        assert_eq!(systems[1].connection_status, ConnectionStatus::Offline);
        assert!(systems[1].has_alarmed);
    }

    #[test]
    fn empty_listing_is_fine() {
        assert!(systems(r#"{"page":1,"itemsPerPage":30,"numItems":0,"objects":[]}"#).unwrap().is_empty());
    }

    #[test]
    fn decodes_categories_with_parameters() {
        let cats = categories(&fixture("categories.json")).unwrap();
        assert_eq!(cats[0].category_id, "STATUS");
        let params = cats[0].parameters.as_ref().unwrap();
        assert_eq!(params[0].parameter_id, ParameterId(40004));
        assert_eq!(params[0].raw_value, -32);
        assert_eq!(params[0].display_value, "-3.2°C");
        assert!(cats[1].parameters.is_none());
    }

    #[test]
    fn decodes_software_and_alarms() {
        let info = software_info(&fixture("software.json")).unwrap();
        assert!(info.upgrade_available());
        assert_eq!(info.current.name, "8701R3");

        let alarm = latest_alarm(&fixture("notifications.json")).unwrap().unwrap();
        assert_eq!(alarm.notification_id, 1289);
        assert_eq!(alarm.header, "Low brine temperature");

        assert_eq!(latest_alarm(r#"{"objects":[]}"#).unwrap(), None);
    }

    #[test]
    fn decodes_mode_and_write_results() {
        assert_eq!(mode(r#"{"mode":"VACATION"}"#).unwrap(), Mode::Vacation);
        let written = parameter_set_results(
            r#"[{"status":"DONE","parameter":{"parameterId":47011,"unit":"","displayValue":"1","rawValue":1}}]"#,
        )
        .unwrap();
        assert_eq!(written[0].parameter_id, ParameterId(47011));
    }

    #[test]
    fn reports_path_of_missing_field() {
        let err = system(r#"{"systemId":1,"name":"x"}"#).unwrap_err();
        assert_eq!(err.what, "system");
        assert!(err.message.contains("connectionStatus"), "{}", err.message);

        let err = parameters(r#"[{"parameterId":1,"rawValue":"high"}]"#).unwrap_err();
        assert_eq!(err.path, "[0].rawValue");
    }

    #[test]
    fn wrong_shape_and_empty_body_fail() {
        assert!(parameters(r#"{"parameterId":1}"#).is_err());
        assert!(mode("").is_err());
        assert!(parameters("[]").unwrap().is_empty());
    }
}
