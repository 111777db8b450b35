use serde::Serialize;
use std::str::FromStr;

/// Serialize a serde-backed enum into its string name (e.g. SCREAMING_SNAKE_CASE).
pub fn serde_enum_name<T: Serialize>(val: &T) -> Option<String> {
    serde_json::to_value(val).ok()?.as_str().map(|s| s.to_string())
}

/// Parse a comma separated list such as `40004, 40013`; blanks are skipped.
pub fn parse_list<T: FromStr>(raw: &str) -> Result<Vec<T>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().map_err(|_| format!("invalid list entry: {}", s)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::uplink::Mode;

    #[test]
    fn enum_names() {
        assert_eq!(serde_enum_name(&Mode::AwayFromHome).as_deref(), Some("AWAY_FROM_HOME"));
    }

    #[test]
    fn lists() {
        assert_eq!(parse_list::<i64>(" 40004,40013 ,,").unwrap(), vec![40004, 40013]);
        assert!(parse_list::<i64>("1,x").is_err());
        assert!(parse_list::<i64>("").unwrap().is_empty());
    }
}
