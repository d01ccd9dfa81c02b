//! Upstream JSON shapes.
//!
//! Every endpoint wraps its payload as `{"data": {"content": [...]}}`.
//! Fields that arrive with mixed types are kept as raw [`Value`]s and
//! classified later.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: ContentPage<T>,
}

#[derive(Debug, Deserialize)]
pub struct ContentPage<T> {
    pub content: Vec<T>,
}

/// One entry of a service-group page.
#[derive(Debug, Deserialize)]
pub struct ServiceGroupEntry {
    #[serde(rename = "serLpGroupUuid", default)]
    pub id: Option<Value>,
    #[serde(rename = "serLpGroupNameEn", default)]
    pub name: Option<Value>,
}

/// One entry of a route-service listing.
#[derive(Debug, Deserialize)]
pub struct RouteServiceEntry {
    #[serde(rename = "serLpCode", default)]
    pub code: Option<Value>,
    #[serde(rename = "serLpNameEn", default)]
    pub name: Option<Value>,
}

/// One directional rotation of a route service.
#[derive(Debug, Deserialize)]
pub struct CallPortEntry {
    #[serde(default)]
    pub direction: Option<Value>,
    pub ports: Vec<PortCall>,
}

/// One port of a rotation, in sailing order.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortCall {
    #[serde(default)]
    pub call_port: Option<Value>,
    #[serde(default)]
    pub call_port_eta: Option<Value>,
    #[serde(default)]
    pub call_port_eta_time: Option<Value>,
    #[serde(default)]
    pub call_port_etd: Option<Value>,
    #[serde(default)]
    pub call_port_etd_time: Option<Value>,
}

/// Text of an identifier that may arrive as a string or a number.
pub fn key_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn port_call_reads_mixed_fields() {
        let port: PortCall = serde_json::from_value(json!({
            "callPort": "Hamburg ",
            "callPortEtaTime": 1200,
            "callPortEta": "MON",
            "callPortEtdTime": null,
        }))
        .unwrap();
        assert_eq!(port.call_port, Some(json!("Hamburg ")));
        assert_eq!(port.call_port_eta_time, Some(json!(1200)));
        assert_eq!(port.call_port_etd_time, None);
        assert_eq!(port.call_port_etd, None);
    }

    #[test]
    fn non_string_names_do_not_fail_the_page() {
        let page: Envelope<RouteServiceEntry> = serde_json::from_value(json!({
            "data": {"content": [{"serLpCode": "R1", "serLpNameEn": 7}]}
        }))
        .unwrap();
        assert_eq!(key_text(page.data.content[0].name.as_ref()), Some("7".into()));

        let port: PortCall = serde_json::from_value(json!({"callPort": 42})).unwrap();
        assert_eq!(port.call_port, Some(json!(42)));
    }

    #[test]
    fn envelope_requires_content() {
        let err = serde_json::from_value::<Envelope<ServiceGroupEntry>>(json!({"data": {}}));
        assert!(err.is_err());
    }

    #[test]
    fn key_text_accepts_strings_and_numbers() {
        assert_eq!(key_text(Some(&json!(" G1 "))), Some("G1".into()));
        assert_eq!(key_text(Some(&json!(42))), Some("42".into()));
        assert_eq!(key_text(Some(&json!(""))), None);
        assert_eq!(key_text(Some(&Value::Null)), None);
        assert_eq!(key_text(None), None);
    }
}
