//! Instrumentation event model and its wire encoding.
//!
//! An event is a flat JSON object. Caller fields come first in call order,
//! followed by the fixed `T`, `TS`, `Name` and `FID` fields. The encoded form
//! that goes into a batch is the URL-encoded JSON text.

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

/// Prefix applied to every event type in the `T` field.
pub const EVENT_TYPE_PREFIX: &str = "CI.";

/// Primitive value of an event field.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl FieldValue {
    fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Text(s) => JsonValue::from(s.as_str()),
            FieldValue::Integer(n) => JsonValue::from(*n),
            // Non-finite floats have no JSON form; JSON.stringify emits null
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
        }
    }

    fn to_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Integer(n) => n.to_string(),
            FieldValue::Float(f) => f.to_string(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(value.into())
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::Integer(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

/// Feature identifier of an event. A numeric id doubles as the `K` value.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureId {
    Text(String),
    Number(i64),
}

impl From<&str> for FeatureId {
    fn from(value: &str) -> Self {
        FeatureId::Text(value.to_string())
    }
}

impl From<String> for FeatureId {
    fn from(value: String) -> Self {
        FeatureId::Text(value)
    }
}

impl From<i64> for FeatureId {
    fn from(value: i64) -> Self {
        FeatureId::Number(value)
    }
}

/// A single call to the batcher, before it is turned into an [`Event`].
#[derive(Clone, Debug, Default)]
pub struct LogRequest {
    pub event_type: String,
    pub feature_id: Option<FeatureId>,
    pub name: Option<String>,
    pub immediate: bool,
    pub fields: Vec<(String, FieldValue)>,
}

impl LogRequest {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            ..Self::default()
        }
    }

    pub fn feature_id(mut self, feature_id: impl Into<FeatureId>) -> Self {
        self.feature_id = Some(feature_id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Flush right after this event has been appended.
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn fields<K, V, I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldValue>,
    {
        self.fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Route events to a specific impression group instead of the default one.
    pub fn impression_guid(self, guid: impl Into<String>) -> Self {
        self.field("impressionGuid", guid.into())
    }

    pub fn service(self, service: impl Into<String>) -> Self {
        self.field("service", service.into())
    }

    pub fn scenario(self, scenario: impl Into<String>) -> Self {
        self.field("scenario", scenario.into())
    }

    pub fn app_ns(self, app_ns: impl Into<String>) -> Self {
        self.field("appNS", app_ns.into())
    }

    pub fn k_value(self, k: impl Into<FieldValue>) -> Self {
        self.field("kValue", k)
    }

    /// Append the set parts of `context` after the fields added so far.
    pub fn context(mut self, context: EventContext) -> Self {
        if let Some(service) = context.service.filter(|s| !s.is_empty()) {
            self = self.service(service);
        }
        if let Some(scenario) = context.scenario.filter(|s| !s.is_empty()) {
            self = self.scenario(scenario);
        }
        if let Some(app_ns) = context.app_ns.filter(|s| !s.is_empty()) {
            self = self.app_ns(app_ns);
        }
        if let Some(k) = context.k_value {
            self = self.k_value(k);
        }
        self
    }
}

/// Service, scenario, app namespace and K value attached to an event.
/// Unset or empty parts are left out.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventContext {
    pub service: Option<String>,
    pub scenario: Option<String>,
    pub app_ns: Option<String>,
    pub k_value: Option<FieldValue>,
}

/// A built event ready for encoding.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    route_override: Option<String>,
    fields: Map<String, JsonValue>,
}

impl Event {
    /// Build an event from a request, stamping it with `now_ms`.
    pub fn build(request: &LogRequest, now_ms: i64) -> Self {
        let mut route_override = None;
        let mut fields = Map::new();

        for (key, value) in &request.fields {
            if key.is_empty() {
                continue;
            }
            match key.to_ascii_lowercase().as_str() {
                "impressionguid" => route_override = Some(value.to_text()),
                "service" => insert(&mut fields, "Service", value),
                "scenario" => insert(&mut fields, "Scenario", value),
                "appns" => insert(&mut fields, "AppNS", value),
                "k" | "kvalue" => insert(&mut fields, "K", value),
                "pos" => insert(&mut fields, "Pos", value),
                _ => insert(&mut fields, key, value),
            }
        }

        fields.insert(
            "T".to_string(),
            JsonValue::from(format!("{}{}", EVENT_TYPE_PREFIX, request.event_type)),
        );
        fields.insert("TS".to_string(), JsonValue::from(now_ms));
        fields.insert(
            "Name".to_string(),
            JsonValue::from(request.name.clone().unwrap_or_default()),
        );
        let fid = match &request.feature_id {
            Some(FeatureId::Text(s)) => s.clone(),
            _ => String::new(),
        };
        fields.insert("FID".to_string(), JsonValue::from(fid));
        if let Some(FeatureId::Number(k)) = request.feature_id {
            if !fields.contains_key("K") {
                fields.insert("K".to_string(), JsonValue::from(k));
            }
        }

        Self {
            route_override,
            fields,
        }
    }

    /// Route key requested by the event itself through `impressionGuid`.
    pub fn route_override(&self) -> Option<&str> {
        self.route_override.as_deref()
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.fields)
    }

    /// URL-encoded JSON, the unit that is appended to a pending batch.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(urlencoding::encode(&self.to_json()?).into_owned())
    }
}

fn insert(fields: &mut Map<String, JsonValue>, key: &str, value: &FieldValue) {
    fields.insert(key.to_string(), value.to_json());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_fixed_fields_after_caller_fields() {
        let request = LogRequest::new("Click")
            .feature_id("Header")
            .name("Logo")
            .field("Extra", "x");
        let event = Event::build(&request, 1_700_000_000_000);

        assert_eq!(
            event.to_json().unwrap(),
            r#"{"Extra":"x","T":"CI.Click","TS":1700000000000,"Name":"Logo","FID":"Header"}"#
        );
    }

    #[test]
    fn normalizes_well_known_keys() {
        let request = LogRequest::new("Click")
            .field("service", "chat")
            .field("SCENARIO", "send")
            .field("appns", "ns")
            .field("kValue", 7)
            .field("pos", 3);
        let event = Event::build(&request, 0);

        assert_eq!(event.get("Service"), Some(&JsonValue::from("chat")));
        assert_eq!(event.get("Scenario"), Some(&JsonValue::from("send")));
        assert_eq!(event.get("AppNS"), Some(&JsonValue::from("ns")));
        assert_eq!(event.get("K"), Some(&JsonValue::from(7)));
        assert_eq!(event.get("Pos"), Some(&JsonValue::from(3)));
        assert!(event.get("service").is_none());
    }

    #[test]
    fn context_builders_emit_normalized_keys_after_caller_fields() {
        let request = LogRequest::new("Answer").field("Extra", "x").context(EventContext {
            service: Some("chat".into()),
            scenario: Some("send".into()),
            app_ns: Some("ns".into()),
            k_value: Some(FieldValue::Integer(9)),
        });
        let event = Event::build(&request, 0);

        assert_eq!(event.get("Service"), Some(&JsonValue::from("chat")));
        assert_eq!(event.get("Scenario"), Some(&JsonValue::from("send")));
        assert_eq!(event.get("AppNS"), Some(&JsonValue::from("ns")));
        assert_eq!(event.get("K"), Some(&JsonValue::from(9)));
        assert!(event
            .to_json()
            .unwrap()
            .starts_with(r#"{"Extra":"x","Service":"chat","Scenario":"send","AppNS":"ns","K":9,"#));
    }

    #[test]
    fn empty_context_parts_are_skipped() {
        let request = LogRequest::new("Answer").context(EventContext {
            service: Some(String::new()),
            scenario: None,
            ..EventContext::default()
        });
        assert!(request.fields.is_empty());
    }

    #[test]
    fn impression_guid_routes_and_is_not_emitted() {
        let request = LogRequest::new("Click").impression_guid("g1");
        let event = Event::build(&request, 0);

        assert_eq!(event.route_override(), Some("g1"));
        assert!(event.get("impressionGuid").is_none());
    }

    #[test]
    fn numeric_feature_id_becomes_k() {
        let event = Event::build(&LogRequest::new("Click").feature_id(42), 0);
        assert_eq!(event.get("K"), Some(&JsonValue::from(42)));
        assert_eq!(event.get("FID"), Some(&JsonValue::from("")));
    }

    #[test]
    fn explicit_k_wins_over_numeric_feature_id() {
        let request = LogRequest::new("Click").feature_id(42).field("K", "v1");
        let event = Event::build(&request, 0);
        assert_eq!(event.get("K"), Some(&JsonValue::from("v1")));
    }

    #[test]
    fn empty_keys_are_skipped() {
        let event = Event::build(&LogRequest::new("Click").field("", "lost"), 0);
        assert_eq!(
            event.to_json().unwrap(),
            r#"{"T":"CI.Click","TS":0,"Name":"","FID":""}"#
        );
    }

    #[test]
    fn non_finite_floats_encode_as_null() {
        let event = Event::build(&LogRequest::new("Perf").field("ms", f64::NAN), 0);
        assert_eq!(event.get("ms"), Some(&JsonValue::Null));
    }

    #[test]
    fn encode_is_url_encoded_json() {
        let event = Event::build(&LogRequest::new("Click").field("K", "a b"), 5);
        let encoded = event.encode().unwrap();

        assert!(!encoded.contains('{'));
        assert!(!encoded.contains(' '));
        let decoded = urlencoding::decode(&encoded).unwrap();
        assert_eq!(decoded, event.to_json().unwrap());
    }
}
