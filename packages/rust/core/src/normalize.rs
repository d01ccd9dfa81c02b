//! Call-port responses → normalized rotation records.
//!
//! Upstream delivers each port's arrival and departure as a pair of "day"
//! and "time" fields whose roles are sometimes swapped, and sometimes only
//! one side of the call is filled in. This module classifies each raw field
//! ([`FieldValue`]), resolves the day/time pair for both events, and projects
//! every port into a POL record (arrival) and/or a POD record (departure).

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use portcall_crawler::FetchedResponse;
use portcall_shared::{
    CallPortKey, CarrierConfig, Direction, LocationType, NormalizedRecord, PortcallError, Result,
    TimeValue, UrlTemplate, related_id, rotation_order,
};

use crate::wire::{CallPortEntry, Envelope, PortCall};

/// Day token used upstream (and by us) when a day is unknown.
pub const NONE_DAY: &str = "NONE";

/// Direction code assumed when the field is missing.
const UNKNOWN_DIRECTION_CODE: char = 'U';

// ---------------------------------------------------------------------------
// Field classification
// ---------------------------------------------------------------------------

/// What a raw day/time field actually holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Alphabetic, uppercased (`MON`, `TEU`, `NONE`).
    DayToken(String),
    /// A non-negative integer or an all-digit string.
    Time(TimeValue),
    /// Anything else that is present.
    Other(String),
    Absent,
}

/// Classify one raw field.
pub fn classify(value: Option<&Value>) -> FieldValue {
    match value {
        None | Some(Value::Null) => FieldValue::Absent,
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) if i >= 0 => FieldValue::Time(TimeValue::Int(i)),
            _ => FieldValue::Other(n.to_string()),
        },
        Some(Value::String(s)) => {
            let s = s.trim();
            if s.is_empty() {
                FieldValue::Other(String::new())
            } else if s.chars().all(char::is_alphabetic) {
                FieldValue::DayToken(s.to_uppercase())
            } else if s.chars().all(|c| c.is_ascii_digit()) {
                FieldValue::Time(TimeValue::Text(s.to_string()))
            } else {
                FieldValue::Other(s.to_string())
            }
        }
        Some(other) => FieldValue::Other(other.to_string()),
    }
}

impl FieldValue {
    fn day_text(&self) -> String {
        match self {
            Self::DayToken(t) => t.clone(),
            Self::Time(v) => v.to_string(),
            Self::Other(s) => s.to_uppercase(),
            Self::Absent => NONE_DAY.to_string(),
        }
    }

    fn into_time(self) -> Option<TimeValue> {
        match self {
            Self::DayToken(t) | Self::Other(t) => Some(TimeValue::Text(t)),
            Self::Time(v) => Some(v),
            Self::Absent => None,
        }
    }
}

/// Resolve a nominal (day, time) field pair into an actual day and time.
///
/// A day-token in the day field is taken at face value and a missing day
/// field resolves to [`NONE_DAY`]. Otherwise the two fields are treated as
/// swapped: the day comes from the time field and the time from the day field.
pub fn resolve_pair(day: Option<&Value>, time: Option<&Value>) -> (String, Option<TimeValue>) {
    let day = classify(day);
    let time = classify(time);

    let resolved_day = match &day {
        FieldValue::DayToken(t) => t.clone(),
        FieldValue::Absent => NONE_DAY.to_string(),
        _ => time.day_text(),
    };
    let resolved_time = match time {
        FieldValue::Time(v) => Some(v),
        other => day.into_time().or_else(|| other.into_time()),
    };

    (resolved_day, resolved_time)
}

/// Repair the two garbled day abbreviations seen upstream.
pub fn repair_day(token: &str) -> &str {
    match token {
        "TEU" => "THU",
        "WES" => "WED",
        other => other,
    }
}

/// Port name as text; a missing name reads as `NONE`.
pub fn port_name(raw: Option<&Value>) -> String {
    match raw {
        None | Some(Value::Null) => NONE_DAY.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Uppercase port name with all whitespace removed.
pub fn port_code(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Raw one-letter direction code; `U` when missing.
pub fn direction_code(raw: Option<&Value>) -> char {
    let text = match raw {
        None | Some(Value::Null) => return UNKNOWN_DIRECTION_CODE,
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    };
    text.chars().next().unwrap_or(UNKNOWN_DIRECTION_CODE)
}

// ---------------------------------------------------------------------------
// Port projection
// ---------------------------------------------------------------------------

/// Day and time of both events of one port call, fully resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortTimes {
    pub eta_day: String,
    pub eta_time: Option<TimeValue>,
    pub etd_day: String,
    pub etd_time: Option<TimeValue>,
}

impl PortTimes {
    pub fn resolve(port: &PortCall) -> Self {
        let (eta_day, eta_time) =
            resolve_pair(port.call_port_eta.as_ref(), port.call_port_eta_time.as_ref());
        let (etd_day, etd_time) =
            resolve_pair(port.call_port_etd.as_ref(), port.call_port_etd_time.as_ref());

        let eta_day = repair_day(&eta_day).to_string();
        let etd_day = repair_day(&etd_day).to_string();

        // each side falls back to the other's day when its own is unknown
        let (eta_day, etd_day) = match (eta_day == NONE_DAY, etd_day == NONE_DAY) {
            (true, false) => (etd_day.clone(), etd_day),
            (false, true) => (eta_day.clone(), eta_day),
            _ => (eta_day, etd_day),
        };

        Self {
            eta_day,
            eta_time,
            etd_day,
            etd_time,
        }
    }
}

/// Per-response constants shared by every record.
#[derive(Debug)]
struct ServiceContext {
    carrier_id: String,
    frequency: String,
    service: CallPortKey,
}

/// Per-rotation constants: the service plus its direction.
#[derive(Debug, Clone)]
struct RotationContext {
    service: Arc<ServiceContext>,
    direction: Direction,
    service_id: String,
    related_id: uuid::Uuid,
}

impl RotationContext {
    fn new(service: Arc<ServiceContext>, raw_direction: Option<&Value>) -> Self {
        let code = direction_code(raw_direction);
        let direction = Direction::from_code(code);
        Self {
            service_id: format!("{} [{code}]", service.service),
            related_id: related_id(&service.carrier_id, &service.service.0, direction),
            direction,
            service,
        }
    }

    /// Project one port into its POL and POD records.
    fn project(&self, sequence: usize, port: &PortCall) -> [Option<NormalizedRecord>; 2] {
        let times = PortTimes::resolve(port);
        let code = port_code(&port_name(port.call_port.as_ref()));

        let pol = port.call_port_eta_time.as_ref().map(|raw| {
            let tt = times.eta_time.clone().unwrap_or_else(|| raw_time(raw));
            self.record(&code, sequence, LocationType::Load, times.eta_day.clone(), tt)
        });
        let pod = port.call_port_etd_time.as_ref().map(|raw| {
            let tt = times.etd_time.clone().unwrap_or_else(|| raw_time(raw));
            self.record(&code, sequence, LocationType::Discharge, times.etd_day.clone(), tt)
        });

        if pol.is_none() && pod.is_none() {
            debug!(service = %self.service.service, port = %code, sequence, "port has no times, skipped");
        }
        [pol, pod]
    }

    fn record(
        &self,
        port_code: &str,
        sequence: usize,
        location_type: LocationType,
        start_day: String,
        tt: TimeValue,
    ) -> NormalizedRecord {
        let service = &self.service;
        NormalizedRecord {
            change_mode: None,
            alliance_id: None,
            alliance_pool_id: None,
            trade_id: None,
            service_provider_service_id: format!("{}{}", service.service, service.carrier_id),
            carrier_id: service.carrier_id.clone(),
            service_id: self.service_id.clone(),
            service: service.service.0.clone(),
            direction: self.direction,
            frequency: service.frequency.clone(),
            start_day,
            port_code: port_code.to_string(),
            order: rotation_order(sequence, location_type),
            tt,
            location_type,
            related_id: self.related_id,
        }
    }
}

fn raw_time(raw: &Value) -> TimeValue {
    match raw {
        Value::String(s) => TimeValue::Text(s.trim().to_string()),
        other => TimeValue::Text(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// RecordNormalizer
// ---------------------------------------------------------------------------

/// Turns call-port responses into [`NormalizedRecord`]s for one carrier.
#[derive(Debug, Clone)]
pub struct RecordNormalizer {
    carrier_id: String,
    frequency: String,
    call_port: UrlTemplate,
}

impl RecordNormalizer {
    pub fn new(carrier: &CarrierConfig, call_port: UrlTemplate) -> Self {
        Self {
            carrier_id: carrier.carrier_id.clone(),
            frequency: carrier.frequency.clone(),
            call_port,
        }
    }

    /// Service code embedded in a call-port URL.
    pub fn service_code(&self, url: &str) -> Result<CallPortKey> {
        self.call_port
            .extract(url)
            .map(|code| CallPortKey(code.to_string()))
            .ok_or_else(|| {
                PortcallError::parse(format!(
                    "{url}: does not match call-port template {}",
                    self.call_port
                ))
            })
    }

    /// Parse one response and lazily yield its records.
    ///
    /// The body is parsed eagerly, so a malformed response fails here rather
    /// than midway through iteration.
    pub fn normalize(
        &self,
        response: &FetchedResponse,
    ) -> Result<impl Iterator<Item = NormalizedRecord> + use<>> {
        let service = Arc::new(ServiceContext {
            carrier_id: self.carrier_id.clone(),
            frequency: self.frequency.clone(),
            service: self.service_code(response.url())?,
        });
        let body: Envelope<CallPortEntry> = response.json()?;

        Ok(body.data.content.into_iter().flat_map(move |entry| {
            let rotation = RotationContext::new(service.clone(), entry.direction.as_ref());
            entry
                .ports
                .into_iter()
                .enumerate()
                .flat_map(move |(sequence, port)| rotation.project(sequence, &port))
                .flatten()
        }))
    }
}
