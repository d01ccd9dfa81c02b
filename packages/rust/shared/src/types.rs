//! Core domain types for port rotations.

use serde::{Serialize, Serializer};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Hierarchy keys
// ---------------------------------------------------------------------------

macro_rules! string_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_key!(
    /// Service-group id (`serLpGroupUuid` upstream).
    ServiceGroupKey
);
string_key!(
    /// Route-service code (`serLpCode` upstream).
    RouteServiceKey
);
string_key!(
    /// Service code parsed back out of a call-port URL.
    CallPortKey
);

// ---------------------------------------------------------------------------
// Direction
// ---------------------------------------------------------------------------

/// Sailing direction of one rotation leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Northbound,
    Southbound,
    Eastbound,
    Westbound,
    Unknown,
}

impl Direction {
    /// Look up a direction by its one-letter code, case-insensitively.
    pub fn from_code(code: char) -> Self {
        match code.to_ascii_uppercase() {
            'N' => Self::Northbound,
            'S' => Self::Southbound,
            'E' => Self::Eastbound,
            'W' => Self::Westbound,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Northbound => "NORTHBOUND",
            Self::Southbound => "SOUTHBOUND",
            Self::Eastbound => "EASTBOUND",
            Self::Westbound => "WESTBOUND",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// LocationType
// ---------------------------------------------------------------------------

/// Which event of a port call a record projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum LocationType {
    /// Arrival, port of loading.
    #[serde(rename = "L")]
    Load,
    /// Departure, port of discharge.
    #[serde(rename = "D")]
    Discharge,
}

impl LocationType {
    /// Tie-break rank within one port-sequence entry.
    fn rank(self) -> u32 {
        match self {
            Self::Load => 0,
            Self::Discharge => 1,
        }
    }
}

/// Rotation order of an event: two slots per port so load sorts before discharge.
pub fn rotation_order(sequence: usize, location: LocationType) -> u32 {
    let sequence = u32::try_from(sequence).unwrap_or(u32::MAX / 2);
    sequence.saturating_mul(2).saturating_add(location.rank())
}

// ---------------------------------------------------------------------------
// TimeValue
// ---------------------------------------------------------------------------

/// A schedule time as delivered upstream: a number or free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeValue {
    Int(i64),
    Text(String),
}

impl std::fmt::Display for TimeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl Serialize for TimeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Int(n) => serializer.serialize_i64(*n),
            Self::Text(s) => serializer.serialize_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// NormalizedRecord
// ---------------------------------------------------------------------------

/// CSV header, in field order of [`NormalizedRecord`].
pub const RECORD_HEADER: [&str; 16] = [
    "changeMode",
    "allianceID",
    "alliancePoolID",
    "tradeID",
    "serviceProviderServiceID",
    "carrierID",
    "serviceID",
    "service",
    "direction",
    "frequency",
    "startDay",
    "portCode",
    "order",
    "tt",
    "locationType",
    "relatedID",
];

/// One port-call event of a rotation, as written to the output file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    #[serde(rename = "changeMode")]
    pub change_mode: Option<String>,
    #[serde(rename = "allianceID")]
    pub alliance_id: Option<String>,
    #[serde(rename = "alliancePoolID")]
    pub alliance_pool_id: Option<String>,
    #[serde(rename = "tradeID")]
    pub trade_id: Option<String>,
    /// Service code followed by the carrier code.
    #[serde(rename = "serviceProviderServiceID")]
    pub service_provider_service_id: String,
    #[serde(rename = "carrierID")]
    pub carrier_id: String,
    /// Service code plus the bracketed raw direction code.
    #[serde(rename = "serviceID")]
    pub service_id: String,
    pub service: String,
    pub direction: Direction,
    pub frequency: String,
    #[serde(rename = "startDay")]
    pub start_day: String,
    #[serde(rename = "portCode")]
    pub port_code: String,
    pub order: u32,
    pub tt: TimeValue,
    #[serde(rename = "locationType")]
    pub location_type: LocationType,
    /// Correlates the POL/POD rows of one service direction.
    #[serde(rename = "relatedID", serialize_with = "serialize_related_id")]
    pub related_id: Uuid,
}

/// Written as the UUID's 128-bit integer value in decimal.
fn serialize_related_id<S: Serializer>(id: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&id.as_u128())
}

/// Deterministic rotation id for (carrier, service, direction).
pub fn related_id(carrier: &str, service: &str, direction: Direction) -> Uuid {
    let name = format!("{carrier}-{service}-{direction}");
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NormalizedRecord {
        NormalizedRecord {
            change_mode: None,
            alliance_id: None,
            alliance_pool_id: None,
            trade_id: None,
            service_provider_service_id: "AEU1COSU".into(),
            carrier_id: "COSU".into(),
            service_id: "AEU1 [S]".into(),
            service: "AEU1".into(),
            direction: Direction::Southbound,
            frequency: "WEEKLY".into(),
            start_day: "MON".into(),
            port_code: "HAMBURG".into(),
            order: 0,
            tt: TimeValue::Int(1200),
            location_type: LocationType::Load,
            related_id: related_id("COSU", "AEU1", Direction::Southbound),
        }
    }

    #[test]
    fn direction_lookup_is_total() {
        assert_eq!(Direction::from_code('n'), Direction::Northbound);
        assert_eq!(Direction::from_code('S'), Direction::Southbound);
        assert_eq!(Direction::from_code('e'), Direction::Eastbound);
        assert_eq!(Direction::from_code('W'), Direction::Westbound);
        for code in ['U', 'x', '1', ' ', 'é'] {
            assert_eq!(Direction::from_code(code), Direction::Unknown);
        }
    }

    #[test]
    fn related_id_is_deterministic() {
        let a = related_id("COSU", "AEU1", Direction::Westbound);
        let b = related_id("COSU", "AEU1", Direction::Westbound);
        assert_eq!(a, b);
        assert_ne!(a, related_id("COSU", "AEU1", Direction::Eastbound));
        assert_ne!(a, related_id("COSU", "AEU2", Direction::Westbound));
    }

    #[test]
    fn rotation_order_is_monotonic() {
        let mut last = None;
        for seq in 0..5 {
            for loc in [LocationType::Load, LocationType::Discharge] {
                let order = rotation_order(seq, loc);
                if let Some(prev) = last {
                    assert!(order > prev);
                }
                last = Some(order);
            }
        }
        assert_eq!(rotation_order(0, LocationType::Load), 0);
        assert_eq!(rotation_order(3, LocationType::Discharge), 7);
    }

    #[test]
    fn header_matches_serialized_field_names() {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        wtr.serialize(sample()).expect("serialize");
        let bytes = wtr.into_inner().expect("flush");
        let text = String::from_utf8(bytes).expect("utf8");
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(RECORD_HEADER.join(",").as_str()));

        let row = lines.next().expect("row");
        assert!(row.starts_with(",,,,AEU1COSU,COSU,AEU1 [S],AEU1,SOUTHBOUND,WEEKLY,MON,HAMBURG,0,1200,L,"));
    }

    #[test]
    fn related_id_is_written_as_integer() {
        let record = sample();
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        wtr.serialize(&record).expect("serialize");
        let text = String::from_utf8(wtr.into_inner().expect("flush")).expect("utf8");

        let last = text.trim_end().rsplit(',').next().expect("relatedID field");
        assert!(last.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(last.parse::<u128>().expect("u128"), record.related_id.as_u128());
    }
}
