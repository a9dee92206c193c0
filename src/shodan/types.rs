use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Body of `/shodan/host/search` and `/shodan/host/count`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub matches: Vec<Match>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub facets: BTreeMap<String, Vec<FacetBucket>>,
}

/// One host/service banner. Fields the tool does not read are kept in
/// `extra` so raw dumps survive a load/save cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Match {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_str: Option<String>,
    #[serde(default, deserialize_with = "lenient_port", skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asn: Option<Asn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub hostnames: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vulns::is_empty")]
    pub vulns: Vulns,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Match {
    pub fn country_code(&self) -> Option<&str> {
        self.location.as_ref()?.country_code.as_deref()
    }
}

/// Banner timestamps come as `2025-09-14T08:12:44.123456`, sometimes
/// without the fractional part.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// Parse a port cell. Accepts `443`, ` 443 ` and `443.0`; anything else,
/// including out-of-range numbers, yields `None`.
pub fn parse_port(raw: &str) -> Option<u16> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(port) = raw.parse::<u16>() {
        return Some(port);
    }
    let value: f64 = raw.parse().ok()?;
    port_from_f64(value)
}

fn port_from_f64(value: f64) -> Option<u16> {
    if value.is_finite() && value.fract() == 0.0 && (0.0..=65535.0).contains(&value) {
        Some(value as u16)
    } else {
        None
    }
}

/// Banners sometimes carry `null` where a list is expected.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .or_else(|| n.as_f64().and_then(port_from_f64)),
        Some(Value::String(s)) => parse_port(&s),
        _ => None,
    })
}

/// Autonomous system number. The API reports `"AS8551"`; bare integers are
/// accepted as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Asn(pub u32);

impl fmt::Display for Asn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AS{}", self.0)
    }
}

impl std::str::FromStr for Asn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("AS")
            .or_else(|| trimmed.strip_prefix("as"))
            .unwrap_or(trimmed);
        digits
            .parse::<u32>()
            .map(Asn)
            .map_err(|_| format!("invalid ASN: {}", s))
    }
}

impl Serialize for Asn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Asn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AsnVisitor;

        impl<'de> Visitor<'de> for AsnVisitor {
            type Value = Asn;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an ASN as \"AS<n>\" or an integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Asn, E> {
                u32::try_from(v).map(Asn).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Asn, E> {
                u32::try_from(v).map(Asn).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Asn, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AsnVisitor)
    }
}

/// Vulnerability identifiers. The API sends a mapping keyed by CVE id with
/// CVSS details as values; older dumps carry a plain list. The raw shape is
/// kept as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Vulns(Value);

impl Vulns {
    pub fn is_empty(&self) -> bool {
        self.ids().is_empty()
    }

    /// Sorted identifiers, whichever shape the banner used.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = match &self.0 {
            Value::Object(map) => map.keys().cloned().collect(),
            Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        ids.sort();
        ids.dedup();
        ids
    }
}

/// One `{"count": n, "value": v}` entry of a facet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacetBucket {
    pub count: u64,
    pub value: Value,
}

impl FacetBucket {
    /// The value as it should appear in a CSV cell or on a chart axis.
    pub fn label(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Flattened match, one CSV row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchRow {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub transport: Option<String>,
    pub country: Option<String>,
    pub org: Option<String>,
    pub asn: Option<String>,
    pub product: Option<String>,
    pub timestamp: Option<String>,
}

impl MatchRow {
    pub const HEADERS: [&'static str; 8] = [
        "ip", "port", "transport", "country", "org", "asn", "product", "timestamp",
    ];

    /// Cells in `HEADERS` order, blanks for absent values.
    pub fn cells(&self) -> Vec<String> {
        vec![
            self.ip.clone().unwrap_or_default(),
            self.port.map(|p| p.to_string()).unwrap_or_default(),
            self.transport.clone().unwrap_or_default(),
            self.country.clone().unwrap_or_default(),
            self.org.clone().unwrap_or_default(),
            self.asn.clone().unwrap_or_default(),
            self.product.clone().unwrap_or_default(),
            self.timestamp.clone().unwrap_or_default(),
        ]
    }
}

impl From<&Match> for MatchRow {
    fn from(m: &Match) -> Self {
        MatchRow {
            ip: m.ip_str.clone(),
            port: m.port,
            transport: m.transport.clone(),
            country: m.country_code().map(str::to_string),
            org: m.org.clone(),
            asn: m.asn.map(|a| a.to_string()),
            product: m.product.clone(),
            timestamp: m.timestamp.clone(),
        }
    }
}
