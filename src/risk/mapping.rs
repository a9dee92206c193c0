// Static port -> protocol / risk / CVE reference table

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::shodan::types::parse_port;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Unknown,
    Medium,
    High,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Unknown => write!(f, "Unknown"),
            RiskLevel::Medium => write!(f, "Medium"),
            RiskLevel::High => write!(f, "High"),
            RiskLevel::Critical => write!(f, "Critical"),
        }
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" | "" => Ok(RiskLevel::Unknown),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(format!("unknown risk level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RiskEntry {
    pub protocol: &'static str,
    pub risk: RiskLevel,
    pub issues: &'static [&'static str],
    pub cves: &'static [&'static str],
}

lazy_static::lazy_static! {
    pub static ref RISK_TABLE: BTreeMap<u16, RiskEntry> = {
        let mut table = BTreeMap::new();
        table.insert(21, RiskEntry {
            protocol: "FTP",
            risk: RiskLevel::Medium,
            issues: &["Anonymous login", "Brute force"],
            cves: &["CVE-2015-3306"],
        });
        table.insert(22, RiskEntry {
            protocol: "SSH",
            risk: RiskLevel::Medium,
            issues: &["Weak credentials", "User enumeration"],
            cves: &["CVE-2018-15473"],
        });
        table.insert(23, RiskEntry {
            protocol: "Telnet",
            risk: RiskLevel::High,
            issues: &["Cleartext passwords", "Mirai Botnet"],
            cves: &["CVE-2016-10401"],
        });
        table.insert(445, RiskEntry {
            protocol: "SMB",
            risk: RiskLevel::Critical,
            issues: &["EternalBlue", "WannaCry"],
            cves: &["CVE-2017-0144"],
        });
        table.insert(3389, RiskEntry {
            protocol: "RDP",
            risk: RiskLevel::Critical,
            issues: &["Brute force", "BlueKeep"],
            cves: &["CVE-2019-0708"],
        });
        table
    };
}

pub fn lookup(port: u16) -> Option<&'static RiskEntry> {
    RISK_TABLE.get(&port)
}

/// The three derived columns added to every record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub protocol: &'static str,
    pub risk: RiskLevel,
    pub cves: String,
}

impl Enrichment {
    pub const COLUMNS: [&'static str; 3] = ["protocol", "risk", "cves"];

    pub fn unknown() -> Self {
        Self {
            protocol: "Unknown",
            risk: RiskLevel::Unknown,
            cves: String::new(),
        }
    }

    pub fn for_port(port: Option<u16>) -> Self {
        match port.and_then(lookup) {
            Some(entry) => Self {
                protocol: entry.protocol,
                risk: entry.risk,
                cves: entry.cves.join(","),
            },
            None => Self::unknown(),
        }
    }

    /// Enrichment for a raw port cell; unparsable cells get the defaults.
    pub fn for_cell(raw: &str) -> Self {
        Self::for_port(parse_port(raw))
    }

    pub fn is_known(&self) -> bool {
        self.risk != RiskLevel::Unknown
    }

    pub fn cells(&self) -> [String; 3] {
        [self.protocol.to_string(), self.risk.to_string(), self.cves.clone()]
    }
}
