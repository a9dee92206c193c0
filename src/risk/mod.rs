pub mod analysis;
pub mod mapping;

pub use analysis::{enrich_table, load_matches, load_records, run_risk_analysis, InputFormat, RiskReport};
pub use mapping::{lookup, Enrichment, RiskEntry, RiskLevel, RISK_TABLE};
