//! Indicator validity tables
//!
//! TTLs are looked up by a `<marking-label>-<delivery-flag>` key in a table
//! chosen by the indicator's main observable type. The configuration is
//! immutable once built and is loaded from TOML when overridden.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Name of the table used when no observable-type table applies
pub const DEFAULT_TABLE: &str = "default";

/// Marking label used when an indicator carries no marking definition
pub const DEFAULT_MARKING_LABEL: &str = "TLP:WHITE";

/// Errors from validity configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no TTL configured for key '{key}' in table '{table}'")]
    UnknownTtlKey { key: String, table: String },

    #[error("validity config has no 'default' table")]
    MissingDefaultTable,

    #[error("TTL for '{key}' in table '{table}' must be at least one day")]
    InvalidTtl { key: String, table: String },

    #[error("Failed to parse validity config: {0}")]
    Parse(String),

    #[error("Failed to read validity config: {0}")]
    Io(#[from] std::io::Error),
}

/// TTLs in days keyed by `<label>-<flag>`
pub type TtlTable = BTreeMap<String, u32>;

/// Lookup key combining marking label and delivery flag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TtlKey {
    pub marking_label: String,
    pub delivery: bool,
}

impl TtlKey {
    pub fn new(marking_label: &str, delivery: bool) -> Self {
        Self {
            marking_label: marking_label.to_string(),
            delivery,
        }
    }

    pub fn delivery_flag(&self) -> &'static str {
        if self.delivery {
            "yes"
        } else {
            "no"
        }
    }
}

impl std::fmt::Display for TtlKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.marking_label, self.delivery_flag())
    }
}

/// The TTL picked for a key and the table it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlSelection {
    pub table: String,
    pub days: u32,
}

/// Validity configuration injected into the calculator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityConfig {
    /// Label assumed when no marking definition is given
    #[serde(default = "default_marking")]
    pub default_marking: String,
    /// Kill-chain phase names that count as delivery
    #[serde(default = "default_delivery_phases")]
    pub delivery_phases: Vec<String>,
    /// Tables keyed by observable type, plus the `default` table
    pub ttl: BTreeMap<String, TtlTable>,
}

fn default_marking() -> String {
    DEFAULT_MARKING_LABEL.to_string()
}

fn default_delivery_phases() -> Vec<String> {
    vec!["initial-access".to_string(), "execution".to_string()]
}

const TLP_LABELS: [&str; 4] = ["TLP:WHITE", "TLP:GREEN", "TLP:AMBER", "TLP:RED"];

impl Default for ValidityConfig {
    fn default() -> Self {
        let mut default_table = TtlTable::new();
        for (label, no, yes) in [
            ("TLP:WHITE", 30, 7),
            ("TLP:GREEN", 30, 7),
            ("TLP:AMBER", 60, 15),
            ("TLP:RED", 120, 120),
        ] {
            default_table.insert(TtlKey::new(label, false).to_string(), no);
            default_table.insert(TtlKey::new(label, true).to_string(), yes);
        }

        let mut file_table = TtlTable::new();
        for label in TLP_LABELS {
            file_table.insert(TtlKey::new(label, false).to_string(), 365);
            file_table.insert(TtlKey::new(label, true).to_string(), 365);
        }

        let mut ttl = BTreeMap::new();
        ttl.insert(DEFAULT_TABLE.to_string(), default_table);
        ttl.insert("file".to_string(), file_table);

        Self {
            default_marking: default_marking(),
            delivery_phases: default_delivery_phases(),
            ttl,
        }
    }
}

impl ValidityConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ValidityConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ttl.contains_key(DEFAULT_TABLE) {
            return Err(ConfigError::MissingDefaultTable);
        }
        for (table, entries) in &self.ttl {
            if let Some((key, _)) = entries.iter().find(|(_, days)| **days == 0) {
                return Err(ConfigError::InvalidTtl {
                    key: key.clone(),
                    table: table.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn is_delivery_phase(&self, phase_name: &str) -> bool {
        self.delivery_phases.iter().any(|p| p == phase_name)
    }

    /// Name of the table that applies to an observable type
    pub fn table_for<'a>(&'a self, observable_type: Option<&'a str>) -> &'a str {
        match observable_type {
            Some(t) if t != DEFAULT_TABLE && self.ttl.contains_key(t) => t,
            _ => DEFAULT_TABLE,
        }
    }

    /// TTL for a key; unknown keys are an error, never a silent default
    pub fn ttl_days(
        &self,
        key: &TtlKey,
        observable_type: Option<&str>,
    ) -> Result<TtlSelection, ConfigError> {
        let table = self.table_for(observable_type);
        let key_str = key.to_string();
        self.ttl
            .get(table)
            .and_then(|entries| entries.get(&key_str))
            .map(|days| TtlSelection {
                table: table.to_string(),
                days: *days,
            })
            .ok_or_else(|| ConfigError::UnknownTtlKey {
                key: key_str,
                table: table.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHIPPED: &str = include_str!("../config/validity.toml");

    #[test]
    fn test_default_table_values() {
        let config = ValidityConfig::default();
        let expect = [
            ("TLP:WHITE", false, 30),
            ("TLP:WHITE", true, 7),
            ("TLP:GREEN", false, 30),
            ("TLP:GREEN", true, 7),
            ("TLP:AMBER", false, 60),
            ("TLP:AMBER", true, 15),
            ("TLP:RED", false, 120),
            ("TLP:RED", true, 120),
        ];
        for (label, delivery, days) in expect {
            let sel = config.ttl_days(&TtlKey::new(label, delivery), None).unwrap();
            assert_eq!(sel.days, days, "{label} delivery={delivery}");
            assert_eq!(sel.table, DEFAULT_TABLE);
        }
    }

    #[test]
    fn test_file_table_does_not_leak() {
        let config = ValidityConfig::default();
        for label in TLP_LABELS {
            for delivery in [false, true] {
                let key = TtlKey::new(label, delivery);
                let file = config.ttl_days(&key, Some("file")).unwrap();
                assert_eq!(file.days, 365);
                assert_eq!(file.table, "file");

                let other = config.ttl_days(&key, Some("ipv4-addr")).unwrap();
                assert_eq!(other.table, DEFAULT_TABLE);
                assert_ne!(other.days, 365);
            }
        }
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        let config = ValidityConfig::default();
        let err = config
            .ttl_days(&TtlKey::new("PAP:RED", false), None)
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTtlKey { ref key, .. } if key == "PAP:RED-no"));
    }

    #[test]
    fn test_key_format() {
        assert_eq!(TtlKey::new("TLP:AMBER", true).to_string(), "TLP:AMBER-yes");
        assert_eq!(TtlKey::new("TLP:WHITE", false).to_string(), "TLP:WHITE-no");
    }

    #[test]
    fn test_shipped_config_matches_default() {
        let shipped = ValidityConfig::from_toml_str(SHIPPED).unwrap();
        assert_eq!(shipped, ValidityConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let missing = "[ttl.file]\n\"TLP:WHITE-no\" = 365\n";
        assert!(matches!(
            ValidityConfig::from_toml_str(missing),
            Err(ConfigError::MissingDefaultTable)
        ));

        let zero = "[ttl.default]\n\"TLP:WHITE-no\" = 0\n";
        assert!(matches!(
            ValidityConfig::from_toml_str(zero),
            Err(ConfigError::InvalidTtl { .. })
        ));

        assert!(matches!(
            ValidityConfig::from_toml_str("ttl = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
