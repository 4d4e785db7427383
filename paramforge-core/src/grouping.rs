//! Master/dependent parameter relationships.
//!
//! A master is a switch ("Chorus On") whose state decides whether its
//! dependents ("Chorus Rate", "Chorus Depth") have any effect. Explicit
//! per-device-type tables are consulted first; generic name heuristics cover
//! everything else.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Master value above which a dependent with no explicit values is active.
pub const DEFAULT_ACTIVE_THRESHOLD: f64 = 0.5;

const MASTER_VALUE_TOLERANCE: f64 = 1e-3;

const MASTER_SUFFIXES: [&str; 2] = [" on", " enable"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupingRuleSet {
    pub masters: Vec<String>,
    /// dependent name -> master name
    pub dependents: BTreeMap<String, String>,
    /// dependent name -> master normalized values at which it is active
    #[serde(default)]
    pub dependent_master_values: BTreeMap<String, Vec<f64>>,
}

impl GroupingRuleSet {
    pub fn is_empty(&self) -> bool {
        self.masters.is_empty() && self.dependents.is_empty()
    }

    pub fn master_of(&self, dependent: &str) -> Option<&str> {
        self.dependents.get(dependent).map(String::as_str)
    }

    pub fn dependents_of<'a>(&'a self, master: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.dependents
            .iter()
            .filter(move |(_, m)| m.as_str() == master)
            .map(|(d, _)| d.as_str())
    }

    /// Whether `dependent` is active when its master sits at `master_value`.
    ///
    /// Parameters that are not dependents are always active.
    pub fn is_dependent_active(&self, dependent: &str, master_value: f64, threshold: f64) -> bool {
        if !self.dependents.contains_key(dependent) {
            return true;
        }
        match self.dependent_master_values.get(dependent) {
            Some(values) if !values.is_empty() => values
                .iter()
                .any(|v| (v - master_value).abs() <= MASTER_VALUE_TOLERANCE),
            _ => master_value > threshold,
        }
    }

    /// Dependents gated off by the current master values.
    ///
    /// Masters missing from `values` are treated as unknown and their
    /// dependents are left out of the result.
    pub fn inactive_dependents(
        &self,
        values: &HashMap<String, f64>,
        threshold: f64,
    ) -> Vec<String> {
        self.dependents
            .iter()
            .filter_map(|(dependent, master)| {
                let value = values.get(master)?;
                (!self.is_dependent_active(dependent, *value, threshold)).then(|| dependent.clone())
            })
            .collect()
    }
}

struct ExplicitRule {
    master: &'static str,
    dependents: &'static [&'static str],
    active_values: Option<&'static [f64]>,
}

struct DeviceRuleTable {
    device_type: &'static str,
    rules: &'static [ExplicitRule],
}

static RULE_TABLES: &[DeviceRuleTable] = &[
    DeviceRuleTable {
        device_type: "chorus",
        rules: &[ExplicitRule {
            master: "Chorus On",
            dependents: &["Chorus Rate", "Chorus Depth", "Chorus Mix", "Chorus Delay"],
            active_values: Some(&[1.0]),
        }],
    },
    DeviceRuleTable {
        device_type: "reverb",
        rules: &[
            ExplicitRule {
                master: "Freeze",
                dependents: &["Freeze Mix"],
                active_values: Some(&[1.0]),
            },
            ExplicitRule {
                master: "Early Reflections",
                dependents: &["ER Level", "ER Size", "ER Delay"],
                active_values: None,
            },
            ExplicitRule {
                master: "Lowpass On",
                dependents: &["Lowpass", "Lowpass Freq"],
                active_values: Some(&[1.0]),
            },
        ],
    },
    DeviceRuleTable {
        device_type: "delay",
        rules: &[
            ExplicitRule {
                master: "Sync",
                dependents: &["Note Length", "Note Value"],
                active_values: Some(&[1.0]),
            },
            ExplicitRule {
                master: "Sync",
                dependents: &["Delay Time", "Time"],
                active_values: Some(&[0.0]),
            },
        ],
    },
    DeviceRuleTable {
        device_type: "compressor",
        rules: &[
            ExplicitRule {
                master: "Auto Release",
                dependents: &["Release"],
                active_values: Some(&[0.0]),
            },
            ExplicitRule {
                master: "Sidechain Filter",
                dependents: &["Sidechain Freq", "Sidechain HPF"],
                active_values: None,
            },
        ],
    },
];

fn find_name<'a, S: AsRef<str>>(names: &'a [S], wanted: &str) -> Option<&'a str> {
    names
        .iter()
        .map(|n| n.as_ref())
        .find(|n| n.eq_ignore_ascii_case(wanted))
}

fn push_master(rules: &mut GroupingRuleSet, master: &str) {
    if !rules.masters.iter().any(|m| m == master) {
        rules.masters.push(master.to_string());
    }
}

fn apply_table<S: AsRef<str>>(table: &DeviceRuleTable, names: &[S]) -> GroupingRuleSet {
    let mut out = GroupingRuleSet::default();
    for rule in table.rules {
        let Some(master) = find_name(names, rule.master) else { continue };
        for dependent in rule.dependents {
            let Some(dependent) = find_name(names, dependent) else { continue };
            push_master(&mut out, master);
            out.dependents.insert(dependent.to_string(), master.to_string());
            if let Some(values) = rule.active_values {
                out.dependent_master_values
                    .insert(dependent.to_string(), values.to_vec());
            }
        }
    }
    out
}

/// Strip " On"/" Enable" from a master candidate's name, returning the prefix.
fn master_prefix(name: &str) -> Option<&str> {
    let lower = name.to_lowercase();
    MASTER_SUFFIXES.iter().find_map(|suffix| {
        if lower.ends_with(suffix) && lower.len() > suffix.len() {
            name.get(..name.len() - suffix.len()).map(str::trim_end)
        } else {
            None
        }
    })
}

fn heuristic_rules<S: AsRef<str>>(names: &[S]) -> GroupingRuleSet {
    let mut out = GroupingRuleSet::default();

    let masters: Vec<(&str, String)> = names
        .iter()
        .map(|n| n.as_ref())
        .filter_map(|n| master_prefix(n).map(|p| (n, p.to_lowercase())))
        .filter(|(_, prefix)| !prefix.is_empty())
        .collect();

    for (master, _) in &masters {
        push_master(&mut out, master);
    }

    for name in names.iter().map(|n| n.as_ref()) {
        if masters.iter().any(|(m, _)| *m == name) {
            continue;
        }
        let lower = name.to_lowercase();
        // Longest matching prefix wins ("Delay Mod On" over "Delay On").
        let owner = masters
            .iter()
            .filter(|(_, prefix)| {
                lower.len() > prefix.len()
                    && lower.starts_with(prefix.as_str())
                    && lower[prefix.len()..].starts_with(' ')
            })
            .max_by_key(|(_, prefix)| prefix.len());
        if let Some((master, _)) = owner {
            out.dependents.insert(name.to_string(), master.to_string());
        }
    }

    out
}

/// Build the grouping rules for a device.
///
/// An explicit table is selected by case-insensitive substring match of its
/// key against `device_type`; it is used when at least one of its pairs exists
/// on the device. Otherwise the name heuristics apply.
pub fn classify_relationships<S: AsRef<str>>(device_type: &str, names: &[S]) -> GroupingRuleSet {
    let device_type = device_type.to_lowercase();
    for table in RULE_TABLES {
        if !device_type.contains(table.device_type) {
            continue;
        }
        let rules = apply_table(table, names);
        if !rules.is_empty() {
            return rules;
        }
    }
    heuristic_rules(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chorus_gating_scenario() {
        let names = ["Chorus On", "Chorus Rate", "Mix"];
        for device_type in ["chorus", "unknown"] {
            let rules = classify_relationships(device_type, &names);
            assert_eq!(rules.masters, vec!["Chorus On"]);
            assert_eq!(rules.master_of("Chorus Rate"), Some("Chorus On"));
            assert!(!rules.is_dependent_active("Chorus Rate", 0.0, DEFAULT_ACTIVE_THRESHOLD));
            assert!(rules.is_dependent_active("Chorus Rate", 1.0, DEFAULT_ACTIVE_THRESHOLD));
            assert!(rules.is_dependent_active("Mix", 0.0, DEFAULT_ACTIVE_THRESHOLD));
        }
    }

    #[test]
    fn test_explicit_values_override_threshold() {
        let names = ["Auto Release", "Release", "Attack"];
        let rules = classify_relationships("Compressor", &names);
        assert_eq!(rules.dependent_master_values.get("Release"), Some(&vec![0.0]));
        assert!(rules.is_dependent_active("Release", 0.0, DEFAULT_ACTIVE_THRESHOLD));
        assert!(!rules.is_dependent_active("Release", 1.0, DEFAULT_ACTIVE_THRESHOLD));
    }

    #[test]
    fn test_table_without_matching_names_falls_back_to_heuristics() {
        let names = ["Shimmer Enable", "Shimmer Pitch", "Decay"];
        let rules = classify_relationships("reverb", &names);
        assert_eq!(rules.masters, vec!["Shimmer Enable"]);
        assert_eq!(rules.master_of("Shimmer Pitch"), Some("Shimmer Enable"));
        assert_eq!(rules.master_of("Decay"), None);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let names = ["Delay On", "Delay Mod On", "Delay Mod Rate", "Delay Time"];
        let rules = classify_relationships("unknown", &names);
        assert_eq!(rules.master_of("Delay Mod Rate"), Some("Delay Mod On"));
        assert_eq!(rules.master_of("Delay Time"), Some("Delay On"));
        assert_eq!(rules.dependents_of("Delay On").collect::<Vec<_>>(), vec!["Delay Time"]);
    }

    #[test]
    fn test_prefix_must_end_at_word_boundary() {
        let names = ["EQ On", "EQuality"];
        let rules = classify_relationships("unknown", &names);
        assert!(rules.dependents.is_empty());
    }

    #[test]
    fn test_configurable_threshold_and_inactive_listing() {
        let names = ["Chorus On", "Chorus Rate", "Flanger Enable", "Flanger Depth"];
        let rules = classify_relationships("unknown", &names);
        let values = HashMap::from([
            ("Chorus On".to_string(), 0.6),
            ("Flanger Enable".to_string(), 0.0),
        ]);
        assert_eq!(rules.inactive_dependents(&values, 0.5), vec!["Flanger Depth"]);
        let mut strict = rules.inactive_dependents(&values, 0.75);
        strict.sort();
        assert_eq!(strict, vec!["Chorus Rate", "Flanger Depth"]);
    }
}
