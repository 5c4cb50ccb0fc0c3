// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relabel Rules
//!
//! Ordered Prometheus-style relabel rules over a label set. Regexes are
//! fully anchored; rule application is deterministic, so running the same
//! ordered rules on the same labels twice yields identical output.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use regex::Regex;

use crate::core::exception::{LogFluxError, LogFluxResult};

const DEFAULT_SEPARATOR: &str = ";";
const DEFAULT_REGEX: &str = "(.*)";
const DEFAULT_REPLACEMENT: &str = "$1";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelabelAction {
    Replace,
    Keep,
    Drop,
    LabelMap,
    LabelDrop,
    LabelKeep,
    HashMod,
}

impl RelabelAction {
    fn from_str(s: &str) -> LogFluxResult<Self> {
        match s {
            "replace" | "" => Ok(RelabelAction::Replace),
            "keep" => Ok(RelabelAction::Keep),
            "drop" => Ok(RelabelAction::Drop),
            "labelmap" => Ok(RelabelAction::LabelMap),
            "labeldrop" => Ok(RelabelAction::LabelDrop),
            "labelkeep" => Ok(RelabelAction::LabelKeep),
            "hashmod" => Ok(RelabelAction::HashMod),
            other => Err(LogFluxError::plugin_init(
                "relabel",
                format!("unknown relabel action: {other}"),
            )),
        }
    }
}

#[derive(Debug)]
pub struct RelabelRule {
    pub action: RelabelAction,
    pub source_labels: Vec<String>,
    pub separator: String,
    pub regex: Regex,
    pub target_label: String,
    pub replacement: String,
    pub modulus: u64,
}

impl RelabelRule {
    pub fn from_json(config: &serde_json::Value) -> LogFluxResult<Self> {
        let action = RelabelAction::from_str(
            config.get("action").and_then(|v| v.as_str()).unwrap_or(""),
        )?;
        let source_labels = config
            .get("source_labels")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let separator = config
            .get("separator")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_SEPARATOR)
            .to_string();
        let expr = config
            .get("regex")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_REGEX);
        // Relabel regexes match the whole input.
        let regex = Regex::new(&format!("^(?:{expr})$")).map_err(|e| {
            LogFluxError::plugin_init("relabel", format!("invalid regex {expr:?}: {e}"))
        })?;
        let target_label = config
            .get("target_label")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let replacement = config
            .get("replacement")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_REPLACEMENT)
            .to_string();
        let modulus = config.get("modulus").and_then(|v| v.as_u64()).unwrap_or(0);

        match action {
            RelabelAction::Replace | RelabelAction::HashMod if target_label.is_empty() => {
                return Err(LogFluxError::plugin_init(
                    "relabel",
                    "replace/hashmod requires target_label",
                ));
            }
            RelabelAction::HashMod if modulus == 0 => {
                return Err(LogFluxError::plugin_init(
                    "relabel",
                    "hashmod requires a non-zero modulus",
                ));
            }
            _ => {}
        }
        Ok(Self {
            action,
            source_labels,
            separator,
            regex,
            target_label,
            replacement,
            modulus,
        })
    }

    fn source_value(&self, labels: &BTreeMap<String, String>) -> String {
        self.source_labels
            .iter()
            .map(|name| labels.get(name).map(String::as_str).unwrap_or(""))
            .collect::<Vec<_>>()
            .join(&self.separator)
    }

    /// Applies one rule; returns false when the event must be dropped.
    fn apply(&self, labels: &mut BTreeMap<String, String>) -> bool {
        match self.action {
            RelabelAction::Keep => self.regex.is_match(&self.source_value(labels)),
            RelabelAction::Drop => !self.regex.is_match(&self.source_value(labels)),
            RelabelAction::Replace => {
                let src = self.source_value(labels);
                if let Some(caps) = self.regex.captures(&src) {
                    let mut value = String::new();
                    caps.expand(&self.replacement, &mut value);
                    if value.is_empty() {
                        labels.remove(&self.target_label);
                    } else {
                        labels.insert(self.target_label.clone(), value);
                    }
                }
                true
            }
            RelabelAction::HashMod => {
                let src = self.source_value(labels);
                let mut hasher = DefaultHasher::new();
                src.hash(&mut hasher);
                let value = hasher.finish() % self.modulus;
                labels.insert(self.target_label.clone(), value.to_string());
                true
            }
            RelabelAction::LabelMap => {
                let mapped: Vec<(String, String)> = labels
                    .iter()
                    .filter_map(|(name, value)| {
                        self.regex.captures(name).map(|caps| {
                            let mut new_name = String::new();
                            caps.expand(&self.replacement, &mut new_name);
                            (new_name, value.clone())
                        })
                    })
                    .collect();
                for (name, value) in mapped {
                    if !name.is_empty() {
                        labels.insert(name, value);
                    }
                }
                true
            }
            RelabelAction::LabelDrop => {
                labels.retain(|name, _| !self.regex.is_match(name));
                true
            }
            RelabelAction::LabelKeep => {
                labels.retain(|name, _| self.regex.is_match(name));
                true
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct RelabelConfigList {
    rules: Vec<RelabelRule>,
}

impl RelabelConfigList {
    pub fn from_json(config: &serde_json::Value) -> LogFluxResult<Self> {
        let mut rules = Vec::new();
        if let Some(arr) = config.as_array() {
            for rule in arr {
                rules.push(RelabelRule::from_json(rule)?);
            }
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Runs every rule in order; returns false when the label set (and its
    /// event) must be dropped.
    pub fn process(&self, labels: &mut BTreeMap<String, String>) -> bool {
        for rule in &self.rules {
            if !rule.apply(labels) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn list(rules: serde_json::Value) -> RelabelConfigList {
        RelabelConfigList::from_json(&rules).expect("rules")
    }

    #[test]
    fn test_drop_rule() {
        let rules = list(json!([
            {"action": "drop", "source_labels": ["k3"], "regex": "v.*"}
        ]));
        let mut keep = labels(&[("k3", "x2")]);
        assert!(rules.process(&mut keep));
        let mut dropped = labels(&[("k3", "v2")]);
        assert!(!rules.process(&mut dropped));
    }

    #[test]
    fn test_keep_rule_anchored() {
        let rules = list(json!([
            {"action": "keep", "source_labels": ["job"], "regex": "node"}
        ]));
        // Anchored: "node-exporter" does not match "node".
        let mut partial = labels(&[("job", "node-exporter")]);
        assert!(!rules.process(&mut partial));
        let mut exact = labels(&[("job", "node")]);
        assert!(rules.process(&mut exact));
    }

    #[test]
    fn test_replace_with_capture() {
        let rules = list(json!([
            {
                "action": "replace",
                "source_labels": ["__address__"],
                "regex": "(.*):(\\d+)",
                "target_label": "port",
                "replacement": "$2"
            }
        ]));
        let mut l = labels(&[("__address__", "localhost:9100")]);
        assert!(rules.process(&mut l));
        assert_eq!(l.get("port").map(String::as_str), Some("9100"));
    }

    #[test]
    fn test_replace_empty_removes_label() {
        let rules = list(json!([
            {"action": "replace", "source_labels": ["gone"], "regex": "(.*)",
             "target_label": "gone", "replacement": "$1"}
        ]));
        let mut l = labels(&[("gone", ""), ("stay", "1")]);
        assert!(rules.process(&mut l));
        assert!(!l.contains_key("gone"));
        assert!(l.contains_key("stay"));
    }

    #[test]
    fn test_labelmap() {
        let rules = list(json!([
            {"action": "labelmap", "regex": "__meta_(.+)", "replacement": "$1"}
        ]));
        let mut l = labels(&[("__meta_pod", "p1"), ("job", "j")]);
        assert!(rules.process(&mut l));
        assert_eq!(l.get("pod").map(String::as_str), Some("p1"));
        assert!(l.contains_key("__meta_pod"));
    }

    #[test]
    fn test_labeldrop_and_labelkeep() {
        let rules = list(json!([{"action": "labeldrop", "regex": "__meta_.*"}]));
        let mut l = labels(&[("__meta_pod", "p1"), ("job", "j")]);
        assert!(rules.process(&mut l));
        assert_eq!(l.len(), 1);
        assert!(l.contains_key("job"));

        let rules = list(json!([{"action": "labelkeep", "regex": "job|instance"}]));
        let mut l = labels(&[("job", "j"), ("instance", "i"), ("extra", "x")]);
        assert!(rules.process(&mut l));
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn test_hashmod_is_stable() {
        let rules = list(json!([
            {"action": "hashmod", "source_labels": ["instance"], "modulus": 8,
             "target_label": "__tmp_hash"}
        ]));
        let mut a = labels(&[("instance", "host-1")]);
        let mut b = labels(&[("instance", "host-1")]);
        assert!(rules.process(&mut a));
        assert!(rules.process(&mut b));
        assert_eq!(a.get("__tmp_hash"), b.get("__tmp_hash"));
        let bucket: u64 = a.get("__tmp_hash").expect("hash").parse().expect("number");
        assert!(bucket < 8);
    }

    #[test]
    fn test_rules_run_in_order() {
        let rules = list(json!([
            {"action": "replace", "source_labels": ["a"], "regex": "(.*)",
             "target_label": "b", "replacement": "${1}x"},
            {"action": "drop", "source_labels": ["b"], "regex": "1x"}
        ]));
        let mut l = labels(&[("a", "1")]);
        // First rule writes b="1x", second rule then drops on it.
        assert!(!rules.process(&mut l));
    }

    #[test]
    fn test_deterministic() {
        let rules = list(json!([
            {"action": "labelmap", "regex": "k(.*)", "replacement": "m$1"},
            {"action": "replace", "source_labels": ["k1", "k2"], "regex": "(.*);(.*)",
             "target_label": "joined", "replacement": "$1-$2"}
        ]));
        let mut a = labels(&[("k1", "v1"), ("k2", "v2")]);
        let mut b = labels(&[("k1", "v1"), ("k2", "v2")]);
        assert!(rules.process(&mut a));
        assert!(rules.process(&mut b));
        assert_eq!(a, b);
        assert_eq!(a.get("joined").map(String::as_str), Some("v1-v2"));
    }

    #[test]
    fn test_invalid_rules_rejected() {
        assert!(RelabelRule::from_json(&json!({"action": "nope"})).is_err());
        assert!(RelabelRule::from_json(&json!({"action": "replace"})).is_err());
        assert!(RelabelRule::from_json(
            &json!({"action": "hashmod", "target_label": "t"})
        )
        .is_err());
        assert!(RelabelRule::from_json(&json!({"action": "keep", "regex": "("})).is_err());
    }
}
