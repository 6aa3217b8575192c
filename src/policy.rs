//! Class-to-label policy and the violation classifier.
//!
//! The policy is a fixed table from detector class id to violation label.
//! Class ids outside the table are not violations and produce nothing.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

/// Detector class id for a worker without a hard hat.
pub const CLASS_NO_HELMET: u32 = 7;
/// Detector class id for a worker with a hard hat but no vest.
pub const CLASS_NO_VEST: u32 = 5;

pub const LABEL_NO_HELMET: &str = "No Helmet";
pub const LABEL_NO_VEST: &str = "No Vest";

/// Ordered mapping from detector class id to violation label.
///
/// Iteration is by ascending class id, which fixes the order of labels
/// emitted by [`ClassLabelPolicy::classify`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassLabelPolicy {
    labels: BTreeMap<u32, String>,
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    labels: BTreeMap<String, String>,
}

impl ClassLabelPolicy {
    pub fn from_entries<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        let mut labels = BTreeMap::new();
        for (class_id, label) in entries {
            let label = label.into();
            validate_label(&label)?;
            if labels.insert(class_id, label).is_some() {
                return Err(anyhow!("class id {} mapped twice", class_id));
            }
        }
        if labels.is_empty() {
            return Err(anyhow!("class-to-label policy must not be empty"));
        }
        Ok(Self { labels })
    }

    /// Build from a table whose keys are class ids written as strings, as they
    /// appear in JSON and TOML documents.
    pub fn from_string_keys(table: &BTreeMap<String, String>) -> Result<Self> {
        let entries = table
            .iter()
            .map(|(key, label)| {
                let class_id: u32 = key
                    .trim()
                    .parse()
                    .map_err(|_| anyhow!("policy key '{}' is not a class id", key))?;
                Ok((class_id, label.trim().to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_entries(entries)
    }

    /// Parse a standalone policy table:
    ///
    /// ```toml
    /// [labels]
    /// 5 = "No Vest"
    /// 7 = "No Helmet"
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: PolicyFile = toml::from_str(raw).context("invalid policy table")?;
        Self::from_string_keys(&file.labels)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read policy file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("policy file {}", path.display()))
    }

    pub fn label_for(&self, class_id: u32) -> Option<&str> {
        self.labels.get(&class_id).map(String::as_str)
    }

    /// Labels in policy order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.labels.values().map(String::as_str)
    }

    /// Map the class ids detected in one frame to violation labels.
    ///
    /// Each occurrence of a qualifying id yields one label; unknown ids are
    /// ignored. Output order follows the policy, not the input.
    pub fn classify<I>(&self, class_ids: I) -> Vec<String>
    where
        I: IntoIterator<Item = u32>,
    {
        let mut occurrences: BTreeMap<u32, usize> = BTreeMap::new();
        for class_id in class_ids {
            if self.labels.contains_key(&class_id) {
                *occurrences.entry(class_id).or_default() += 1;
            }
        }

        let mut out = Vec::new();
        for (class_id, count) in occurrences {
            if let Some(label) = self.labels.get(&class_id) {
                out.extend(std::iter::repeat(label.clone()).take(count));
            }
        }
        out
    }
}

impl Default for ClassLabelPolicy {
    fn default() -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(CLASS_NO_VEST, LABEL_NO_VEST.to_string());
        labels.insert(CLASS_NO_HELMET, LABEL_NO_HELMET.to_string());
        Self { labels }
    }
}

/// Labels end up as a column value in the violation log.
pub fn validate_label(label: &str) -> Result<()> {
    if label.trim().is_empty() {
        return Err(anyhow!("violation label must not be empty"));
    }
    if label.chars().any(char::is_control) {
        return Err(anyhow!(
            "violation label '{}' contains control characters",
            label.escape_debug()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn classify_emits_labels_in_policy_order() {
        let policy = ClassLabelPolicy::default();
        let ids: BTreeSet<u32> = [7, 5].into_iter().collect();
        assert_eq!(policy.classify(ids), vec!["No Vest", "No Helmet"]);
        assert_eq!(policy.classify([7, 5]), policy.classify([5, 7]));
    }

    #[test]
    fn classify_empty_frame_is_empty() {
        let policy = ClassLabelPolicy::default();
        assert!(policy.classify(Vec::<u32>::new()).is_empty());
    }

    #[test]
    fn classify_ignores_compliant_and_unknown_classes() {
        let policy = ClassLabelPolicy::default();
        assert!(policy.classify([0, 1, 2, 99]).is_empty());
        assert_eq!(policy.classify([0, 7, 99]), vec!["No Helmet"]);
    }

    #[test]
    fn classify_keeps_one_label_per_detected_worker() {
        let policy = ClassLabelPolicy::default();
        assert_eq!(
            policy.classify([7, 3, 7, 5]),
            vec!["No Vest", "No Helmet", "No Helmet"]
        );
    }

    #[test]
    fn policy_table_parses_from_toml() {
        let policy = ClassLabelPolicy::from_toml_str(
            r#"
            [labels]
            7 = "No Helmet"
            5 = "No Vest"
            9 = "No Gloves"
            "#,
        )
        .unwrap();
        assert_eq!(policy.label_for(9), Some("No Gloves"));
        assert_eq!(
            policy.labels().collect::<Vec<_>>(),
            vec!["No Vest", "No Helmet", "No Gloves"]
        );
    }

    #[test]
    fn policy_rejects_bad_entries() {
        assert!(ClassLabelPolicy::from_toml_str("[labels]\nhelmet = \"No Helmet\"").is_err());
        assert!(ClassLabelPolicy::from_entries([(1, "  ")]).is_err());
        assert!(ClassLabelPolicy::from_entries([(1, "bad\nlabel")]).is_err());
        assert!(ClassLabelPolicy::from_entries(Vec::<(u32, String)>::new()).is_err());
    }
}
