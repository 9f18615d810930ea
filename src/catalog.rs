use crate::config::BoxConfig;
use crate::error::{AgentManagerError, Result};
use crate::utils::size;
use std::collections::{BTreeSet, HashMap};

/// A Vagrant box that can serve one or more labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxDefinition {
    pub name: String,
    pub labels: BTreeSet<String>,
    pub memory_bytes: u64,
}

/// Read-only label -> box mapping built from configuration.
#[derive(Debug, Clone, Default)]
pub struct BoxCatalog {
    boxes: Vec<BoxDefinition>,
    by_label: HashMap<String, usize>,
}

impl BoxCatalog {
    /// Build a catalog, rejecting boxes without labels and labels served by
    /// more than one box.
    pub fn new(boxes: Vec<BoxDefinition>) -> Result<Self> {
        let mut by_label = HashMap::new();

        for (index, def) in boxes.iter().enumerate() {
            if def.name.trim().is_empty() {
                return Err(AgentManagerError::InvalidConfig(
                    "box name must not be empty".to_string(),
                ));
            }
            if def.labels.is_empty() {
                return Err(AgentManagerError::InvalidConfig(format!(
                    "box '{}' serves no labels",
                    def.name
                )));
            }
            for label in &def.labels {
                if let Some(previous) = by_label.insert(label.clone(), index) {
                    return Err(AgentManagerError::InvalidConfig(format!(
                        "label '{}' is served by both '{}' and '{}'",
                        label, boxes[previous].name, def.name
                    )));
                }
            }
        }

        Ok(Self { boxes, by_label })
    }

    pub fn from_config(boxes: &[BoxConfig]) -> Result<Self> {
        let definitions = boxes
            .iter()
            .map(|b| {
                Ok(BoxDefinition {
                    name: b.name.clone(),
                    labels: b.labels.iter().map(|l| l.trim().to_string()).collect(),
                    memory_bytes: size::parse_memory(&b.memory)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::new(definitions)
    }

    /// Find the box serving `label`
    pub fn lookup(&self, label: &str) -> Option<&BoxDefinition> {
        self.by_label.get(label).map(|&index| &self.boxes[index])
    }

    /// Every label served, sorted
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.by_label.keys().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }

    pub fn boxes(&self) -> &[BoxDefinition] {
        &self.boxes
    }
}
