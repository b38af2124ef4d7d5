//! Rubric and criterion definitions.

use serde::{Deserialize, Serialize};

/// One scoring dimension of a rubric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    /// Unique within its rubric; later stages address results by name.
    pub name: String,
    pub description: String,
    /// Strictly positive.
    pub max_score: f64,
}

impl Criterion {
    pub fn new(name: impl Into<String>, description: impl Into<String>, max_score: f64) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            max_score,
        }
    }
}

/// A validated rubric: a name plus at least one criterion.
///
/// Obtain one through [`crate::validator::validate`]; constructing it by hand
/// skips the structural checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub name: String,
    pub criteria: Vec<Criterion>,
}

impl Rubric {
    /// Sum of every criterion's `max_score`.
    pub fn total_points(&self) -> f64 {
        self.criteria.iter().map(|c| c.max_score).sum()
    }

    /// Look up a criterion by name.
    pub fn criterion(&self, name: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.name == name)
    }
}
