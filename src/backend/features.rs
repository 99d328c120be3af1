//! Backend feature flags

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Capability a backend may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    /// Atomic execution of an operation batch
    ExecuteBatch,
    /// Nested creates handled natively by the backend
    CreateWithRelationships,
    UpdateWithRelationships,
    /// Bulk insert without relationship handling
    RawCreateObjects,
    /// Native count instead of counting found objects
    Count,
    FullTextSearch,
    RelationshipFetching,
    CrossRelationshipQueries,
}

impl Feature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::ExecuteBatch => "executeBatch",
            Feature::CreateWithRelationships => "createWithRelationships",
            Feature::UpdateWithRelationships => "updateWithRelationships",
            Feature::RawCreateObjects => "rawCreateObjects",
            Feature::Count => "count",
            Feature::FullTextSearch => "fullTextSearch",
            Feature::RelationshipFetching => "relationshipFetching",
            Feature::CrossRelationshipQueries => "crossRelationshipQueries",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executeBatch" => Ok(Feature::ExecuteBatch),
            "createWithRelationships" => Ok(Feature::CreateWithRelationships),
            "updateWithRelationships" => Ok(Feature::UpdateWithRelationships),
            "rawCreateObjects" => Ok(Feature::RawCreateObjects),
            "count" => Ok(Feature::Count),
            "fullTextSearch" => Ok(Feature::FullTextSearch),
            "relationshipFetching" => Ok(Feature::RelationshipFetching),
            "crossRelationshipQueries" => Ok(Feature::CrossRelationshipQueries),
            other => Err(format!("Unknown backend feature '{}'", other)),
        }
    }
}

/// Set of features a backend supports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendFeatures(BTreeSet<Feature>);

impl BackendFeatures {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, feature: Feature) -> Self {
        self.0.insert(feature);
        self
    }

    pub fn without(mut self, feature: Feature) -> Self {
        self.0.remove(&feature);
        self
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.0.contains(&feature)
    }

    /// Whether a feature given by name is supported; unknown names are not
    pub fn supports_named(&self, name: &str) -> bool {
        Feature::from_str(name).map_or(false, |feature| self.contains(feature))
    }

    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Feature> for BackendFeatures {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
