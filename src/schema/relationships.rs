//! Relationship model
//!
//! Declared relationships arrive with optional names left empty; the
//! registry fills in the derived alias, field name and reverse alias.

use serde::{Deserialize, Serialize};

use super::inflection::pluralize;
use super::types::IndexSourceFields;
use crate::fields::FieldType;

/// Child collection holds a foreign key to its parent
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildOfRelationship {
    /// Parent collection
    pub target_collection: String,
    /// Child collection, set during registration
    #[serde(default)]
    pub source_collection: String,
    /// Key under which the child object refers to its parent
    #[serde(default)]
    pub alias: String,
    /// Storage field holding the foreign key
    #[serde(default)]
    pub field_name: String,
    /// Key under which the parent embeds its child (or children)
    #[serde(default)]
    pub reverse_alias: String,
}

impl ChildOfRelationship {
    pub fn new(target_collection: impl Into<String>) -> Self {
        Self {
            target_collection: target_collection.into(),
            ..Self::default()
        }
    }
}

/// Symmetric many-to-many edge materialized as a join collection
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectsRelationship {
    pub connects: [String; 2],
    #[serde(default)]
    pub aliases: [String; 2],
    #[serde(default)]
    pub field_names: [String; 2],
    #[serde(default)]
    pub reverse_aliases: [String; 2],
}

impl ConnectsRelationship {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            connects: [left.into(), right.into()],
            ..Self::default()
        }
    }

    /// The endpoint opposite to `this_collection`
    pub fn other_collection(&self, this_collection: &str) -> &str {
        if self.connects[0] == this_collection {
            &self.connects[1]
        } else {
            &self.connects[0]
        }
    }
}

/// How one collection references another
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRelationship", into = "RawRelationship")]
pub enum Relationship {
    ChildOf(ChildOfRelationship),
    SingleChildOf(ChildOfRelationship),
    Connects(ConnectsRelationship),
}

impl Relationship {
    pub fn child_of(target: impl Into<String>) -> Self {
        Relationship::ChildOf(ChildOfRelationship::new(target))
    }

    pub fn single_child_of(target: impl Into<String>) -> Self {
        Relationship::SingleChildOf(ChildOfRelationship::new(target))
    }

    pub fn connects(left: impl Into<String>, right: impl Into<String>) -> Self {
        Relationship::Connects(ConnectsRelationship::new(left, right))
    }

    /// Override the alias (both aliases for `Connects`: use [`Self::with_aliases`])
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        if let Some(child_of) = self.as_child_of_mut() {
            child_of.alias = alias.into();
        }
        self
    }

    pub fn with_reverse_alias(mut self, reverse_alias: impl Into<String>) -> Self {
        if let Some(child_of) = self.as_child_of_mut() {
            child_of.reverse_alias = reverse_alias.into();
        }
        self
    }

    pub fn with_field_name(mut self, field_name: impl Into<String>) -> Self {
        if let Some(child_of) = self.as_child_of_mut() {
            child_of.field_name = field_name.into();
        }
        self
    }

    pub fn with_aliases(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        if let Relationship::Connects(connects) = &mut self {
            connects.aliases = [left.into(), right.into()];
        }
        self
    }

    pub fn with_reverse_aliases(
        mut self,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        if let Relationship::Connects(connects) = &mut self {
            connects.reverse_aliases = [left.into(), right.into()];
        }
        self
    }

    pub fn as_child_of(&self) -> Option<&ChildOfRelationship> {
        match self {
            Relationship::ChildOf(r) | Relationship::SingleChildOf(r) => Some(r),
            Relationship::Connects(_) => None,
        }
    }

    fn as_child_of_mut(&mut self) -> Option<&mut ChildOfRelationship> {
        match self {
            Relationship::ChildOf(r) | Relationship::SingleChildOf(r) => Some(r),
            Relationship::Connects(_) => None,
        }
    }

    /// Whether the parent's reverse view holds at most one child
    pub fn is_single(&self) -> bool {
        matches!(self, Relationship::SingleChildOf(_))
    }

    /// Storage fields the relationship materializes on its own collection
    pub fn field_names(&self) -> Vec<&str> {
        match self {
            Relationship::ChildOf(r) | Relationship::SingleChildOf(r) => vec![&r.field_name],
            Relationship::Connects(r) => r.field_names.iter().map(String::as_str).collect(),
        }
    }

    /// Fill in every derived name. `collection` is the declaring collection.
    ///
    /// Returns `false` when the declaration is missing the collections it
    /// points at, which callers report as an invalid relationship.
    pub(crate) fn resolve_names(&mut self, collection: &str) -> bool {
        let single = self.is_single();
        match self {
            Relationship::ChildOf(r) | Relationship::SingleChildOf(r) => {
                if r.target_collection.is_empty() {
                    return false;
                }
                r.source_collection = collection.to_string();
                if r.alias.is_empty() {
                    r.alias = r.target_collection.clone();
                }
                if r.field_name.is_empty() {
                    r.field_name = format!("{}Rel", r.alias);
                }
                if r.reverse_alias.is_empty() {
                    r.reverse_alias = if single {
                        collection.to_string()
                    } else {
                        pluralize(collection)
                    };
                }
                true
            }
            Relationship::Connects(r) => {
                if r.connects.iter().any(String::is_empty) {
                    return false;
                }
                if is_unset(&r.aliases) {
                    r.aliases = r.connects.clone();
                }
                if is_unset(&r.field_names) {
                    r.field_names = [
                        format!("{}Rel", r.aliases[0]),
                        format!("{}Rel", r.aliases[1]),
                    ];
                }
                if is_unset(&r.reverse_aliases) {
                    r.reverse_aliases = [pluralize(&r.connects[1]), pluralize(&r.connects[0])];
                }
                true
            }
        }
    }

    /// Implicit foreign-key fields and the implicit index they get
    pub(crate) fn implicit_schema(&self) -> (Vec<(String, FieldType)>, IndexSourceFields) {
        match self {
            Relationship::ChildOf(r) | Relationship::SingleChildOf(r) => (
                vec![(r.field_name.clone(), FieldType::ForeignKey)],
                IndexSourceFields::field(&r.field_name),
            ),
            Relationship::Connects(r) => (
                r.field_names
                    .iter()
                    .map(|name| (name.clone(), FieldType::ForeignKey))
                    .collect(),
                IndexSourceFields::compound(r.field_names.iter().map(String::as_str)),
            ),
        }
    }
}

fn is_unset(pair: &[String; 2]) -> bool {
    pair.iter().all(String::is_empty)
}

/// Declaration shape: the variant is picked by which key is present
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRelationship {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    child_of: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    single_child_of: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    connects: Option<[String; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source_collection: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reverse_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    aliases: Option<[String; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    field_names: Option<[String; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reverse_aliases: Option<[String; 2]>,
}

impl TryFrom<RawRelationship> for Relationship {
    type Error = String;

    fn try_from(raw: RawRelationship) -> Result<Self, Self::Error> {
        let child_of = |target: String| ChildOfRelationship {
            target_collection: target,
            source_collection: raw.source_collection.clone().unwrap_or_default(),
            alias: raw.alias.clone().unwrap_or_default(),
            field_name: raw.field_name.clone().unwrap_or_default(),
            reverse_alias: raw.reverse_alias.clone().unwrap_or_default(),
        };

        match (
            raw.child_of.clone(),
            raw.single_child_of.clone(),
            raw.connects.clone(),
        ) {
            (Some(target), None, None) => Ok(Relationship::ChildOf(child_of(target))),
            (None, Some(target), None) => Ok(Relationship::SingleChildOf(child_of(target))),
            (None, None, Some(connects)) => Ok(Relationship::Connects(ConnectsRelationship {
                connects,
                aliases: raw.aliases.unwrap_or_default(),
                field_names: raw.field_names.unwrap_or_default(),
                reverse_aliases: raw.reverse_aliases.unwrap_or_default(),
            })),
            _ => Err(format!(
                "Invalid relationship detected: expected exactly one of childOf, singleChildOf or connects in {:?}",
                raw
            )),
        }
    }
}

impl From<Relationship> for RawRelationship {
    fn from(relationship: Relationship) -> Self {
        let non_empty = |s: String| (!s.is_empty()).then_some(s);
        let non_empty_pair = |p: [String; 2]| (!is_unset(&p)).then_some(p);

        match relationship {
            Relationship::ChildOf(r) => RawRelationship {
                child_of: Some(r.target_collection),
                source_collection: non_empty(r.source_collection),
                alias: non_empty(r.alias),
                field_name: non_empty(r.field_name),
                reverse_alias: non_empty(r.reverse_alias),
                ..RawRelationship::default()
            },
            Relationship::SingleChildOf(r) => RawRelationship {
                single_child_of: Some(r.target_collection),
                source_collection: non_empty(r.source_collection),
                alias: non_empty(r.alias),
                field_name: non_empty(r.field_name),
                reverse_alias: non_empty(r.reverse_alias),
                ..RawRelationship::default()
            },
            Relationship::Connects(r) => RawRelationship {
                connects: Some(r.connects),
                aliases: non_empty_pair(r.aliases),
                field_names: non_empty_pair(r.field_names),
                reverse_aliases: non_empty_pair(r.reverse_aliases),
                ..RawRelationship::default()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_child_of_name_derivation() {
        let mut rel = Relationship::child_of("user");
        assert!(rel.resolve_names("userEmail"));

        let r = rel.as_child_of().unwrap();
        assert_eq!(r.source_collection, "userEmail");
        assert_eq!(r.alias, "user");
        assert_eq!(r.field_name, "userRel");
        assert_eq!(r.reverse_alias, "userEmails");
    }

    #[test]
    fn test_single_child_of_reverse_alias_is_singular() {
        let mut rel = Relationship::single_child_of("userEmail");
        assert!(rel.resolve_names("verificationCode"));
        assert_eq!(rel.as_child_of().unwrap().reverse_alias, "verificationCode");
    }

    #[test]
    fn test_explicit_names_are_kept() {
        let mut rel = Relationship::child_of("user")
            .with_alias("owner")
            .with_reverse_alias("emails");
        assert!(rel.resolve_names("userEmail"));

        let r = rel.as_child_of().unwrap();
        assert_eq!(r.alias, "owner");
        assert_eq!(r.field_name, "ownerRel");
        assert_eq!(r.reverse_alias, "emails");
    }

    #[test]
    fn test_connects_name_derivation() {
        let mut rel = Relationship::connects("user", "newsletter");
        assert!(rel.resolve_names("newsletterSubscription"));

        let Relationship::Connects(r) = &rel else {
            panic!("Expected Connects relationship");
        };
        assert_eq!(r.aliases, ["user".to_string(), "newsletter".to_string()]);
        assert_eq!(
            r.field_names,
            ["userRel".to_string(), "newsletterRel".to_string()]
        );
        assert_eq!(
            r.reverse_aliases,
            ["newsletters".to_string(), "users".to_string()]
        );
        assert_eq!(r.other_collection("user"), "newsletter");
    }

    #[test]
    fn test_declaration_parsing() {
        let rel: Relationship =
            serde_json::from_value(json!({"childOf": "user", "reverseAlias": "emails"})).unwrap();
        assert_eq!(
            rel,
            Relationship::child_of("user").with_reverse_alias("emails")
        );

        let rel: Relationship =
            serde_json::from_value(json!({"singleChildOf": "userEmail"})).unwrap();
        assert!(rel.is_single());

        let rel: Relationship =
            serde_json::from_value(json!({"connects": ["user", "newsletter"]})).unwrap();
        assert_eq!(rel, Relationship::connects("user", "newsletter"));
    }

    #[test]
    fn test_unrecognized_shape_is_rejected() {
        let err = serde_json::from_value::<Relationship>(json!({"parentOf": "user"})).unwrap_err();
        assert!(err.to_string().contains("Invalid relationship detected"));

        let err = serde_json::from_value::<Relationship>(
            json!({"childOf": "user", "connects": ["a", "b"]}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn test_missing_target_does_not_resolve() {
        let mut rel = Relationship::child_of("");
        assert!(!rel.resolve_names("userEmail"));
    }
}
