use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(pub i64);

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub i64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The transaction text field a rule is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingField {
    Recipient,
    BookingText,
    Purpose,
}

impl MappingField {
    pub fn as_str(self) -> &'static str {
        match self {
            MappingField::Recipient => "recipient",
            MappingField::BookingText => "booking_text",
            MappingField::Purpose => "purpose",
        }
    }
}

impl fmt::Display for MappingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown mapping field: '{0}'")]
pub struct UnknownMappingField(pub String);

impl FromStr for MappingField {
    type Err = UnknownMappingField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "recipient" => Ok(MappingField::Recipient),
            "booking_text" | "bookingtext" => Ok(MappingField::BookingText),
            "purpose" => Ok(MappingField::Purpose),
            other => Err(UnknownMappingField(other.to_string())),
        }
    }
}

/// A (field, pattern) pair. The pattern is a regular expression that is
/// searched for case-insensitively within the field text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRule {
    pub id: RuleId,
    #[serde(rename = "categoryID")]
    pub category_id: CategoryId,
    pub mapping_field: MappingField,
    #[serde(rename = "regex")]
    pub pattern: String,
    pub description: Option<String>,
}

/// A category together with its rules in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<CategoryRule>,
}

impl Category {
    pub fn new(id: CategoryId, name: &str) -> Self {
        Category {
            id,
            name: name.to_string(),
            description: None,
            color: None,
            rules: Vec::new(),
        }
    }

    /// Appends a rule owned by this category. Rule ids are assigned
    /// sequentially within the category; stored categories carry their own.
    pub fn with_rule(mut self, field: MappingField, pattern: &str) -> Self {
        let id = RuleId(self.rules.len() as i64 + 1);
        self.rules.push(CategoryRule {
            id,
            category_id: self.id,
            mapping_field: field,
            pattern: pattern.to_string(),
            description: None,
        });
        self
    }

    /// Strips the rule list, as categories embedded in transactions carry none.
    pub fn summary(&self) -> Category {
        Category {
            rules: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_field_round_trips_through_str() {
        for field in [
            MappingField::Recipient,
            MappingField::BookingText,
            MappingField::Purpose,
        ] {
            assert_eq!(field.as_str().parse::<MappingField>().unwrap(), field);
        }
    }

    #[test]
    fn mapping_field_parse_is_case_insensitive() {
        assert_eq!("Booking_Text".parse::<MappingField>().unwrap(), MappingField::BookingText);
    }

    #[test]
    fn mapping_field_rejects_unknown() {
        let err = "amount".parse::<MappingField>().unwrap_err();
        assert_eq!(err, UnknownMappingField("amount".to_string()));
    }

    #[test]
    fn with_rule_keeps_insertion_order() {
        let category = Category::new(CategoryId(3), "Groceries")
            .with_rule(MappingField::Recipient, "lidl")
            .with_rule(MappingField::Recipient, "aldi");
        let patterns: Vec<_> = category.rules.iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(patterns, ["lidl", "aldi"]);
        assert!(category.rules.iter().all(|r| r.category_id == CategoryId(3)));
    }

    #[test]
    fn summary_drops_rules() {
        let category = Category::new(CategoryId(1), "Income").with_rule(MappingField::BookingText, "gehalt");
        let summary = category.summary();
        assert!(summary.rules.is_empty());
        assert_eq!(summary.name, "Income");
    }

    #[test]
    fn rule_serializes_with_wire_names() {
        let category = Category::new(CategoryId(1), "Income").with_rule(MappingField::BookingText, "gehalt");
        let json = serde_json::to_value(&category.rules[0]).unwrap();
        assert_eq!(json["mappingField"], "booking_text");
        assert_eq!(json["regex"], "gehalt");
        assert_eq!(json["categoryID"], 1);
    }
}
