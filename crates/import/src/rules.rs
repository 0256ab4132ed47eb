use bookkeeper_core::{Category, CategoryRule, MappingField, RuleId, Transaction};
use regex::{Regex, RegexBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule {rule} of category '{category}' has an invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        rule: RuleId,
        category: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Compiles a rule pattern for case-insensitive search.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

fn compile_rule(rule: &CategoryRule, category: &Category) -> Result<Regex, RuleError> {
    compile_pattern(&rule.pattern).map_err(|source| RuleError::InvalidPattern {
        rule: rule.id,
        category: category.name.clone(),
        pattern: rule.pattern.clone(),
        source,
    })
}

/// Internal pairing of a rule with its precompiled regex.
struct CompiledRule {
    field: MappingField,
    regex: Regex,
}

impl CompiledRule {
    /// Rules on an absent optional field never match.
    fn matches(&self, tx: &Transaction) -> bool {
        tx.field(self.field)
            .is_some_and(|text| self.regex.is_match(text))
    }
}

struct CompiledCategory {
    category: Category,
    rules: Vec<CompiledRule>,
}

/// A point-in-time snapshot of categories with compiled rules.
///
/// Categories are tried in the order given and rules within a category in
/// their stored order. The first category with a matching rule wins; no
/// scoring happens across categories.
pub struct CategoryMatcher {
    categories: Vec<CompiledCategory>,
}

impl CategoryMatcher {
    /// Fails on the first pattern that does not compile.
    pub fn new(categories: Vec<Category>) -> Result<Self, RuleError> {
        let categories = categories
            .into_iter()
            .map(|category| {
                let rules = category
                    .rules
                    .iter()
                    .map(|rule| {
                        Ok(CompiledRule {
                            field: rule.mapping_field,
                            regex: compile_rule(rule, &category)?,
                        })
                    })
                    .collect::<Result<Vec<_>, RuleError>>()?;
                Ok(CompiledCategory { category, rules })
            })
            .collect::<Result<Vec<_>, RuleError>>()?;
        Ok(Self { categories })
    }

    pub fn find_category(&self, tx: &Transaction) -> Option<&Category> {
        self.categories
            .iter()
            .find(|cc| cc.rules.iter().any(|rule| rule.matches(tx)))
            .map(|cc| &cc.category)
    }

    /// Returns indices + matched categories for all transactions, in order.
    pub fn apply<'a>(&'a self, transactions: &[Transaction]) -> Vec<(usize, &'a Category)> {
        transactions
            .iter()
            .enumerate()
            .filter_map(|(idx, tx)| self.find_category(tx).map(|c| (idx, c)))
            .collect()
    }
}

/// Ordered scan without a prebuilt matcher. Patterns are compiled as they are
/// reached, so an invalid rule only fails the call if no earlier rule matched.
pub fn match_category<'a>(
    tx: &Transaction,
    categories: &'a [Category],
) -> Result<Option<&'a Category>, RuleError> {
    for category in categories {
        for rule in &category.rules {
            let Some(text) = tx.field(rule.mapping_field) else {
                continue;
            };
            if compile_rule(rule, category)?.is_match(text) {
                return Ok(Some(category));
            }
        }
    }
    Ok(None)
}
