use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{AggregateFunction, Field, FieldErrors, ProcessingOptions, ProcessingType};
use crate::services::options::OptionChoices;

const MAX_CONDITION_LEN: usize = 100;

static CONDITION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_\s><=.]+$").expect("condition pattern is valid"));

/// Checks the fields the selected processing type uses. Each field reports
/// only its first failing rule.
pub fn validate(options: &ProcessingOptions, choices: &OptionChoices) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::new();

    if !choices.allows(options.processing_type) {
        errors.set(Field::ProcessingType, "Please select a valid processing type");
    }

    match options.processing_type {
        ProcessingType::Filter => {
            if let Some(message) = check_condition(&options.condition) {
                errors.set(Field::Condition, message);
            }
        }
        ProcessingType::Aggregate => {
            if options.group_by_column.is_empty() {
                errors.set(Field::GroupByColumn, "Group by column is required");
            }
            if options.aggregate_column.is_empty() {
                errors.set(Field::AggregateColumn, "Aggregation column is required");
            }
            if options.aggregate_function.parse::<AggregateFunction>().is_err() {
                errors.set(Field::AggregateFunction, "Aggregation function is required");
            }
        }
        ProcessingType::Summary => {}
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_condition(condition: &str) -> Option<&'static str> {
    if condition.is_empty() {
        Some("Condition is required")
    } else if condition.chars().count() > MAX_CONDITION_LEN {
        Some("Condition must be 100 characters or less")
    } else if !CONDITION_PATTERN.is_match(condition) {
        Some("Condition can only contain letters, numbers, underscores, spaces, and comparison operators")
    } else {
        None
    }
}
