//! Format checks for extracted values.

use chrono::NaiveDate;

use crate::patterns::PatternType;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%m/%d/%y", "%d/%m/%y", "%B %d, %Y", "%B %d %Y",
    "%b %d, %Y", "%b %d %Y",
];

/// Whether `value` is a plausible instance of `pattern_type`.
///
/// Types without a format rule always pass.
pub fn is_valid(pattern_type: PatternType, value: &str) -> bool {
    match pattern_type {
        PatternType::Email => valid_email(value),
        PatternType::Phone => (10..=15).contains(&digit_count(value)),
        PatternType::Date => valid_date(value),
        PatternType::Ssn => valid_ssn(value),
        PatternType::Currency => valid_currency(value),
        PatternType::Percentage => value
            .trim_end_matches('%')
            .trim()
            .parse::<f64>()
            .is_ok(),
        _ => true,
    }
}

fn digit_count(value: &str) -> usize {
    value.chars().filter(|c| c.is_ascii_digit()).count()
}

fn valid_email(value: &str) -> bool {
    let Some((local, domain)) = value.rsplit_once('@') else {
        return false;
    };
    if local.is_empty() || local.starts_with('.') || local.ends_with('.') || local.contains("..") {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|l| !l.is_empty())
        && labels
            .last()
            .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()))
}

fn valid_date(value: &str) -> bool {
    let normalized = value.replace(['.', '-'], "/");
    let candidates = [value, normalized.as_str()];
    candidates.iter().any(|v| {
        DATE_FORMATS
            .iter()
            .any(|fmt| NaiveDate::parse_from_str(v, fmt).is_ok())
    }) || NaiveDate::parse_from_str(&value.replace('.', ""), "%b %d, %Y").is_ok()
}

fn valid_ssn(value: &str) -> bool {
    let parts: Vec<&str> = value.split('-').collect();
    let [area, group, serial] = parts.as_slice() else {
        return false;
    };
    *area != "000" && *area != "666" && !area.starts_with('9') && *group != "00" && *serial != "0000"
}

fn valid_currency(value: &str) -> bool {
    let amount: String = value
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    amount.parse::<f64>().is_ok()
}
