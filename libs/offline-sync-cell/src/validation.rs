use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

/// Country list that shipped as hard-coded sample data in early builds.
/// Seeing it verbatim from the backend means the real table was never read.
pub const LEGACY_COUNTRIES: [&str; 7] = [
    "Singapore",
    "Malaysia",
    "Philippines",
    "Indonesia",
    "Vietnam",
    "Hong Kong",
    "Thailand",
];

const PLACEHOLDER_MARKERS: [&str; 3] = ["test", "sample", "placeholder"];
const PLACEHOLDER_LIMIT: usize = 3;

/// Inspects data returned by a remote call before it reaches callers.
pub trait DataValidator: Send + Sync {
    /// Returns a human-readable reason when the data looks fabricated.
    fn validate(&self, operation: &str, data: &Value) -> Result<(), String>;
}

/// Heuristic fake-data detector. It only catches the known legacy patterns.
#[derive(Debug, Default, Clone, Copy)]
pub struct FakeDataValidator;

impl FakeDataValidator {
    fn entry_name(entry: &Value) -> Option<&str> {
        match entry {
            Value::String(s) => Some(s),
            Value::Object(map) => map.get("name").and_then(Value::as_str),
            _ => None,
        }
    }

    fn is_legacy_country_list(items: &[Value]) -> bool {
        items.len() == LEGACY_COUNTRIES.len()
            && items
                .iter()
                .zip(LEGACY_COUNTRIES)
                .all(|(item, country)| item.as_str() == Some(country))
    }
}

impl DataValidator for FakeDataValidator {
    fn validate(&self, operation: &str, data: &Value) -> Result<(), String> {
        let items = match data {
            Value::Array(items) => items,
            _ => return Ok(()),
        };

        if Self::is_legacy_country_list(items) {
            warn!(operation, "Rejected hard-coded legacy country list");
            return Err(format!("{} returned the legacy hard-coded country list", operation));
        }

        let placeholders = items
            .iter()
            .filter_map(Self::entry_name)
            .filter(|name| {
                let lower = name.to_lowercase();
                PLACEHOLDER_MARKERS.iter().any(|marker| lower.contains(marker))
            })
            .count();

        if placeholders > PLACEHOLDER_LIMIT {
            warn!(operation, placeholders, "Rejected placeholder data");
            return Err(format!("{} returned {} placeholder entries", operation, placeholders));
        }

        Ok(())
    }
}

/// Accepts everything. Used in development and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissiveValidator;

impl DataValidator for PermissiveValidator {
    fn validate(&self, _operation: &str, _data: &Value) -> Result<(), String> {
        Ok(())
    }
}

pub fn validator_for(strict: bool) -> Arc<dyn DataValidator> {
    if strict {
        Arc::new(FakeDataValidator)
    } else {
        Arc::new(PermissiveValidator)
    }
}

/// `null`, `[]` and `{}` count as empty results.
pub fn is_empty_result(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
