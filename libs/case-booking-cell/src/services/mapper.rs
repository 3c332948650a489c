use serde_json::{Map, Value};

use crate::error::CaseBookingError;
use crate::models::{CaseBooking, UserProfile};

/// Database schema generations the repository can read and write.
///
/// V1 is the legacy `case_bookings` layout: `case_reference`, `date`,
/// `amended`, and item lists stored as comma-separated text. V2 is the
/// current layout, which matches the model's field names with JSON arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaVersion {
    V1,
    #[default]
    V2,
}

const V1_RENAMES: [(&str, &str); 3] = [
    ("case_reference", "case_reference_number"),
    ("date", "date_of_surgery"),
    ("amended", "is_amended"),
];

const V1_LIST_COLUMNS: [(&str, &str); 2] = [
    ("surgery_sets", "surgery_set_selection"),
    ("implant_boxes", "implant_box"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct CaseRowMapper {
    version: SchemaVersion,
}

impl CaseRowMapper {
    pub fn new(version: SchemaVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    /// Builds the row written to `case_bookings`. Histories live in their own tables.
    pub fn to_row(&self, case: &CaseBooking) -> Result<Value, CaseBookingError> {
        let mut row = match serde_json::to_value(case)? {
            Value::Object(map) => map,
            _ => return Err(CaseBookingError::Mapping("case did not serialize to an object".to_string())),
        };
        row.remove("status_history");
        row.remove("amendment_history");

        if self.version == SchemaVersion::V1 {
            for (legacy, current) in V1_RENAMES {
                if let Some(value) = row.remove(current) {
                    row.insert(legacy.to_string(), value);
                }
            }
            for (legacy, current) in V1_LIST_COLUMNS {
                if let Some(value) = row.remove(current) {
                    row.insert(legacy.to_string(), Value::String(join_list(&value)));
                }
            }
        }

        Ok(Value::Object(row))
    }

    pub fn from_row(&self, row: &Value) -> Result<CaseBooking, CaseBookingError> {
        let mut map = match row {
            Value::Object(map) => map.clone(),
            other => {
                return Err(CaseBookingError::Mapping(format!("expected an object row, got {}", other)))
            }
        };

        if self.version == SchemaVersion::V1 {
            upgrade_v1_columns(&mut map);
        }

        serde_json::from_value(Value::Object(map))
            .map_err(|e| CaseBookingError::Mapping(format!("case row: {}", e)))
    }

    /// Profiles are shared by both generations; only list encoding differs.
    pub fn user_from_row(&self, row: &Value) -> Result<UserProfile, CaseBookingError> {
        let mut map = match row {
            Value::Object(map) => map.clone(),
            other => {
                return Err(CaseBookingError::Mapping(format!("expected an object row, got {}", other)))
            }
        };

        for column in ["departments", "countries"] {
            if let Some(Value::String(text)) = map.get(column) {
                let list = split_list(text);
                map.insert(column.to_string(), list);
            }
        }
        if !map.contains_key("username") {
            let username = map.get("email").cloned().unwrap_or(Value::String(String::new()));
            map.insert("username".to_string(), username);
        }

        serde_json::from_value(Value::Object(map))
            .map_err(|e| CaseBookingError::Mapping(format!("profile row: {}", e)))
    }

    pub fn user_to_row(&self, user: &UserProfile) -> Result<Value, CaseBookingError> {
        let mut row = serde_json::to_value(user)?;
        if self.version == SchemaVersion::V1 {
            if let Value::Object(map) = &mut row {
                for column in ["departments", "countries"] {
                    if let Some(value) = map.remove(column) {
                        map.insert(column.to_string(), Value::String(join_list(&value)));
                    }
                }
            }
        }
        Ok(row)
    }
}

fn upgrade_v1_columns(map: &mut Map<String, Value>) {
    for (legacy, current) in V1_RENAMES {
        if let Some(value) = map.remove(legacy) {
            map.insert(current.to_string(), value);
        }
    }
    for (legacy, current) in V1_LIST_COLUMNS {
        match map.remove(legacy) {
            Some(Value::String(text)) => {
                map.insert(current.to_string(), split_list(&text));
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                map.insert(current.to_string(), other);
            }
        }
    }
}

fn split_list(text: &str) -> Value {
    Value::Array(
        text.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
    )
}

fn join_list(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(","),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::sample_request;
    use crate::models::CaseStatus;
    use serde_json::json;

    fn sample_case() -> CaseBooking {
        CaseBooking::from_request(sample_request("Singapore"), "TMC-SG-00007".to_string(), "Jane".to_string())
    }

    #[test]
    fn test_v2_row_drops_histories() {
        let mapper = CaseRowMapper::new(SchemaVersion::V2);
        let row = mapper.to_row(&sample_case()).unwrap();

        assert!(row.get("status_history").is_none());
        assert_eq!(row["case_reference_number"], "TMC-SG-00007");
        assert_eq!(row["status"], "Case Booked");
        assert_eq!(row["surgery_set_selection"], json!(["Knee Set A"]));
    }

    #[test]
    fn test_v1_row_uses_legacy_columns() {
        let mapper = CaseRowMapper::new(SchemaVersion::V1);
        let mut case = sample_case();
        case.implant_box.push("Implant Box 9".to_string());
        let row = mapper.to_row(&case).unwrap();

        assert_eq!(row["case_reference"], "TMC-SG-00007");
        assert_eq!(row["implant_boxes"], "Implant Box 3,Implant Box 9");
        assert!(row.get("case_reference_number").is_none());

        let restored = mapper.from_row(&row).unwrap();
        assert_eq!(restored.implant_box, case.implant_box);
        assert_eq!(restored.date_of_surgery, case.date_of_surgery);
        assert!(restored.status_history.is_empty());
    }

    #[test]
    fn test_v1_reads_preparing_order_status() {
        let mapper = CaseRowMapper::new(SchemaVersion::V1);
        let mut row = mapper.to_row(&sample_case()).unwrap();
        row["status"] = json!("Preparing Order");

        assert_eq!(mapper.from_row(&row).unwrap().status, CaseStatus::OrderPreparation);
    }

    #[test]
    fn test_user_row_accepts_comma_lists() {
        let mapper = CaseRowMapper::default();
        let user = mapper
            .user_from_row(&json!({
                "id": "u1",
                "name": "Ops Lead",
                "email": "ops@example.com",
                "role": "operations",
                "departments": "Orthopedics, Spine",
                "countries": ["Singapore"]
            }))
            .unwrap();

        assert_eq!(user.departments, vec!["Orthopedics", "Spine"]);
        assert_eq!(user.username, "ops@example.com");
        assert!(user.enabled);
    }

    #[test]
    fn test_rejects_non_object_rows() {
        let mapper = CaseRowMapper::default();
        assert!(matches!(mapper.from_row(&json!([1, 2])), Err(CaseBookingError::Mapping(_))));
    }
}
