use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CaseBookingError;

pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseStatus {
    #[serde(rename = "Case Booked")]
    CaseBooked,
    #[serde(rename = "Order Preparation", alias = "Preparing Order")]
    OrderPreparation,
    #[serde(rename = "Order Prepared")]
    OrderPrepared,
    #[serde(rename = "Sales Approved")]
    SalesApproved,
    #[serde(rename = "Pending Delivery (Hospital)")]
    PendingDeliveryHospital,
    #[serde(rename = "Delivered (Hospital)")]
    DeliveredHospital,
    #[serde(rename = "Case Completed")]
    CaseCompleted,
    #[serde(rename = "Pending Delivery (Office)")]
    PendingDeliveryOffice,
    #[serde(rename = "Delivered (Office)")]
    DeliveredOffice,
    #[serde(rename = "To be billed")]
    ToBeBilled,
    #[serde(rename = "Case Closed")]
    CaseClosed,
    #[serde(rename = "Case Cancelled")]
    CaseCancelled,
}

impl CaseStatus {
    pub const ALL: [CaseStatus; 12] = [
        CaseStatus::CaseBooked,
        CaseStatus::OrderPreparation,
        CaseStatus::OrderPrepared,
        CaseStatus::SalesApproved,
        CaseStatus::PendingDeliveryHospital,
        CaseStatus::DeliveredHospital,
        CaseStatus::CaseCompleted,
        CaseStatus::PendingDeliveryOffice,
        CaseStatus::DeliveredOffice,
        CaseStatus::ToBeBilled,
        CaseStatus::CaseClosed,
        CaseStatus::CaseCancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::CaseBooked => "Case Booked",
            CaseStatus::OrderPreparation => "Order Preparation",
            CaseStatus::OrderPrepared => "Order Prepared",
            CaseStatus::SalesApproved => "Sales Approved",
            CaseStatus::PendingDeliveryHospital => "Pending Delivery (Hospital)",
            CaseStatus::DeliveredHospital => "Delivered (Hospital)",
            CaseStatus::CaseCompleted => "Case Completed",
            CaseStatus::PendingDeliveryOffice => "Pending Delivery (Office)",
            CaseStatus::DeliveredOffice => "Delivered (Office)",
            CaseStatus::ToBeBilled => "To be billed",
            CaseStatus::CaseClosed => "Case Closed",
            CaseStatus::CaseCancelled => "Case Cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseStatus::CaseClosed | CaseStatus::CaseCancelled)
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaseStatus {
    type Err = CaseBookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("Preparing Order") {
            return Ok(CaseStatus::OrderPreparation);
        }
        CaseStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| CaseBookingError::Validation(format!("Unknown case status: {}", s)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub id: Uuid,
    pub case_id: Uuid,
    pub status: CaseStatus,
    pub timestamp: DateTime<Utc>,
    pub processed_by: String,
    pub details: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old_value: String,
    pub new_value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmendmentHistoryEntry {
    pub amendment_id: Uuid,
    pub case_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub amended_by: String,
    pub changes: Vec<FieldChange>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    SurgerySet,
    ImplantBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseQuantity {
    pub case_id: Uuid,
    pub item_type: ItemType,
    pub item_name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBooking {
    pub id: Uuid,
    pub case_reference_number: String,
    pub hospital: String,
    pub department: String,
    pub procedure_type: String,
    pub procedure_name: String,
    pub doctor_name: Option<String>,
    pub date_of_surgery: NaiveDate,
    pub time_of_procedure: Option<String>,
    #[serde(default)]
    pub surgery_set_selection: Vec<String>,
    #[serde(default)]
    pub implant_box: Vec<String>,
    pub special_instruction: Option<String>,
    pub status: CaseStatus,
    pub submitted_by: String,
    pub submitted_at: DateTime<Utc>,
    pub processed_by: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub process_order_details: Option<String>,
    pub country: String,
    #[serde(default)]
    pub is_amended: bool,
    pub amended_by: Option<String>,
    pub amended_at: Option<DateTime<Utc>>,
    pub delivery_image: Option<String>,
    pub delivery_details: Option<String>,
    pub order_summary: Option<String>,
    pub doc_number: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub status_history: Vec<StatusHistoryEntry>,
    #[serde(default)]
    pub amendment_history: Vec<AmendmentHistoryEntry>,
}

/// Extra artifacts a status change may carry, depending on the target status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusArtifacts {
    pub process_order_details: Option<String>,
    pub delivery_image: Option<String>,
    pub delivery_details: Option<String>,
    pub order_summary: Option<String>,
    pub doc_number: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub case_id: Uuid,
    pub status: CaseStatus,
    pub processed_by: String,
    pub details: Option<String>,
    #[serde(default)]
    pub artifacts: StatusArtifacts,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCaseRequest {
    pub hospital: String,
    pub department: String,
    pub procedure_type: String,
    pub procedure_name: String,
    pub doctor_name: Option<String>,
    pub date_of_surgery: NaiveDate,
    pub time_of_procedure: Option<String>,
    #[serde(default)]
    pub surgery_set_selection: Vec<String>,
    #[serde(default)]
    pub implant_box: Vec<String>,
    pub special_instruction: Option<String>,
    pub country: String,
    #[serde(default)]
    pub quantities: Vec<ItemQuantity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemQuantity {
    pub item_type: ItemType,
    pub item_name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaseAmendment {
    pub hospital: Option<String>,
    pub department: Option<String>,
    pub procedure_type: Option<String>,
    pub procedure_name: Option<String>,
    pub doctor_name: Option<String>,
    pub date_of_surgery: Option<NaiveDate>,
    pub time_of_procedure: Option<String>,
    pub surgery_set_selection: Option<Vec<String>>,
    pub implant_box: Option<Vec<String>>,
    pub special_instruction: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub username: String,
    pub name: String,
    pub email: Option<String>,
    pub role: String,
    #[serde(default)]
    pub departments: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl UserProfile {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }

    pub fn has_country(&self, country: &str) -> bool {
        self.countries.iter().any(|c| c.eq_ignore_ascii_case(country))
    }

    pub fn has_department(&self, department: &str) -> bool {
        self.departments.iter().any(|d| d.eq_ignore_ascii_case(department))
    }
}

/// Country-scoped booking reference, `TMC-<CC>-<seq>`.
pub struct CaseReference;

impl CaseReference {
    pub fn generate(country: &str, sequence: u32) -> String {
        format!("TMC-{}-{:05}", Self::country_code(country), sequence)
    }

    pub fn country_code(country: &str) -> String {
        match country.trim() {
            "Singapore" => "SG".to_string(),
            "Malaysia" => "MY".to_string(),
            "Philippines" => "PH".to_string(),
            "Indonesia" => "ID".to_string(),
            "Vietnam" => "VN".to_string(),
            "Hong Kong" => "HK".to_string(),
            "Thailand" => "TH".to_string(),
            other => other
                .chars()
                .filter(|c| c.is_ascii_alphabetic())
                .take(2)
                .collect::<String>()
                .to_ascii_uppercase(),
        }
    }

    /// Parses the numeric suffix back out of a reference.
    pub fn sequence_of(reference: &str) -> Option<u32> {
        reference.rsplit('-').next()?.parse().ok()
    }
}

impl CaseBooking {
    pub fn from_request(request: NewCaseRequest, reference: String, submitted_by: String) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let booked = StatusHistoryEntry {
            id: Uuid::new_v4(),
            case_id: id,
            status: CaseStatus::CaseBooked,
            timestamp: now,
            processed_by: submitted_by.clone(),
            details: Some("Case booked".to_string()),
            attachments: Vec::new(),
        };

        Self {
            id,
            case_reference_number: reference,
            hospital: request.hospital,
            department: request.department,
            procedure_type: request.procedure_type,
            procedure_name: request.procedure_name,
            doctor_name: request.doctor_name,
            date_of_surgery: request.date_of_surgery,
            time_of_procedure: request.time_of_procedure,
            surgery_set_selection: request.surgery_set_selection,
            implant_box: request.implant_box,
            special_instruction: request.special_instruction,
            status: CaseStatus::CaseBooked,
            submitted_by,
            submitted_at: now,
            processed_by: None,
            processed_at: None,
            process_order_details: None,
            country: request.country,
            is_amended: false,
            amended_by: None,
            amended_at: None,
            delivery_image: None,
            delivery_details: None,
            order_summary: None,
            doc_number: None,
            attachments: Vec::new(),
            updated_at: now,
            status_history: vec![booked],
            amendment_history: Vec::new(),
        }
    }

    /// Applies a status change and returns the history entry it produced.
    pub fn apply_status_update(&mut self, update: &StatusUpdate) -> StatusHistoryEntry {
        let artifacts = &update.artifacts;

        match update.status {
            CaseStatus::OrderPreparation | CaseStatus::OrderPrepared => {
                self.processed_by = Some(update.processed_by.clone());
                self.processed_at = Some(update.timestamp);
                if artifacts.process_order_details.is_some() {
                    self.process_order_details = artifacts.process_order_details.clone();
                }
            }
            CaseStatus::DeliveredHospital => {
                if artifacts.delivery_image.is_some() {
                    self.delivery_image = artifacts.delivery_image.clone();
                }
                if artifacts.delivery_details.is_some() {
                    self.delivery_details = artifacts.delivery_details.clone();
                }
            }
            CaseStatus::CaseCompleted => {
                if artifacts.order_summary.is_some() {
                    self.order_summary = artifacts.order_summary.clone();
                }
                if artifacts.doc_number.is_some() {
                    self.doc_number = artifacts.doc_number.clone();
                }
            }
            _ => {}
        }
        self.attachments.extend(artifacts.attachments.iter().cloned());

        let entry = StatusHistoryEntry {
            id: Uuid::new_v4(),
            case_id: self.id,
            status: update.status,
            timestamp: update.timestamp,
            processed_by: update.processed_by.clone(),
            details: update.details.clone(),
            attachments: artifacts.attachments.clone(),
        };

        self.status = update.status;
        self.updated_at = update.timestamp;
        self.status_history.push(entry.clone());
        entry
    }

    /// Applies the amended fields and returns the history entry, or `None`
    /// when nothing actually changed.
    pub fn apply_amendment(&mut self, amendment: &CaseAmendment, amended_by: &str) -> Option<AmendmentHistoryEntry> {
        let mut changes = Vec::new();

        fn diff(changes: &mut Vec<FieldChange>, field: &str, current: &mut String, new: &Option<String>) {
            if let Some(value) = new {
                if value != current {
                    changes.push(FieldChange {
                        field: field.to_string(),
                        old_value: current.clone(),
                        new_value: value.clone(),
                    });
                    *current = value.clone();
                }
            }
        }

        fn diff_opt(changes: &mut Vec<FieldChange>, field: &str, current: &mut Option<String>, new: &Option<String>) {
            if let Some(value) = new {
                if current.as_ref() != Some(value) {
                    changes.push(FieldChange {
                        field: field.to_string(),
                        old_value: current.clone().unwrap_or_default(),
                        new_value: value.clone(),
                    });
                    *current = Some(value.clone());
                }
            }
        }

        fn diff_list(changes: &mut Vec<FieldChange>, field: &str, current: &mut Vec<String>, new: &Option<Vec<String>>) {
            if let Some(values) = new {
                if values != current {
                    changes.push(FieldChange {
                        field: field.to_string(),
                        old_value: current.join(", "),
                        new_value: values.join(", "),
                    });
                    *current = values.clone();
                }
            }
        }

        diff(&mut changes, "hospital", &mut self.hospital, &amendment.hospital);
        diff(&mut changes, "department", &mut self.department, &amendment.department);
        diff(&mut changes, "procedureType", &mut self.procedure_type, &amendment.procedure_type);
        diff(&mut changes, "procedureName", &mut self.procedure_name, &amendment.procedure_name);
        diff_opt(&mut changes, "doctorName", &mut self.doctor_name, &amendment.doctor_name);
        if let Some(date) = amendment.date_of_surgery {
            if date != self.date_of_surgery {
                changes.push(FieldChange {
                    field: "dateOfSurgery".to_string(),
                    old_value: self.date_of_surgery.to_string(),
                    new_value: date.to_string(),
                });
                self.date_of_surgery = date;
            }
        }
        diff_opt(&mut changes, "timeOfProcedure", &mut self.time_of_procedure, &amendment.time_of_procedure);
        diff_list(&mut changes, "surgerySetSelection", &mut self.surgery_set_selection, &amendment.surgery_set_selection);
        diff_list(&mut changes, "implantBox", &mut self.implant_box, &amendment.implant_box);
        diff_opt(&mut changes, "specialInstruction", &mut self.special_instruction, &amendment.special_instruction);

        if changes.is_empty() {
            return None;
        }

        let now = Utc::now();
        let entry = AmendmentHistoryEntry {
            amendment_id: Uuid::new_v4(),
            case_id: self.id,
            timestamp: now,
            amended_by: amended_by.to_string(),
            changes,
            reason: amendment.reason.clone(),
        };

        self.is_amended = true;
        self.amended_by = Some(amended_by.to_string());
        self.amended_at = Some(now);
        self.updated_at = now;
        self.amendment_history.push(entry.clone());
        Some(entry)
    }
}
