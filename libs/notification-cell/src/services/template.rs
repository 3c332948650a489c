use std::collections::HashMap;

use regex::{Captures, Regex};

use case_booking_cell::{CaseBooking, CaseQuantity, CaseStatus, ItemType};

use crate::error::NotificationError;
use crate::models::{EmailMessage, EmailTemplate};

/// Values available to `{{variable}}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: HashMap<String, String>,
}

impl TemplateContext {
    pub fn for_case(case: &CaseBooking, new_status: CaseStatus, changed_by: &str, quantities: &[CaseQuantity]) -> Self {
        let mut ctx = Self::default();
        let optional = |value: &Option<String>| value.clone().unwrap_or_default();

        ctx.insert("caseReference", &case.case_reference_number);
        ctx.insert("caseReferenceNumber", &case.case_reference_number);
        ctx.insert("hospital", &case.hospital);
        ctx.insert("department", &case.department);
        ctx.insert("procedureType", &case.procedure_type);
        ctx.insert("procedureName", &case.procedure_name);
        ctx.insert("doctorName", optional(&case.doctor_name));
        ctx.insert("dateOfSurgery", case.date_of_surgery.format("%Y-%m-%d").to_string());
        ctx.insert("timeOfProcedure", optional(&case.time_of_procedure));
        ctx.insert("specialInstruction", optional(&case.special_instruction));
        ctx.insert("country", &case.country);
        ctx.insert("submittedBy", &case.submitted_by);
        ctx.insert("processedBy", optional(&case.processed_by));
        ctx.insert("deliveryDetails", optional(&case.delivery_details));
        ctx.insert("orderSummary", optional(&case.order_summary));
        ctx.insert("docNumber", optional(&case.doc_number));
        ctx.insert("status", new_status.as_str());
        ctx.insert("newStatus", new_status.as_str());
        ctx.insert("changedBy", changed_by);
        ctx.insert(
            "surgerySetSelection",
            format_items(&case.surgery_set_selection, ItemType::SurgerySet, quantities),
        );
        ctx.insert(
            "implantBox",
            format_items(&case.implant_box, ItemType::ImplantBox, quantities),
        );
        ctx
    }

    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// `"<item> ×<qty>"` per item when a quantity is known, joined by `", "`.
fn format_items(items: &[String], item_type: ItemType, quantities: &[CaseQuantity]) -> String {
    items
        .iter()
        .map(|item| {
            quantities
                .iter()
                .find(|q| q.item_type == item_type && q.item_name == *item)
                .map_or_else(|| item.clone(), |q| format!("{} ×{}", item, q.quantity))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub struct TemplateRenderer {
    placeholder: Regex,
}

impl TemplateRenderer {
    pub fn new() -> Result<Self, NotificationError> {
        Ok(Self {
            placeholder: Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}")?,
        })
    }

    /// Substitutes known placeholders; unknown ones are left verbatim.
    pub fn render(&self, template: &str, ctx: &TemplateContext) -> String {
        self.placeholder
            .replace_all(template, |caps: &Captures| match ctx.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    pub fn render_email(&self, template: &EmailTemplate, ctx: &TemplateContext, to: Vec<String>) -> EmailMessage {
        EmailMessage {
            to,
            subject: self.render(&template.subject, ctx),
            body: self.render(&template.body, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use case_booking_cell::{CaseReference, NewCaseRequest};
    use chrono::NaiveDate;

    fn case() -> CaseBooking {
        let request = NewCaseRequest {
            hospital: "Mount Elizabeth Hospital".to_string(),
            department: "Orthopedics".to_string(),
            procedure_type: "Knee Replacement".to_string(),
            procedure_name: "Total Knee Arthroplasty".to_string(),
            doctor_name: Some("Dr. Lim".to_string()),
            date_of_surgery: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            time_of_procedure: None,
            surgery_set_selection: vec!["Knee Set A".to_string(), "Knee Set B".to_string()],
            implant_box: vec!["Implant Box 3".to_string()],
            special_instruction: None,
            country: "Singapore".to_string(),
            quantities: vec![],
        };
        CaseBooking::from_request(request, CaseReference::generate("Singapore", 42), "Jane Tan".to_string())
    }

    #[test]
    fn test_substitutes_known_and_keeps_unknown() {
        let renderer = TemplateRenderer::new().unwrap();
        let ctx = TemplateContext::for_case(&case(), CaseStatus::DeliveredHospital, "Ops Team", &[]);

        let rendered = renderer.render(
            "{{caseReference}} at {{ hospital }} is now {{status}} ({{changedBy}}) {{mystery}}",
            &ctx,
        );
        assert_eq!(
            rendered,
            "TMC-SG-00042 at Mount Elizabeth Hospital is now Delivered (Hospital) (Ops Team) {{mystery}}"
        );
    }

    #[test]
    fn test_quantity_aware_item_lists() {
        let case = case();
        let quantities = vec![
            CaseQuantity {
                case_id: case.id,
                item_type: ItemType::SurgerySet,
                item_name: "Knee Set A".to_string(),
                quantity: 2,
            },
            CaseQuantity {
                case_id: case.id,
                item_type: ItemType::ImplantBox,
                item_name: "Implant Box 3".to_string(),
                quantity: 4,
            },
        ];
        let ctx = TemplateContext::for_case(&case, CaseStatus::OrderPrepared, "Ops", &quantities);

        assert_eq!(ctx.get("surgerySetSelection"), Some("Knee Set A ×2, Knee Set B"));
        assert_eq!(ctx.get("implantBox"), Some("Implant Box 3 ×4"));
    }

    #[test]
    fn test_missing_optional_fields_render_empty() {
        let renderer = TemplateRenderer::new().unwrap();
        let ctx = TemplateContext::for_case(&case(), CaseStatus::CaseBooked, "Ops", &[]);
        assert_eq!(renderer.render("[{{timeOfProcedure}}]", &ctx), "[]");
    }
}
