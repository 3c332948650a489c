use std::sync::Arc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use base64::{Engine as _, engine::general_purpose};
use serde_json::json;
use uuid::Uuid;

use shared_config::{AppConfig, SyncSettings};
use shared_models::auth::User;

pub const TEST_JWT_SECRET: &str = "test-secret-key-for-jwt-validation-must-be-long-enough";

pub struct TestConfig {
    pub jwt_secret: String,
    pub supabase_url: String,
    pub supabase_anon_key: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            jwt_secret: TEST_JWT_SECRET.to_string(),
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
        }
    }
}

impl TestConfig {
    pub fn with_supabase_url(url: impl Into<String>) -> Self {
        Self {
            supabase_url: url.into(),
            ..Self::default()
        }
    }

    /// Config with sync delays shrunk to milliseconds so tests never sleep for long.
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            supabase_jwt_secret: self.jwt_secret.clone(),
            supabase_service_key: None,
            redis_url: None,
            email_function_name: "send-email".to_string(),
            email_from_name: Some("Case Booking".to_string()),
            email_provider: None,
            sync: SyncSettings {
                sync_item_delay_ms: 1,
                retry_base_delay_ms: 1,
                strict_data_validation: false,
                ..SyncSettings::default()
            },
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

pub struct TestUser {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Default for TestUser {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: "test@example.com".to_string(),
            role: "operations".to_string(),
        }
    }
}

impl TestUser {
    pub fn new(email: &str, role: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            role: role.to_string(),
        }
    }

    pub fn operations(email: &str) -> Self {
        Self::new(email, "operations")
    }

    pub fn sales(email: &str) -> Self {
        Self::new(email, "sales")
    }

    pub fn admin(email: &str) -> Self {
        Self::new(email, "admin")
    }

    pub fn to_user(&self) -> User {
        User {
            id: self.id.clone(),
            email: Some(self.email.clone()),
            role: Some(self.role.clone()),
            metadata: None,
            created_at: Some(Utc::now()),
        }
    }
}

pub struct JwtTestUtils;

impl JwtTestUtils {
    pub fn create_test_token(user: &TestUser, secret: &str, exp_hours: Option<i64>) -> String {
        let now = Utc::now();
        let exp = now + Duration::hours(exp_hours.unwrap_or(24));

        let header = json!({
            "alg": "HS256",
            "typ": "JWT"
        });

        let payload = json!({
            "sub": user.id,
            "email": user.email,
            "role": "authenticated",
            "app_metadata": { "role": user.role },
            "iat": now.timestamp(),
            "exp": exp.timestamp()
        });

        let header_encoded = general_purpose::URL_SAFE_NO_PAD.encode(header.to_string());
        let payload_encoded = general_purpose::URL_SAFE_NO_PAD.encode(payload.to_string());

        let signing_input = format!("{}.{}", header_encoded, payload_encoded);

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_encoded = general_purpose::URL_SAFE_NO_PAD.encode(signature);

        format!("{}.{}", signing_input, signature_encoded)
    }

    pub fn create_expired_token(user: &TestUser, secret: &str) -> String {
        Self::create_test_token(user, secret, Some(-1))
    }

    pub fn create_invalid_signature_token(user: &TestUser) -> String {
        Self::create_test_token(user, "wrong-secret", Some(24))
    }

    pub fn create_malformed_token() -> String {
        "invalid.token.format".to_string()
    }
}

/// Canned PostgREST rows in the current (v2) schema.
pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    pub fn case_row(case_id: &str, country: &str, status: &str) -> serde_json::Value {
        json!({
            "id": case_id,
            "case_reference_number": "TMC-SG-00001",
            "hospital": "Mount Elizabeth Hospital",
            "department": "Orthopedics",
            "procedure_type": "Knee Replacement",
            "procedure_name": "Total Knee Arthroplasty",
            "doctor_name": "Dr. Lim",
            "date_of_surgery": "2026-11-02",
            "time_of_procedure": "09:30",
            "surgery_set_selection": ["Knee Set A"],
            "implant_box": ["Implant Box 3"],
            "special_instruction": null,
            "status": status,
            "submitted_by": "Jane Tan",
            "submitted_at": "2026-10-01T08:00:00Z",
            "processed_by": null,
            "processed_at": null,
            "process_order_details": null,
            "country": country,
            "is_amended": false,
            "amended_by": null,
            "amended_at": null,
            "delivery_image": null,
            "delivery_details": null,
            "order_summary": null,
            "doc_number": null,
            "attachments": [],
            "updated_at": "2026-10-01T08:00:00Z"
        })
    }

    pub fn profile_row(user_id: &str, email: &str, role: &str, countries: &[&str]) -> serde_json::Value {
        json!({
            "id": user_id,
            "username": email.split('@').next().unwrap_or(email),
            "name": email,
            "email": email,
            "role": role,
            "departments": ["Orthopedics"],
            "countries": countries,
            "enabled": true
        })
    }

    pub fn send_email_ok() -> serde_json::Value {
        json!({ "success": true })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "error": {
                "message": message,
                "code": code
            }
        })
    }
}
