use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::{encode_filter_value, SupabaseClient};

use crate::error::CaseBookingError;
use crate::models::{
    AmendmentHistoryEntry, CaseBooking, CaseQuantity, CaseReference, StatusHistoryEntry, UserProfile,
};
use crate::services::mapper::{CaseRowMapper, SchemaVersion};

pub const CASES_TABLE: &str = "case_bookings";
pub const STATUS_HISTORY_TABLE: &str = "status_history";
pub const AMENDMENT_HISTORY_TABLE: &str = "amendment_history";
pub const QUANTITIES_TABLE: &str = "case_booking_quantities";
pub const PROFILES_TABLE: &str = "profiles";

const QUANTITY_KEY: &str = "case_id,item_type,item_name";

/// Single data-access interface for cases, histories and users.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert_case(&self, case: &CaseBooking, quantities: &[CaseQuantity]) -> Result<CaseBooking, CaseBookingError>;

    async fn update_case(&self, case: &CaseBooking) -> Result<CaseBooking, CaseBookingError>;

    /// Persists the status columns of `case` and appends `entry` to its history.
    async fn update_case_status(&self, case: &CaseBooking, entry: &StatusHistoryEntry) -> Result<(), CaseBookingError>;

    async fn record_amendment(&self, case: &CaseBooking, entry: &AmendmentHistoryEntry) -> Result<(), CaseBookingError>;

    async fn insert_status_history(&self, entry: &StatusHistoryEntry) -> Result<(), CaseBookingError>;

    async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseBooking>, CaseBookingError>;

    async fn list_cases(&self, country: Option<&str>) -> Result<Vec<CaseBooking>, CaseBookingError>;

    async fn get_case_quantities(&self, case_id: Uuid) -> Result<Vec<CaseQuantity>, CaseBookingError>;

    /// Next free reference sequence number for a country.
    async fn next_case_sequence(&self, country: &str) -> Result<u32, CaseBookingError>;

    async fn list_users(&self) -> Result<Vec<UserProfile>, CaseBookingError>;

    async fn insert_user(&self, user: &UserProfile) -> Result<UserProfile, CaseBookingError>;

    async fn update_user(&self, user: &UserProfile) -> Result<UserProfile, CaseBookingError>;

    /// Reachability check used by the offline health probe.
    async fn ping(&self) -> Result<(), CaseBookingError>;
}

pub struct SupabaseBookingRepository {
    supabase: SupabaseClient,
    auth_token: String,
    mapper: CaseRowMapper,
}

impl SupabaseBookingRepository {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_schema(config, SchemaVersion::default())
    }

    pub fn with_schema(config: &AppConfig, version: SchemaVersion) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            auth_token: config.service_token().to_string(),
            mapper: CaseRowMapper::new(version),
        }
    }

    fn token(&self) -> Option<&str> {
        Some(self.auth_token.as_str())
    }

    fn first_row(rows: Vec<Value>, what: &str) -> Result<Value, CaseBookingError> {
        rows.into_iter()
            .next()
            .ok_or_else(|| CaseBookingError::Mapping(format!("{} write returned no rows", what)))
    }

    async fn load_histories(&self, case: &mut CaseBooking) -> Result<(), CaseBookingError> {
        let filter = format!("case_id=eq.{}&order=timestamp.asc", case.id);

        let status_rows = self.supabase.select(STATUS_HISTORY_TABLE, &filter, self.token()).await?;
        case.status_history = status_rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()?;

        let amendment_rows = self.supabase.select(AMENDMENT_HISTORY_TABLE, &filter, self.token()).await?;
        case.amendment_history = amendment_rows
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<_, _>>()?;

        Ok(())
    }
}

#[async_trait]
impl BookingRepository for SupabaseBookingRepository {
    #[instrument(skip(self, case, quantities), fields(case_id = %case.id))]
    async fn insert_case(&self, case: &CaseBooking, quantities: &[CaseQuantity]) -> Result<CaseBooking, CaseBookingError> {
        debug!("Inserting case {}", case.case_reference_number);

        // Replayed creates from the sync queue must not trip the primary keys
        let row = self.mapper.to_row(case)?;
        let stored = Self::first_row(self.supabase.upsert(CASES_TABLE, "id", self.token(), row).await?, "case")?;
        let mut stored = self.mapper.from_row(&stored)?;

        for entry in &case.status_history {
            self.insert_status_history(entry).await?;
        }
        stored.status_history = case.status_history.clone();

        if !quantities.is_empty() {
            self.supabase
                .upsert(QUANTITIES_TABLE, QUANTITY_KEY, self.token(), serde_json::to_value(quantities)?)
                .await?;
        }

        info!("Case {} created", stored.case_reference_number);
        Ok(stored)
    }

    async fn update_case(&self, case: &CaseBooking) -> Result<CaseBooking, CaseBookingError> {
        let row = self.mapper.to_row(case)?;
        let filter = format!("id=eq.{}", case.id);
        let stored = Self::first_row(self.supabase.update(CASES_TABLE, &filter, self.token(), row).await?, "case")?;

        let mut stored = self.mapper.from_row(&stored)?;
        stored.status_history = case.status_history.clone();
        stored.amendment_history = case.amendment_history.clone();
        Ok(stored)
    }

    #[instrument(skip(self, case, entry), fields(case_id = %case.id, status = %entry.status))]
    async fn update_case_status(&self, case: &CaseBooking, entry: &StatusHistoryEntry) -> Result<(), CaseBookingError> {
        let patch = json!({
            "status": case.status,
            "processed_by": case.processed_by,
            "processed_at": case.processed_at,
            "process_order_details": case.process_order_details,
            "delivery_image": case.delivery_image,
            "delivery_details": case.delivery_details,
            "order_summary": case.order_summary,
            "doc_number": case.doc_number,
            "attachments": case.attachments,
            "updated_at": case.updated_at,
        });
        let filter = format!("id=eq.{}", case.id);
        self.supabase.update(CASES_TABLE, &filter, self.token(), patch).await?;
        self.insert_status_history(entry).await?;

        debug!("Case status persisted");
        Ok(())
    }

    async fn record_amendment(&self, case: &CaseBooking, entry: &AmendmentHistoryEntry) -> Result<(), CaseBookingError> {
        self.update_case(case).await?;
        self.supabase
            .insert(AMENDMENT_HISTORY_TABLE, self.token(), serde_json::to_value(entry)?)
            .await?;
        Ok(())
    }

    async fn insert_status_history(&self, entry: &StatusHistoryEntry) -> Result<(), CaseBookingError> {
        self.supabase
            .upsert(STATUS_HISTORY_TABLE, "id", self.token(), serde_json::to_value(entry)?)
            .await?;
        Ok(())
    }

    async fn get_case(&self, case_id: Uuid) -> Result<Option<CaseBooking>, CaseBookingError> {
        let rows = self
            .supabase
            .select(CASES_TABLE, &format!("id=eq.{}", case_id), self.token())
            .await?;

        match rows.first() {
            Some(row) => {
                let mut case = self.mapper.from_row(row)?;
                self.load_histories(&mut case).await?;
                Ok(Some(case))
            }
            None => Ok(None),
        }
    }

    async fn list_cases(&self, country: Option<&str>) -> Result<Vec<CaseBooking>, CaseBookingError> {
        let query = match country {
            Some(country) => format!("country=eq.{}&order=date_of_surgery.asc", encode_filter_value(country)),
            None => "order=date_of_surgery.asc".to_string(),
        };

        self.supabase
            .select(CASES_TABLE, &query, self.token())
            .await?
            .iter()
            .map(|row| self.mapper.from_row(row))
            .collect()
    }

    async fn get_case_quantities(&self, case_id: Uuid) -> Result<Vec<CaseQuantity>, CaseBookingError> {
        let rows = self
            .supabase
            .select(QUANTITIES_TABLE, &format!("case_id=eq.{}", case_id), self.token())
            .await?;

        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(CaseBookingError::from))
            .collect()
    }

    async fn next_case_sequence(&self, country: &str) -> Result<u32, CaseBookingError> {
        let query = format!(
            "select=case_reference_number&country=eq.{}&order=submitted_at.desc&limit=1",
            encode_filter_value(country)
        );
        let rows = self.supabase.select(CASES_TABLE, &query, self.token()).await?;

        let last = rows
            .first()
            .and_then(|row| row.get("case_reference_number"))
            .and_then(Value::as_str)
            .and_then(CaseReference::sequence_of)
            .unwrap_or(0);
        Ok(last + 1)
    }

    async fn list_users(&self) -> Result<Vec<UserProfile>, CaseBookingError> {
        self.supabase
            .select(PROFILES_TABLE, "", self.token())
            .await?
            .iter()
            .map(|row| self.mapper.user_from_row(row))
            .collect()
    }

    async fn insert_user(&self, user: &UserProfile) -> Result<UserProfile, CaseBookingError> {
        let row = self.mapper.user_to_row(user)?;
        let stored = Self::first_row(self.supabase.insert(PROFILES_TABLE, self.token(), row).await?, "profile")?;
        self.mapper.user_from_row(&stored)
    }

    async fn update_user(&self, user: &UserProfile) -> Result<UserProfile, CaseBookingError> {
        let row = self.mapper.user_to_row(user)?;
        let filter = format!("id=eq.{}", encode_filter_value(&user.id));
        let stored = Self::first_row(
            self.supabase.update(PROFILES_TABLE, &filter, self.token(), row).await?,
            "profile",
        )?;
        self.mapper.user_from_row(&stored)
    }

    async fn ping(&self) -> Result<(), CaseBookingError> {
        self.supabase.health_check(self.token()).await?;
        Ok(())
    }
}
