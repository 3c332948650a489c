use std::collections::HashSet;

use tracing::debug;

use case_booking_cell::{CaseBooking, UserProfile};

use crate::models::RecipientConfig;

/// Resolves the e-mail recipients of a rule for one case.
///
/// Pure and deterministic: the same inputs always yield the same addresses
/// in the same order (first-seen, case-insensitively de-duplicated).
pub struct RecipientResolver<'a> {
    config: &'a RecipientConfig,
    case: &'a CaseBooking,
}

impl<'a> RecipientResolver<'a> {
    pub fn new(config: &'a RecipientConfig, case: &'a CaseBooking) -> Self {
        Self { config, case }
    }

    pub fn resolve(&self, users: &[UserProfile]) -> Vec<String> {
        let mut candidates: Vec<&str> = users
            .iter()
            .filter(|user| self.is_recipient(user))
            .filter_map(|user| user.email.as_deref())
            .collect();

        if self.config.include_submitter {
            if let Some(email) = self.submitter_email(users) {
                candidates.push(email);
            }
        }

        let recipients = dedupe(candidates);
        debug!(
            case_id = %self.case.id,
            count = recipients.len(),
            "Resolved notification recipients"
        );
        recipients
    }

    fn is_recipient(&self, user: &UserProfile) -> bool {
        if !self.is_reachable(user) || !self.has_country_access(user) {
            return false;
        }
        if self.is_member(user) {
            return true;
        }
        self.has_role(user) && self.passes_department_checks(user)
    }

    fn is_reachable(&self, user: &UserProfile) -> bool {
        user.enabled && user.email.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    fn has_country_access(&self, user: &UserProfile) -> bool {
        (user.is_admin() && self.config.admin_global_access) || user.has_country(&self.case.country)
    }

    fn is_member(&self, user: &UserProfile) -> bool {
        self.config.members.iter().any(|member| {
            member == &user.id
                || user
                    .email
                    .as_deref()
                    .is_some_and(|email| email.eq_ignore_ascii_case(member))
        })
    }

    fn has_role(&self, user: &UserProfile) -> bool {
        self.config.roles.iter().any(|role| role.eq_ignore_ascii_case(&user.role))
    }

    fn passes_department_checks(&self, user: &UserProfile) -> bool {
        if user.is_admin() && self.config.admin_override {
            return true;
        }

        let filter_ok = self.config.department_filter.is_empty()
            || self
                .config
                .department_filter
                .iter()
                .any(|department| user.has_department(department));
        let same_department_ok =
            !self.config.require_same_department || user.has_department(&self.case.department);

        filter_ok && same_department_ok
    }

    /// The submitter is recorded by display name, so match on any identifier.
    fn submitter_email<'u>(&self, users: &'u [UserProfile]) -> Option<&'u str> {
        let submitter = self.case.submitted_by.as_str();
        users
            .iter()
            .find(|user| {
                user.name == submitter
                    || user.username == submitter
                    || user.id == submitter
                    || user.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(submitter))
            })
            .filter(|user| self.is_reachable(user) && self.has_country_access(user))
            .and_then(|user| user.email.as_deref())
    }
}

fn dedupe(candidates: Vec<&str>) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .map(str::trim)
        .filter(|email| seen.insert(email.to_lowercase()))
        .map(str::to_string)
        .collect()
}
