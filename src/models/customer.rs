//! Course registrations (customers) and their enrollment state.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Manually settable enrollment states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnrollmentStatus {
    Pending,
    Accepted,
    Rejected,
    Waitlist,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Accepted => "accepted",
            EnrollmentStatus::Rejected => "rejected",
            EnrollmentStatus::Waitlist => "waitlist",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(EnrollmentStatus::Pending),
            "accepted" => Some(EnrollmentStatus::Accepted),
            "rejected" => Some(EnrollmentStatus::Rejected),
            "waitlist" => Some(EnrollmentStatus::Waitlist),
            _ => None,
        }
    }
}

/// A row of the `registrations` table.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Registration {
    pub id: i64,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub user_email: Option<String>,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub gender_other_note: Option<String>,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub job_title: Option<String>,
    pub company: Option<String>,
    pub ai_current_involvement: Option<String>,
    pub ai_goals_wish_to_achieve: Option<String>,
    pub ai_datasets_available: Option<String>,
    pub referral_source: Option<String>,
    pub referral_details: Option<String>,
    pub reason_choose_us: Option<String>,
    pub invoice_name: Option<String>,
    pub invoice_company: Option<String>,
    pub invoice_vat_id: Option<String>,
    pub invoice_email: Option<String>,
    pub invoice_phone: Option<String>,
    pub invoice_addr_line1: Option<String>,
    pub invoice_addr_line2: Option<String>,
    pub invoice_city: Option<String>,
    pub invoice_state: Option<String>,
    pub invoice_postal_code: Option<String>,
    pub invoice_country: Option<String>,
    pub course_session_code: Option<String>,
    pub notes: Option<String>,
    pub consent_contact_ok: bool,
    pub consent_marketing_ok: bool,
    pub data_processing_ok: bool,
    pub enrollment_status: String,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn join_address(
    line1: &Option<String>,
    line2: &Option<String>,
    city: &Option<String>,
    state: &Option<String>,
    postcode: &Option<String>,
    country: &Option<String>,
) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.extend(present(line1).map(str::to_string));
    parts.extend(present(line2).map(str::to_string));
    let city_line: Vec<&str> = [present(city), present(state)].into_iter().flatten().collect();
    if !city_line.is_empty() {
        parts.push(city_line.join(" "));
    }
    parts.extend(present(postcode).map(str::to_string));
    parts.extend(present(country).map(str::to_string));
    parts.join("\n")
}

impl Registration {
    pub fn full_name(&self) -> String {
        match present(&self.middle_name) {
            Some(middle) => format!("{} {} {}", self.first_name, middle, self.last_name)
                .trim()
                .to_string(),
            None => format!("{} {}", self.first_name, self.last_name).trim().to_string(),
        }
    }

    /// Avatar letter, `?` for nameless rows.
    pub fn initial(&self) -> String {
        self.full_name()
            .chars()
            .next()
            .map(|c| c.to_uppercase().to_string())
            .unwrap_or_else(|| "?".to_string())
    }

    /// Multi-line address. The invoice address is preferred and the personal
    /// address is used when it is empty.
    pub fn compose_address(&self, use_invoice: bool) -> String {
        if use_invoice {
            let invoice = join_address(
                &self.invoice_addr_line1,
                &self.invoice_addr_line2,
                &self.invoice_city,
                &self.invoice_state,
                &self.invoice_postal_code,
                &self.invoice_country,
            );
            if !invoice.trim().is_empty() {
                return invoice;
            }
        }
        join_address(
            &self.address_line1,
            &self.address_line2,
            &self.city,
            &self.state,
            &self.postal_code,
            &self.country,
        )
    }

    /// Invoice header values taken from this registration.
    pub fn prefill(&self) -> CustomerPrefill {
        let client_name = present(&self.invoice_company)
            .or_else(|| present(&self.invoice_name))
            .map(str::to_string)
            .unwrap_or_else(|| self.full_name())
            .trim()
            .to_string();
        let client_address = match self.compose_address(true) {
            addr if addr.is_empty() => self.compose_address(false),
            addr => addr,
        };
        CustomerPrefill {
            client_name,
            client_vat_number: self.invoice_vat_id.clone().unwrap_or_default().trim().to_string(),
            client_address,
            customer_registration_id: self.id,
        }
    }

    /// `Jane Doe (Acme) · jane@example.com`
    pub fn lookup_label(&self) -> String {
        let mut parts = vec![self.full_name()];
        if let Some(company) = present(&self.company) {
            parts.push(format!("({})", company));
        }
        if let Some(email) = present(&self.user_email) {
            parts.push(format!("· {}", email));
        }
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string()
    }

    /// Stored status combined with the settled-invoice rule.
    pub fn effective_status(&self, has_settled_invoice: bool) -> EffectiveStatus {
        let base = match self.enrollment_status.trim() {
            "" => "pending".to_string(),
            s => s.to_lowercase(),
        };
        if base == "accepted" || has_settled_invoice {
            EffectiveStatus {
                effective: "accepted".to_string(),
                via_invoice: has_settled_invoice && base != "accepted",
            }
        } else {
            EffectiveStatus {
                effective: base,
                via_invoice: false,
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CustomerPrefill {
    pub client_name: String,
    pub client_vat_number: String,
    pub client_address: String,
    pub customer_registration_id: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EffectiveStatus {
    pub effective: String,
    pub via_invoice: bool,
}

/// Summary of all invoices issued to one registration.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InvoiceBadge {
    pub badge: String,
    pub count: i64,
}

impl InvoiceBadge {
    /// Best summary across a set of (upper-cased) invoice statuses.
    pub fn summarize(statuses: &BTreeSet<String>, count: i64) -> Self {
        let has = |s: &str| statuses.contains(s);
        let badge = if statuses.is_empty() {
            "none".to_string()
        } else if has("PAID") || has("CLOSED") {
            "closed".to_string()
        } else if has("PARTIAL") {
            "partial".to_string()
        } else if has("DUE") {
            "due".to_string()
        } else if has("SENT") {
            "sent".to_string()
        } else if has("DRAFT") {
            "draft".to_string()
        } else if has("VOID") {
            "void".to_string()
        } else {
            statuses
                .iter()
                .next()
                .map(|s| s.to_lowercase())
                .unwrap_or_else(|| "none".to_string())
        };
        Self { badge, count }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CustomerListQuery {
    pub q: String,
    pub session: String,
    pub referral: String,
    pub page: Option<i64>,
    pub size: Option<i64>,
}

/// Normalised filters for the registrations list.
#[derive(Debug, Clone, Default)]
pub struct CustomerFilter {
    pub q: String,
    pub session: String,
    pub referral: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerListItem {
    #[serde(flatten)]
    pub registration: Registration,
    pub full_name: String,
    pub effective_status: EffectiveStatus,
    pub invoice_badge: InvoiceBadge,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerPage {
    pub customers: Vec<CustomerListItem>,
    pub q: String,
    pub session: String,
    pub referral: String,
    pub page: i64,
    pub pages: i64,
    pub size: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Consents {
    pub contact_ok: bool,
    pub marketing_ok: bool,
    pub data_ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerDetail {
    pub registration: Registration,
    pub full_name: String,
    pub initial: String,
    pub consents: Consents,
    pub effective_status: String,
    pub accepted_via_invoice: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct SetStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CustomerLookupQuery {
    pub q: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomerLookupResult {
    pub id: i64,
    pub label: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub client_name: String,
    pub client_vat_number: String,
    pub client_address: String,
}

impl CustomerLookupResult {
    pub fn from_registration(reg: &Registration) -> Self {
        let prefill = reg.prefill();
        Self {
            id: reg.id,
            label: reg.lookup_label(),
            email: reg.user_email.clone(),
            company: reg.company.clone(),
            client_name: prefill.client_name,
            client_vat_number: prefill.client_vat_number,
            client_address: prefill.client_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registration() -> Registration {
        Registration {
            id: 3,
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            enrollment_status: "pending".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_full_name_with_and_without_middle() {
        let mut reg = registration();
        assert_eq!(reg.full_name(), "Jane Doe");
        reg.middle_name = Some("van".to_string());
        assert_eq!(reg.full_name(), "Jane van Doe");
        assert_eq!(reg.initial(), "J");
    }

    #[test]
    fn test_address_prefers_invoice_then_personal() {
        let mut reg = registration();
        reg.address_line1 = Some("Main St 1".to_string());
        reg.city = Some("Utrecht".to_string());
        reg.state = Some("UT".to_string());
        reg.postal_code = Some("3511AA".to_string());
        assert_eq!(reg.compose_address(true), "Main St 1\nUtrecht UT\n3511AA");

        reg.invoice_addr_line1 = Some("Billing Rd 9".to_string());
        reg.invoice_country = Some("Netherlands".to_string());
        assert_eq!(reg.compose_address(true), "Billing Rd 9\nNetherlands");
    }

    #[test]
    fn test_prefill_name_chain() {
        let mut reg = registration();
        assert_eq!(reg.prefill().client_name, "Jane Doe");
        reg.invoice_name = Some("J. Doe".to_string());
        assert_eq!(reg.prefill().client_name, "J. Doe");
        reg.invoice_company = Some("Doe Consulting".to_string());
        reg.invoice_vat_id = Some(" NL123B01 ".to_string());
        let prefill = reg.prefill();
        assert_eq!(prefill.client_name, "Doe Consulting");
        assert_eq!(prefill.client_vat_number, "NL123B01");
        assert_eq!(prefill.customer_registration_id, 3);
    }

    #[test]
    fn test_effective_status() {
        let mut reg = registration();
        assert_eq!(
            reg.effective_status(true),
            EffectiveStatus { effective: "accepted".to_string(), via_invoice: true }
        );
        assert_eq!(reg.effective_status(false).effective, "pending");

        reg.enrollment_status = "Accepted".to_string();
        assert!(!reg.effective_status(true).via_invoice);

        reg.enrollment_status = String::new();
        assert_eq!(reg.effective_status(false).effective, "pending");
    }

    #[test]
    fn test_badge_priority() {
        let set = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>();
        assert_eq!(InvoiceBadge::summarize(&set(&[]), 0).badge, "none");
        assert_eq!(InvoiceBadge::summarize(&set(&["SENT", "PAID"]), 2).badge, "closed");
        assert_eq!(InvoiceBadge::summarize(&set(&["SENT", "PARTIAL"]), 2).badge, "partial");
        assert_eq!(InvoiceBadge::summarize(&set(&["DRAFT", "VOID"]), 2).badge, "draft");
        assert_eq!(InvoiceBadge::summarize(&set(&["ODD"]), 1).badge, "odd");
    }

    #[test]
    fn test_lookup_label() {
        let mut reg = registration();
        reg.company = Some("Acme".to_string());
        reg.user_email = Some("jane@example.com".to_string());
        assert_eq!(reg.lookup_label(), "Jane Doe (Acme) · jane@example.com");
    }
}
