//! Public course registration form.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::truthy;
use crate::config::CourseConfig;

pub const JOB_ROLES: [&str; 10] = [
    "Student",
    "Software Engineer / Developer",
    "Data Analyst / Data Scientist",
    "Product Manager",
    "Researcher / Academic",
    "Business Owner / Founder",
    "Marketing / Growth",
    "Operations / Supply Chain",
    "Finance / Analyst",
    "Other",
];

pub const GENDER_CHOICES: [&str; 3] = ["Female", "Male", "Prefer not to say"];

pub const REFERRAL_CHOICES: [&str; 10] = [
    "Search",
    "YouTube",
    "TikTok/Instagram",
    "X/Twitter",
    "LinkedIn",
    "Friend/Colleague",
    "Event/Conference",
    "Partner",
    "Newsletter",
    "Other",
];

/// Long free-text answers are clipped to this many characters.
pub const MAXLEN_LONG: usize = 500;

/// A course session open for registration.
#[derive(Debug, Clone, Serialize)]
pub struct CourseOffer {
    pub code: &'static str,
    pub title: &'static str,
    pub price_eur: i64,
}

pub const COURSE_CODE: &str = "AML-RTD";
pub const COURSE_TITLE: &str = "Advanced Machine Learning and Real-Time Deployment";

/// Everything the registration page needs to render.
#[derive(Debug, Clone, Serialize)]
pub struct CoursePage {
    pub brand_name: String,
    pub brand_logo_url: String,
    pub powered_by: String,
    pub signed_in: bool,
    pub user_email: Option<String>,
    pub genders: Vec<&'static str>,
    pub referrals: Vec<&'static str>,
    pub job_roles: Vec<&'static str>,
    pub courses: Vec<CourseOffer>,
    pub base_price_eur: i64,
    pub promo_code: String,
    pub promo_price_eur: i64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CourseSigninRequest {
    pub access_code: Option<String>,
    pub user_email: Option<String>,
}

/// Raw registration form. Checkbox fields accept booleans or `on`/`1`/`true`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CourseRegistrationRequest {
    pub user_email: Option<String>,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub age: Option<serde_json::Value>,
    pub gender: Option<String>,
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
    pub promo_code: Option<String>,
    pub notes: Option<String>,
    pub consent_contact_ok: Option<serde_json::Value>,
    pub consent_marketing_ok: Option<serde_json::Value>,
    pub data_processing_ok: Option<serde_json::Value>,
    pub billing_same_as_personal: Option<serde_json::Value>,
}

/// Validated registration ready to insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewRegistration {
    pub user_email: Option<String>,
    pub first_name: String,
    pub middle_name: Option<String>,
    pub last_name: String,
    pub age: Option<i64>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub address_line1: Option<String>,
    pub address_line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
    pub job_title: String,
    pub company: Option<String>,
    pub ai_current_involvement: Option<String>,
    pub ai_goals_wish_to_achieve: Option<String>,
    pub ai_datasets_available: Option<String>,
    pub referral_source: Option<String>,
    pub referral_details: String,
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
    pub course_session_code: String,
    pub notes: Option<String>,
    pub consent_contact_ok: bool,
    pub consent_marketing_ok: bool,
    pub data_processing_ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationReceipt {
    pub id: i64,
    pub final_price_eur: i64,
    pub applied_promo: Option<String>,
}

/// Trimmed text, `None` when blank.
fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn clip_long(value: &Option<String>) -> Option<String> {
    clean(value).map(|v| v.chars().take(MAXLEN_LONG).collect())
}

/// Offers currently open for registration.
pub fn course_offers(pricing: &CourseConfig) -> Vec<CourseOffer> {
    vec![CourseOffer {
        code: COURSE_CODE,
        title: COURSE_TITLE,
        price_eur: pricing.base_price_eur,
    }]
}

/// Final price and the promo code that produced it, if any.
pub fn compute_price(promo_input: Option<&str>, pricing: &CourseConfig) -> (i64, Option<String>) {
    match promo_input {
        Some(code) if code.trim().eq_ignore_ascii_case(&pricing.promo_code) => {
            (pricing.promo_price_eur, Some(pricing.promo_code.clone()))
        }
        _ => (pricing.base_price_eur, None),
    }
}

fn parse_age(value: Option<&Value>, errors: &mut Vec<String>) -> Option<i64> {
    let age = match value {
        None | Some(Value::Null) => return None,
        Some(Value::String(s)) if s.trim().is_empty() => return None,
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        Some(Value::Number(n)) => n.as_i64(),
        Some(_) => None,
    };
    match age {
        Some(age) if (10..=120).contains(&age) => Some(age),
        Some(age) => {
            errors.push("Age must be between 10 and 120.".to_string());
            Some(age)
        }
        None => {
            errors.push("Age must be a whole number.".to_string());
            None
        }
    }
}

impl CourseRegistrationRequest {
    /// Validate and normalise the form. `session_email` fills a missing email.
    /// Returns every failed rule at once.
    pub fn validate(
        &self,
        pricing: &CourseConfig,
        session_email: Option<&str>,
    ) -> Result<(NewRegistration, RegistrationReceipt), Vec<String>> {
        let mut errors = Vec::new();

        let first_name = clean(&self.first_name);
        let last_name = clean(&self.last_name);
        if first_name.is_none() {
            errors.push("First name is required.".to_string());
        }
        if last_name.is_none() {
            errors.push("Last name is required.".to_string());
        }

        let age = parse_age(self.age.as_ref(), &mut errors);

        let course_session_code = clean(&self.course_session_code);
        let known_course = course_session_code
            .as_deref()
            .is_some_and(|code| course_offers(pricing).iter().any(|c| c.code == code));
        if !known_course {
            errors.push("Please select a valid course.".to_string());
        }

        let (final_price_eur, applied_promo) = compute_price(clean(&self.promo_code).as_deref(), pricing);

        let data_processing_ok = truthy(self.data_processing_ok.as_ref(), false);
        if !data_processing_ok {
            errors.push("You must consent to data processing to register.".to_string());
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let gender = clean(&self.gender).filter(|g| GENDER_CHOICES.contains(&g.as_str()));
        let referral_source =
            clean(&self.referral_source).filter(|r| REFERRAL_CHOICES.contains(&r.as_str()));
        let job_title = clean(&self.job_title)
            .filter(|j| JOB_ROLES.contains(&j.as_str()))
            .unwrap_or_else(|| "Other".to_string());

        let referral_details = match &applied_promo {
            Some(promo) => format!("PROMO:{};PRICE_EUR:{}", promo, final_price_eur),
            None => format!("PRICE_EUR:{}", final_price_eur),
        };

        let first_name = first_name.unwrap_or_default();
        let last_name = last_name.unwrap_or_default();

        let mut reg = NewRegistration {
            user_email: clean(&self.user_email).or_else(|| session_email.map(str::to_string)),
            middle_name: clean(&self.middle_name),
            age,
            gender,
            phone: clean(&self.phone),
            address_line1: clean(&self.address_line1),
            address_line2: clean(&self.address_line2),
            city: clean(&self.city),
            state: clean(&self.state),
            postal_code: clean(&self.postal_code),
            country: clean(&self.country),
            job_title,
            company: clean(&self.company),
            ai_current_involvement: clip_long(&self.ai_current_involvement),
            ai_goals_wish_to_achieve: clip_long(&self.ai_goals_wish_to_achieve),
            ai_datasets_available: clip_long(&self.ai_datasets_available),
            referral_source,
            referral_details,
            reason_choose_us: clip_long(&self.reason_choose_us),
            invoice_name: clean(&self.invoice_name),
            invoice_company: clean(&self.invoice_company),
            invoice_vat_id: clean(&self.invoice_vat_id),
            invoice_email: clean(&self.invoice_email),
            invoice_phone: clean(&self.invoice_phone),
            invoice_addr_line1: clean(&self.invoice_addr_line1),
            invoice_addr_line2: clean(&self.invoice_addr_line2),
            invoice_city: clean(&self.invoice_city),
            invoice_state: clean(&self.invoice_state),
            invoice_postal_code: clean(&self.invoice_postal_code),
            invoice_country: clean(&self.invoice_country),
            course_session_code: course_session_code.unwrap_or_default(),
            notes: clip_long(&self.notes),
            consent_contact_ok: truthy(self.consent_contact_ok.as_ref(), false),
            consent_marketing_ok: truthy(self.consent_marketing_ok.as_ref(), false),
            data_processing_ok,
            first_name,
            last_name,
        };

        if truthy(self.billing_same_as_personal.as_ref(), false) {
            reg.fill_billing_from_personal();
        }

        Ok((
            reg,
            RegistrationReceipt {
                id: 0,
                final_price_eur,
                applied_promo,
            },
        ))
    }
}

impl NewRegistration {
    /// Copy personal contact details into every empty billing field.
    pub fn fill_billing_from_personal(&mut self) {
        fn fill(target: &mut Option<String>, source: &Option<String>) {
            if target.is_none() {
                *target = source.clone();
            }
        }
        let full_name = [self.first_name.as_str(), self.last_name.as_str()]
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if self.invoice_name.is_none() && !full_name.is_empty() {
            self.invoice_name = Some(full_name);
        }
        fill(&mut self.invoice_email, &self.user_email);
        fill(&mut self.invoice_phone, &self.phone);
        fill(&mut self.invoice_addr_line1, &self.address_line1);
        fill(&mut self.invoice_addr_line2, &self.address_line2);
        fill(&mut self.invoice_city, &self.city);
        fill(&mut self.invoice_state, &self.state);
        fill(&mut self.invoice_postal_code, &self.postal_code);
        fill(&mut self.invoice_country, &self.country);
    }
}

impl RegistrationReceipt {
    /// "Thank you! ... Final price: €439 (promo IMPACT-439)"
    pub fn message(&self) -> String {
        let mut message = format!(
            "Thank you! Your registration has been recorded. Final price: €{}",
            self.final_price_eur
        );
        if let Some(promo) = &self.applied_promo {
            message.push_str(&format!(" (promo {})", promo));
        }
        message
    }
}
