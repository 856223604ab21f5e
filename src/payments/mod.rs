//! Stripe payment links for invoices.
//!
//! A persistent Payment Link is preferred. When Stripe refuses it the client
//! falls back to a Checkout Session, which expires but always accepts inline
//! price data.

use reqwest::Client;
use serde::Deserialize;

use crate::config::StripeConfig;
use crate::errors::AppError;
use crate::models::Invoice;

const DEFAULT_SUCCESS_URL: &str = "https://example.com/thanks";

/// Outcome of [`StripeClient::create_or_get_payment_link`].
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentLink {
    pub url: String,
    pub link_id: Option<String>,
    pub session_id: Option<String>,
    /// False when the invoice already carried a link.
    pub created: bool,
}

#[derive(Debug, Deserialize)]
struct StripeObject {
    id: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
}

/// Minimal Stripe REST client.
#[derive(Clone)]
pub struct StripeClient {
    http: Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Result<Self, AppError> {
        let http = Client::builder()
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build Stripe client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn is_configured(&self) -> bool {
        self.config.secret_key.is_some()
    }

    /// Return the invoice's payment URL, creating one at Stripe when missing.
    pub async fn create_or_get_payment_link(
        &self,
        invoice: &Invoice,
        success_url: Option<&str>,
    ) -> Result<PaymentLink, AppError> {
        let api_key = self.config.secret_key.as_deref().ok_or_else(|| {
            AppError::Payment("Stripe not configured: set STRIPE_SECRET_KEY (or STRIPE_API_KEY).".to_string())
        })?;

        if let Some(url) = invoice.stripe_payment_url.as_deref().filter(|u| !u.is_empty()) {
            return Ok(PaymentLink {
                url: url.to_string(),
                link_id: invoice.stripe_payment_link_id.clone(),
                session_id: invoice.stripe_checkout_session_id.clone(),
                created: false,
            });
        }

        if !invoice.gross_total.is_positive() {
            return Err(AppError::Payment(
                "Invoice amount must be greater than zero to create a payment link.".to_string(),
            ));
        }
        let amount_minor = invoice.gross_total.to_minor_units(&invoice.currency);
        if amount_minor <= 0 {
            return Err(AppError::Payment(
                "Invoice amount is below Stripe minimum for this currency.".to_string(),
            ));
        }

        let currency = match invoice.currency.trim() {
            "" => "eur".to_string(),
            c => c.to_lowercase(),
        };
        let success_url = success_url
            .filter(|u| !u.is_empty())
            .or(self.config.success_url.as_deref())
            .unwrap_or(DEFAULT_SUCCESS_URL)
            .to_string();
        let cancel_url = self
            .config
            .cancel_url
            .clone()
            .unwrap_or_else(|| success_url.clone());

        let mut common = vec![
            ("line_items[0][price_data][currency]".to_string(), currency),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                format!("Invoice {}", invoice.invoice_no),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                amount_minor.to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("metadata[invoice_id]".to_string(), invoice.id.to_string()),
            ("metadata[invoice_no]".to_string(), invoice.invoice_no.clone()),
        ];

        let mut link_form = common.clone();
        link_form.push(("after_completion[type]".to_string(), "redirect".to_string()));
        link_form.push(("after_completion[redirect][url]".to_string(), success_url.clone()));
        link_form.push(("allow_promotion_codes".to_string(), "false".to_string()));

        match self.post(api_key, "/v1/payment_links", &link_form).await {
            Ok(link) => {
                if let Some(url) = link.url {
                    return Ok(PaymentLink {
                        url,
                        link_id: link.id,
                        session_id: None,
                        created: true,
                    });
                }
                tracing::warn!("Stripe payment link for {} came back without url", invoice.invoice_no);
            }
            Err(e) => {
                tracing::warn!(
                    "Stripe payment link for {} failed, trying checkout session: {}",
                    invoice.invoice_no,
                    e
                );
            }
        }

        common.push(("mode".to_string(), "payment".to_string()));
        common.push(("success_url".to_string(), success_url));
        common.push(("cancel_url".to_string(), cancel_url));

        let session = self
            .post(api_key, "/v1/checkout/sessions", &common)
            .await
            .map_err(|e| AppError::Payment(format!("Stripe error: {}", e)))?;
        let url = session
            .url
            .ok_or_else(|| AppError::Payment("Stripe error: checkout session has no url".to_string()))?;

        Ok(PaymentLink {
            url,
            link_id: None,
            session_id: session.id,
            created: true,
        })
    }

    /// POST a form to Stripe. Errors carry Stripe's own message when it sends one.
    async fn post(
        &self,
        api_key: &str,
        path: &str,
        form: &[(String, String)],
    ) -> Result<StripeObject, String> {
        let url = format!("{}{}", self.config.api_base.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .form(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let body = response.text().await.map_err(|e| e.to_string())?;
        if !status.is_success() {
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .ok()
                .and_then(|b| b.error.message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            return Err(message);
        }
        serde_json::from_str(&body).map_err(|e| e.to_string())
    }
}
