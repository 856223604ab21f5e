//! Bookkeeping rules: company defaults, invoice totals and status, quarters,
//! the VAT return and invoice compliance checks.

use chrono::{Datelike, Months, NaiveDate};

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    CompanySettings, Invoice, InvoiceLine, InvoiceLineInput, InvoiceStatus, VatScheme, VatSummary,
};
use crate::money::{Amount, Product};

/// VAT rate used when a line or expense does not name one.
pub const DEFAULT_VAT_RATE: Amount = Amount::from_units(21);

/// Supplier details used wherever the stored settings are blank.
pub struct CompanyDefaults;

impl CompanyDefaults {
    pub const COMPANY_NAME: &'static str = "Climate Resilience Fundraising Platform B.V.";
    pub const ADDRESS: &'static str = "Fluwelen Burgwal";
    pub const POSTCODE: &'static str = "2511CJ";
    pub const CITY: &'static str = "Den Haag";
    pub const COUNTRY: &'static str = "Netherlands";
    pub const KVK: &'static str = "94437289";
    pub const RSIN: &'static str = "866777398";
    pub const VAT_NUMBER: &'static str = "NL[xxxx.xxx].B01";
    pub const IBAN: &'static str = "NL06 REVO 7487 2866 30";
    pub const BIC: &'static str = "REVONL22";
    pub const INVOICE_PREFIX: &'static str = "INV";
}

/// Fill every blank company field from [`CompanyDefaults`]. Returns whether anything changed.
pub fn apply_company_defaults(company: &mut CompanySettings) -> bool {
    let mut changed = false;
    let mut fill = |field: &mut String, default: &str| {
        if field.trim().is_empty() {
            *field = default.to_string();
            changed = true;
        }
    };
    fill(&mut company.company_name, CompanyDefaults::COMPANY_NAME);
    fill(&mut company.address, CompanyDefaults::ADDRESS);
    fill(&mut company.postcode, CompanyDefaults::POSTCODE);
    fill(&mut company.city, CompanyDefaults::CITY);
    fill(&mut company.country, CompanyDefaults::COUNTRY);
    fill(&mut company.kvk, CompanyDefaults::KVK);
    fill(&mut company.rsin, CompanyDefaults::RSIN);
    fill(&mut company.vat_number, CompanyDefaults::VAT_NUMBER);
    fill(&mut company.iban, CompanyDefaults::IBAN);
    fill(&mut company.bic, CompanyDefaults::BIC);
    fill(&mut company.invoice_prefix, CompanyDefaults::INVOICE_PREFIX);
    changed
}

/// Load the company row, creating it and filling blanks with defaults.
pub async fn ensure_company(repo: &Repository) -> Result<CompanySettings, AppError> {
    let (mut company, exists) = match repo.get_company().await? {
        Some(company) => (company, true),
        None => (CompanySettings { id: 1, ..Default::default() }, false),
    };
    if apply_company_defaults(&mut company) || !exists {
        repo.save_company(&company).await?;
    }
    Ok(company)
}

/// `INV-2025-0007`
pub fn format_invoice_no(prefix: &str, year: i32, seq: i64) -> String {
    format!("{}-{}-{:04}", prefix, year, seq)
}

/// Apply the line rules of the invoice form. Fully blank lines are dropped.
pub fn normalize_line(input: &InvoiceLineInput) -> Option<InvoiceLine> {
    let description = input.description.trim();
    if description.is_empty() && input.qty.is_zero() && input.unit_price.is_zero() {
        return None;
    }
    let qty = if input.qty.is_positive() {
        input.qty
    } else {
        Amount::from_units(1)
    };
    Some(InvoiceLine {
        description: if description.is_empty() {
            "Item".to_string()
        } else {
            description.to_string()
        },
        qty,
        unit_price: input.unit_price.non_negative(),
        vat_rate: input.vat_rate.unwrap_or(DEFAULT_VAT_RATE).non_negative(),
        ..Default::default()
    })
}

/// Recompute every line and the invoice totals. Schemes without VAT keep
/// the line VAT for reference but charge none.
///
/// Line nets are summed unrounded; VAT and line totals are rounded per line,
/// half to even.
pub fn recalc_invoice(invoice: &mut Invoice, lines: &mut [InvoiceLine]) {
    let mut net = Product::default();
    let mut vat = Amount::ZERO;
    let mut gross = Amount::ZERO;
    for line in lines.iter_mut() {
        let exact_net = line.qty.times(line.unit_price);
        line.line_net = exact_net.round();
        line.line_vat = exact_net.percent(line.vat_rate);
        line.line_total = exact_net.plus(line.line_vat);
        net += exact_net;
        vat += line.line_vat;
        gross += line.line_total;
    }
    let net = net.round();
    if invoice.vat_scheme.charges_no_vat() {
        vat = Amount::ZERO;
        gross = net;
    }
    invoice.net_total = net;
    invoice.vat_total = vat;
    invoice.gross_total = gross;
    invoice.balance = gross - invoice.paid_total;
    invoice.totals_missing = false;
}

/// Recompute when a stored total was missing. Returns whether a recompute happened.
pub fn ensure_invoice_totals(invoice: &mut Invoice, lines: &mut [InvoiceLine]) -> bool {
    if invoice.totals_missing {
        recalc_invoice(invoice, lines);
        true
    } else {
        false
    }
}

/// Status implied by the amount paid so far.
pub fn status_for(paid: Amount, gross: Amount) -> InvoiceStatus {
    if paid <= Amount::ZERO {
        InvoiceStatus::Sent
    } else if paid < gross {
        InvoiceStatus::Partial
    } else {
        InvoiceStatus::Paid
    }
}

pub fn update_status(invoice: &mut Invoice) {
    invoice.status = status_for(invoice.paid_total, invoice.gross_total)
        .as_str()
        .to_string();
}

pub fn quarter_of(date: NaiveDate) -> u32 {
    (date.month() - 1) / 3 + 1
}

/// First and last day of the quarter containing `date`.
pub fn quarter_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start_month = 3 * (quarter_of(date) - 1) + 1;
    let start = NaiveDate::from_ymd_opt(date.year(), start_month, 1).unwrap_or(date);
    let end = start
        .checked_add_months(Months::new(3))
        .and_then(|next| next.pred_opt())
        .unwrap_or(start);
    (start, end)
}

/// First and last day of quarter `quarter` (1..=4) of `year`.
pub fn quarter_range(year: i32, quarter: u32) -> Result<(NaiveDate, NaiveDate), AppError> {
    if !(1..=4).contains(&quarter) {
        return Err(AppError::validation("Quarter must be between 1 and 4."));
    }
    let start = NaiveDate::from_ymd_opt(year, 3 * (quarter - 1) + 1, 1)
        .ok_or_else(|| AppError::validation(format!("Invalid year: {}", year)))?;
    Ok(quarter_bounds(start))
}

/// One invoice line with its invoice's scheme, as used by the VAT return.
#[derive(Debug, Clone)]
pub struct VatLine {
    pub vat_scheme: VatScheme,
    pub vat_rate: Amount,
    pub line_net: Amount,
    pub line_vat: Amount,
}

/// Bucket sales by rate and net VAT out against VAT paid on expenses.
pub fn summarize_vat(
    year: i32,
    quarter: u32,
    q_start: NaiveDate,
    q_end: NaiveDate,
    lines: &[VatLine],
    vat_in: Amount,
) -> VatSummary {
    let rate_21 = Amount::from_units(21);
    let rate_9 = Amount::from_units(9);

    let mut sales_21 = Amount::ZERO;
    let mut sales_9 = Amount::ZERO;
    let mut sales_0 = Amount::ZERO;
    let mut vat_out = Amount::ZERO;

    for line in lines {
        match line.vat_scheme {
            VatScheme::ReverseChargeEu => {}
            VatScheme::ZeroOutsideEu | VatScheme::Exempt => sales_0 += line.line_net,
            VatScheme::Standard => {
                if line.vat_rate == rate_21 {
                    sales_21 += line.line_net;
                } else if line.vat_rate == rate_9 {
                    sales_9 += line.line_net;
                } else {
                    sales_0 += line.line_net;
                }
                vat_out += line.line_vat;
            }
        }
    }

    VatSummary {
        year,
        quarter,
        q_start,
        q_end,
        sales_21,
        sales_9,
        sales_0,
        vat_out,
        vat_in,
        vat_due: vat_out - vat_in,
    }
}

/// Compute the VAT return for a quarter from the database.
pub async fn vat_summary(
    repo: &Repository,
    year: i32,
    quarter: u32,
) -> Result<VatSummary, AppError> {
    let (q_start, q_end) = quarter_range(year, quarter)?;
    let lines = repo.vat_lines_between(q_start, q_end).await?;
    let vat_in = repo.expense_vat_between(q_start, q_end).await?;
    Ok(summarize_vat(year, quarter, q_start, q_end, &lines, vat_in))
}

/// Split a VAT-inclusive amount into net and VAT.
pub fn split_gross(gross: Amount, rate: Amount) -> (Amount, Amount) {
    if rate <= Amount::ZERO {
        return (gross, Amount::ZERO);
    }
    let net = gross.net_from_gross(rate);
    (net, gross - net)
}

/// Missing data a Dutch invoice must carry.
pub fn compliance_warnings(
    company: &CompanySettings,
    invoice: &Invoice,
    line_count: usize,
) -> Vec<String> {
    let blank = |s: &str| s.trim().is_empty();
    let mut warnings = Vec::new();

    if blank(&company.company_name)
        || blank(&company.address)
        || blank(&company.city)
        || blank(&company.postcode)
    {
        warnings.push("Company name/address/postcode/city missing in Company Settings.".to_string());
    }
    if blank(&company.kvk) {
        warnings.push("KVK number missing in Company Settings.".to_string());
    }
    if blank(&company.rsin) {
        warnings.push("RSIN missing in Company Settings.".to_string());
    }
    if invoice.vat_scheme != VatScheme::Exempt {
        if blank(&company.vat_number) {
            warnings.push("Supplier VAT number missing in Company Settings.".to_string());
        } else if company.vat_number.contains('[') {
            warnings.push(
                "Supplier VAT number looks like a placeholder. Replace it with your real VAT number."
                    .to_string(),
            );
        }
    }
    if blank(&company.iban) || blank(&company.bic) {
        warnings.push("IBAN/BIC missing in Company Settings.".to_string());
    }
    if blank(&invoice.client_name) || blank(&invoice.client_address) {
        warnings.push("Customer name and address are required.".to_string());
    }
    if invoice.vat_scheme == VatScheme::ReverseChargeEu && blank(&invoice.client_vat_number) {
        warnings.push("Customer VAT number required for reverse charge (BTW verlegd).".to_string());
    }
    if invoice.supply_date.is_none() {
        warnings.push("Supply/performance date is required.".to_string());
    }
    if line_count == 0 {
        warnings.push("Invoice must contain at least one line.".to_string());
    }
    warnings
}
