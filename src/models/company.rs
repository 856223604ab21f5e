//! Company settings: the supplier data printed on every invoice.

use serde::{Deserialize, Serialize};

/// Single-row table of supplier details.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CompanySettings {
    pub id: i64,
    pub company_name: String,
    pub address: String,
    pub kvk: String,
    pub rsin: String,
    pub vat_number: String,
    pub iban: String,
    pub bic: String,
    pub invoice_prefix: String,
    pub city: String,
    pub postcode: String,
    pub country: String,
}

/// Request body for saving company settings. Missing fields are saved blank.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct UpdateCompanyRequest {
    pub company_name: String,
    pub address: String,
    pub kvk: String,
    pub rsin: String,
    pub vat_number: String,
    pub iban: String,
    pub bic: String,
    pub invoice_prefix: String,
    pub city: String,
    pub postcode: String,
    pub country: Option<String>,
}

impl UpdateCompanyRequest {
    /// Apply the request on top of the stored row, trimming every value.
    pub fn apply_to(&self, company: &mut CompanySettings) {
        company.company_name = self.company_name.trim().to_string();
        company.kvk = self.kvk.trim().to_string();
        company.rsin = self.rsin.trim().to_string();
        company.vat_number = self.vat_number.trim().to_string();
        company.invoice_prefix = match self.invoice_prefix.trim() {
            "" => "INV".to_string(),
            prefix => prefix.to_string(),
        };
        company.iban = self.iban.trim().to_string();
        company.bic = self.bic.trim().to_string();
        company.address = self.address.trim().to_string();
        company.postcode = self.postcode.trim().to_string();
        company.city = self.city.trim().to_string();
        company.country = self
            .country
            .as_deref()
            .unwrap_or("Netherlands")
            .trim()
            .to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_trims_and_defaults_prefix() {
        let mut company = CompanySettings::default();
        let request = UpdateCompanyRequest {
            company_name: "  Acme B.V. ".to_string(),
            invoice_prefix: "   ".to_string(),
            ..Default::default()
        };
        request.apply_to(&mut company);

        assert_eq!(company.company_name, "Acme B.V.");
        assert_eq!(company.invoice_prefix, "INV");
        assert_eq!(company.country, "Netherlands");
    }
}
