//! Database repository for the books.
//!
//! Money columns are read back with `CAST(.. AS TEXT)` and parsed into
//! [`Amount`], so legacy blank or textual values load as zero.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{Datelike, Local, NaiveDate};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};

use crate::accounting::{self, VatLine};
use crate::errors::AppError;
use crate::models::{
    parse_date, CompanySettings, Expense, Invoice, InvoiceLine, InvoiceStatus, NewExpense,
    NewPayment, Payment, VatScheme, PAYOUT_CATEGORIES,
};
use crate::money::Amount;

/// SQLite caps bound parameters per statement; id lists are sent in chunks.
const ID_CHUNK: usize = 500;

const INVOICE_COLUMNS: &str = r#"
    i.id, i.invoice_no, i.issue_date, i.supply_date, i.due_date, i.currency,
    i.client_name, i.client_address, i.client_vat_number, i.vat_scheme, i.notes, i.status,
    CAST(i.net_total AS TEXT) AS net_total,
    CAST(i.vat_total AS TEXT) AS vat_total,
    CAST(i.gross_total AS TEXT) AS gross_total,
    (i.net_total IS NULL OR i.vat_total IS NULL OR i.gross_total IS NULL) AS totals_missing,
    (SELECT CAST(COALESCE(SUM(p.amount), 0) AS TEXT) FROM payments p WHERE p.invoice_id = i.id) AS paid_total,
    i.stripe_payment_url, i.stripe_payment_link_id, i.stripe_checkout_session_id,
    i.customer_registration_id
"#;

const EXPENSE_COLUMNS: &str = r#"
    id, date, vendor, category, description, currency,
    CAST(vat_rate AS TEXT) AS vat_rate,
    CAST(amount_net AS TEXT) AS amount_net,
    CAST(vat_amount AS TEXT) AS vat_amount,
    CAST(amount_gross AS TEXT) AS amount_gross,
    receipt_path, invoice_id, pay_method, pay_reference
"#;

const PAYMENT_COLUMNS: &str = r#"
    id, invoice_id, date, CAST(amount AS TEXT) AS amount, method, reference, note
"#;

/// Database repository for all data operations on the primary database.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== COMPANY OPERATIONS ====================

    pub async fn get_company(&self) -> Result<Option<CompanySettings>, AppError> {
        let row = sqlx::query(
            r#"SELECT id, company_name, address, kvk, rsin, vat_number, iban, bic,
                      invoice_prefix, city, postcode, country
               FROM company_settings ORDER BY id LIMIT 1"#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(company_from_row))
    }

    /// Insert or overwrite the settings row.
    pub async fn save_company(&self, company: &CompanySettings) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO company_settings
                   (id, company_name, address, kvk, rsin, vat_number, iban, bic,
                    invoice_prefix, city, postcode, country)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   company_name = excluded.company_name,
                   address = excluded.address,
                   kvk = excluded.kvk,
                   rsin = excluded.rsin,
                   vat_number = excluded.vat_number,
                   iban = excluded.iban,
                   bic = excluded.bic,
                   invoice_prefix = excluded.invoice_prefix,
                   city = excluded.city,
                   postcode = excluded.postcode,
                   country = excluded.country"#,
        )
        .bind(company.id)
        .bind(&company.company_name)
        .bind(&company.address)
        .bind(&company.kvk)
        .bind(&company.rsin)
        .bind(&company.vat_number)
        .bind(&company.iban)
        .bind(&company.bic)
        .bind(&company.invoice_prefix)
        .bind(&company.city)
        .bind(&company.postcode)
        .bind(&company.country)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ==================== INVOICE OPERATIONS ====================

    /// Number, total and store a new invoice with its lines in one transaction.
    pub async fn create_invoice(
        &self,
        prefix: &str,
        mut invoice: Invoice,
        mut lines: Vec<InvoiceLine>,
    ) -> Result<(Invoice, Vec<InvoiceLine>), AppError> {
        let today = Local::now().date_naive();
        invoice.issue_date.get_or_insert(today);
        // Numbering follows the booking year, not the issue date.
        let year = today.year();

        let mut tx = self.pool.begin().await?;
        invoice.invoice_no = allocate_invoice_no(&mut tx, prefix, year).await?;
        accounting::recalc_invoice(&mut invoice, &mut lines);
        accounting::update_status(&mut invoice);

        let row = sqlx::query(
            r#"INSERT INTO invoices
                   (invoice_no, issue_date, supply_date, due_date, currency, client_name,
                    client_address, client_vat_number, vat_scheme, notes, status,
                    net_total, vat_total, gross_total, amount, customer_registration_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               RETURNING id"#,
        )
        .bind(&invoice.invoice_no)
        .bind(date_text(invoice.issue_date))
        .bind(date_text(invoice.supply_date))
        .bind(date_text(invoice.due_date))
        .bind(&invoice.currency)
        .bind(&invoice.client_name)
        .bind(&invoice.client_address)
        .bind(&invoice.client_vat_number)
        .bind(invoice.vat_scheme.as_str())
        .bind(&invoice.notes)
        .bind(&invoice.status)
        .bind(invoice.net_total.to_string())
        .bind(invoice.vat_total.to_string())
        .bind(invoice.gross_total.to_string())
        .bind(invoice.gross_total.to_string())
        .bind(invoice.customer_registration_id)
        .fetch_one(&mut *tx)
        .await?;
        invoice.id = row.get("id");

        for line in lines.iter_mut() {
            line.invoice_id = invoice.id;
            line.id = insert_line(&mut tx, line).await?;
        }

        tx.commit().await?;
        tracing::info!("Created invoice {} (id {})", invoice.invoice_no, invoice.id);
        Ok((invoice, lines))
    }

    /// Invoices, newest issue date first, optionally filtered by status.
    pub async fn list_invoices(&self, status: Option<&str>) -> Result<Vec<Invoice>, AppError> {
        let status = status.map(str::trim).filter(|s| !s.is_empty());
        let sql = format!(
            "SELECT {} FROM invoices i {} ORDER BY i.issue_date DESC, i.id DESC",
            INVOICE_COLUMNS,
            if status.is_some() { "WHERE i.status = ?" } else { "" }
        );
        let mut query = sqlx::query(&sql);
        if let Some(status) = status {
            query = query.bind(status.to_uppercase());
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(invoice_from_row).collect())
    }

    /// The `limit` most recently issued invoices.
    pub async fn latest_invoices(&self, limit: i64) -> Result<Vec<Invoice>, AppError> {
        let sql = format!(
            "SELECT {} FROM invoices i ORDER BY i.issue_date DESC, i.id DESC LIMIT ?",
            INVOICE_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(invoice_from_row).collect())
    }

    pub async fn get_invoice(&self, id: i64) -> Result<Option<Invoice>, AppError> {
        let sql = format!("SELECT {} FROM invoices i WHERE i.id = ?", INVOICE_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(invoice_from_row))
    }

    /// Like [`Repository::get_invoice`] but a missing row is an error.
    pub async fn require_invoice(&self, id: i64) -> Result<Invoice, AppError> {
        self.get_invoice(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Invoice {} not found", id)))
    }

    pub async fn invoices_by_ids(&self, ids: &[i64]) -> Result<BTreeMap<i64, Invoice>, AppError> {
        let mut out = BTreeMap::new();
        for chunk in ids.chunks(ID_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("SELECT {} FROM invoices i WHERE i.id IN (", INVOICE_COLUMNS));
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            for row in qb.build().fetch_all(&self.pool).await? {
                let invoice = invoice_from_row(&row);
                out.insert(invoice.id, invoice);
            }
        }
        Ok(out)
    }

    /// Lookup candidates among `ids`, newest issue date first. CLOSED invoices
    /// are left out unless `include_closed`.
    pub async fn lookup_candidates(
        &self,
        ids: &[i64],
        include_closed: bool,
    ) -> Result<Vec<Invoice>, AppError> {
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> =
                QueryBuilder::new(format!("SELECT {} FROM invoices i WHERE i.id IN (", INVOICE_COLUMNS));
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            if !include_closed {
                qb.push(" AND UPPER(COALESCE(i.status, '')) <> 'CLOSED'");
            }
            qb.push(" ORDER BY i.issue_date DESC, i.id DESC");
            out.extend(qb.build().fetch_all(&self.pool).await?.iter().map(invoice_from_row));
        }
        if ids.len() > ID_CHUNK {
            out.sort_by(|a, b| b.issue_date.cmp(&a.issue_date).then(b.id.cmp(&a.id)));
        }
        Ok(out)
    }

    pub async fn get_invoice_lines(&self, invoice_id: i64) -> Result<Vec<InvoiceLine>, AppError> {
        let rows = sqlx::query(
            r#"SELECT id, invoice_id, description,
                      CAST(qty AS TEXT) AS qty,
                      CAST(unit_price AS TEXT) AS unit_price,
                      CAST(vat_rate AS TEXT) AS vat_rate,
                      CAST(line_net AS TEXT) AS line_net,
                      CAST(line_vat AS TEXT) AS line_vat,
                      CAST(line_total AS TEXT) AS line_total
               FROM invoice_lines WHERE invoice_id = ? ORDER BY id"#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(line_from_row).collect())
    }

    /// Persist recomputed line figures, totals and status.
    pub async fn save_invoice_totals(
        &self,
        invoice: &Invoice,
        lines: &[InvoiceLine],
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        for line in lines {
            sqlx::query(
                "UPDATE invoice_lines SET line_net = ?, line_vat = ?, line_total = ? WHERE id = ?",
            )
            .bind(line.line_net.to_string())
            .bind(line.line_vat.to_string())
            .bind(line.line_total.to_string())
            .bind(line.id)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            r#"UPDATE invoices
               SET net_total = ?, vat_total = ?, gross_total = ?, amount = ?, status = ?
               WHERE id = ?"#,
        )
        .bind(invoice.net_total.to_string())
        .bind(invoice.vat_total.to_string())
        .bind(invoice.gross_total.to_string())
        .bind(invoice.gross_total.to_string())
        .bind(&invoice.status)
        .bind(invoice.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn set_invoice_status(&self, id: i64, status: &str) -> Result<(), AppError> {
        sqlx::query("UPDATE invoices SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Recompute the status of an invoice from its payments and store it.
    pub async fn refresh_invoice_status(&self, id: i64) -> Result<Invoice, AppError> {
        let mut invoice = self.require_invoice(id).await?;
        accounting::update_status(&mut invoice);
        self.set_invoice_status(id, &invoice.status).await?;
        Ok(invoice)
    }

    /// Record the Stripe link or checkout session on an invoice.
    pub async fn set_stripe_link(
        &self,
        id: i64,
        url: &str,
        link_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"UPDATE invoices
               SET stripe_payment_url = ?,
                   stripe_payment_link_id = COALESCE(?, stripe_payment_link_id),
                   stripe_checkout_session_id = COALESCE(?, stripe_checkout_session_id)
               WHERE id = ?"#,
        )
        .bind(url)
        .bind(link_id)
        .bind(session_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_payments(&self, invoice_id: i64) -> Result<i64, AppError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE invoice_id = ?")
            .bind(invoice_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_expenses(&self, invoice_id: i64) -> Result<i64, AppError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM expenses WHERE invoice_id = ?")
            .bind(invoice_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Delete an invoice and its lines. Invoices with payments or expenses
    /// attached are refused.
    pub async fn delete_invoice(&self, id: i64) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM invoices WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(AppError::NotFound(format!("Invoice {} not found", id)));
        }

        let payments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM payments WHERE invoice_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let expenses: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM expenses WHERE invoice_id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        if payments > 0 || expenses > 0 {
            return Err(AppError::Conflict(delete_refusal(payments, expenses)));
        }

        sqlx::query("DELETE FROM invoice_lines WHERE invoice_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM invoices WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    // ==================== PAYMENT OPERATIONS ====================

    pub async fn add_payment(&self, payment: &NewPayment) -> Result<Payment, AppError> {
        let row = sqlx::query(
            r#"INSERT INTO payments (invoice_id, date, amount, method, reference, note)
               VALUES (?, ?, ?, ?, ?, ?) RETURNING id"#,
        )
        .bind(payment.invoice_id)
        .bind(payment.date.to_string())
        .bind(payment.amount.to_string())
        .bind(&payment.method)
        .bind(&payment.reference)
        .bind(&payment.note)
        .fetch_one(&self.pool)
        .await?;

        Ok(Payment {
            id: row.get("id"),
            invoice_id: payment.invoice_id,
            date: Some(payment.date),
            amount: payment.amount,
            method: payment.method.clone(),
            reference: Some(payment.reference.clone()),
            note: Some(payment.note.clone()),
        })
    }

    pub async fn payments_for_invoice(&self, invoice_id: i64) -> Result<Vec<Payment>, AppError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE invoice_id = ? ORDER BY date, id",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(invoice_id).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(payment_from_row).collect())
    }

    pub async fn recent_payments(&self, limit: i64) -> Result<Vec<Payment>, AppError> {
        let sql = format!(
            "SELECT {} FROM payments ORDER BY date DESC, id DESC LIMIT ?",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(payment_from_row).collect())
    }

    /// Sum of payments dated on or after `since`.
    pub async fn income_since(&self, since: NaiveDate) -> Result<Amount, AppError> {
        let total: Option<String> = sqlx::query_scalar(
            "SELECT CAST(COALESCE(SUM(amount), 0) AS TEXT) FROM payments WHERE date >= ?",
        )
        .bind(since.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(Amount::from_opt(total.as_deref()))
    }

    // ==================== EXPENSE OPERATIONS ====================

    pub async fn list_expenses(&self) -> Result<Vec<Expense>, AppError> {
        let sql = format!("SELECT {} FROM expenses ORDER BY date DESC, id DESC", EXPENSE_COLUMNS);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(expense_from_row).collect())
    }

    pub async fn recent_expenses(&self, limit: i64) -> Result<Vec<Expense>, AppError> {
        let sql = format!(
            "SELECT {} FROM expenses ORDER BY date DESC, id DESC LIMIT ?",
            EXPENSE_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(expense_from_row).collect())
    }

    pub async fn get_expense(&self, id: i64) -> Result<Option<Expense>, AppError> {
        let sql = format!("SELECT {} FROM expenses WHERE id = ?", EXPENSE_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(expense_from_row))
    }

    pub async fn create_expense(&self, expense: &NewExpense) -> Result<Expense, AppError> {
        let row = sqlx::query(
            r#"INSERT INTO expenses
                   (date, vendor, category, description, currency, vat_rate,
                    amount_net, vat_amount, amount_gross, invoice_id, pay_method, pay_reference)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id"#,
        )
        .bind(expense.date.to_string())
        .bind(&expense.vendor)
        .bind(&expense.category)
        .bind(&expense.description)
        .bind(&expense.currency)
        .bind(expense.vat_rate.to_string())
        .bind(expense.amount_net.to_string())
        .bind(expense.vat_amount.to_string())
        .bind(expense.amount_gross.to_string())
        .bind(expense.invoice_id)
        .bind(&expense.pay_method)
        .bind(&expense.pay_reference)
        .fetch_one(&self.pool)
        .await?;

        Ok(Expense {
            id: row.get("id"),
            date: Some(expense.date),
            vendor: expense.vendor.clone(),
            category: expense.category.clone(),
            description: expense.description.clone(),
            currency: expense.currency.clone(),
            vat_rate: expense.vat_rate,
            amount_net: expense.amount_net,
            vat_amount: expense.vat_amount,
            amount_gross: expense.amount_gross,
            receipt_path: None,
            invoice_id: expense.invoice_id,
            pay_method: Some(expense.pay_method.clone()),
            pay_reference: Some(expense.pay_reference.clone()),
        })
    }

    pub async fn set_receipt_path(&self, id: i64, path: &str) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE expenses SET receipt_path = ? WHERE id = ?")
            .bind(path)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Expense {} not found", id)));
        }
        Ok(())
    }

    /// Freelancer and subcontractor expenses, newest first.
    pub async fn list_payouts(&self) -> Result<Vec<Expense>, AppError> {
        let sql = format!(
            "SELECT {} FROM expenses WHERE category IN (?, ?) ORDER BY date DESC, id DESC",
            EXPENSE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(PAYOUT_CATEGORIES[0])
            .bind(PAYOUT_CATEGORIES[1])
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(expense_from_row).collect())
    }

    /// Payouts linked to one invoice.
    pub async fn payouts_for_invoice(&self, invoice_id: i64) -> Result<Vec<Expense>, AppError> {
        let sql = format!(
            "SELECT {} FROM expenses WHERE invoice_id = ? AND category IN (?, ?) ORDER BY date, id",
            EXPENSE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(invoice_id)
            .bind(PAYOUT_CATEGORIES[0])
            .bind(PAYOUT_CATEGORIES[1])
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(expense_from_row).collect())
    }

    /// Sum of expense gross amounts dated on or after `since`.
    pub async fn expenses_since(&self, since: NaiveDate) -> Result<Amount, AppError> {
        let total: Option<String> = sqlx::query_scalar(
            "SELECT CAST(COALESCE(SUM(amount_gross), 0) AS TEXT) FROM expenses WHERE date >= ?",
        )
        .bind(since.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(Amount::from_opt(total.as_deref()))
    }

    // ==================== VAT OPERATIONS ====================

    /// Invoice lines of invoices issued between `start` and `end` inclusive.
    pub async fn vat_lines_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<VatLine>, AppError> {
        let rows = sqlx::query(
            r#"SELECT i.vat_scheme,
                      CAST(l.vat_rate AS TEXT) AS vat_rate,
                      CAST(l.line_net AS TEXT) AS line_net,
                      CAST(l.line_vat AS TEXT) AS line_vat
               FROM invoice_lines l
               JOIN invoices i ON i.id = l.invoice_id
               WHERE i.issue_date >= ? AND i.issue_date <= ?"#,
        )
        .bind(start.to_string())
        .bind(end.to_string())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| VatLine {
                vat_scheme: VatScheme::parse_or_standard(
                    row.get::<Option<String>, _>("vat_scheme").as_deref().unwrap_or(""),
                ),
                vat_rate: money(row, "vat_rate"),
                line_net: money(row, "line_net"),
                line_vat: money(row, "line_vat"),
            })
            .collect())
    }

    /// Input VAT on expenses dated between `start` and `end` inclusive.
    pub async fn expense_vat_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Amount, AppError> {
        let total: Option<String> = sqlx::query_scalar(
            r#"SELECT CAST(COALESCE(SUM(vat_amount), 0) AS TEXT)
               FROM expenses WHERE date >= ? AND date <= ?"#,
        )
        .bind(start.to_string())
        .bind(end.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(Amount::from_opt(total.as_deref()))
    }

    // ==================== CUSTOMER LINK OPERATIONS ====================

    /// Registrations with at least one settled (paid or closed) invoice.
    pub async fn settled_registration_ids(&self) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar(
            r#"SELECT DISTINCT customer_registration_id FROM invoices
               WHERE customer_registration_id IS NOT NULL
                 AND UPPER(status) IN (?, ?)"#,
        )
        .bind(InvoiceStatus::SETTLED[0].as_str())
        .bind(InvoiceStatus::SETTLED[1].as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Invoice statuses and counts per registration, for the given ids.
    pub async fn invoice_statuses_for(
        &self,
        registration_ids: &[i64],
    ) -> Result<HashMap<i64, (BTreeSet<String>, i64)>, AppError> {
        let mut out: HashMap<i64, (BTreeSet<String>, i64)> = HashMap::new();
        for chunk in registration_ids.chunks(ID_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "SELECT customer_registration_id AS rid, UPPER(COALESCE(status, '')) AS status \
                 FROM invoices WHERE customer_registration_id IN (",
            );
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            for row in qb.build().fetch_all(&self.pool).await? {
                let rid: i64 = row.get("rid");
                let status: String = row.get("status");
                let entry = out.entry(rid).or_default();
                if !status.is_empty() {
                    entry.0.insert(status);
                }
                entry.1 += 1;
            }
        }
        Ok(out)
    }

    /// Subset of `registration_ids` holding a settled invoice.
    pub async fn settled_among(&self, registration_ids: &[i64]) -> Result<HashSet<i64>, AppError> {
        let statuses = self.invoice_statuses_for(registration_ids).await?;
        Ok(statuses
            .into_iter()
            .filter(|(_, (set, _))| {
                InvoiceStatus::SETTLED
                    .iter()
                    .any(|status| set.contains(status.as_str()))
            })
            .map(|(id, _)| id)
            .collect())
    }
}

/// Increment the `(year, prefix)` sequence inside `conn` and format the number.
async fn allocate_invoice_no(
    conn: &mut SqliteConnection,
    prefix: &str,
    year: i32,
) -> Result<String, AppError> {
    sqlx::query("INSERT OR IGNORE INTO invoice_sequences (year, prefix, last_seq) VALUES (?, ?, 0)")
        .bind(year)
        .bind(prefix)
        .execute(&mut *conn)
        .await?;
    let seq: i64 = sqlx::query_scalar(
        "UPDATE invoice_sequences SET last_seq = last_seq + 1 WHERE year = ? AND prefix = ? RETURNING last_seq",
    )
    .bind(year)
    .bind(prefix)
    .fetch_one(&mut *conn)
    .await?;
    Ok(accounting::format_invoice_no(prefix, year, seq))
}

async fn insert_line(conn: &mut SqliteConnection, line: &InvoiceLine) -> Result<i64, AppError> {
    let row = sqlx::query(
        r#"INSERT INTO invoice_lines
               (invoice_id, description, qty, unit_price, vat_rate, line_net, line_vat, line_total)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING id"#,
    )
    .bind(line.invoice_id)
    .bind(&line.description)
    .bind(line.qty.to_string())
    .bind(line.unit_price.to_string())
    .bind(line.vat_rate.to_string())
    .bind(line.line_net.to_string())
    .bind(line.line_vat.to_string())
    .bind(line.line_total.to_string())
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.get("id"))
}

/// "Cannot delete invoice with 1 payment(s) and 2 linked expense(s)."
pub fn delete_refusal(payments: i64, expenses: i64) -> String {
    let mut parts = Vec::new();
    if payments > 0 {
        parts.push(format!("{} payment(s)", payments));
    }
    if expenses > 0 {
        parts.push(format!("{} linked expense(s)", expenses));
    }
    format!("Cannot delete invoice with {}.", parts.join(" and "))
}

fn date_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.to_string())
}

// Helper functions for row conversion

fn money(row: &SqliteRow, column: &str) -> Amount {
    Amount::from_opt(row.get::<Option<String>, _>(column).as_deref())
}

fn text(row: &SqliteRow, column: &str) -> String {
    row.get::<Option<String>, _>(column).unwrap_or_default()
}

fn company_from_row(row: &SqliteRow) -> CompanySettings {
    CompanySettings {
        id: row.get("id"),
        company_name: text(row, "company_name"),
        address: text(row, "address"),
        kvk: text(row, "kvk"),
        rsin: text(row, "rsin"),
        vat_number: text(row, "vat_number"),
        iban: text(row, "iban"),
        bic: text(row, "bic"),
        invoice_prefix: text(row, "invoice_prefix"),
        city: text(row, "city"),
        postcode: text(row, "postcode"),
        country: text(row, "country"),
    }
}

fn invoice_from_row(row: &SqliteRow) -> Invoice {
    let gross_total = money(row, "gross_total");
    let paid_total = money(row, "paid_total");
    let totals_missing: i64 = row.get("totals_missing");
    let status = match text(row, "status").trim() {
        "" => InvoiceStatus::Sent.as_str().to_string(),
        s => s.to_uppercase(),
    };
    Invoice {
        id: row.get("id"),
        invoice_no: text(row, "invoice_no"),
        issue_date: parse_date(row.get::<Option<String>, _>("issue_date").as_deref()),
        supply_date: parse_date(row.get::<Option<String>, _>("supply_date").as_deref()),
        due_date: parse_date(row.get::<Option<String>, _>("due_date").as_deref()),
        currency: match text(row, "currency") {
            c if c.is_empty() => "EUR".to_string(),
            c => c,
        },
        client_name: text(row, "client_name"),
        client_address: text(row, "client_address"),
        client_vat_number: text(row, "client_vat_number"),
        vat_scheme: VatScheme::parse_or_standard(&text(row, "vat_scheme")),
        notes: text(row, "notes"),
        status,
        net_total: money(row, "net_total"),
        vat_total: money(row, "vat_total"),
        gross_total,
        paid_total,
        balance: gross_total - paid_total,
        stripe_payment_url: row.get("stripe_payment_url"),
        stripe_payment_link_id: row.get("stripe_payment_link_id"),
        stripe_checkout_session_id: row.get("stripe_checkout_session_id"),
        customer_registration_id: row.get("customer_registration_id"),
        totals_missing: totals_missing != 0,
    }
}

fn line_from_row(row: &SqliteRow) -> InvoiceLine {
    InvoiceLine {
        id: row.get("id"),
        invoice_id: row.get("invoice_id"),
        description: text(row, "description"),
        qty: money(row, "qty"),
        unit_price: money(row, "unit_price"),
        vat_rate: money(row, "vat_rate"),
        line_net: money(row, "line_net"),
        line_vat: money(row, "line_vat"),
        line_total: money(row, "line_total"),
    }
}

fn payment_from_row(row: &SqliteRow) -> Payment {
    Payment {
        id: row.get("id"),
        invoice_id: row.get("invoice_id"),
        date: parse_date(row.get::<Option<String>, _>("date").as_deref()),
        amount: money(row, "amount"),
        method: text(row, "method"),
        reference: row.get("reference"),
        note: row.get("note"),
    }
}

fn expense_from_row(row: &SqliteRow) -> Expense {
    Expense {
        id: row.get("id"),
        date: parse_date(row.get::<Option<String>, _>("date").as_deref()),
        vendor: text(row, "vendor"),
        category: text(row, "category"),
        description: text(row, "description"),
        currency: text(row, "currency"),
        vat_rate: money(row, "vat_rate"),
        amount_net: money(row, "amount_net"),
        vat_amount: money(row, "vat_amount"),
        amount_gross: money(row, "amount_gross"),
        receipt_path: row.get("receipt_path"),
        invoice_id: row.get("invoice_id"),
        pay_method: row.get("pay_method"),
        pay_reference: row.get("pay_reference"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use tempfile::TempDir;

    async fn repo() -> (TempDir, Repository) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_database(&temp_dir.path().join("app.db")).await.unwrap();
        (temp_dir, Repository::new(pool))
    }

    fn line(description: &str, qty: i64, price: i64, rate: i64) -> InvoiceLine {
        InvoiceLine {
            description: description.to_string(),
            qty: Amount::from_units(qty),
            unit_price: Amount::from_units(price),
            vat_rate: Amount::from_units(rate),
            ..Default::default()
        }
    }

    fn header(issue: &str) -> Invoice {
        let issue_date = NaiveDate::parse_from_str(issue, "%Y-%m-%d").ok();
        Invoice {
            issue_date,
            supply_date: issue_date,
            due_date: issue_date,
            currency: "EUR".to_string(),
            client_name: "Acme".to_string(),
            client_address: "Main St 1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_invoice_numbers_per_year_and_prefix() {
        let (_dir, repo) = repo().await;
        let mut conn = repo.pool.acquire().await.unwrap();
        for (prefix, year, expected) in [
            ("INV", 2025, "INV-2025-0001"),
            ("INV", 2025, "INV-2025-0002"),
            ("INV", 2026, "INV-2026-0001"),
            ("CRS", 2025, "CRS-2025-0001"),
        ] {
            let invoice_no = allocate_invoice_no(&mut conn, prefix, year).await.unwrap();
            assert_eq!(invoice_no, expected);
        }
    }

    #[tokio::test]
    async fn test_create_invoice_stores_totals_and_lines() {
        let (_dir, repo) = repo().await;
        let (invoice, lines) = repo
            .create_invoice(
                "INV",
                header("2025-02-10"),
                vec![line("Consulting", 2, 100, 21), line("Book", 1, 50, 9)],
            )
            .await
            .unwrap();

        // Back-dated invoices are still numbered in the current year.
        let year = Local::now().year();
        assert_eq!(invoice.invoice_no, format!("INV-{}-0001", year));
        assert_eq!(invoice.issue_date, NaiveDate::from_ymd_opt(2025, 2, 10));
        assert_eq!(invoice.status, "SENT");
        assert_eq!(lines.len(), 2);

        let stored = repo.require_invoice(invoice.id).await.unwrap();
        assert_eq!(stored.net_total, Amount::from_units(250));
        assert_eq!(stored.vat_total, Amount::from_cents(4650));
        assert_eq!(stored.gross_total, Amount::from_cents(29650));
        assert!(!stored.totals_missing);

        let stored_lines = repo.get_invoice_lines(invoice.id).await.unwrap();
        assert_eq!(stored_lines[1].line_total, Amount::from_cents(5450));
    }

    #[tokio::test]
    async fn test_payments_drive_paid_total_and_status() {
        let (_dir, repo) = repo().await;
        let (invoice, _) = repo
            .create_invoice("INV", header("2025-02-10"), vec![line("Work", 1, 100, 21)])
            .await
            .unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 2, 20).unwrap();
        repo.add_payment(&NewPayment {
            invoice_id: Some(invoice.id),
            date,
            amount: Amount::from_units(21),
            method: "bank".to_string(),
            reference: String::new(),
            note: String::new(),
        })
        .await
        .unwrap();

        let refreshed = repo.refresh_invoice_status(invoice.id).await.unwrap();
        assert_eq!(refreshed.status, "PARTIAL");
        assert_eq!(refreshed.paid_total, Amount::from_units(21));
        assert_eq!(refreshed.outstanding(), Amount::from_units(100));
    }

    #[tokio::test]
    async fn test_delete_refused_with_payments() {
        let (_dir, repo) = repo().await;
        let (invoice, _) = repo
            .create_invoice("INV", header("2025-02-10"), vec![line("Work", 1, 100, 21)])
            .await
            .unwrap();
        repo.add_payment(&NewPayment {
            invoice_id: Some(invoice.id),
            date: NaiveDate::from_ymd_opt(2025, 2, 20).unwrap(),
            amount: Amount::from_units(10),
            method: "cash".to_string(),
            reference: String::new(),
            note: String::new(),
        })
        .await
        .unwrap();

        let err = repo.delete_invoice(invoice.id).await.unwrap_err();
        assert_eq!(err.message(), "Cannot delete invoice with 1 payment(s).");
    }

    #[test]
    fn test_delete_refusal_message() {
        assert_eq!(
            delete_refusal(1, 2),
            "Cannot delete invoice with 1 payment(s) and 2 linked expense(s)."
        );
        assert_eq!(delete_refusal(0, 3), "Cannot delete invoice with 3 linked expense(s).");
    }

    #[tokio::test]
    async fn test_legacy_blank_amounts_read_as_zero() {
        let (_dir, repo) = repo().await;
        sqlx::query("INSERT INTO payments (date, amount, method) VALUES ('2025-01-05', '', 'bank')")
            .execute(&repo.pool)
            .await
            .unwrap();
        let recent = repo.recent_payments(6).await.unwrap();
        assert_eq!(recent[0].amount, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_settled_registration_ids() {
        let (_dir, repo) = repo().await;
        let mut paid = header("2025-03-01");
        paid.customer_registration_id = Some(7);
        let (invoice, _) = repo
            .create_invoice("INV", paid, vec![line("Course", 1, 480, 21)])
            .await
            .unwrap();
        let mut open = header("2025-03-02");
        open.customer_registration_id = Some(8);
        repo.create_invoice("INV", open, vec![line("Course", 1, 480, 21)])
            .await
            .unwrap();

        repo.set_invoice_status(invoice.id, "CLOSED").await.unwrap();
        assert_eq!(repo.settled_registration_ids().await.unwrap(), vec![7]);

        let statuses = repo.invoice_statuses_for(&[7, 8, 9]).await.unwrap();
        assert!(statuses[&7].0.contains("CLOSED"));
        assert_eq!(statuses[&8].1, 1);
        assert!(!statuses.contains_key(&9));

        let settled = repo.settled_among(&[7, 8]).await.unwrap();
        assert!(settled.contains(&7) && !settled.contains(&8));
    }
}
