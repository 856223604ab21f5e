//! Database module for SQLite persistence.
//!
//! The primary database holds the books. The optional customers database holds
//! course registrations and learner activity and is owned by another system, so
//! its schema is only created when missing.

mod customers;
mod repository;

pub use customers::*;
pub use repository::*;

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

/// Open a pooled SQLite connection, creating the file and its directory.
async fn open_pool(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Initialize the primary database: create tables, then upgrade legacy ones.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let pool = open_pool(db_path).await?;
    run_migrations(&pool).await?;
    run_schema_upgrades(&pool).await?;
    Ok(pool)
}

/// Initialize the customers database.
pub async fn init_customers_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let pool = open_pool(db_path).await?;
    run_customers_migrations(&pool).await?;
    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS company_settings (
            id INTEGER PRIMARY KEY,
            company_name TEXT NOT NULL DEFAULT '',
            address TEXT DEFAULT '',
            kvk TEXT DEFAULT '',
            rsin TEXT DEFAULT '',
            vat_number TEXT DEFAULT '',
            iban TEXT DEFAULT '',
            bic TEXT DEFAULT '',
            invoice_prefix TEXT DEFAULT 'INV',
            city TEXT DEFAULT '',
            postcode TEXT DEFAULT '',
            country TEXT DEFAULT 'Netherlands'
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoice_sequences (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            year INTEGER NOT NULL,
            prefix TEXT NOT NULL DEFAULT 'INV',
            last_seq INTEGER NOT NULL DEFAULT 0,
            CONSTRAINT uq_year_prefix UNIQUE (year, prefix)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            amount NUMERIC DEFAULT 0,
            invoice_no TEXT NOT NULL UNIQUE,
            issue_date TEXT NOT NULL,
            supply_date TEXT,
            due_date TEXT,
            currency TEXT NOT NULL DEFAULT 'EUR',
            client_name TEXT NOT NULL,
            client_address TEXT DEFAULT '',
            client_vat_number TEXT DEFAULT '',
            vat_scheme TEXT NOT NULL DEFAULT 'STANDARD',
            notes TEXT DEFAULT '',
            status TEXT NOT NULL DEFAULT 'SENT',
            net_total NUMERIC DEFAULT 0,
            vat_total NUMERIC DEFAULT 0,
            gross_total NUMERIC DEFAULT 0,
            stripe_payment_url TEXT,
            stripe_payment_link_id TEXT,
            stripe_checkout_session_id TEXT,
            customer_registration_id INTEGER
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS invoice_lines (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            invoice_id INTEGER NOT NULL REFERENCES invoices(id),
            description TEXT NOT NULL,
            qty NUMERIC NOT NULL DEFAULT 1,
            unit_price NUMERIC NOT NULL DEFAULT 0,
            vat_rate NUMERIC NOT NULL DEFAULT 21,
            line_net NUMERIC NOT NULL DEFAULT 0,
            line_vat NUMERIC NOT NULL DEFAULT 0,
            line_total NUMERIC NOT NULL DEFAULT 0
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            invoice_id INTEGER REFERENCES invoices(id),
            date TEXT NOT NULL,
            amount NUMERIC NOT NULL,
            method TEXT NOT NULL DEFAULT 'bank',
            reference TEXT,
            note TEXT
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            date TEXT NOT NULL,
            vendor TEXT NOT NULL,
            category TEXT NOT NULL,
            description TEXT DEFAULT '',
            currency TEXT NOT NULL DEFAULT 'EUR',
            vat_rate NUMERIC NOT NULL DEFAULT 21,
            amount_net NUMERIC NOT NULL DEFAULT 0,
            vat_amount NUMERIC NOT NULL DEFAULT 0,
            amount_gross NUMERIC NOT NULL DEFAULT 0,
            receipt_path TEXT,
            invoice_id INTEGER REFERENCES invoices(id),
            pay_method TEXT DEFAULT 'bank',
            pay_reference TEXT
        );
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Column names of an existing table (empty when the table is missing).
async fn table_columns(pool: &SqlitePool, table: &str) -> Result<HashSet<String>, sqlx::Error> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", table))
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|row| row.get::<String, _>("name")).collect())
}

/// Add each `(column, definition)` the table lacks. Returns the columns added.
async fn add_missing_columns(
    pool: &SqlitePool,
    table: &str,
    existing: &HashSet<String>,
    columns: &[(&str, &str)],
) -> Result<Vec<String>, sqlx::Error> {
    let mut added = Vec::new();
    for (name, definition) in columns {
        if existing.contains(*name) {
            continue;
        }
        sqlx::query(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, name, definition))
            .execute(pool)
            .await?;
        tracing::info!("Schema upgrade: added {}.{}", table, name);
        added.push(name.to_string());
    }
    Ok(added)
}

/// Bring tables created by older releases up to the current columns.
/// Safe to run on every start.
async fn run_schema_upgrades(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let company_cols = table_columns(pool, "company_settings").await?;
    add_missing_columns(pool, "company_settings", &company_cols, &[("rsin", "TEXT DEFAULT ''")])
        .await?;

    let expense_cols = table_columns(pool, "expenses").await?;
    let added = add_missing_columns(
        pool,
        "expenses",
        &expense_cols,
        &[
            ("amount_gross", "NUMERIC DEFAULT 0"),
            ("amount_net", "NUMERIC DEFAULT 0"),
            ("vat_amount", "NUMERIC DEFAULT 0"),
            ("vat_rate", "NUMERIC DEFAULT 0"),
            ("invoice_id", "INTEGER"),
            ("pay_method", "TEXT DEFAULT 'bank'"),
            ("pay_reference", "TEXT"),
        ],
    )
    .await?;
    if !added.is_empty() && expense_cols.contains("amount") {
        sqlx::query(
            r#"
            UPDATE expenses
               SET amount_gross = COALESCE(amount, 0),
                   amount_net = COALESCE(amount, 0)
             WHERE COALESCE(amount_gross, 0) = 0 AND COALESCE(amount_net, 0) = 0
            "#,
        )
        .execute(pool)
        .await?;
        sqlx::query(
            "UPDATE expenses SET vat_amount = COALESCE(vat_amount, 0), vat_rate = COALESCE(vat_rate, 0)",
        )
        .execute(pool)
        .await?;
    }

    let invoice_cols = table_columns(pool, "invoices").await?;
    let added = add_missing_columns(
        pool,
        "invoices",
        &invoice_cols,
        &[
            ("amount", "NUMERIC DEFAULT 0"),
            ("supply_date", "TEXT"),
            ("vat_scheme", "TEXT DEFAULT 'STANDARD'"),
            ("client_address", "TEXT"),
            ("client_vat_number", "TEXT"),
            ("notes", "TEXT"),
            ("status", "TEXT DEFAULT 'SENT'"),
            ("net_total", "NUMERIC DEFAULT 0"),
            ("vat_total", "NUMERIC DEFAULT 0"),
            ("gross_total", "NUMERIC DEFAULT 0"),
            ("stripe_payment_url", "TEXT"),
            ("stripe_payment_link_id", "TEXT"),
            ("stripe_checkout_session_id", "TEXT"),
            ("customer_registration_id", "INTEGER"),
        ],
    )
    .await?;
    if added.iter().any(|c| c == "supply_date") {
        sqlx::query("UPDATE invoices SET supply_date = issue_date WHERE supply_date IS NULL")
            .execute(pool)
            .await?;
    }
    sqlx::query("UPDATE invoices SET amount = 0 WHERE amount IS NULL")
        .execute(pool)
        .await?;
    // Legacy invoices only carried `amount`.
    sqlx::query(
        r#"
        UPDATE invoices
           SET net_total = amount,
               gross_total = amount,
               vat_total = COALESCE(vat_total, 0)
         WHERE COALESCE(gross_total, 0) = 0
           AND COALESCE(net_total, 0) = 0
           AND COALESCE(amount, 0) <> 0
        "#,
    )
    .execute(pool)
    .await?;

    let line_cols = table_columns(pool, "invoice_lines").await?;
    add_missing_columns(
        pool,
        "invoice_lines",
        &line_cols,
        &[
            ("line_net", "NUMERIC DEFAULT 0"),
            ("line_vat", "NUMERIC DEFAULT 0"),
            ("line_total", "NUMERIC DEFAULT 0"),
            ("vat_rate", "NUMERIC DEFAULT 0"),
        ],
    )
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_expenses_invoice_id ON expenses(invoice_id);
        CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses(date);
        CREATE INDEX IF NOT EXISTS idx_payments_invoice_id ON payments(invoice_id);
        CREATE INDEX IF NOT EXISTS idx_payments_date ON payments(date);
        CREATE INDEX IF NOT EXISTS idx_invoice_lines_invoice_id ON invoice_lines(invoice_id);
        CREATE INDEX IF NOT EXISTS idx_invoices_issue_date ON invoices(issue_date);
        CREATE INDEX IF NOT EXISTS idx_invoices_customer ON invoices(customer_registration_id);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn run_customers_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS registrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            user_email TEXT,
            first_name TEXT NOT NULL,
            middle_name TEXT,
            last_name TEXT NOT NULL,
            age INTEGER,
            gender TEXT CHECK (gender IS NULL OR gender IN ('Female', 'Male', 'Prefer not to say')),
            gender_other_note TEXT,
            phone TEXT,
            address_line1 TEXT,
            address_line2 TEXT,
            city TEXT,
            state TEXT,
            postal_code TEXT,
            country TEXT,
            job_title TEXT,
            company TEXT,
            ai_current_involvement TEXT,
            ai_goals_wish_to_achieve TEXT,
            ai_datasets_available TEXT,
            referral_source TEXT CHECK (referral_source IS NULL OR referral_source IN (
                'Search', 'YouTube', 'TikTok/Instagram', 'X/Twitter', 'LinkedIn',
                'Friend/Colleague', 'Event/Conference', 'Partner', 'Newsletter', 'Other')),
            referral_details TEXT,
            reason_choose_us TEXT,
            invoice_name TEXT,
            invoice_company TEXT,
            invoice_vat_id TEXT,
            invoice_email TEXT,
            invoice_phone TEXT,
            invoice_addr_line1 TEXT,
            invoice_addr_line2 TEXT,
            invoice_city TEXT,
            invoice_state TEXT,
            invoice_postal_code TEXT,
            invoice_country TEXT,
            course_session_code TEXT,
            notes TEXT,
            consent_contact_ok INTEGER NOT NULL DEFAULT 1,
            consent_marketing_ok INTEGER NOT NULL DEFAULT 0,
            data_processing_ok INTEGER NOT NULL DEFAULT 0,
            enrollment_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (enrollment_status IN ('pending', 'accepted', 'rejected', 'waitlist'))
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_registrations_touch
        AFTER UPDATE ON registrations
        FOR EACH ROW WHEN NEW.updated_at IS OLD.updated_at
        BEGIN
            UPDATE registrations
               SET updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
             WHERE id = NEW.id;
        END;
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS courses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            created_by INTEGER,
            is_published INTEGER NOT NULL DEFAULT 0,
            published_at TEXT,
            structure TEXT,
            created_at TEXT
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            course_id INTEGER NOT NULL,
            lesson_uid TEXT,
            a_type TEXT,
            created_at TEXT NOT NULL,
            score_points TEXT,
            passed INTEGER,
            payload TEXT
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_reg_email ON registrations(user_email);
        CREATE INDEX IF NOT EXISTS idx_reg_created ON registrations(created_at);
        CREATE INDEX IF NOT EXISTS idx_reg_course ON registrations(course_session_code);
        CREATE INDEX IF NOT EXISTS idx_reg_ref ON registrations(referral_source);
        CREATE INDEX IF NOT EXISTS idx_activity_course_user ON activity_log(course_id, user_id, created_at);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
