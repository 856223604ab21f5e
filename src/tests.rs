//! Integration tests for the portal backend.

use std::collections::HashMap;
use std::sync::Arc;

use httpmock::prelude::*;
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::config::Config;
use crate::db::{init_customers_database, init_database, CustomersRepository, Repository};
use crate::models::Invoice;
use crate::payments::StripeClient;
use crate::search::InvoiceIndex;
use crate::{create_router, AppState};

const PASSWORD: &str = "s3cret";

#[derive(Default)]
struct FixtureOptions {
    customers_db: bool,
    stripe_key: bool,
}

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    stripe: MockServer,
    /// Shared with the server, for seeding data directly.
    state: AppState,
    csrf: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        Self::with_options(FixtureOptions::default()).await
    }

    async fn with_customers() -> Self {
        Self::with_options(FixtureOptions {
            customers_db: true,
            ..Default::default()
        })
        .await
    }

    async fn with_options(options: FixtureOptions) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let stripe = MockServer::start_async().await;

        let mut env: HashMap<&str, String> = HashMap::new();
        let path = |name: &str| temp_dir.path().join(name).to_string_lossy().to_string();
        env.insert("PORTAL_DB_PATH", path("app.db"));
        env.insert("PORTAL_INDEX_PATH", path("index"));
        env.insert("UPLOAD_FOLDER", path("uploads"));
        env.insert("SECRET_KEY", "test-secret".to_string());
        env.insert("SESSION_COOKIE_SECURE", "0".to_string());
        env.insert("APP_PASSWORD", PASSWORD.to_string());
        env.insert("PORTAL_LOG_LEVEL", "warn".to_string());
        env.insert("STRIPE_API_BASE", stripe.base_url());
        if options.stripe_key {
            env.insert("STRIPE_API_KEY", "sk_test_portal".to_string());
        }
        if options.customers_db {
            env.insert("CUSTOMERS_DB_PATH", path("customers.db"));
        }

        let config = Config::from_lookup(|key| env.get(key).cloned()).expect("Failed to load config");

        let pool = init_database(&config.db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));
        crate::accounting::ensure_company(&repo)
            .await
            .expect("Failed to seed company");

        let customers = match &config.customers_db_path {
            Some(path) => {
                let pool = init_customers_database(path)
                    .await
                    .expect("Failed to init customers DB");
                Some(Arc::new(CustomersRepository::new(pool)))
            }
            None => None,
        };

        std::fs::create_dir_all(&config.upload_dir).expect("Failed to create upload dir");
        let search = Arc::new(InvoiceIndex::open(&config.index_path).expect("Failed to init index"));
        let stripe_client = Arc::new(
            StripeClient::new(config.stripe.clone()).expect("Failed to build Stripe client"),
        );

        let state = AppState {
            repo,
            customers,
            search,
            stripe: stripe_client,
            config: Arc::new(config),
        };

        let app = create_router(state.clone());

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let client = Client::builder().cookie_store(true).build().unwrap();
        let mut fixture = TestFixture {
            client,
            base_url,
            stripe,
            state,
            csrf: String::new(),
            _temp_dir: temp_dir,
        };
        fixture.csrf = fixture.fetch_csrf().await;
        fixture
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn fetch_csrf(&self) -> String {
        let body: Value = self
            .client
            .get(self.url("/api/auth/login"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["data"]["csrf_token"].as_str().unwrap().to_string()
    }

    async fn login(&self) {
        let resp = self
            .post("/api/auth/login", json!({"password": PASSWORD}))
            .await;
        assert_eq!(resp.status(), 200);
    }

    async fn get(&self, path: &str) -> Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    async fn post(&self, path: &str, body: Value) -> Response {
        self.client
            .post(self.url(path))
            .header("x-csrf-token", &self.csrf)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn get_json(&self, path: &str) -> Value {
        let resp = self.get(path).await;
        assert_eq!(resp.status(), 200, "GET {}", path);
        resp.json().await.unwrap()
    }

    async fn post_json(&self, path: &str, body: Value) -> Value {
        let resp = self.post(path, body).await;
        assert_eq!(resp.status(), 200, "POST {}", path);
        resp.json().await.unwrap()
    }

    async fn create_invoice(&self, client_name: &str, unit_price: &str) -> Value {
        self.post_json(
            "/api/invoices",
            json!({
                "client_name": client_name,
                "client_address": "Keizersgracht 1, Amsterdam",
                "lines": [
                    {"description": "Consulting", "qty": "1", "unit_price": unit_price, "vat_rate": "21"}
                ]
            }),
        )
        .await
    }

    async fn register_for_course(&self) -> i64 {
        self.post_json("/api/course/signin", json!({"access_code": "letmein", "user_email": "ada@example.com"}))
            .await;
        let body = self
            .post_json(
                "/api/course/register",
                json!({
                    "first_name": "Ada",
                    "last_name": "Lovelace",
                    "age": "36",
                    "course_session_code": "AML-RTD",
                    "promo_code": "impact-439",
                    "data_processing_ok": "on",
                    "invoice_company": "Analytical Engines B.V.",
                    "invoice_vat_id": "NL123456789B01"
                }),
            )
            .await;
        body["data"]["id"].as_i64().unwrap()
    }
}

fn messages(body: &Value) -> Vec<String> {
    body["notices"]
        .as_array()
        .map(|notices| {
            notices
                .iter()
                .filter_map(|n| n["message"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_health_endpoints() {
    let fixture = TestFixture::new().await;

    for (path, expected) in [("/healthz", "ok"), ("/_probe", "OK"), ("/warmup", "ok")] {
        let resp = fixture.get(path).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), expected);
    }
}

#[tokio::test]
async fn test_login_required() {
    let fixture = TestFixture::new().await;

    let resp = fixture.get("/api/invoices?status=SENT").await;
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    let login = body["error"]["details"]["login"].as_str().unwrap();
    assert!(login.starts_with("/api/auth/login?next="));
    assert!(login.contains("%2Fapi%2Finvoices"));
}

#[tokio::test]
async fn test_login_rejects_wrong_password() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .post("/api/auth/login", json!({"password": "nope", "next": "/api/vat"}))
        .await;
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Invalid password.");
    assert_eq!(body["error"]["details"]["login"], "/api/auth/login?next=%2Fapi%2Fvat");

    assert_eq!(fixture.get("/api/dashboard").await.status(), 401);
}

#[tokio::test]
async fn test_login_redirects_only_to_local_targets() {
    let fixture = TestFixture::new().await;

    let body = fixture
        .post_json("/api/auth/login", json!({"password": PASSWORD, "next": "https://evil.example/x"}))
        .await;
    assert_eq!(body["data"]["redirect"], "/api/dashboard");
    assert_eq!(messages(&body), vec!["Welcome back."]);

    let body = fixture
        .post_json("/api/auth/login", json!({"password": PASSWORD, "next": "/api/expenses"}))
        .await;
    assert_eq!(body["data"]["redirect"], "/api/expenses");
}

#[tokio::test]
async fn test_csrf_mismatch() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/expenses"))
        .header("x-csrf-token", "forged")
        .json(&json!({"vendor": "KPN", "amount_gross": "10"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CSRF_MISMATCH");

    let resp = fixture
        .client
        .post(fixture.url("/api/expenses"))
        .json(&json!({"vendor": "KPN", "amount_gross": "10"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let fixture = TestFixture::new().await;
    fixture.login().await;
    assert_eq!(fixture.get("/api/dashboard").await.status(), 200);

    let body = fixture.post_json("/api/auth/logout", json!({})).await;
    assert_eq!(messages(&body), vec!["Logged out."]);
    assert_eq!(fixture.get("/api/dashboard").await.status(), 401);
}

#[tokio::test]
async fn test_unknown_route_is_json_404() {
    let fixture = TestFixture::new().await;

    let resp = fixture.get("/api/does-not-exist").await;
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_create_invoice_without_stripe_key() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    let body = fixture.create_invoice("Acme B.V.", "100").await;
    let invoice = &body["data"]["invoice"];
    let year = chrono::Local::now().format("%Y").to_string();
    assert_eq!(invoice["invoice_no"], format!("INV-{}-0001", year));
    assert_eq!(invoice["net_total"], "100.00");
    assert_eq!(invoice["vat_total"], "21.00");
    assert_eq!(invoice["gross_total"], "121.00");
    assert_eq!(invoice["currency"], "EUR");
    assert_eq!(body["data"]["lines"].as_array().unwrap().len(), 1);

    let notices = messages(&body);
    assert!(notices.iter().any(|m| m.starts_with("Stripe: Stripe not configured")));
    assert_eq!(
        notices.last().unwrap(),
        &format!("Invoice INV-{}-0001 created.", year)
    );

    let second = fixture.create_invoice("Globex", "50").await;
    assert_eq!(second["data"]["invoice"]["invoice_no"], format!("INV-{}-0002", year));

    // Back-dated invoices continue the current year's series.
    let backdated = fixture
        .post_json(
            "/api/invoices",
            json!({
                "client_name": "Initech",
                "issue_date": "2019-03-01",
                "lines": [{"description": "Audit", "qty": "1", "unit_price": "10"}]
            }),
        )
        .await;
    assert_eq!(backdated["data"]["invoice"]["invoice_no"], format!("INV-{}-0003", year));
    assert_eq!(backdated["data"]["invoice"]["issue_date"], "2019-03-01");
}

#[tokio::test]
async fn test_create_invoice_with_huge_numbers() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    let body = fixture
        .post_json(
            "/api/invoices",
            json!({
                "client_name": "Acme B.V.",
                "lines": [
                    {"description": "Typo", "qty": 100000000000000000u64, "unit_price": 18446744073709551615u64},
                    {"description": "Bulk", "qty": "90000000000000000", "unit_price": "90000000000000000"}
                ]
            }),
        )
        .await;
    let lines = body["data"]["lines"].as_array().unwrap();
    assert_eq!(lines[0]["qty"], "1.00");
    assert_eq!(lines[0]["unit_price"], "0.00");
    assert_eq!(lines[1]["line_net"], "92233720368547758.07");
    assert_eq!(body["data"]["invoice"]["gross_total"], "92233720368547758.07");
}

#[tokio::test]
async fn test_create_invoice_attaches_stripe_link() {
    let fixture = TestFixture::with_options(FixtureOptions {
        stripe_key: true,
        ..Default::default()
    })
    .await;
    fixture.login().await;

    let link_mock = fixture
        .stripe
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/payment_links")
                .header("authorization", "Bearer sk_test_portal")
                .x_www_form_urlencoded_tuple("line_items[0][price_data][unit_amount]", "12100");
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({"id": "plink_42", "url": "https://buy.stripe.com/test_42"}));
        })
        .await;

    let body = fixture.create_invoice("Acme B.V.", "100").await;
    link_mock.assert_async().await;
    assert_eq!(
        body["data"]["invoice"]["stripe_payment_url"],
        "https://buy.stripe.com/test_42"
    );
    assert!(messages(&body).contains(&"Stripe payment link attached to invoice.".to_string()));

    // The stored link is reused on the detail page
    let id = body["data"]["invoice"]["id"].as_i64().unwrap();
    let detail = fixture.get_json(&format!("/api/invoices/{}", id)).await;
    assert_eq!(
        detail["data"]["invoice"]["stripe_payment_link_id"],
        "plink_42"
    );
    link_mock.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_invoice_payments_and_status() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    let created = fixture.create_invoice("Acme B.V.", "100").await;
    let id = created["data"]["invoice"]["id"].as_i64().unwrap();
    let invoice_no = created["data"]["invoice"]["invoice_no"].as_str().unwrap().to_string();

    let body = fixture
        .post_json(
            &format!("/api/invoices/{}/payments", id),
            json!({"amount": "21", "reference": "NL01BANK"}),
        )
        .await;
    assert_eq!(body["data"]["method"], "bank");
    assert_eq!(
        messages(&body),
        vec![format!("Payment €21.00 recorded for {}.", invoice_no)]
    );

    let detail = fixture.get_json(&format!("/api/invoices/{}", id)).await;
    assert_eq!(detail["data"]["invoice"]["status"], "PARTIAL");
    assert_eq!(detail["data"]["invoice"]["balance"], "100.00");
    assert_eq!(detail["data"]["payments_count"], 1);
    assert_eq!(detail["data"]["can_delete"], false);

    fixture
        .post_json(&format!("/api/invoices/{}/payments", id), json!({"amount": "100"}))
        .await;
    let detail = fixture.get_json(&format!("/api/invoices/{}", id)).await;
    assert_eq!(detail["data"]["invoice"]["status"], "PAID");
    assert_eq!(detail["data"]["invoice"]["balance"], "0.00");

    let paid = fixture.get_json("/api/invoices?status=paid").await;
    assert_eq!(paid["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_delete_invoice_rules() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    let kept = fixture.create_invoice("Acme B.V.", "100").await;
    let kept_id = kept["data"]["invoice"]["id"].as_i64().unwrap();
    fixture
        .post_json(&format!("/api/invoices/{}/payments", kept_id), json!({"amount": "10"}))
        .await;

    let resp = fixture
        .client
        .delete(fixture.url(&format!("/api/invoices/{}", kept_id)))
        .header("x-csrf-token", &fixture.csrf)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CONFLICT");

    let doomed = fixture.create_invoice("Globex", "50").await;
    let doomed_id = doomed["data"]["invoice"]["id"].as_i64().unwrap();
    let resp = fixture
        .client
        .delete(fixture.url(&format!("/api/invoices/{}", doomed_id)))
        .header("x-csrf-token", &fixture.csrf)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = fixture.get(&format!("/api/invoices/{}", doomed_id)).await;
    assert_eq!(resp.status(), 404);

    let lookup = fixture.get_json("/api/invoices/lookup?q=Globex").await;
    assert!(lookup["data"]["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_invoice_lookup() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    fixture.create_invoice("Acme B.V.", "100").await;
    fixture.create_invoice("Globex Corporation", "80").await;

    let body = fixture.get_json("/api/invoices/lookup?q=acme").await;
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["client_name"], "Acme B.V.");
    assert_eq!(results[0]["outstanding"], 121.0);

    let body = fixture.get_json("/api/invoices/lookup?q=a").await;
    assert!(body["data"]["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_invoice_lookup_returns_newest_of_many_matches() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    let first_day = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    for day in 0..230 {
        let invoice = Invoice {
            issue_date: Some(first_day + chrono::Duration::days(day)),
            currency: "EUR".to_string(),
            client_name: "Acme".to_string(),
            ..Default::default()
        };
        fixture.state.repo.create_invoice("INV", invoice, Vec::new()).await.unwrap();
    }
    let invoices = fixture.state.repo.list_invoices(None).await.unwrap();
    fixture.state.search.rebuild(&invoices).await.unwrap();

    let body = fixture.get_json("/api/invoices/lookup?q=acme").await;
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 15);
    assert_eq!(results[0]["issue_date"], "2024-08-17");
    assert_eq!(results[14]["issue_date"], "2024-08-03");
}

#[tokio::test]
async fn test_closed_invoices_hidden_from_lookup() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    let created = fixture.create_invoice("Initech", "100").await;
    let id = created["data"]["invoice"]["id"].as_i64().unwrap();

    let form = fixture.get_json(&format!("/api/income/new?invoice_id={}", id)).await;
    assert_eq!(form["data"]["amount_default"], "121.00");

    let body = fixture
        .post_json(
            "/api/income",
            json!({"invoice_id": id, "amount": "50", "close_invoice": "1"}),
        )
        .await;
    assert_eq!(body["data"]["invoice"]["status"], "CLOSED");
    assert!(messages(&body)[0].ends_with("Invoice CLOSED."));

    let hidden = fixture.get_json("/api/invoices/lookup?q=Initech").await;
    assert!(hidden["data"]["results"].as_array().unwrap().is_empty());

    let shown = fixture
        .get_json("/api/invoices/lookup?q=Initech&include_closed=1")
        .await;
    assert_eq!(shown["data"]["results"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_income_without_close_refreshes_status() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    let created = fixture.create_invoice("Umbrella", "100").await;
    let id = created["data"]["invoice"]["id"].as_i64().unwrap();

    let body = fixture
        .post_json(
            "/api/income",
            json!({"invoice_id": id, "amount": "121", "close_invoice": "0", "method": "stripe"}),
        )
        .await;
    assert_eq!(body["data"]["payment"]["method"], "stripe");
    assert_eq!(body["data"]["invoice"]["status"], "PAID");

    let unlinked = fixture
        .post_json("/api/income", json!({"amount": "15.50"}))
        .await;
    assert!(unlinked["data"]["invoice"].is_null());
    assert_eq!(messages(&unlinked), vec!["Income €15.50 saved."]);
}

#[tokio::test]
async fn test_expense_split_and_receipt_upload() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    let body = fixture
        .post_json(
            "/api/expenses",
            json!({"vendor": "Coolblue", "amount_gross": "121", "description": "Monitor"}),
        )
        .await;
    let expense = &body["data"];
    assert_eq!(expense["amount_net"], "100.00");
    assert_eq!(expense["vat_amount"], "21.00");
    assert_eq!(expense["category"], "General");
    assert_eq!(expense["pay_method"], "bank");
    let id = expense["id"].as_i64().unwrap();

    let cash = fixture
        .post_json(
            "/api/expenses",
            json!({"vendor": "Albert Heijn", "amount_gross": "9.09", "vat_rate": "9", "pay_method": "cash", "pay_reference": " bon 12 "}),
        )
        .await;
    assert_eq!(cash["data"]["pay_method"], "cash");
    assert_eq!(cash["data"]["pay_reference"], "bon 12");
    assert_eq!(cash["data"]["amount_net"], "8.34");

    let part = reqwest::multipart::Part::bytes(b"%PDF-1.4 receipt".to_vec())
        .file_name("coolblue receipt.pdf");
    let form = reqwest::multipart::Form::new().part("receipt", part);
    let resp = fixture
        .client
        .post(fixture.url(&format!("/api/expenses/{}/receipt", id)))
        .header("x-csrf-token", &fixture.csrf)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let stored = body["data"]["receipt_path"].as_str().unwrap().to_string();
    assert!(stored.starts_with("coolblue_receipt_"));
    assert!(stored.ends_with(".pdf"));

    let served = fixture.get(&format!("/uploads/{}", stored)).await;
    assert_eq!(served.status(), 200);
    assert_eq!(served.bytes().await.unwrap().as_ref(), b"%PDF-1.4 receipt");

    let form = reqwest::multipart::Form::new().text("note", "nothing attached");
    let resp = fixture
        .client
        .post(fixture.url(&format!("/api/expenses/{}/receipt", id)))
        .header("x-csrf-token", &fixture.csrf)
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_freelancer_payouts() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    let created = fixture.create_invoice("Acme B.V.", "1000").await;
    let id = created["data"]["invoice"]["id"].as_i64().unwrap();

    let body = fixture
        .post_json(
            "/api/freelancers",
            json!({"freelancer_name": "Jan de Vries", "amount_gross": "400", "invoice_id": id}),
        )
        .await;
    assert_eq!(body["data"]["vat_amount"], "0.00");
    assert_eq!(body["data"]["invoice_id"], id);

    let resp = fixture
        .post(
            "/api/freelancers",
            json!({"freelancer_name": "Ghost", "amount_gross": "10", "invoice_id": 9999}),
        )
        .await;
    assert_eq!(resp.status(), 404);

    let detail = fixture.get_json(&format!("/api/invoices/{}", id)).await;
    assert_eq!(detail["data"]["linked_total"], "400.00");
    assert_eq!(detail["data"]["margin_after_freelancers"], "810.00");

    let list = fixture.get_json("/api/freelancers").await;
    assert_eq!(list["data"]["payouts"].as_array().unwrap().len(), 1);
    assert_eq!(list["data"]["invoices"][id.to_string()]["id"], id);
}

#[tokio::test]
async fn test_vat_return() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    fixture.create_invoice("Acme B.V.", "100").await;
    fixture
        .post_json("/api/expenses", json!({"vendor": "KPN", "amount_gross": "60.50"}))
        .await;

    let body = fixture.get_json("/api/vat").await;
    assert_eq!(body["data"]["vat_out"], "21.00");
    assert_eq!(body["data"]["vat_in"], "10.50");
    assert_eq!(body["data"]["vat_due"], "10.50");

    let resp = fixture.get("/api/vat?year=2025&quarter=5").await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let dashboard = fixture.get_json("/api/dashboard").await;
    assert_eq!(dashboard["data"]["recent_invoices"].as_array().unwrap().len(), 1);
    assert_eq!(dashboard["data"]["company"]["invoice_prefix"], "INV");
}

#[tokio::test]
async fn test_update_settings_changes_invoice_prefix() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    let resp = fixture
        .client
        .put(fixture.url("/api/settings"))
        .header("x-csrf-token", &fixture.csrf)
        .json(&json!({
            "company_name": "Example B.V.",
            "kvk": "12345678",
            "vat_number": "NL001234567B01",
            "iban": "NL91ABNA0417164300",
            "invoice_prefix": "EXB"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"]["company_name"], "Example B.V.");
    assert_eq!(messages(&body), vec!["Company settings saved."]);

    let settings = fixture.get_json("/api/settings").await;
    assert_eq!(settings["data"]["invoice_prefix"], "EXB");

    let created = fixture.create_invoice("Acme B.V.", "10").await;
    let year = chrono::Local::now().format("%Y").to_string();
    assert_eq!(
        created["data"]["invoice"]["invoice_no"],
        format!("EXB-{}-0001", year)
    );
}

#[tokio::test]
async fn test_customers_unavailable_without_database() {
    let fixture = TestFixture::new().await;
    fixture.login().await;

    let resp = fixture.get("/api/customers").await;
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "CUSTOMERS_DB_UNAVAILABLE");

    let lookup = fixture.get_json("/api/customers/lookup?q=ada").await;
    assert!(lookup["data"]["results"].as_array().unwrap().is_empty());
    assert!(lookup["data"]["error"].is_string());

    let form = fixture.get_json("/api/invoices/new?customer_id=1").await;
    assert!(form["data"]["prefill"].is_null());
    assert!(messages(&form)[0].starts_with("Customers DB not available for preload"));
}

#[tokio::test]
async fn test_course_registration_validation() {
    let fixture = TestFixture::with_customers().await;

    let resp = fixture
        .post("/api/course/register", json!({"first_name": "Ada"}))
        .await;
    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["details"]["login"], "/api/course/signin");

    let resp = fixture
        .post("/api/course/signin", json!({"access_code": "wrong"}))
        .await;
    assert_eq!(resp.status(), 400);

    fixture
        .post_json("/api/course/signin", json!({"access_code": "letmein"}))
        .await;
    let page = fixture.get_json("/api/course").await;
    assert_eq!(page["data"]["signed_in"], true);
    assert_eq!(page["data"]["courses"][0]["code"], "AML-RTD");

    let resp = fixture
        .post(
            "/api/course/register",
            json!({"first_name": " ", "age": "7", "course_session_code": "NOPE"}),
        )
        .await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    let errors: Vec<&str> = body["error"]["details"]["errors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(errors.contains(&"First name is required."));
    assert!(errors.contains(&"Last name is required."));
    assert!(errors.contains(&"Age must be between 10 and 120."));
    assert!(errors.contains(&"Please select a valid course."));
    assert!(errors.contains(&"You must consent to data processing to register."));
}

#[tokio::test]
async fn test_customer_flow_with_auto_accept() {
    let fixture = TestFixture::with_customers().await;

    let registration_id = fixture.register_for_course().await;
    fixture.login().await;

    let list = fixture.get_json("/api/customers").await;
    assert_eq!(list["data"]["total"], 1);
    assert_eq!(list["data"]["pages"], 1);
    let item = &list["data"]["customers"][0];
    assert_eq!(item["full_name"], "Ada Lovelace");
    assert_eq!(item["user_email"], "ada@example.com");
    assert_eq!(item["effective_status"]["effective"], "pending");
    assert!(item["referral_details"]
        .as_str()
        .unwrap()
        .contains("PROMO:IMPACT-439"));

    let lookup = fixture.get_json("/api/customers/lookup?q=lovel").await;
    assert_eq!(lookup["data"]["results"][0]["id"], registration_id);

    let form = fixture
        .get_json(&format!("/api/invoices/new?customer_id={}", registration_id))
        .await;
    assert_eq!(form["data"]["prefill"]["client_name"], "Analytical Engines B.V.");

    let body = fixture
        .post_json(
            &format!("/api/customers/{}/status", registration_id),
            json!({"status": "waitlist"}),
        )
        .await;
    assert_eq!(body["data"]["effective_status"], "waitlist");
    assert_eq!(messages(&body), vec!["Enrollment set to waitlist."]);

    let resp = fixture
        .post(
            &format!("/api/customers/{}/status", registration_id),
            json!({"status": "maybe"}),
        )
        .await;
    assert_eq!(resp.status(), 400);

    let created = fixture
        .post_json(
            "/api/invoices",
            json!({
                "client_name": "Analytical Engines B.V.",
                "customer_registration_id": registration_id,
                "lines": [{"description": "Course", "qty": "1", "unit_price": "439", "vat_rate": "21"}]
            }),
        )
        .await;
    let invoice_id = created["data"]["invoice"]["id"].as_i64().unwrap();
    fixture
        .post_json(
            "/api/income",
            json!({"invoice_id": invoice_id, "amount": "1", "close_invoice": true}),
        )
        .await;

    let detail = fixture
        .get_json(&format!("/api/customers/{}", registration_id))
        .await;
    assert_eq!(detail["data"]["effective_status"], "accepted");
    assert_eq!(detail["data"]["registration"]["enrollment_status"], "accepted");

    let resp = fixture.get("/api/customers/9999").await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_students_course_picker() {
    let fixture = TestFixture::with_customers().await;
    fixture.login().await;

    let body = fixture.get_json("/api/students").await;
    assert!(body["data"]["courses"].as_array().unwrap().is_empty());

    let body = fixture.get_json("/api/students?course_id=3").await;
    assert_eq!(body["data"]["course_title"], "Course 3");
    assert!(body["data"]["items"].as_array().unwrap().is_empty());
}
