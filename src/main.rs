//! Company Portal Backend
//!
//! Bookkeeping for a Dutch B.V. (invoices, payments, expenses, VAT returns)
//! plus the course registrations and learner activity of its customers,
//! served as a JSON API over SQLite with a Tantivy invoice lookup index.

mod accounting;
mod api;
mod auth;
mod config;
mod db;
mod errors;
mod models;
mod money;
mod payments;
mod search;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::SessionKeys;
use config::Config;
use db::{CustomersRepository, Repository};
use payments::StripeClient;
use search::InvoiceIndex;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    /// `None` when no customers database is configured.
    pub customers: Option<Arc<CustomersRepository>>,
    pub search: Arc<InvoiceIndex>,
    pub stripe: Arc<StripeClient>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Company Portal Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Index path: {:?}", config.index_path);
    tracing::info!("Upload folder: {:?}", config.upload_dir);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.app_password.is_none() && config.app_password_hash.is_none() {
        if config.debug {
            tracing::warn!("No APP_PASSWORD(_HASH) configured. Debug mode accepts the password 'dev'.");
        } else {
            tracing::warn!("No APP_PASSWORD(_HASH) configured. Login is impossible.");
        }
    }

    // Initialize databases
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));
    accounting::ensure_company(&repo).await?;

    let customers = match &config.customers_db_path {
        Some(path) => match db::init_customers_database(path).await {
            Ok(pool) => {
                tracing::info!("Customers database: {:?}", path);
                Some(Arc::new(CustomersRepository::new(pool)))
            }
            Err(e) => {
                tracing::error!("Customers database unavailable: {}", e);
                None
            }
        },
        None => {
            tracing::warn!("No customers database configured; customer pages will answer 503");
            None
        }
    };

    tokio::fs::create_dir_all(&config.upload_dir).await?;

    // Initialize the invoice lookup index
    let search = Arc::new(InvoiceIndex::open(&config.index_path)?);
    tracing::info!("Building invoice index...");
    let invoices = repo.list_invoices(None).await?;
    search.rebuild(&invoices).await?;

    let stripe = Arc::new(StripeClient::new(config.stripe.clone())?);
    if !stripe.is_configured() {
        tracing::warn!("Stripe is not configured; invoices get no payment links");
    }

    // Create application state
    let state = AppState {
        repo,
        customers,
        search,
        stripe,
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let session_keys = Arc::new(SessionKeys::from_config(&state.config));
    let max_body = state.config.max_content_length;

    // Operator routes: login required, CSRF on every unsafe method
    let protected_routes = Router::new()
        .route("/dashboard", get(api::get_dashboard))
        .route("/vat", get(api::get_vat))
        .route(
            "/settings",
            get(api::get_settings).put(api::update_settings),
        )
        // Invoices
        .route("/invoices", get(api::list_invoices).post(api::create_invoice))
        .route("/invoices/new", get(api::new_invoice_form))
        .route("/invoices/lookup", get(api::lookup_invoices))
        .route(
            "/invoices/{id}",
            get(api::get_invoice).delete(api::delete_invoice),
        )
        .route("/invoices/{id}/payments", post(api::record_payment))
        // Income
        .route("/income", post(api::create_income))
        .route("/income/new", get(api::new_income_form))
        // Expenses
        .route("/expenses", get(api::list_expenses).post(api::create_expense))
        .route("/expenses/{id}/receipt", post(api::upload_receipt))
        // Freelancers
        .route("/freelancers", get(api::list_payouts).post(api::create_payout))
        .route("/freelancers/new", get(api::new_payout_form))
        // Customers
        .route("/customers", get(api::list_customers))
        .route("/customers/lookup", get(api::lookup_customers))
        .route("/customers/{id}", get(api::get_customer))
        .route("/customers/{id}/status", post(api::set_customer_status))
        // Students
        .route("/students", get(api::list_students))
        .route("/students/{user_id}/{course_id}", get(api::get_student))
        .route_layer(middleware::from_fn(auth::csrf_layer))
        .route_layer(middleware::from_fn(auth::require_login));

    // Login is CSRF checked but open; logout only drops the session
    let auth_routes = Router::new()
        .route("/auth/login", get(api::login_page).post(api::login))
        .route_layer(middleware::from_fn(auth::csrf_layer))
        .route("/auth/logout", post(api::logout));

    // Public course registration
    let course_routes = Router::new()
        .route("/course", get(api::course_page))
        .route("/course/signin", post(api::course_signin))
        .route("/course/logout", post(api::course_logout))
        .route("/course/register", post(api::course_register));

    // Health checks (no auth required)
    let health_routes = Router::new()
        .route("/healthz", get(api::healthz))
        .route("/_probe", get(api::probe))
        .route("/warmup", get(api::warmup));

    Router::new()
        .nest(
            "/api",
            protected_routes.merge(auth_routes).merge(course_routes),
        )
        .merge(health_routes)
        .nest_service("/uploads", ServeDir::new(&state.config.upload_dir))
        .fallback(api::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(middleware::from_fn(move |req, next| {
                    auth::session_layer(session_keys.clone(), req, next)
                }))
                .layer(RequestBodyLimitLayer::new(max_body))
                .layer(DefaultBodyLimit::disable()),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests;
