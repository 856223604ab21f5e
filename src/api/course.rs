//! Public course registration endpoints.
//!
//! These sit outside the operator login. A visitor unlocks the form with the
//! course access code; the flag lives in the same signed session cookie.

use axum::{extract::State, Json};

use super::{customers_db, success, success_with, ApiResult, Notice};
use crate::auth::{constant_time_compare, SessionHandle};
use crate::errors::AppError;
use crate::models::{
    course_offers, CoursePage, CourseRegistrationRequest, CourseSigninRequest,
    RegistrationReceipt, GENDER_CHOICES, JOB_ROLES, REFERRAL_CHOICES,
};
use crate::AppState;

const SIGNIN_PATH: &str = "/api/course/signin";

/// GET /api/course - Branding, choices, prices and the visitor's sign-in state.
pub async fn course_page(State(state): State<AppState>, session: SessionHandle) -> ApiResult<CoursePage> {
    let pricing = &state.config.course;
    let data = session.data();

    success(CoursePage {
        brand_name: pricing.brand_name.clone(),
        brand_logo_url: pricing.brand_logo_url.clone(),
        powered_by: pricing.powered_by.clone(),
        signed_in: data.course_signed_in,
        user_email: data.course_email,
        genders: GENDER_CHOICES.to_vec(),
        referrals: REFERRAL_CHOICES.to_vec(),
        job_roles: JOB_ROLES.to_vec(),
        courses: course_offers(pricing),
        base_price_eur: pricing.base_price_eur,
        promo_code: pricing.promo_code.clone(),
        promo_price_eur: pricing.promo_price_eur,
    })
}

/// POST /api/course/signin - Unlock the registration form with the access code.
pub async fn course_signin(
    State(state): State<AppState>,
    session: SessionHandle,
    Json(request): Json<CourseSigninRequest>,
) -> ApiResult<CoursePage> {
    let code = request.access_code.as_deref().map(str::trim).unwrap_or("");
    if code.is_empty() || !constant_time_compare(code, &state.config.course.access_code) {
        tracing::info!("Rejected course access code");
        return Err(AppError::validation("Invalid course access code."));
    }

    let email = request
        .user_email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(str::to_string);
    session.update(|data| {
        data.course_signed_in = true;
        data.course_email = email;
    });

    let mut response = course_page(State(state), session).await?;
    response
        .notices
        .push(Notice::success("Signed in. Please complete your registration."));
    Ok(response)
}

/// POST /api/course/logout - Forget the course sign-in, keeping any operator login.
pub async fn course_logout(session: SessionHandle) -> ApiResult<()> {
    session.update(|data| {
        data.course_signed_in = false;
        data.course_email = None;
    });
    success_with((), vec![Notice::success("Signed out.")])
}

/// POST /api/course/register - Validate and store a registration.
pub async fn course_register(
    State(state): State<AppState>,
    session: SessionHandle,
    Json(request): Json<CourseRegistrationRequest>,
) -> ApiResult<RegistrationReceipt> {
    let data = session.data();
    if !data.course_signed_in {
        return Err(AppError::Unauthorized {
            message: "Please sign in with the course access code.".to_string(),
            login: SIGNIN_PATH.to_string(),
        });
    }

    let (registration, mut receipt) = request
        .validate(&state.config.course, data.course_email.as_deref())
        .map_err(AppError::Validation)?;

    let customers = customers_db(&state)?;
    receipt.id = customers.insert_registration(&registration).await?;
    tracing::info!(
        "Course registration {} stored ({} EUR, promo {:?})",
        receipt.id,
        receipt.final_price_eur,
        receipt.applied_promo
    );

    let message = receipt.message();
    success_with(receipt, vec![Notice::success(message)])
}

