//! Learner activity endpoints over the customers database.

use axum::extract::{Path, Query, State};

use super::{customers_db, success, ApiResult};
use crate::models::{
    learner_name, lesson_map, CourseLearners, LearnerActivity, StudentDetail, StudentsQuery,
    StudentsView, TimelineEvent,
};
use crate::AppState;

/// GET /api/students - Course picker, or the latest activity per learner of one course.
pub async fn list_students(
    State(state): State<AppState>,
    Query(query): Query<StudentsQuery>,
) -> ApiResult<StudentsView> {
    let customers = customers_db(&state)?;

    let Some(course_id) = query.course_id.filter(|id| *id > 0) else {
        let courses = customers.course_summaries().await?;
        return success(StudentsView::Courses { courses });
    };

    let (course_title, structure) = customers
        .course_structure(course_id)
        .await?
        .unwrap_or_else(|| (format!("Course {}", course_id), None));
    let lessons = lesson_map(structure.as_deref());

    let items = customers
        .latest_activity(course_id)
        .await?
        .into_iter()
        .map(|row| LearnerActivity::from_row(row, course_id, &course_title, &lessons))
        .collect();

    success(StudentsView::Learners(CourseLearners {
        course_id,
        course_title,
        items,
    }))
}

/// GET /api/students/{user_id}/{course_id} - Activity timeline of one learner.
pub async fn get_student(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(i64, i64)>,
) -> ApiResult<StudentDetail> {
    let customers = customers_db(&state)?;

    let learner = customers.learner(user_id).await?.unwrap_or_default();
    let (course_title, structure) = customers
        .course_structure(course_id)
        .await?
        .unwrap_or_else(|| (format!("Course {}", course_id), None));
    let lessons = lesson_map(structure.as_deref());

    let timeline = customers
        .learner_events(user_id, course_id)
        .await?
        .into_iter()
        .map(|row| TimelineEvent::from_row(row, &lessons))
        .collect();

    success(StudentDetail {
        user_id,
        course_id,
        course_title,
        name: learner_name(
            learner.first_name.as_deref(),
            learner.middle_name.as_deref(),
            learner.last_name.as_deref(),
            learner.invoice_name.as_deref(),
            learner.user_email.as_deref(),
            user_id,
        ),
        email: learner.user_email,
        enrollment_status: learner.enrollment_status,
        timeline,
    })
}
