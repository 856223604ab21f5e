//! Repository for the customers database: registrations, courses and learner activity.

use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    normalize_timestamp, ActivityEventRow, CourseSummary, CustomerFilter, EnrollmentStatus,
    LatestActivityRow, LearnerRow, NewRegistration, Registration,
};

const ACCEPT_CHUNK: usize = 500;

/// Typeahead result limit.
pub const LOOKUP_LIMIT: i64 = 15;

/// Timeline event limit per learner and course.
pub const EVENT_LIMIT: i64 = 2000;

const REGISTRATION_COLUMNS: &str = r#"
    id, created_at, updated_at, user_email, first_name, middle_name, last_name, age,
    gender, gender_other_note, phone, address_line1, address_line2, city, state,
    postal_code, country, job_title, company, ai_current_involvement,
    ai_goals_wish_to_achieve, ai_datasets_available, referral_source, referral_details,
    reason_choose_us, invoice_name, invoice_company, invoice_vat_id, invoice_email,
    invoice_phone, invoice_addr_line1, invoice_addr_line2, invoice_city, invoice_state,
    invoice_postal_code, invoice_country, course_session_code, notes,
    consent_contact_ok, consent_marketing_ok, data_processing_ok, enrollment_status
"#;

/// Repository over the customers database.
#[derive(Clone)]
pub struct CustomersRepository {
    pool: SqlitePool,
}

impl CustomersRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== REGISTRATION OPERATIONS ====================

    /// One page of registrations matching `filter`, newest first, plus the total match count.
    pub async fn search_registrations(
        &self,
        filter: &CustomerFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Registration>, i64), AppError> {
        let mut count_qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM registrations WHERE 1 = 1");
        push_filter(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await?;

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM registrations WHERE 1 = 1",
            REGISTRATION_COLUMNS
        ));
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let rows = qb.build().fetch_all(&self.pool).await?;

        Ok((rows.iter().map(registration_from_row).collect(), total))
    }

    /// Registrations whose name, email or company contains `q`.
    pub async fn lookup_registrations(&self, q: &str) -> Result<Vec<Registration>, AppError> {
        let filter = CustomerFilter {
            q: q.to_string(),
            ..Default::default()
        };
        let (rows, _) = self.search_registrations(&filter, LOOKUP_LIMIT, 0).await?;
        Ok(rows)
    }

    pub async fn get_registration(&self, id: i64) -> Result<Option<Registration>, AppError> {
        let sql = format!("SELECT {} FROM registrations WHERE id = ?", REGISTRATION_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        Ok(row.as_ref().map(registration_from_row))
    }

    pub async fn set_status(&self, id: i64, status: EnrollmentStatus) -> Result<(), AppError> {
        let result = sqlx::query("UPDATE registrations SET enrollment_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Registration {} not found", id)));
        }
        Ok(())
    }

    /// Store `accepted` for every listed registration not already accepted.
    /// Returns the number of rows changed.
    pub async fn accept_registrations(&self, ids: &[i64]) -> Result<u64, AppError> {
        let mut updated = 0;
        for chunk in ids.chunks(ACCEPT_CHUNK) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "UPDATE registrations SET enrollment_status = 'accepted' \
                 WHERE enrollment_status <> 'accepted' AND id IN (",
            );
            let mut separated = qb.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            updated += qb.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(updated)
    }

    pub async fn insert_registration(&self, reg: &NewRegistration) -> Result<i64, AppError> {
        let row = sqlx::query(
            r#"INSERT INTO registrations (
                   user_email, first_name, middle_name, last_name, age, gender, phone,
                   address_line1, address_line2, city, state, postal_code, country,
                   job_title, company, ai_current_involvement, ai_goals_wish_to_achieve,
                   ai_datasets_available, referral_source, referral_details, reason_choose_us,
                   invoice_name, invoice_company, invoice_vat_id, invoice_email, invoice_phone,
                   invoice_addr_line1, invoice_addr_line2, invoice_city, invoice_state,
                   invoice_postal_code, invoice_country, course_session_code, notes,
                   consent_contact_ok, consent_marketing_ok, data_processing_ok, enrollment_status)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                       ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending')
               RETURNING id"#,
        )
        .bind(&reg.user_email)
        .bind(&reg.first_name)
        .bind(&reg.middle_name)
        .bind(&reg.last_name)
        .bind(reg.age)
        .bind(&reg.gender)
        .bind(&reg.phone)
        .bind(&reg.address_line1)
        .bind(&reg.address_line2)
        .bind(&reg.city)
        .bind(&reg.state)
        .bind(&reg.postal_code)
        .bind(&reg.country)
        .bind(&reg.job_title)
        .bind(&reg.company)
        .bind(&reg.ai_current_involvement)
        .bind(&reg.ai_goals_wish_to_achieve)
        .bind(&reg.ai_datasets_available)
        .bind(&reg.referral_source)
        .bind(&reg.referral_details)
        .bind(&reg.reason_choose_us)
        .bind(&reg.invoice_name)
        .bind(&reg.invoice_company)
        .bind(&reg.invoice_vat_id)
        .bind(&reg.invoice_email)
        .bind(&reg.invoice_phone)
        .bind(&reg.invoice_addr_line1)
        .bind(&reg.invoice_addr_line2)
        .bind(&reg.invoice_city)
        .bind(&reg.invoice_state)
        .bind(&reg.invoice_postal_code)
        .bind(&reg.invoice_country)
        .bind(&reg.course_session_code)
        .bind(&reg.notes)
        .bind(reg.consent_contact_ok)
        .bind(reg.consent_marketing_ok)
        .bind(reg.data_processing_ok)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    // ==================== LEARNER ACTIVITY OPERATIONS ====================

    /// Published courses and courses with any activity, with learner counts.
    pub async fn course_summaries(&self) -> Result<Vec<CourseSummary>, AppError> {
        let rows = sqlx::query(
            r#"SELECT c.id, c.title, c.is_published, c.published_at,
                      (SELECT COUNT(DISTINCT al.user_id) FROM activity_log al WHERE al.course_id = c.id) AS learners,
                      (SELECT MAX(al.created_at) FROM activity_log al WHERE al.course_id = c.id) AS last_activity
               FROM courses c
               WHERE c.is_published = 1
                  OR EXISTS (SELECT 1 FROM activity_log z WHERE z.course_id = c.id)
               ORDER BY c.id"#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let published: Option<i64> = row.get("is_published");
                let id: i64 = row.get("id");
                CourseSummary {
                    id,
                    title: row
                        .get::<Option<String>, _>("title")
                        .filter(|t| !t.is_empty())
                        .unwrap_or_else(|| format!("Course {}", id)),
                    is_published: published.unwrap_or(0) != 0,
                    published_at: row
                        .get::<Option<String>, _>("published_at")
                        .as_deref()
                        .and_then(normalize_timestamp),
                    learners: row.get("learners"),
                    last_activity: row
                        .get::<Option<String>, _>("last_activity")
                        .as_deref()
                        .and_then(normalize_timestamp),
                }
            })
            .collect())
    }

    /// Title and structure document of a course.
    pub async fn course_structure(
        &self,
        course_id: i64,
    ) -> Result<Option<(String, Option<String>)>, AppError> {
        let row = sqlx::query("SELECT title, structure FROM courses WHERE id = ?")
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| {
            let title = row
                .get::<Option<String>, _>("title")
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| format!("Course {}", course_id));
            (title, row.get("structure"))
        }))
    }

    /// Most recent activity row per learner in a course, most recently seen first.
    pub async fn latest_activity(&self, course_id: i64) -> Result<Vec<LatestActivityRow>, AppError> {
        let rows = sqlx::query(
            r#"WITH ranked AS (
                   SELECT al.user_id, al.lesson_uid, al.a_type,
                          al.created_at AS last_seen, al.payload,
                          ROW_NUMBER() OVER (
                              PARTITION BY al.user_id ORDER BY al.created_at DESC, al.id DESC
                          ) AS rn
                   FROM activity_log al
                   WHERE al.course_id = ?
               )
               SELECT l.user_id, l.lesson_uid, l.a_type, l.last_seen, l.payload,
                      r.user_email, r.first_name, r.middle_name, r.last_name, r.invoice_name
               FROM ranked l
               LEFT JOIN registrations r ON r.id = l.user_id
               WHERE l.rn = 1
               ORDER BY l.last_seen IS NULL, l.last_seen DESC, l.user_id"#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| LatestActivityRow {
                user_id: row.get("user_id"),
                lesson_uid: row.get("lesson_uid"),
                a_type: row.get("a_type"),
                last_seen: row.get("last_seen"),
                payload: row.get("payload"),
                user_email: row.get("user_email"),
                first_name: row.get("first_name"),
                middle_name: row.get("middle_name"),
                last_name: row.get("last_name"),
                invoice_name: row.get("invoice_name"),
            })
            .collect())
    }

    /// Registration fields for a learner page.
    pub async fn learner(&self, user_id: i64) -> Result<Option<LearnerRow>, AppError> {
        let row = sqlx::query(
            r#"SELECT user_email, first_name, middle_name, last_name, invoice_name, enrollment_status
               FROM registrations WHERE id = ? LIMIT 1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| LearnerRow {
            user_email: row.get("user_email"),
            first_name: row.get("first_name"),
            middle_name: row.get("middle_name"),
            last_name: row.get("last_name"),
            invoice_name: row.get("invoice_name"),
            enrollment_status: row.get("enrollment_status"),
        }))
    }

    /// Activity of one learner in one course, newest first.
    pub async fn learner_events(
        &self,
        user_id: i64,
        course_id: i64,
    ) -> Result<Vec<ActivityEventRow>, AppError> {
        let rows = sqlx::query(
            r#"SELECT id, lesson_uid, a_type, created_at, payload
               FROM activity_log
               WHERE user_id = ? AND course_id = ?
               ORDER BY created_at DESC, id DESC
               LIMIT ?"#,
        )
        .bind(user_id)
        .bind(course_id)
        .bind(EVENT_LIMIT)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ActivityEventRow {
                id: row.get("id"),
                lesson_uid: row.get("lesson_uid"),
                a_type: row.get("a_type"),
                created_at: row.get("created_at"),
                payload: row.get("payload"),
            })
            .collect())
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &CustomerFilter) {
    let q = filter.q.trim();
    if !q.is_empty() {
        let like = format!("%{}%", q.to_lowercase());
        qb.push(" AND (");
        for (i, column) in ["first_name", "middle_name", "last_name", "user_email", "company"]
            .iter()
            .enumerate()
        {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(format!("LOWER({}) LIKE ", column))
                .push_bind(like.clone());
        }
        qb.push(")");
    }
    let session = filter.session.trim();
    if !session.is_empty() {
        qb.push(" AND course_session_code = ").push_bind(session.to_string());
    }
    let referral = filter.referral.trim();
    if !referral.is_empty() {
        qb.push(" AND referral_source = ").push_bind(referral.to_string());
    }
}

fn flag(row: &SqliteRow, column: &str) -> bool {
    row.get::<Option<i64>, _>(column).unwrap_or(0) != 0
}

fn registration_from_row(row: &SqliteRow) -> Registration {
    Registration {
        id: row.get("id"),
        created_at: row
            .get::<Option<String>, _>("created_at")
            .as_deref()
            .and_then(normalize_timestamp),
        updated_at: row
            .get::<Option<String>, _>("updated_at")
            .as_deref()
            .and_then(normalize_timestamp),
        user_email: row.get("user_email"),
        first_name: row.get::<Option<String>, _>("first_name").unwrap_or_default(),
        middle_name: row.get("middle_name"),
        last_name: row.get::<Option<String>, _>("last_name").unwrap_or_default(),
        age: row.get("age"),
        gender: row.get("gender"),
        gender_other_note: row.get("gender_other_note"),
        phone: row.get("phone"),
        address_line1: row.get("address_line1"),
        address_line2: row.get("address_line2"),
        city: row.get("city"),
        state: row.get("state"),
        postal_code: row.get("postal_code"),
        country: row.get("country"),
        job_title: row.get("job_title"),
        company: row.get("company"),
        ai_current_involvement: row.get("ai_current_involvement"),
        ai_goals_wish_to_achieve: row.get("ai_goals_wish_to_achieve"),
        ai_datasets_available: row.get("ai_datasets_available"),
        referral_source: row.get("referral_source"),
        referral_details: row.get("referral_details"),
        reason_choose_us: row.get("reason_choose_us"),
        invoice_name: row.get("invoice_name"),
        invoice_company: row.get("invoice_company"),
        invoice_vat_id: row.get("invoice_vat_id"),
        invoice_email: row.get("invoice_email"),
        invoice_phone: row.get("invoice_phone"),
        invoice_addr_line1: row.get("invoice_addr_line1"),
        invoice_addr_line2: row.get("invoice_addr_line2"),
        invoice_city: row.get("invoice_city"),
        invoice_state: row.get("invoice_state"),
        invoice_postal_code: row.get("invoice_postal_code"),
        invoice_country: row.get("invoice_country"),
        course_session_code: row.get("course_session_code"),
        notes: row.get("notes"),
        consent_contact_ok: flag(row, "consent_contact_ok"),
        consent_marketing_ok: flag(row, "consent_marketing_ok"),
        data_processing_ok: flag(row, "data_processing_ok"),
        enrollment_status: row
            .get::<Option<String>, _>("enrollment_status")
            .unwrap_or_else(|| EnrollmentStatus::Pending.as_str().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_customers_database;
    use tempfile::TempDir;

    async fn repo() -> (TempDir, CustomersRepository) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_customers_database(&temp_dir.path().join("customers.db"))
            .await
            .unwrap();
        (temp_dir, CustomersRepository::new(pool))
    }

    fn registration(first: &str, last: &str, email: &str) -> NewRegistration {
        NewRegistration {
            user_email: Some(email.to_string()),
            first_name: first.to_string(),
            last_name: last.to_string(),
            job_title: "Other".to_string(),
            referral_details: "PRICE_EUR:480".to_string(),
            course_session_code: "AML-RTD".to_string(),
            consent_contact_ok: true,
            data_processing_ok: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_and_search() {
        let (_dir, repo) = repo().await;
        let jane = repo
            .insert_registration(&registration("Jane", "Doe", "jane@example.com"))
            .await
            .unwrap();
        repo.insert_registration(&registration("Piet", "Jansen", "piet@example.com"))
            .await
            .unwrap();

        let filter = CustomerFilter {
            q: "DOE".to_string(),
            ..Default::default()
        };
        let (rows, total) = repo.search_registrations(&filter, 25, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].id, jane);
        assert_eq!(rows[0].enrollment_status, "pending");
        assert!(rows[0].data_processing_ok);

        let all = CustomerFilter {
            session: "AML-RTD".to_string(),
            ..Default::default()
        };
        let (rows, total) = repo.search_registrations(&all, 1, 1).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 1);

        let found = repo.lookup_registrations("piet@").await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_accept_registrations_counts_changes() {
        let (_dir, repo) = repo().await;
        let a = repo
            .insert_registration(&registration("A", "One", "a@example.com"))
            .await
            .unwrap();
        let b = repo
            .insert_registration(&registration("B", "Two", "b@example.com"))
            .await
            .unwrap();
        repo.set_status(b, EnrollmentStatus::Accepted).await.unwrap();

        assert_eq!(repo.accept_registrations(&[a, b, 999]).await.unwrap(), 1);
        assert_eq!(repo.accept_registrations(&[a, b]).await.unwrap(), 0);
        let reg = repo.get_registration(a).await.unwrap().unwrap();
        assert_eq!(reg.enrollment_status, "accepted");
    }

    #[tokio::test]
    async fn test_set_status_missing_row() {
        let (_dir, repo) = repo().await;
        let err = repo.set_status(42, EnrollmentStatus::Waitlist).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_latest_activity_per_learner() {
        let (_dir, repo) = repo().await;
        let id = repo
            .insert_registration(&registration("Ann", "Lee", "ann@example.com"))
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO courses (id, title, is_published, structure) VALUES (1, 'ML', 0, NULL)",
        )
        .execute(&repo.pool)
        .await
        .unwrap();
        for (user, created, lesson) in [
            (id, "2025-01-01T10:00:00Z", "l1"),
            (id, "2025-01-03T10:00:00Z", "l2"),
            (77, "2025-01-02T10:00:00Z", "l1"),
        ] {
            sqlx::query(
                "INSERT INTO activity_log (user_id, course_id, lesson_uid, a_type, created_at) \
                 VALUES (?, 1, ?, 'lesson_view', ?)",
            )
            .bind(user)
            .bind(lesson)
            .bind(created)
            .execute(&repo.pool)
            .await
            .unwrap();
        }

        let latest = repo.latest_activity(1).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].user_id, id);
        assert_eq!(latest[0].lesson_uid.as_deref(), Some("l2"));
        assert_eq!(latest[0].first_name.as_deref(), Some("Ann"));
        assert_eq!(latest[1].user_id, 77);
        assert!(latest[1].first_name.is_none());

        let summaries = repo.course_summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].learners, 2);
        assert_eq!(summaries[0].last_activity.as_deref(), Some("2025-01-03T10:00:00Z"));

        let events = repo.learner_events(id, 1).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].lesson_uid.as_deref(), Some("l2"));
    }
}
