//! Axum request handlers for all service endpoints.
//!
//! Every write seals sensitive fields through [`vault::FieldCrypto`] before it
//! reaches the repository, and every read opens them after. A field that
//! fails to decrypt ends the request with a generic 500.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDate, Utc};
use common::protocol::{
    CreateUserRequest, CreatedResponse, EmailQuery, ErrorResponse, GoalResponse, HealthResponse,
    ImportRequest, ImportResponse, JournalEntryRequest, JournalEntryResponse, JournalListResponse,
    JournalRangeQuery, JournalUpsertResponse, UpdateGoalRequest, UpdateUserRequest, UserResponse,
};
use common::ServiceError;
use tracing::{error, info, warn};
use vault::fields::{EntityKind, FieldError, GoalUpdate, JournalEntry, User, UserUpdate};

use super::state::AppState;
use crate::repo::{ImportBatch, RepoError};

/// Maximum entries returned by a journal listing.
pub const JOURNAL_PAGE_LIMIT: i64 = 100;

const RATING_RANGE: std::ops::RangeInclusive<i32> = 1..=10;

/// Handler error: a [`ServiceError`] rendered as `(status, ErrorResponse)`.
#[derive(Debug)]
pub struct ApiError(ServiceError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, Json(self.0.to_response())).into_response()
    }
}

impl From<RepoError> for ApiError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Conflict => ApiError(ServiceError::Conflict("email already registered".into())),
            RepoError::MissingParent => ApiError(ServiceError::NotFound("user not found".into())),
            RepoError::Database(e) if is_transient(&e) => {
                ApiError(ServiceError::Unavailable(e.to_string()))
            }
            RepoError::Database(e) => ApiError(ServiceError::Internal(e.to_string())),
        }
    }
}

/// Connection-level failures that a retry may clear. Everything else the
/// database reports is a server fault.
fn is_transient(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed
    )
}

impl From<FieldError> for ApiError {
    fn from(e: FieldError) -> Self {
        ApiError(ServiceError::EncryptionFailure(e.to_string()))
    }
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    ApiError(ServiceError::BadRequest(msg.into()))
}

fn not_found(msg: impl Into<String>) -> ApiError {
    ApiError(ServiceError::NotFound(msg.into()))
}

/// Trim and lower-case an email so equal addresses share a blind index.
pub fn normalize_email(raw: &str) -> Result<String, ApiError> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(bad_request("email must be a valid address"));
    }
    Ok(email)
}

/// Validate a journal entry request and build the plaintext row.
fn journal_entry(user_id: i64, req: &JournalEntryRequest) -> Result<JournalEntry, &'static str> {
    let topics = req.topics.trim();
    if topics.is_empty() {
        return Err("topics must not be empty");
    }
    if !RATING_RANGE.contains(&req.alignment_rating) || !RATING_RANGE.contains(&req.contentment_rating) {
        return Err("ratings must be between 1 and 10");
    }
    Ok(JournalEntry {
        id: 0,
        user_id,
        local_date: req.local_date,
        topics: topics.to_owned(),
        alignment_rating: req.alignment_rating,
        contentment_rating: req.contentment_rating,
        karma: JournalEntry::karma_for(req.alignment_rating, req.contentment_rating),
    })
}

/// Reject goal updates that cannot be applied: blank text, or dates for a
/// user who has no goal yet.
async fn check_goal_update(state: &AppState, user_id: i64, update: &GoalUpdate) -> Result<(), ApiError> {
    match update.goal.as_deref() {
        Some("") => Err(bad_request("goal must not be empty")),
        Some(_) => Ok(()),
        None => {
            if state.repo.find_goal(user_id).await?.is_none() {
                return Err(bad_request("goal is required when none exists"));
            }
            Ok(())
        }
    }
}

fn user_response(user: User) -> UserResponse {
    UserResponse {
        id: user.id,
        email: user.email,
        first_name: user.first_name,
        last_name: user.last_name,
        created_at: user.created_at,
    }
}

fn journal_response(entry: JournalEntry) -> JournalEntryResponse {
    JournalEntryResponse {
        local_date: entry.local_date,
        topics: entry.topics,
        alignment_rating: entry.alignment_rating,
        contentment_rating: entry.contentment_rating,
        karma: entry.karma,
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// `GET /health`: liveness and readiness check.
///
/// Returns `200 OK` when the database answers, `503 Service Unavailable`
/// otherwise.
pub async fn health(State(state): State<AppState>) -> Response {
    let database = match state.repo.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "database ping failed");
            false
        }
    };
    let (status_code, status_str) = if database {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    let body = HealthResponse {
        status: status_str.into(),
        database,
    };
    (status_code, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// `POST /users`
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), ApiError> {
    let mut user = User {
        id: 0,
        email: normalize_email(&req.email)?,
        email_blind_index: None,
        first_name: req.first_name,
        last_name: req.last_name,
        created_at: Utc::now(),
    };
    state.crypto.encrypt_for_write(&mut user)?;
    let id = state.repo.insert_user(&user).await?;
    info!(user_id = id, "user created");
    Ok((StatusCode::CREATED, Json(CreatedResponse { id })))
}

/// `GET /users/lookup?email=`: resolve a user by blind index.
pub async fn lookup_user(
    State(state): State<AppState>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<UserResponse>, ApiError> {
    let email = normalize_email(&query.email)?;
    let index = state.crypto.lookup_index_for(EntityKind::User, "email", &email)?;
    let mut user = state
        .repo
        .find_user_by_email_index(&index)
        .await?
        .ok_or_else(|| not_found("user not found"))?;
    state.crypto.decrypt_for_read(&mut user)?;
    Ok(Json(user_response(user)))
}

/// `GET /users/:id`
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    let mut user = state
        .repo
        .find_user(id)
        .await?
        .ok_or_else(|| not_found("user not found"))?;
    state.crypto.decrypt_for_read(&mut user)?;
    Ok(Json(user_response(user)))
}

/// `PUT /users/:id`
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<StatusCode, ApiError> {
    let update = UserUpdate {
        email: req.email.as_deref().map(normalize_email).transpose()?,
        first_name: req.first_name,
        last_name: req.last_name,
    };
    if update.is_empty() {
        return Err(bad_request("no fields to update"));
    }
    let sealed = state.crypto.seal_user_update(update)?;
    if !state.repo.update_user(id, &sealed).await? {
        return Err(not_found("user not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Goals
// ---------------------------------------------------------------------------

/// `GET /users/:id/goal`
pub async fn get_goal(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<GoalResponse>, ApiError> {
    let mut goal = state
        .repo
        .find_goal(user_id)
        .await?
        .ok_or_else(|| not_found("goal not found"))?;
    state.crypto.decrypt_for_read(&mut goal)?;
    Ok(Json(GoalResponse {
        goal: goal.goal,
        start_date: goal.start_date,
        end_date: goal.end_date,
    }))
}

/// `PUT /users/:id/goal`: create the goal or update the given fields.
pub async fn put_goal(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<UpdateGoalRequest>,
) -> Result<StatusCode, ApiError> {
    let update = GoalUpdate {
        goal: req.goal.map(|g| g.trim().to_owned()),
        start_date: req.start_date,
        end_date: req.end_date,
    };
    if update.is_empty() {
        return Err(bad_request("no fields to update"));
    }
    check_goal_update(&state, user_id, &update).await?;
    let sealed = state.crypto.seal_goal_update(update)?;
    state.repo.upsert_goal(user_id, &sealed).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// `PUT /users/:id/journal`: one entry per local date.
pub async fn put_journal_entry(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<JournalEntryRequest>,
) -> Result<Json<JournalUpsertResponse>, ApiError> {
    let mut entry = journal_entry(user_id, &req).map_err(bad_request)?;
    state.crypto.encrypt_for_write(&mut entry)?;
    let is_update = state.repo.upsert_journal_entry(&entry).await?;
    Ok(Json(JournalUpsertResponse {
        local_date: entry.local_date,
        is_update,
    }))
}

/// `GET /users/:id/journal?start_date&end_date`
pub async fn list_journal_entries(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(range): Query<JournalRangeQuery>,
) -> Result<Json<JournalListResponse>, ApiError> {
    let rows = state
        .repo
        .list_journal_entries(user_id, range.start_date, range.end_date, JOURNAL_PAGE_LIMIT)
        .await?;
    let decrypted = state.crypto.decrypt_all(rows, state.list_policy)?;
    Ok(Json(JournalListResponse {
        entries: decrypted.rows.into_iter().map(journal_response).collect(),
        skipped: decrypted.skipped.len(),
    }))
}

/// `DELETE /users/:id/journal/:local_date`
pub async fn delete_journal_entry(
    State(state): State<AppState>,
    Path((user_id, local_date)): Path<(i64, NaiveDate)>,
) -> Result<StatusCode, ApiError> {
    if !state.repo.delete_journal_entry(user_id, local_date).await? {
        return Err(not_found("journal entry not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// `POST /users/:id/import`: journal history plus profile and goal data,
/// written all-or-nothing.
///
/// Every entry is validated and sealed before the transaction opens; one
/// bad entry rejects the whole request.
pub async fn import(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<ImportRequest>,
) -> Result<(StatusCode, Json<ImportResponse>), ApiError> {
    if req.entries.is_empty() && req.profile.is_none() {
        return Err(bad_request("no entries or profile data provided"));
    }

    let mut entries = req
        .entries
        .iter()
        .enumerate()
        .map(|(i, e)| journal_entry(user_id, e).map_err(|msg| bad_request(format!("entries[{i}]: {msg}"))))
        .collect::<Result<Vec<_>, _>>()?;

    let profile = req.profile.unwrap_or_default();
    let user_update = UserUpdate {
        email: None,
        first_name: profile.first_name,
        last_name: profile.last_name,
    };
    let goal_update = GoalUpdate {
        goal: profile.goal.map(|g| g.trim().to_owned()),
        start_date: profile.start_date,
        end_date: profile.end_date,
    };
    if !goal_update.is_empty() {
        check_goal_update(&state, user_id, &goal_update).await?;
    }

    for entry in entries.iter_mut() {
        state.crypto.encrypt_for_write(entry)?;
    }
    let batch = ImportBatch {
        profile: (!user_update.is_empty())
            .then(|| state.crypto.seal_user_update(user_update))
            .transpose()?,
        goal: (!goal_update.is_empty())
            .then(|| state.crypto.seal_goal_update(goal_update))
            .transpose()?,
        entries,
    };
    let profile_updated = batch.profile.is_some() || batch.goal.is_some();

    state.repo.import(user_id, &batch).await?;
    info!(user_id, entries = batch.entries.len(), profile_updated, "import applied");
    Ok((
        StatusCode::CREATED,
        Json(ImportResponse {
            entries: batch.entries.len(),
            profile_updated,
        }),
    ))
}

/// Catch-all 404 handler.
pub async fn fallback() -> impl IntoResponse {
    let err = ErrorResponse::new("not_found", "the requested resource does not exist");
    (StatusCode::NOT_FOUND, Json(err))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::repo::MockRepository;
    use crate::server::router;
    use axum::{body::Body, http::Request, Router};
    use tower::ServiceExt;
    use vault::fields::Goal;
    use vault::{DecryptFailurePolicy, FieldCrypto, KeyMaterial};

    fn crypto() -> FieldCrypto {
        FieldCrypto::new(&KeyMaterial::from_bytes(&[1u8; 32], &[2u8; 32]).unwrap())
    }

    fn app_with(repo: MockRepository, policy: DecryptFailurePolicy) -> Router {
        router::build(AppState::new(Arc::new(repo), crypto(), policy))
    }

    fn app(repo: MockRepository) -> Router {
        app_with(repo, DecryptFailurePolicy::Abort)
    }

    fn date(d: &str) -> NaiveDate {
        d.parse().unwrap()
    }

    fn sealed_user(id: i64, email: &str) -> User {
        let mut user = User {
            id,
            email: email.into(),
            email_blind_index: None,
            first_name: Some("Ada".into()),
            last_name: None,
            created_at: Utc::now(),
        };
        crypto().encrypt_for_write(&mut user).unwrap();
        user
    }

    fn sealed_entry(id: i64, day: &str, topics: &str) -> JournalEntry {
        let mut entry = JournalEntry {
            id,
            user_id: 7,
            local_date: date(day),
            topics: topics.into(),
            alignment_rating: 6,
            contentment_rating: 8,
            karma: JournalEntry::karma_for(6, 8),
        };
        crypto().encrypt_for_write(&mut entry).unwrap();
        entry
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> Response {
        let builder = Request::builder().method(method).uri(uri);
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.oneshot(req).await.unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn emails_are_normalised() {
        assert_eq!(normalize_email("  A@X.com ").unwrap(), "a@x.com");
        assert!(normalize_email("   ").is_err());
        assert!(normalize_email("not-an-email").is_err());
    }

    #[tokio::test]
    async fn health_ok_when_database_answers() {
        let mut repo = MockRepository::new();
        repo.expect_ping().returning(|| Ok(()));
        let resp = send(app(repo), "GET", "/health", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["database"], true);
    }

    #[tokio::test]
    async fn health_degraded_when_database_down() {
        let mut repo = MockRepository::new();
        repo.expect_ping()
            .returning(|| Err(RepoError::Database(sqlx::Error::PoolTimedOut)));
        let resp = send(app(repo), "GET", "/health", None).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(resp).await["status"], "degraded");
    }

    #[tokio::test]
    async fn create_user_stores_ciphertext_and_index() {
        let expected_index = crypto().indexer().index_of("a@x.com");
        let mut repo = MockRepository::new();
        repo.expect_insert_user()
            .withf(move |u| {
                u.email != "a@x.com"
                    && crypto().cipher().decrypt(&u.email).as_deref() == Ok("a@x.com")
                    && u.email_blind_index.as_deref() == Some(expected_index.as_str())
                    && u.first_name.as_deref() == Some("Ada")
            })
            .times(1)
            .returning(|_| Ok(7));

        let resp = send(
            app(repo),
            "POST",
            "/users",
            Some(serde_json::json!({"email": " A@x.com", "first_name": "Ada"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(json_body(resp).await["id"], 7);
    }

    #[tokio::test]
    async fn duplicate_email_is_conflict() {
        let mut repo = MockRepository::new();
        repo.expect_insert_user().returning(|_| Err(RepoError::Conflict));
        let resp = send(
            app(repo),
            "POST",
            "/users",
            Some(serde_json::json!({"email": "a@x.com"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn lookup_queries_by_blind_index_and_decrypts() {
        let expected_index = crypto().indexer().index_of("a@x.com");
        let mut repo = MockRepository::new();
        repo.expect_find_user_by_email_index()
            .withf(move |index| index == expected_index)
            .returning(|_| Ok(Some(sealed_user(7, "a@x.com"))));

        let resp = send(app(repo), "GET", "/users/lookup?email=A%40X.COM", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["id"], 7);
        assert_eq!(body["email"], "a@x.com");
    }

    #[tokio::test]
    async fn lookup_unknown_email_is_404() {
        let mut repo = MockRepository::new();
        repo.expect_find_user_by_email_index().returning(|_| Ok(None));
        let resp = send(app(repo), "GET", "/users/lookup?email=nobody%40x.com", None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn tampered_ciphertext_returns_generic_500() {
        let mut user = sealed_user(7, "a@x.com");
        user.email.replace_range(0..4, "AAAA");
        let stored = user.email.clone();
        let mut repo = MockRepository::new();
        repo.expect_find_user()
            .returning(move |_| Ok(Some(user.clone())));

        let resp = send(app(repo), "GET", "/users/7", None).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(resp).await;
        assert_eq!(
            body,
            serde_json::json!({"code": "internal_error", "message": "internal error"})
        );
        assert!(!body.to_string().contains(&stored));
    }

    #[tokio::test]
    async fn decode_failure_is_generic_500() {
        let mut repo = MockRepository::new();
        repo.expect_find_user().returning(|_| {
            Err(RepoError::Database(sqlx::Error::ColumnDecode {
                index: "\"email\"".into(),
                source: "unexpected null; try decoding as an `Option`".into(),
            }))
        });

        let resp = send(app(repo), "GET", "/users/7", None).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(resp).await;
        assert_eq!(
            body,
            serde_json::json!({"code": "internal_error", "message": "internal error"})
        );
    }

    #[tokio::test]
    async fn exhausted_pool_is_503_without_detail() {
        let mut repo = MockRepository::new();
        repo.expect_find_user()
            .returning(|_| Err(RepoError::Database(sqlx::Error::PoolTimedOut)));

        let resp = send(app(repo), "GET", "/users/7", None).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(resp).await;
        assert_eq!(
            body,
            serde_json::json!({"code": "unavailable", "message": "service temporarily unavailable"})
        );
    }

    #[tokio::test]
    async fn update_user_rewrites_index_with_email() {
        let expected_index = crypto().indexer().index_of("b@x.com");
        let mut repo = MockRepository::new();
        repo.expect_update_user()
            .withf(move |id, update| {
                let email = update.email.as_ref().unwrap();
                *id == 7
                    && email.blind_index.as_deref() == Some(expected_index.as_str())
                    && crypto().cipher().decrypt(&email.ciphertext).as_deref() == Ok("b@x.com")
                    && update.first_name.is_none()
            })
            .returning(|_, _| Ok(true));

        let resp = send(
            app(repo),
            "PUT",
            "/users/7",
            Some(serde_json::json!({"email": "B@x.com"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn empty_user_update_is_rejected() {
        let resp = send(
            app(MockRepository::new()),
            "PUT",
            "/users/7",
            Some(serde_json::json!({})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_missing_user_is_404() {
        let mut repo = MockRepository::new();
        repo.expect_update_user().returning(|_, _| Ok(false));
        let resp = send(
            app(repo),
            "PUT",
            "/users/9",
            Some(serde_json::json!({"last_name": "Lovelace"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn goal_is_decrypted_on_read() {
        let mut goal = Goal {
            id: 1,
            user_id: 7,
            goal: "run a marathon".into(),
            start_date: Some(date("2024-01-01")),
            end_date: None,
        };
        crypto().encrypt_for_write(&mut goal).unwrap();
        let mut repo = MockRepository::new();
        repo.expect_find_goal()
            .returning(move |_| Ok(Some(goal.clone())));

        let resp = send(app(repo), "GET", "/users/7/goal", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["goal"], "run a marathon");
        assert_eq!(body["start_date"], "2024-01-01");
    }

    #[tokio::test]
    async fn goal_create_requires_text() {
        let mut repo = MockRepository::new();
        repo.expect_find_goal().returning(|_| Ok(None));
        let resp = send(
            app(repo),
            "PUT",
            "/users/7/goal",
            Some(serde_json::json!({"end_date": "2024-12-31"})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn goal_upsert_seals_text() {
        let mut repo = MockRepository::new();
        repo.expect_upsert_goal()
            .withf(|user_id, update| {
                *user_id == 7
                    && crypto()
                        .cipher()
                        .decrypt(update.goal.as_deref().unwrap_or_default())
                        .as_deref()
                        == Ok("read more")
                    && update.end_date == Some(None)
            })
            .returning(|_, _| Ok(()));
        let resp = send(
            app(repo),
            "PUT",
            "/users/7/goal",
            Some(serde_json::json!({"goal": "read more", "end_date": null})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn journal_upsert_seals_topics_and_scores_karma() {
        let mut repo = MockRepository::new();
        repo.expect_upsert_journal_entry()
            .withf(|e| {
                e.user_id == 7
                    && e.topics != "work, family"
                    && crypto().cipher().decrypt(&e.topics).as_deref() == Ok("work, family")
                    && e.karma == 0.5
            })
            .returning(|_| Ok(false));

        let resp = send(
            app(repo),
            "PUT",
            "/users/7/journal",
            Some(serde_json::json!({
                "local_date": "2024-03-01",
                "topics": "work, family",
                "alignment_rating": 5,
                "contentment_rating": 6
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["is_update"], false);
        assert_eq!(body["local_date"], "2024-03-01");
    }

    #[tokio::test]
    async fn journal_rating_out_of_range_is_rejected() {
        let resp = send(
            app(MockRepository::new()),
            "PUT",
            "/users/7/journal",
            Some(serde_json::json!({
                "local_date": "2024-03-01",
                "topics": "x",
                "alignment_rating": 11,
                "contentment_rating": 6
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    fn listing_repo() -> MockRepository {
        let mut corrupted = sealed_entry(2, "2024-03-02", "two");
        corrupted.topics = "not ciphertext".into();
        let rows = vec![
            sealed_entry(3, "2024-03-03", "three"),
            corrupted,
            sealed_entry(1, "2024-03-01", "one"),
        ];
        let mut repo = MockRepository::new();
        repo.expect_list_journal_entries()
            .withf(|user_id, start, end, limit| {
                *user_id == 7 && start.is_none() && end.is_none() && *limit == JOURNAL_PAGE_LIMIT
            })
            .returning(move |_, _, _, _| Ok(rows.clone()));
        repo
    }

    #[tokio::test]
    async fn listing_fails_closed_under_abort_policy() {
        let resp = send(
            app_with(listing_repo(), DecryptFailurePolicy::Abort),
            "GET",
            "/users/7/journal",
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(resp).await["message"], "internal error");
    }

    #[tokio::test]
    async fn listing_skips_bad_entry_under_skip_policy() {
        let resp = send(
            app_with(listing_repo(), DecryptFailurePolicy::Skip),
            "GET",
            "/users/7/journal",
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["skipped"], 1);
        let topics: Vec<_> = body["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["topics"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(topics, vec!["three", "one"]);
    }

    #[tokio::test]
    async fn listing_passes_date_range() {
        let mut repo = MockRepository::new();
        repo.expect_list_journal_entries()
            .withf(|_, start, end, _| {
                *start == Some(date("2024-03-01")) && *end == Some(date("2024-03-31"))
            })
            .returning(|_, _, _, _| Ok(Vec::new()));
        let resp = send(
            app(repo),
            "GET",
            "/users/7/journal?start_date=2024-03-01&end_date=2024-03-31",
            None,
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    fn import_entry(day: &str, topics: &str, alignment: i32) -> serde_json::Value {
        serde_json::json!({
            "local_date": day,
            "topics": topics,
            "alignment_rating": alignment,
            "contentment_rating": 7
        })
    }

    #[tokio::test]
    async fn import_seals_every_entry_and_the_goal() {
        let mut repo = MockRepository::new();
        repo.expect_import()
            .withf(|user_id, batch| {
                let fc = crypto();
                let topics: Vec<_> = batch
                    .entries
                    .iter()
                    .map(|e| fc.cipher().decrypt(&e.topics).ok())
                    .collect();
                *user_id == 7
                    && batch.entries.iter().all(|e| e.user_id == 7)
                    && topics == vec![Some("day one".to_owned()), Some("day two".to_owned())]
                    && batch
                        .goal
                        .as_ref()
                        .and_then(|g| g.goal.as_deref())
                        .map(|g| fc.cipher().decrypt(g).ok())
                        == Some(Some("write daily".to_owned()))
                    && batch.profile.as_ref().and_then(|p| p.first_name.as_deref()) == Some("Ada")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let resp = send(
            app(repo),
            "POST",
            "/users/7/import",
            Some(serde_json::json!({
                "entries": [
                    import_entry("2024-03-01", "day one", 5),
                    import_entry("2024-03-02", "day two", 9)
                ],
                "profile": {"first_name": "Ada", "goal": "write daily"}
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = json_body(resp).await;
        assert_eq!(body, serde_json::json!({"entries": 2, "profile_updated": true}));
    }

    #[tokio::test]
    async fn import_with_one_bad_entry_writes_nothing() {
        let mut repo = MockRepository::new();
        repo.expect_import().times(0);

        let resp = send(
            app(repo),
            "POST",
            "/users/7/import",
            Some(serde_json::json!({
                "entries": [
                    import_entry("2024-03-01", "fine", 5),
                    import_entry("2024-03-02", "secret", 42)
                ]
            })),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = json_body(resp).await;
        assert_eq!(body["message"], "entries[1]: ratings must be between 1 and 10");
        assert!(!body.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn empty_import_is_rejected() {
        let resp = send(
            app(MockRepository::new()),
            "POST",
            "/users/7/import",
            Some(serde_json::json!({"entries": []})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn import_for_missing_user_is_404() {
        let mut repo = MockRepository::new();
        repo.expect_import().returning(|_, _| Err(RepoError::MissingParent));
        let resp = send(
            app(repo),
            "POST",
            "/users/9/import",
            Some(serde_json::json!({"entries": [import_entry("2024-03-01", "x", 5)]})),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleting_missing_entry_is_404() {
        let mut repo = MockRepository::new();
        repo.expect_delete_journal_entry()
            .withf(|user_id, day| *user_id == 7 && *day == date("2024-03-01"))
            .returning(|_, _| Ok(false));
        let resp = send(app(repo), "DELETE", "/users/7/journal/2024-03-01", None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
