// src/handlers/exam.rs

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use tokio::sync::watch;
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    exam::{
        countdown::CountdownStatus,
        finalize::FinalizeTrigger,
        registry::ExamRegistry,
        scorer,
        source::{QuestionSource, load_question_set},
        store::SessionStore,
    },
    models::{
        answer::AnswerMap,
        exam_record::{SubmissionResponse, SubmitExamRequest},
        question::{PublicQuestion, QuestionQuery, QuestionSetResponse},
        session::{
            BeginSessionRequest, NavigateRequest, PositionResponse, ReviewFlagResponse,
            SetAnswerRequest,
        },
    },
    state::AppState,
    utils::jwt::Claims,
};

/// Serves a question set without answer keys.
///
/// Falls back to the practice set (with a warning) when the bank is unavailable.
pub async fn list_questions(
    State(state): State<AppState>,
    Query(query): Query<QuestionQuery>,
) -> Result<impl IntoResponse, AppError> {
    let set = load_question_set(
        state.questions.as_ref(),
        &state.fallback,
        query.count,
        &query.category_list(),
    )
    .await;

    Ok(Json(QuestionSetResponse {
        questions: set.questions.iter().map(PublicQuestion::from).collect(),
        warning: set.warning,
    }))
}

pub async fn list_categories(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let categories = match state.questions.categories().await {
        Ok(categories) if !categories.is_empty() => categories,
        Ok(_) => state.fallback.categories().await?,
        Err(e) => {
            tracing::warn!("Failed to list categories, using practice set: {}", e);
            state.fallback.categories().await?
        }
    };

    Ok(Json(categories))
}

/// Starts a timed exam for the caller.
pub async fn begin_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<BeginSessionRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let categories: Vec<String> = req
        .categories
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    let set = load_question_set(
        state.questions.as_ref(),
        &state.fallback,
        req.count,
        &categories,
    )
    .await;

    let duration_seconds = req
        .duration_seconds
        .unwrap_or(state.config.exam_duration_seconds);

    let session = state
        .exams
        .begin(
            claims.user_id(),
            claims.email.as_deref(),
            set.questions,
            duration_seconds,
        )
        .await?;

    let view = session
        .view(state.exams.now())
        .await
        .with_warning(set.warning);

    Ok((StatusCode::CREATED, Json(view)))
}

/// Resumes the caller's running exam after a reload.
pub async fn current_session(
    State(exams): State<ExamRegistry>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let session = exams
        .current_for_user(claims.user_id())
        .await?
        .ok_or(AppError::NotFound("No exam in progress".to_string()))?;

    exams.resume(&session).await;

    Ok(Json(session.view(exams.now()).await))
}

pub async fn get_session(
    State(exams): State<ExamRegistry>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = exams.get_owned(id, claims.user_id()).await?;
    exams.resume(&session).await;

    Ok(Json(session.view(exams.now()).await))
}

/// Records (or replaces) the selection for one question.
pub async fn set_answer(
    State(exams): State<ExamRegistry>,
    Extension(claims): Extension<Claims>,
    Path((id, question_id)): Path<(Uuid, String)>,
    Json(req): Json<SetAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = exams.get_owned(id, claims.user_id()).await?;
    exams.resume(&session).await;
    let now = exams.now();

    let mut store = session.lock().await;
    ensure_accepting(&store, now)?;
    ensure_on_paper(&store, &question_id)?;

    store.set_answer(&question_id, req.selection);
    exams.persist(session.id, &store).await?;

    Ok(Json(session.view_with(&store, now)))
}

/// Flips the "marked for review" flag of one question.
pub async fn toggle_review(
    State(exams): State<ExamRegistry>,
    Extension(claims): Extension<Claims>,
    Path((id, question_id)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, AppError> {
    let session = exams.get_owned(id, claims.user_id()).await?;
    exams.resume(&session).await;

    let mut store = session.lock().await;
    ensure_accepting(&store, exams.now())?;
    ensure_on_paper(&store, &question_id)?;

    let flagged = store.toggle_review(&question_id);
    exams.persist(session.id, &store).await?;

    Ok(Json(ReviewFlagResponse {
        question_id,
        flagged,
    }))
}

pub async fn navigate(
    State(exams): State<ExamRegistry>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<NavigateRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = exams.get_owned(id, claims.user_id()).await?;

    let mut store = session.lock().await;
    if !store.is_running() {
        return Err(AppError::Conflict("Exam already submitted".to_string()));
    }

    let current_index = store.navigate(req.index);
    exams.persist(session.id, &store).await?;

    Ok(Json(PositionResponse { current_index }))
}

/// Manual submit. Submitting twice returns the first result.
pub async fn submit_session(
    State(exams): State<ExamRegistry>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = exams.get_owned(id, claims.user_id()).await?;

    let (result, warning) = exams
        .finalize(&session, FinalizeTrigger::ManualSubmit)
        .await?
        .into_parts();

    Ok(Json(SubmissionResponse::new(result, warning)))
}

/// The client left the exam view; stop waking up for it.
pub async fn suspend_session(
    State(exams): State<ExamRegistry>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = exams.get_owned(id, claims.user_id()).await?;
    session.suspend();

    Ok(StatusCode::NO_CONTENT)
}

/// Abandons a running exam without recording a result.
pub async fn reset_session(
    State(exams): State<ExamRegistry>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = exams.get_owned(id, claims.user_id()).await?;
    exams.reset(&session).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// SSE endpoint for countdown events
/// GET /api/exam/sessions/{id}/countdown
pub async fn countdown_stream(
    State(exams): State<ExamRegistry>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let session = exams.get_owned(id, claims.user_id()).await?;
    exams.resume(&session).await;

    tracing::info!("Client connected to countdown stream: session={}", id);

    let rx = match session.subscribe() {
        Some(rx) => rx,
        None => {
            // Completed before this process armed a countdown.
            let store = session.lock().await;
            let expired = store
                .state()
                .result
                .as_ref()
                .is_some_and(|r| r.time_spent_seconds >= u64::from(session.duration_seconds));
            let (_, rx) = watch::channel(CountdownStatus {
                remaining_seconds: 0,
                finished: true,
                expired,
            });
            rx
        }
    };

    Ok(Sse::new(countdown_events(id, rx)).keep_alive(KeepAlive::default()))
}

/// One event per published change. The last one is `time-expired` when the
/// clock ran out and `exam-finished` when the session was submitted or reset.
fn countdown_events(
    session_id: Uuid,
    rx: watch::Receiver<CountdownStatus>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream::unfold(
        (rx, true, false),
        move |(mut rx, first, final_sent)| async move {
            if final_sent {
                return None;
            }
            if !first && rx.changed().await.is_err() {
                return None;
            }

            let status = *rx.borrow_and_update();
            let name = match (status.finished, status.expired) {
                (true, true) => {
                    tracing::info!("Timer expired: session={}", session_id);
                    "time-expired"
                }
                (true, false) => "exam-finished",
                (false, _) => "timer-tick",
            };
            let event = Event::default()
                .event(name)
                .json_data(status)
                .unwrap_or_else(|_| Event::default().event(name));

            Some((Ok(event), (rx, false, status.finished)))
        },
    )
}

/// Scores a paper the client kept itself.
///
/// Keys are looked up by question id. Selections for ids off the paper are
/// ignored and missing selections count as wrong.
pub async fn submit_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubmitExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let answers: AnswerMap = req
        .answers
        .into_iter()
        .map(|a| (a.question_id, a.selection))
        .collect();

    let question_ids: Vec<String> = match req.question_ids {
        Some(ids) => {
            let mut seen = HashSet::new();
            ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
        }
        None => {
            let mut ids: Vec<String> = answers.keys().cloned().collect();
            ids.sort();
            ids
        }
    };

    if question_ids.is_empty() {
        return Err(AppError::BadRequest("No answers submitted".to_string()));
    }

    let mut questions = match state.questions.find_by_ids(&question_ids).await {
        Ok(found) if !found.is_empty() => found,
        Ok(_) => state.fallback.find_by_ids(&question_ids).await?,
        Err(e) => {
            tracing::warn!("Answer keys unavailable, trying practice set: {}", e);
            state.fallback.find_by_ids(&question_ids).await?
        }
    };
    if questions.is_empty() {
        return Err(AppError::BadRequest(
            "None of the submitted questions exist".to_string(),
        ));
    }

    let order: HashMap<&str, usize> = question_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    questions.sort_by_key(|q| order.get(q.id.as_str()).copied().unwrap_or(usize::MAX));

    let result = scorer::score(&questions, &answers).into_result(req.time_spent_seconds);
    let warning = state
        .exams
        .record_stateless(claims.user_id(), claims.email.as_deref(), &result)
        .await;

    Ok(Json(SubmissionResponse::new(result, warning)))
}

fn ensure_accepting(store: &SessionStore, now: DateTime<Utc>) -> Result<(), AppError> {
    if !store.is_running() {
        return Err(AppError::Conflict("Exam already submitted".to_string()));
    }
    if store.is_expired(now) {
        return Err(AppError::Conflict("Time is up".to_string()));
    }
    Ok(())
}

fn ensure_on_paper(store: &SessionStore, question_id: &str) -> Result<(), AppError> {
    if store.state().questions.iter().any(|q| q.id == question_id) {
        Ok(())
    } else {
        Err(AppError::NotFound(format!(
            "Question {} is not part of this exam",
            question_id
        )))
    }
}
