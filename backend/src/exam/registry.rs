// src/exam/registry.rs

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, types::Json};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, watch};
use uuid::Uuid;

use crate::{
    error::AppError,
    exam::{
        countdown::{Clock, Countdown, CountdownPhase, CountdownStatus},
        finalize::FinalizeTrigger,
        history::HistorySink,
        store::SessionStore,
    },
    models::{
        question::Question,
        session::{SessionRow, SessionStatus, SessionView},
    },
};

const SESSION_COLUMNS: &str = "id, user_id, email, questions, answers, review_flags, current_index, started_at, duration_seconds, status, result";

/// One exam attempt held in memory.
///
/// The state lock serializes every mutation and both finalize paths.
pub struct LiveSession {
    pub id: Uuid,
    pub user_id: String,
    pub email: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: u32,
    state: AsyncMutex<SessionStore>,
    countdown: Mutex<Option<Countdown>>,
}

impl LiveSession {
    fn new(
        id: Uuid,
        user_id: String,
        email: Option<String>,
        store: SessionStore,
        started_at: DateTime<Utc>,
        duration_seconds: u32,
    ) -> Self {
        Self {
            id,
            user_id,
            email,
            started_at,
            duration_seconds,
            state: AsyncMutex::new(store),
            countdown: Mutex::new(None),
        }
    }

    pub async fn lock(&self) -> AsyncMutexGuard<'_, SessionStore> {
        self.state.lock().await
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    fn countdown(&self) -> MutexGuard<'_, Option<Countdown>> {
        self.countdown.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cancels the wake-up, leaving the session running.
    pub fn suspend(&self) {
        if let Some(countdown) = self.countdown().as_mut() {
            countdown.stop();
        }
    }

    /// Ends the countdown for good without firing the expiry hook.
    pub fn finish_countdown(&self) -> bool {
        match self.countdown().as_mut() {
            Some(countdown) => countdown.finish(),
            None => false,
        }
    }

    /// Drops a countdown that has already finished so `arm` can start a fresh one.
    pub(crate) fn clear_finished_countdown(&self) {
        let mut slot = self.countdown();
        if slot.as_ref().map(Countdown::phase) == Some(CountdownPhase::Finished) {
            *slot = None;
        }
    }

    /// Whether a wake-up is currently scheduled.
    pub fn is_ticking(&self) -> bool {
        self.countdown().as_ref().map(Countdown::phase) == Some(CountdownPhase::Running)
    }

    /// Live `{remainingSeconds, finished, expired}` updates, if a countdown was ever armed.
    pub fn subscribe(&self) -> Option<watch::Receiver<CountdownStatus>> {
        self.countdown().as_ref().map(Countdown::subscribe)
    }

    pub async fn view(&self, now: DateTime<Utc>) -> SessionView {
        let store = self.lock().await;
        self.view_with(&store, now)
    }

    /// View built from an already held lock.
    pub fn view_with(&self, store: &SessionStore, now: DateTime<Utc>) -> SessionView {
        SessionView::new(
            self.id,
            store.state(),
            store.remaining_seconds(now),
            store.answered_count(),
        )
    }
}

/// Live sessions plus the collaborators needed to persist and finalize them.
#[derive(Clone)]
pub struct ExamRegistry {
    pub(crate) pool: SqlitePool,
    pub(crate) history: Arc<dyn HistorySink>,
    pub(crate) clock: Arc<dyn Clock>,
    sessions: Arc<Mutex<HashMap<Uuid, Arc<LiveSession>>>>,
}

impl ExamRegistry {
    pub fn new(pool: SqlitePool, history: Arc<dyn HistorySink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            pool,
            history,
            clock,
            sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<LiveSession>>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of sessions currently held in memory.
    pub fn live_count(&self) -> usize {
        self.sessions().len()
    }

    pub(crate) fn forget(&self, id: Uuid) {
        self.sessions().remove(&id);
    }

    /// Starts a new attempt for `user_id` and arms its countdown.
    pub async fn begin(
        &self,
        user_id: &str,
        email: Option<&str>,
        questions: Vec<Question>,
        duration_seconds: u32,
    ) -> Result<Arc<LiveSession>, AppError> {
        if let Some(existing) = self.current_for_user(user_id).await? {
            let expired = existing.lock().await.is_expired(self.clock.now());
            if !expired {
                return Err(AppError::Conflict(
                    "An exam is already in progress; submit or reset it first".to_string(),
                ));
            }
            // Ran out while nobody was watching; close it before starting over.
            if let Err(e) = self.finalize(&existing, FinalizeTrigger::TimerExpired).await {
                tracing::warn!("Could not close expired session {}: {}", existing.id, e);
            }
        }

        let now = self.clock.now();
        let mut store = SessionStore::new();
        store.begin(questions, duration_seconds, now)?;

        let id = Uuid::new_v4();
        let question_count = store.state().questions.len();
        let state = store.state();
        sqlx::query(
            r#"
            INSERT INTO exam_sessions
            (id, user_id, email, questions, answers, review_flags, current_index, started_at, duration_seconds, status)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(user_id)
        .bind(email)
        .bind(Json(&state.questions))
        .bind(Json(&state.answers))
        .bind(Json(&state.review_flags))
        .bind(state.current_index as i64)
        .bind(now)
        .bind(i64::from(duration_seconds))
        .bind(SessionStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(
                "An exam is already in progress; submit or reset it first".to_string(),
            ),
            e => {
                tracing::error!("Failed to persist new session: {:?}", e);
                AppError::from(e)
            }
        })?;

        let session = Arc::new(LiveSession::new(
            id,
            user_id.to_string(),
            email.map(str::to_string),
            store,
            now,
            duration_seconds,
        ));
        self.sessions().insert(id, session.clone());
        self.arm(&session);

        tracing::info!(
            "Session {} started for user {} ({} questions, {}s)",
            id,
            user_id,
            question_count,
            duration_seconds
        );
        Ok(session)
    }

    /// Arms the countdown of a running session. No-op if it is already ticking.
    pub fn arm(&self, session: &Arc<LiveSession>) {
        let mut slot = session.countdown();
        let countdown = slot.get_or_insert_with(|| {
            Countdown::new(session.started_at, session.duration_seconds, self.clock.clone())
        });

        let registry = self.clone();
        let weak = Arc::downgrade(session);
        countdown.start(move || async move {
            let Some(session) = weak.upgrade() else {
                return;
            };
            if let Err(e) = registry.finalize(&session, FinalizeTrigger::TimerExpired).await {
                tracing::warn!("Auto-submit of session {} skipped: {}", session.id, e);
            }
        });
    }

    /// Re-arms the countdown if the session is still running.
    pub async fn resume(&self, session: &Arc<LiveSession>) {
        let running = session.lock().await.is_running();
        if running {
            self.arm(session);
        }
    }

    /// Looks a session up in memory, then in the database.
    ///
    /// A running session loaded from the database is registered and re-armed.
    /// A completed one is returned detached, for viewing only.
    pub async fn get(&self, id: Uuid) -> Result<Arc<LiveSession>, AppError> {
        let cached = self.sessions().get(&id).cloned();
        if let Some(session) = cached {
            return Ok(session);
        }

        let row = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM exam_sessions WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Session not found".to_string()))?;

        Ok(self.adopt(id, row))
    }

    /// Like `get`, but 403 for anyone but the owner.
    pub async fn get_owned(&self, id: Uuid, user_id: &str) -> Result<Arc<LiveSession>, AppError> {
        let session = self.get(id).await?;
        if !session.is_owned_by(user_id) {
            return Err(AppError::Forbidden(
                "This session belongs to another user".to_string(),
            ));
        }
        Ok(session)
    }

    /// The caller's running session, if any.
    pub async fn current_for_user(&self, user_id: &str) -> Result<Option<Arc<LiveSession>>, AppError> {
        match self.running_session_id(user_id).await? {
            Some(id) => Ok(Some(self.get(id).await?)),
            None => Ok(None),
        }
    }

    async fn running_session_id(&self, user_id: &str) -> Result<Option<Uuid>, AppError> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM exam_sessions WHERE user_id = ? AND status = 'running' LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(id.and_then(|id| Uuid::parse_str(&id).ok()))
    }

    fn adopt(&self, id: Uuid, row: SessionRow) -> Arc<LiveSession> {
        let running = row.is_running();
        let state = row.to_state();
        let duration_seconds = state.duration_seconds;
        let session = Arc::new(LiveSession::new(
            id,
            row.user_id,
            row.email,
            SessionStore::from_state(state),
            row.started_at,
            duration_seconds,
        ));

        if !running {
            return session;
        }

        let (session, inserted) = {
            let mut sessions = self.sessions();
            match sessions.get(&id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    sessions.insert(id, session.clone());
                    (session, true)
                }
            }
        };
        if inserted {
            self.arm(&session);
        }
        session
    }

    /// Registers and arms every running session in the database.
    /// Sessions that expired while the service was down finalize on their first tick.
    pub async fn rearm_all(&self) -> Result<usize, AppError> {
        let rows = sqlx::query_as::<_, SessionRow>(&format!(
            "SELECT {} FROM exam_sessions WHERE status = 'running'",
            SESSION_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut armed = 0;
        for row in rows {
            let Some(id) = row.session_id() else {
                tracing::warn!("Skipping session with malformed id {}", row.id);
                continue;
            };
            self.adopt(id, row);
            armed += 1;
        }

        if armed > 0 {
            tracing::info!("Re-armed {} running sessions", armed);
        }
        Ok(armed)
    }

    /// Finalizes registered sessions that ran out with no countdown ticking,
    /// typically ones suspended before their deadline. Returns how many closed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let idle: Vec<Arc<LiveSession>> = self
            .sessions()
            .values()
            .filter(|session| !session.is_ticking())
            .cloned()
            .collect();

        let mut closed = 0;
        for session in idle {
            if !session.lock().await.is_expired(now) {
                continue;
            }
            match self.finalize(&session, FinalizeTrigger::TimerExpired).await {
                Ok(_) => closed += 1,
                Err(e) => tracing::warn!("Sweep could not close session {}: {}", session.id, e),
            }
        }
        closed
    }

    /// Runs `sweep_expired` forever, `interval` apart.
    pub async fn run_sweeper(self, interval: Duration) {
        tracing::info!("Starting expired-session sweeper (interval {}s)", interval.as_secs());
        loop {
            tokio::time::sleep(interval).await;
            let closed = self.sweep_expired().await;
            if closed > 0 {
                tracing::info!("Sweeper closed {} expired sessions", closed);
            }
        }
    }

    /// Writes the mutable parts of a running session back to its row.
    /// Call while holding the session lock so writes land in order.
    pub async fn persist(&self, id: Uuid, store: &SessionStore) -> Result<(), AppError> {
        let state = store.state();
        sqlx::query(
            r#"
            UPDATE exam_sessions
            SET answers = ?, review_flags = ?, current_index = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(Json(&state.answers))
        .bind(Json(&state.review_flags))
        .bind(state.current_index as i64)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to persist session {}: {:?}", id, e);
            AppError::from(e)
        })?;
        Ok(())
    }

    /// Abandons a running session: no result, no history record.
    pub async fn reset(&self, session: &Arc<LiveSession>) -> Result<(), AppError> {
        let mut store = session.lock().await;
        if !store.is_running() {
            return Err(AppError::Conflict(
                "Only a running exam can be reset".to_string(),
            ));
        }

        sqlx::query("DELETE FROM exam_sessions WHERE id = ? AND status = 'running'")
            .bind(session.id.to_string())
            .execute(&self.pool)
            .await?;

        store.reset();
        session.finish_countdown();
        self.forget(session.id);

        tracing::info!("Session {} reset by user {}", session.id, session.user_id);
        Ok(())
    }
}
