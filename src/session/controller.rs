use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::{ActivityCatalog, InferenceClient, SessionGateway};
use crate::auth::AuthContext;
use crate::capture::{CaptureDevice, CaptureManager};
use crate::db::{Database, JournalEntry, JournalStatus};
use crate::error::SessionError;
use crate::models::{Activity, ActivitySession, EmotionObservation, EmotionResult};
use crate::sampler::{
    FrameReport, SamplerController, SamplerCounters, SamplerStats, SamplingContext,
    DEFAULT_CAPTURE_INTERVAL, DEFAULT_JPEG_QUALITY,
};

use super::events::{EndReport, EventBus, SessionEvent};
use super::policy::RolePolicy;
use super::state::{EndReason, SessionPhase, SessionState};

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

/// Remote and hardware collaborators of a session.
#[derive(Clone)]
pub struct SessionDeps {
    pub catalog: Arc<dyn ActivityCatalog>,
    pub gateway: Arc<dyn SessionGateway>,
    pub inference: Arc<dyn InferenceClient>,
    pub camera: Arc<dyn CaptureDevice>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub capture_interval: Duration,
    pub jpeg_quality: u8,
    pub role_policy: RolePolicy,
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capture_interval: DEFAULT_CAPTURE_INTERVAL,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            role_policy: RolePolicy::default(),
            event_capacity: 256,
        }
    }
}

struct CountdownHandle {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Outcome of checking whether a session may be created right now.
enum Readiness {
    Waiting,
    NotEligible,
    AlreadyActive(ActivitySession),
    Start(Activity, i64),
}

/// Drives one activity attempt from activity lookup to the end of the
/// session. Cheap to clone; all clones share the same session.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    attempt_id: String,
    auth: AuthContext,
    config: SessionConfig,
    catalog: Arc<dyn ActivityCatalog>,
    gateway: Arc<dyn SessionGateway>,
    inference: Arc<dyn InferenceClient>,
    state: Mutex<SessionState>,
    capture: Mutex<CaptureManager>,
    sampler: Mutex<SamplerController>,
    countdown: Mutex<Option<CountdownHandle>>,
    observer: Mutex<Option<JoinHandle<()>>>,
    /// Held from `Active` until the sampler and countdown are in place.
    wiring: Mutex<()>,
    stats: Arc<SamplerStats>,
    events: EventBus,
    journal: Option<Database>,
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        if self.capture.get_mut().release() {
            warn!(
                "Session controller {} dropped while holding the camera; stream released",
                self.attempt_id
            );
        }
    }
}

impl SessionController {
    pub fn new(
        auth: AuthContext,
        deps: SessionDeps,
        config: SessionConfig,
        journal: Option<Database>,
    ) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            inner: Arc::new(ControllerInner {
                attempt_id: Uuid::new_v4().to_string(),
                auth,
                catalog: deps.catalog,
                gateway: deps.gateway,
                inference: deps.inference,
                state: Mutex::new(SessionState::new()),
                capture: Mutex::new(CaptureManager::new(deps.camera)),
                sampler: Mutex::new(SamplerController::new()),
                countdown: Mutex::new(None),
                observer: Mutex::new(None),
                wiring: Mutex::new(()),
                stats: Arc::new(SamplerStats::default()),
                events,
                journal,
                config,
            }),
        }
    }

    pub fn attempt_id(&self) -> &str {
        &self.inner.attempt_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub async fn state(&self) -> SessionState {
        self.inner.state.lock().await.clone()
    }

    pub async fn phase(&self) -> SessionPhase {
        self.inner.state.lock().await.phase
    }

    pub fn counters(&self) -> SamplerCounters {
        self.inner.stats.snapshot()
    }

    /// `(acquisitions, releases)` of the camera over this controller's life.
    pub async fn camera_usage(&self) -> (u64, u64) {
        let capture = self.inner.capture.lock().await;
        (capture.acquisitions(), capture.releases())
    }

    /// Loads the activity, opens the camera and creates the session. An
    /// earlier creation failure is cleared first, so calling this again is
    /// the manual retry.
    pub async fn start(
        &self,
        materia_id: i64,
        activity_id: i64,
    ) -> Result<ActivitySession, SessionError> {
        self.ensure_authenticated().await?;
        self.inner.state.lock().await.reset_failure();

        self.load_activity(materia_id, activity_id).await?;
        self.acquire_camera().await?;

        let state = self.inner.state.lock().await;
        match (state.phase, &state.session) {
            (SessionPhase::Active, Some(session)) => Ok(session.clone()),
            (SessionPhase::Ending | SessionPhase::Ended, _) => Err(
                SessionError::PreconditionUnmet("session already finished".into()),
            ),
            _ => Err(SessionError::PreconditionUnmet(
                "this account is not allowed to perform the activity".into(),
            )),
        }
    }

    pub async fn load_activity(
        &self,
        materia_id: i64,
        activity_id: i64,
    ) -> Result<Activity, SessionError> {
        self.ensure_authenticated().await?;

        let activity = match self.inner.catalog.get_activity(materia_id, activity_id).await {
            Ok(Some(activity)) => activity,
            Ok(None) => {
                let err = SessionError::PreconditionUnmet(format!(
                    "activity {activity_id} not found for subject {materia_id}"
                ));
                return Err(self.surface_error(err).await);
            }
            Err(err) => return Err(self.surface_error(err.into()).await),
        };

        let phase = {
            let mut state = self.inner.state.lock().await;
            if !state.is_pre_session() {
                return Err(SessionError::PreconditionUnmet(
                    "session already started".into(),
                ));
            }
            state.activity = Some(activity.clone());
            state.settle_waiting_phase();
            state.phase
        };

        info!(
            "Activity {} '{}' loaded ({} min analysis)",
            activity.id, activity.nombre, activity.duracion_analisis_minutos
        );
        self.inner.events.emit(SessionEvent::ActivityLoaded {
            activity: activity.clone(),
        });
        self.emit_phase(phase);

        self.evaluate_preconditions().await?;
        Ok(activity)
    }

    pub async fn acquire_camera(&self) -> Result<(), SessionError> {
        self.ensure_authenticated().await?;

        if !self.inner.config.role_policy.may_preview(&self.inner.auth) {
            let err = SessionError::PreconditionUnmet(
                "only students can use the camera for this activity".into(),
            );
            return Err(self.surface_error(err).await);
        }

        {
            let state = self.inner.state.lock().await;
            if state.torn_down {
                return Err(SessionError::PreconditionUnmet("session view closed".into()));
            }
            if !state.is_pre_session() {
                return Err(SessionError::PreconditionUnmet(format!(
                    "camera cannot be reopened once the session is {}",
                    state.phase.as_str()
                )));
            }
        }

        let acquired = self.inner.capture.lock().await.acquire().await.map(|_| ());
        if let Err(err) = acquired {
            return Err(self.surface_error(err.into()).await);
        }

        let phase = {
            let mut state = self.inner.state.lock().await;
            if state.torn_down {
                None
            } else {
                state.camera_ready = true;
                state.settle_waiting_phase();
                Some(state.phase)
            }
        };

        let Some(phase) = phase else {
            // Torn down while the device was opening
            self.inner.capture.lock().await.release();
            return Err(SessionError::PreconditionUnmet("session view closed".into()));
        };

        self.inner.events.emit(SessionEvent::CameraReady);
        self.emit_phase(phase);

        self.evaluate_preconditions().await?;
        Ok(())
    }

    /// Requests a manual end. Returns `None` when the session was not active
    /// (already ending, ended, or never started).
    pub async fn end_session(&self) -> Result<Option<EndReport>, SessionError> {
        self.request_end(EndReason::Manual).await
    }

    /// Cleanup for when the owner goes away: ends an active session through
    /// the normal path, otherwise just releases the camera.
    pub async fn teardown(&self) -> Option<EndReport> {
        let phase = {
            let mut state = self.inner.state.lock().await;
            state.torn_down = true;
            state.phase
        };

        if phase == SessionPhase::Active {
            match self.request_end(EndReason::Teardown).await {
                Ok(report) => return report,
                Err(err) => error!("Teardown failed to end session: {err}"),
            }
        }

        if self.inner.capture.lock().await.release() {
            info!("Camera released on teardown ({})", phase.as_str());
        }
        None
    }

    async fn ensure_authenticated(&self) -> Result<(), SessionError> {
        if self.inner.auth.is_authenticated() {
            return Ok(());
        }
        let err = SessionError::Unauthenticated("sign in before starting an activity".into());
        Err(self.surface_error(err).await)
    }

    async fn surface_error(&self, err: SessionError) -> SessionError {
        self.inner.state.lock().await.last_error = Some(err.clone());

        if err.is_camera_warning() {
            warn!("Camera unavailable: {err}");
            self.inner.events.emit(SessionEvent::CameraWarning {
                message: err.to_string(),
            });
        } else {
            error!("{err}");
            self.inner
                .events
                .emit(SessionEvent::Error { error: err.clone() });
        }
        err
    }

    fn emit_phase(&self, phase: SessionPhase) {
        self.inner.events.emit(SessionEvent::PhaseChanged { phase });
    }

    async fn evaluate_preconditions(&self) -> Result<Option<ActivitySession>, SessionError> {
        let readiness = {
            let mut state = self.inner.state.lock().await;
            if state.phase == SessionPhase::Active {
                Readiness::AlreadyActive(
                    state
                        .session
                        .clone()
                        .ok_or_else(|| SessionError::PreconditionUnmet("missing session".into()))?,
                )
            } else if !state.is_pre_session() {
                Readiness::Waiting
            } else {
                state.settle_waiting_phase();
                if state.phase != SessionPhase::AwaitingPreconditions || state.start_failed {
                    Readiness::Waiting
                } else if !self.inner.config.role_policy.permits(&self.inner.auth) {
                    Readiness::NotEligible
                } else {
                    match (state.activity.clone(), self.inner.auth.current_user()) {
                        (Some(activity), Some(user)) => {
                            if state.try_latch_start() {
                                Readiness::Start(activity, user.id)
                            } else {
                                Readiness::Waiting
                            }
                        }
                        _ => Readiness::Waiting,
                    }
                }
            }
        };

        match readiness {
            Readiness::Waiting => Ok(None),
            Readiness::NotEligible => {
                self.inner.events.emit(SessionEvent::NotEligible {
                    message: "only students can perform this activity".into(),
                });
                Ok(None)
            }
            Readiness::AlreadyActive(session) => Ok(Some(session)),
            Readiness::Start(activity, student_id) => {
                self.activate(activity, student_id).await.map(Some)
            }
        }
    }

    async fn activate(
        &self,
        activity: Activity,
        student_id: i64,
    ) -> Result<ActivitySession, SessionError> {
        info!(
            "Creating session for activity {} (student {}, attempt {})",
            activity.id, student_id, self.inner.attempt_id
        );

        let handle = match self
            .inner
            .gateway
            .create_session(activity.id, student_id)
            .await
        {
            Ok(handle) => handle,
            Err(err) => {
                let err = SessionError::from(err);
                self.inner.capture.lock().await.release();
                let phase = {
                    let mut state = self.inner.state.lock().await;
                    state.fail_start(err.clone());
                    state.phase
                };
                error!("Session creation failed: {err}");
                self.inner
                    .events
                    .emit(SessionEvent::Error { error: err.clone() });
                self.emit_phase(phase);
                return Err(err);
            }
        };

        let started = Instant::now();
        let session = ActivitySession::from_handle(&handle, activity.id, student_id, Utc::now());
        let countdown_secs = activity.countdown_secs();
        let surface = self.inner.capture.lock().await.surface();

        // An end request that wins `Active -> Ending` waits on this before
        // stopping anything, so it always finds the sampler and countdown.
        let _wiring = self.inner.wiring.lock().await;
        let surface = {
            let mut state = self.inner.state.lock().await;
            match surface {
                Some(surface) if !state.torn_down => {
                    state.activate(session.clone(), countdown_secs);
                    surface
                }
                _ => {
                    // Owner went away (or the camera did) while the gateway
                    // was creating the record: close it again right away.
                    state.starting = false;
                    let torn_down = state.torn_down;
                    let mut closed = session.clone();
                    closed.close(Utc::now());
                    state.session = Some(closed);
                    state.phase = SessionPhase::Ended;
                    drop(state);

                    warn!("Session {} created after its view closed; ending it", session.id);
                    if let Err(err) = self.inner.gateway.end_session(session.id).await {
                        error!("Failed to end orphaned session {}: {err}", session.id);
                    }
                    self.inner.capture.lock().await.release();
                    self.emit_phase(SessionPhase::Ended);

                    return Err(if torn_down {
                        SessionError::PreconditionUnmet("session view closed".into())
                    } else {
                        SessionError::DeviceUnavailable("camera stream lost".into())
                    });
                }
            }
        };

        self.journal_started(&session).await;

        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let ctx = SamplingContext {
            session_id: session.id,
            surface,
            inference: Arc::clone(&self.inner.inference),
            started_at: started,
            interval: self.inner.config.capture_interval,
            jpeg_quality: self.inner.config.jpeg_quality,
            stats: Arc::clone(&self.inner.stats),
            reports: reports_tx,
        };
        if let Err(err) = self.inner.sampler.lock().await.start(ctx) {
            error!("Failed to start frame sampling: {err:#}");
        }
        *self.inner.observer.lock().await = Some(self.spawn_observer(reports_rx));

        match countdown_secs {
            Some(secs) => {
                info!("Countdown started: {secs}s");
                *self.inner.countdown.lock().await = Some(self.spawn_countdown());
            }
            None => info!("Activity has no analysis duration; session ends manually"),
        }

        info!("Session {} active", session.id);
        self.inner.events.emit(SessionEvent::SessionStarted {
            session: session.clone(),
            remaining_secs: countdown_secs,
        });
        self.emit_phase(SessionPhase::Active);

        Ok(session)
    }

    fn spawn_observer(&self, mut reports: mpsc::UnboundedReceiver<FrameReport>) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(report) = reports.recv().await {
                controller.apply_report(report).await;
            }
        })
    }

    async fn apply_report(&self, report: FrameReport) {
        let observation = EmotionObservation::from_result(&report.result, report.momento_segundo);
        let recorded = self
            .inner
            .state
            .lock()
            .await
            .record_observation(observation.clone());
        if !recorded {
            debug!("Dropping inference result for tick {} after session end", report.tick);
            return;
        }

        if let EmotionResult::Failed { reason } = &report.result {
            let error = if report.capture_failed {
                SessionError::Device(reason.clone())
            } else {
                SessionError::Inference(reason.clone())
            };
            self.inner.events.emit(SessionEvent::Error { error });
        }
        self.inner
            .events
            .emit(SessionEvent::EmotionObserved { observation });
    }

    fn spawn_countdown(&self) -> CountdownHandle {
        let cancel_token = CancellationToken::new();
        let token = cancel_token.clone();
        let controller = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + COUNTDOWN_TICK, COUNTDOWN_TICK);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let remaining = controller.inner.state.lock().await.tick_countdown();
                        let Some(remaining) = remaining else {
                            break;
                        };

                        controller
                            .inner
                            .events
                            .emit(SessionEvent::CountdownTick { remaining_secs: remaining });

                        if remaining == 0 {
                            info!("Countdown reached zero; ending session");
                            // Ending cancels this task, so it runs on its own.
                            let ender = controller.clone();
                            tokio::spawn(async move {
                                if let Err(err) = ender.request_end(EndReason::Timeout).await {
                                    error!("Automatic session end failed: {err}");
                                }
                            });
                            break;
                        }
                    }
                }
            }
        });

        CountdownHandle {
            handle,
            cancel_token,
        }
    }

    async fn stop_countdown(&self) {
        let countdown = self.inner.countdown.lock().await.take();
        if let Some(countdown) = countdown {
            countdown.cancel_token.cancel();
            if let Err(err) = countdown.handle.await {
                if !err.is_cancelled() {
                    error!("Countdown task failed: {err}");
                }
            }
        }
    }

    /// The single termination routine behind manual end, countdown expiry
    /// and teardown. Only the caller that wins `Active -> Ending` runs it.
    async fn request_end(&self, reason: EndReason) -> Result<Option<EndReport>, SessionError> {
        let session = {
            let mut state = self.inner.state.lock().await;
            if !state.begin_ending(reason) {
                debug!(
                    "End requested ({}) while session is {}; ignoring",
                    reason.as_str(),
                    state.phase.as_str()
                );
                return Ok(None);
            }
            state.session.clone()
        };
        drop(self.inner.wiring.lock().await);
        self.emit_phase(SessionPhase::Ending);
        info!("Ending session ({})", reason.as_str());

        self.stop_countdown().await;
        if let Err(err) = self.inner.sampler.lock().await.stop().await {
            error!("Failed to stop frame sampling: {err:#}");
        }
        self.inner.capture.lock().await.release();

        let Some(session) = session else {
            self.inner.state.lock().await.finish(Utc::now());
            self.emit_phase(SessionPhase::Ended);
            return Err(SessionError::PreconditionUnmet("no session record to end".into()));
        };

        let (acknowledged, gateway_error, ended_at) =
            match self.inner.gateway.end_session(session.id).await {
                Ok(handle) => (true, None, handle.ended_at().unwrap_or_else(Utc::now)),
                Err(err) => {
                    let err = SessionError::from(err);
                    error!("Gateway did not acknowledge end of session {}: {err}", session.id);
                    (false, Some(err), Utc::now())
                }
            };

        if let Some(observer) = self.inner.observer.lock().await.take() {
            observer.abort();
        }

        let counters = self.inner.stats.snapshot();
        let session = {
            let mut state = self.inner.state.lock().await;
            state.finish(ended_at);
            if let Some(err) = &gateway_error {
                state.last_error = Some(err.clone());
            }
            state.session.clone().unwrap_or(session)
        };

        self.journal_ended(&session, reason, acknowledged, counters)
            .await;

        if let Some(err) = &gateway_error {
            self.inner
                .events
                .emit(SessionEvent::Error { error: err.clone() });
        }

        let report = EndReport {
            session,
            reason,
            counters,
            acknowledged,
            gateway_error,
        };
        info!(
            "Session {} ended: {} frames sent, {} detections, {} inference failures",
            report.session.id, counters.frames_sent, counters.detections, counters.inference_failures
        );
        self.emit_phase(SessionPhase::Ended);
        self.inner.events.emit(SessionEvent::SessionEnded {
            report: report.clone(),
        });

        Ok(Some(report))
    }

    async fn journal_started(&self, session: &ActivitySession) {
        let Some(db) = &self.inner.journal else {
            return;
        };
        let now = Utc::now();
        let entry = JournalEntry {
            id: self.inner.attempt_id.clone(),
            session_id: session.id,
            activity_id: session.activity_id,
            student_id: session.student_id,
            started_at: session.started_at,
            ended_at: None,
            status: JournalStatus::Active,
            end_reason: None,
            acknowledged: false,
            counters: SamplerCounters::default(),
            created_at: now,
            updated_at: now,
        };
        if let Err(err) = db.insert_journal_entry(&entry).await {
            error!("Failed to journal session {}: {err:#}", session.id);
        }
    }

    async fn journal_ended(
        &self,
        session: &ActivitySession,
        reason: EndReason,
        acknowledged: bool,
        counters: SamplerCounters,
    ) {
        let Some(db) = &self.inner.journal else {
            return;
        };
        let ended_at = session.ended_at.unwrap_or_else(Utc::now);
        if let Err(err) = db
            .mark_journal_ended(
                &self.inner.attempt_id,
                JournalStatus::Ended,
                Some(reason),
                ended_at,
                acknowledged,
                counters,
            )
            .await
        {
            error!("Failed to journal end of session {}: {err:#}", session.id);
        }
    }
}
