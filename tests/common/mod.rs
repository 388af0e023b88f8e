#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use reqwest::StatusCode;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use emosense_lib::api::{ActivityCatalog, ApiError, InferenceClient, SessionGateway};
use emosense_lib::auth::{AuthContext, Role, UserAuthData};
use emosense_lib::capture::{CaptureDevice, CaptureError, CaptureStream, VideoTrack};
use emosense_lib::models::{Activity, EmotionResult, SessionHandle};
use emosense_lib::sampler::EncodedFrame;
use emosense_lib::session::{SessionConfig, SessionController, SessionDeps, SessionEvent};

pub const SESSION_ID: i64 = 501;
pub const STUDENT_ID: i64 = 42;
pub const MATERIA_ID: i64 = 3;
pub const ACTIVITY_ID: i64 = 7;

pub fn auth_as(role: Role) -> AuthContext {
    AuthContext::new(
        UserAuthData {
            id: STUDENT_ID,
            username: "ana".into(),
            email: "ana@example.edu".into(),
            rol: role,
            first_name: Some("Ana".into()),
            last_name: None,
        },
        "test-token",
    )
}

pub fn activity(minutes: i64) -> Activity {
    Activity {
        id: ACTIVITY_ID,
        materia: None,
        nombre: "Lectura comprensiva".into(),
        descripcion: String::new(),
        fecha_inicio: None,
        duracion_analisis_minutos: minutes,
    }
}

pub struct FakeCatalog {
    activity: Activity,
    pub calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn new(activity: Activity) -> Self {
        Self {
            activity,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ActivityCatalog for FakeCatalog {
    async fn get_activity(
        &self,
        _materia_id: i64,
        activity_id: i64,
    ) -> Result<Option<Activity>, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((activity_id == self.activity.id).then(|| self.activity.clone()))
    }
}

#[derive(Default)]
pub struct FakeGateway {
    pub create_calls: AtomicUsize,
    pub end_calls: Mutex<Vec<i64>>,
    pub fail_create: AtomicBool,
    pub fail_end: AtomicBool,
    pub create_delay: Mutex<Option<Duration>>,
}

impl FakeGateway {
    pub fn create_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn ended(&self) -> Vec<i64> {
        self.end_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionGateway for FakeGateway {
    async fn create_session(
        &self,
        _activity_id: i64,
        _student_id: i64,
    ) -> Result<SessionHandle, ApiError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.create_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                endpoint: "/api/sesiones-actividad/".into(),
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "database unavailable".into(),
            });
        }
        Ok(SessionHandle {
            id: SESSION_ID,
            fecha_hora_inicio_real: Some("2025-03-10T14:00:00Z".into()),
            fecha_hora_fin_real: None,
        })
    }

    async fn end_session(&self, session_id: i64) -> Result<SessionHandle, ApiError> {
        self.end_calls.lock().unwrap().push(session_id);
        if self.fail_end.load(Ordering::SeqCst) {
            return Err(ApiError::Timeout {
                endpoint: format!("/api/sesiones-actividad/{session_id}/end_session/"),
            });
        }
        Ok(SessionHandle {
            id: session_id,
            fecha_hora_inicio_real: Some("2025-03-10T14:00:00Z".into()),
            fecha_hora_fin_real: Some("2025-03-10T14:02:00Z".into()),
        })
    }
}

/// Answers `Detected("felicidad")` unless the call number is scripted to fail
/// or to find no face.
#[derive(Default)]
pub struct ScriptedInference {
    pub calls: Mutex<Vec<u64>>,
    pub failing_calls: Mutex<HashSet<usize>>,
    pub undetected_calls: Mutex<HashSet<usize>>,
    pub delay: Mutex<Option<Duration>>,
}

impl ScriptedInference {
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn infer(&self, _session_id: i64, _frame: &EncodedFrame, momento_segundo: u64) -> EmotionResult {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(momento_segundo);
            calls.len()
        };
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_calls.lock().unwrap().contains(&call) {
            EmotionResult::Failed {
                reason: "inference service returned 500".into(),
            }
        } else if self.undetected_calls.lock().unwrap().contains(&call) {
            EmotionResult::NotDetected
        } else {
            EmotionResult::Detected {
                label: "felicidad".into(),
                confidence: Some(0.875),
            }
        }
    }
}

pub struct FakeTrack {
    live: AtomicBool,
    pub stops: AtomicUsize,
    grabs: AtomicUsize,
    failing_grabs: Arc<Mutex<HashSet<usize>>>,
}

impl VideoTrack for FakeTrack {
    fn label(&self) -> &str {
        "fake-track"
    }

    fn grab_frame(&self) -> Result<RgbImage, CaptureError> {
        let grab = self.grabs.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_grabs.lock().unwrap().contains(&grab) {
            return Err(CaptureError::Frame("not ready".into()));
        }
        Ok(RgbImage::from_pixel(16, 12, image::Rgb([120, 80, 40])))
    }

    fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// Camera that records every stream it hands out.
#[derive(Default)]
pub struct FakeCamera {
    pub deny: AtomicBool,
    pub opens: AtomicUsize,
    pub tracks: Mutex<Vec<Arc<FakeTrack>>>,
    /// 1-based grab numbers that fail on every track this camera opens.
    pub failing_grabs: Arc<Mutex<HashSet<usize>>>,
}

impl FakeCamera {
    pub fn denying() -> Self {
        let camera = Self::default();
        camera.deny.store(true, Ordering::SeqCst);
        camera
    }

    /// Total `stop` calls across all tracks ever opened.
    pub fn stops(&self) -> usize {
        self.tracks
            .lock()
            .unwrap()
            .iter()
            .map(|track| track.stops.load(Ordering::SeqCst))
            .sum()
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks
            .lock()
            .unwrap()
            .iter()
            .filter(|track| track.is_live())
            .count()
    }
}

#[async_trait]
impl CaptureDevice for FakeCamera {
    fn name(&self) -> &str {
        "fake-camera"
    }

    async fn open(&self) -> Result<CaptureStream, CaptureError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(CaptureError::PermissionDenied(
                "NotAllowedError: Permission denied".into(),
            ));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let track = Arc::new(FakeTrack {
            live: AtomicBool::new(true),
            stops: AtomicUsize::new(0),
            grabs: AtomicUsize::new(0),
            failing_grabs: Arc::clone(&self.failing_grabs),
        });
        self.tracks.lock().unwrap().push(Arc::clone(&track));
        Ok(CaptureStream::new(vec![track as Arc<dyn VideoTrack>]))
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub catalog: Arc<FakeCatalog>,
    pub gateway: Arc<FakeGateway>,
    pub inference: Arc<ScriptedInference>,
    pub camera: Arc<FakeCamera>,
}

impl Harness {
    pub fn new(minutes: i64) -> Self {
        Self::build(
            minutes,
            auth_as(Role::Alumno),
            FakeCamera::default(),
            SessionConfig::default(),
        )
    }

    pub fn build(minutes: i64, auth: AuthContext, camera: FakeCamera, config: SessionConfig) -> Self {
        let catalog = Arc::new(FakeCatalog::new(activity(minutes)));
        let gateway = Arc::new(FakeGateway::default());
        let inference = Arc::new(ScriptedInference::default());
        let camera = Arc::new(camera);

        let deps = SessionDeps {
            catalog: catalog.clone(),
            gateway: gateway.clone(),
            inference: inference.clone(),
            camera: camera.clone(),
        };
        let controller = SessionController::new(auth, deps, config, None);

        Self {
            controller,
            catalog,
            gateway,
            inference,
            camera,
        }
    }

    /// Collects events until the session ends or the bus closes.
    pub fn record_events(&self) -> JoinHandle<Vec<SessionEvent>> {
        let mut events = self.controller.subscribe();
        tokio::spawn(async move {
            let mut seen = Vec::new();
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let done = matches!(event, SessionEvent::SessionEnded { .. });
                        seen.push(event);
                        if done {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            seen
        })
    }
}

pub fn countdown_values(events: &[SessionEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::CountdownTick { remaining_secs } => Some(*remaining_secs),
            _ => None,
        })
        .collect()
}
