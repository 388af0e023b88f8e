pub mod api;
pub mod auth;
pub mod capture;
pub mod db;
pub mod error;
pub mod models;
pub mod sampler;
pub mod session;
pub mod settings;
pub mod utils;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use log::info;

use api::{ApiClient, HttpActivityCatalog, HttpInferenceClient, HttpSessionGateway};
use auth::{AuthClient, AuthContext, CredentialStore};
use capture::{CaptureDevice, ReplayCamera};
use db::Database;
use session::{SessionController, SessionDeps};
use settings::SettingsStore;

pub use error::SessionError;

/// Where camera frames come from.
#[derive(Debug, Clone, PartialEq)]
pub enum CameraSource {
    /// Loop over the images in a directory.
    Frames(PathBuf),
    /// Native webcam by index (needs the `webcam` feature).
    Webcam(u32),
}

impl CameraSource {
    pub fn open_device(&self) -> Result<Arc<dyn CaptureDevice>> {
        match self {
            CameraSource::Frames(dir) => Ok(Arc::new(ReplayCamera::from_dir(dir.clone()))),
            #[cfg(feature = "webcam")]
            CameraSource::Webcam(index) => Ok(Arc::new(capture::WebcamDevice::new(*index))),
            #[cfg(not(feature = "webcam"))]
            CameraSource::Webcam(index) => {
                bail!("webcam {index} requested but emosense was built without the `webcam` feature")
            }
        }
    }
}

/// Long-lived state shared by every command: settings, stored credentials
/// and the session journal, all under one data directory.
pub struct AppState {
    data_dir: PathBuf,
    pub settings: SettingsStore,
    pub credentials: CredentialStore,
    pub journal: Database,
}

impl AppState {
    pub fn open(data_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::new(data_dir.join("settings.json"))?;
        let credentials = CredentialStore::new(data_dir.join("credentials.json"))?;
        let journal = Database::new(data_dir.join("emosense.sqlite3"))?;

        info!("Using data directory {}", data_dir.display());
        Ok(Self {
            data_dir,
            settings,
            credentials,
            journal,
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn api_client(&self, timeout_secs: u64) -> Result<ApiClient> {
        let settings = self.settings.current();
        let token = self.credentials.current().token().map(str::to_string);
        Ok(ApiClient::new(&settings.api.base_url, Duration::from_secs(timeout_secs))?
            .with_token(token))
    }

    pub fn auth_client(&self) -> Result<AuthClient> {
        let timeout = self.settings.current().api.request_timeout_secs;
        Ok(AuthClient::new(self.api_client(timeout)?))
    }

    pub fn session_gateway(&self) -> Result<HttpSessionGateway> {
        let timeout = self.settings.current().api.request_timeout_secs;
        Ok(HttpSessionGateway::new(self.api_client(timeout)?))
    }

    pub fn session_deps(&self, camera: Arc<dyn CaptureDevice>) -> Result<SessionDeps> {
        let api = self.settings.current().api;
        let requests = self.api_client(api.request_timeout_secs)?;
        let inference = self.api_client(api.inference_timeout_secs)?;

        Ok(SessionDeps {
            catalog: Arc::new(HttpActivityCatalog::new(requests.clone())),
            gateway: Arc::new(HttpSessionGateway::new(requests)),
            inference: Arc::new(HttpInferenceClient::new(inference)),
            camera,
        })
    }

    /// A controller for one attempt, signed in as the stored user.
    pub fn session_controller(&self, source: &CameraSource) -> Result<SessionController> {
        let auth = self.credentials.current();
        if !auth.is_authenticated() {
            bail!("not signed in; run `emosense login` first");
        }

        let deps = self.session_deps(source.open_device()?)?;
        let config = self.settings.current().session_config();
        Ok(SessionController::new(
            auth,
            deps,
            config,
            Some(self.journal.clone()),
        ))
    }

    pub fn current_auth(&self) -> AuthContext {
        self.credentials.current()
    }

    /// Ends sessions a previous run left open at the backend.
    pub async fn recover(&self) -> Result<usize> {
        if !self.credentials.current().is_authenticated() {
            let pending = self.journal.get_active_journal_entries().await?.len();
            if pending > 0 {
                log::warn!("{pending} unfinished session(s) pending; sign in to close them");
            }
            return Ok(0);
        }
        let gateway = self.session_gateway()?;
        session::recover_interrupted_sessions(&self.journal, &gateway).await
    }
}
