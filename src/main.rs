//! emosense - run emotion-sampled activity sessions from the terminal
//!
//! Subcommands:
//! - `emosense login <username>` - Obtain and store an API token
//! - `emosense run --materia M --actividad A` - Perform an activity
//! - `emosense sessions` - Show the local session journal
//! - `emosense recover` - Close sessions a previous run left open

use std::io::Write as _;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use emosense_lib::{
    session::{format_remaining, EndReport, SessionEvent},
    utils::logging,
    AppState, CameraSource,
};

#[derive(Parser)]
#[command(name = "emosense")]
#[command(about = "Activity sessions with webcam emotion sampling")]
#[command(version)]
struct Cli {
    /// Directory holding settings, credentials and the session journal
    #[arg(long, env = "EMOSENSE_HOME", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the token
    Login {
        username: String,

        /// Read from the terminal when omitted
        #[arg(long, env = "EMOSENSE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Invalidate the token and forget stored credentials
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Perform an activity: open the camera, start the session, sample frames
    Run {
        /// Subject id the activity belongs to
        #[arg(long)]
        materia: i64,

        /// Activity id
        #[arg(long)]
        actividad: i64,

        /// Replay frames from a directory instead of a webcam
        #[arg(long, conflicts_with = "webcam")]
        frames_dir: Option<PathBuf>,

        /// Webcam index (requires the `webcam` feature)
        #[arg(long)]
        webcam: Option<u32>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List recent sessions from the local journal
    Sessions {
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// End sessions left open by an interrupted run
    Recover,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let cli = Cli::parse();
    let app = AppState::open(resolve_data_dir(cli.data_dir)?)?;

    match cli.command {
        Commands::Login { username, password } => login(&app, &username, password).await,
        Commands::Logout => logout(&app).await,
        Commands::Whoami => {
            whoami(&app);
            Ok(())
        }
        Commands::Run {
            materia,
            actividad,
            frames_dir,
            webcam,
            json,
        } => {
            let source = camera_source(&app, frames_dir, webcam);
            run(&app, materia, actividad, source, json).await
        }
        Commands::Sessions { limit } => list_sessions(&app, limit).await,
        Commands::Recover => {
            let recovered = app.recover().await?;
            println!("Closed {recovered} unfinished session(s)");
            Ok(())
        }
    }
}

fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    let home = std::env::var_os("HOME").context("HOME is not set; pass --data-dir")?;
    Ok(PathBuf::from(home).join(".emosense"))
}

fn camera_source(app: &AppState, frames_dir: Option<PathBuf>, webcam: Option<u32>) -> CameraSource {
    let capture = app.settings.current().capture;
    match (frames_dir, webcam) {
        (Some(dir), _) => CameraSource::Frames(dir),
        (None, Some(index)) => CameraSource::Webcam(index),
        (None, None) => match capture.frames_dir {
            Some(dir) => CameraSource::Frames(dir),
            None => CameraSource::Webcam(capture.webcam_index),
        },
    }
}

async fn login(app: &AppState, username: &str, password: Option<String>) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => prompt("Password: ").await?,
    };

    let auth = app
        .auth_client()?
        .login(username, &password)
        .await
        .map_err(|err| anyhow!("login failed: {err}"))?;
    app.credentials.save(auth.clone())?;

    if let Some(user) = auth.current_user() {
        println!("Signed in as {} ({})", user.username, user.rol.as_str());
    }
    Ok(())
}

async fn logout(app: &AppState) -> Result<()> {
    let auth = app.current_auth();
    if auth.is_authenticated() {
        // Local credentials go regardless of what the backend says
        let _ = app.auth_client()?.logout(&auth).await;
    }
    app.credentials.clear()?;
    println!("Signed out");
    Ok(())
}

fn whoami(app: &AppState) {
    let auth = app.current_auth();
    match auth.current_user() {
        Some(user) => {
            let name = match (&user.first_name, &user.last_name) {
                (Some(first), Some(last)) => format!("{first} {last}"),
                (Some(first), None) => first.clone(),
                _ => user.username.clone(),
            };
            println!("{name} <{}> id={} rol={}", user.email, user.id, user.rol.as_str());
        }
        None => println!("Not signed in"),
    }
    println!("backend: {}", app.settings.current().api.base_url);
    println!("data:    {}", app.data_dir().display());
    println!("config:  {}", app.settings.path().display());
}

async fn list_sessions(app: &AppState, limit: usize) -> Result<()> {
    let entries = app.journal.list_journal_entries(limit).await?;
    if entries.is_empty() {
        println!("No sessions recorded");
        return Ok(());
    }

    for entry in entries {
        let duration = entry
            .ended_at
            .map(|end| format_remaining((end - entry.started_at).num_seconds().max(0) as u64))
            .unwrap_or_else(|| "--:--".into());
        println!(
            "{}  session={} activity={} {:<11} {} frames={} detections={}{}",
            entry.started_at.format("%Y-%m-%d %H:%M"),
            entry.session_id,
            entry.activity_id,
            entry.status.as_str(),
            duration,
            entry.counters.frames_sent,
            entry.counters.detections,
            if entry.acknowledged { "" } else { " (unacknowledged)" },
        );
    }
    Ok(())
}

async fn run(
    app: &AppState,
    materia: i64,
    actividad: i64,
    source: CameraSource,
    json: bool,
) -> Result<()> {
    let recovered = app.recover().await?;
    if recovered > 0 {
        warn!("Closed {recovered} session(s) left open by a previous run");
    }

    let controller = app.session_controller(&source)?;
    let renderer = tokio::spawn(render_events(controller.subscribe(), json));
    let mut ended = controller.subscribe();

    if let Err(err) = controller.start(materia, actividad).await {
        controller.teardown().await;
        renderer.abort();
        return Err(anyhow!(err));
    }

    if !json {
        println!("Press Enter to finish the activity, Ctrl-C to abort");
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let report = loop {
        tokio::select! {
            report = wait_for_end(&mut ended) => break report,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; tearing down session");
                break controller.teardown().await;
            }
            line = stdin.next_line() => {
                match line {
                    Ok(Some(_)) => match controller.end_session().await {
                        Ok(Some(report)) => break Some(report),
                        Ok(None) => continue,
                        Err(err) => return Err(anyhow!(err)),
                    },
                    // stdin closed: only the countdown or Ctrl-C can end it
                    Ok(None) | Err(_) => {
                        let report = tokio::select! {
                            report = wait_for_end(&mut ended) => report,
                            _ = tokio::signal::ctrl_c() => controller.teardown().await,
                        };
                        break report;
                    }
                }
            }
        }
    };

    if let Err(err) = renderer.await {
        if !err.is_cancelled() {
            warn!("Event renderer failed: {err}");
        }
    }

    match report {
        Some(report) if !report.acknowledged => Err(anyhow!(
            "session {} ended locally but the backend did not confirm it",
            report.session.id
        )),
        _ => Ok(()),
    }
}

async fn wait_for_end(events: &mut broadcast::Receiver<SessionEvent>) -> Option<EndReport> {
    loop {
        match events.recv().await {
            Ok(SessionEvent::SessionEnded { report }) => return Some(report),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn render_events(mut events: broadcast::Receiver<SessionEvent>, json: bool) {
    let mut remaining = String::from("--:--");
    let mut emotion = String::from("...");

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Renderer skipped {skipped} events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!("Failed to serialize event: {err}"),
            }
            if matches!(event, SessionEvent::SessionEnded { .. }) {
                break;
            }
            continue;
        }

        match event {
            SessionEvent::PhaseChanged { .. } => {}
            SessionEvent::ActivityLoaded { activity } => {
                println!("Actividad: {}", activity.nombre);
                if !activity.descripcion.is_empty() {
                    println!("  {}", activity.descripcion);
                }
            }
            SessionEvent::CameraReady => println!("Camera ready"),
            SessionEvent::CameraWarning { message } => eprintln!("Camera warning: {message}"),
            SessionEvent::NotEligible { message } => eprintln!("{message}"),
            SessionEvent::SessionStarted {
                session,
                remaining_secs,
            } => {
                if let Some(secs) = remaining_secs {
                    remaining = format_remaining(secs);
                }
                println!("Session {} started", session.id);
            }
            SessionEvent::CountdownTick { remaining_secs } => {
                remaining = format_remaining(remaining_secs);
                print_status(&remaining, &emotion);
            }
            SessionEvent::EmotionObserved { observation } => {
                emotion = observation.display();
                print_status(&remaining, &emotion);
            }
            SessionEvent::Error { error } => eprintln!("\nerror: {error}"),
            SessionEvent::SessionEnded { report } => {
                println!(
                    "\nSession {} ended ({}): {} frames sent, {} detected, {} not detected, {} failed",
                    report.session.id,
                    report.reason.as_str(),
                    report.counters.frames_sent,
                    report.counters.detections,
                    report.counters.not_detected,
                    report.counters.inference_failures,
                );
                break;
            }
        }
    }
}

fn print_status(remaining: &str, emotion: &str) {
    print!("\r{remaining}  {emotion:<32}");
    let _ = std::io::stdout().flush();
}

async fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let line = lines
        .next_line()
        .await?
        .context("no input provided")?;
    Ok(line.trim_end().to_string())
}
