use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::api::InferenceClient;
use crate::capture::VideoSurface;
use crate::models::EmotionResult;

use super::encode::encode_jpeg;
use super::stats::SamplerStats;

// Set to false to silence per-tick logging
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const DEFAULT_CAPTURE_INTERVAL: Duration = Duration::from_millis(1500);

/// Everything one sampling run needs. The surface is borrowed from the
/// session's capture stream; the loop never stops the stream itself.
pub struct SamplingContext {
    pub session_id: i64,
    pub surface: VideoSurface,
    pub inference: Arc<dyn InferenceClient>,
    pub started_at: Instant,
    pub interval: Duration,
    pub jpeg_quality: u8,
    pub stats: Arc<SamplerStats>,
    pub reports: mpsc::UnboundedSender<FrameReport>,
}

/// Result of one tick's inference, delivered whenever the request settles.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub tick: u64,
    pub momento_segundo: u64,
    pub result: EmotionResult,
    /// The frame never reached inference; `result` carries the capture error.
    pub capture_failed: bool,
}

pub async fn sampling_loop(ctx: SamplingContext, cancel_token: CancellationToken) {
    // First capture one full period after start
    let mut ticker = time::interval_at(Instant::now() + ctx.interval, ctx.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    log_info!(
        "sampling loop started for session {} every {}ms",
        ctx.session_id,
        ctx.interval.as_millis()
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("sampling loop for session {} shutting down", ctx.session_id);
                break;
            }
            _ = ticker.tick() => dispatch_tick(&ctx),
        }
    }
}

/// Grabs and encodes synchronously, then hands the frame to a detached
/// inference task so a slow request never holds up the next tick.
fn dispatch_tick(ctx: &SamplingContext) {
    let tick = ctx.stats.record_tick();
    let momento_segundo = ctx.started_at.elapsed().as_secs();

    let frame = match ctx
        .surface
        .grab()
        .and_then(|raw| encode_jpeg(&raw, ctx.jpeg_quality))
    {
        Ok(frame) => frame,
        Err(err) => {
            ctx.stats.record_device_failure();
            log_warn!("tick {tick} skipped for session {}: {err}", ctx.session_id);
            let _ = ctx.reports.send(FrameReport {
                tick,
                momento_segundo,
                result: EmotionResult::Failed {
                    reason: err.to_string(),
                },
                capture_failed: true,
            });
            return;
        }
    };

    ctx.stats.record_frame_sent();

    let session_id = ctx.session_id;
    let inference = Arc::clone(&ctx.inference);
    let stats = Arc::clone(&ctx.stats);
    let reports = ctx.reports.clone();

    tokio::spawn(async move {
        let result = inference.infer(session_id, &frame, momento_segundo).await;

        match &result {
            EmotionResult::Detected { .. } => stats.record_detection(),
            EmotionResult::NotDetected => stats.record_not_detected(),
            EmotionResult::Failed { reason } => {
                stats.record_inference_failure();
                log_warn!("inference for tick {tick} (session {session_id}) failed: {reason}");
            }
        }

        // Receiver is gone once the session has ended; late results are dropped.
        let _ = reports.send(FrameReport {
            tick,
            momento_segundo,
            result,
            capture_failed: false,
        });
    });
}
