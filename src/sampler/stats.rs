use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Running counters for one sampling session.
#[derive(Debug, Default)]
pub struct SamplerStats {
    ticks: AtomicU64,
    frames_sent: AtomicU64,
    device_failures: AtomicU64,
    detections: AtomicU64,
    not_detected: AtomicU64,
    inference_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SamplerCounters {
    pub ticks: u64,
    pub frames_sent: u64,
    pub device_failures: u64,
    pub detections: u64,
    pub not_detected: u64,
    pub inference_failures: u64,
}

impl SamplerStats {
    pub fn record_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_device_failure(&self) {
        self.device_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection(&self) {
        self.detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_detected(&self) {
        self.not_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_inference_failure(&self) {
        self.inference_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SamplerCounters {
        SamplerCounters {
            ticks: self.ticks.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            device_failures: self.device_failures.load(Ordering::Relaxed),
            detections: self.detections.load(Ordering::Relaxed),
            not_detected: self.not_detected.load(Ordering::Relaxed),
            inference_failures: self.inference_failures.load(Ordering::Relaxed),
        }
    }
}
