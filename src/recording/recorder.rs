//! Session recorder
//!
//! Collects resolved frames in memory while active and writes them out as a
//! single [`Recording`] when stopped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use super::{RecordedFrame, Recording};
use crate::error::RecordingError;
use crate::skeleton::{BoneId, ResolvedFrame};

/// Shortest elapsed time used for the frame rate estimate
const MIN_ELAPSED_SECS: f64 = 1e-4;

/// Result of [`SessionRecorder::stop_and_save`]
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// Recording written to `path`
    Saved { path: PathBuf, frames: usize },
    /// Active but no frames were captured; nothing written
    Empty,
    /// No recording was in progress
    NotRecording,
}

#[derive(Debug)]
struct ActiveSession {
    recording: Recording,
    started_at: f64,
}

#[derive(Debug)]
pub struct SessionRecorder {
    output: PathBuf,
    record_only_mapped_bones: bool,
    max_duration_secs: Option<f64>,
    session: Option<ActiveSession>,
}

impl SessionRecorder {
    pub fn new(
        output: impl Into<PathBuf>,
        record_only_mapped_bones: bool,
        max_duration_secs: Option<f64>,
    ) -> Self {
        Self {
            output: output.into(),
            record_only_mapped_bones,
            max_duration_secs: max_duration_secs.filter(|d| *d > 0.0),
            session: None,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Frames captured in the current session
    pub fn frame_count(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.recording.len())
    }

    /// Begin a new empty session. No-op while already active.
    pub fn start(&mut self, now: f64) -> bool {
        if self.session.is_some() {
            return false;
        }

        self.session = Some(ActiveSession {
            recording: Recording::new(),
            started_at: now,
        });
        tracing::info!("Recording started -> {}", self.output.display());
        true
    }

    /// Append a resolved frame. `mapped` restricts the bones kept when
    /// only mapped bones are recorded.
    pub fn record_frame(&mut self, frame: &ResolvedFrame, mapped: &HashSet<BoneId>, now: f64) {
        let only_mapped = self.record_only_mapped_bones;
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let only = only_mapped.then_some(mapped);
        session
            .recording
            .frames
            .push(RecordedFrame::from_resolved(frame, only));

        let elapsed = (now - session.started_at).max(MIN_ELAPSED_SECS);
        session.recording.approx_frame_rate = (session.recording.len() as f64 / elapsed) as f32;
    }

    /// Whether the configured maximum duration has elapsed
    pub fn limit_reached(&self, now: f64) -> bool {
        match (&self.session, self.max_duration_secs) {
            (Some(session), Some(limit)) => now - session.started_at >= limit,
            _ => false,
        }
    }

    /// End the session and write it out.
    ///
    /// The in-memory session is discarded whether or not the write succeeds.
    pub fn stop_and_save(&mut self) -> Result<SaveOutcome, RecordingError> {
        let Some(session) = self.session.take() else {
            return Ok(SaveOutcome::NotRecording);
        };

        if session.recording.is_empty() {
            tracing::warn!("Recording stopped with no frames; nothing saved");
            return Ok(SaveOutcome::Empty);
        }

        let frames = session.recording.len();
        session.recording.save(&self.output)?;

        tracing::info!(
            "Recording saved: {} ({} frames, ~{:.1} fps)",
            self.output.display(),
            frames,
            session.recording.approx_frame_rate
        );

        Ok(SaveOutcome::Saved {
            path: self.output.clone(),
            frames,
        })
    }

    /// Discard the current session without saving
    pub fn cancel(&mut self) -> bool {
        let cancelled = self.session.take().is_some();
        if cancelled {
            tracing::info!("Recording cancelled");
        }
        cancelled
    }
}
