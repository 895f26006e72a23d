//! Per-consumer tracker
//!
//! Owns everything that runs on the update tick for one mocopi consumer:
//! the staged handoff from the receive thread, the skeleton resolver, the
//! mapping table and its targets, the session recorder and player, and the
//! Live/Playback mode switch.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::TrackerConfig;
use crate::error::{RecordingError, TrackerError};
use crate::recording::{InitializationSnapshot, SaveOutcome, SessionPlayer, SessionRecorder};
use crate::skeleton::{
    BoneId, MappingSet, ResolvedFrame, SkeletonDefinition, SkeletonResolver, TargetTable,
    TrackerMapping,
};
use crate::transport::Staging;

/// Where resolved frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerMode {
    /// Frames from the network, resolved through the skeleton
    #[default]
    Live,
    /// Frames replayed from a recording
    Playback,
}

/// Downstream consumer of skeleton events, called on the update tick
pub trait SkeletonObserver: Send {
    fn on_definition(&mut self, _definition: &SkeletonDefinition) {}

    fn on_resolved(&mut self, _frame: &ResolvedFrame) {}
}

/// What a single tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// A new skeleton definition was applied
    pub definition: bool,
    /// Frames resolved or replayed
    pub frames: usize,
    /// Target writes performed by mappings
    pub targets_updated: usize,
    /// Bones with an incomplete ancestor chain
    pub partial: usize,
    /// Frames appended to the active recording
    pub recorded: usize,
}

/// Snapshot of tracker state for status logging
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerStatus {
    pub mode: TrackerMode,
    pub initialized: bool,
    pub recording: bool,
    pub recorded_frames: usize,
    pub playing: bool,
    pub playback_cursor: usize,
    pub playback_frames: usize,
    pub frames_dropped: u64,
    pub receive_errors: u64,
    pub last_frame_id: Option<u32>,
}

pub struct Tracker {
    settings: TrackerConfig,
    staging: Arc<Staging>,
    resolver: SkeletonResolver,
    mappings: MappingSet,
    targets: TargetTable,
    recorder: SessionRecorder,
    player: SessionPlayer,
    mode: TrackerMode,
    /// Seconds of tick time since creation
    clock: f64,
    /// Whether a recording session should be running in live mode
    recording_requested: bool,
    snapshot_written: bool,
    /// Skeleton announced to observers for the loaded recording
    playback_definition: Option<Arc<SkeletonDefinition>>,
    last_frame_id: Option<u32>,
    observers: Vec<Box<dyn SkeletonObserver>>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("name", &self.settings.name)
            .field("mode", &self.mode)
            .field("mappings", &self.mappings.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Tracker {
    /// Build a tracker from its configuration and enter the configured mode
    pub fn new(settings: TrackerConfig) -> Self {
        let staging = Staging::new(settings.handoff, settings.queue_capacity);
        let resolver = SkeletonResolver::new(settings.position_mode, settings.partial_policy);
        let mappings = MappingSet::new(settings.mappings.clone());
        let recorder = SessionRecorder::new(
            settings.recording_path(),
            settings.recording.record_only_mapped_bones,
            settings.recording.max_duration_secs,
        );
        let player = SessionPlayer::new(
            settings.playback.frame_rate,
            settings.playback.speed,
            settings.playback.loop_playback,
        );
        let initial_mode = settings.mode;
        let recording_requested = settings.recording.enabled;

        let mut tracker = Self {
            settings,
            staging,
            resolver,
            mappings,
            targets: TargetTable::new(),
            recorder,
            player,
            mode: TrackerMode::Live,
            clock: 0.0,
            recording_requested,
            snapshot_written: false,
            playback_definition: None,
            last_frame_id: None,
            observers: Vec::new(),
        };

        if let Err(e) = tracker.set_mode(initial_mode) {
            tracing::error!("Tracker '{}': {}", tracker.name(), e);
        }

        tracker
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &TrackerConfig {
        &self.settings
    }

    /// Sink to register with the receiver registry
    pub fn staging(&self) -> Arc<Staging> {
        Arc::clone(&self.staging)
    }

    pub fn mode(&self) -> TrackerMode {
        self.mode
    }

    pub fn resolver(&self) -> &SkeletonResolver {
        &self.resolver
    }

    pub fn targets(&self) -> &TargetTable {
        &self.targets
    }

    pub fn mappings(&self) -> &MappingSet {
        &self.mappings
    }

    pub fn player(&self) -> &SessionPlayer {
        &self.player
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_active()
    }

    /// Register an observer. It is sent the skeleton for the current mode
    /// first, if one is known, so frames never arrive before a definition.
    pub fn add_observer(&mut self, mut observer: Box<dyn SkeletonObserver>) {
        let current = match self.mode {
            TrackerMode::Live => self.resolver.definition(),
            TrackerMode::Playback => self.playback_definition.as_ref(),
        };
        if let Some(definition) = current {
            observer.on_definition(definition);
        }
        self.observers.push(observer);
    }

    pub fn add_mapping(&mut self, mapping: TrackerMapping) {
        self.mappings.add(mapping);
    }

    /// Switch between live tracking and playback.
    ///
    /// The mode always changes. Entering playback saves an active recording
    /// first; a recording that fails to load leaves playback stopped and is
    /// reported as an error.
    pub fn set_mode(&mut self, mode: TrackerMode) -> Result<(), TrackerError> {
        if mode == self.mode {
            return Ok(());
        }

        tracing::info!(
            "Tracker '{}' mode {:?} -> {:?}",
            self.settings.name,
            self.mode,
            mode
        );
        self.mode = mode;

        match mode {
            TrackerMode::Playback => self.enter_playback(),
            TrackerMode::Live => {
                self.player.stop();
                self.playback_definition = None;
                Ok(())
            }
        }
    }

    fn enter_playback(&mut self) -> Result<(), TrackerError> {
        if self.recorder.is_active() {
            self.recording_requested = false;
            self.finish_recording();
        }

        self.playback_definition = None;
        let path = self.settings.playback_path();
        self.player.load(&path)?;

        match SessionPlayer::load_snapshot(&self.settings.initialization_path()) {
            Ok(definition) => {
                let definition = Arc::new(definition);
                for observer in &mut self.observers {
                    observer.on_definition(&definition);
                }
                self.playback_definition = Some(definition);
            }
            Err(e) => tracing::warn!("No skeleton definition for playback: {}", e),
        }

        self.player.play();
        Ok(())
    }

    /// Start recording. In playback mode the session begins once live mode resumes.
    pub fn start_recording(&mut self) {
        self.recording_requested = true;
        if self.mode == TrackerMode::Live {
            self.recorder.start(self.clock);
        }
    }

    /// Stop the active recording and write it out
    pub fn stop_recording(&mut self) -> Result<SaveOutcome, RecordingError> {
        self.recording_requested = false;
        self.recorder.stop_and_save()
    }

    /// Discard the active recording
    pub fn cancel_recording(&mut self) -> bool {
        self.recording_requested = false;
        self.recorder.cancel()
    }

    /// Run one update step. `dt` is the time since the previous tick in seconds.
    pub fn tick(&mut self, dt: f32) -> TickReport {
        self.clock += dt.max(0.0) as f64;

        match self.mode {
            TrackerMode::Live => self.tick_live(),
            TrackerMode::Playback => self.tick_playback(dt),
        }
    }

    fn tick_live(&mut self) -> TickReport {
        let mut report = TickReport::default();

        if self.recording_requested && !self.recorder.is_active() {
            self.recorder.start(self.clock);
        } else if !self.recording_requested && self.recorder.is_active() {
            self.finish_recording();
        }

        if let Some(definition) = self.staging.take_definition() {
            self.apply_definition(definition);
            report.definition = true;
        }

        let frames = self.staging.take_frames();
        if !self.resolver.is_initialized() {
            if !frames.is_empty() {
                tracing::debug!(
                    "Tracker '{}' dropped {} frames received before a skeleton definition",
                    self.settings.name,
                    frames.len()
                );
            }
            return report;
        }

        let mapped: HashSet<BoneId> = self.mappings.bone_ids();

        for frame in frames {
            let resolved = self.resolver.on_frame(&frame);
            report.partial += resolved.partial.len();

            if self.recorder.is_active() {
                if self.recorder.limit_reached(self.clock) {
                    tracing::info!("Max recording duration reached, stopping recording");
                    self.recording_requested = false;
                    self.finish_recording();
                } else {
                    self.recorder.record_frame(&resolved, &mapped, self.clock);
                    report.recorded += 1;
                }
            }

            self.emit(&resolved, &mut report);
        }

        report
    }

    fn tick_playback(&mut self, dt: f32) -> TickReport {
        let mut report = TickReport::default();

        // Live data keeps arriving; keep the skeleton current and drop frames
        if let Some(definition) = self.staging.take_definition() {
            self.apply_definition(definition);
            report.definition = true;
        }
        self.staging.take_frames();

        for frame in self.player.advance(dt) {
            self.emit(&frame, &mut report);
        }

        report
    }

    fn apply_definition(&mut self, definition: Arc<SkeletonDefinition>) {
        self.resolver.on_definition(Arc::clone(&definition));

        self.mappings.validate();
        tracing::debug!(
            "Tracker '{}' driving {} mappings",
            self.settings.name,
            self.mappings.len()
        );

        for observer in &mut self.observers {
            observer.on_definition(&definition);
        }

        if !self.snapshot_written {
            let path = self.settings.initialization_path();
            match InitializationSnapshot::from_definition(&definition).save(&path) {
                Ok(()) => tracing::info!("Initialization snapshot saved to {}", path.display()),
                Err(e) => tracing::error!("Failed to save initialization snapshot: {}", e),
            }
            // Attempted once per tracker, like the live definition itself
            self.snapshot_written = true;
        }
    }

    fn emit(&mut self, frame: &ResolvedFrame, report: &mut TickReport) {
        report.frames += 1;
        report.targets_updated += self.mappings.apply(frame, &mut self.targets);
        self.last_frame_id = Some(frame.frame_id);

        for observer in &mut self.observers {
            observer.on_resolved(frame);
        }
    }

    fn finish_recording(&mut self) {
        match self.recorder.stop_and_save() {
            Ok(_) => {}
            Err(e) => tracing::error!("Tracker '{}': {}", self.settings.name, e),
        }
    }

    /// Save any active recording. Called on shutdown.
    pub fn shutdown(&mut self) {
        self.recording_requested = false;
        self.finish_recording();
        self.player.stop();
    }

    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            mode: self.mode,
            initialized: self.resolver.is_initialized(),
            recording: self.recorder.is_active(),
            recorded_frames: self.recorder.frame_count(),
            playing: self.player.is_playing(),
            playback_cursor: self.player.cursor(),
            playback_frames: self.player.frame_count(),
            frames_dropped: self.staging.frames_dropped(),
            receive_errors: self.staging.receive_errors(),
            last_frame_id: self.last_frame_id,
        }
    }
}
