//! Session player
//!
//! Replays a loaded [`Recording`] at a fixed frame rate scaled by a speed
//! factor. Time is accumulated across ticks, so a slow tick emits several
//! frames and a fast one may emit none.

use std::path::Path;

use super::{InitializationSnapshot, Recording};
use crate::error::RecordingError;
use crate::skeleton::{ResolvedFrame, SkeletonDefinition};

#[derive(Debug)]
pub struct SessionPlayer {
    frame_rate: f32,
    speed: f32,
    loop_playback: bool,
    recording: Option<Recording>,
    cursor: usize,
    timer: f64,
    playing: bool,
}

impl SessionPlayer {
    pub fn new(frame_rate: f32, speed: f32, loop_playback: bool) -> Self {
        Self {
            frame_rate,
            speed,
            loop_playback,
            recording: None,
            cursor: 0,
            timer: 0.0,
            playing: false,
        }
    }

    /// Load a recording and rewind to its first frame.
    ///
    /// On failure the player is left stopped with nothing loaded.
    pub fn load(&mut self, path: &Path) -> Result<usize, RecordingError> {
        self.playing = false;
        self.cursor = 0;
        self.timer = 0.0;

        match Recording::load(path) {
            Ok(recording) => {
                let frames = recording.len();
                tracing::info!(
                    "Loaded recording for playback: {} ({} frames)",
                    path.display(),
                    frames
                );
                self.recording = Some(recording);
                Ok(frames)
            }
            Err(e) => {
                self.recording = None;
                Err(e)
            }
        }
    }

    /// Rebuild the skeleton definition stored next to a recording
    pub fn load_snapshot(path: &Path) -> Result<SkeletonDefinition, RecordingError> {
        let snapshot = InitializationSnapshot::load(path)?;
        snapshot.to_definition().map_err(|e| RecordingError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Start or resume. Rewinds first if the cursor is past the last frame.
    /// Returns false when nothing is loaded.
    pub fn play(&mut self) -> bool {
        let Some(recording) = &self.recording else {
            return false;
        };

        if self.cursor >= recording.len() {
            self.cursor = 0;
            self.timer = 0.0;
        }
        self.playing = true;
        true
    }

    /// Halt emission, keeping the recording and cursor
    pub fn stop(&mut self) {
        self.playing = false;
    }

    /// Drop the loaded recording
    pub fn unload(&mut self) {
        self.playing = false;
        self.recording = None;
        self.cursor = 0;
        self.timer = 0.0;
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_loaded(&self) -> bool {
        self.recording.is_some()
    }

    /// Index of the next frame to emit
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn frame_count(&self) -> usize {
        self.recording.as_ref().map_or(0, Recording::len)
    }

    pub fn recording(&self) -> Option<&Recording> {
        self.recording.as_ref()
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.speed = speed.max(0.0);
    }

    pub fn set_loop(&mut self, loop_playback: bool) {
        self.loop_playback = loop_playback;
    }

    /// Advance playback time by `dt` seconds and return the frames due
    pub fn advance(&mut self, dt: f32) -> Vec<ResolvedFrame> {
        let mut emitted = Vec::new();
        if !self.playing {
            return emitted;
        }
        let Some(recording) = &self.recording else {
            return emitted;
        };
        if recording.is_empty() {
            return emitted;
        }

        // Without a frame rate, one frame per tick
        let frame_duration = if self.frame_rate > 0.0 {
            1.0 / self.frame_rate as f64
        } else {
            dt as f64
        };
        if frame_duration <= 0.0 {
            return emitted;
        }

        self.timer += dt as f64 * self.speed as f64;

        while self.timer >= frame_duration {
            self.timer -= frame_duration;
            emitted.push(recording.frames[self.cursor].to_resolved());

            self.cursor += 1;
            if self.cursor >= recording.len() {
                if self.loop_playback {
                    self.cursor = 0;
                } else {
                    tracing::info!("Playback reached the end of the recording");
                    self.playing = false;
                    break;
                }
            }
        }

        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::{RecordedFrame, SessionRecorder};
    use crate::skeleton::{BoneId, BonePose};
    use glam::{Quat, Vec3};
    use std::collections::{BTreeMap, HashSet};
    use tempfile::TempDir;

    const RATE: f32 = 8.0;
    const FRAME: f32 = 1.0 / RATE;

    fn resolved(frame_id: u32) -> ResolvedFrame {
        let mut bones = BTreeMap::new();
        bones.insert(
            BoneId(0),
            BonePose::new(Vec3::new(frame_id as f32, 1.0, 0.0), Quat::IDENTITY),
        );
        bones.insert(
            BoneId(5),
            BonePose::new(
                Vec3::new(0.0, 1.5, frame_id as f32 * 0.1),
                Quat::from_rotation_z(frame_id as f32 * 0.1),
            ),
        );
        ResolvedFrame {
            frame_id,
            timestamp: frame_id as f32 * FRAME,
            unix_time: 1_700_000_000.0,
            bones,
            partial: Vec::new(),
        }
    }

    fn write_recording(dir: &TempDir, frames: u32) -> std::path::PathBuf {
        let path = dir.path().join("session.json");
        let mut recording = Recording::new();
        recording.approx_frame_rate = RATE;
        recording.frames = (0..frames)
            .map(|i| RecordedFrame::from_resolved(&resolved(i), None))
            .collect();
        recording.save(&path).unwrap();
        path
    }

    #[test]
    fn test_looping_wraps_cursor() {
        let dir = TempDir::new().unwrap();
        let path = write_recording(&dir, 10);

        let mut player = SessionPlayer::new(RATE, 1.0, true);
        assert_eq!(player.load(&path).unwrap(), 10);
        assert!(player.play());

        let frames = player.advance(11.0 * FRAME);
        assert_eq!(frames.len(), 11);
        assert_eq!(frames[10].frame_id, 0);
        assert_eq!(player.cursor(), 1);
        assert!(player.is_playing());
    }

    #[test]
    fn test_accumulator_across_ticks() {
        let dir = TempDir::new().unwrap();
        let path = write_recording(&dir, 10);

        let mut player = SessionPlayer::new(RATE, 1.0, true);
        player.load(&path).unwrap();
        player.play();

        // Half a frame: nothing yet
        assert!(player.advance(FRAME / 2.0).is_empty());
        // Second half completes frame 0
        let frames = player.advance(FRAME / 2.0);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_id, 0);
        // A slow tick emits several
        assert_eq!(player.advance(3.0 * FRAME).len(), 3);
        assert_eq!(player.cursor(), 4);
    }

    #[test]
    fn test_speed_scales_time() {
        let dir = TempDir::new().unwrap();
        let path = write_recording(&dir, 10);

        let mut player = SessionPlayer::new(RATE, 2.0, false);
        player.load(&path).unwrap();
        player.play();
        assert_eq!(player.advance(2.0 * FRAME).len(), 4);

        player.set_speed(0.0);
        assert!(player.advance(10.0).is_empty());
    }

    #[test]
    fn test_stops_at_end_without_loop() {
        let dir = TempDir::new().unwrap();
        let path = write_recording(&dir, 3);

        let mut player = SessionPlayer::new(RATE, 1.0, false);
        player.load(&path).unwrap();
        player.play();

        let frames = player.advance(10.0 * FRAME);
        assert_eq!(frames.len(), 3);
        assert!(!player.is_playing());
        assert!(player.advance(FRAME).is_empty());

        // Playing again restarts from the beginning
        assert!(player.play());
        assert_eq!(player.advance(FRAME)[0].frame_id, 0);
    }

    #[test]
    fn test_stop_is_resumable() {
        let dir = TempDir::new().unwrap();
        let path = write_recording(&dir, 10);

        let mut player = SessionPlayer::new(RATE, 1.0, false);
        player.load(&path).unwrap();
        player.play();
        player.advance(2.0 * FRAME);

        player.stop();
        assert!(player.advance(5.0 * FRAME).is_empty());
        assert_eq!(player.cursor(), 2);

        player.play();
        assert_eq!(player.advance(FRAME)[0].frame_id, 2);
    }

    #[test]
    fn test_load_failure_leaves_player_stopped() {
        let dir = TempDir::new().unwrap();
        let path = write_recording(&dir, 4);

        let mut player = SessionPlayer::new(RATE, 1.0, true);
        player.load(&path).unwrap();
        player.play();

        let missing = dir.path().join("nope.json");
        assert!(matches!(
            player.load(&missing),
            Err(RecordingError::NotFound(_))
        ));
        assert!(!player.is_playing());
        assert!(!player.is_loaded());
        assert!(!player.play());
        assert!(player.advance(1.0).is_empty());
    }

    #[test]
    fn test_record_then_play_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("round_trip.json");

        let originals: Vec<ResolvedFrame> = (0..6).map(resolved).collect();
        let mut recorder = SessionRecorder::new(&path, false, None);
        recorder.start(0.0);
        for (i, frame) in originals.iter().enumerate() {
            recorder.record_frame(frame, &HashSet::new(), (i + 1) as f64 * FRAME as f64);
        }
        recorder.stop_and_save().unwrap();

        let mut player = SessionPlayer::new(RATE, 1.0, false);
        player.load(&path).unwrap();
        player.play();

        let mut replayed = Vec::new();
        for _ in 0..originals.len() {
            replayed.extend(player.advance(FRAME));
        }

        assert_eq!(replayed.len(), originals.len());
        for (original, replay) in originals.iter().zip(&replayed) {
            assert_eq!(original.frame_id, replay.frame_id);
            assert_eq!(original.bones.len(), replay.bones.len());
            for (id, pose) in &original.bones {
                let other = &replay.bones[id];
                assert!(pose.position.distance(other.position) < 1e-5);
                assert!(pose.rotation.dot(other.rotation).abs() > 1.0 - 1e-6);
            }
        }
    }

    #[test]
    fn test_load_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mocopi_initialization.json");
        std::fs::write(&path, r#"{"bone_ids":[0,1,2],"parent_ids":[-1,0,0]}"#).unwrap();

        let definition = SessionPlayer::load_snapshot(&path).unwrap();
        assert_eq!(definition.len(), 3);
        assert_eq!(definition.parent_of(BoneId(2)), Some(BoneId(0)));

        std::fs::write(&path, r#"{"bone_ids":[0,1],"parent_ids":[1,0]}"#).unwrap();
        match SessionPlayer::load_snapshot(&path) {
            Err(RecordingError::Parse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
