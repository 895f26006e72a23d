//! Error types for mocopi-tracker

use std::path::PathBuf;

use thiserror::Error;

use crate::skeleton::BoneId;

/// Main error type for mocopi-tracker
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Skeleton error: {0}")]
    Skeleton(#[from] SkeletonError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },
}

/// Transport (UDP receiver) errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// The endpoint could not be bound. The receiver stays stopped.
    #[error("Failed to start receiver on {endpoint}: {reason}")]
    StartFailed { endpoint: String, reason: String },

    /// A single datagram could not be read or decoded. Reception continues.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// Wire decoding errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PacketError {
    #[error("Truncated field header at offset {offset}")]
    TruncatedHeader { offset: usize },

    #[error("Field '{tag}' declares {declared} bytes but only {available} remain")]
    TruncatedField {
        tag: String,
        declared: usize,
        available: usize,
    },

    #[error("Field '{tag}' has length {actual}, expected {expected}")]
    BadLength {
        tag: String,
        expected: usize,
        actual: usize,
    },

    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    #[error("Packet carries neither a skeleton definition nor a frame")]
    NoPayload,

    #[error("Invalid skeleton definition: {0}")]
    Skeleton(#[from] SkeletonError),
}

/// Skeleton definition validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SkeletonError {
    #[error("Skeleton definition is empty")]
    Empty,

    #[error("Skeleton definition has no root bone")]
    NoRoot,

    #[error("Skeleton definition has multiple root bones: {0} and {1}")]
    MultipleRoots(BoneId, BoneId),

    #[error("Bone {0} appears more than once")]
    DuplicateBone(BoneId),

    #[error("Bone {bone} references missing parent {parent}")]
    MissingParent { bone: BoneId, parent: BoneId },

    #[error("Bone {0} is part of a cycle")]
    Cycle(BoneId),

    #[error("Bone id array has {bones} entries but parent id array has {parents}")]
    LengthMismatch { bones: usize, parents: usize },

    #[error("Invalid bone id {0}")]
    InvalidBoneId(i64),
}

/// Recording save/load errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Recording file not found: {0}")]
    NotFound(PathBuf),

    #[error("Recording is empty: {0}")]
    Empty(PathBuf),

    #[error("Failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Failed to save {path}: {reason}")]
    Save { path: PathBuf, reason: String },
}

/// Result type alias for mocopi-tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;
