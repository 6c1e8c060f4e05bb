use std::fmt;
use std::num::ParseIntError;
use thiserror::Error;

use crate::playlist::FragmentRef;

#[derive(Error, Debug)]
pub enum VdkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("parser error: {0}")]
    Parser(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("decrypt error: {0}")]
    Decrypt(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

pub type Result<T> = std::result::Result<T, VdkError>;

/// Broad family of a playback error, used by hosts to decide how to recover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed container, no matching demuxer, missing keyframes.
    MediaContent,
    /// Load failure or timeout.
    Network,
    /// Platform or software cipher failure.
    Decrypt,
    /// Sink rejected an append or ran out of quota.
    Buffer,
    /// Playback position stopped advancing.
    PlaybackStall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorDetails {
    LevelLoadError,
    LevelLoadTimeout,
    KeyLoadError,
    KeyLoadTimeout,
    FragLoadError,
    FragLoadTimeout,
    FragLoopLoadingError,
    FragDecryptError,
    FragParsingError,
    BufferAppendError,
    BufferAppendingError,
    BufferFullError,
    BufferStalledError,
    BufferSeekOverHole,
    BufferNudgeOnStall,
}

impl ErrorDetails {
    pub fn kind(self) -> ErrorKind {
        match self {
            ErrorDetails::LevelLoadError
            | ErrorDetails::LevelLoadTimeout
            | ErrorDetails::KeyLoadError
            | ErrorDetails::KeyLoadTimeout
            | ErrorDetails::FragLoadError
            | ErrorDetails::FragLoadTimeout => ErrorKind::Network,
            ErrorDetails::FragLoopLoadingError | ErrorDetails::FragParsingError => {
                ErrorKind::MediaContent
            }
            ErrorDetails::FragDecryptError => ErrorKind::Decrypt,
            ErrorDetails::BufferAppendError
            | ErrorDetails::BufferAppendingError
            | ErrorDetails::BufferFullError => ErrorKind::Buffer,
            ErrorDetails::BufferStalledError
            | ErrorDetails::BufferSeekOverHole
            | ErrorDetails::BufferNudgeOnStall => ErrorKind::PlaybackStall,
        }
    }
}

/// An error reported on the event bus.
///
/// Non-fatal errors are informational: the scheduler keeps making progress.
/// A fatal error moves the scheduler to its terminal error state.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackError {
    pub kind: ErrorKind,
    pub details: ErrorDetails,
    pub fatal: bool,
    pub frag: Option<FragmentRef>,
    pub reason: Option<String>,
}

impl PlaybackError {
    pub fn new(details: ErrorDetails, fatal: bool) -> Self {
        Self {
            kind: details.kind(),
            details,
            fatal,
            frag: None,
            reason: None,
        }
    }

    pub fn with_frag(mut self, frag: FragmentRef) -> Self {
        self.frag = Some(frag);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}/{:?}{}",
            self.kind,
            self.details,
            if self.fatal { " (fatal)" } else { "" }
        )?;
        if let Some(frag) = &self.frag {
            write!(f, " level {} sn {}", frag.level, frag.sn)?;
        }
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}
