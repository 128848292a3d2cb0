//! Error types for undertow

use thiserror::Error;

/// Result type alias for undertow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in undertow
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration file error
    #[error("Configuration error: {0}")]
    Config(String),

    /// MIDI backend error
    #[error("MIDI error: {0}")]
    Midi(String),

    /// OSC encoding or transport error
    #[error("OSC error: {0}")]
    Osc(String),

    /// Standard MIDI file export error
    #[error("Score error: {0}")]
    Score(String),

    /// A voice step failed; the voice is retired, the engine keeps running
    #[error("Voice '{voice}' failed: {message}")]
    Voice { voice: String, message: String },

    /// A console command could not be parsed
    #[error("Invalid command: {0}")]
    Command(String),

    /// The engine thread went away
    #[error("Engine channel closed")]
    ChannelClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Error {
    /// Shorthand for a voice-level failure.
    pub fn voice(voice: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Voice {
            voice: voice.into(),
            message: message.into(),
        }
    }
}

#[cfg(feature = "native")]
impl From<midir::InitError> for Error {
    fn from(err: midir::InitError) -> Self {
        Error::Midi(format!("Failed to initialise MIDI output: {err}"))
    }
}

#[cfg(feature = "native")]
impl From<midir::ConnectError<midir::MidiOutput>> for Error {
    fn from(err: midir::ConnectError<midir::MidiOutput>) -> Self {
        Error::Midi(format!("Failed to connect to MIDI port: {err}"))
    }
}

#[cfg(feature = "native")]
impl From<rosc::OscError> for Error {
    fn from(err: rosc::OscError) -> Self {
        Error::Osc(format!("{err:?}"))
    }
}
