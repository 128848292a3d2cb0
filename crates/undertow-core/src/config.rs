//! Configuration file support for undertow
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/undertow/config.toml`
//! - macOS: `~/Library/Application Support/undertow/config.toml`
//! - Windows: `%APPDATA%\undertow\config.toml`
//!
//! Out-of-range values are clamped by [`Config::sanitized`], never rejected.

use crate::error::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineSettings,
    pub mix: MixSettings,
    pub climate: ClimateSettings,
    pub sleep: SleepSettings,
    pub midi: MidiSettings,
    pub audio: AudioSettings,
}

impl Config {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(Error::Config(_)) => Self::default(),
            Err(e) => {
                log::warn!("Ignoring unreadable config: {}", e);
                Self::default()
            }
        }
    }

    /// Load and sanitize a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config.sanitized())
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "undertow") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        Self::write_default_config_file(&path)?;
        Ok(path)
    }

    pub fn write_default_config_file(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG)?;
        Ok(())
    }

    /// Clamp every field into its usable range.
    pub fn sanitized(mut self) -> Self {
        let e = &mut self.engine;
        e.bpm = e.bpm.filter(|b| b.is_finite()).map(|b| b.clamp(1.0, 999.0));
        e.piece = e.piece.trim().to_ascii_lowercase();

        let m = &mut self.mix;
        m.master_amplitude = clamp_f(m.master_amplitude, 0.0, 2.0, 0.9);
        m.room_mix = clamp_f(m.room_mix, 0.0, 1.0, 0.35);
        m.room_size = clamp_f(m.room_size, 0.0, 1.0, 0.85);
        m.room_damp = clamp_f(m.room_damp, 0.0, 1.0, 0.7);

        let c = &mut self.climate;
        c.depth = clamp_f(c.depth, 0.0, 0.5, 0.22);
        c.update_seconds = clamp_f(c.update_seconds, 1.0, 3600.0, 28.0);

        let s = &mut self.sleep;
        s.guide_minutes = clamp_f(s.guide_minutes, 0.0, 240.0, 4.0);
        s.descent_minutes = clamp_f(s.descent_minutes, 0.0, 240.0, 12.0);
        s.pulse_winddown_range = sanitize_range(s.pulse_winddown_range, [8.0, 15.0]);
        s.pulse_sleep_range = sanitize_range(s.pulse_sleep_range, [12.0, 24.0]);
        s.chime_odds = clamp_f(s.chime_odds, 0.0, 1.0, 0.14);
        s.chime_fade_minutes = clamp_f(s.chime_fade_minutes, 0.1, 24.0 * 60.0, 25.0);
        s.binaural_carrier_hz = clamp_f(s.binaural_carrier_hz, 20.0, 1000.0, 100.0);
        s.binaural_beat_hz = clamp_f(s.binaural_beat_hz, 0.0, 40.0, 3.0);
        s.guide_sample_amp = clamp_f(s.guide_sample_amp, 0.0, 2.0, 0.9);

        let midi = &mut self.midi;
        midi.channels = midi.channels.sanitized();
        midi.bass_velocity = midi.bass_velocity.min(127);
        midi.bass_velocity_edict = midi.bass_velocity_edict.min(127);
        midi.bass_velocity_dissolve = midi.bass_velocity_dissolve.min(127);
        midi.mod_wheel_cc = midi.mod_wheel_cc.min(127);
        midi.mod_wheel_jitter = midi.mod_wheel_jitter.min(16);
        if midi.port.as_deref().is_some_and(|p| p.trim().is_empty()) {
            midi.port = None;
        }
        self
    }
}

/// Read any integer into a byte, saturating at 0 and 255. The MIDI
/// ranges themselves are applied by [`Config::sanitized`].
fn saturating_byte<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = i64::deserialize(deserializer)?;
    Ok(value.clamp(0, u8::MAX as i64) as u8)
}

fn clamp_f(value: f64, lo: f64, hi: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(lo, hi)
    } else {
        fallback
    }
}

fn sanitize_range(range: [f64; 2], fallback: [f64; 2]) -> [f64; 2] {
    let lo = clamp_f(range[0], 0.1, 3600.0, fallback[0]);
    let hi = clamp_f(range[1], 0.1, 3600.0, fallback[1]);
    if lo <= hi {
        [lo, hi]
    } else {
        [hi, lo]
    }
}

/// Which piece to play and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// `emerald`, `abyssal` or `root-sleep`
    pub piece: String,
    /// Overrides the piece's own tempo
    pub bpm: Option<f64>,
    /// Fixed random seed; unset means a fresh performance every run
    pub seed: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            piece: "emerald".to_string(),
            bpm: None,
            seed: None,
        }
    }
}

/// Master level and shared room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixSettings {
    pub master_amplitude: f64,
    pub room_mix: f64,
    pub room_size: f64,
    pub room_damp: f64,
}

impl Default for MixSettings {
    fn default() -> Self {
        Self {
            master_amplitude: 0.9,
            room_mix: 0.35,
            room_size: 0.85,
            room_damp: 0.7,
        }
    }
}

/// The slow shared control stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateSettings {
    pub enabled: bool,
    pub depth: f64,
    pub update_seconds: f64,
}

impl Default for ClimateSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            depth: 0.22,
            update_seconds: 28.0,
        }
    }
}

/// Root Sleep settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepSettings {
    pub guide_minutes: f64,
    pub descent_minutes: f64,
    /// Sub pulse period bounds in seconds
    pub pulse_winddown_range: [f64; 2],
    pub pulse_sleep_range: [f64; 2],
    pub chime_enabled: bool,
    /// Chance per chime cycle at full strength
    pub chime_odds: f64,
    pub chime_fade_minutes: f64,
    pub binaural_enabled: bool,
    pub binaural_carrier_hz: f64,
    pub binaural_beat_hz: f64,
    pub whisper_enabled: bool,
    /// Narration sample played during winddown
    pub guide_sample: Option<String>,
    pub guide_sample_amp: f64,
}

impl Default for SleepSettings {
    fn default() -> Self {
        Self {
            guide_minutes: 4.0,
            descent_minutes: 12.0,
            pulse_winddown_range: [8.0, 15.0],
            pulse_sleep_range: [12.0, 24.0],
            chime_enabled: true,
            chime_odds: 0.14,
            chime_fade_minutes: 25.0,
            binaural_enabled: true,
            binaural_carrier_hz: 100.0,
            binaural_beat_hz: 3.0,
            whisper_enabled: true,
            guide_sample: None,
            guide_sample_amp: 0.9,
        }
    }
}

/// MIDI output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSettings {
    pub enabled: bool,
    pub cc_enabled: bool,
    /// Preferred output port; first available when unset
    pub port: Option<String>,
    /// Use `port` or nothing
    pub port_forced: bool,
    pub channels: ChannelMap,
    #[serde(deserialize_with = "saturating_byte")]
    pub bass_velocity: u8,
    #[serde(deserialize_with = "saturating_byte")]
    pub bass_velocity_edict: u8,
    #[serde(deserialize_with = "saturating_byte")]
    pub bass_velocity_dissolve: u8,
    /// Controller moved during held bass notes
    #[serde(deserialize_with = "saturating_byte")]
    pub mod_wheel_cc: u8,
    /// Random spread per ramp step
    #[serde(deserialize_with = "saturating_byte")]
    pub mod_wheel_jitter: u8,
}

impl Default for MidiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cc_enabled: true,
            port: None,
            port_forced: false,
            channels: ChannelMap::default(),
            bass_velocity: 95,
            bass_velocity_edict: 110,
            bass_velocity_dissolve: 70,
            mod_wheel_cc: 1,
            mod_wheel_jitter: 2,
        }
    }
}

/// 1-based MIDI channel per layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMap {
    #[serde(deserialize_with = "saturating_byte")]
    pub drums: u8,
    #[serde(deserialize_with = "saturating_byte")]
    pub bass: u8,
    #[serde(deserialize_with = "saturating_byte")]
    pub sub: u8,
    #[serde(deserialize_with = "saturating_byte")]
    pub skank: u8,
    #[serde(deserialize_with = "saturating_byte")]
    pub halo: u8,
    #[serde(deserialize_with = "saturating_byte")]
    pub phrase: u8,
    #[serde(deserialize_with = "saturating_byte")]
    pub drone: u8,
    #[serde(deserialize_with = "saturating_byte")]
    pub chant: u8,
    #[serde(deserialize_with = "saturating_byte")]
    pub hats: u8,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            drums: 10,
            bass: 1,
            sub: 2,
            skank: 2,
            halo: 3,
            phrase: 4,
            drone: 3,
            chant: 4,
            hats: 5,
        }
    }
}

impl ChannelMap {
    fn sanitized(self) -> Self {
        let c = |ch: u8| ch.clamp(1, 16);
        Self {
            drums: c(self.drums),
            bass: c(self.bass),
            sub: c(self.sub),
            skank: c(self.skank),
            halo: c(self.halo),
            phrase: c(self.phrase),
            drone: c(self.drone),
            chant: c(self.chant),
            hats: c(self.hats),
        }
    }
}

/// External synthesis engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Unset lets the piece decide
    pub enabled: Option<bool>,
    /// UDP address of the OSC synthesis server
    pub osc_target: String,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: None,
            osc_target: "127.0.0.1:57110".to_string(),
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# undertow configuration file

[engine]
# Piece to play: "emerald", "abyssal" or "root-sleep"
piece = "emerald"

# Override the piece's tempo
# bpm = 72

# Fix the random seed for a repeatable performance
# seed = 42

[mix]
master_amplitude = 0.9
room_mix = 0.35
room_size = 0.85
room_damp = 0.7

[climate]
# One slow control stream most Root Sleep layers follow
enabled = true
depth = 0.22
update_seconds = 28.0

[sleep]
guide_minutes = 4.0
descent_minutes = 12.0
# Sub pulse period bounds in seconds
pulse_winddown_range = [8.0, 15.0]
pulse_sleep_range = [12.0, 24.0]
chime_enabled = true
chime_odds = 0.14
chime_fade_minutes = 25.0
binaural_enabled = true
binaural_carrier_hz = 100.0
binaural_beat_hz = 3.0
whisper_enabled = true
# guide_sample = "/path/to/narration.wav"
guide_sample_amp = 0.9

[midi]
enabled = true
cc_enabled = true
# port = "IAC Driver Bus 1"
# Only ever use the port above
port_forced = false
bass_velocity = 95
bass_velocity_edict = 110
bass_velocity_dissolve = 70
mod_wheel_cc = 1
mod_wheel_jitter = 2

[midi.channels]
drums = 10
bass = 1
sub = 2
skank = 2
halo = 3
phrase = 4
drone = 3
chant = 4
hats = 5

[audio]
# Unset lets the piece decide
# enabled = true
osc_target = "127.0.0.1:57110"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.piece, "emerald");
        assert_eq!(config.midi.channels.drums, 10);
        assert_eq!(config.sleep.pulse_sleep_range, [12.0, 24.0]);
        assert!((config.climate.depth - 0.22).abs() < 1e-9);
    }

    #[test]
    fn test_default_file_matches_defaults() {
        let parsed: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_save_and_load_from() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.engine.piece = "abyssal".into();
        config.engine.seed = Some(7);
        config.midi.port = Some("loopMIDI Port".into());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sleep]\nguide_minutes = 1.5\n").unwrap();
        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.sleep.guide_minutes, 1.5);
        assert_eq!(loaded.sleep.descent_minutes, 12.0);
        assert_eq!(loaded.midi, MidiSettings::default());
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[engine]
bpm = 5000.0
piece = " Abyssal "

[mix]
room_mix = 4.0

[sleep]
pulse_sleep_range = [30.0, 10.0]
chime_odds = -1.0

[midi]
bass_velocity = 200
port = "  "

[midi.channels]
drums = 0
hats = 40
"#,
        )
        .unwrap();
        let c = Config::load_from(&path).unwrap();
        assert_eq!(c.engine.bpm, Some(999.0));
        assert_eq!(c.engine.piece, "abyssal");
        assert_eq!(c.mix.room_mix, 1.0);
        assert_eq!(c.sleep.pulse_sleep_range, [10.0, 30.0]);
        assert_eq!(c.sleep.chime_odds, 0.0);
        assert_eq!(c.midi.bass_velocity, 127);
        assert_eq!(c.midi.port, None);
        assert_eq!(c.midi.channels.drums, 1);
        assert_eq!(c.midi.channels.hats, 16);
    }

    #[test]
    fn test_midi_bytes_beyond_u8_are_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[midi]
bass_velocity = 300
bass_velocity_edict = -5
mod_wheel_cc = 1000
mod_wheel_jitter = 99

[midi.channels]
bass = 300
chant = -2
"#,
        )
        .unwrap();
        let c = Config::load_from(&path).unwrap();
        assert_eq!(c.midi.bass_velocity, 127);
        assert_eq!(c.midi.bass_velocity_edict, 0);
        assert_eq!(c.midi.bass_velocity_dissolve, 70);
        assert_eq!(c.midi.mod_wheel_cc, 127);
        assert_eq!(c.midi.mod_wheel_jitter, 16);
        assert_eq!(c.midi.channels.bass, 16);
        assert_eq!(c.midi.channels.chant, 1);
        assert_eq!(c.midi.channels.drums, 10);
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[engine\npiece = ").unwrap();
        assert!(matches!(Config::load_from(&path), Err(Error::TomlParse(_))));
        assert!(matches!(
            Config::load_from(&dir.path().join("missing.toml")),
            Err(Error::Io(_))
        ));
    }
}
