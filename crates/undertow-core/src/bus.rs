//! Shared control state read and written by voices.
//!
//! The bus lives on the engine thread and is lent to one voice at a time, so
//! a read always sees the last committed write. Outside threads get a
//! [`crate::state::BusSnapshot`] instead.

use crate::form::Section;
use crate::timing::BeatTime;
use crate::wander::WanderBank;
use std::collections::{BTreeMap, HashMap};

/// Well-known bus keys.
pub mod keys {
    /// Wandering global density in `[-depth, depth]`.
    pub const CLIMATE: &str = "climate";
    /// Abyssal intensity, 0..1.
    pub const DENSITY: &str = "density";
    /// Root MIDI note for pieces that transpose.
    pub const ROOT: &str = "root";
    /// Debug heartbeat toggle.
    pub const HEARTBEAT: &str = "heartbeat";
    /// Reserved: the current section, readable through [`super::StateBus::get`].
    pub const SECTION: &str = "section";
    /// Reserved: the conductor's bar counter.
    pub const BAR: &str = "bar";
}

/// A bus value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Number(f64),
    Flag(bool),
    Section(Section),
    Text(String),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Flag(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Value::Flag(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    /// Parse a control-surface string: numbers, `on`/`off`/`true`/`false`,
    /// section names, otherwise text.
    pub fn parse(raw: &str) -> Value {
        let raw = raw.trim();
        if let Ok(n) = raw.parse::<f64>() {
            return Value::Number(n);
        }
        match raw.to_ascii_lowercase().as_str() {
            "on" | "true" | "yes" => return Value::Flag(true),
            "off" | "false" | "no" => return Value::Flag(false),
            _ => {}
        }
        match raw.parse::<Section>() {
            Ok(section) => Value::Section(section),
            Err(_) => Value::Text(raw.to_string()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n:.3}"),
            Value::Flag(b) => write!(f, "{}", if *b { "on" } else { "off" }),
            Value::Section(s) => write!(f, "{s}"),
            Value::Text(t) => f.write_str(t),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Flag(value)
    }
}

impl From<Section> for Value {
    fn from(value: Section) -> Self {
        Value::Section(value)
    }
}

/// Capability to move the form forward. Only one exists per bus.
#[derive(Debug)]
pub struct SectionAuthority(());

/// Keyed control state plus the conductor-owned section and bar counter.
#[derive(Debug)]
pub struct StateBus {
    values: HashMap<String, Value>,
    section: Section,
    section_entered: BeatTime,
    bar: u64,
    wander: WanderBank,
    authority_issued: bool,
}

impl StateBus {
    pub fn new(initial: Section) -> Self {
        Self {
            values: HashMap::new(),
            section: initial,
            section_entered: BeatTime::ZERO,
            bar: 0,
            wander: WanderBank::new(),
            authority_issued: false,
        }
    }

    /// Hand out the section-writing capability. Succeeds once.
    pub fn take_authority(&mut self) -> Option<SectionAuthority> {
        if self.authority_issued {
            return None;
        }
        self.authority_issued = true;
        Some(SectionAuthority(()))
    }

    /// Latest value for `key`, if ever written.
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            keys::SECTION => Some(Value::Section(self.section)),
            keys::BAR => Some(Value::Number(self.bar as f64)),
            _ => self.values.get(key).cloned(),
        }
    }

    pub fn number(&self, key: &str, default: f64) -> f64 {
        self.get(key)
            .and_then(|v| v.as_number())
            .filter(|n| n.is_finite())
            .unwrap_or(default)
    }

    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| v.as_flag()).unwrap_or(default)
    }

    /// Last write wins. Writes to the reserved section and bar keys are
    /// ignored; those go through [`StateBus::enter_section`].
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        if key == keys::SECTION || key == keys::BAR {
            log::warn!("[BUS] Ignoring write to reserved key '{}'", key);
            return;
        }
        self.values.insert(key.to_string(), value.into());
    }

    pub fn section(&self) -> Section {
        self.section
    }

    /// When the current section was entered.
    pub fn section_entered(&self) -> BeatTime {
        self.section_entered
    }

    pub fn bar(&self) -> u64 {
        self.bar
    }

    pub fn enter_section(&mut self, _authority: &SectionAuthority, section: Section, at: BeatTime) {
        self.section = section;
        self.section_entered = at;
    }

    pub fn set_bar(&mut self, _authority: &SectionAuthority, bar: u64) {
        self.bar = bar;
    }

    pub fn wander_mut(&mut self) -> &mut WanderBank {
        &mut self.wander
    }

    /// Every keyed value, sorted by key.
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_returns_default() {
        let bus = StateBus::new(Section::Intro);
        assert_eq!(bus.number(keys::CLIMATE, 0.0), 0.0);
        assert!(!bus.flag(keys::HEARTBEAT, false));
        assert!(bus.get("nope").is_none());
    }

    #[test]
    fn test_last_write_wins() {
        let mut bus = StateBus::new(Section::Intro);
        bus.set(keys::DENSITY, 0.55);
        bus.set(keys::DENSITY, 0.8);
        assert_eq!(bus.number(keys::DENSITY, 0.0), 0.8);
        bus.set(keys::HEARTBEAT, true);
        assert!(bus.flag(keys::HEARTBEAT, false));
    }

    #[test]
    fn test_authority_is_issued_once() {
        let mut bus = StateBus::new(Section::Winddown);
        let auth = bus.take_authority().unwrap();
        assert!(bus.take_authority().is_none());
        bus.enter_section(&auth, Section::Sleep, BeatTime::from_float(960.0));
        assert_eq!(bus.section(), Section::Sleep);
        assert_eq!(bus.section_entered(), BeatTime::from_float(960.0));
        assert_eq!(bus.get(keys::SECTION), Some(Value::Section(Section::Sleep)));
    }

    #[test]
    fn test_reserved_keys_are_read_only() {
        let mut bus = StateBus::new(Section::Intro);
        bus.set(keys::SECTION, Section::Edict);
        bus.set(keys::BAR, 99.0);
        assert_eq!(bus.section(), Section::Intro);
        assert_eq!(bus.bar(), 0);
    }

    #[test]
    fn test_value_parse() {
        assert_eq!(Value::parse("95"), Value::Number(95.0));
        assert_eq!(Value::parse("on"), Value::Flag(true));
        assert_eq!(Value::parse("ritual"), Value::Section(Section::Ritual));
        assert_eq!(Value::parse("hello"), Value::Text("hello".into()));
    }
}
