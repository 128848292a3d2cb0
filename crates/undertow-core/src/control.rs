//! Messages other threads send to a running engine, and the line-based
//! command syntax the CLI reads them from.

use crate::bus::Value;
use crate::{Error, Result};
use std::str::FromStr;

/// A request to change the engine's behavior.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlMessage {
    SetMidiEnabled(bool),
    SetAudioEnabled(bool),
    SetCcEnabled(bool),
    /// Switch MIDI output to the named port, or back to automatic selection.
    ForcePort(Option<String>),
    /// All Notes Off on every channel.
    Panic,
    SetHeartbeat(bool),
    /// Write a value onto the bus.
    SetKnob { key: String, value: Value },
    Stop,
}

/// A line typed at the console.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Control(ControlMessage),
    Status,
    Help,
}

fn parse_switch(word: Option<&str>, what: &str) -> Result<bool> {
    match word.map(str::to_ascii_lowercase).as_deref() {
        Some("on") | Some("true") | Some("1") => Ok(true),
        Some("off") | Some("false") | Some("0") => Ok(false),
        _ => Err(Error::Command(format!("usage: {what} on|off"))),
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err(Error::Command("empty command".into()));
        };
        let command = match head.to_ascii_lowercase().as_str() {
            "panic" => Command::Control(ControlMessage::Panic),
            "stop" | "quit" | "exit" => Command::Control(ControlMessage::Stop),
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "midi" => Command::Control(ControlMessage::SetMidiEnabled(parse_switch(words.next(), "midi")?)),
            "audio" => Command::Control(ControlMessage::SetAudioEnabled(parse_switch(words.next(), "audio")?)),
            "cc" => Command::Control(ControlMessage::SetCcEnabled(parse_switch(words.next(), "cc")?)),
            "heartbeat" => Command::Control(ControlMessage::SetHeartbeat(parse_switch(
                words.next(),
                "heartbeat",
            )?)),
            "port" => {
                let name: Vec<&str> = words.by_ref().collect();
                if name.is_empty() {
                    return Err(Error::Command("usage: port <name>|auto".into()));
                }
                let name = name.join(" ");
                if name.eq_ignore_ascii_case("auto") {
                    Command::Control(ControlMessage::ForcePort(None))
                } else {
                    Command::Control(ControlMessage::ForcePort(Some(name)))
                }
            }
            "set" => {
                let (Some(key), Some(value)) = (words.next(), words.next()) else {
                    return Err(Error::Command("usage: set <key> <value>".into()));
                };
                Command::Control(ControlMessage::SetKnob {
                    key: key.to_string(),
                    value: Value::parse(value),
                })
            }
            other => return Err(Error::Command(format!("unknown command '{other}'"))),
        };
        Ok(command)
    }
}

/// One-line summary of each command.
pub const HELP: &str = "\
panic                 all notes off on every channel
midi on|off           enable or disable MIDI output
audio on|off          enable or disable audio events
cc on|off             enable or disable controller output
heartbeat on|off      debug click every beat
port <name>|auto      switch MIDI port
set <key> <value>     write a knob onto the bus
status                show section, bar and voices
stop                  stop the piece and exit";

#[cfg(test)]
mod tests {
    use super::*;

    fn control(line: &str) -> ControlMessage {
        match line.parse::<Command>().unwrap() {
            Command::Control(msg) => msg,
            other => panic!("expected control, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_toggles() {
        assert_eq!(control("midi off"), ControlMessage::SetMidiEnabled(false));
        assert_eq!(control("AUDIO on"), ControlMessage::SetAudioEnabled(true));
        assert_eq!(control("cc 0"), ControlMessage::SetCcEnabled(false));
        assert_eq!(control("heartbeat on"), ControlMessage::SetHeartbeat(true));
        assert_eq!(control("panic"), ControlMessage::Panic);
        assert_eq!(control("stop"), ControlMessage::Stop);
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(
            control("port IAC Driver Bus 1"),
            ControlMessage::ForcePort(Some("IAC Driver Bus 1".into()))
        );
        assert_eq!(control("port auto"), ControlMessage::ForcePort(None));
        assert!("port".parse::<Command>().is_err());
    }

    #[test]
    fn test_parse_set() {
        assert_eq!(
            control("set skank_cutoff 90"),
            ControlMessage::SetKnob {
                key: "skank_cutoff".into(),
                value: Value::Number(90.0)
            }
        );
        assert!("set density".parse::<Command>().is_err());
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<Command>().is_err());
        assert!("midi maybe".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
        assert_eq!("status".parse::<Command>().unwrap(), Command::Status);
    }
}
