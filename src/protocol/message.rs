use std::fmt;

use bytes::Bytes;

use crate::core::{Error, Result, RoleKind};

/// Topics of the game, all living under one prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Device announces itself to the coordinator
    Recognize,
    /// Coordinator hands a role to one device
    Assign,
    /// Coordinator starts or ends the game
    Game,
    /// A device reports it was caught
    Caught,
    /// A caught Runner asks a Beacon for a save
    Save,
    /// A Beacon confirms it granted a save
    Saved,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::Recognize,
        Topic::Assign,
        Topic::Game,
        Topic::Caught,
        Topic::Save,
        Topic::Saved,
    ];

    /// Topics a player device listens to
    pub const DEVICE: [Topic; 4] = [Topic::Assign, Topic::Game, Topic::Save, Topic::Saved];

    /// Topics the coordinator listens to
    pub const COORDINATOR: [Topic; 3] = [Topic::Recognize, Topic::Caught, Topic::Saved];

    pub fn name(&self) -> &'static str {
        match self {
            Topic::Recognize => "recognize",
            Topic::Assign => "assign",
            Topic::Game => "game",
            Topic::Caught => "caught",
            Topic::Save => "save",
            Topic::Saved => "saved",
        }
    }

    /// Full topic string, `"<prefix>/<name>"`
    pub fn path(&self, prefix: &str) -> String {
        format!("{}/{}", prefix, self.name())
    }

    /// Resolves a full topic string; `None` for topics outside the game
    pub fn from_path(prefix: &str, path: &str) -> Option<Topic> {
        let name = path.strip_prefix(prefix)?.strip_prefix('/')?;
        Topic::ALL.into_iter().find(|t| t.name() == name)
    }
}

/// Payload of the `game` topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameSignal {
    Start,
    End,
}

impl GameSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameSignal::Start => "start",
            GameSignal::End => "end",
        }
    }
}

/// A raw bus message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: String,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Envelope {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Game messages exchanged between devices and the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Recognize { device: String },
    Assign { device: String, role: RoleKind },
    Game(GameSignal),
    Caught { device: String },
    Save { runner: String, beacon: String },
    Saved { runner: String, beacon: String },
}

impl Message {
    pub fn topic(&self) -> Topic {
        match self {
            Message::Recognize { .. } => Topic::Recognize,
            Message::Assign { .. } => Topic::Assign,
            Message::Game(_) => Topic::Game,
            Message::Caught { .. } => Topic::Caught,
            Message::Save { .. } => Topic::Save,
            Message::Saved { .. } => Topic::Saved,
        }
    }

    /// UTF-8 payload: a bare id, a signal, or comma separated fields
    pub fn payload(&self) -> String {
        match self {
            Message::Recognize { device } | Message::Caught { device } => device.clone(),
            Message::Assign { device, role } => format!("{},{}", device, role),
            Message::Game(signal) => signal.as_str().to_string(),
            Message::Save { runner, beacon } | Message::Saved { runner, beacon } => {
                format!("{},{}", runner, beacon)
            }
        }
    }

    /// Parses the payload of a known topic
    pub fn parse(topic: Topic, payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| Error::protocol(format!("{} payload is not UTF-8", topic.name())))?
            .trim();

        match topic {
            Topic::Recognize => Ok(Message::Recognize {
                device: single_field(topic, text)?,
            }),
            Topic::Caught => Ok(Message::Caught {
                device: single_field(topic, text)?,
            }),
            Topic::Assign => {
                let (device, role) = field_pair(topic, text)?;
                Ok(Message::Assign {
                    device,
                    role: role.parse()?,
                })
            }
            Topic::Game => match text {
                "start" => Ok(Message::Game(GameSignal::Start)),
                "end" => Ok(Message::Game(GameSignal::End)),
                other => Err(Error::protocol(format!("unknown game signal {:?}", other))),
            },
            Topic::Save => {
                let (runner, beacon) = field_pair(topic, text)?;
                Ok(Message::Save { runner, beacon })
            }
            Topic::Saved => {
                let (runner, beacon) = field_pair(topic, text)?;
                Ok(Message::Saved { runner, beacon })
            }
        }
    }

    /// Wraps the message for the bus
    pub fn to_envelope(&self, prefix: &str) -> Envelope {
        Envelope::new(self.topic().path(prefix), self.payload())
    }

    /// Unwraps a bus message; `Ok(None)` for topics outside the game
    pub fn from_envelope(prefix: &str, envelope: &Envelope) -> Result<Option<Self>> {
        match Topic::from_path(prefix, &envelope.topic) {
            Some(topic) => Message::parse(topic, &envelope.payload).map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.topic().name(), self.payload())
    }
}

fn single_field(topic: Topic, text: &str) -> Result<String> {
    if text.is_empty() || text.contains(',') {
        return Err(Error::protocol(format!(
            "{} expects a single id, got {:?}",
            topic.name(),
            text
        )));
    }
    Ok(text.to_string())
}

fn field_pair(topic: Topic, text: &str) -> Result<(String, String)> {
    let mut fields = text.split(',').map(str::trim);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(a), Some(b), None) if !a.is_empty() && !b.is_empty() => {
            Ok((a.to_string(), b.to_string()))
        }
        _ => Err(Error::protocol(format!(
            "{} expects two comma separated fields, got {:?}",
            topic.name(),
            text
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_paths() {
        assert_eq!(Topic::Assign.path("taggame"), "taggame/assign");
        assert_eq!(Topic::from_path("taggame", "taggame/saved"), Some(Topic::Saved));
        assert_eq!(Topic::from_path("taggame", "taggame/unknown"), None);
        assert_eq!(Topic::from_path("taggame", "othergame/save"), None);
        assert_eq!(Topic::from_path("taggame", "taggamesave"), None);
    }

    #[test]
    fn test_wire_payloads() {
        let assign = Message::Assign {
            device: "a1".into(),
            role: RoleKind::Beacon,
        };
        assert_eq!(assign.payload(), "a1,Beacon");
        assert_eq!(Message::Game(GameSignal::End).payload(), "end");
        assert_eq!(
            Message::Saved {
                runner: "r".into(),
                beacon: "b".into()
            }
            .payload(),
            "r,b"
        );

        let env = assign.to_envelope("taggame");
        assert_eq!(env.topic, "taggame/assign");
        assert_eq!(&env.payload[..], b"a1,Beacon");
    }

    #[test]
    fn test_parse_every_topic() {
        let cases = vec![
            Message::Recognize { device: "d1".into() },
            Message::Assign {
                device: "d1".into(),
                role: RoleKind::Runner,
            },
            Message::Game(GameSignal::Start),
            Message::Caught { device: "d2".into() },
            Message::Save {
                runner: "d2".into(),
                beacon: "d3".into(),
            },
            Message::Saved {
                runner: "d2".into(),
                beacon: "d3".into(),
            },
        ];
        for message in cases {
            let env = message.to_envelope("taggame");
            let parsed = Message::from_envelope("taggame", &env).unwrap();
            assert_eq!(parsed, Some(message));
        }
    }

    #[test]
    fn test_malformed_payloads() {
        assert!(Message::parse(Topic::Assign, b"only-one").is_err());
        assert!(Message::parse(Topic::Assign, b"a,Wizard").is_err());
        assert!(Message::parse(Topic::Assign, b"a,Runner,extra").is_err());
        assert!(Message::parse(Topic::Save, b",b").is_err());
        assert!(Message::parse(Topic::Game, b"pause").is_err());
        assert!(Message::parse(Topic::Recognize, b"").is_err());
        assert!(Message::parse(Topic::Caught, &[0xC3, 0x28]).is_err());
    }

    #[test]
    fn test_foreign_topic_is_ignored() {
        let env = Envelope::new("weather/temp", "21");
        assert_eq!(Message::from_envelope("taggame", &env).unwrap(), None);
    }

    #[test]
    fn test_whitespace_tolerated() {
        let parsed = Message::parse(Topic::Assign, b" a1 , Tagger \n").unwrap();
        assert_eq!(
            parsed,
            Message::Assign {
                device: "a1".into(),
                role: RoleKind::Tagger
            }
        );
    }
}
