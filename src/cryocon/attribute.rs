use crate::error::Error;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ChannelId {{{
/// One of the four sensor inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    A,
    B,
    C,
    D,
}

impl ChannelId {
    pub const ALL: [ChannelId; 4] = [ChannelId::A, ChannelId::B, ChannelId::C, ChannelId::D];

    pub fn letter(&self) -> char {
        match self {
            ChannelId::A => 'A',
            ChannelId::B => 'B',
            ChannelId::C => 'C',
            ChannelId::D => 'D',
        }
    }
}

impl TryFrom<char> for ChannelId {
    type Error = Error;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c.to_ascii_uppercase() {
            'A' => Ok(ChannelId::A),
            'B' => Ok(ChannelId::B),
            'C' => Ok(ChannelId::C),
            'D' => Ok(ChannelId::D),
            _ => Err(Error::UnknownAttribute(format!("channel{}", c))),
        }
    }
} // }}}

// LoopId {{{
/// One of the four control loops, numbered as on the front panel.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive,
)]
#[repr(u8)]
pub enum LoopId {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
}

impl LoopId {
    pub const ALL: [LoopId; 4] = [LoopId::One, LoopId::Two, LoopId::Three, LoopId::Four];

    pub fn number(&self) -> u8 {
        (*self).into()
    }
} // }}}

/// A channel or loop on the instrument, or the instrument itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Entity {
    System,
    Channel(ChannelId),
    Loop(LoopId),
}

/// Everything the codec knows how to query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Identification,
    Control,
    Temperature,
    OutputPower,
    Range,
    Rate,
    Type,
    SetPoint,
    PGain,
    IGain,
    DGain,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Float,
    Text,
    Flag,
}

impl Field {
    pub fn kind(&self) -> ValueKind {
        use Field::*;
        match self {
            Identification | Range | Type => ValueKind::Text,
            Control => ValueKind::Flag,
            Temperature | OutputPower | Rate | SetPoint | PGain | IGain | DGain => {
                ValueKind::Float
            }
        }
    }
}

// LoopField {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoopField {
    OutputPower,
    Range,
    Rate,
    Type,
    SetPoint,
    PGain,
    IGain,
    DGain,
}

impl LoopField {
    const ALL: [LoopField; 8] = [
        LoopField::OutputPower,
        LoopField::Range,
        LoopField::Rate,
        LoopField::Type,
        LoopField::SetPoint,
        LoopField::PGain,
        LoopField::IGain,
        LoopField::DGain,
    ];

    fn suffix(&self) -> &'static str {
        match self {
            LoopField::OutputPower => "output",
            LoopField::Range => "range",
            LoopField::Rate => "rate",
            LoopField::Type => "type",
            LoopField::SetPoint => "setpoint",
            LoopField::PGain => "pgain",
            LoopField::IGain => "igain",
            LoopField::DGain => "dgain",
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.suffix() == s)
    }

    fn field(&self) -> Field {
        match self {
            LoopField::OutputPower => Field::OutputPower,
            LoopField::Range => Field::Range,
            LoopField::Rate => Field::Rate,
            LoopField::Type => Field::Type,
            LoopField::SetPoint => Field::SetPoint,
            LoopField::PGain => Field::PGain,
            LoopField::IGain => Field::IGain,
            LoopField::DGain => Field::DGain,
        }
    }

    // only the primary heater loop has selectable ranges
    fn exists_on(&self, lp: LoopId) -> bool {
        *self != LoopField::Range || lp == LoopId::One
    }
} // }}}

// LogicalAttribute {{{
/// An externally named quantity, e.g. `channela` or `loop2setpoint`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogicalAttribute {
    Identification,
    Control,
    Channel(ChannelId),
    Loop(LoopId, LoopField),
}

impl LogicalAttribute {
    /// The (entity, field) pair this attribute is read from and written to.
    pub fn target(&self) -> (Entity, Field) {
        match self {
            LogicalAttribute::Identification => (Entity::System, Field::Identification),
            LogicalAttribute::Control => (Entity::System, Field::Control),
            LogicalAttribute::Channel(ch) => (Entity::Channel(*ch), Field::Temperature),
            LogicalAttribute::Loop(lp, f) => (Entity::Loop(*lp), f.field()),
        }
    }

    pub fn field(&self) -> Field {
        self.target().1
    }

    /// Control is switched through the on/off commands, gains are tuned on
    /// the front panel.
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            LogicalAttribute::Loop(
                _,
                LoopField::OutputPower
                    | LoopField::Range
                    | LoopField::Rate
                    | LoopField::Type
                    | LoopField::SetPoint
            )
        )
    }
}

impl std::fmt::Display for LogicalAttribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogicalAttribute::Identification => write!(f, "idn"),
            LogicalAttribute::Control => write!(f, "control"),
            LogicalAttribute::Channel(ch) => {
                write!(f, "channel{}", ch.letter().to_ascii_lowercase())
            }
            LogicalAttribute::Loop(lp, field) => {
                write!(f, "loop{}{}", lp.number(), field.suffix())
            }
        }
    }
}

impl std::str::FromStr for LogicalAttribute {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let unknown = || Error::UnknownAttribute(s.to_string());

        match name.as_str() {
            "idn" => return Ok(LogicalAttribute::Identification),
            "control" => return Ok(LogicalAttribute::Control),
            _ => {}
        }

        if let Some(rest) = name.strip_prefix("channel") {
            let mut chars = rest.chars();
            return match (chars.next(), chars.next()) {
                (Some(c), None) => ChannelId::try_from(c)
                    .map(LogicalAttribute::Channel)
                    .map_err(|_| unknown()),
                _ => Err(unknown()),
            };
        }

        if let Some(rest) = name.strip_prefix("loop") {
            let mut chars = rest.chars();
            let number = chars
                .next()
                .and_then(|c| c.to_digit(10))
                .ok_or_else(unknown)?;
            let lp = LoopId::try_from(number as u8).map_err(|_| unknown())?;
            let field = LoopField::from_suffix(chars.as_str()).ok_or_else(unknown)?;
            if !field.exists_on(lp) {
                return Err(unknown());
            }
            return Ok(LogicalAttribute::Loop(lp, field));
        }

        Err(unknown())
    }
}

impl Serialize for LogicalAttribute {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for LogicalAttribute {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
} // }}}

// Value / Reading {{{
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Float(f64),
    Text(String),
    Flag(bool),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Float(_) => ValueKind::Float,
            Value::Text(_) => ValueKind::Text,
            Value::Flag(_) => ValueKind::Flag,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
            Value::Flag(true) => write!(f, "On"),
            Value::Flag(false) => write!(f, "Off"),
        }
    }
}

/// One answered query. `Invalid` keeps the raw reply so it can be logged.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reading {
    Valid(Value),
    Invalid { raw: String },
}

impl Reading {
    pub fn invalid(raw: &str) -> Self {
        Reading::Invalid {
            raw: raw.to_string(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Reading::Valid(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            Reading::Valid(v) => Some(v),
            Reading::Invalid { .. } => None,
        }
    }
} // }}}

// AttributeMap {{{
/// Attribute lookup table, fixed at start-up from the used channels/loops.
#[derive(Clone, Debug)]
pub struct AttributeMap {
    channels: Vec<ChannelId>,
    loops: Vec<LoopId>,
}

impl AttributeMap {
    pub fn new(channels: &[ChannelId], loops: &[LoopId]) -> Self {
        let mut channels = channels.to_vec();
        channels.sort();
        channels.dedup();
        let mut loops = loops.to_vec();
        loops.sort();
        loops.dedup();

        Self { channels, loops }
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    pub fn loops(&self) -> &[LoopId] {
        &self.loops
    }

    /// Parse a name and check it against the configured entities.
    pub fn resolve(&self, name: &str) -> Result<LogicalAttribute, Error> {
        let attribute: LogicalAttribute = name.parse()?;
        self.check(attribute)?;
        Ok(attribute)
    }

    pub fn check(&self, attribute: LogicalAttribute) -> Result<(), Error> {
        let configured = match attribute.target().0 {
            Entity::System => true,
            Entity::Channel(ch) => self.channels.contains(&ch),
            Entity::Loop(lp) => self.loops.contains(&lp),
        };

        if configured {
            Ok(())
        } else {
            Err(Error::Unconfigured(attribute.to_string()))
        }
    }

    /// Every attribute available with this configuration.
    pub fn all(&self) -> Vec<LogicalAttribute> {
        let mut all = vec![LogicalAttribute::Identification, LogicalAttribute::Control];
        all.extend(self.channels.iter().map(|ch| LogicalAttribute::Channel(*ch)));
        for lp in &self.loops {
            all.extend(
                LoopField::ALL
                    .iter()
                    .filter(|f| f.exists_on(*lp))
                    .map(|f| LogicalAttribute::Loop(*lp, *f)),
            );
        }
        all
    }
} // }}}
