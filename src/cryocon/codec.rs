use crate::cryocon::attribute::{Entity, Field, Reading, Value, ValueKind};
use crate::error::Error;

/// Translates (entity, field) operations to and from wire strings.
///
/// Parsing never fails: anything that cannot be read as the expected type
/// comes back as [`Reading::Invalid`] so one bad channel cannot abort a batch.
pub trait CommandCodec: Send + Sync {
    fn render_query(&self, entity: Entity, field: Field) -> String;

    fn parse_reply(&self, field: Field, reply: &str) -> Reading;

    /// Render a write. The rendered command must produce exactly one reply
    /// line, which doubles as acknowledgement and refreshed value.
    fn render_set(&self, entity: Entity, field: Field, value: &Value) -> Result<String, Error>;

    fn render_front_panel_lock(&self, locked: bool) -> String;

    /// Whether a reply is the instrument reporting an error for the command.
    fn is_fault(&self, reply: &str) -> bool;

    fn parse_ack(&self, command: &str, field: Field, reply: &str) -> Result<Reading, Error> {
        if self.is_fault(reply) {
            return Err(Error::ProtocolFault {
                command: command.to_string(),
                reply: reply.to_string(),
            });
        }
        Ok(self.parse_reply(field, reply))
    }
}

pub const RANGES: [&str; 3] = ["HI", "MID", "LOW"];
pub const LOOP_TYPES: [&str; 6] = ["OFF", "MAN", "PID", "TABLE", "RAMPP", "RAMPT"];

/// Cryo-con command vocabulary.
///
/// Commands are chained with `;` so a set followed by its query yields a
/// single reply line carrying the value the controller actually applied.
#[derive(Clone, Copy, Debug, Default)]
pub struct CryoconCodec;

impl CryoconCodec {
    pub fn new() -> Self {
        Self
    }

    fn prefix(entity: Entity) -> String {
        match entity {
            Entity::System => String::new(),
            Entity::Channel(ch) => format!("INPUT {}:", ch.letter()),
            Entity::Loop(lp) => format!("LOOP {}:", lp.number()),
        }
    }

    fn mnemonic(field: Field) -> &'static str {
        match field {
            Field::Identification => "*IDN",
            Field::Control => "CONTROL",
            Field::Temperature => "TEMP",
            Field::OutputPower => "OUTPWR",
            Field::Range => "RANGE",
            Field::Rate => "RATE",
            Field::Type => "TYPE",
            Field::SetPoint => "SETPT",
            Field::PGain => "PGAIN",
            Field::IGain => "IGAIN",
            Field::DGain => "DGAIN",
        }
    }

    fn parse_float(reply: &str) -> Option<f64> {
        // readings carry a unit suffix, e.g. "77.340K" or "12.5%"
        let number = reply.trim_end_matches(|c: char| c.is_ascii_alphabetic() || c == '%');
        number.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }

    fn parse_flag(reply: &str) -> Option<bool> {
        match reply.to_ascii_uppercase().as_str() {
            "ON" => Some(true),
            "OFF" => Some(false),
            _ => None,
        }
    }

    fn render_text(field: Field, text: &str) -> Result<String, Error> {
        let text = text.trim().to_ascii_uppercase();
        let allowed: &[&str] = match field {
            Field::Range => &RANGES[..],
            Field::Type => &LOOP_TYPES[..],
            _ => &[],
        };

        if allowed.contains(&text.as_str()) {
            Ok(text)
        } else {
            Err(Error::InvalidValue {
                attribute: format!("{:?}", field),
                reason: format!("{:?} is not one of {:?}", text, allowed),
            })
        }
    }
}

impl CommandCodec for CryoconCodec {
    fn render_query(&self, entity: Entity, field: Field) -> String {
        format!("{}{}?", Self::prefix(entity), Self::mnemonic(field))
    }

    fn parse_reply(&self, field: Field, reply: &str) -> Reading {
        let reply = reply.trim();
        if reply.is_empty() || self.is_fault(reply) {
            return Reading::invalid(reply);
        }

        let value = match field.kind() {
            ValueKind::Float => Self::parse_float(reply).map(Value::Float),
            ValueKind::Flag => Self::parse_flag(reply).map(Value::Flag),
            ValueKind::Text => Some(Value::Text(reply.to_string())),
        };

        value.map(Reading::Valid).unwrap_or_else(|| Reading::invalid(reply))
    }

    fn render_set(&self, entity: Entity, field: Field, value: &Value) -> Result<String, Error> {
        let query = self.render_query(entity, field);
        let mismatch = || Error::InvalidValue {
            attribute: format!("{:?}", field),
            reason: format!("expected {:?}, got {:?}", field.kind(), value),
        };

        let command = match (field, value) {
            (Field::Control, Value::Flag(true)) => "CONTROL".to_string(),
            (Field::Control, Value::Flag(false)) => "STOP".to_string(),
            (Field::Identification, _) | (Field::Temperature, _) => return Err(mismatch()),
            (_, Value::Float(v)) if field.kind() == ValueKind::Float => {
                if !v.is_finite() {
                    return Err(Error::InvalidValue {
                        attribute: format!("{:?}", field),
                        reason: format!("{} is not a finite number", v),
                    });
                }
                format!("{}{} {}", Self::prefix(entity), Self::mnemonic(field), v)
            }
            (_, Value::Text(text)) if field.kind() == ValueKind::Text => format!(
                "{}{} {}",
                Self::prefix(entity),
                Self::mnemonic(field),
                Self::render_text(field, text)?
            ),
            _ => return Err(mismatch()),
        };

        Ok(format!("{};{}", command, query))
    }

    fn render_front_panel_lock(&self, locked: bool) -> String {
        let state = if locked { "ON" } else { "OFF" };
        format!("SYSTEM:LOCKOUT {};SYSTEM:LOCKOUT?", state)
    }

    fn is_fault(&self, reply: &str) -> bool {
        matches!(reply.trim().to_ascii_uppercase().as_str(), "NAK" | "NACK")
    }
}
