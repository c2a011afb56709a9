// src/codec.rs
// Compact text wire format shared with annunciators and alarm sources.
//
//   alarm:             a<sev 0-5>[{HEXID}]<text>      total length <= max_len
//   operator response: o<a|c|d|s>[{HEXID}]
//   annunciator cmd:   m | u                           (mute / unmute)
//
// Decoding never panics; anything it cannot parse comes back as
// `AdamError::MalformedMessage` so callers can try the next message kind.

use crate::alarm::OperatorAction;
use crate::error::{AdamError, Result};

/// Default upper bound for an encoded alarm, in bytes
pub const DEFAULT_MAX_LEN: usize = 80;

/// Highest severity the wire format can carry
pub const MAX_SEVERITY: u8 = 5;

const ALARM_TAG: char = 'a';
const RESPONSE_TAG: char = 'o';

/// Tag, severity digit and the two braces
const ID_OVERHEAD: usize = 4;

/// Decoded alarm message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmMessage {
    pub severity: u8,
    pub id: Option<String>,
    pub text: String,
}

/// Decoded operator response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatorResponse<'a> {
    pub action: OperatorAction,
    pub id: Option<&'a str>,
}

/// Annunciator-local commands that never touch alarm state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnunciatorCommand {
    Mute,
    Unmute,
}

/// Anything an annunciator may send on its response topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorMessage {
    Response {
        action: OperatorAction,
        id: Option<String>,
    },
    Command(AnnunciatorCommand),
}

/// Clamp an arbitrary severity into the 0..=5 range the wire can carry
pub fn clamp_severity(raw: i64) -> u8 {
    raw.clamp(0, MAX_SEVERITY as i64) as u8
}

/// Strip everything that is not a hex digit and upper-case the rest.
/// Returns `None` when nothing usable remains.
pub fn normalize_id(raw: &str) -> Option<String> {
    let id: String = raw
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Encoder/decoder pair bounded to a maximum alarm length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireCodec {
    max_len: usize,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEN)
    }
}

impl WireCodec {
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Whether `id` fits in the `{..}` block of an alarm after the tag and
    /// severity digit
    pub fn fits_id(&self, id: &str) -> bool {
        ID_OVERHEAD + id.len() <= self.max_len
    }

    /// Encode an alarm. Severity is clamped, line breaks in `text` become
    /// spaces and the text is cut so the whole message fits `max_len` bytes.
    /// An id too long for the budget is left out.
    pub fn encode_alarm(&self, severity: i64, text: &str, id: Option<&str>) -> String {
        let mut out = String::with_capacity(self.max_len);
        out.push(ALARM_TAG);
        out.push(char::from(b'0' + clamp_severity(severity)));
        if let Some(id) = id.and_then(normalize_id).filter(|id| self.fits_id(id)) {
            out.push('{');
            out.push_str(&id);
            out.push('}');
        }

        let clean: String = text
            .chars()
            .map(|c| if c.is_control() { ' ' } else { c })
            .collect();
        let room = self.max_len.saturating_sub(out.len());
        out.push_str(truncate_bytes(&clean, room));
        out
    }

    /// Decode an alarm. Fails when the tag or the severity digit is missing,
    /// or when the id block alone would exceed `max_len`.
    pub fn decode_alarm(&self, raw: &[u8]) -> Result<AlarmMessage> {
        let s = std::str::from_utf8(raw)
            .map_err(|_| AdamError::MalformedMessage("alarm payload is not UTF-8".into()))?;
        let s = trim_line_breaks(s);

        let rest = s
            .strip_prefix(ALARM_TAG)
            .ok_or_else(|| AdamError::MalformedMessage(format!("not an alarm: {:?}", s)))?;

        let mut chars = rest.chars();
        let severity = chars
            .next()
            .and_then(|c| c.to_digit(10))
            .map(|d| clamp_severity(d as i64))
            .ok_or_else(|| {
                AdamError::MalformedMessage(format!("alarm without severity digit: {:?}", s))
            })?;

        let (id, text) = split_id_block(chars.as_str());
        if let Some(id) = id.filter(|id| !self.fits_id(id)) {
            return Err(AdamError::MalformedMessage(format!(
                "alarm id of {} characters exceeds the {} byte limit",
                id.len(),
                self.max_len
            )));
        }
        let prefix_len = 2 + id.map_or(0, |id| id.len() + 2);
        let room = self.max_len.saturating_sub(prefix_len);

        Ok(AlarmMessage {
            severity,
            id: id.map(str::to_ascii_uppercase),
            text: truncate_bytes(text, room).to_string(),
        })
    }

    /// Encode an operator response
    pub fn encode_response(&self, action: OperatorAction, id: Option<&str>) -> String {
        match id.and_then(normalize_id) {
            Some(id) => format!("{}{}{{{}}}", RESPONSE_TAG, action.code(), id),
            None => format!("{}{}", RESPONSE_TAG, action.code()),
        }
    }

    /// Decode an operator response; unknown action codes are malformed
    pub fn decode_response<'a>(&self, raw: &'a [u8]) -> Result<OperatorResponse<'a>> {
        let s = std::str::from_utf8(raw)
            .map_err(|_| AdamError::MalformedMessage("response payload is not UTF-8".into()))?
            .trim();

        let rest = s
            .strip_prefix(RESPONSE_TAG)
            .ok_or_else(|| AdamError::MalformedMessage(format!("not a response: {:?}", s)))?;

        let mut chars = rest.chars();
        let code = chars
            .next()
            .ok_or_else(|| AdamError::MalformedMessage("response without action code".into()))?;
        let action = OperatorAction::from_code(code).ok_or_else(|| {
            AdamError::MalformedMessage(format!("unknown action code {:?}", code))
        })?;

        let tail = chars.as_str();
        if tail.is_empty() {
            return Ok(OperatorResponse { action, id: None });
        }
        match split_id_block(tail) {
            (Some(id), "") => Ok(OperatorResponse { action, id: Some(id) }),
            _ => Err(AdamError::MalformedMessage(format!(
                "trailing data in response: {:?}",
                s
            ))),
        }
    }

    /// Decode a mute/unmute command
    pub fn decode_command(&self, raw: &[u8]) -> Result<AnnunciatorCommand> {
        match std::str::from_utf8(raw).map(str::trim) {
            Ok("m") => Ok(AnnunciatorCommand::Mute),
            Ok("u") => Ok(AnnunciatorCommand::Unmute),
            Ok(other) => Err(AdamError::MalformedMessage(format!(
                "not an annunciator command: {:?}",
                other
            ))),
            Err(_) => Err(AdamError::MalformedMessage(
                "command payload is not UTF-8".into(),
            )),
        }
    }

    /// Decode anything an annunciator sends back: a response first, then a
    /// command.
    pub fn decode_operator_message(&self, raw: &[u8]) -> Result<OperatorMessage> {
        if let Ok(resp) = self.decode_response(raw) {
            return Ok(OperatorMessage::Response {
                action: resp.action,
                id: resp.id.map(str::to_ascii_uppercase),
            });
        }
        self.decode_command(raw)
            .map(OperatorMessage::Command)
            .map_err(|_| {
                AdamError::MalformedMessage(format!(
                    "not an operator message: {:?}",
                    String::from_utf8_lossy(raw)
                ))
            })
    }
}

fn trim_line_breaks(s: &str) -> &str {
    s.trim_matches(|c| c == '\r' || c == '\n')
}

/// Split a leading `{HEX}` block off `s`. A block that is unterminated, empty
/// or not hex is treated as ordinary text.
fn split_id_block(s: &str) -> (Option<&str>, &str) {
    let Some(inner) = s.strip_prefix('{') else {
        return (None, s);
    };
    match inner.find('}') {
        Some(end) if end > 0 && inner[..end].chars().all(|c| c.is_ascii_hexdigit()) => {
            (Some(&inner[..end]), &inner[end + 1..])
        }
        _ => (None, s),
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
