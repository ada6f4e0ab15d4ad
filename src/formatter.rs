//! Validation and normalization of message bodies coming in from flows:
//! embeds, file attachments and component rows.

use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("msg.embeds isn't an object or array")]
    InvalidEmbeds,
    #[error("Attachment objects must include a Buffer/Uint8Array in `buffer`, `data`, or `attachment`.")]
    MissingResource,
    #[error(
        "msg.attachments contains an unsupported value; expected string or object with 'buffer', 'data', or 'attachment'."
    )]
    UnsupportedAttachment,
    #[error("Specify attachment duration in either seconds or milliseconds, not both.")]
    AmbiguousDuration,
    #[error("Attachment duration cannot be negative.")]
    NegativeDuration,
    #[error("{0} must be a finite number.")]
    NotFinite(&'static str),
    #[error("{0} must be a number or numeric string.")]
    NotNumeric(&'static str),
    #[error("msg.components must be an array of action rows")]
    ComponentsNotArray,
    #[error("Component rows must have type 1 and include a components array.")]
    InvalidRow,
    #[error("Unsupported component type '{0}'.")]
    UnsupportedComponent(String),
}

/// Embeds pass through untouched; a single object becomes a one-element list.
pub fn format_embeds(input: Option<&Value>) -> Result<Vec<Value>, FormatError> {
    match input {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(obj @ Value::Object(_)) => Ok(vec![obj.clone()]),
        Some(_) => Err(FormatError::InvalidEmbeds),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttachmentSource {
    /// URL or local path.
    Location(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub source: AttachmentSource,
    pub name: Option<String>,
    pub description: Option<String>,
    pub spoiler: bool,
    pub duration_secs: Option<f64>,
}

impl Attachment {
    fn located(location: &str) -> Self {
        Self {
            source: AttachmentSource::Location(location.to_string()),
            name: None,
            description: None,
            spoiler: false,
            duration_secs: None,
        }
    }

    /// Upload name, with Discord's spoiler prefix when flagged.
    pub fn file_name(&self) -> Option<String> {
        let name = self.name.as_deref()?;
        if self.spoiler {
            Some(format!("SPOILER_{name}"))
        } else {
            Some(name.to_string())
        }
    }
}

pub fn format_attachments(input: Option<&Value>) -> Result<Vec<Attachment>, FormatError> {
    match input {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(resolve_attachment).collect(),
        Some(single) => Ok(vec![resolve_attachment(single)?]),
    }
}

fn resolve_attachment(value: &Value) -> Result<Attachment, FormatError> {
    let fields = match value {
        Value::String(location) => return Ok(Attachment::located(location)),
        Value::Object(fields) => fields,
        _ => return Err(FormatError::UnsupportedAttachment),
    };

    let present = |key: &str| fields.get(key).filter(|v| !v.is_null());
    let resource = present("buffer")
        .or_else(|| present("data"))
        .or_else(|| present("attachment"))
        .ok_or(FormatError::MissingResource)?;
    let source = resolve_resource(resource)?;

    let mut name = present("name").and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_string);
    let description = present("description").and_then(Value::as_str).map(str::to_string);
    let spoiler = present("spoiler").and_then(Value::as_bool) == Some(true);
    if spoiler && name.is_none() {
        name = Some("attachment".to_string());
    }

    let seconds = present("durationSeconds")
        .or_else(|| present("durationSecs"))
        .or_else(|| present("duration"));
    let millis = present("durationMs").or_else(|| present("durationMillis"));
    let duration_secs = match (seconds, millis) {
        (Some(_), Some(_)) => return Err(FormatError::AmbiguousDuration),
        (None, Some(ms)) => Some(non_negative(parse_numeric(ms, "Attachment duration (ms)")?)? / 1000.0),
        (Some(secs), None) => Some(non_negative(parse_numeric(secs, "Attachment duration")?)?),
        (None, None) => None,
    };

    Ok(Attachment { source, name, description, spoiler, duration_secs })
}

/// Paths and URLs stay strings; byte arrays and serialized buffers
/// (`{"type":"Buffer","data":[..]}`) become raw bytes.
fn resolve_resource(resource: &Value) -> Result<AttachmentSource, FormatError> {
    match resource {
        Value::String(s) if !s.is_empty() => Ok(AttachmentSource::Location(s.clone())),
        Value::Array(items) => bytes(items).map(AttachmentSource::Bytes),
        Value::Object(obj) if obj.get("type").and_then(Value::as_str) == Some("Buffer") => {
            match obj.get("data") {
                Some(Value::Array(items)) => bytes(items).map(AttachmentSource::Bytes),
                _ => Err(FormatError::MissingResource),
            }
        }
        _ => Err(FormatError::MissingResource),
    }
}

fn bytes(items: &[Value]) -> Result<Vec<u8>, FormatError> {
    items
        .iter()
        .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()).ok_or(FormatError::MissingResource))
        .collect()
}

fn parse_numeric(value: &Value, label: &'static str) -> Result<f64, FormatError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64().ok_or(FormatError::NotFinite(label))?,
        Value::String(s) if !s.trim().is_empty() => {
            s.trim().parse::<f64>().map_err(|_| FormatError::NotFinite(label))?
        }
        _ => return Err(FormatError::NotNumeric(label)),
    };
    if !parsed.is_finite() {
        return Err(FormatError::NotFinite(label));
    }
    Ok(parsed)
}

fn non_negative(value: f64) -> Result<f64, FormatError> {
    if value < 0.0 {
        return Err(FormatError::NegativeDuration);
    }
    Ok(value)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ComponentKind {
    Button,
    StringSelect,
    /// Only valid inside a modal.
    TextInput,
    UserSelect,
    RoleSelect,
    MentionableSelect,
    ChannelSelect,
}

impl ComponentKind {
    fn from_type(value: Option<&Value>) -> Result<Self, FormatError> {
        match value.and_then(Value::as_u64) {
            Some(2) => Ok(Self::Button),
            Some(3) => Ok(Self::StringSelect),
            Some(4) => Ok(Self::TextInput),
            Some(5) => Ok(Self::UserSelect),
            Some(6) => Ok(Self::RoleSelect),
            Some(7) => Ok(Self::MentionableSelect),
            Some(8) => Ok(Self::ChannelSelect),
            _ => {
                let shown = match value {
                    None => "undefined".to_string(),
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                };
                Err(FormatError::UnsupportedComponent(shown))
            }
        }
    }
}

/// A validated component; serializes back to its raw JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub kind: ComponentKind,
    pub data: Value,
}

impl Serialize for Component {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRow {
    #[serde(rename = "type")]
    kind: u8,
    pub components: Vec<Component>,
}

impl ActionRow {
    pub fn new(components: Vec<Component>) -> Self {
        Self { kind: 1, components }
    }
}

/// Rows for a message body. Text inputs are rejected here.
pub fn format_components(input: Option<&Value>) -> Result<Vec<ActionRow>, FormatError> {
    format_rows(input, |kind| kind != ComponentKind::TextInput)
}

/// Rows for a modal, where text inputs are the usual content.
pub fn format_modal_components(input: Option<&Value>) -> Result<Vec<ActionRow>, FormatError> {
    format_rows(input, |_| true)
}

fn format_rows(input: Option<&Value>, allowed: fn(ComponentKind) -> bool) -> Result<Vec<ActionRow>, FormatError> {
    let rows = match input {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(rows)) => rows,
        Some(_) => return Err(FormatError::ComponentsNotArray),
    };

    rows.iter()
        .map(|row| {
            let children = match (row.get("type").and_then(Value::as_u64), row.get("components")) {
                (Some(1), Some(Value::Array(children))) => children,
                _ => return Err(FormatError::InvalidRow),
            };
            let components = children
                .iter()
                .map(|child| -> Result<Component, FormatError> {
                    let kind = ComponentKind::from_type(child.get("type"))?;
                    if !allowed(kind) {
                        return Err(FormatError::UnsupportedComponent(
                            child.get("type").map(Value::to_string).unwrap_or_default(),
                        ));
                    }
                    Ok(Component { kind, data: child.clone() })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ActionRow::new(components))
        })
        .collect()
}
