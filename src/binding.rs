//! Binding tables built from the mapping file
//!
//! Each mapping entry has the shape
//!
//! ```text
//! "device.TYPE.channel.key.value" = "device.TYPE.channel.key.value[.delay]"
//! "device.TYPE.channel.key.value" = "[MappingName]"
//! ```
//!
//! The textual form is parsed once, at load time, into typed rules. Nothing
//! at match time looks at strings other than device names.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use stagesavvy_transport::MessageKind;
use thiserror::Error;

use crate::config::{MappingTree, RawMapping};

/// Token for "any value" in a source pattern and "copy the incoming value" in
/// a destination
pub const WILDCARD: &str = "X";

/// Errors raised while turning mapping text into rules
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("expected {expected} dot-separated fields in \"{text}\", found {found}")]
    FieldCount {
        text: String,
        expected: &'static str,
        found: usize,
    },

    #[error("invalid {field} \"{value}\" in \"{text}\"")]
    InvalidField {
        text: String,
        field: &'static str,
        value: String,
    },

    #[error("malformed mapping switch \"{0}\" (expected \"[name]\")")]
    MalformedSwitch(String),

    #[error("\"{0}\" can never match: a note-on with velocity 0 arrives as a note-off")]
    SilentNoteOn(String),

    #[error("mapping {mapping}, rule \"{key}\": {reason}")]
    Rule {
        mapping: String,
        key: String,
        reason: Box<BindingError>,
    },
}

/// Message type in a source pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceType {
    Cc,
    /// Both note-on and note-off
    Note,
    NoteOn,
    NoteOff,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Cc => "CC",
            SourceType::Note => "NOTE",
            SourceType::NoteOn => "NOTEON",
            SourceType::NoteOff => "NOTEOFF",
        }
    }

    /// Whether an incoming message kind falls under this type
    ///
    /// Matching is by kind-name prefix: `NOTE` covers `NOTEON` and `NOTEOFF`.
    pub fn matches(&self, kind: MessageKind) -> bool {
        kind.as_str().starts_with(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CC" => Ok(SourceType::Cc),
            "NOTE" => Ok(SourceType::Note),
            "NOTEON" => Ok(SourceType::NoteOn),
            "NOTEOFF" => Ok(SourceType::NoteOff),
            _ => Err(()),
        }
    }
}

/// Message type a destination emits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DestinationType {
    Cc,
    /// Note-on followed by an automatic note-off
    Note,
}

impl DestinationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestinationType::Cc => "CC",
            DestinationType::Note => "NOTE",
        }
    }
}

impl FromStr for DestinationType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CC" => Ok(DestinationType::Cc),
            "NOTE" => Ok(DestinationType::Note),
            _ => Err(()),
        }
    }
}

/// A value field: a literal, or `X`
///
/// In a source pattern `X` accepts any value; in a destination it copies the
/// incoming value through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueSpec {
    Exact(u8),
    Wildcard,
}

impl ValueSpec {
    pub fn exact(&self) -> Option<u8> {
        match self {
            ValueSpec::Exact(v) => Some(*v),
            ValueSpec::Wildcard => None,
        }
    }
}

impl fmt::Display for ValueSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSpec::Exact(v) => write!(f, "{v}"),
            ValueSpec::Wildcard => f.write_str(WILDCARD),
        }
    }
}

/// Left-hand side of a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourcePattern {
    pub device: String,
    pub kind: SourceType,
    pub channel: u8,
    pub key: u8,
    pub value: ValueSpec,
}

impl FromStr for SourcePattern {
    type Err = BindingError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = text.split('.').collect();
        if fields.len() != 5 {
            return Err(BindingError::FieldCount {
                text: text.to_string(),
                expected: "5",
                found: fields.len(),
            });
        }

        let device = parse_device(text, fields[0])?;
        let kind = fields[1]
            .parse::<SourceType>()
            .map_err(|_| invalid(text, "type", fields[1]))?;

        let channel = parse_number(text, "channel", fields[2], 15)?;
        let key = parse_number(text, "key", fields[3], 127)?;
        let value = parse_value(text, fields[4])?;
        if kind == SourceType::NoteOn && value == ValueSpec::Exact(0) {
            return Err(BindingError::SilentNoteOn(text.to_string()));
        }

        Ok(Self {
            device,
            kind,
            channel,
            key,
            value,
        })
    }
}

impl fmt::Display for SourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}",
            self.device,
            self.kind.as_str(),
            self.channel,
            self.key,
            self.value
        )
    }
}

/// Right-hand side of a forwarding rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationAction {
    pub device: String,
    pub kind: DestinationType,
    pub channel: u8,
    pub key: u8,
    /// `Wildcard` means copy the source value
    pub value: ValueSpec,
    /// Note-off delay as written; `None` when the field was omitted
    pub delay: Option<u16>,
}

impl DestinationAction {
    /// Note-off delay in milliseconds, 0 when omitted
    pub fn delay_ms(&self) -> u16 {
        self.delay.unwrap_or(0)
    }
}

impl FromStr for DestinationAction {
    type Err = BindingError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = text.split('.').collect();
        if fields.len() != 5 && fields.len() != 6 {
            return Err(BindingError::FieldCount {
                text: text.to_string(),
                expected: "5 or 6",
                found: fields.len(),
            });
        }

        let device = parse_device(text, fields[0])?;
        let kind = fields[1]
            .parse::<DestinationType>()
            .map_err(|_| invalid(text, "type", fields[1]))?;

        let delay = match fields.get(5) {
            Some(raw) => {
                let digits = raw.strip_suffix("ms").unwrap_or(raw);
                let ms = digits
                    .parse::<u16>()
                    .map_err(|_| invalid(text, "delay", raw))?;
                Some(ms)
            }
            None => None,
        };

        Ok(Self {
            device,
            kind,
            channel: parse_number(text, "channel", fields[2], 15)?,
            key: parse_number(text, "key", fields[3], 127)?,
            value: parse_value(text, fields[4])?,
            delay,
        })
    }
}

impl fmt::Display for DestinationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}",
            self.device,
            self.kind.as_str(),
            self.channel,
            self.key,
            self.value
        )?;
        if let Some(delay) = self.delay {
            write!(f, ".{delay}ms")?;
        }
        Ok(())
    }
}

/// What a rule does when it matches
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Action {
    Forward(DestinationAction),
    /// Switch the active mapping; the target is the bracketed name
    SwitchMapping(String),
}

impl FromStr for Action {
    type Err = BindingError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = text.strip_prefix('[') {
            let target = rest
                .strip_suffix(']')
                .filter(|t| !t.is_empty() && !t.contains(['[', ']']))
                .ok_or_else(|| BindingError::MalformedSwitch(text.to_string()))?;
            return Ok(Action::SwitchMapping(target.to_string()));
        }
        if text.ends_with(']') {
            return Err(BindingError::MalformedSwitch(text.to_string()));
        }
        text.parse().map(Action::Forward)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Forward(dest) => write!(f, "{dest}"),
            Action::SwitchMapping(target) => write!(f, "[{target}]"),
        }
    }
}

/// One source-pattern-to-action entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub source: SourcePattern,
    pub action: Action,
}

impl Rule {
    pub fn parse(key: &str, value: &str) -> Result<Self, BindingError> {
        Ok(Self {
            source: key.parse()?,
            action: value.parse()?,
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.action)
    }
}

/// One named mapping, read-only after construction
#[derive(Debug, Clone)]
pub struct BindingTable {
    name: String,
    rules: Vec<Rule>,
    /// `(key, value)` pairs of every exact-valued rule; wildcard rules defer
    /// to these
    exact_pairs: HashSet<(u8, u8)>,
}

impl BindingTable {
    pub fn new(name: impl Into<String>, rules: Vec<Rule>) -> Self {
        let exact_pairs = rules
            .iter()
            .filter_map(|rule| {
                rule.source
                    .value
                    .exact()
                    .map(|value| (rule.source.key, value))
            })
            .collect();

        Self {
            name: name.into(),
            rules,
            exact_pairs,
        }
    }

    /// Parse every entry of a raw mapping; the first bad entry fails the load
    pub fn from_raw(raw: &RawMapping) -> Result<Self, BindingError> {
        let rules = raw
            .entries
            .iter()
            .map(|(key, value)| {
                Rule::parse(key, value).map_err(|e| BindingError::Rule {
                    mapping: raw.name.clone(),
                    key: key.clone(),
                    reason: Box::new(e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(raw.name.clone(), rules))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rules in file order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Whether some exact-valued rule claims this `(key, value)` pair
    pub fn has_exact(&self, key: u8, value: u8) -> bool {
        self.exact_pairs.contains(&(key, value))
    }

    pub fn switch_rules(&self) -> impl Iterator<Item = (&SourcePattern, &str)> {
        self.rules.iter().filter_map(|rule| match &rule.action {
            Action::SwitchMapping(target) => Some((&rule.source, target.as_str())),
            Action::Forward(_) => None,
        })
    }

    pub fn forward_rules(&self) -> impl Iterator<Item = (&SourcePattern, &DestinationAction)> {
        self.rules.iter().filter_map(|rule| match &rule.action {
            Action::Forward(dest) => Some((&rule.source, dest)),
            Action::SwitchMapping(_) => None,
        })
    }
}

/// Every mapping from the configuration, in file order
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    tables: Vec<BindingTable>,
}

impl Bindings {
    pub fn new(tables: Vec<BindingTable>) -> Self {
        Self { tables }
    }

    pub fn from_tree(tree: &MappingTree) -> Result<Self, BindingError> {
        let tables = tree
            .mappings
            .iter()
            .map(BindingTable::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tables })
    }

    pub fn get(&self, name: &str) -> Option<&BindingTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn tables(&self) -> &[BindingTable] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Mapping names in file order
    pub fn names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Devices referenced as sources anywhere, first-seen order
    pub fn input_ports(&self) -> Vec<String> {
        unique(
            self.tables
                .iter()
                .flat_map(|t| t.rules.iter().map(|r| r.source.device.as_str())),
        )
    }

    /// Devices referenced as destinations anywhere, first-seen order
    pub fn output_ports(&self) -> Vec<String> {
        unique(
            self.tables
                .iter()
                .flat_map(|t| t.forward_rules().map(|(_, dest)| dest.device.as_str())),
        )
    }
}

fn unique<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .filter(|name| seen.insert(*name))
        .map(str::to_string)
        .collect()
}

fn invalid(text: &str, field: &'static str, value: &str) -> BindingError {
    BindingError::InvalidField {
        text: text.to_string(),
        field,
        value: value.to_string(),
    }
}

fn parse_device(text: &str, raw: &str) -> Result<String, BindingError> {
    let device = raw.trim();
    if device.is_empty() {
        return Err(invalid(text, "device", raw));
    }
    Ok(device.to_string())
}

fn parse_number(text: &str, field: &'static str, raw: &str, max: u8) -> Result<u8, BindingError> {
    raw.parse::<u8>()
        .ok()
        .filter(|n| *n <= max)
        .ok_or_else(|| invalid(text, field, raw))
}

fn parse_value(text: &str, raw: &str) -> Result<ValueSpec, BindingError> {
    if raw == WILDCARD {
        Ok(ValueSpec::Wildcard)
    } else {
        parse_number(text, "value", raw, 127).map(ValueSpec::Exact)
    }
}
