//! Semantic field tags
//!
//! Tags classify leaves for filtering (alarms, parameters, measurements) and
//! are merged from a struct-typed field into every leaf below it.

use errors::{ColdroomError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Tag {
    AirHeater,
    Alarm,
    AlarmCfg,
    Basic,
    C2H4,
    CO2,
    Enabled,
    Forced,
    GasBalance,
    Humidity,
    IoData,
    Param,
    Pid,
    Reserved,
    Sensor,
    Settings,
    System,
    Temperature,
    Computed,
}

impl Tag {
    pub const ALL: [Tag; 19] = [
        Tag::AirHeater,
        Tag::Alarm,
        Tag::AlarmCfg,
        Tag::Basic,
        Tag::C2H4,
        Tag::CO2,
        Tag::Enabled,
        Tag::Forced,
        Tag::GasBalance,
        Tag::Humidity,
        Tag::IoData,
        Tag::Param,
        Tag::Pid,
        Tag::Reserved,
        Tag::Sensor,
        Tag::Settings,
        Tag::System,
        Tag::Temperature,
        Tag::Computed,
    ];

    /// Wire name, as used in the map file and the API
    pub fn as_str(self) -> &'static str {
        match self {
            Tag::AirHeater => "AIR_HEATER",
            Tag::Alarm => "ALARM",
            Tag::AlarmCfg => "ALARM_CFG",
            Tag::Basic => "BASIC",
            Tag::C2H4 => "C2H4",
            Tag::CO2 => "CO2",
            Tag::Enabled => "ENABLED",
            Tag::Forced => "FORCED",
            Tag::GasBalance => "GAS_BALANCE",
            Tag::Humidity => "HUMIDITY",
            Tag::IoData => "IODATA",
            Tag::Param => "PARAM",
            Tag::Pid => "PID",
            Tag::Reserved => "RESERVED",
            Tag::Sensor => "SENSOR",
            Tag::Settings => "SETTINGS",
            Tag::System => "SYSTEM",
            Tag::Temperature => "TEMPERATURE",
            Tag::Computed => "COMPUTED",
        }
    }

    fn bit(self) -> u32 {
        1 << (self as u8)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = ColdroomError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Tag::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ColdroomError::InvalidTagQuery(format!("unknown tag '{}'", s)))
    }
}

/// Parse a tag name; case-insensitive
pub fn parse_tag(name: &str) -> Result<Tag> {
    name.parse()
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Compact set of tags
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TagSet(u32);

impl TagSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn insert(&mut self, tag: Tag) {
        self.0 |= tag.bit();
    }

    pub fn with(mut self, tag: Tag) -> Self {
        self.insert(tag);
        self
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.0 & tag.bit() != 0
    }

    pub fn union(self, other: TagSet) -> TagSet {
        TagSet(self.0 | other.0)
    }

    /// True when every tag of `other` is present
    pub fn contains_all(&self, other: TagSet) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when no tag of `other` is present
    pub fn contains_none(&self, other: TagSet) -> bool {
        self.0 & other.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Tag> + '_ {
        Tag::ALL.iter().copied().filter(|t| self.contains(*t))
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Tag names joined with `sep`, in declaration order
    pub fn join(&self, sep: &str) -> String {
        self.iter().map(Tag::as_str).collect::<Vec<_>>().join(sep)
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        let mut set = TagSet::empty();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

impl fmt::Debug for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for TagSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de> Deserialize<'de> for TagSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let tags = Vec::<Tag>::deserialize(deserializer)?;
        Ok(tags.into_iter().collect())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for tag in Tag::ALL {
            assert_eq!(parse_tag(tag.as_str()).unwrap(), tag);
        }
        assert_eq!(parse_tag("alarm_cfg").unwrap(), Tag::AlarmCfg);
    }

    #[test]
    fn test_parse_unknown_tag() {
        let err = parse_tag("ALARMS").unwrap_err();
        assert!(matches!(err, ColdroomError::InvalidTagQuery(_)));
    }

    #[test]
    fn test_set_semantics() {
        let set: TagSet = [Tag::Param, Tag::Pid, Tag::Humidity].into_iter().collect();
        assert!(set.contains_all(TagSet::empty().with(Tag::Param).with(Tag::Pid)));
        assert!(!set.contains_all(TagSet::empty().with(Tag::Param).with(Tag::Alarm)));
        assert!(set.contains_none(TagSet::empty().with(Tag::Alarm)));
        assert_eq!(set.len(), 3);
        assert_eq!(set.join("|"), "HUMIDITY|PARAM|PID");
    }

    #[test]
    fn test_serde() {
        let set = TagSet::empty().with(Tag::IoData).with(Tag::C2H4);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["C2H4","IODATA"]"#);
        let back: TagSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
        assert!(serde_json::from_str::<TagSet>(r#"["NOPE"]"#).is_err());
    }
}
