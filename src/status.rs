//! Engine status: watch flags and working path.
//!
//! The status travels as the result text of a sentinel reply:
//! `watching:<bitmask>|path:<absolute path>`.

use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;

/// A trace category the engine can watch.
///
/// Discriminants are the bits used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum WatchItem {
    Facts = 1,
    Rules = 2,
    Activations = 4,
    Focus = 8,
    Compilations = 16,
    Statistics = 32,
    Globals = 64,
    Deffunctions = 128,
}

impl WatchItem {
    /// Categories a client may toggle with the `watch` command.
    pub const TOGGLEABLE: [WatchItem; 4] = [
        WatchItem::Deffunctions,
        WatchItem::Globals,
        WatchItem::Facts,
        WatchItem::Rules,
    ];

    /// Bit of this category in the wire bitmask.
    #[inline]
    pub fn bit(self) -> u32 {
        self as u32
    }

    /// Argument of the `watch` command selecting this category, if any.
    pub fn command_name(self) -> Option<&'static str> {
        match self {
            WatchItem::Deffunctions => Some("functions"),
            WatchItem::Globals => Some("globals"),
            WatchItem::Facts => Some("facts"),
            WatchItem::Rules => Some("rules"),
            _ => None,
        }
    }

    /// Name the engine uses for this category in `(watch ...)` expressions.
    pub fn engine_name(self) -> &'static str {
        match self {
            WatchItem::Facts => "facts",
            WatchItem::Rules => "rules",
            WatchItem::Activations => "activations",
            WatchItem::Focus => "focus",
            WatchItem::Compilations => "compilations",
            WatchItem::Statistics => "statistics",
            WatchItem::Globals => "globals",
            WatchItem::Deffunctions => "deffunctions",
        }
    }
}

impl FromStr for WatchItem {
    type Err = BridgeError;

    /// Parse a `watch` command argument.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WatchItem::TOGGLEABLE
            .into_iter()
            .find(|item| item.command_name() == Some(s))
            .ok_or_else(|| BridgeError::InvalidArgument {
                command: "watch".to_string(),
                argument: s.to_string(),
            })
    }
}

/// Set of watched categories, encoded as a bitmask on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WatchFlags(u32);

impl WatchFlags {
    /// No categories watched.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Build from a raw wire bitmask.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw wire bitmask.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn contains(self, item: WatchItem) -> bool {
        self.0 & item.bit() != 0
    }

    #[inline]
    pub fn insert(&mut self, item: WatchItem) {
        self.0 |= item.bit();
    }

    #[inline]
    pub fn remove(&mut self, item: WatchItem) {
        self.0 &= !item.bit();
    }

    /// Flip `item`, returning whether it is now watched.
    pub fn toggle(&mut self, item: WatchItem) -> bool {
        self.0 ^= item.bit();
        self.contains(item)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<WatchItem> for WatchFlags {
    fn from_iter<I: IntoIterator<Item = WatchItem>>(iter: I) -> Self {
        let mut flags = WatchFlags::empty();
        for item in iter {
            flags.insert(item);
        }
        flags
    }
}

/// Snapshot of the engine state published to clients.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStatus {
    /// Watched categories.
    pub watching: WatchFlags,
    /// Absolute working path, empty when the sender did not include one.
    pub path: String,
}

impl EngineStatus {
    pub fn new(watching: WatchFlags, path: impl Into<String>) -> Self {
        Self {
            watching,
            path: path.into(),
        }
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watching:{}|path:{}", self.watching.bits(), self.path)
    }
}

impl FromStr for EngineStatus {
    type Err = BridgeError;

    /// Accepts `watching:<1-5 digits>` optionally followed by
    /// `|path:<non-empty text without '|'>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || BridgeError::MalformedFrame(format!("not a status line: {s:?}"));

        let rest = s.strip_prefix("watching:").ok_or_else(malformed)?;
        let (digits, path) = match rest.split_once('|') {
            Some((digits, tail)) => {
                let path = tail.strip_prefix("path:").ok_or_else(malformed)?;
                if path.is_empty() || path.contains('|') {
                    return Err(malformed());
                }
                (digits, path)
            }
            None => (rest, ""),
        };

        if digits.is_empty() || digits.len() > 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let bits = digits.parse::<u32>().map_err(|_| malformed())?;

        Ok(EngineStatus::new(WatchFlags::from_bits(bits), path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_watch_bits() {
        assert_eq!(WatchItem::Facts.bit(), 1);
        assert_eq!(WatchItem::Rules.bit(), 2);
        assert_eq!(WatchItem::Globals.bit(), 64);
        assert_eq!(WatchItem::Deffunctions.bit(), 128);
    }

    #[rstest]
    #[case("functions", WatchItem::Deffunctions)]
    #[case("globals", WatchItem::Globals)]
    #[case("facts", WatchItem::Facts)]
    #[case("rules", WatchItem::Rules)]
    fn test_watch_item_from_command(#[case] name: &str, #[case] item: WatchItem) {
        assert_eq!(name.parse::<WatchItem>().unwrap(), item);
    }

    #[rstest]
    #[case("")]
    #[case("activations")]
    #[case("Facts")]
    fn test_watch_item_rejects(#[case] name: &str) {
        assert!(matches!(
            name.parse::<WatchItem>(),
            Err(BridgeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_toggle_twice_restores() {
        let mut flags = WatchFlags::from_bits(WatchItem::Facts.bit());
        assert!(flags.toggle(WatchItem::Rules));
        assert_eq!(flags.bits(), 3);
        assert!(!flags.toggle(WatchItem::Rules));
        assert_eq!(flags.bits(), 1);
    }

    #[test]
    fn test_collect_flags() {
        let flags: WatchFlags = [WatchItem::Facts, WatchItem::Globals].into_iter().collect();
        assert_eq!(flags.bits(), 65);
        assert!(flags.contains(WatchItem::Globals));
        assert!(!flags.contains(WatchItem::Rules));
    }

    #[test]
    fn test_status_format() {
        let status = EngineStatus::new(WatchFlags::from_bits(3), "/srv/rules");
        assert_eq!(status.to_string(), "watching:3|path:/srv/rules");
        assert_eq!(status.to_string().parse::<EngineStatus>().unwrap(), status);
    }

    #[rstest]
    #[case("watching:0", 0, "")]
    #[case("watching:99999|path:/tmp", 99999, "/tmp")]
    #[case("watching:130|path:C:\\rules dir", 130, "C:\\rules dir")]
    fn test_status_parse(#[case] line: &str, #[case] bits: u32, #[case] path: &str) {
        let status: EngineStatus = line.parse().unwrap();
        assert_eq!(status.watching.bits(), bits);
        assert_eq!(status.path, path);
    }

    #[rstest]
    #[case("")]
    #[case("watching:")]
    #[case("watching:123456")]
    #[case("watching:-1")]
    #[case("watching:3|path:")]
    #[case("watching:3|dir:/tmp")]
    #[case("watching:3|path:/a|b")]
    #[case("ok")]
    fn test_status_parse_rejects(#[case] line: &str) {
        assert!(line.parse::<EngineStatus>().is_err());
    }
}
