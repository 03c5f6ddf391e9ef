//! # Destination Code Tables
//!
//! Immutable two-way tables between the typed pieces of a destination
//! (subscription type, path, stream) and the short codes that appear in the
//! canonical path string. The tables are built once at program start and never
//! mutated afterwards.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use static_init::dynamic;

use crate::error::GaugeFeedError;

/// Bidirectional lookup between a value and its wire code.
pub struct CodeTable<T: 'static> {
    forward: HashMap<T, &'static str>,
    reverse: HashMap<&'static str, T>,
}

impl<T: Copy + Eq + Hash> CodeTable<T> {
    /// Builds a table from `(value, code)` pairs.
    pub fn new(entries: &[(T, &'static str)]) -> Self {
        let mut forward = HashMap::with_capacity(entries.len());
        let mut reverse = HashMap::with_capacity(entries.len());
        for (value, code) in entries {
            forward.insert(*value, *code);
            reverse.insert(*code, *value);
        }
        Self { forward, reverse }
    }

    /// Returns the wire code for `value`, if it has one.
    pub fn code(&self, value: T) -> Option<&'static str> {
        self.forward.get(&value).copied()
    }

    /// Resolves a wire code back to its value.
    pub fn lookup(&self, code: &str) -> Option<T> {
        self.reverse.get(code).copied()
    }
}

/// Top-level kind of a subscription target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionType {
    /// Invalid or unparseable target.
    None,
    /// A computed real-time gauge for one symbol.
    Gauge,
    /// Reference data (instruments, search results, top lists).
    Definition,
    /// Output of a server-side strategy.
    Strategy,
}

impl SubscriptionType {
    /// Bit assigned to this type; paths declare which of these bits they accept.
    pub const fn mask(self) -> u8 {
        match self {
            SubscriptionType::None => 0,
            SubscriptionType::Gauge => 0b001,
            SubscriptionType::Definition => 0b010,
            SubscriptionType::Strategy => 0b100,
        }
    }

    /// Wire code, `None` for [`SubscriptionType::None`].
    pub fn code(self) -> Option<&'static str> {
        TYPE_CODES.code(self)
    }

    /// Resolves a wire code.
    pub fn from_code(code: &str) -> Option<Self> {
        TYPE_CODES.lookup(code)
    }
}

/// Per-gauge or per-definition path below the subscription type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionPath {
    /// No path segment (strategy destinations).
    None,
    /// Equilibrium price gauge.
    Equilibrium,
    /// Compressed sentiment bars.
    Sentiment,
    /// Momentum gauge.
    Momentum,
    /// Trend gauge.
    Trend,
    /// Price bars.
    PriceBars,
    /// Instrument definition for one symbol.
    Instrument,
    /// Free-text symbol search.
    SymbolSearch,
    /// Most active symbols per broker.
    TopSymbols,
    /// Futures contract list for a root symbol.
    FuturesContracts,
}

impl SubscriptionPath {
    /// Subscription types this path may appear under.
    pub const fn type_mask(self) -> u8 {
        match self {
            SubscriptionPath::None => 0,
            SubscriptionPath::Equilibrium
            | SubscriptionPath::Sentiment
            | SubscriptionPath::Momentum
            | SubscriptionPath::Trend
            | SubscriptionPath::PriceBars => SubscriptionType::Gauge.mask(),
            SubscriptionPath::Instrument
            | SubscriptionPath::SymbolSearch
            | SubscriptionPath::TopSymbols
            | SubscriptionPath::FuturesContracts => SubscriptionType::Definition.mask(),
        }
    }

    /// True when every type bit of this path is also set in `ty`.
    pub const fn allowed_under(self, ty: SubscriptionType) -> bool {
        self.type_mask() & !ty.mask() == 0
    }

    /// Wire code, `None` for [`SubscriptionPath::None`].
    pub fn code(self) -> Option<&'static str> {
        PATH_CODES.code(self)
    }

    /// Resolves a wire code.
    pub fn from_code(code: &str) -> Option<Self> {
        PATH_CODES.lookup(code)
    }
}

/// Logical data feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamId {
    /// Live data.
    #[default]
    Realtime,
    /// Exchange-delayed data.
    Delayed,
    /// Synthetic demo data.
    Demo,
}

impl StreamId {
    /// Wire code (`realtime`, `delay`, `demo`).
    pub fn code(self) -> &'static str {
        // every variant is in the table
        STREAM_CODES.code(self).unwrap_or("realtime")
    }

    /// Resolves a wire code.
    pub fn from_code(code: &str) -> Option<Self> {
        STREAM_CODES.lookup(code)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for StreamId {
    type Err = GaugeFeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamId::from_code(s).ok_or_else(|| GaugeFeedError::Config(format!("unknown stream '{}'", s)))
    }
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        StreamId::from_code(&code).ok_or_else(|| serde::de::Error::custom(format!("unknown stream '{}'", code)))
    }
}

#[dynamic]
static TYPE_CODES: CodeTable<SubscriptionType> = CodeTable::new(&[
    (SubscriptionType::Gauge, "gauge"),
    (SubscriptionType::Definition, "defn"),
    (SubscriptionType::Strategy, "strategy"),
]);

#[dynamic]
static PATH_CODES: CodeTable<SubscriptionPath> = CodeTable::new(&[
    (SubscriptionPath::Equilibrium, "eq"),
    (SubscriptionPath::Sentiment, "sent"),
    (SubscriptionPath::Momentum, "mom"),
    (SubscriptionPath::Trend, "trend"),
    (SubscriptionPath::PriceBars, "bars"),
    (SubscriptionPath::Instrument, "instrument"),
    (SubscriptionPath::SymbolSearch, "search"),
    (SubscriptionPath::TopSymbols, "top"),
    (SubscriptionPath::FuturesContracts, "futures"),
]);

#[dynamic]
static STREAM_CODES: CodeTable<StreamId> = CodeTable::new(&[
    (StreamId::Realtime, "realtime"),
    (StreamId::Delayed, "delay"),
    (StreamId::Demo, "demo"),
]);
