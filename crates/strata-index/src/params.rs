//! Query parameters for `searchlogs` and `waitforlogs`.
//!
//! Block bounds arrive either as a number or the string `"latest"`, which
//! resolves to the tip height at call time.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use strata_core::constants::DEFAULT_SEARCH_MINCONF;
use strata_core::error::LogIndexError;

use crate::filter::LogFilter;

/// A block bound: explicit height or the current tip.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(try_from = "RawHeight")]
pub enum BlockHeightArg {
    Latest,
    Number(u64),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawHeight {
    Number(i64),
    Text(String),
}

impl TryFrom<RawHeight> for BlockHeightArg {
    type Error = LogIndexError;

    fn try_from(raw: RawHeight) -> Result<Self, Self::Error> {
        match raw {
            RawHeight::Number(n) => Self::from_signed(n),
            RawHeight::Text(s) => s.parse(),
        }
    }
}

impl BlockHeightArg {
    /// Negative heights are rejected with [`LogIndexError::InvalidRange`].
    pub fn from_signed(n: i64) -> Result<Self, LogIndexError> {
        u64::try_from(n)
            .map(Self::Number)
            .map_err(|_| LogIndexError::InvalidRange(format!("negative block height {n}")))
    }

    pub fn resolve(self, tip_height: u64) -> u64 {
        match self {
            Self::Latest => tip_height,
            Self::Number(n) => n,
        }
    }
}

impl FromStr for BlockHeightArg {
    type Err = LogIndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "latest" {
            return Ok(Self::Latest);
        }
        let n: i64 = s
            .parse()
            .map_err(|_| LogIndexError::InvalidRange(format!("invalid block height {s:?}")))?;
        Self::from_signed(n)
    }
}

impl fmt::Display for BlockHeightArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl Serialize for BlockHeightArg {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Latest => serializer.serialize_str("latest"),
            Self::Number(n) => serializer.serialize_u64(*n),
        }
    }
}

/// Parameters of a bounded range query.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SearchParams {
    pub from: BlockHeightArg,
    pub to: BlockHeightArg,
    #[serde(default = "default_search_minconf")]
    pub minconf: u64,
    #[serde(default)]
    pub filter: LogFilter,
}

fn default_search_minconf() -> u64 {
    DEFAULT_SEARCH_MINCONF
}

impl SearchParams {
    pub fn new(from: BlockHeightArg, to: BlockHeightArg) -> Self {
        Self {
            from,
            to,
            minconf: DEFAULT_SEARCH_MINCONF,
            filter: LogFilter::default(),
        }
    }

    /// Resolve both bounds against the tip.
    ///
    /// # Errors
    ///
    /// [`LogIndexError::InvalidRange`] if `from > to` after resolution.
    pub fn resolve(&self, tip_height: u64) -> Result<(u64, u64), LogIndexError> {
        let from = self.from.resolve(tip_height);
        let to = self.to.resolve(tip_height);
        if from > to {
            return Err(LogIndexError::InvalidRange(format!(
                "from block {from} is above to block {to}"
            )));
        }
        Ok((from, to))
    }
}

/// Raw upper bound of a wait that means "no bound".
pub const UNBOUNDED_HEIGHT: i64 = -1;

/// Upper bound of a wait: a block bound, or [`UNBOUNDED_HEIGHT`] for none.
///
/// Any other negative height is still an [`LogIndexError::InvalidRange`].
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(try_from = "RawHeight")]
pub struct WaitBound(pub Option<BlockHeightArg>);

impl TryFrom<RawHeight> for WaitBound {
    type Error = LogIndexError;

    fn try_from(raw: RawHeight) -> Result<Self, Self::Error> {
        match raw {
            RawHeight::Number(UNBOUNDED_HEIGHT) => Ok(Self(None)),
            RawHeight::Text(s) if s == "-1" => Ok(Self(None)),
            raw => BlockHeightArg::try_from(raw).map(|b| Self(Some(b))),
        }
    }
}

fn deserialize_wait_bound<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<BlockHeightArg>, D::Error> {
    Option::<RawHeight>::deserialize(deserializer)?
        .map(WaitBound::try_from)
        .transpose()
        .map(|bound| bound.and_then(|b| b.0))
        .map_err(D::Error::custom)
}

/// Parameters of a blocking wait. Every field is optional.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct WaitParams {
    #[serde(default)]
    pub from: Option<BlockHeightArg>,
    /// `None` (or `-1` on the wire) waits without an upper bound.
    #[serde(default, deserialize_with = "deserialize_wait_bound")]
    pub to: Option<BlockHeightArg>,
    #[serde(default)]
    pub minconf: Option<u64>,
    #[serde(default)]
    pub filter: LogFilter,
}

/// [`WaitParams`] with defaults applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedWait {
    pub from: u64,
    pub to: Option<u64>,
    pub minconf: u64,
}

impl WaitParams {
    /// Apply defaults: `from` is the block after the tip, `to` is open.
    pub fn resolve(&self, tip_height: u64, default_minconf: u64) -> ResolvedWait {
        ResolvedWait {
            from: self
                .from
                .map_or(tip_height.saturating_add(1), |b| b.resolve(tip_height)),
            to: self.to.map(|b| b.resolve(tip_height)),
            minconf: self.minconf.unwrap_or(default_minconf),
        }
    }
}
