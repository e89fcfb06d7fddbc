use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Capacity tier of the inference service.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Small,
    Large,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Small, Tier::Large];

    /// Returns the config/CLI-facing name for this tier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Large => "large",
        }
    }

    /// The only fallback destination for this tier.
    pub fn other(self) -> Tier {
        match self {
            Self::Small => Self::Large,
            Self::Large => Self::Small,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "small" => Ok(Self::Small),
            "large" => Ok(Self::Large),
            other => Err(format!(
                "Invalid tier '{}'. Valid values: small, large",
                other
            )),
        }
    }
}

/// One value per tier, indexable by [`Tier`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerTier<T> {
    pub small: T,
    pub large: T,
}

impl<T> PerTier<T> {
    pub fn new(small: T, large: T) -> Self {
        Self { small, large }
    }

    pub fn from_fn(mut f: impl FnMut(Tier) -> T) -> Self {
        Self {
            small: f(Tier::Small),
            large: f(Tier::Large),
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(Tier, &T) -> U) -> PerTier<U> {
        PerTier {
            small: f(Tier::Small, &self.small),
            large: f(Tier::Large, &self.large),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tier, &T)> {
        [(Tier::Small, &self.small), (Tier::Large, &self.large)].into_iter()
    }
}

impl<T> Index<Tier> for PerTier<T> {
    type Output = T;

    fn index(&self, tier: Tier) -> &T {
        match tier {
            Tier::Small => &self.small,
            Tier::Large => &self.large,
        }
    }
}

impl<T> IndexMut<Tier> for PerTier<T> {
    fn index_mut(&mut self, tier: Tier) -> &mut T {
        match tier {
            Tier::Small => &mut self.small,
            Tier::Large => &mut self.large,
        }
    }
}

/// Routing category assigned by the classifier.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Reading,
    Factual,
    Math,
    Safety,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Reading,
        Category::Factual,
        Category::Math,
        Category::Safety,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Factual => "factual",
            Self::Math => "math",
            Self::Safety => "safety",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Output format for CLI reports
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Answer symbol for a zero-based choice index (`0 -> 'A'`).
///
/// Returns `None` past `'Z'`.
pub fn choice_symbol(index: usize) -> Option<char> {
    u8::try_from(index)
        .ok()
        .filter(|i| *i < 26)
        .map(|i| char::from(b'A' + i))
}

/// Zero-based choice index for an answer symbol, if it is an uppercase letter.
pub fn choice_index(symbol: char) -> Option<usize> {
    symbol
        .is_ascii_uppercase()
        .then(|| (symbol as u8 - b'A') as usize)
}
