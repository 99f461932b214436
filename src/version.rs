//! Engine version handling and parse configuration.
//!
//! Many structures gain or lose fields between engine releases. The version
//! is not reliably recorded in cooked packages, so the caller states which
//! engine produced the asset and every version-conditional read consults it.

use std::fmt;
use std::str::FromStr;

use bon::Builder;
use rootcause::Report;

use crate::error::{AssetError, AssetResult, unsupported_version};

/// Games shipping a modified engine whose cooked layouts differ from the
/// stock release they are based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GameVariant {
    /// Final Fantasy VII Remake (4.18 based).
    Ff7r,
    /// Kingdom Hearts III (4.17 based, laid out like 4.18).
    Kh3,
}

impl GameVariant {
    pub fn tag(self) -> &'static str {
        match self {
            GameVariant::Ff7r => "ff7r",
            GameVariant::Kh3 => "kh3",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        [GameVariant::Ff7r, GameVariant::Kh3]
            .into_iter()
            .find(|g| g.tag().eq_ignore_ascii_case(tag))
    }
}

/// Engine release encoded as `major * 10000 + minor * 100 + patch`
/// (4.27 is `42700`, 5.0 is `50000`), plus the game variant, if any.
///
/// Ordering compares the release first, so a variant compares like the
/// release it is based on in every `>=` layout check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineVersion {
    release: u32,
    game: Option<GameVariant>,
}

impl EngineVersion {
    pub const UE4_18: Self = Self::new(4, 18, 0);
    pub const UE4_20: Self = Self::new(4, 20, 0);
    pub const UE4_23: Self = Self::new(4, 23, 0);
    pub const UE4_25: Self = Self::new(4, 25, 0);
    pub const UE4_26: Self = Self::new(4, 26, 0);
    pub const UE4_27: Self = Self::new(4, 27, 0);
    pub const UE5_0: Self = Self::new(5, 0, 0);
    pub const FF7R: Self = Self::UE4_18.with_game(GameVariant::Ff7r);
    pub const KH3: Self = Self::UE4_18.with_game(GameVariant::Kh3);

    /// Oldest release whose layouts are understood.
    pub const MIN_SUPPORTED: Self = Self::UE4_18;
    /// Newest release whose layouts are understood.
    pub const MAX_SUPPORTED: Self = Self::new(5, 0, 99);

    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            release: major * 10000 + minor * 100 + patch,
            game: None,
        }
    }

    pub const fn with_game(self, game: GameVariant) -> Self {
        Self {
            release: self.release,
            game: Some(game),
        }
    }

    pub const fn as_int(self) -> u32 {
        self.release
    }

    pub const fn major(self) -> u32 {
        self.release / 10000
    }

    pub const fn minor(self) -> u32 {
        (self.release / 100) % 100
    }

    pub const fn patch(self) -> u32 {
        self.release % 100
    }

    pub const fn game(self) -> Option<GameVariant> {
        self.game
    }

    /// The stock release this version is laid out like.
    pub const fn base(self) -> Self {
        Self {
            release: self.release,
            game: None,
        }
    }

    pub fn is_game(self, game: GameVariant) -> bool {
        self.game == Some(game)
    }

    pub fn is_ue5(self) -> bool {
        self >= Self::UE5_0
    }

    pub fn is_supported(self) -> bool {
        (Self::MIN_SUPPORTED..=Self::MAX_SUPPORTED).contains(&self.base())
    }

    /// Fails with `UnsupportedVersion` outside the capability matrix.
    pub fn ensure_supported(self) -> AssetResult<()> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(unsupported_version(format!(
                "engine {self} is outside the supported range {}..={}",
                Self::MIN_SUPPORTED,
                Self::MAX_SUPPORTED
            )))
        }
    }
}

impl Default for EngineVersion {
    fn default() -> Self {
        Self::UE4_27
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(game) = self.game {
            f.write_str(game.tag())
        } else if self.patch() == 0 {
            write!(f, "{}.{}", self.major(), self.minor())
        } else {
            write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
        }
    }
}

impl FromStr for EngineVersion {
    type Err = Report<AssetError>;

    /// Accepts `"4.27"`, `"5.0"`, `"5.0.3"` with an optional `UE`/`ue`
    /// prefix, and the game tags `"ff7r"` and `"kh3"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match GameVariant::from_tag(trimmed) {
            Some(GameVariant::Ff7r) => return Ok(Self::FF7R),
            Some(GameVariant::Kh3) => return Ok(Self::KH3),
            None => {}
        }
        let trimmed = trimmed
            .strip_prefix("UE")
            .or_else(|| trimmed.strip_prefix("ue"))
            .unwrap_or(trimmed);

        let mut parts = trimmed.split('.');
        let mut next = |required: bool| -> AssetResult<u32> {
            match parts.next() {
                Some(p) => p
                    .parse::<u32>()
                    .ok()
                    .filter(|v| *v < 100)
                    .ok_or_else(|| unsupported_version(format!("invalid engine version `{s}`"))),
                None if required => Err(unsupported_version(format!(
                    "invalid engine version `{s}`"
                ))),
                None => Ok(0),
            }
        };
        let major = next(true)?;
        let minor = next(true)?;
        let patch = next(false)?;
        if parts.next().is_some() {
            return Err(unsupported_version(format!("invalid engine version `{s}`")));
        }
        Ok(Self::new(major, minor, patch))
    }
}

/// Settings for a parse pass.
#[derive(Builder, Debug, Clone)]
pub struct ParseOptions {
    /// Engine release the package was cooked with.
    #[builder(default)]
    pub engine_version: EngineVersion,
    /// When `false`, exports that hit `UnsupportedVersion` are kept as
    /// generic properties plus raw bytes instead of failing the decode.
    #[builder(default = true)]
    pub strict: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ParseOptions {
    pub fn for_version(engine_version: EngineVersion) -> Self {
        Self::builder().engine_version(engine_version).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versions() {
        assert_eq!("4.27".parse::<EngineVersion>().unwrap(), EngineVersion::UE4_27);
        assert_eq!("UE5.0".parse::<EngineVersion>().unwrap(), EngineVersion::UE5_0);
        assert_eq!(
            "5.0.3".parse::<EngineVersion>().unwrap(),
            EngineVersion::new(5, 0, 3)
        );
        assert!("4".parse::<EngineVersion>().is_err());
        assert!("four.two".parse::<EngineVersion>().is_err());
    }

    #[test]
    fn test_ordering_and_display() {
        assert!(EngineVersion::UE4_18 < EngineVersion::UE4_27);
        assert!(EngineVersion::UE5_0.is_ue5());
        assert_eq!(EngineVersion::UE4_27.as_int(), 42700);
        assert_eq!(EngineVersion::UE4_26.to_string(), "4.26");
        assert!(EngineVersion::new(4, 10, 0).ensure_supported().is_err());
    }

    #[test]
    fn test_game_variants() {
        let ff7r = "FF7R".parse::<EngineVersion>().unwrap();
        assert_eq!(ff7r, EngineVersion::FF7R);
        assert_eq!(ff7r.to_string(), "ff7r");
        assert_eq!(ff7r.base(), EngineVersion::UE4_18);
        assert!(ff7r.is_game(GameVariant::Ff7r));
        assert!(ff7r.ensure_supported().is_ok());
        assert!(ff7r < EngineVersion::UE4_20);
        assert!(ff7r >= EngineVersion::UE4_18);
        assert_ne!(ff7r, EngineVersion::UE4_18);

        let kh3 = "kh3".parse::<EngineVersion>().unwrap();
        assert_eq!(kh3.game(), Some(GameVariant::Kh3));
        assert!(!kh3.is_ue5());
        assert_eq!(EngineVersion::UE4_27.game(), None);
    }

    #[test]
    fn test_default_options() {
        let opts = ParseOptions::default();
        assert!(opts.strict);
        assert_eq!(opts.engine_version, EngineVersion::UE4_27);
    }
}
