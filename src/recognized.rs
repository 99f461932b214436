use std::fmt;

/// A code read from an asset that either maps to a known variant `T` or is
/// kept as its raw form so it can be written back unchanged.
///
/// Used for property type names, pixel formats and animation compression
/// formats, where newer engine revisions add values this crate does not model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Recognized<T, Raw = String> {
    Known(T),
    Unknown(Raw),
}

impl<T: Copy, Raw: Copy> Copy for Recognized<T, Raw> {}

impl<T, Raw> Recognized<T, Raw> {
    pub fn known(&self) -> Option<&T> {
        match self {
            Recognized::Known(t) => Some(t),
            Recognized::Unknown(_) => None,
        }
    }

    pub fn unknown(&self) -> Option<&Raw> {
        match self {
            Recognized::Known(_) => None,
            Recognized::Unknown(raw) => Some(raw),
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Recognized::Known(_))
    }

    pub fn is(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.known() == Some(value)
    }
}

impl<T, Raw> From<T> for Recognized<T, Raw> {
    fn from(value: T) -> Self {
        Recognized::Known(value)
    }
}

impl<T: fmt::Display, Raw: fmt::Display> fmt::Display for Recognized<T, Raw> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recognized::Known(t) => t.fmt(f),
            Recognized::Unknown(raw) => raw.fmt(f),
        }
    }
}
