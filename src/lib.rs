/// Little-endian byte cursor and writer
pub mod data;
/// Error definitions
pub mod error;
/// Replacing export payloads in an existing package
pub mod inject;
/// Plain data handed to and accepted from the host application
pub mod model;
/// Class-specific object decoders and re-encoders
pub mod objects;
/// Package summary, name/import/export tables, parse and serialize
pub mod package;
/// Tagged property lists
pub mod property;
/// Decoded objects <-> model data
pub mod reconstruct;
/// Generic wrapper for values that may or may not match a known variant.
pub mod recognized;
/// Engine versions and parse options
pub mod version;

#[cfg(test)]
mod test_support;

pub use error::{AssetError, AssetResult};
pub use package::{AssetFile, AssetSources, SerializedAsset};
pub use version::{EngineVersion, ParseOptions};

#[cfg(feature = "arc")]
pub type Rc<T> = std::sync::Arc<T>;

#[cfg(not(feature = "arc"))]
pub type Rc<T> = std::rc::Rc<T>;
