/// Position-tracking little-endian reader
pub mod cursor;
/// Shared winnow parsing helpers
pub mod parser_utils;
/// Growable little-endian writer
pub mod writer;

pub use cursor::{ByteReader, FString};
pub use writer::ByteWriter;
