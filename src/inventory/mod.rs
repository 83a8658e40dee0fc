//! Bulk-export (inventory) record source.
//!
//! - [`manifest`] - manifest discovery, parsing and data file resolution
//! - [`reader`] - per-file CSV decoding, first-record probing and [`InventorySource`]

pub mod manifest;
pub mod reader;

pub use manifest::{FieldSchema, InventoryManifest, LoadedManifest, ManifestFile};
pub use reader::{decode_row, probe, FileErrorPolicy, InventoryFileReader, InventorySource};
