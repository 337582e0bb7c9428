//! Serialization boundary for Varve stores.
//!
//! Converts between live entity graphs and flat JSON records. Export walks
//! declared reference properties breadth-first from a set of roots (or takes
//! a whole state), one [`ExportRecord`] per entity; import replays records
//! into a store in a single transaction, two passes, so cyclic graphs round
//! trip losslessly.
//!
//! The formats here are for interchange and tooling. The store itself never
//! serializes anything.

pub mod error;
pub mod export;
pub mod import;
pub mod record;

pub use error::{CodecError, CodecResult};
pub use export::{export, export_all, to_json_string};
pub use import::{from_json_str, import, ImportReport};
pub use record::ExportRecord;
