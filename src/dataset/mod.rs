//! Module: dataset
//!
//! Purpose: Flash-resident animation/behavior dataset.
//!
//! Architecture:
//! - `header`: fixed 120-byte header, offset-addressed section tables
//! - `records`: fixed-size table records and blob record views
//! - `layout`: section placement for a new dataset
//! - `store`: validity check, typed accessors, cached size/hash
//! - `builder` / `defaults`: RAM image assembly and the compiled-in fallback
//!
//! Flash map:
//! ```text
//! dataset_base                payload_base = dataset_base + HEADER_SIZE
//! | DatasetHeader (120 B)     | palette | rgb kf | rgb tracks | kf | tracks |
//! | anim offsets (pad 4) | anims | cond offsets (pad 4) | conds |
//! | action offsets (pad 4) | actions | rules | behaviors |
//! ```

mod builder;
mod defaults;
mod header;
mod layout;
pub mod records;
mod store;
mod summary;

pub use builder::{BuildError, DatasetBuilder};
pub use defaults::default_dataset;
pub use header::{BlobRef, DatasetHeader, TableRef, HEADER_SIZE};
pub use layout::{DatasetLayout, DatasetShape};
pub use store::{DatasetStore, DatasetView};
pub use summary::{DatasetSummary, SummarySnapshot};

/// Hash seed.
pub const HASH_SEED: u32 = 5381;

/// Round up to the next multiple of 4.
#[inline]
pub const fn round_up_4(value: u32) -> u32 {
    (value + 3) & !3
}

/// DJB2 variant (`h = h * 33 ^ byte`) over `data`.
///
/// The app computes the same hash over the payload it sent to decide
/// whether a transfer is needed.
pub fn compute_hash(data: &[u8]) -> u32 {
    data.iter()
        .fold(HASH_SEED, |h, &b| h.wrapping_mul(33) ^ b as u32)
}
