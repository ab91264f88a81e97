//! Postings list encodings
//!
//! - `posting` - list/reader traits and the shared persisted header
//! - `posting_common` - varints, Golomb parameter, block constants
//! - `term_positions` - per-document token offsets and their Gamma codec
//! - `golomb` - bit-level Golomb d-gaps with Gamma tf and positions
//! - `pfor_delta` - 128-value patched frame-of-reference blocks

mod golomb;
mod pfor_delta;
mod posting;
mod posting_common;
mod term_positions;

pub use golomb::{GolombPostingList, GolombPostingsReader};
pub use pfor_delta::{PForDeltaBlock, PForDeltaPostingList, PForDeltaPostingsReader};
pub use posting::{ListStats, Posting, PostingFormat, PostingsList, PostingsReader, read_all};
pub use posting_common::{BLOCK_SIZE, MAX_TF, golomb_param};
pub use term_positions::TermPositions;
