//! Hermes Postings - compressed inverted-index postings lists
//!
//! This library provides:
//! - Append-only postings lists with two interchangeable encodings:
//!   bit-level Golomb/Gamma and block-based PForDelta
//! - Optional per-document token positions
//! - Forward-only readers with lookahead
//! - Order-preserving k-way merging of lists over disjoint docno ranges
//! - Ordered and unordered proximity-window matching over several terms
//! - A JSON-configurable factory for choosing the encoding

pub mod config;
pub mod error;
pub mod merge;
pub mod query;
pub mod structures;

/// 1-based document number within a collection
pub type DocNo = u32;

/// Occurrences of a term in one document (1..=32767)
pub type TermFreq = u16;

pub use config::PostingsConfig;
pub use error::{Error, Result};
pub use merge::{merge_into, merge_lists, merge_two};
pub use query::{OrderedWindow, ProximityPostingsReader, UnorderedWindow, Window};
pub use structures::{
    GolombPostingList, PForDeltaPostingList, Posting, PostingFormat, PostingsList, PostingsReader,
    TermPositions, read_all,
};
