//! Postings list and reader abstractions shared by every encoding backend
//!
//! A list is built append-only (`add` in increasing docno order), sealed by
//! `finish`/`write`, and read back through a forward-only [`PostingsReader`].
//! Persisted layout, identical for every backend:
//!
//! ```text
//! postings_added: varint
//! df:             varint
//! cf:             varint
//! encoded_len:    varint
//! encoded bytes:  backend specific
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};

use super::posting_common::{MAX_TF, read_vint, read_vint_u32, write_vint};
use super::term_positions::TermPositions;
use crate::error::{Error, Result, invariant};
use crate::{DocNo, TermFreq};

/// A (docno, tf) pair as produced by a [`PostingsReader`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Posting {
    pub docno: DocNo,
    pub tf: TermFreq,
}

impl Posting {
    pub fn new(docno: DocNo, tf: TermFreq) -> Self {
        Self { docno, tf }
    }
}

/// Encoding backend of a postings list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingFormat {
    /// Bit-level Golomb-Rice d-gaps with Gamma tf and positions
    #[default]
    Golomb,
    /// 128-value PForDelta blocks per stream
    PForDelta,
}

/// Counters and term statistics every backend keeps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListStats {
    collection_document_count: u32,
    number_of_postings: u32,
    postings_added: u32,
    df: Option<u32>,
    cf: Option<u64>,
    prev_docno: DocNo,
}

impl ListStats {
    pub fn collection_document_count(&self) -> u32 {
        self.collection_document_count
    }

    pub fn number_of_postings(&self) -> u32 {
        self.number_of_postings
    }

    pub fn postings_added(&self) -> u32 {
        self.postings_added
    }

    pub fn df(&self) -> Option<u32> {
        self.df
    }

    pub fn cf(&self) -> Option<u64> {
        self.cf
    }

    /// Forget everything added, keeping the collection size.
    pub(crate) fn reset(&mut self) {
        *self = Self {
            collection_document_count: self.collection_document_count,
            ..Self::default()
        };
    }

    /// Validate an `add` without changing any state.
    ///
    /// Returns the value the backend has to encode for the docno: the
    /// absolute docno for the first posting, the d-gap afterwards.
    pub(crate) fn check_add(
        &self,
        docno: DocNo,
        tf: TermFreq,
        positions: Option<&TermPositions>,
        positional: bool,
    ) -> Result<u32> {
        if self.number_of_postings == 0 {
            return Err(invariant("number_of_postings must be set before add"));
        }
        if self.collection_document_count == 0 {
            return Err(invariant(
                "collection_document_count must be set before add",
            ));
        }
        if self.postings_added >= self.number_of_postings {
            return Err(invariant(format!(
                "list declared {} postings, cannot add more",
                self.number_of_postings
            )));
        }
        if tf == 0 || tf > MAX_TF {
            return Err(invariant(format!("tf {tf} outside 1..={MAX_TF}")));
        }
        if positional {
            let positions =
                positions.ok_or_else(|| invariant("positional list requires positions"))?;
            if positions.tf() != tf {
                return Err(invariant(format!(
                    "tf {} does not match {} positions",
                    tf,
                    positions.tf()
                )));
            }
            // validates ordering before anything is written
            positions.encoded_size()?;
        }
        if self.postings_added == 0 {
            if docno == 0 {
                return Err(invariant("docnos are 1-based, got 0"));
            }
            Ok(docno)
        } else if docno <= self.prev_docno {
            Err(invariant(format!(
                "docnos must be strictly increasing: {} followed by {}",
                self.prev_docno, docno
            )))
        } else {
            Ok(docno - self.prev_docno)
        }
    }

    pub(crate) fn record_add(&mut self, docno: DocNo) {
        self.prev_docno = docno;
        self.postings_added += 1;
    }

    pub(crate) fn check_complete(&self) -> Result<()> {
        if self.postings_added != self.number_of_postings {
            log::error!(
                "postings list sealed with {} postings, {} declared",
                self.postings_added,
                self.number_of_postings
            );
            return Err(invariant(format!(
                "{} postings added but {} declared",
                self.postings_added, self.number_of_postings
            )));
        }
        Ok(())
    }

    pub(crate) fn write_header(&self, writer: &mut dyn Write, encoded_len: usize) -> Result<()> {
        let df = self.df.ok_or(Error::MissingStatistic("df"))?;
        let cf = self.cf.ok_or(Error::MissingStatistic("cf"))?;
        write_vint(writer, self.postings_added as u64)?;
        write_vint(writer, df as u64)?;
        write_vint(writer, cf)?;
        write_vint(writer, encoded_len as u64)?;
        Ok(())
    }

    /// Read a persisted header and the encoded payload that follows it.
    pub(crate) fn read_header<R: Read + ?Sized>(reader: &mut R) -> Result<(Self, Vec<u8>)> {
        let postings = read_vint_u32(reader)?;
        let df = read_vint_u32(reader)?;
        let cf = read_vint(reader)?;
        let encoded_len = read_vint(reader)?;

        // the declared length is untrusted, so let the payload itself bound
        // the allocation
        let mut encoded = Vec::new();
        Read::take(&mut *reader, encoded_len).read_to_end(&mut encoded)?;
        if (encoded.len() as u64) < encoded_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "postings payload truncated: {} of {} bytes",
                    encoded.len(),
                    encoded_len
                ),
            )
            .into());
        }

        let stats = Self {
            collection_document_count: 0,
            number_of_postings: postings,
            postings_added: postings,
            df: Some(df),
            cf: Some(cf),
            prev_docno: 0,
        };
        Ok((stats, encoded))
    }
}

/// One term's postings, append-only while building
///
/// Both `number_of_postings` and `collection_document_count` must be set
/// before the first [`add`](Self::add). `df` and `cf` are the term's global
/// statistics and must be set explicitly before [`write`](Self::write); a
/// list holding one partition of a collection usually has `df` larger than
/// its own postings count.
pub trait PostingsList: fmt::Debug {
    fn format(&self) -> PostingFormat;

    fn is_positional(&self) -> bool;

    fn stats(&self) -> &ListStats;

    fn stats_mut(&mut self) -> &mut ListStats;

    fn set_collection_document_count(&mut self, docs: u32) {
        self.stats_mut().collection_document_count = docs;
    }

    fn collection_document_count(&self) -> u32 {
        self.stats().collection_document_count
    }

    /// Declare the final number of postings this list will hold.
    fn set_number_of_postings(&mut self, n: u32) {
        self.stats_mut().number_of_postings = n;
    }

    fn number_of_postings(&self) -> u32 {
        self.stats().number_of_postings
    }

    /// Postings added so far.
    fn size(&self) -> u32 {
        self.stats().postings_added
    }

    fn set_df(&mut self, df: u32) {
        self.stats_mut().df = Some(df);
    }

    fn df(&self) -> Option<u32> {
        self.stats().df
    }

    fn set_cf(&mut self, cf: u64) {
        self.stats_mut().cf = Some(cf);
    }

    fn cf(&self) -> Option<u64> {
        self.stats().cf
    }

    /// Append a posting. `positions` is required by positional lists and
    /// ignored by the others.
    fn add(&mut self, docno: DocNo, tf: TermFreq, positions: Option<&TermPositions>)
    -> Result<()>;

    /// Flush pending data and verify the postings count. Idempotent; no
    /// further `add` is accepted afterwards.
    fn finish(&mut self) -> Result<()>;

    /// Finish the list and write it in the persisted layout.
    fn write(&mut self, writer: &mut dyn Write) -> Result<()>;

    fn serialize(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.write(&mut out)?;
        Ok(out)
    }

    /// Size in bytes of the encoded payload (after `finish`).
    fn encoded_len(&self) -> usize;

    /// Open a fresh cursor at the first posting. The list must be finished.
    fn postings_reader(&self) -> Result<Box<dyn PostingsReader + '_>>;

    /// Back to the empty building state; the collection size is kept.
    fn clear(&mut self);
}

/// Forward-only cursor over one list's postings
///
/// A reader is a single advancing scan. Independent scans of the same list
/// use independent readers; the underlying bytes are never mutated.
pub trait PostingsReader {
    /// Decode the next posting, or `None` once all postings were read.
    fn next_posting(&mut self) -> Result<Option<Posting>>;

    fn has_more_postings(&self) -> bool;

    /// Docno of the current posting (0 before the first `next_posting`).
    fn docno(&self) -> DocNo;

    fn tf(&self) -> TermFreq;

    fn posting(&self) -> Posting {
        Posting::new(self.docno(), self.tf())
    }

    /// Offsets of the current posting. Decoded on demand; the slice is
    /// overwritten by the next advance.
    fn positions(&mut self) -> Result<&[u32]>;

    /// Copy the current offsets into a caller-owned scratch value,
    /// overwriting its previous contents.
    fn positions_into(&mut self, out: &mut TermPositions) -> Result<()> {
        let tf = self.tf();
        let positions = self.positions()?;
        out.set(positions, tf)
    }

    fn peek_next_docno(&self) -> Result<Option<DocNo>>;

    fn peek_next_tf(&self) -> Result<Option<TermFreq>>;

    fn number_of_postings(&self) -> u32;

    /// Postings consumed so far.
    fn postings_read(&self) -> u32;

    /// Rewind to before the first posting.
    fn reset(&mut self);
}

/// Drain `reader`, collecting each posting and, if requested, its offsets.
pub fn read_all(
    reader: &mut dyn PostingsReader,
    with_positions: bool,
) -> Result<Vec<(Posting, Vec<u32>)>> {
    let mut out = Vec::with_capacity(reader.number_of_postings() as usize);
    while let Some(posting) = reader.next_posting()? {
        let positions = if with_positions {
            reader.positions()?.to_vec()
        } else {
            Vec::new()
        };
        out.push((posting, positions));
    }
    Ok(out)
}
