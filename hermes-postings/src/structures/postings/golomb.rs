//! Bit-level postings list: Golomb-Rice d-gaps, Gamma tf, Gamma positions
//!
//! Encoded payload (one bit stream, padded to a byte at the end):
//!
//! ```text
//! first posting:  docno (32-bit binary)  gamma(tf)  [positions]
//! next postings:  golomb(d-gap, m)       gamma(tf)  [positions]
//! ```
//!
//! `m = ceil(0.69 * N / number_of_postings)` is never stored; readers derive
//! it from the collection size and the postings count, so the collection size
//! has to be set on a list loaded from bytes before it can be read.
//! Positions are present only in positional lists (see [`TermPositions`]).

use std::io::{Read, Write};

use super::posting::{ListStats, Posting, PostingFormat, PostingsList, PostingsReader};
use super::posting_common::{MAX_TF, golomb_param};
use super::term_positions::TermPositions;
use crate::error::{Error, Result, invariant};
use crate::structures::bitio::{BitReader, BitWriter};
use crate::{DocNo, TermFreq};

#[derive(Debug, Clone)]
enum Encoded {
    Building(BitWriter),
    Sealed(Vec<u8>),
}

/// Golomb/Gamma coded postings list, positional or not
#[derive(Debug, Clone)]
pub struct GolombPostingList {
    positional: bool,
    stats: ListStats,
    encoded: Encoded,
}

impl GolombPostingList {
    pub fn new(positional: bool) -> Self {
        Self {
            positional,
            stats: ListStats::default(),
            encoded: Encoded::Building(BitWriter::new()),
        }
    }

    pub fn non_positional() -> Self {
        Self::new(false)
    }

    pub fn positional() -> Self {
        Self::new(true)
    }

    /// Reconstruct a persisted list. The collection size is not part of the
    /// persisted layout and has to be set before reading.
    pub fn read_fields<R: Read + ?Sized>(reader: &mut R, positional: bool) -> Result<Self> {
        let (stats, bytes) = ListStats::read_header(reader)?;
        Ok(Self {
            positional,
            stats,
            encoded: Encoded::Sealed(bytes),
        })
    }

    pub fn create(bytes: &[u8], positional: bool) -> Result<Self> {
        let mut reader = bytes;
        Self::read_fields(&mut reader, positional)
    }

    /// Golomb parameter for the current collection size and postings count.
    pub fn golomb_param(&self) -> u32 {
        golomb_param(
            self.stats.collection_document_count(),
            self.stats.number_of_postings(),
        )
    }

    /// Encoded bytes; empty until the list is finished.
    pub fn raw_bytes(&self) -> &[u8] {
        match &self.encoded {
            Encoded::Sealed(bytes) => bytes,
            Encoded::Building(_) => &[],
        }
    }

    /// Bit position the next posting will be written at.
    pub fn bit_position(&self) -> u64 {
        match &self.encoded {
            Encoded::Building(writer) => writer.bit_position(),
            Encoded::Sealed(bytes) => bytes.len() as u64 * 8,
        }
    }
}

impl PostingsList for GolombPostingList {
    fn format(&self) -> PostingFormat {
        PostingFormat::Golomb
    }

    fn is_positional(&self) -> bool {
        self.positional
    }

    fn stats(&self) -> &ListStats {
        &self.stats
    }

    fn stats_mut(&mut self) -> &mut ListStats {
        &mut self.stats
    }

    fn add(
        &mut self,
        docno: DocNo,
        tf: TermFreq,
        positions: Option<&TermPositions>,
    ) -> Result<()> {
        let golomb = self.golomb_param();
        let Encoded::Building(writer) = &mut self.encoded else {
            return Err(invariant("cannot add to a finished postings list"));
        };
        let value = self.stats.check_add(docno, tf, positions, self.positional)?;

        if self.stats.postings_added() == 0 {
            writer.write_binary(32, value)?;
        } else {
            writer.write_golomb(value, golomb)?;
        }
        writer.write_gamma(tf as u32)?;
        if self.positional
            && let Some(positions) = positions
        {
            positions.encode(writer)?;
        }

        self.stats.record_add(docno);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Encoded::Building(writer) = &mut self.encoded {
            self.stats.check_complete()?;
            let bytes = std::mem::take(writer).into_bytes();
            log::debug!(
                "sealed golomb postings list: {} postings, {} bytes, m={}",
                self.stats.postings_added(),
                bytes.len(),
                self.golomb_param()
            );
            self.encoded = Encoded::Sealed(bytes);
        }
        Ok(())
    }

    fn write(&mut self, writer: &mut dyn Write) -> Result<()> {
        self.finish()?;
        let bytes = self.raw_bytes();
        self.stats.write_header(writer, bytes.len())?;
        writer.write_all(bytes)?;
        Ok(())
    }

    fn encoded_len(&self) -> usize {
        self.raw_bytes().len()
    }

    fn postings_reader(&self) -> Result<Box<dyn PostingsReader + '_>> {
        Ok(Box::new(GolombPostingsReader::new(self)?))
    }

    fn clear(&mut self) {
        self.stats.reset();
        self.encoded = Encoded::Building(BitWriter::new());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PositionsState {
    /// No posting read yet, or the list has no positions
    Absent,
    /// Positions of the current posting are still in the stream
    Pending,
    /// Positions of the current posting were decoded into the scratch
    Decoded,
}

/// Sequential decoder over a [`GolombPostingList`]
pub struct GolombPostingsReader<'a> {
    data: &'a [u8],
    reader: BitReader<'a>,
    positional: bool,
    number_of_postings: u32,
    golomb_param: u32,
    postings_read: u32,
    docno: DocNo,
    tf: TermFreq,
    positions: TermPositions,
    positions_state: PositionsState,
}

impl<'a> GolombPostingsReader<'a> {
    pub fn new(list: &'a GolombPostingList) -> Result<Self> {
        let Encoded::Sealed(bytes) = &list.encoded else {
            return Err(invariant("postings list must be finished before reading"));
        };
        let data = bytes.as_slice();
        let number_of_postings = list.stats.number_of_postings();
        if number_of_postings > 1 && list.stats.collection_document_count() == 0 {
            return Err(invariant(
                "collection_document_count must be set before reading",
            ));
        }
        Ok(Self {
            data,
            reader: BitReader::new(data),
            positional: list.positional,
            number_of_postings,
            golomb_param: list.golomb_param(),
            postings_read: 0,
            docno: 0,
            tf: 0,
            positions: TermPositions::new(),
            positions_state: PositionsState::Absent,
        })
    }

    pub fn golomb_param(&self) -> u32 {
        self.golomb_param
    }

    /// Decode the posting after the current one from `reader`.
    fn decode_next(&self, reader: &mut BitReader<'a>) -> Result<Posting> {
        if self.positions_state == PositionsState::Pending {
            TermPositions::skip(reader, self.tf)?;
        }
        let docno = if self.postings_read == 0 {
            reader.read_binary(32)?
        } else {
            let gap = reader.read_golomb(self.golomb_param)?;
            self.docno
                .checked_add(gap)
                .ok_or_else(|| Error::Corruption(format!("docno overflow after {}", self.docno)))?
        };
        let tf = reader.read_gamma()?;
        if tf > MAX_TF as u32 {
            return Err(Error::Corruption(format!("decoded tf {tf} exceeds {MAX_TF}")));
        }
        Ok(Posting::new(docno, tf as TermFreq))
    }
}

impl PostingsReader for GolombPostingsReader<'_> {
    fn next_posting(&mut self) -> Result<Option<Posting>> {
        if !self.has_more_postings() {
            return Ok(None);
        }
        let mut reader = self.reader;
        let posting = self.decode_next(&mut reader)?;
        self.reader = reader;

        self.docno = posting.docno;
        self.tf = posting.tf;
        self.postings_read += 1;
        self.positions_state = if self.positional {
            PositionsState::Pending
        } else {
            PositionsState::Absent
        };
        Ok(Some(posting))
    }

    fn has_more_postings(&self) -> bool {
        self.postings_read < self.number_of_postings
    }

    fn docno(&self) -> DocNo {
        self.docno
    }

    fn tf(&self) -> TermFreq {
        self.tf
    }

    fn positions(&mut self) -> Result<&[u32]> {
        if !self.positional {
            return Err(Error::Unsupported(
                "positions of a non-positional postings list",
            ));
        }
        match self.positions_state {
            PositionsState::Absent => Err(invariant("no current posting")),
            PositionsState::Pending => {
                self.positions.decode_into(&mut self.reader, self.tf)?;
                self.positions_state = PositionsState::Decoded;
                Ok(self.positions.positions())
            }
            PositionsState::Decoded => Ok(self.positions.positions()),
        }
    }

    fn peek_next_docno(&self) -> Result<Option<DocNo>> {
        if !self.has_more_postings() {
            return Ok(None);
        }
        let mut lookahead = self.reader;
        Ok(Some(self.decode_next(&mut lookahead)?.docno))
    }

    fn peek_next_tf(&self) -> Result<Option<TermFreq>> {
        if !self.has_more_postings() {
            return Ok(None);
        }
        let mut lookahead = self.reader;
        Ok(Some(self.decode_next(&mut lookahead)?.tf))
    }

    fn number_of_postings(&self) -> u32 {
        self.number_of_postings
    }

    fn postings_read(&self) -> u32 {
        self.postings_read
    }

    fn reset(&mut self) {
        self.reader = BitReader::new(self.data);
        self.postings_read = 0;
        self.docno = 0;
        self.tf = 0;
        self.positions.clear();
        self.positions_state = PositionsState::Absent;
    }
}
