//! PForDelta (patched frame-of-reference) postings list
//!
//! Docno gaps, term frequencies and position gaps are kept as three separate
//! streams, each cut into blocks of 128 values. Every stored value is the
//! original minus one (gaps, tfs and offsets are all >= 1). The last block of
//! a stream may be shorter and records its own length.
//!
//! Each block picks the bit width that minimizes its size; values that do
//! not fit keep their low bits in the main array and their high bits in an
//! exception list (NewPFD/OptPFD style).
//!
//! Block format:
//! ```text
//! bit_width: u8
//! len:       u8                (1..=128)
//! packed:    ceil(len * bit_width / 8) bytes
//! exceptions: u8 count, then (position: u8, high_bits: varint) per exception
//! ```
//!
//! Encoded payload: `total_positions: varint`, then all docno blocks, all tf
//! blocks and all position blocks. Block counts follow from the postings
//! count and `total_positions`.

use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use super::posting::{ListStats, Posting, PostingFormat, PostingsList, PostingsReader};
use super::posting_common::{BLOCK_SIZE, MAX_TF, read_vint, write_vint};
use super::term_positions::TermPositions;
use crate::error::{Error, Result, invariant};
use crate::structures::bitio::bits_needed;
use crate::{DocNo, TermFreq};

/// Maximum share of exceptions before a wider bit width is preferred
const MAX_EXCEPTIONS_RATIO: f32 = 0.10;

/// Smallest serialized block: bit width, length and exception count bytes
const MIN_BLOCK_BYTES: usize = 3;

/// Bits per exception entry besides its high bits (position byte)
const EXCEPTION_POSITION_BITS: usize = 8;

/// Find the bit width minimizing packed size plus exception overhead
fn find_optimal_bit_width(values: &[u32]) -> u8 {
    if values.is_empty() {
        return 0;
    }

    let n = values.len();
    let max_exceptions = ((n as f32) * MAX_EXCEPTIONS_RATIO).ceil() as usize;

    // bit_counts[b] = count of values needing exactly b bits
    let mut bit_counts = [0usize; 33];
    for &v in values {
        bit_counts[bits_needed(v) as usize] += 1;
    }

    let mut best_bits = 32u8;
    let mut best_total = usize::MAX;
    let mut fitting = 0usize;

    for b in 0..=32u8 {
        fitting += bit_counts[b as usize];
        let exceptions = n - fitting;
        if exceptions > max_exceptions {
            continue;
        }

        let main_bits = n * (b as usize);
        let exception_bits = exceptions * (EXCEPTION_POSITION_BITS + (32 - b as usize));
        let total = main_bits + exception_bits;

        if total < best_total {
            best_total = total;
            best_bits = b;
        }
    }

    best_bits
}

/// Pack the low `bit_width` bits of every value; values that do not fit
/// are returned as (position, high bits) exceptions.
fn pack_with_exceptions(values: &[u32], bit_width: u8) -> (Vec<u8>, Vec<(u8, u32)>) {
    let mask = (1u64 << bit_width) - 1;
    let bytes_needed = (values.len() * bit_width as usize).div_ceil(8);
    let mut packed = vec![0u8; bytes_needed];
    let mut exceptions = Vec::new();

    let mut bit_pos = 0usize;
    for (i, &value) in values.iter().enumerate() {
        let mut remaining_bits = bit_width as usize;
        let mut val = (value as u64) & mask;
        let mut byte_idx = bit_pos / 8;
        let mut bit_offset = bit_pos % 8;

        while remaining_bits > 0 {
            let bits_in_byte = (8 - bit_offset).min(remaining_bits);
            let byte_mask = ((1u64 << bits_in_byte) - 1) as u8;
            packed[byte_idx] |= ((val as u8) & byte_mask) << bit_offset;
            val >>= bits_in_byte;
            remaining_bits -= bits_in_byte;
            byte_idx += 1;
            bit_offset = 0;
        }
        bit_pos += bit_width as usize;

        if (value as u64) > mask {
            exceptions.push((i as u8, value >> bit_width));
        }
    }

    (packed, exceptions)
}

/// Inverse of [`pack_with_exceptions`]: value = (high_bits << b) | low_bits
fn unpack_with_exceptions(
    packed: &[u8],
    bit_width: u8,
    exceptions: &[(u8, u32)],
    count: usize,
    output: &mut [u32],
) {
    let width = bit_width as usize;
    let mut bit_pos = 0usize;

    for out in output[..count].iter_mut() {
        let mut value = 0u64;
        let mut got = 0usize;
        while got < width {
            let byte_idx = (bit_pos + got) / 8;
            let bit_offset = (bit_pos + got) % 8;
            let take = (8 - bit_offset).min(width - got);
            let bits = ((packed[byte_idx] >> bit_offset) as u64) & ((1u64 << take) - 1);
            value |= bits << got;
            got += take;
        }
        *out = value as u32;
        bit_pos += width;
    }

    for &(pos, high_bits) in exceptions {
        if (pos as usize) < count {
            output[pos as usize] |= high_bits << bit_width;
        }
    }
}

/// Up to 128 integers packed with one bit width plus exceptions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PForDeltaBlock {
    bit_width: u8,
    len: u8,
    packed: Vec<u8>,
    exceptions: Vec<(u8, u32)>,
}

impl PForDeltaBlock {
    pub fn pack(values: &[u32]) -> Result<Self> {
        if values.is_empty() || values.len() > BLOCK_SIZE {
            return Err(invariant(format!(
                "block holds 1..={} values, got {}",
                BLOCK_SIZE,
                values.len()
            )));
        }
        let bit_width = find_optimal_bit_width(values);
        let (packed, exceptions) = pack_with_exceptions(values, bit_width);
        Ok(Self {
            bit_width,
            len: values.len() as u8,
            packed,
            exceptions,
        })
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bit_width(&self) -> u8 {
        self.bit_width
    }

    pub fn num_exceptions(&self) -> usize {
        self.exceptions.len()
    }

    /// Decode into `output` (at least `len()` long); returns the count.
    pub fn unpack_into(&self, output: &mut [u32]) -> usize {
        let count = self.len();
        unpack_with_exceptions(
            &self.packed,
            self.bit_width,
            &self.exceptions,
            count,
            output,
        );
        count
    }

    pub fn unpack(&self) -> Vec<u32> {
        let mut output = vec![0u32; self.len()];
        self.unpack_into(&mut output);
        output
    }

    pub fn encoded_len(&self) -> usize {
        let exceptions: usize = self
            .exceptions
            .iter()
            .map(|&(_, high)| 1 + vint_len(high as u64))
            .sum();
        MIN_BLOCK_BYTES + self.packed.len() + exceptions
    }

    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u8(self.bit_width)?;
        writer.write_u8(self.len)?;
        writer.write_all(&self.packed)?;
        writer.write_u8(self.exceptions.len() as u8)?;
        for &(pos, high) in &self.exceptions {
            writer.write_u8(pos)?;
            write_vint(writer, high as u64)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self> {
        let bit_width = reader.read_u8()?;
        let len = reader.read_u8()?;
        if bit_width > 32 {
            return Err(Error::Corruption(format!("block bit width {bit_width}")));
        }
        if len == 0 || len as usize > BLOCK_SIZE {
            return Err(Error::Corruption(format!("block length {len}")));
        }

        let mut packed = vec![0u8; (len as usize * bit_width as usize).div_ceil(8)];
        reader.read_exact(&mut packed)?;

        let num_exceptions = reader.read_u8()?;
        if num_exceptions > len || (bit_width == 32 && num_exceptions > 0) {
            return Err(Error::Corruption(format!(
                "{num_exceptions} exceptions in a {len}-value block of width {bit_width}"
            )));
        }
        let mut exceptions = Vec::with_capacity(num_exceptions as usize);
        for _ in 0..num_exceptions {
            let pos = reader.read_u8()?;
            let high = read_vint(reader)?;
            if pos >= len || high > (u32::MAX >> bit_width) as u64 {
                return Err(Error::Corruption(format!(
                    "exception ({pos}, {high}) out of range"
                )));
            }
            exceptions.push((pos, high as u32));
        }

        Ok(Self {
            bit_width,
            len,
            packed,
            exceptions,
        })
    }
}

fn vint_len(value: u64) -> usize {
    (bits_needed_u64(value).max(1)).div_ceil(7)
}

fn bits_needed_u64(value: u64) -> usize {
    (64 - value.leading_zeros()) as usize
}

/// Move every complete block out of `pending` into `blocks`.
fn flush_full_blocks(pending: &mut Vec<u32>, blocks: &mut Vec<PForDeltaBlock>) -> Result<()> {
    let full = pending.len() / BLOCK_SIZE * BLOCK_SIZE;
    for chunk in pending[..full].chunks(BLOCK_SIZE) {
        blocks.push(PForDeltaBlock::pack(chunk)?);
    }
    pending.drain(..full);
    Ok(())
}

fn flush_all(pending: &mut Vec<u32>, blocks: &mut Vec<PForDeltaBlock>) -> Result<()> {
    for chunk in pending.chunks(BLOCK_SIZE) {
        blocks.push(PForDeltaBlock::pack(chunk)?);
    }
    pending.clear();
    Ok(())
}

/// Block-compressed postings list, positional or not
#[derive(Debug, Clone)]
pub struct PForDeltaPostingList {
    positional: bool,
    stats: ListStats,
    doc_blocks: Vec<PForDeltaBlock>,
    tf_blocks: Vec<PForDeltaBlock>,
    position_blocks: Vec<PForDeltaBlock>,
    total_positions: u64,
    pending_docs: Vec<u32>,
    pending_tfs: Vec<u32>,
    pending_positions: Vec<u32>,
    sealed: bool,
}

impl PForDeltaPostingList {
    pub fn new(positional: bool) -> Self {
        Self {
            positional,
            stats: ListStats::default(),
            doc_blocks: Vec::new(),
            tf_blocks: Vec::new(),
            position_blocks: Vec::new(),
            total_positions: 0,
            pending_docs: Vec::with_capacity(BLOCK_SIZE),
            pending_tfs: Vec::with_capacity(BLOCK_SIZE),
            pending_positions: Vec::new(),
            sealed: false,
        }
    }

    pub fn non_positional() -> Self {
        Self::new(false)
    }

    pub fn positional() -> Self {
        Self::new(true)
    }

    pub fn read_fields<R: Read + ?Sized>(reader: &mut R, positional: bool) -> Result<Self> {
        let (stats, payload) = ListStats::read_header(reader)?;
        let mut input = &payload[..];

        let total_positions = read_vint(&mut input)?;
        if !positional && total_positions > 0 {
            return Err(Error::Corruption(
                "non-positional list carries position blocks".to_string(),
            ));
        }
        let postings = stats.number_of_postings() as u64;

        let doc_blocks = read_stream(&mut input, postings)?;
        let tf_blocks = read_stream(&mut input, postings)?;
        if positional {
            let mut tfs = [0u32; BLOCK_SIZE];
            let mut tf_sum = 0u64;
            for block in &tf_blocks {
                let n = block.unpack_into(&mut tfs);
                tf_sum += tfs[..n].iter().map(|&tf| tf as u64 + 1).sum::<u64>();
            }
            if tf_sum != total_positions {
                return Err(Error::Corruption(format!(
                    "{total_positions} positions stored for a tf sum of {tf_sum}"
                )));
            }
        }
        let position_blocks = read_stream(&mut input, total_positions)?;
        if !input.is_empty() {
            return Err(Error::Corruption(format!(
                "{} trailing bytes after block streams",
                input.len()
            )));
        }

        Ok(Self {
            positional,
            stats,
            doc_blocks,
            tf_blocks,
            position_blocks,
            total_positions,
            pending_docs: Vec::new(),
            pending_tfs: Vec::new(),
            pending_positions: Vec::new(),
            sealed: true,
        })
    }

    pub fn create(bytes: &[u8], positional: bool) -> Result<Self> {
        let mut reader = bytes;
        Self::read_fields(&mut reader, positional)
    }

    pub fn num_blocks(&self) -> usize {
        self.doc_blocks.len()
    }

    pub fn num_position_blocks(&self) -> usize {
        self.position_blocks.len()
    }

    fn write_payload(&self, writer: &mut dyn Write) -> io::Result<()> {
        write_vint(writer, self.total_positions)?;
        for block in self
            .doc_blocks
            .iter()
            .chain(&self.tf_blocks)
            .chain(&self.position_blocks)
        {
            block.write_to(writer)?;
        }
        Ok(())
    }
}

/// Read the blocks of a stream holding `values` values in total.
fn read_stream(input: &mut &[u8], values: u64) -> Result<Vec<PForDeltaBlock>> {
    let num_blocks = values.div_ceil(BLOCK_SIZE as u64);
    // every block takes at least its three header bytes
    if num_blocks > (input.len() / MIN_BLOCK_BYTES) as u64 {
        return Err(Error::Corruption(format!(
            "{} blocks declared but only {} bytes remain",
            num_blocks,
            input.len()
        )));
    }
    let num_blocks = num_blocks as usize;
    let mut blocks = Vec::with_capacity(num_blocks);
    for i in 0..num_blocks {
        let block = PForDeltaBlock::read_from(input)?;
        let expected = if i + 1 < num_blocks {
            BLOCK_SIZE
        } else {
            (values - (num_blocks as u64 - 1) * BLOCK_SIZE as u64) as usize
        };
        if block.len() != expected {
            return Err(Error::Corruption(format!(
                "block {} holds {} values, expected {}",
                i,
                block.len(),
                expected
            )));
        }
        blocks.push(block);
    }
    Ok(blocks)
}

impl PostingsList for PForDeltaPostingList {
    fn format(&self) -> PostingFormat {
        PostingFormat::PForDelta
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
        if self.sealed {
            return Err(invariant("cannot add to a finished postings list"));
        }
        let value = self.stats.check_add(docno, tf, positions, self.positional)?;

        self.pending_docs.push(value - 1);
        self.pending_tfs.push(tf as u32 - 1);
        if self.positional
            && let Some(positions) = positions
        {
            let offsets = positions.positions();
            self.pending_positions.push(offsets[0] - 1);
            for w in offsets.windows(2) {
                self.pending_positions.push(w[1] - w[0] - 1);
            }
            self.total_positions += offsets.len() as u64;
            flush_full_blocks(&mut self.pending_positions, &mut self.position_blocks)?;
        }
        flush_full_blocks(&mut self.pending_docs, &mut self.doc_blocks)?;
        flush_full_blocks(&mut self.pending_tfs, &mut self.tf_blocks)?;

        self.stats.record_add(docno);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.sealed {
            return Ok(());
        }
        self.stats.check_complete()?;
        flush_all(&mut self.pending_docs, &mut self.doc_blocks)?;
        flush_all(&mut self.pending_tfs, &mut self.tf_blocks)?;
        flush_all(&mut self.pending_positions, &mut self.position_blocks)?;
        self.sealed = true;
        log::debug!(
            "sealed pfor-delta postings list: {} postings in {} blocks, {} position blocks",
            self.stats.postings_added(),
            self.doc_blocks.len(),
            self.position_blocks.len()
        );
        Ok(())
    }

    fn write(&mut self, writer: &mut dyn Write) -> Result<()> {
        self.finish()?;
        let mut payload = Vec::with_capacity(self.encoded_len());
        self.write_payload(&mut payload)?;
        self.stats.write_header(writer, payload.len())?;
        writer.write_all(&payload)?;
        Ok(())
    }

    fn encoded_len(&self) -> usize {
        let blocks: usize = self
            .doc_blocks
            .iter()
            .chain(&self.tf_blocks)
            .chain(&self.position_blocks)
            .map(PForDeltaBlock::encoded_len)
            .sum();
        vint_len(self.total_positions) + blocks
    }

    fn postings_reader(&self) -> Result<Box<dyn PostingsReader + '_>> {
        Ok(Box::new(PForDeltaPostingsReader::new(self)?))
    }

    fn clear(&mut self) {
        self.stats.reset();
        self.doc_blocks.clear();
        self.tf_blocks.clear();
        self.position_blocks.clear();
        self.total_positions = 0;
        self.pending_docs.clear();
        self.pending_tfs.clear();
        self.pending_positions.clear();
        self.sealed = false;
    }
}

/// Block-at-a-time decoder over a [`PForDeltaPostingList`]
pub struct PForDeltaPostingsReader<'a> {
    list: &'a PForDeltaPostingList,
    postings_read: u32,
    docno: DocNo,
    tf: TermFreq,
    /// Pre-allocated buffers for the current docno/tf block
    block_docs: Vec<u32>,
    block_tfs: Vec<u32>,
    /// Stream index of the current posting's first position
    position_start: u64,
    next_position_start: u64,
    /// Decoded position block, reused while a span stays inside it
    position_block: Option<usize>,
    position_scratch: Vec<u32>,
    positions: Vec<u32>,
    positions_decoded: bool,
}

impl<'a> PForDeltaPostingsReader<'a> {
    pub fn new(list: &'a PForDeltaPostingList) -> Result<Self> {
        if !list.sealed {
            return Err(invariant("postings list must be finished before reading"));
        }
        Ok(Self {
            list,
            postings_read: 0,
            docno: 0,
            tf: 0,
            block_docs: vec![0u32; BLOCK_SIZE],
            block_tfs: vec![0u32; BLOCK_SIZE],
            position_start: 0,
            next_position_start: 0,
            position_block: None,
            position_scratch: vec![0u32; BLOCK_SIZE],
            positions: Vec::new(),
            positions_decoded: false,
        })
    }

    fn block(blocks: &[PForDeltaBlock], index: usize) -> Result<&PForDeltaBlock> {
        blocks
            .get(index)
            .ok_or_else(|| Error::Corruption(format!("missing block {index}")))
    }

    /// Turn stored (value - 1) entries into the posting after the current one.
    fn decode_posting(&self, stored_gap: u32, stored_tf: u32) -> Result<Posting> {
        let gap = stored_gap
            .checked_add(1)
            .ok_or_else(|| Error::Corruption("docno gap overflow".to_string()))?;
        let docno = if self.postings_read == 0 {
            gap
        } else {
            self.docno
                .checked_add(gap)
                .ok_or_else(|| Error::Corruption(format!("docno overflow after {}", self.docno)))?
        };
        if stored_tf >= MAX_TF as u32 {
            return Err(Error::Corruption(format!(
                "decoded tf {} exceeds {}",
                stored_tf as u64 + 1,
                MAX_TF
            )));
        }
        Ok(Posting::new(docno, stored_tf as TermFreq + 1))
    }

    fn peek_next(&self) -> Result<Option<Posting>> {
        if !self.has_more_postings() {
            return Ok(None);
        }
        let index = self.postings_read as usize;
        let (block, offset) = (index / BLOCK_SIZE, index % BLOCK_SIZE);
        if offset != 0 {
            return self
                .decode_posting(self.block_docs[offset], self.block_tfs[offset])
                .map(Some);
        }
        let mut docs = [0u32; BLOCK_SIZE];
        let mut tfs = [0u32; BLOCK_SIZE];
        Self::block(&self.list.doc_blocks, block)?.unpack_into(&mut docs);
        Self::block(&self.list.tf_blocks, block)?.unpack_into(&mut tfs);
        self.decode_posting(docs[0], tfs[0]).map(Some)
    }
}

impl PostingsReader for PForDeltaPostingsReader<'_> {
    fn next_posting(&mut self) -> Result<Option<Posting>> {
        if !self.has_more_postings() {
            return Ok(None);
        }
        let index = self.postings_read as usize;
        let (block, offset) = (index / BLOCK_SIZE, index % BLOCK_SIZE);
        if offset == 0 {
            Self::block(&self.list.doc_blocks, block)?.unpack_into(&mut self.block_docs);
            Self::block(&self.list.tf_blocks, block)?.unpack_into(&mut self.block_tfs);
        }
        let posting = self.decode_posting(self.block_docs[offset], self.block_tfs[offset])?;

        self.docno = posting.docno;
        self.tf = posting.tf;
        self.postings_read += 1;
        if self.list.positional {
            self.position_start = self.next_position_start;
            self.next_position_start += posting.tf as u64;
        }
        self.positions_decoded = false;
        Ok(Some(posting))
    }

    fn has_more_postings(&self) -> bool {
        self.postings_read < self.list.stats.number_of_postings()
    }

    fn docno(&self) -> DocNo {
        self.docno
    }

    fn tf(&self) -> TermFreq {
        self.tf
    }

    fn positions(&mut self) -> Result<&[u32]> {
        if !self.list.positional {
            return Err(Error::Unsupported(
                "positions of a non-positional postings list",
            ));
        }
        if self.postings_read == 0 {
            return Err(invariant("no current posting"));
        }
        if !self.positions_decoded {
            self.positions.clear();
            let mut position = 0u32;
            for i in 0..self.tf as u64 {
                let index = self.position_start + i;
                let block = (index / BLOCK_SIZE as u64) as usize;
                let offset = (index % BLOCK_SIZE as u64) as usize;
                // spans may straddle a block boundary
                if self.position_block != Some(block) {
                    Self::block(&self.list.position_blocks, block)?
                        .unpack_into(&mut self.position_scratch);
                    self.position_block = Some(block);
                }
                let base = if i == 0 { 0 } else { position };
                position = self.position_scratch[offset]
                    .checked_add(1)
                    .and_then(|v| base.checked_add(v))
                    .ok_or_else(|| Error::Corruption("position overflow".to_string()))?;
                self.positions.push(position);
            }
            self.positions_decoded = true;
        }
        Ok(&self.positions)
    }

    fn peek_next_docno(&self) -> Result<Option<DocNo>> {
        Ok(self.peek_next()?.map(|p| p.docno))
    }

    fn peek_next_tf(&self) -> Result<Option<TermFreq>> {
        Ok(self.peek_next()?.map(|p| p.tf))
    }

    fn number_of_postings(&self) -> u32 {
        self.list.stats.number_of_postings()
    }

    fn postings_read(&self) -> u32 {
        self.postings_read
    }

    fn reset(&mut self) {
        self.postings_read = 0;
        self.docno = 0;
        self.tf = 0;
        self.position_start = 0;
        self.next_position_start = 0;
        self.positions.clear();
        self.positions_decoded = false;
    }
}
