//! Proximity (window) matching over several term readers
//!
//! A [`ProximityPostingsReader`] drives one child reader per term. Each step
//! advances the child at the smallest docno and reports the largest docno
//! across children; when every child sits on the same document, the merged
//! positions of that document are scanned by a [`Window`] and the number of
//! matches becomes the reported tf (0 when children are not aligned).
//!
//! An ordered match is a run of occurrences of terms 0, 1, 2, ... in turn in
//! which every step between consecutive occurrences is shorter than the
//! window size. An unordered match covers every term within a span
//! `last - first + 1` of at most the window size.

use crate::error::{Error, Result};
use crate::structures::{MAX_TF, Posting, PostingsReader};
use crate::{DocNo, TermFreq};

/// Counts matches in one document's merged occurrences.
///
/// `occurrences` holds `(position, term)` pairs sorted by position, with
/// terms numbered `0..num_terms` in query order.
pub trait Window {
    fn size(&self) -> u32;

    /// Number of matches, stopping once `limit` is reached.
    fn count_matches(&self, occurrences: &[(u32, usize)], num_terms: usize, limit: u32) -> u32;
}

fn check_size(size: u32) -> Result<()> {
    if size == 0 {
        return Err(Error::Config(
            "proximity window size must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Terms must appear in query order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderedWindow {
    size: u32,
}

impl OrderedWindow {
    pub fn new(size: u32) -> Result<Self> {
        check_size(size)?;
        Ok(Self { size })
    }
}

impl Window for OrderedWindow {
    fn size(&self) -> u32 {
        self.size
    }

    fn count_matches(&self, occurrences: &[(u32, usize)], num_terms: usize, limit: u32) -> u32 {
        let mut matches = 0u32;
        for (i, &(start, term)) in occurrences.iter().enumerate() {
            if term != 0 {
                continue;
            }
            if num_terms == 1 {
                matches += 1;
            } else {
                let mut expected = 1;
                let mut prev = start;
                for &(pos, term) in &occurrences[i + 1..] {
                    if pos - prev >= self.size || term != expected {
                        break;
                    }
                    prev = pos;
                    expected += 1;
                    if expected == num_terms {
                        matches += 1;
                        break;
                    }
                }
            }
            if matches >= limit {
                return limit;
            }
        }
        matches
    }
}

/// Terms may appear in any order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnorderedWindow {
    size: u32,
}

impl UnorderedWindow {
    pub fn new(size: u32) -> Result<Self> {
        check_size(size)?;
        Ok(Self { size })
    }
}

impl Window for UnorderedWindow {
    fn size(&self) -> u32 {
        self.size
    }

    fn count_matches(&self, occurrences: &[(u32, usize)], num_terms: usize, limit: u32) -> u32 {
        let mut seen = vec![false; num_terms];
        let mut matches = 0u32;
        for (i, &(start, term)) in occurrences.iter().enumerate() {
            seen.fill(false);
            seen[term] = true;
            let mut distinct = 1;
            if distinct < num_terms {
                for &(pos, term) in &occurrences[i + 1..] {
                    if pos - start >= self.size {
                        break;
                    }
                    if !seen[term] {
                        seen[term] = true;
                        distinct += 1;
                        if distinct == num_terms {
                            break;
                        }
                    }
                }
            }
            if distinct == num_terms {
                matches += 1;
                if matches >= limit {
                    return limit;
                }
            }
        }
        matches
    }
}

/// Virtual reader reporting per-document window match counts
pub struct ProximityPostingsReader<'a, W: Window> {
    readers: Vec<Box<dyn PostingsReader + 'a>>,
    window: W,
    started: bool,
    docno: DocNo,
    tf: TermFreq,
    steps: u32,
    /// Merged (position, term) occurrences of the current document
    occurrences: Vec<(u32, usize)>,
}

impl<'a> ProximityPostingsReader<'a, OrderedWindow> {
    pub fn ordered(readers: Vec<Box<dyn PostingsReader + 'a>>, size: u32) -> Result<Self> {
        Self::new(readers, OrderedWindow::new(size)?)
    }
}

impl<'a> ProximityPostingsReader<'a, UnorderedWindow> {
    pub fn unordered(readers: Vec<Box<dyn PostingsReader + 'a>>, size: u32) -> Result<Self> {
        Self::new(readers, UnorderedWindow::new(size)?)
    }
}

impl<'a, W: Window> ProximityPostingsReader<'a, W> {
    /// One reader per query term, in query order. Children must be positional
    /// and positioned before their first posting.
    pub fn new(readers: Vec<Box<dyn PostingsReader + 'a>>, window: W) -> Result<Self> {
        if readers.is_empty() {
            return Err(Error::Config(
                "proximity reader needs at least one term".to_string(),
            ));
        }
        Ok(Self {
            readers,
            window,
            started: false,
            docno: 0,
            tf: 0,
            steps: 0,
            occurrences: Vec::new(),
        })
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn num_terms(&self) -> usize {
        self.readers.len()
    }

    fn min_child(&self) -> usize {
        let mut min = 0;
        for (i, reader) in self.readers.iter().enumerate().skip(1) {
            if reader.docno() < self.readers[min].docno() {
                min = i;
            }
        }
        min
    }

    fn aligned(&self) -> bool {
        self.readers.iter().all(|r| r.docno() == self.docno)
    }

    fn count_matches(&mut self) -> Result<TermFreq> {
        self.occurrences.clear();
        for (term, reader) in self.readers.iter_mut().enumerate() {
            self.occurrences
                .extend(reader.positions()?.iter().map(|&pos| (pos, term)));
        }
        self.occurrences.sort_unstable();

        let matches =
            self.window
                .count_matches(&self.occurrences, self.readers.len(), MAX_TF as u32);
        log::trace!(
            "docno {}: {} occurrences, {} window matches",
            self.docno,
            self.occurrences.len(),
            matches
        );
        Ok(matches.min(MAX_TF as u32) as TermFreq)
    }

    /// Advance to the next document with at least one window match.
    pub fn next_match(&mut self) -> Result<Option<Posting>> {
        while let Some(posting) = self.next_posting()? {
            if posting.tf > 0 {
                return Ok(Some(posting));
            }
        }
        Ok(None)
    }
}

impl<W: Window> PostingsReader for ProximityPostingsReader<'_, W> {
    fn next_posting(&mut self) -> Result<Option<Posting>> {
        if !self.has_more_postings() {
            return Ok(None);
        }
        if self.started {
            let min = self.min_child();
            self.readers[min].next_posting()?;
        } else {
            for reader in &mut self.readers {
                reader.next_posting()?;
            }
            self.started = true;
        }

        self.docno = self.readers.iter().map(|r| r.docno()).max().unwrap_or(0);
        self.tf = if self.aligned() {
            self.count_matches()?
        } else {
            0
        };
        self.steps += 1;
        Ok(Some(Posting::new(self.docno, self.tf)))
    }

    /// Before the first step every child must be non-empty; afterwards the
    /// child at the smallest docno must be able to advance.
    fn has_more_postings(&self) -> bool {
        if self.started {
            self.readers[self.min_child()].has_more_postings()
        } else {
            self.readers.iter().all(|r| r.has_more_postings())
        }
    }

    fn docno(&self) -> DocNo {
        self.docno
    }

    /// Window matches in the current document.
    fn tf(&self) -> TermFreq {
        self.tf
    }

    fn positions(&mut self) -> Result<&[u32]> {
        Err(Error::Unsupported("positions of a proximity reader"))
    }

    fn peek_next_docno(&self) -> Result<Option<DocNo>> {
        Err(Error::Unsupported("lookahead on a proximity reader"))
    }

    fn peek_next_tf(&self) -> Result<Option<TermFreq>> {
        Err(Error::Unsupported("lookahead on a proximity reader"))
    }

    /// Upper bound on matching documents.
    fn number_of_postings(&self) -> u32 {
        self.readers
            .iter()
            .map(|r| r.number_of_postings())
            .min()
            .unwrap_or(0)
    }

    fn postings_read(&self) -> u32 {
        self.steps
    }

    fn reset(&mut self) {
        for reader in &mut self.readers {
            reader.reset();
        }
        self.started = false;
        self.docno = 0;
        self.tf = 0;
        self.steps = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PostingsConfig;
    use crate::structures::{PostingFormat, PostingsList, TermPositions};

    fn term(format: PostingFormat, postings: &[(u32, Vec<u32>)]) -> Box<dyn PostingsList> {
        let mut list = PostingsConfig::new(format, true).new_postings_list();
        list.set_collection_document_count(100);
        list.set_number_of_postings(postings.len() as u32);
        for (docno, positions) in postings {
            let tp = TermPositions::from_positions(positions).unwrap();
            list.add(*docno, tp.tf(), Some(&tp)).unwrap();
        }
        list.finish().unwrap();
        list
    }

    fn readers<'a>(lists: &'a [Box<dyn PostingsList>]) -> Vec<Box<dyn PostingsReader + 'a>> {
        lists.iter().map(|l| l.postings_reader().unwrap()).collect()
    }

    fn matches<W: Window>(reader: &mut ProximityPostingsReader<'_, W>) -> Vec<(u32, u16)> {
        let mut out = Vec::new();
        while let Some(p) = reader.next_match().unwrap() {
            out.push((p.docno, p.tf));
        }
        out
    }

    #[test]
    fn test_ordered_window() {
        let lists = vec![
            term(PostingFormat::Golomb, &[(7, vec![10, 50])]),
            term(PostingFormat::Golomb, &[(7, vec![11, 52])]),
        ];
        let mut reader = ProximityPostingsReader::ordered(readers(&lists), 2).unwrap();
        assert_eq!(matches(&mut reader), vec![(7, 1)]);
    }

    #[test]
    fn test_reversed_terms_only_match_unordered() {
        let lists = vec![
            term(PostingFormat::Golomb, &[(7, vec![11, 52])]),
            term(PostingFormat::Golomb, &[(7, vec![10, 50])]),
        ];
        let mut ordered = ProximityPostingsReader::ordered(readers(&lists), 2).unwrap();
        assert_eq!(ordered.next_posting().unwrap(), Some(Posting::new(7, 0)));
        assert_eq!(ordered.next_posting().unwrap(), None);

        let mut unordered = ProximityPostingsReader::unordered(readers(&lists), 2).unwrap();
        assert_eq!(matches(&mut unordered), vec![(7, 1)]);
    }

    #[test]
    fn test_alignment_across_documents() {
        let lists = vec![
            term(
                PostingFormat::Golomb,
                &[(1, vec![1]), (3, vec![4]), (7, vec![2, 9])],
            ),
            term(
                PostingFormat::PForDelta,
                &[(3, vec![5]), (7, vec![3, 10]), (9, vec![1])],
            ),
        ];
        let mut reader = ProximityPostingsReader::ordered(readers(&lists), 2).unwrap();
        assert_eq!(matches(&mut reader), vec![(3, 1), (7, 2)]);
        assert!(!reader.has_more_postings());

        reader.reset();
        assert_eq!(reader.postings_read(), 0);
        assert_eq!(matches(&mut reader), vec![(3, 1), (7, 2)]);
    }

    #[test]
    fn test_three_terms_in_order() {
        let lists = vec![
            term(PostingFormat::Golomb, &[(4, vec![1, 20])]),
            term(PostingFormat::Golomb, &[(4, vec![2, 22])]),
            term(PostingFormat::Golomb, &[(4, vec![3, 30])]),
        ];
        let mut reader = ProximityPostingsReader::ordered(readers(&lists), 3).unwrap();
        assert_eq!(matches(&mut reader), vec![(4, 1)]);

        let mut wide = ProximityPostingsReader::ordered(readers(&lists), 11).unwrap();
        assert_eq!(matches(&mut wide), vec![(4, 2)]);
    }

    #[test]
    fn test_match_count_saturates() {
        let a: Vec<u32> = (0..20_000).map(|i| 2 * i + 1).collect();
        let b: Vec<u32> = (0..20_000).map(|i| 2 * i + 2).collect();
        let lists = vec![
            term(PostingFormat::PForDelta, &[(1, a)]),
            term(PostingFormat::PForDelta, &[(1, b)]),
        ];
        let mut reader = ProximityPostingsReader::unordered(readers(&lists), 2).unwrap();
        assert_eq!(matches(&mut reader), vec![(1, MAX_TF)]);
    }

    #[test]
    fn test_ordered_window_bounds_each_step() {
        let ordered = OrderedWindow::new(2).unwrap();
        assert_eq!(ordered.count_matches(&[(1, 0), (2, 1), (3, 2)], 3, 100), 1);
        // second step is too long even though the first fits
        assert_eq!(ordered.count_matches(&[(1, 0), (2, 1), (4, 2)], 3, 100), 0);

        // the span 1..=3 exceeds the window, which only the unordered scan measures
        let unordered = UnorderedWindow::new(2).unwrap();
        assert_eq!(unordered.count_matches(&[(1, 0), (2, 1), (3, 2)], 3, 100), 0);

        let lists = vec![
            term(PostingFormat::Golomb, &[(8, vec![5, 40])]),
            term(PostingFormat::PForDelta, &[(8, vec![6, 42])]),
            term(PostingFormat::Golomb, &[(8, vec![7, 44])]),
        ];
        let mut reader = ProximityPostingsReader::ordered(readers(&lists), 2).unwrap();
        assert_eq!(matches(&mut reader), vec![(8, 1)]);
        let mut wider = ProximityPostingsReader::ordered(readers(&lists), 3).unwrap();
        assert_eq!(matches(&mut wider), vec![(8, 2)]);
    }

    #[test]
    fn test_window_counts_directly() {
        let occurrences = [(1, 0), (2, 1), (4, 0), (5, 0), (6, 1)];
        let ordered = OrderedWindow::new(2).unwrap();
        assert_eq!(ordered.count_matches(&occurrences, 2, 100), 2);
        assert_eq!(ordered.count_matches(&occurrences, 2, 1), 1);

        let unordered = UnorderedWindow::new(2).unwrap();
        assert_eq!(unordered.count_matches(&occurrences, 2, 100), 2);
        // a single term matches at every occurrence
        assert_eq!(unordered.count_matches(&[(3, 0), (9, 0)], 1, 100), 2);
    }

    #[test]
    fn test_unsupported_and_invalid() {
        let lists = vec![term(PostingFormat::Golomb, &[(2, vec![1])])];
        let mut reader = ProximityPostingsReader::ordered(readers(&lists), 4).unwrap();
        assert!(matches!(reader.positions(), Err(Error::Unsupported(_))));
        assert!(matches!(reader.peek_next_docno(), Err(Error::Unsupported(_))));
        assert!(matches!(reader.peek_next_tf(), Err(Error::Unsupported(_))));

        assert!(ProximityPostingsReader::ordered(readers(&lists), 0).is_err());
        assert!(ProximityPostingsReader::unordered(Vec::new(), 3).is_err());
    }

    #[test]
    fn test_non_positional_child_fails_on_match() {
        let mut list = PostingsConfig::new(PostingFormat::Golomb, false).new_postings_list();
        list.set_collection_document_count(100);
        list.set_number_of_postings(1);
        list.add(5, 2, None).unwrap();
        list.finish().unwrap();
        let lists = vec![list];

        let mut reader = ProximityPostingsReader::unordered(readers(&lists), 4).unwrap();
        assert!(matches!(
            reader.next_posting(),
            Err(Error::Unsupported(_))
        ));
    }
}
