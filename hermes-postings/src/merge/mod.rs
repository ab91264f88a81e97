//! Order-preserving merge of postings lists
//!
//! Inputs are finished lists over disjoint document partitions of one
//! collection, so every docno appears in at most one input. The output
//! receives the union in docno order, with positions when it is positional.
//!
//! Two inputs are merged by a plain two-cursor walk; more use a min-heap
//! keyed by (current docno, source index).

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::config::PostingsConfig;
use crate::error::{Result, invariant};
use crate::structures::{Posting, PostingsList, PostingsReader, TermPositions};

/// Heap entry for the k-way merge
#[derive(Debug, Clone, Copy)]
struct MergeEntry {
    docno: u32,
    source: usize,
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.docno == other.docno && self.source == other.source
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (BinaryHeap is max-heap by default)
        other
            .docno
            .cmp(&self.docno)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Copies postings into the output list and tracks the term statistics
struct MergeSink<'a> {
    out: &'a mut dyn PostingsList,
    positional: bool,
    scratch: TermPositions,
    emitted: u32,
    cf: u64,
}

impl<'a> MergeSink<'a> {
    /// Validate the inputs and configure `out` for their union.
    fn open(lists: &[&dyn PostingsList], out: &'a mut dyn PostingsList) -> Result<Self> {
        if out.size() > 0 {
            return Err(invariant("merge output must be an empty list"));
        }
        let collection = lists
            .first()
            .map(|l| l.collection_document_count())
            .unwrap_or(0);
        if let Some(other) = lists
            .iter()
            .find(|l| l.collection_document_count() != collection)
        {
            return Err(invariant(format!(
                "cannot merge lists over different collections ({} vs {} documents)",
                collection,
                other.collection_document_count()
            )));
        }

        let positional = out.is_positional();
        if positional && lists.iter().any(|l| !l.is_positional()) {
            return Err(invariant(
                "positional output requires positional inputs",
            ));
        }

        let total: u64 = lists.iter().map(|l| l.number_of_postings() as u64).sum();
        let total = u32::try_from(total)
            .map_err(|_| invariant(format!("{total} postings overflow a single list")))?;

        out.set_collection_document_count(collection);
        out.set_number_of_postings(total);
        Ok(Self {
            out,
            positional,
            scratch: TermPositions::new(),
            emitted: 0,
            cf: 0,
        })
    }

    fn emit(&mut self, reader: &mut dyn PostingsReader, posting: Posting) -> Result<()> {
        if self.positional {
            reader.positions_into(&mut self.scratch)?;
            self.out.add(posting.docno, posting.tf, Some(&self.scratch))?;
        } else {
            self.out.add(posting.docno, posting.tf, None)?;
        }
        self.emitted += 1;
        self.cf += posting.tf as u64;
        Ok(())
    }

    /// Record df/cf of the union and seal the output.
    fn close(self, sources: usize) -> Result<()> {
        self.out.set_df(self.emitted);
        self.out.set_cf(self.cf);
        self.out.finish()?;
        log::debug!(
            "merged {} lists: {} postings, cf={}",
            sources,
            self.emitted,
            self.cf
        );
        Ok(())
    }
}

fn tie(docno: u32) -> crate::Error {
    invariant(format!(
        "docno {docno} appears in more than one merged list"
    ))
}

/// Merge two finished lists into the empty list `out`.
pub fn merge_two(
    a: &dyn PostingsList,
    b: &dyn PostingsList,
    out: &mut dyn PostingsList,
) -> Result<()> {
    let mut sink = MergeSink::open(&[a, b], out)?;
    let mut reader_a = a.postings_reader()?;
    let mut reader_b = b.postings_reader()?;

    let mut next_a = reader_a.next_posting()?;
    let mut next_b = reader_b.next_posting()?;
    loop {
        match (next_a, next_b) {
            (Some(pa), Some(pb)) if pa.docno == pb.docno => return Err(tie(pa.docno)),
            (Some(pa), Some(pb)) if pa.docno < pb.docno => {
                sink.emit(reader_a.as_mut(), pa)?;
                next_a = reader_a.next_posting()?;
            }
            (_, Some(pb)) => {
                sink.emit(reader_b.as_mut(), pb)?;
                next_b = reader_b.next_posting()?;
            }
            (Some(pa), None) => {
                sink.emit(reader_a.as_mut(), pa)?;
                next_a = reader_a.next_posting()?;
            }
            (None, None) => break,
        }
    }
    sink.close(2)
}

/// Merge any number of finished lists into the empty list `out`.
pub fn merge_lists(lists: &[&dyn PostingsList], out: &mut dyn PostingsList) -> Result<()> {
    let mut sink = MergeSink::open(lists, out)?;

    let mut readers = lists
        .iter()
        .map(|l| l.postings_reader())
        .collect::<Result<Vec<_>>>()?;

    let mut heap: BinaryHeap<MergeEntry> = BinaryHeap::with_capacity(readers.len());
    for (source, reader) in readers.iter_mut().enumerate() {
        if let Some(posting) = reader.next_posting()? {
            heap.push(MergeEntry {
                docno: posting.docno,
                source,
            });
        }
    }

    while let Some(entry) = heap.pop() {
        if let Some(top) = heap.peek()
            && top.docno == entry.docno
        {
            return Err(tie(entry.docno));
        }
        let reader = readers[entry.source].as_mut();
        let posting = reader.posting();
        sink.emit(reader, posting)?;
        if let Some(posting) = reader.next_posting()? {
            heap.push(MergeEntry {
                docno: posting.docno,
                source: entry.source,
            });
        }
    }
    sink.close(lists.len())
}

/// Merge `lists` into a new list built from `config`.
pub fn merge_into(
    config: &PostingsConfig,
    lists: &[&dyn PostingsList],
) -> Result<Box<dyn PostingsList>> {
    let mut out = config.new_postings_list();
    merge_lists(lists, out.as_mut())?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::structures::{PostingFormat, read_all};
    use rand::prelude::*;
    use rand::rngs::StdRng;

    const COLLECTION: u32 = 1_000;

    fn build(
        format: PostingFormat,
        positional: bool,
        postings: &[(u32, Vec<u32>)],
    ) -> Box<dyn PostingsList> {
        let mut list = PostingsConfig::new(format, positional).new_postings_list();
        list.set_collection_document_count(COLLECTION);
        list.set_number_of_postings(postings.len() as u32);
        let mut cf = 0;
        for (docno, positions) in postings {
            let tp = TermPositions::from_positions(positions).unwrap();
            list.add(*docno, tp.tf(), Some(&tp)).unwrap();
            cf += tp.tf() as u64;
        }
        list.set_df(postings.len() as u32);
        list.set_cf(cf);
        list.finish().unwrap();
        list
    }

    fn with_tfs(postings: &[(u32, u32)]) -> Vec<(u32, Vec<u32>)> {
        postings
            .iter()
            .map(|&(docno, tf)| (docno, (1..=tf).map(|p| p * 3).collect()))
            .collect()
    }

    fn contents(list: &dyn PostingsList, positions: bool) -> Vec<(Posting, Vec<u32>)> {
        let mut reader = list.postings_reader().unwrap();
        read_all(reader.as_mut(), positions).unwrap()
    }

    #[test]
    fn test_merge_two_interleaved() {
        let a = build(
            PostingFormat::Golomb,
            false,
            &with_tfs(&[(1, 1), (3, 2), (5, 1)]),
        );
        let b = build(PostingFormat::Golomb, false, &with_tfs(&[(2, 3), (4, 4)]));

        let mut out = PostingsConfig::new(PostingFormat::Golomb, false).new_postings_list();
        merge_two(a.as_ref(), b.as_ref(), out.as_mut()).unwrap();

        let merged: Vec<(u32, u16)> = contents(out.as_ref(), false)
            .iter()
            .map(|(p, _)| (p.docno, p.tf))
            .collect();
        assert_eq!(merged, vec![(1, 1), (2, 3), (3, 2), (4, 4), (5, 1)]);
        assert_eq!(out.number_of_postings(), 5);
        assert_eq!(out.df(), Some(5));
        assert_eq!(out.cf(), Some(11));
        assert_eq!(out.collection_document_count(), COLLECTION);
    }

    #[test]
    fn test_merge_single_list_is_identity() {
        for format in [PostingFormat::Golomb, PostingFormat::PForDelta] {
            let postings = with_tfs(&[(2, 1), (9, 5), (400, 2)]);
            let list = build(format, true, &postings);
            let out = merge_into(&PostingsConfig::new(format, true), &[list.as_ref()]).unwrap();
            assert_eq!(
                contents(out.as_ref(), true),
                contents(list.as_ref(), true)
            );
        }
    }

    #[test]
    fn test_singleton_split_merges_back() {
        let postings: Vec<(u32, Vec<u32>)> = (1..=140u32)
            .map(|i| (i * 7, (1..=i % 4 + 1).map(|p| p * 5 + i % 3).collect()))
            .collect();
        for format in [PostingFormat::Golomb, PostingFormat::PForDelta] {
            let original = build(format, true, &postings);
            let singletons: Vec<Box<dyn PostingsList>> = postings
                .iter()
                .rev()
                .map(|posting| build(format, true, std::slice::from_ref(posting)))
                .collect();
            let refs: Vec<&dyn PostingsList> = singletons.iter().map(|l| l.as_ref()).collect();

            let mut out = PostingsConfig::new(format, true).new_postings_list();
            merge_lists(&refs, out.as_mut()).unwrap();
            assert_eq!(out.number_of_postings(), original.number_of_postings());
            assert_eq!(out.cf(), original.cf());
            assert_eq!(
                contents(out.as_ref(), true),
                contents(original.as_ref(), true)
            );
        }
    }

    #[test]
    fn test_kway_preserves_positions_across_formats() {
        let a = build(
            PostingFormat::Golomb,
            true,
            &[(1, vec![4, 8]), (10, vec![1])],
        );
        let b = build(
            PostingFormat::PForDelta,
            true,
            &[(3, vec![2]), (11, vec![5, 6, 7])],
        );
        let c = build(PostingFormat::Golomb, true, &[(7, vec![100])]);

        let config = PostingsConfig::new(PostingFormat::PForDelta, true);
        let out = merge_into(&config, &[a.as_ref(), b.as_ref(), c.as_ref()]).unwrap();
        let merged = contents(out.as_ref(), true);
        let expected: Vec<(Posting, Vec<u32>)> = vec![
            (Posting::new(1, 2), vec![4, 8]),
            (Posting::new(3, 1), vec![2]),
            (Posting::new(7, 1), vec![100]),
            (Posting::new(10, 1), vec![1]),
            (Posting::new(11, 3), vec![5, 6, 7]),
        ];
        assert_eq!(merged, expected);
        assert_eq!(out.cf(), Some(8));
    }

    #[test]
    fn test_randomized_partitions() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut partitions: Vec<Vec<(u32, u32)>> = vec![Vec::new(); 5];
        let mut expected = Vec::new();
        for docno in 1..=COLLECTION {
            if rng.gen_bool(0.4) {
                let tf = rng.gen_range(1..=6);
                partitions[rng.gen_range(0..5)].push((docno, tf));
                expected.push((docno, tf as u16));
            }
        }
        let lists: Vec<Box<dyn PostingsList>> = partitions
            .iter()
            .map(|p| build(PostingFormat::PForDelta, true, &with_tfs(p)))
            .collect();
        let refs: Vec<&dyn PostingsList> = lists.iter().map(|l| l.as_ref()).collect();

        let out = merge_into(&PostingsConfig::default(), &refs).unwrap();
        let merged = contents(out.as_ref(), true);
        assert_eq!(merged.len(), expected.len());
        for ((posting, positions), &(docno, tf)) in merged.iter().zip(&expected) {
            assert_eq!((posting.docno, posting.tf), (docno, tf));
            assert_eq!(positions.len(), tf as usize);
        }
    }

    #[test]
    fn test_shared_docno_is_rejected() {
        let a = build(PostingFormat::Golomb, false, &with_tfs(&[(1, 1), (5, 1)]));
        let b = build(PostingFormat::Golomb, false, &with_tfs(&[(5, 2)]));

        let mut out = PostingsConfig::new(PostingFormat::Golomb, false).new_postings_list();
        assert!(matches!(
            merge_two(a.as_ref(), b.as_ref(), out.as_mut()),
            Err(Error::InvariantViolation(_))
        ));

        let config = PostingsConfig::new(PostingFormat::Golomb, false);
        assert!(matches!(
            merge_into(&config, &[a.as_ref(), b.as_ref()]),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_collection_mismatch_is_rejected() {
        let a = build(PostingFormat::Golomb, false, &with_tfs(&[(1, 1)]));
        let mut b = PostingsConfig::new(PostingFormat::Golomb, false).new_postings_list();
        b.set_collection_document_count(COLLECTION + 1);
        b.set_number_of_postings(1);
        b.add(2, 1, None).unwrap();
        b.finish().unwrap();

        let config = PostingsConfig::new(PostingFormat::Golomb, false);
        assert!(merge_into(&config, &[a.as_ref(), b.as_ref()]).is_err());
    }

    #[test]
    fn test_positional_output_needs_positional_inputs() {
        let a = build(PostingFormat::Golomb, false, &with_tfs(&[(1, 1)]));
        let config = PostingsConfig::new(PostingFormat::Golomb, true);
        assert!(matches!(
            merge_into(&config, &[a.as_ref()]),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_merged_list_persists() {
        use std::fs::File;
        use std::io::{BufReader, BufWriter, Write};

        let a = build(PostingFormat::Golomb, true, &[(2, vec![1, 9]), (8, vec![3])]);
        let b = build(PostingFormat::Golomb, true, &[(5, vec![7])]);
        let config = PostingsConfig::default();
        let mut out = merge_into(&config, &[a.as_ref(), b.as_ref()]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("term.postings");
        {
            let mut writer = BufWriter::new(File::create(&path).unwrap());
            out.write(&mut writer).unwrap();
            writer.flush().unwrap();
        }

        let mut reader = BufReader::new(File::open(&path).unwrap());
        let mut restored =
            crate::structures::GolombPostingList::read_fields(&mut reader, true).unwrap();
        restored.set_collection_document_count(COLLECTION);
        assert_eq!(restored.df(), Some(3));
        assert_eq!(restored.cf(), Some(4));
        assert_eq!(
            contents(&restored, true),
            vec![
                (Posting::new(2, 2), vec![1, 9]),
                (Posting::new(5, 1), vec![7]),
                (Posting::new(8, 1), vec![3]),
            ]
        );
    }
}
