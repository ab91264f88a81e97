pub mod bitio;
mod postings;

pub use bitio::{BitReader, BitWriter};
pub use postings::{
    BLOCK_SIZE, GolombPostingList, GolombPostingsReader, ListStats, MAX_TF, PForDeltaBlock,
    PForDeltaPostingList, PForDeltaPostingsReader, Posting, PostingFormat, PostingsList,
    PostingsReader, TermPositions, golomb_param, read_all,
};
