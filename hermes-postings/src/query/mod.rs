//! Multi-term matching over postings readers

mod proximity;

pub use proximity::{OrderedWindow, ProximityPostingsReader, UnorderedWindow, Window};
