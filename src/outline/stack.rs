use std::io;
use std::io::prelude::*;

use super::trie::Trie;
use super::{Outline, OutlineSink};
pub use crate::parse::stacktrace::Options;
use crate::parse::stacktrace::Samples;

/// A stack trace merger for ftrace's `<stack trace>` output.
///
/// All samples go into one [`Trie`], which is written as a single outline named after the
/// outermost frame of the first sample.
///
/// To construct one, either use `stack::Merger::default()` or create an [`Options`] and use
/// `stack::Merger::from(options)`.
#[derive(Clone, Debug, Default)]
pub struct Merger {
    opt: Options,
}

impl From<Options> for Merger {
    fn from(opt: Options) -> Self {
        Self { opt }
    }
}

impl Merger {
    /// Reads every sample in `reader` into a fresh trie.
    pub fn merge<R: BufRead>(&self, reader: R) -> io::Result<Trie> {
        let mut trie = Trie::new();
        let (mut nsamples, mut nempty) = (0, 0);
        for sample in Samples::with_options(reader, self.opt.clone()) {
            let sample = sample?;
            nsamples += 1;
            if sample.is_empty() {
                nempty += 1;
            }
            trie.merge(&sample);
        }
        info!(
            "Merged {} stack samples ({} empty) into {} frames",
            nsamples,
            nempty,
            trie.frame_count()
        );
        Ok(trie)
    }
}

impl Outline for Merger {
    fn outline<R, S>(&mut self, reader: R, sink: &S) -> io::Result<usize>
    where
        R: BufRead,
        S: OutlineSink,
    {
        let trie = self.merge(reader)?;
        let name = match trie.name() {
            Some(name) => name,
            None => {
                warn!("Nothing to generate: no stack traces found in input");
                return Ok(0);
            }
        };

        let mut contents = Vec::new();
        trie.write_outline(&mut contents)?;
        sink.write_outline(name, &contents)?;
        Ok(1)
    }
}
