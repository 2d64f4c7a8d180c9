/// Deduplication of call patterns by structural fingerprint.
pub mod ledger;

/// Outlines of distinct call patterns from `function_graph` traces.
///
/// See the [crate-level documentation] for details.
///
///   [crate-level documentation]: ../../index.html
pub mod pattern;

/// An outline of all sampled stack traces, merged into one tree.
///
/// See the [crate-level documentation] for details.
///
///   [crate-level documentation]: ../../index.html
pub mod stack;

/// The prefix tree that stack samples are merged into.
pub mod trie;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;

const READER_CAPACITY: usize = 128 * 1024;

/// File extension of written outline documents.
pub const EXTENSION: &str = "puml";

const START_MINDMAP: &str = "@startmindmap";
const END_MINDMAP: &str = "@endmindmap";

/// Style applied to occurrence counters.
const COUNTER_STYLE: &str = "[#lightgreen]";

#[doc(hidden)]
pub static DEFAULT_NTHREADS: Lazy<usize> = Lazy::new(|| {
    std::thread::available_parallelism()
        .map(Into::into)
        .unwrap_or(1)
});

/// The abstract behavior of turning a trace into outline documents.
///
/// Implementors take the output of a particular tracer, and write zero or more outline documents
/// (PlantUML mind maps) to an [`OutlineSink`].
pub trait Outline {
    /// Reads the trace in `reader` and writes its outlines to `sink`.
    ///
    /// Returns the number of documents written. Zero is a valid result: the input contained
    /// nothing to draw.
    fn outline<R, S>(&mut self, reader: R, sink: &S) -> io::Result<usize>
    where
        R: io::BufRead,
        S: OutlineSink;

    /// Outlines the contents of a file (or of STDIN if `infile` is `None`).
    ///
    /// A missing input file is reported as [`io::ErrorKind::NotFound`] before anything is read.
    fn outline_file<P, S>(&mut self, infile: Option<P>, sink: &S) -> io::Result<usize>
    where
        P: AsRef<Path>,
        S: OutlineSink,
    {
        match infile {
            Some(ref path) => {
                check_input(path)?;
                let file = File::open(path)?;
                let reader = io::BufReader::with_capacity(READER_CAPACITY, file);
                self.outline(reader, sink)
            }
            None => {
                let stdio = io::stdin();
                let stdio_guard = stdio.lock();
                let reader = io::BufReader::with_capacity(READER_CAPACITY, stdio_guard);
                self.outline(reader, sink)
            }
        }
    }
}

/// Checks that an input trace exists before any work is done on it.
pub fn check_input<P: AsRef<Path>>(path: P) -> io::Result<()> {
    let path = path.as_ref();
    if path.exists() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("Input trace file not found: {}", path.display()),
        ))
    }
}

/// Somewhere to put finished outline documents.
///
/// Sinks are shared between worker threads, so writing takes `&self`.
pub trait OutlineSink: Sync {
    /// Stores the document `contents` under `name`.
    ///
    /// Names are unique within a run.
    fn write_outline(&self, name: &str, contents: &[u8]) -> io::Result<()>;
}

/// Writes each outline to `<dir>/<name>.puml`, replacing any existing file.
#[derive(Clone, Debug)]
pub struct DirSink {
    dir: PathBuf,
}

impl DirSink {
    /// Creates a sink writing into `dir`, which must be an existing directory.
    pub fn new<P: AsRef<Path>>(dir: P) -> io::Result<Self> {
        let dir = dir.as_ref();
        if !fs::metadata(dir)?.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Output path is not a directory: {}", dir.display()),
            ));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    /// The directory outlines are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The path the outline called `name` is written to.
    pub fn path_of(&self, name: &str) -> PathBuf {
        let file_name = name.replace(|c: char| c == '/' || c == '\\', "_");
        self.dir.join(format!("{}.{}", file_name, EXTENSION))
    }
}

impl OutlineSink for DirSink {
    fn write_outline(&self, name: &str, contents: &[u8]) -> io::Result<()> {
        let path = self.path_of(name);
        let mut writer = io::BufWriter::new(File::create(&path)?);
        writer.write_all(contents)?;
        writer.flush()?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

/// Keeps outlines in memory, in the order they were written.
#[derive(Debug, Default)]
pub struct MemorySink {
    outlines: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemorySink {
    /// The names of all outlines written so far.
    pub fn names(&self) -> Vec<String> {
        self.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    /// The contents of the outline called `name`, as text.
    pub fn get(&self, name: &str) -> Option<String> {
        self.lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, contents)| String::from_utf8_lossy(contents).into_owned())
    }

    /// Takes all outlines written so far.
    pub fn into_outlines(self) -> Vec<(String, Vec<u8>)> {
        match self.outlines.into_inner() {
            Ok(outlines) => outlines,
            Err(e) => e.into_inner(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(String, Vec<u8>)>> {
        match self.outlines.lock() {
            Ok(guard) => guard,
            Err(e) => e.into_inner(),
        }
    }
}

impl OutlineSink for MemorySink {
    fn write_outline(&self, name: &str, contents: &[u8]) -> io::Result<()> {
        self.lock().push((name.to_string(), contents.to_vec()));
        Ok(())
    }
}

// Mind map branches are drawn as a run of one marker character per level.
fn write_level<W: Write>(writer: &mut W, marker: u8, level: usize) -> io::Result<()> {
    for _ in 0..level {
        writer.write_all(&[marker])?;
    }
    Ok(())
}

fn write_call<W: Write>(
    writer: &mut W,
    marker: u8,
    level: usize,
    function: &str,
) -> io::Result<()> {
    write_level(writer, marker, level)?;
    writer.write_all(b" ")?;
    writer.write_all(function.as_bytes())?;
    writer.write_all(b"()\n")
}

fn write_counter<W: Write>(
    writer: &mut W,
    marker: u8,
    level: usize,
    times: usize,
) -> io::Result<()> {
    let mut buffer = itoa::Buffer::new();
    write_level(writer, marker, level)?;
    writer.write_all(COUNTER_STYLE.as_bytes())?;
    writer.write_all(b" ")?;
    writer.write_all(buffer.format(times).as_bytes())?;
    writer.write_all(b" times\n")
}
