use std::collections::{BTreeMap, HashMap};
use std::io;
use std::io::prelude::*;

use super::ledger::{Fingerprint, Ledger};
use super::{Outline, OutlineSink, DEFAULT_NTHREADS, END_MINDMAP, START_MINDMAP};
use crate::parse::ftrace::{Classifier, Layout, Record, Row, TaskContext};

#[cfg(feature = "multithreaded")]
const RECORDS_PER_BATCH: usize = 256;

/// Marker character for a level in a pattern outline.
const PATTERN_LEVEL: u8 = b'+';

/// Pattern segmenter configuration options.
#[derive(Clone, Debug)]
pub struct Options {
    /// How call lines are laid out. Default is [`Layout::Pipe`].
    pub layout: Layout,

    /// The number of threads to use. Default is 1, which is also the only setting under which
    /// emission indices are guaranteed to be the same from one run to the next. 0 means the
    /// number of logical cores on your machine.
    pub nthreads: usize,

    /// Name outlines after the task that last ran on the pattern's CPU. Default is `true`.
    pub include_context: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            layout: Layout::default(),
            nthreads: 1,
            include_context: true,
        }
    }
}

/// One top-level call on a CPU and every call nested in it, in trace order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pattern {
    cpu: u32,
    rows: Vec<Row>,
}

impl Pattern {
    /// Starts a pattern at its root call.
    pub fn new(root: Row) -> Self {
        Self {
            cpu: root.cpu,
            rows: vec![root],
        }
    }

    /// Adds a nested call.
    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// The CPU this pattern ran on.
    pub fn cpu(&self) -> u32 {
        self.cpu
    }

    /// The name of the top-level call.
    pub fn root_function(&self) -> &str {
        &self.rows[0].function
    }

    /// Every call in the pattern, root first.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// The structural fingerprint of this pattern.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.rows)
    }

    /// The name of the outline for this pattern, given its emission index and, if known, the task
    /// running on its CPU.
    pub fn outline_name(&self, index: usize, context: Option<&TaskContext>) -> String {
        let mut buffer = itoa::Buffer::new();
        let mut name = format!("{}~{}", self.root_function(), buffer.format(index));
        if let Some(task) = context {
            name.push('_');
            name.push_str(&task.comm);
            name.push('-');
            name.push_str(&task.pid);
        }
        name
    }

    /// Writes this pattern as a mind map, one branch per call.
    pub fn write_outline<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writeln!(writer, "{}", START_MINDMAP)?;
        for row in &self.rows {
            super::write_call(&mut writer, PATTERN_LEVEL, row.depth + 1, &row.function)?;
        }
        writeln!(writer, "{}", END_MINDMAP)
    }
}

/// A call pattern extractor for the output of the `function_graph` tracer.
///
/// Every distinct pattern shape is written once, as an outline named
/// `<root function>~<index>[_<comm>-<pid>]`.
///
/// To construct one, either use `pattern::Segmenter::default()` or create an [`Options`] and use
/// `pattern::Segmenter::from(options)`.
#[derive(Clone, Debug, Default)]
pub struct Segmenter {
    opt: Options,
}

impl From<Options> for Segmenter {
    fn from(opt: Options) -> Self {
        Self { opt }
    }
}

impl Outline for Segmenter {
    fn outline<R, S>(&mut self, reader: R, sink: &S) -> io::Result<usize>
    where
        R: BufRead,
        S: OutlineSink,
    {
        let nthreads = self.nthreads();
        let written = if nthreads > 1 {
            self.outline_multi_threaded(reader, sink, nthreads)?
        } else {
            self.outline_single_threaded(reader, sink)?
        };

        if written == 0 {
            warn!("Nothing to generate: no call patterns found in input");
        }
        Ok(written)
    }
}

impl Segmenter {
    fn nthreads(&self) -> usize {
        let nthreads = match self.opt.nthreads {
            0 => *DEFAULT_NTHREADS,
            n => n,
        };
        if cfg!(feature = "multithreaded") {
            nthreads
        } else {
            if nthreads > 1 {
                warn!("Built without multithreading support; using a single thread");
            }
            1
        }
    }

    fn outline_single_threaded<R, S>(&self, mut reader: R, sink: &S) -> io::Result<usize>
    where
        R: BufRead,
        S: OutlineSink,
    {
        let classifier = Classifier::from(self.opt.layout);
        let mut ledger = Ledger::new(1);
        let mut pending = PendingPatterns::new(self.opt.include_context);

        let mut written = 0;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            let line = String::from_utf8_lossy(&buf);
            match classifier.classify(&line) {
                Some(record) => written += pending.on_record(record, &mut ledger, sink)?,
                None => trace!("Ignoring line: {}", line.trim_end()),
            }
        }
        written += pending.flush(&mut ledger, sink)?;

        info!(
            "{} rows in {} patterns, {} distinct",
            pending.nrows,
            pending.npatterns,
            ledger.len()
        );
        Ok(written)
    }

    #[cfg(not(feature = "multithreaded"))]
    fn outline_multi_threaded<R, S>(&self, reader: R, sink: &S, _: usize) -> io::Result<usize>
    where
        R: BufRead,
        S: OutlineSink,
    {
        self.outline_single_threaded(reader, sink)
    }

    // The main thread classifies lines and hands each record to the worker that owns its CPU.
    // Since a CPU always maps to the same worker, each worker sees its CPUs' rows in trace order
    // and can segment them exactly like the single-threaded path; only the ledger is shared.
    #[cfg(feature = "multithreaded")]
    fn outline_multi_threaded<R, S>(
        &self,
        mut reader: R,
        sink: &S,
        nthreads: usize,
    ) -> io::Result<usize>
    where
        R: BufRead,
        S: OutlineSink,
    {
        use crossbeam_channel::bounded;
        use std::mem;

        assert!(nthreads > 1);
        let classifier = Classifier::from(self.opt.layout);
        let ledger = Ledger::new(nthreads);
        assert!(ledger.is_concurrent());
        let include_context = self.opt.include_context;

        let result = crossbeam_utils::thread::scope(|scope| -> io::Result<usize> {
            let mut senders = Vec::with_capacity(nthreads);
            let mut handles = Vec::with_capacity(nthreads);
            for _ in 0..nthreads {
                // Bounded, so that a slow worker limits how far ahead the reader gets.
                let (tx, rx) = bounded::<Vec<Record>>(4);
                let mut ledger = ledger.clone();
                let handle = scope.spawn(move |_| -> io::Result<usize> {
                    let mut pending = PendingPatterns::new(include_context);
                    let mut written = 0;
                    for batch in rx {
                        for record in batch {
                            written += pending.on_record(record, &mut ledger, sink)?;
                        }
                    }
                    written += pending.flush(&mut ledger, sink)?;
                    debug!(
                        "Worker segmented {} rows into {} patterns",
                        pending.nrows, pending.npatterns
                    );
                    Ok(written)
                });
                senders.push(tx);
                handles.push(handle);
            }

            let mut batches = vec![Vec::with_capacity(RECORDS_PER_BATCH); nthreads];
            let mut buf = Vec::new();
            let mut read_result = Ok(());
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        read_result = Err(e);
                        break;
                    }
                }
                let line = String::from_utf8_lossy(&buf);
                let record = match classifier.classify(&line) {
                    Some(record) => record,
                    None => {
                        trace!("Ignoring line: {}", line.trim_end());
                        continue;
                    }
                };
                let worker = record.cpu() as usize % nthreads;
                batches[worker].push(record);
                if batches[worker].len() == RECORDS_PER_BATCH {
                    let batch = mem::replace(
                        &mut batches[worker],
                        Vec::with_capacity(RECORDS_PER_BATCH),
                    );
                    if senders[worker].send(batch).is_err() {
                        // The worker has stopped on an error, which we will pick up when
                        // joining it below; there is no point in reading any further.
                        break;
                    }
                }
            }

            // Hand out what is left, then hang up so the workers flush and exit.
            for (tx, batch) in senders.into_iter().zip(batches) {
                if !batch.is_empty() {
                    let _ = tx.send(batch);
                }
            }

            let mut written = 0;
            let mut worker_result = Ok(());
            for handle in handles {
                match handle.join() {
                    Ok(Ok(n)) => written += n,
                    Ok(Err(e)) => worker_result = worker_result.and(Err(e)),
                    Err(_) => {
                        worker_result = worker_result.and(Err(io::Error::new(
                            io::ErrorKind::Other,
                            "pattern worker thread panicked",
                        )))
                    }
                }
            }
            read_result?;
            worker_result?;
            Ok(written)
        });

        let written = match result {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "pattern worker thread panicked",
                ))
            }
        };
        info!(
            "{} distinct patterns across {} threads",
            ledger.len(),
            nthreads
        );
        Ok(written)
    }
}

/// The open pattern of every CPU, plus the task last switched to on each of them.
struct PendingPatterns {
    open: BTreeMap<u32, Pattern>,
    contexts: HashMap<u32, TaskContext, ahash::RandomState>,
    include_context: bool,
    nrows: usize,
    npatterns: usize,
    norphans: usize,
}

impl PendingPatterns {
    fn new(include_context: bool) -> Self {
        Self {
            open: BTreeMap::new(),
            contexts: HashMap::default(),
            include_context,
            nrows: 0,
            npatterns: 0,
            norphans: 0,
        }
    }

    fn on_record<S>(&mut self, record: Record, ledger: &mut Ledger, sink: &S) -> io::Result<usize>
    where
        S: OutlineSink,
    {
        match record {
            Record::Call(row) => self.on_row(row, ledger, sink),
            Record::Switch(switch) => {
                self.contexts.insert(switch.cpu, switch.task);
                Ok(0)
            }
        }
    }

    fn on_row<S>(&mut self, row: Row, ledger: &mut Ledger, sink: &S) -> io::Result<usize>
    where
        S: OutlineSink,
    {
        self.nrows += 1;
        if row.depth == 0 {
            let cpu = row.cpu;
            let written = match self.open.remove(&cpu) {
                Some(pattern) => self.close(pattern, ledger, sink)?,
                None => 0,
            };
            self.open.insert(cpu, Pattern::new(row));
            Ok(written)
        } else {
            match self.open.get_mut(&row.cpu) {
                Some(pattern) => pattern.push(row),
                // The trace started in the middle of this call; there is no root to hang it on.
                None => {
                    self.norphans += 1;
                    trace!(
                        "Discarding {}() at depth {} on CPU {}",
                        row.function,
                        row.depth,
                        row.cpu
                    );
                }
            }
            Ok(0)
        }
    }

    // Closes every open pattern, in CPU order.
    fn flush<S>(&mut self, ledger: &mut Ledger, sink: &S) -> io::Result<usize>
    where
        S: OutlineSink,
    {
        let mut written = 0;
        for (_, pattern) in std::mem::take(&mut self.open) {
            written += self.close(pattern, ledger, sink)?;
        }
        if self.norphans > 0 {
            debug!("Discarded {} rows without a root call", self.norphans);
        }
        Ok(written)
    }

    fn close<S>(&mut self, pattern: Pattern, ledger: &mut Ledger, sink: &S) -> io::Result<usize>
    where
        S: OutlineSink,
    {
        self.npatterns += 1;
        let registration = ledger.register(pattern.fingerprint());
        if !registration.is_new {
            debug!(
                "Pattern rooted at {}() repeats outline {}",
                pattern.root_function(),
                registration.index
            );
            return Ok(0);
        }

        let context = if self.include_context {
            self.contexts.get(&pattern.cpu())
        } else {
            None
        };
        let name = pattern.outline_name(registration.index, context);
        let mut contents = Vec::new();
        pattern.write_outline(&mut contents)?;
        sink.write_outline(&name, &contents)?;
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::MemorySink;

    fn run(input: &str, opt: Options) -> MemorySink {
        let sink = MemorySink::default();
        Segmenter::from(opt).outline(input.as_bytes(), &sink).unwrap();
        sink
    }

    #[test]
    fn depth_zero_closes_the_open_pattern() {
        let input = "\
 0)               |  A() {
 0)   0.100 us    |    B();
 0)   0.300 us    |  }
 0)   0.100 us    |  C();
";
        let sink = run(input, Options::default());
        assert_eq!(sink.names(), vec!["A~0".to_string(), "C~1".to_string()]);
        assert_eq!(
            sink.get("A~0").unwrap(),
            "@startmindmap\n+ A()\n++ B()\n@endmindmap\n"
        );
        assert_eq!(
            sink.get("C~1").unwrap(),
            "@startmindmap\n+ C()\n@endmindmap\n"
        );
    }

    #[test]
    fn repeats_are_written_once() {
        let input = "\
 0)               |  A() {
 0)   0.100 us    |    B();
 1)               |  A() {
 1)   0.100 us    |    B();
 0)               |  A() {
 0)   0.100 us    |    B();
 0)   0.100 us    |    B();
";
        let sink = run(input, Options::default());
        // cpu 1's pattern is flushed last, and repeats A~0
        assert_eq!(sink.names(), vec!["A~0".to_string(), "A~1".to_string()]);
        assert_eq!(
            sink.get("A~1").unwrap(),
            "@startmindmap\n+ A()\n++ B()\n++ B()\n@endmindmap\n"
        );
    }

    #[test]
    fn orphans_are_discarded() {
        let input = "\
 2)   0.100 us    |      mutex_unlock();
 2)   0.900 us    |    }
 2)               |  A() {
 2)   0.100 us    |    B();
";
        let sink = run(input, Options::default());
        assert_eq!(sink.names(), vec!["A~0".to_string()]);
        assert_eq!(
            sink.get("A~0").unwrap(),
            "@startmindmap\n+ A()\n++ B()\n@endmindmap\n"
        );
    }

    #[test]
    fn context_decorates_names() {
        let input = "\
 ------------------------------------------
 1)    bash-1201    =>    cat-1342
 ------------------------------------------
 1)               |  A() {
 0)               |  B() {
";
        let sink = run(input, Options::default());
        assert_eq!(
            sink.names(),
            vec!["B~0".to_string(), "A~1_cat-1342".to_string()]
        );

        let sink = run(
            input,
            Options {
                include_context: false,
                ..Default::default()
            },
        );
        assert_eq!(sink.names(), vec!["B~0".to_string(), "A~1".to_string()]);
    }

    #[test]
    fn context_does_not_affect_deduplication() {
        let input = "\
 0)    bash-1201    =>    cat-1342
 0)               |  A() {
 0)    cat-1342    =>    sshd-77
 0)               |  A() {
";
        let sink = run(input, Options::default());
        assert_eq!(sink.names(), vec!["A~0_sshd-77".to_string()]);
    }

    #[test]
    fn invalid_utf8_lines_do_not_abort() {
        let input: &[u8] = b"\
 0)               |  A() {
 0)   0.100 us    |    B();
 0)    bash-1201    =>    \xff\xfe-42
 0)   0.100 us    |  \xff();
 0)   0.100 us    |  C();
";
        for &nthreads in &[1, 2] {
            let sink = MemorySink::default();
            let opt = Options {
                nthreads,
                ..Default::default()
            };
            assert_eq!(Segmenter::from(opt).outline(input, &sink).unwrap(), 3);
            assert_eq!(
                sink.names(),
                vec![
                    "A~0_\u{fffd}\u{fffd}-42".to_string(),
                    "\u{fffd}~1_\u{fffd}\u{fffd}-42".to_string(),
                    "C~2_\u{fffd}\u{fffd}-42".to_string(),
                ]
            );
            assert_eq!(
                sink.get("A~0_\u{fffd}\u{fffd}-42").unwrap(),
                "@startmindmap\n+ A()\n++ B()\n@endmindmap\n"
            );
        }
    }

    #[test]
    fn reruns_are_identical() {
        let input = "\
 0)    bash-1201    =>    cat-1342
 0)               |  do_syscall_64() {
 0)               |    ksys_read() {
 1)               |  schedule() {
 1)   0.120 us    |    rcu_note_context_switch();
 0)               |  do_syscall_64() {
 0)   0.301 us    |    ksys_write();
 1)               |  schedule() {
 1)   0.120 us    |    rcu_note_context_switch();
 0)               |  do_syscall_64() {
 0)               |    ksys_read() {
";
        let first = run(input, Options::default()).into_outlines();
        let second = run(input, Options::default()).into_outlines();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn nothing_to_generate() {
        let sink = run("# tracer: function_graph\n\n", Options::default());
        assert!(sink.names().is_empty());
    }

    #[test]
    fn fixed_width_layout() {
        let input = "\
  0 start_kernel() {
  0   setup_arch();
  1 secondary_startup() {
  0 start_kernel() {
  0   setup_arch();
";
        let sink = run(
            input,
            Options {
                layout: Layout::fixed_width(),
                ..Default::default()
            },
        );
        assert_eq!(
            sink.names(),
            vec!["start_kernel~0".to_string(), "secondary_startup~1".to_string()]
        );
    }

    #[cfg(feature = "multithreaded")]
    #[test]
    fn multi_threaded_writes_the_same_outlines() {
        let mut input = String::new();
        for i in 0..2000 {
            let cpu = i % 7;
            input.push_str(&format!(" {})               |  root_{}() {{\n", cpu, i % 13));
            for depth in 1..=(i % 5) {
                input.push_str(&format!(
                    " {})   0.100 us    |  {}child_{}();\n",
                    cpu,
                    "  ".repeat(depth),
                    (i + depth) % 3
                ));
            }
        }

        let contents = |sink: MemorySink| {
            let mut contents: Vec<_> = sink
                .into_outlines()
                .into_iter()
                .map(|(_, contents)| contents)
                .collect();
            contents.sort();
            contents
        };
        let expected = contents(run(&input, Options::default()));
        assert!(!expected.is_empty());
        for nthreads in &[2, 3, 8] {
            let actual = contents(run(
                &input,
                Options {
                    nthreads: *nthreads,
                    ..Default::default()
                },
            ));
            assert_eq!(actual, expected, "nthreads = {}", nthreads);
        }
    }
}
