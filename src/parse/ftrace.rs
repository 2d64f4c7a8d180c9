// Lines from the `function_graph` tracer look like this:
//
//  ------------------------------------------
//  0)    bash-1201    =>    cat-1342
//  ------------------------------------------
//
//  0)               |  do_syscall_64() {
//  0)               |    __x64_sys_read() {
//  0)   0.215 us    |      ksys_read();
//  0)   1.020 us    |    }
//  0)   2.310 us    |  }
//
// Only function entries (lines ending in `()` once the `;{}` decoration is gone) become rows.
// Closing braces, headers, interrupt arrows and comments are all noise.

/// Separator between the two columns of a context switch marker.
const SWITCH_ARROW: &str = "=>";

/// Characters the tracer wraps around a function name to mark entry, leaf and exit.
const DECORATION: &[char] = &[';', '{', '}'];

/// One level of call depth.
const INDENT_UNIT: &str = "  ";

/// The function field of the pipe layout always starts with one indent unit, even at depth 0.
const PIPE_SEPARATOR_UNITS: usize = 1;

/// Default width of the CPU column in [`Layout::FixedWidth`].
pub const DEFAULT_CPU_WIDTH: usize = 3;

/// Default column at which the call text starts in [`Layout::FixedWidth`].
pub const DEFAULT_FUNC_COLUMN: usize = 4;

/// The physical shape of call lines, which depends on the tool that produced the log.
///
/// The offsets in [`Layout::FixedWidth`] are tracer-specific and should be checked against a
/// sample log before trusting the resulting depths: an off-by-one here shifts every row of every
/// pattern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// `CPU) DURATION | CALL`, as written to `/sys/kernel/tracing/trace` by `function_graph`.
    Pipe,
    /// A CPU number right-aligned in the first `cpu_width` columns, with the indented call text
    /// starting at `func_column`.
    FixedWidth {
        /// Number of columns holding the CPU number.
        cpu_width: usize,
        /// Column at which depth-0 calls start.
        func_column: usize,
    },
}

impl Default for Layout {
    fn default() -> Self {
        Layout::Pipe
    }
}

impl Layout {
    /// The fixed-width layout with its default offsets.
    pub fn fixed_width() -> Self {
        Layout::FixedWidth {
            cpu_width: DEFAULT_CPU_WIDTH,
            func_column: DEFAULT_FUNC_COLUMN,
        }
    }
}

/// A function entry on one CPU.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    /// The CPU the call ran on.
    pub cpu: u32,
    /// The function name, without the `()` call marker.
    pub function: String,
    /// Nesting level; 0 is a top-level call.
    pub depth: usize,
}

/// The task that was switched to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskContext {
    /// Process id.
    pub pid: String,
    /// Command name.
    pub comm: String,
}

/// A scheduler switch marker: from now on, `cpu` runs `task`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContextSwitch {
    /// The CPU the switch happened on.
    pub cpu: u32,
    /// The incoming task.
    pub task: TaskContext,
}

/// Something useful extracted from a single trace line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    /// A function entry.
    Call(Row),
    /// A context switch.
    Switch(ContextSwitch),
}

impl Record {
    /// The CPU this record belongs to.
    pub fn cpu(&self) -> u32 {
        match self {
            Record::Call(row) => row.cpu,
            Record::Switch(switch) => switch.cpu,
        }
    }
}

/// Turns raw trace lines into [`Record`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct Classifier {
    layout: Layout,
}

impl From<Layout> for Classifier {
    fn from(layout: Layout) -> Self {
        Self { layout }
    }
}

impl Classifier {
    /// The layout this classifier expects.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Classifies one line of trace output.
    ///
    /// Returns `None` for anything that is neither a function entry nor a context switch. This is
    /// the common case for headers, blank lines and function exits, and is never an error.
    pub fn classify(&self, line: &str) -> Option<Record> {
        if line.contains(SWITCH_ARROW) {
            // Interrupt arrows (`==========>`) also contain the arrow; they are never calls.
            return parse_switch(line).map(Record::Switch);
        }

        match self.layout {
            Layout::Pipe => parse_pipe_row(line),
            Layout::FixedWidth {
                cpu_width,
                func_column,
            } => parse_fixed_width_row(line, cpu_width, func_column),
        }
        .map(Record::Call)
    }
}

// ` 1)    bash-1201    =>    cat-1342   `
fn parse_switch(line: &str) -> Option<ContextSwitch> {
    let mut fields = line.split_whitespace();
    let cpu = parse_cpu(fields.next()?)?;
    let _prev = fields.next()?;
    if fields.next()? != SWITCH_ARROW {
        return None;
    }
    let next = fields.next()?;
    if fields.next().is_some() {
        return None;
    }

    // Command names may themselves contain dashes; the pid never does.
    let (comm, pid) = next.rsplit_once('-')?;
    Some(ContextSwitch {
        cpu,
        task: TaskContext {
            pid: pid.to_string(),
            comm: comm.to_string(),
        },
    })
}

fn parse_cpu(field: &str) -> Option<u32> {
    let cpu = match field.find(')') {
        Some(close) => &field[..close],
        None => field,
    };
    cpu.trim().parse().ok()
}

fn parse_pipe_row(line: &str) -> Option<Row> {
    let mut columns = line.split('|');
    let prefix = columns.next()?;
    let call = columns.next()?;
    if columns.next().is_some() {
        return None;
    }

    let cpu = parse_cpu(prefix)?;
    let (function, units) = parse_call(call)?;
    let depth = units.checked_sub(PIPE_SEPARATOR_UNITS)?;
    Some(Row {
        cpu,
        function,
        depth,
    })
}

fn parse_fixed_width_row(line: &str, cpu_width: usize, func_column: usize) -> Option<Row> {
    let cpu = parse_cpu(line.get(..cpu_width)?)?;
    let (function, depth) = parse_call(line.get(func_column..)?)?;
    Some(Row {
        cpu,
        function,
        depth,
    })
}

// Strips the decoration off a call field, and returns the function name together with the number
// of indent units the field contained.
fn parse_call(field: &str) -> Option<(String, usize)> {
    let content = field.replace(DECORATION, "");
    let content = content.trim_end();
    if !content.ends_with("()") {
        return None;
    }

    let units = content.matches(INDENT_UNIT).count();
    let function = content.replace("()", "");
    let function = function.trim();
    if function.is_empty() {
        return None;
    }

    Some((function.to_string(), units))
}
