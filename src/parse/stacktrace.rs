use std::io;
use std::io::prelude::*;

// With `options/stacktrace` set, ftrace follows each event with the kernel stack at that point:
//
//             bash-1201  [000] d..3  5012.233101: <stack trace>
//  => schedule
//  => do_nanosleep
//  => hrtimer_nanosleep
//
// Everything else (headers, the events themselves) is ignored.

/// Tag that starts a new stack trace block.
const STACK_MARKER: &str = "<stack trace>";

/// Leading token of a frame line.
const FRAME_ARROW: &str = "=>";

/// Settings that change how frames are named from the incoming stack traces.
///
/// All options default to off.
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Keep the `+0x1c/0x60` offset suffix on frames.
    ///
    /// Off by default, so a frame is named by its symbol alone rather than by the raw second
    /// token of the frame line.
    pub include_offset: bool,
}

/// One captured stack, in the order its frames were printed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StackSample {
    frames: Vec<String>,
}

impl StackSample {
    /// The frames of this sample, in input order.
    pub fn frames(&self) -> &[String] {
        &self.frames
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the block contained no frames at all.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl<S> FromIterator<S> for StackSample
where
    S: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            frames: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// A lazy iterator over the [`StackSample`]s of a stack trace log.
///
/// The iterator reads from `reader` only as far as it needs to produce the next sample, and
/// cannot be restarted. Read errors are yielded once, after which the iterator is exhausted.
pub struct Samples<R>
where
    R: BufRead,
{
    reader: R,

    /// The sample currently being filled, if a marker has been seen.
    current: Option<StackSample>,

    /// Set once the reader is exhausted or has failed.
    done: bool,

    opt: Options,
}

impl<R> Samples<R>
where
    R: BufRead,
{
    /// Reads samples from `reader` with default options.
    pub fn new(reader: R) -> Self {
        Self::with_options(reader, Options::default())
    }

    /// Reads samples from `reader`.
    pub fn with_options(reader: R, opt: Options) -> Self {
        Self {
            reader,
            current: None,
            done: false,
            opt,
        }
    }

    fn frame<'a>(&self, line: &'a str) -> Option<&'a str> {
        let mut fields = line.split_whitespace();
        if fields.next()? != FRAME_ARROW {
            return None;
        }
        let frame = fields.next()?;
        if self.opt.include_offset {
            Some(frame)
        } else {
            Some(remove_offset(frame))
        }
    }
}

impl<R> Iterator for Samples<R>
where
    R: BufRead,
{
    type Item = io::Result<StackSample>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut buf = Vec::new();
        loop {
            buf.clear();
            match self.reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    self.done = true;
                    return self.current.take().map(Ok);
                }
                Ok(_) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }

            // Command names and symbols are not guaranteed to be UTF-8.
            let line = String::from_utf8_lossy(&buf);
            if line.contains(STACK_MARKER) {
                let finished = self.current.replace(StackSample::default());
                if let Some(sample) = finished {
                    return Some(Ok(sample));
                }
            } else if let Some(frame) = self.frame(&line) {
                match self.current {
                    Some(ref mut sample) => sample.frames.push(frame.to_string()),
                    None => trace!("Ignoring frame before first stack trace: {}", frame),
                }
            } else {
                trace!("Ignoring line: {}", line.trim_end());
            }
        }
    }
}

// `schedule+0x3c/0xb0` -> `schedule`
fn remove_offset(frame: &str) -> &str {
    match frame.rfind('+') {
        Some(plus) if plus > 0 => &frame[..plus],
        _ => frame,
    }
}
