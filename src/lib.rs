//! trace-outline turns function-call traces captured by the Linux kernel tracer (ftrace) into
//! [PlantUML mind map] outline documents, so that the shape of a call tree can be inspected
//! visually rather than by scrolling through thousands of indented log lines.
//!
//! Two kinds of input are supported, each with its own pipeline:
//!
//! - **Call patterns.** The `function_graph` tracer prints one line per function entry, indented
//!   by call depth and prefixed with the CPU it ran on. Lines from different CPUs interleave
//!   freely. The [`outline::pattern`] pipeline splits that stream, per CPU, into _patterns_ (one
//!   top-level call and everything it called), and writes one outline per _distinct_ pattern
//!   shape. A syscall that runs a thousand times with the same call tree yields one document.
//! - **Stack traces.** With the `stacktrace` option enabled, ftrace records a full kernel stack
//!   for every event. The [`outline::stack`] pipeline merges all those stacks into a single
//!   prefix tree and writes it as one outline, annotating each complete stack with how many
//!   times it was seen.
//!
//! The outlines are plain text; turning them into images is left to PlantUML itself.
//!
//! # Command-line use
//!
//! ```console
//! $ echo function_graph > /sys/kernel/tracing/current_tracer
//! $ cat /sys/kernel/tracing/trace > result/trace.data
//! $ trace-outline-patterns result/trace.data
//! 3 outline files generated.
//! $ java -jar plantuml.jar -tsvg result/*.puml
//! ```
//!
//! and, for stack traces:
//!
//! ```console
//! $ trace-outline-stacks result/stack.data
//! ```
//!
//! # Programmatic access
//!
//! Both pipelines implement [`outline::Outline`] and write their documents to an
//! [`outline::OutlineSink`]:
//!
//! ```
//! use trace_outline::outline::pattern::Segmenter;
//! use trace_outline::outline::{MemorySink, Outline};
//!
//! let trace = " 0)               |  do_syscall_64() {\n 0)   0.215 us    |    ksys_read();\n";
//! let sink = MemorySink::default();
//! let written = Segmenter::default().outline(trace.as_bytes(), &sink).unwrap();
//! assert_eq!(written, 1);
//! assert_eq!(sink.names(), vec!["do_syscall_64~0".to_string()]);
//! ```
//!
//!   [PlantUML mind map]: https://plantuml.com/mindmap-diagram

#![deny(missing_docs)]

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

#[macro_use]
extern crate log;

/// Parsers for the raw trace formats.
///
/// See the [crate-level documentation] for details.
///
///   [crate-level documentation]: ../index.html
pub mod parse;

/// Turning parsed traces into outline documents.
///
/// See the [crate-level documentation] for details.
///
///   [crate-level documentation]: ../index.html
pub mod outline;
