/// Classification of `function_graph` tracer lines into call rows and context switches.
pub mod ftrace;

/// Reading sampled kernel stack traces (`<stack trace>` blocks).
pub mod stacktrace;
