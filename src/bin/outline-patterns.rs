use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Parser, ValueEnum};
use env_logger::Env;
use is_terminal::IsTerminal;
use trace_outline::outline::pattern::{Options, Segmenter};
use trace_outline::outline::{check_input, DirSink, Outline};
use trace_outline::parse::ftrace::{Layout, DEFAULT_CPU_WIDTH, DEFAULT_FUNC_COLUMN};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LayoutArg {
    /// ` 0)   0.215 us    |    ksys_read();` as printed by the function_graph tracer
    Pipe,
    /// CPU and function name at fixed character offsets
    Fixed,
}

#[derive(Debug, Parser)]
#[clap(
    name = "trace-outline-patterns",
    about,
    after_help = "\
[1] The input is the output of the function_graph tracer, eg:
        echo function_graph > /sys/kernel/tracing/current_tracer
        cat /sys/kernel/tracing/trace > trace.data
    One <function>~<index>[_<comm>-<pid>].puml mind map is written per distinct call pattern."
)]
struct Opt {
    // Flags...
    /// Don't name outlines after the task running on the pattern's CPU
    #[clap(long = "no-context")]
    no_context: bool,

    /// Silence all log output
    #[clap(short = 'q', long = "quiet")]
    quiet: bool,

    /// Verbose logging mode (-v, -vv, -vvv)
    #[clap(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    // Options...
    /// How call lines are laid out
    #[clap(long = "layout", value_enum, default_value = "pipe")]
    layout: LayoutArg,

    /// Width of the CPU field (fixed layout only)
    #[clap(long = "cpu-width", value_name = "UINT", default_value_t = DEFAULT_CPU_WIDTH)]
    cpu_width: usize,

    /// Column the function name starts at (fixed layout only)
    #[clap(long = "func-column", value_name = "UINT", default_value_t = DEFAULT_FUNC_COLUMN)]
    func_column: usize,

    /// Number of threads to use; 0 means the number of logical cores on your machine.
    /// Outline indices are only stable from run to run with a single thread.
    #[clap(short = 'n', long = "nthreads", value_name = "UINT", default_value_t = 1)]
    nthreads: usize,

    /// Directory to write outlines to [default: the directory of PATH]
    #[clap(short = 'o', long = "output-dir", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    // Args...
    /// function_graph trace file, or STDIN if not specified
    #[clap(value_name = "PATH")]
    infile: Option<PathBuf>,
}

impl Opt {
    fn into_parts(self) -> (Option<PathBuf>, PathBuf, Options) {
        let output_dir = output_dir(self.output_dir, self.infile.as_deref());
        let layout = match self.layout {
            LayoutArg::Pipe => Layout::Pipe,
            LayoutArg::Fixed => Layout::FixedWidth {
                cpu_width: self.cpu_width,
                func_column: self.func_column,
            },
        };
        (
            self.infile,
            output_dir,
            Options {
                layout,
                nthreads: self.nthreads,
                include_context: !self.no_context,
            },
        )
    }
}

fn output_dir(explicit: Option<PathBuf>, infile: Option<&Path>) -> PathBuf {
    explicit
        .or_else(|| {
            infile
                .and_then(Path::parent)
                .filter(|dir| !dir.as_os_str().is_empty())
                .map(Path::to_path_buf)
        })
        .unwrap_or_else(|| PathBuf::from("."))
}

fn main() -> io::Result<()> {
    let opt = Opt::parse();

    // Initialize logger
    if !opt.quiet {
        env_logger::Builder::from_env(Env::default().default_filter_or(match opt.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }))
        .format_timestamp(None)
        .init();
    }

    let (infile, output_dir, options) = opt.into_parts();
    if let Some(ref path) = infile {
        if let Err(e) = check_input(path) {
            eprintln!("ERROR: {}", e);
            process::exit(1);
        }
    }

    let sink = DirSink::new(&output_dir)?;
    let written = Segmenter::from(options).outline_file(infile.as_ref(), &sink)?;
    if written == 0 {
        println!("Nothing generated.");
    } else {
        println!("{} outline files generated.", written);
        if io::stdout().is_terminal() {
            println!(
                "Render them with: plantuml -tsvg {}",
                sink.dir().join("*.puml").display()
            );
        }
    }
    Ok(())
}
