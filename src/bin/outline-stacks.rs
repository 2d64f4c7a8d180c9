use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{ArgAction, Parser};
use env_logger::Env;
use is_terminal::IsTerminal;
use trace_outline::outline::stack::{Merger, Options};
use trace_outline::outline::{check_input, DirSink, Outline};

#[derive(Debug, Parser)]
#[clap(
    name = "trace-outline-stacks",
    about,
    after_help = "\
[1] The input is an ftrace log with kernel stack traces enabled, eg:
        echo 1 > /sys/kernel/tracing/options/stacktrace
        cat /sys/kernel/tracing/trace > stack.data
    All stacks are merged into one mind map, named after the first stack's outermost frame."
)]
struct Opt {
    // Flags...
    /// Keep the +0x1c/0x60 offsets on frame names
    #[clap(long = "include-offset")]
    include_offset: bool,

    /// Silence all log output
    #[clap(short = 'q', long = "quiet")]
    quiet: bool,

    /// Verbose logging mode (-v, -vv, -vvv)
    #[clap(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    // Options...
    /// Directory to write the outline to [default: the directory of PATH]
    #[clap(short = 'o', long = "output-dir", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    // Args...
    /// Stack trace file, or STDIN if not specified
    #[clap(value_name = "PATH")]
    infile: Option<PathBuf>,
}

impl Opt {
    fn into_parts(self) -> (Option<PathBuf>, PathBuf, Options) {
        let output_dir = output_dir(self.output_dir, self.infile.as_deref());
        (
            self.infile,
            output_dir,
            Options {
                include_offset: self.include_offset,
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
    let written = Merger::from(options).outline_file(infile.as_ref(), &sink)?;
    if written == 0 {
        println!("Nothing generated.");
    } else {
        println!("{} outline files generated.", written);
        if io::stdout().is_terminal() {
            println!(
                "Render it with: plantuml -tsvg {}",
                sink.dir().join("*.puml").display()
            );
        }
    }
    Ok(())
}
