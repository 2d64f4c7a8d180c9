use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use testing_logger::CapturedLog;
use trace_outline::outline::{DirSink, MemorySink, Outline};

pub fn compare_results<R, E>(result: R, mut expected: E, expected_file: &str)
where
    R: BufRead,
    E: BufRead,
{
    let mut buf = String::new();
    let mut line_num = 1;
    for line in result.lines() {
        let line = line.unwrap();
        if expected.read_line(&mut buf).unwrap() == 0 {
            panic!(
                "\noutput has more lines than expected result file: {}",
                expected_file
            );
        }
        assert_eq!(line, buf.trim_end(), "\n{}:{}", expected_file, line_num);
        buf.clear();
        line_num += 1;
    }

    if expected.read_line(&mut buf).unwrap() > 0 {
        panic!(
            "\n{} has more lines than output, beginning at line: {}",
            expected_file, line_num
        )
    }
}

/// A fresh, empty directory to write outlines into.
pub fn output_dir() -> PathBuf {
    let rand: u64 = rand::random();
    let dir = std::env::temp_dir().join(format!("trace-outline-test-{}", rand));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// The sorted names of the files in `dir`.
pub fn file_names<P: AsRef<Path>>(dir: P) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Checks that `output_dir` holds exactly the files in `results_dir`, with the same contents.
pub fn compare_dirs<P: AsRef<Path>>(output_dir: P, results_dir: &str) -> io::Result<()> {
    let output_dir = output_dir.as_ref();
    let names = file_names(output_dir)?;
    assert_eq!(
        names,
        file_names(results_dir)?,
        "\noutlines in {} differ from {}",
        output_dir.display(),
        results_dir
    );

    for name in names {
        let expected_file = Path::new(results_dir).join(&name);
        let result = BufReader::new(File::open(output_dir.join(&name))?);
        let expected = BufReader::new(File::open(&expected_file)?);
        compare_results(result, expected, &expected_file.display().to_string());
    }
    Ok(())
}

pub fn test_outline<O>(mut outliner: O, test_file: &str, results_dir: &str) -> io::Result<usize>
where
    O: Outline,
{
    if let Err(e) = fs::metadata(test_file) {
        eprintln!("Failed to open input file '{}'", test_file);
        return Err(e);
    }

    let dir = output_dir();
    let sink = DirSink::new(&dir)?;
    let written = outliner.outline_file(Some(test_file), &sink)?;
    eprintln!("test output in {}", dir.display());
    compare_dirs(&dir, results_dir)?;
    Ok(written)
}

/// The contents of every outline produced for `input_file`, sorted.
pub fn outline_contents<O>(mut outliner: O, input_file: &str) -> Vec<Vec<u8>>
where
    O: Outline,
{
    let sink = MemorySink::default();
    let r = BufReader::new(File::open(input_file).unwrap());
    outliner.outline(r, &sink).unwrap();
    let mut contents: Vec<_> = sink
        .into_outlines()
        .into_iter()
        .map(|(_, contents)| contents)
        .collect();
    contents.sort();
    contents
}

pub fn test_outline_logs<O, F>(mut outliner: O, input_file: &str, asserter: F)
where
    O: Outline,
    F: Fn(&Vec<CapturedLog>),
{
    testing_logger::setup();
    let r = BufReader::new(File::open(input_file).unwrap());
    outliner.outline(r, &MemorySink::default()).unwrap();
    testing_logger::validate(asserter);
}
