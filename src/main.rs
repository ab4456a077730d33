use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;

use abnf_gen::{
    generate::DEFAULT_DEPTH, Generator, Grammar, GrammarConfig, GrammarError, Result,
};

const STDIN_NAME: &str = "*standard input*";

/// Generate random test cases from an ABNF grammar
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Grammar files to read; standard input when none are given
    inputs: Vec<PathBuf>,

    /// Number of test cases to generate
    #[arg(short = 'n', long = "count", default_value_t = 1)]
    count: u32,

    /// Directory to write the cases into; standard output when omitted
    #[arg(short = 'd', long = "directory")]
    directory: Option<PathBuf>,

    /// Filename pattern for directory output; each run of '#' becomes
    /// the zero-padded case number
    #[arg(short = 'p', long = "pattern", default_value = "####.tst")]
    pattern: String,

    /// Steer the batch so every alternative and repetition boundary is
    /// exercised at least once
    #[arg(short = 'c', long = "coverage")]
    coverage: bool,

    /// Accept strict RFC 5234/7405 notation only
    #[arg(short = 'l', long = "legal")]
    legal: bool,

    /// Do not accept the RFC 7405 %s/%i literal prefixes
    #[arg(short = '7', long = "no-rfc7405")]
    no_rfc7405: bool,

    /// Recursion-depth budget per generated case
    #[arg(short = 'y', long = "depth", default_value_t = DEFAULT_DEPTH)]
    depth: u32,

    /// Seed the random sequence for reproducible output
    #[arg(short = 'r', long = "seed")]
    seed: Option<u64>,

    /// Start symbol; defaults to the first rule a real input defines
    #[arg(short = 's', long = "start")]
    start: Option<String>,

    /// Tentative grammar file: its rules apply only where the real
    /// inputs leave a name undefined
    #[arg(short = 't', long = "tentative")]
    tentative: Vec<PathBuf>,

    /// Reject <prose> elements instead of rendering them verbatim
    #[arg(short = 'u', long = "no-prose")]
    no_prose: bool,

    /// Do not preload the RFC 5234 core rules
    #[arg(short = 'x', long = "exclude-core")]
    exclude_core: bool,

    /// Print PREFIX and the seed in use to standard output
    #[arg(short = 'w', long = "write-seed", value_name = "PREFIX")]
    write_seed: Option<String>,

    /// Trace rule entry and exit on standard error
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Allow '_' in rule names
    #[arg(long = "underscore")]
    underscore: bool,
}

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();

    let seed = cli.seed.unwrap_or_else(default_seed);
    if cli.coverage && cli.seed.is_some() && cli.count > 1 {
        eprintln!(
            "warning: full coverage perturbs the random sequence; \
             the seed alone does not reproduce this batch"
        );
    }
    if let Some(prefix) = &cli.write_seed {
        println!("{prefix}{seed}");
    }

    let mut grammar = Grammar::new(GrammarConfig {
        legal: cli.legal,
        rfc7405: !cli.no_rfc7405,
        allow_prose: !cli.no_prose,
        underscore: cli.underscore,
    });

    if !cli.exclude_core {
        if let Err(err) = grammar.preload_core() {
            eprintln!("{err}");
            return 1;
        }
    }
    for path in &cli.tentative {
        if let Err(err) = add_input(&mut grammar, Some(path), true) {
            eprintln!("{err}");
            return 1;
        }
    }
    if cli.inputs.is_empty() {
        if let Err(err) = add_input(&mut grammar, None, false) {
            eprintln!("{err}");
            return 1;
        }
    } else {
        for path in &cli.inputs {
            if let Err(err) = add_input(&mut grammar, Some(path), false) {
                eprintln!("{err}");
                return 1;
            }
        }
    }

    if let Some(start) = &cli.start {
        grammar.set_start(start);
    }
    if let Err(err) = grammar.check() {
        eprintln!("{err}");
        return 1;
    }
    if !grammar.reporter.ok() {
        // The diagnostics are already on stderr.
        return 1;
    }

    if let Some(dir) = &cli.directory {
        if let Err(err) = fs::create_dir(dir) {
            if err.kind() != io::ErrorKind::AlreadyExists {
                eprintln!("{}: {err}", dir.display());
                return 1;
            }
        }
    }

    let mut generator = Generator::new(&grammar, seed)
        .depth(cli.depth)
        .full_coverage(cli.coverage)
        .verbose(cli.verbose);

    // Cases are numbered from 1; the first file under the default
    // pattern is 0001.tst.
    for index in 1..=cli.count {
        let outcome = match &cli.directory {
            Some(dir) => write_case(&mut generator, &dir.join(expand_pattern(&cli.pattern, index))),
            None => generator.generate_to(&mut io::stdout().lock()),
        };
        if let Err(err) = outcome {
            eprintln!("{err}");
            return 1;
        }
    }

    if grammar.reporter.ok() { 0 } else { 1 }
}

/// Parse one input into the grammar. Unreadable files go through the
/// reporter like any other grammar problem, so a batch of inputs keeps
/// going past a missing one.
fn add_input(grammar: &mut Grammar, path: Option<&Path>, tentative: bool) -> Result<()> {
    let outcome = match path {
        Some(path) => grammar.add_file(path, tentative),
        None => {
            let mut text = String::new();
            match io::stdin().read_to_string(&mut text) {
                Ok(_) => grammar.add_source(&text, STDIN_NAME, tentative),
                Err(err) => Err(GrammarError::Io(err)),
            }
        }
    };
    match outcome {
        Err(GrammarError::Io(err)) => {
            let name = match path {
                Some(path) => path.display().to_string(),
                None => STDIN_NAME.to_string(),
            };
            grammar.reporter.report(format!("{name}: {err}"))
        }
        other => other,
    }
}

fn write_case(generator: &mut Generator, path: &Path) -> Result<()> {
    let file = File::create(path).map_err(|err| {
        GrammarError::Io(io::Error::new(
            err.kind(),
            format!("{}: {err}", path.display()),
        ))
    })?;
    let mut out = BufWriter::new(file);
    generator.generate_to(&mut out)?;
    out.flush()?;
    Ok(())
}

/// Expand each run of `#` in the pattern to the zero-padded case
/// number, padded to the run's length.
fn expand_pattern(pattern: &str, index: u32) -> String {
    let mut expanded = String::new();
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '#' {
            let mut width = 1usize;
            while chars.peek() == Some(&'#') {
                chars.next();
                width += 1;
            }
            expanded.push_str(&format!("{index:0width$}"));
        } else {
            expanded.push(c);
        }
    }
    expanded
}

fn default_seed() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    now.wrapping_mul(u64::from(process::id()).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_expansion() {
        assert_eq!(expand_pattern("####.tst", 1), "0001.tst");
        assert_eq!(expand_pattern("####.tst", 7), "0007.tst");
        assert_eq!(expand_pattern("case-#.txt", 12), "case-12.txt");
        assert_eq!(expand_pattern("plain.txt", 3), "plain.txt");
        assert_eq!(expand_pattern("##-##", 5), "05-05");
    }
}
