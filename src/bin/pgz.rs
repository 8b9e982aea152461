//! Command-line front end for `pgz`.
//!
//! A thin consumer of the library: argument parsing, opening files, and a
//! single call into [`pgz::ParGzWriter`] or [`pgz::ParGzReader`]. No codec
//! logic lives here.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use pgz::{Compression, GzIndex, ParGzReaderBuilder, ParGzWriterBuilder};

/// Compress or decompress FILEs in parallel, producing an indexed,
/// randomly-seekable multi-member gzip stream.
#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
    /// Input file; reads standard input if omitted.
    input: Option<PathBuf>,

    /// Decompress instead of compressing.
    #[clap(short, long)]
    decompress: bool,

    /// Write output here instead of standard output.
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Number of worker threads (0 = all available CPUs for compression,
    /// half for decompression).
    #[clap(short = 'p', long = "processes", default_value_t = 0)]
    processes: usize,

    /// Block size in bytes for splitting input into members.
    #[clap(short, long, default_value_t = pgz::DEFAULT_BLOCKSIZE)]
    blocksize: usize,

    /// Compression level, 0 (fastest) to 9 (smallest).
    #[clap(short, long, default_value_t = 9)]
    level: u32,

    /// Print the member index instead of compressing or decompressing.
    #[clap(short, long)]
    index: bool,
}

fn open_input(path: &Option<PathBuf>) -> io::Result<Box<dyn Read + Send>> {
    match path {
        Some(p) => Ok(Box::new(BufReader::new(File::open(p)?))),
        None => Ok(Box::new(BufReader::new(io::stdin()))),
    }
}

fn open_output(path: &Option<PathBuf>) -> io::Result<Box<dyn Write + Send>> {
    match path {
        Some(p) => Ok(Box::new(BufWriter::new(File::create(p)?))),
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}

fn run(args: Args) -> Result<(), pgz::GzpError> {
    if args.index {
        let path = args.input.as_ref().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "--index requires an input file (stdin isn't seekable)",
            )
        })?;
        let mut file = File::open(path)?;
        let index = GzIndex::build(&mut file)?;
        for line in index.show_index() {
            println!("{}", line);
        }
        return Ok(());
    }

    if args.decompress {
        let input = open_input(&args.input)?;
        let mut reader = ParGzReaderBuilder::new().thread(args.processes).build(input);
        let mut output = open_output(&args.output)?;
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read_data(&mut buf)?;
            if n == 0 {
                break;
            }
            output.write_all(&buf[..n])?;
        }
        output.flush()?;
    } else {
        let input = open_input(&args.input)?;
        let output = open_output(&args.output)?;
        let mut writer = ParGzWriterBuilder::new()
            .thread(args.processes)
            .blocksize(args.blocksize)
            .compression_level(Compression::new(args.level))
            .build(output);
        let mut reader = input;
        io::copy(&mut reader, &mut writer)?;
        writer.close()?;
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pgz: {}", e);
            ExitCode::FAILURE
        }
    }
}
