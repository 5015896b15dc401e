use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use rpuasm::constants::{MAX_CMD_EQUATES, PROCESSOR_NAME};
use rpuasm::{driver, listing, output, Config, CoreGen, Level, Session};

#[derive(Parser, Debug)]
#[command(name = "rpuasm", about = "RPU two-pass assembler", author)]
struct Cli {
    /// Core generation to assemble for (0-3)
    #[arg(short = 'V', long = "core", value_name = "GEN", default_value_t = 1)]
    core: u8,
    /// Assemble for a big endian core
    #[arg(short = 'E', long = "big-endian")]
    big_endian: bool,
    /// Create little endian binary output (*.bin)
    #[arg(short = 'b', long = "bin")]
    bin: bool,
    /// Create big endian binary output (*.bib)
    #[arg(short = 'B', long = "bib")]
    bib: bool,
    /// Create 'C array' binary output (*_bin.h)
    #[arg(short = 'c', long = "carray")]
    carray: bool,
    /// Create hex image output (*.img)
    #[arg(short = 'm', long = "img")]
    img: bool,
    /// Create raw listing file (*.lst)
    #[arg(short = 'l', long = "lst")]
    listing: bool,
    /// Create annotated source file style listing (*.txt)
    #[arg(short = 'L', long = "source-listing")]
    source_listing: bool,
    /// Do not show macro content in the annotated listing
    #[arg(short = 'n', long = "no-macros")]
    no_macros: bool,
    /// Use original macro source in the annotated listing (slower)
    #[arg(short = 'N', long = "original-macros")]
    original_macros: bool,
    /// Create debug database output (*.dbg)
    #[arg(short = 'd', long = "dbg")]
    dbg: bool,
    /// Enable debug messages
    #[arg(short = 'z', long = "trace")]
    trace: bool,
    /// Add a directory to the include search path
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    include_dirs: Vec<PathBuf>,
    /// Set equate NAME to 1, or to any value with NAME=VALUE
    #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]")]
    defines: Vec<String>,
    /// Name the array in 'C array' output
    #[arg(short = 'C', long = "carray-name", value_name = "NAME")]
    carray_name: Option<String>,
    /// Input source file
    #[arg(value_name = "INFILE")]
    input: PathBuf,
    /// Output base name (basename only, no extension)
    #[arg(value_name = "OUTBASE")]
    output: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut log_builder = env_logger::Builder::from_default_env();
    if cli.trace {
        log_builder.filter_level(log::LevelFilter::Debug);
    }
    log_builder.init();

    println!(
        "\n{} Assembler Version {}\n",
        PROCESSOR_NAME,
        env!("CARGO_PKG_VERSION")
    );

    let Some(core) = CoreGen::from_index(cli.core) else {
        eprintln!("Expected a core generation between 0 and 3");
        return ExitCode::FAILURE;
    };

    if cli.defines.len() > MAX_CMD_EQUATES {
        eprintln!("Too many command line equates");
        return ExitCode::FAILURE;
    }
    let defines = cli
        .defines
        .iter()
        .map(|d| match d.split_once('=') {
            Some((name, value)) => (name.to_owned(), value.to_owned()),
            None => (d.clone(), "1".to_owned()),
        })
        .collect();

    let outbase = match &cli.output {
        Some(base) => {
            if !valid_outbase(base) {
                eprintln!("Outfile should be basename only - no '.'");
                return ExitCode::FAILURE;
            }
            base.clone()
        }
        None => {
            let name = cli
                .input
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stem = name.split('.').next().unwrap_or("").to_owned();
            if stem.is_empty() {
                eprintln!("Cannot derive an output base name from the input file");
                return ExitCode::FAILURE;
            }
            stem
        }
    };
    log::debug!("Output base filename: '{}'", outbase);

    let mut carray = cli.carray;
    if !(cli.bin || cli.bib || carray || cli.img || cli.dbg) {
        println!("Note: Using default output '-c' (C array *_bin.h)\n");
        carray = true;
    }

    let cfg = Config {
        core,
        big_endian: cli.big_endian,
        bin: cli.bin,
        bib: cli.bib,
        carray,
        img: cli.img,
        dbg: cli.dbg,
        listing: cli.listing,
        source_listing: cli.source_listing,
        list_no_macros: cli.no_macros,
        list_original_macros: cli.original_macros,
        carray_name: cli.carray_name.clone(),
        include_dirs: cli.include_dirs.clone(),
        defines,
    };
    let mut session = Session::new(cfg);

    if cli.listing {
        let path = format!("{}.lst", outbase);
        match File::create(&path) {
            Ok(f) => session.listing = Some(Box::new(BufWriter::new(f))),
            Err(_) => {
                session
                    .rep
                    .report(None, Level::Error, &format!("Unable to open output file: {}", path));
                return ExitCode::FAILURE;
            }
        }
    }

    driver::assemble(&mut session, &cli.input);
    session.listing = None; // flush and close

    println!(
        "\nPass {} : {} Error(s), {} Warning(s)\n",
        session.pass, session.rep.errors, session.rep.warnings
    );

    if !output::have_output(&session) {
        return ExitCode::FAILURE;
    }
    println!("Writing Code Image of {} word(s)\n", session.code_offset);

    if session.cfg.carray {
        let name = session
            .cfg
            .carray_name
            .clone()
            .unwrap_or_else(output::default_carray_name);
        write_artifact(&mut session, &format!("{}_bin.h", outbase), |out, s| {
            output::write_carray(out, s, &name)
        });
    }
    if session.cfg.img {
        write_artifact(&mut session, &format!("{}.img", outbase), |out, s| {
            output::write_image_hex(out, s)
        });
    }
    if session.cfg.dbg {
        let path = format!("{}.dbg", outbase);
        let img = output::build_dbg(&session);
        if fs::write(&path, img.to_bytes()).is_err() {
            session
                .rep
                .report(None, Level::Error, &format!("Unable to open output file: {}", path));
        }
    }
    if session.cfg.source_listing {
        write_artifact(&mut session, &format!("{}.txt", outbase), |out, s| {
            listing::write_source_listing(out, s)
        });
    }
    if session.cfg.bin {
        write_artifact(&mut session, &format!("{}.bin", outbase), |out, s| {
            output::write_binary(out, s, false)
        });
    }
    if session.cfg.bib {
        write_artifact(&mut session, &format!("{}.bib", outbase), |out, s| {
            output::write_binary(out, s, true)
        });
    }

    if session.rep.errors > 0 {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// The output base may not carry an extension; `..` path steps are
/// still allowed.
fn valid_outbase(base: &str) -> bool {
    let b = base.as_bytes();
    let mut i = 0;
    while i < b.len() {
        if b[i] == b'.' {
            if b.get(i + 1) == Some(&b'.') {
                i += 1;
            } else {
                return false;
            }
        }
        i += 1;
    }
    true
}

fn write_artifact<F>(session: &mut Session, path: &str, write: F)
where
    F: FnOnce(&mut BufWriter<File>, &Session) -> io::Result<()>,
{
    let file = match File::create(path) {
        Ok(file) => file,
        Err(_) => {
            session
                .rep
                .report(None, Level::Error, &format!("Unable to open output file: {}", path));
            return;
        }
    };
    let mut out = BufWriter::new(file);
    let result = write(&mut out, session).and_then(|_| out.flush());
    if result.is_err() {
        session.rep.report(None, Level::Error, "File write error");
    }
}
