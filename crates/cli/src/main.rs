//! deadbolt - remove permission restrictions and encryption from PDF files
//!
//! Writes an unlocked copy next to the input (`<stem>_unlocked.pdf`) unless
//! an output path is given. Exit codes: 0 success, 2 password required,
//! 3 incorrect password, 4 unsupported encryption, 1 anything else.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{ArgAction, Parser};
use deadbolt_core::error::{ErrorKind, PdfError};
use deadbolt_core::{Inspection, Strategy, Unlocked, Unlocker};
use memmap2::Mmap;
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Remove permission restrictions and encryption from a PDF file.
#[derive(Parser, Debug)]
#[command(name = "deadbolt")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the PDF file
    input: PathBuf,

    /// Where to write the unlocked file [default: <stem>_unlocked.pdf]
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Open password, for documents that cannot be opened without one
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// Render every page to an image instead of copying the document
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "fallback")]
    rasterize: bool,

    /// Rasterize when the document structure cannot be rebuilt
    #[arg(long, action = ArgAction::SetTrue)]
    fallback: bool,

    /// Raster resolution in pixels per point
    #[arg(long, default_value = "2.0")]
    scale: f64,

    /// Rasterizer threads (0 = one per core)
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Drop outlines, names, forms and other catalog entries
    #[arg(long = "pages-only", action = ArgAction::SetTrue)]
    pages_only: bool,

    /// Print a JSON report instead of a status line
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Report the protection of the file without writing anything
    #[arg(long, action = ArgAction::SetTrue)]
    inspect: bool,

    /// Use debug logging level
    #[arg(short = 'd', long, action = ArgAction::SetTrue)]
    debug: bool,
}

#[derive(Serialize)]
struct UnlockJson<'a> {
    status: &'static str,
    input: &'a Path,
    output: &'a Path,
    mode: &'static str,
    encryption: &'static str,
    page_count: usize,
    permissions_removed: &'a [&'static str],
    revision: Option<i64>,
    repaired: bool,
}

#[derive(Serialize)]
struct InspectJson<'a> {
    status: &'static str,
    input: &'a Path,
    version: &'a str,
    encryption: &'static str,
    revision: Option<i64>,
    key_length_bits: Option<usize>,
    restrictions: &'a [&'static str],
    password_required: bool,
    page_count: Option<usize>,
    object_count: usize,
    repaired: bool,
}

#[derive(Serialize)]
struct ErrorJson {
    status: &'static str,
    kind: &'static str,
    message: String,
}

fn init_logging(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// `report.pdf` -> `report_unlocked.pdf`, in the same directory.
fn default_output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    input.with_file_name(format!("{stem}_unlocked.pdf"))
}

fn read_input(path: &Path) -> Result<Bytes> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    // SAFETY: the mapping is read-only and the file is not modified while
    // the engine runs.
    let mmap = unsafe { Mmap::map(&file) }
        .with_context(|| format!("cannot read {}", path.display()))?;
    debug!(path = %path.display(), size = mmap.len(), "input mapped");
    Ok(Bytes::from_owner(mmap))
}

fn build_unlocker(args: &Args) -> Unlocker {
    let mut unlocker = Unlocker::new()
        .strategy(if args.rasterize {
            Strategy::Rasterize
        } else if args.fallback {
            Strategy::StructuralThenRaster
        } else {
            Strategy::Structural
        })
        .scale(args.scale)
        .threads(args.threads)
        .carry_catalog(!args.pages_only);
    if let Some(password) = &args.password {
        unlocker = unlocker.password(password);
    }
    unlocker
}

fn run(args: &Args) -> Result<()> {
    let data = read_input(&args.input)?;
    let unlocker = build_unlocker(args);

    if args.inspect {
        let inspection = unlocker.inspect(data)?;
        print_inspection(args, &inspection)?;
        return Ok(());
    }

    let unlocked = unlocker.unlock(data)?;
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input));
    std::fs::write(&output, &unlocked.bytes)
        .with_context(|| format!("cannot write {}", output.display()))?;
    print_unlocked(args, &output, &unlocked)
}

fn print_unlocked(args: &Args, output: &Path, unlocked: &Unlocked) -> Result<()> {
    let report = &unlocked.report;
    if args.json {
        let json = UnlockJson {
            status: "ok",
            input: &args.input,
            output,
            mode: unlocked.status.as_str(),
            encryption: report.encryption,
            page_count: report.page_count,
            permissions_removed: &report.permissions_removed,
            revision: report.revision,
            repaired: report.repaired,
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    let removed = if report.permissions_removed.is_empty() {
        "none".to_string()
    } else {
        report.permissions_removed.join(", ")
    };
    println!(
        "{} -> {} ({}, {} pages, restrictions removed: {removed})",
        args.input.display(),
        output.display(),
        unlocked.status.as_str(),
        report.page_count
    );
    Ok(())
}

fn print_inspection(args: &Args, inspection: &Inspection) -> Result<()> {
    if args.json {
        let json = InspectJson {
            status: "ok",
            input: &args.input,
            version: &inspection.version,
            encryption: inspection.encryption,
            revision: inspection.revision,
            key_length_bits: inspection.key_length_bits,
            restrictions: &inspection.restrictions,
            password_required: inspection.password_required,
            page_count: inspection.page_count,
            object_count: inspection.object_count,
            repaired: inspection.repaired,
        };
        println!("{}", serde_json::to_string_pretty(&json)?);
        return Ok(());
    }

    println!("File:          {}", args.input.display());
    println!("PDF version:   {}", inspection.version);
    println!("Encryption:    {}", inspection.encryption);
    if let Some(revision) = inspection.revision {
        let bits = inspection.key_length_bits.unwrap_or_default();
        println!("Handler:       standard, revision {revision}, {bits}-bit key");
    }
    if !inspection.restrictions.is_empty() {
        println!("Restrictions:  {}", inspection.restrictions.join(", "));
    }
    match inspection.page_count {
        Some(pages) => println!("Pages:         {pages}"),
        None => println!("Pages:         unknown (open password required)"),
    }
    if inspection.repaired {
        println!("Note:          cross-reference data was damaged; objects were recovered by scanning");
    }
    Ok(())
}

fn exit_code(kind: Option<ErrorKind>) -> u8 {
    match kind {
        Some(ErrorKind::PasswordRequired) => 2,
        Some(ErrorKind::IncorrectPassword) => 3,
        Some(ErrorKind::UnsupportedEncryption) => 4,
        _ => 1,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    let Err(err) = run(&args) else {
        return ExitCode::SUCCESS;
    };
    let engine_error = err.downcast_ref::<PdfError>();
    let kind = engine_error.map(PdfError::kind);
    let message = match engine_error {
        Some(e) => e.user_message().to_string(),
        None => format!("{err:#}"),
    };
    if args.json {
        let json = ErrorJson {
            status: "error",
            kind: kind.map_or("other", ErrorKind::as_str),
            message,
        };
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{text}"),
            Err(e) => eprintln!("Error: {e}"),
        }
    } else {
        eprintln!("Error: {message}");
        debug!(error = %err, "details");
    }
    ExitCode::from(exit_code(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_sits_next_to_input() {
        assert_eq!(
            default_output_path(Path::new("/tmp/in/report.final.pdf")),
            PathBuf::from("/tmp/in/report.final_unlocked.pdf")
        );
        assert_eq!(
            default_output_path(Path::new("scan")),
            PathBuf::from("scan_unlocked.pdf")
        );
    }

    #[test]
    fn exit_codes_follow_error_kind() {
        assert_eq!(exit_code(Some(ErrorKind::PasswordRequired)), 2);
        assert_eq!(exit_code(Some(ErrorKind::IncorrectPassword)), 3);
        assert_eq!(exit_code(Some(ErrorKind::UnsupportedEncryption)), 4);
        assert_eq!(exit_code(Some(ErrorKind::CyclicPageTree)), 1);
        assert_eq!(exit_code(None), 1);
    }

    #[test]
    fn flags_pick_the_strategy() {
        let args = Args::parse_from(["deadbolt", "in.pdf", "--fallback", "-P", "pw"]);
        let unlocker = build_unlocker(&args);
        assert_eq!(unlocker.options().strategy, Strategy::StructuralThenRaster);
        assert_eq!(unlocker.options().password.as_deref(), Some("pw"));

        let args = Args::parse_from(["deadbolt", "in.pdf", "--rasterize", "--scale", "1"]);
        let unlocker = build_unlocker(&args);
        assert_eq!(unlocker.options().strategy, Strategy::Rasterize);
        assert_eq!(unlocker.options().raster.scale, 1.0);

        assert!(Args::try_parse_from(["deadbolt", "in.pdf", "--rasterize", "--fallback"]).is_err());
    }
}
