use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};

use redline::diff::edits_from_texts;
use redline::models::parse_edits_json;
use redline::progress::ConsoleProgress;
use redline::{apply_edits, open_document, save_document, Edit, EditOperation};

#[derive(Parser, Debug)]
#[command(name = "redline")]
#[command(about = "Apply tracked-change edits to .docx documents", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Suppress status output
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the flat text of a document
    Extract {
        /// Input .docx
        input: PathBuf,
        /// Output text file (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Compare a document against a revised document or plain-text file
    Diff {
        /// Original .docx
        original: PathBuf,
        /// Revised .docx or .txt
        modified: PathBuf,
        /// Emit the edits as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Apply edits to a document as tracked changes
    Apply {
        /// Original .docx
        original: PathBuf,
        /// JSON edit list or revised plain-text file
        changes: PathBuf,
        /// Output .docx (default: <original>_redlined.docx)
        #[arg(short, long, value_name = "DOCX")]
        output: Option<PathBuf>,
        /// Author name recorded on revisions and comments
        #[arg(long, default_value = "Redline")]
        author: String,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);
    match args.command {
        Command::Extract { input, output } => run_extract(&input, output.as_deref()),
        Command::Diff {
            original,
            modified,
            json,
        } => run_diff(&original, &modified, json),
        Command::Apply {
            original,
            changes,
            output,
            author,
        } => run_apply(&progress, &original, &changes, output, &author),
    }
}

fn docx_flat_text(path: &Path) -> anyhow::Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read docx: {}", path.display()))?;
    let doc = open_document(&bytes).with_context(|| format!("open docx: {}", path.display()))?;
    Ok(doc.flat_text()?)
}

fn run_extract(input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let text = docx_flat_text(input)?;
    match output {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("write text: {}", path.display()))?
        }
        None => println!("{text}"),
    }
    Ok(())
}

fn run_diff(original: &Path, modified: &Path, json: bool) -> anyhow::Result<()> {
    let text_orig = docx_flat_text(original)?;
    let text_mod = if modified.extension().is_some_and(|e| e == "docx") {
        docx_flat_text(modified)?
    } else {
        fs::read_to_string(modified)
            .with_context(|| format!("read text: {}", modified.display()))?
    };

    let edits = edits_from_texts(&text_orig, &text_mod);
    if json {
        println!("{}", serde_json::to_string_pretty(&edits).context("encode edits")?);
        return Ok(());
    }

    eprintln!("Found {} changes:", edits.len());
    for e in &edits {
        match e.operation {
            EditOperation::Delete => println!("[-] {}", e.target),
            EditOperation::Insert => println!("[+] {}", e.new_text.as_deref().unwrap_or("")),
            EditOperation::Modify => println!(
                "[~] '{}' -> '{}'",
                e.target,
                e.new_text.as_deref().unwrap_or("")
            ),
        }
    }
    Ok(())
}

fn load_edits(original: &Path, changes: &Path) -> anyhow::Result<Vec<Edit>> {
    if changes.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")) {
        let json = fs::read_to_string(changes)
            .with_context(|| format!("read edits: {}", changes.display()))?;
        return Ok(parse_edits_json(&json)?);
    }
    let text_orig = docx_flat_text(original)?;
    let text_mod = fs::read_to_string(changes)
        .with_context(|| format!("read text: {}", changes.display()))?;
    Ok(edits_from_texts(&text_orig, &text_mod))
}

fn run_apply(
    progress: &ConsoleProgress,
    original: &Path,
    changes: &Path,
    output: Option<PathBuf>,
    author: &str,
) -> anyhow::Result<()> {
    let edits = load_edits(original, changes)?;
    progress.info(format!("applying {} edits", edits.len()));

    let bytes =
        fs::read(original).with_context(|| format!("read docx: {}", original.display()))?;
    let mut doc =
        open_document(&bytes).with_context(|| format!("open docx: {}", original.display()))?;
    let report = apply_edits(&mut doc, &edits, author, Utc::now()).context("apply edits")?;
    let out_bytes = save_document(&doc).context("save docx")?;

    let output = output.unwrap_or_else(|| default_output_for(original));
    fs::write(&output, out_bytes)
        .with_context(|| format!("write docx: {}", output.display()))?;

    progress.info(format!("saved {}", output.display()));
    progress.info(format!(
        "{} applied, {} skipped",
        report.applied,
        report.skipped.len()
    ));
    for skip in &report.skipped {
        progress.warn(format!(
            "skipped edit #{} ({:?}): {:?}",
            skip.index, skip.reason, skip.target
        ));
    }
    if !report.skipped.is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

fn default_output_for(original: &Path) -> PathBuf {
    let stem = original
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document");
    let dir = original.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!("{stem}_redlined.docx"))
}
