//! # audit - file integrity auditing from the command line
//!
//! Records a baseline of a directory, then reports what changed since.
//!
//! ## Usage
//! ```bash
//! # Record a baseline of /etc
//! audit /etc /var/lib/fsaudit/etc.db
//!
//! # Report changes since the baseline
//! audit /etc /var/lib/fsaudit/etc.db --compare
//!
//! # Ignore content, include access times
//! audit /etc /var/lib/fsaudit/etc.db --compare --nohash --atime
//!
//! # Machine-readable output
//! audit /etc /var/lib/fsaudit/etc.db --compare --format json
//! ```
//!
//! Only `NEW:`, `CHANGED:` and `DELETED:` lines go to stdout. Everything
//! else (banner, progress, summary, warnings, errors) goes to stderr.

use clap::{Arg, ArgAction, ArgMatches, CommandFactory, FromArgMatches, Parser, ValueEnum};
use colored::*;
use fsaudit::{
    format_bytes, Attribute, AttributeMask, AuditBuilder, AuditSummary, JsonReporter, ProgressInfo,
    Reporter, Result, ScanMode, TextReporter,
};
use humantime::format_duration;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Record a baseline of a directory tree and report changes against it
#[derive(Parser)]
#[command(name = "audit")]
#[command(version)]
#[command(about = "Record a baseline of a directory tree and report changes against it")]
#[command(
    after_help = "Attribute flags apply in order; the last mention of an attribute wins.\n\
                  By default every attribute except atime is compared."
)]
struct Cli {
    /// Directory to scan
    directory: String,

    /// Baseline database file
    baseline: String,

    /// Compare against the baseline instead of generating it
    #[arg(long)]
    compare: bool,

    /// Skip paths matching this glob (repeatable)
    #[arg(long, value_name = "GLOB")]
    exclude: Vec<String>,

    /// Event output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Show a progress spinner on stderr
    #[arg(long)]
    progress: bool,

    /// Print only events and errors
    #[arg(short, long)]
    quiet: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// One `--<attr>` and one `--no<attr>` switch per tracked attribute
///
/// The two switches of a pair override each other, so only the last mention
/// survives parsing.
fn attribute_args() -> Vec<Arg> {
    Attribute::ALL
        .iter()
        .flat_map(|attr| {
            let default = if attr.default_on() { " [default]" } else { "" };
            [
                Arg::new(attr.name())
                    .long(attr.name())
                    .action(ArgAction::SetTrue)
                    .overrides_with(attr.negated_name())
                    .help_heading("Attribute flags")
                    .help(format!("Report when the {}{}", attr.description(), default)),
                Arg::new(attr.negated_name())
                    .long(attr.negated_name())
                    .action(ArgAction::SetTrue)
                    .overrides_with(attr.name())
                    .help_heading("Attribute flags")
                    .help(format!("Ignore {}", attr.description())),
            ]
        })
        .collect()
}

fn attribute_mask(matches: &ArgMatches) -> Result<AttributeMask> {
    let mut mask = AttributeMask::default();
    for attr in Attribute::ALL {
        if matches.get_flag(attr.negated_name()) {
            mask.apply_flag(attr.negated_name())?;
        } else if matches.get_flag(attr.name()) {
            mask.apply_flag(attr.name())?;
        }
    }
    Ok(mask)
}

fn main() {
    let matches = Cli::command().args(attribute_args()).get_matches();
    let cli = match Cli::from_arg_matches(&matches) {
        Ok(cli) => cli,
        Err(e) => e.exit(),
    };

    init_logging(cli.verbose);

    if std::env::var_os("NO_COLOR").is_some() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(&cli, &matches) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli, matches: &ArgMatches) -> Result<()> {
    let mask = attribute_mask(matches)?;
    let mode = if cli.compare {
        ScanMode::Compare
    } else {
        ScanMode::Generate
    };

    let mut builder = AuditBuilder::new()
        .mask(mask)
        .exclude_patterns(cli.exclude.clone());

    let spinner = (cli.progress && !cli.quiet).then(new_spinner);
    if let Some(pb) = &spinner {
        let pb = pb.clone();
        builder = builder.progress_callback(Arc::new(move |info: ProgressInfo| {
            pb.set_message(format!(
                "{} files, {} hashed",
                info.processed,
                format_bytes(info.bytes_processed)
            ));
        }));
    }

    let session = builder.build(&cli.directory, &cli.baseline)?;
    let config = session.config();

    if !cli.quiet {
        eprintln!("{} {}", "Scanning directory".blue().bold(), config.root.cyan());
        match mode {
            ScanMode::Generate => eprintln!("{} {}", "Generating".blue().bold(), config.baseline_path.cyan()),
            ScanMode::Compare => eprintln!(
                "{} {}",
                "Comparing changes to".blue().bold(),
                config.baseline_path.cyan()
            ),
        }
        tracing::debug!("Attributes: {}", mask.names());
    }

    let mut reporter: Box<dyn Reporter> = match cli.format {
        OutputFormat::Text => Box::new(TextReporter::new(std::io::stdout())),
        OutputFormat::Json => Box::new(JsonReporter::new(std::io::stdout())),
    };

    let result = session.run(mode, reporter.as_mut());

    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let summary = result?;
    if !cli.quiet {
        print_summary(&summary);
    }
    Ok(())
}

fn new_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message("Scanning files...");
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn print_summary(summary: &AuditSummary) {
    // Whole milliseconds keep the duration readable
    let elapsed = Duration::from_millis(summary.duration.as_millis() as u64);

    match summary.mode {
        ScanMode::Generate => {
            eprintln!(
                "{} Recorded {} files",
                "✓".green().bold(),
                summary.files_scanned.to_string().cyan()
            );
        }
        ScanMode::Compare => {
            let mark = if summary.has_changes() {
                "!".yellow().bold()
            } else {
                "✓".green().bold()
            };
            eprintln!(
                "{} Compared {} files: {} new, {} changed, {} deleted",
                mark,
                summary.files_scanned.to_string().cyan(),
                summary.new.to_string().yellow(),
                summary.changed.to_string().yellow(),
                summary.deleted.to_string().yellow()
            );
        }
    }

    eprintln!("  Hashed: {}", format_bytes(summary.bytes_hashed).cyan());
    eprintln!("  Time: {}", format_duration(elapsed).to_string().cyan());

    if summary.skipped() > 0 {
        eprintln!(
            "  Skipped: {} ({} unreadable files, {} unreadable directories, {} unstatable, {} special)",
            summary.skipped().to_string().yellow(),
            summary.unreadable_files,
            summary.unreadable_dirs,
            summary.unstatable_entries,
            summary.special_files
        );
    }
    if summary.non_utf8_names > 0 {
        eprintln!("  Escaped names: {}", summary.non_utf8_names);
    }
    if summary.excluded > 0 {
        eprintln!("  Excluded: {}", summary.excluded);
    }
}
