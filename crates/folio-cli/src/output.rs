use std::io::Write;
use std::path::Path;

use folio_core::{CategoryStatus, Diagnostic, ExtractionResult, ProgressEvent};
use folio_ingest::PersistStats;
use folio_parsing::{PatternError, SystemProfile};
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// One-line progress bar message for an orchestrator event.
pub fn progress_message(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::Normalized { pages, chars } => {
            Some(format!("normalized {} pages ({} chars)", pages, chars))
        }
        ProgressEvent::CategoryStarted { category } => Some(format!("scanning {}", category)),
        ProgressEvent::CategoryFinished {
            category,
            accepted,
            candidates,
            ..
        } => Some(format!("{}: {}/{} blocks", category, accepted, candidates)),
        ProgressEvent::CategoryFailed { category, .. } => Some(format!("{} failed", category)),
        ProgressEvent::Abandoned { .. } => None,
    }
}

fn status_label(status: CategoryStatus, color: ColorMode) -> String {
    let (text, paint): (&str, fn(&str) -> String) = match status {
        CategoryStatus::Completed => ("ok", |s| s.green().to_string()),
        CategoryStatus::Failed => ("FAILED", |s| s.red().to_string()),
        CategoryStatus::Unsupported => ("unsupported", |s| s.yellow().to_string()),
        CategoryStatus::Abandoned => ("abandoned", |s| s.yellow().to_string()),
    };
    if color.enabled() {
        paint(text)
    } else {
        text.to_string()
    }
}

/// Header printed before the per-category table.
pub fn print_run_header(
    w: &mut dyn Write,
    file_name: &str,
    result: &ExtractionResult,
    color: ColorMode,
) -> std::io::Result<()> {
    if color.enabled() {
        writeln!(
            w,
            "{} {} (profile {})",
            "Extracted".bold(),
            file_name.bold(),
            result.system.cyan()
        )?;
    } else {
        writeln!(w, "Extracted {} (profile {})", file_name, result.system)?;
    }
    if result.used_fallback {
        let msg = "Unknown game system; the generic profile was used.";
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }
    writeln!(w)?;
    Ok(())
}

/// Per-category counts and status.
pub fn print_category_table(
    w: &mut dyn Write,
    result: &ExtractionResult,
    color: ColorMode,
) -> std::io::Result<()> {
    let width = result.status.keys().map(String::len).max().unwrap_or(8).max(8);
    for (category, status) in &result.status {
        let stats = result.stats.get(category).cloned().unwrap_or_default();
        let line = format!(
            "  {:<width$}  {:>4} records  ({} candidates, {} too short, {} missing fields, {} unnamed)",
            category,
            stats.accepted,
            stats.candidates,
            stats.too_short,
            stats.missing_required,
            stats.empty_name,
            width = width
        );
        if color.enabled() && stats.accepted == 0 {
            write!(w, "{}", line.dimmed())?;
        } else {
            write!(w, "{}", line)?;
        }
        writeln!(w, "  {}", status_label(*status, color))?;
    }
    Ok(())
}

/// Record names per category, for dry runs.
pub fn print_records(
    w: &mut dyn Write,
    result: &ExtractionResult,
    color: ColorMode,
) -> std::io::Result<()> {
    for (category, records) in &result.records {
        if records.is_empty() {
            continue;
        }
        writeln!(w)?;
        if color.enabled() {
            writeln!(w, "{}", category.bold())?;
        } else {
            writeln!(w, "{}", category)?;
        }
        for record in records {
            let page = record
                .page
                .map(|p| format!("p. {:<4}", p))
                .unwrap_or_else(|| " ".repeat(8));
            let sub = record.subcategory.as_deref().unwrap_or("-");
            if color.enabled() {
                writeln!(w, "  {} {} {}", page.dimmed(), record.name, format!("[{}]", sub).dimmed())?;
            } else {
                writeln!(w, "  {} {} [{}]", page, record.name, sub)?;
            }
        }
    }
    Ok(())
}

pub fn print_diagnostics(
    w: &mut dyn Write,
    diagnostics: &[Diagnostic],
    color: ColorMode,
) -> std::io::Result<()> {
    if diagnostics.is_empty() {
        return Ok(());
    }
    writeln!(w)?;
    for d in diagnostics {
        let scope = d.category.as_deref().unwrap_or("run");
        if color.enabled() {
            writeln!(w, "{} [{}] {}", "WARNING:".yellow(), scope, d.message)?;
        } else {
            writeln!(w, "WARNING: [{}] {}", scope, d.message)?;
        }
    }
    Ok(())
}

/// Totals line, plus where files went when they were written.
pub fn print_summary(
    w: &mut dyn Write,
    result: &ExtractionResult,
    persisted: Option<(&PersistStats, &Path)>,
    color: ColorMode,
) -> std::io::Result<()> {
    writeln!(w)?;
    let total = result.total_records();
    if color.enabled() {
        writeln!(w, "{} {}", "Total records:".bold(), total.to_string().green())?;
    } else {
        writeln!(w, "Total records: {}", total)?;
    }

    match persisted {
        Some((stats, root)) => {
            writeln!(
                w,
                "Saved {} records and {} images under {}",
                stats.saved,
                stats.assets,
                root.display()
            )?;
            if stats.failed > 0 {
                let msg = format!("{} records could not be saved", stats.failed);
                if color.enabled() {
                    writeln!(w, "{}", msg.red())?;
                } else {
                    writeln!(w, "{}", msg)?;
                }
            }
        }
        None => writeln!(w, "Dry run: nothing written")?,
    }

    if !result.complete {
        let msg = "Run was interrupted; results are partial.";
        if color.enabled() {
            writeln!(w, "{}", msg.yellow().bold())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }
    Ok(())
}

/// Profiles and their categories. Default categories are marked with `*`.
pub fn print_profiles(
    w: &mut dyn Write,
    profiles: &[SystemProfile],
    color: ColorMode,
) -> std::io::Result<()> {
    for profile in profiles {
        if color.enabled() {
            writeln!(w, "{} {}", profile.id().bold().cyan(), profile.label().dimmed())?;
        } else {
            writeln!(w, "{} ({})", profile.id(), profile.label())?;
        }
        for category in profile.categories() {
            let marker = if category.enabled_by_default { '*' } else { ' ' };
            let kind = profile
                .entity_kind(&category.id)
                .map(|k| k.as_str())
                .unwrap_or("?");
            writeln!(w, "  {} {:<12} {:<10} {}", marker, category.id, kind, category.label)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Result of compiling one profile's patterns.
pub fn print_validation(
    w: &mut dyn Write,
    profile: &SystemProfile,
    errors: &[PatternError],
    color: ColorMode,
) -> std::io::Result<()> {
    if errors.is_empty() {
        if color.enabled() {
            writeln!(w, "{} {}", "ok".green(), profile.id())?;
        } else {
            writeln!(w, "ok {}", profile.id())?;
        }
        return Ok(());
    }
    if color.enabled() {
        writeln!(w, "{} {}", "INVALID".red().bold(), profile.id())?;
    } else {
        writeln!(w, "INVALID {}", profile.id())?;
    }
    for e in errors {
        writeln!(w, "  {}", e)?;
    }
    Ok(())
}
