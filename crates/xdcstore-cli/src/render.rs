use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{HumanCount, ProgressBar, ProgressStyle};
use xdcstore_catalog::CatalogState;
use xdcstore_import::{ImportProgress, ImportReport};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputStyle {
    Plain,
    Rich,
}

pub fn resolve_output_style(stdout_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub fn current_output_style() -> OutputStyle {
    resolve_output_style(std::io::stdout().is_terminal())
}

pub fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => format!("{status} {message}"),
        OutputStyle::Rich => format!("{} {message}", colorize(status_style(status), status)),
    }
}

pub fn format_import_report(report: &ImportReport, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    for (status, app_ids) in [
        ("added", &report.added),
        ("updated", &report.updated),
        ("removed", &report.removed),
    ] {
        for app_id in app_ids {
            lines.push(render_status_line(style, status, app_id));
        }
    }

    let serial = if report.serial == report.previous_serial {
        format!("serial {} (unchanged)", report.serial)
    } else {
        format!("serial {} -> {}", report.previous_serial, report.serial)
    };
    lines.push(format!(
        "{} added, {} updated, {} unchanged, {} removed; {serial}",
        report.added.len(),
        report.updated.len(),
        report.unchanged.len(),
        report.removed.len()
    ));
    lines
}

pub fn format_catalog_lines(state: &CatalogState, style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::with_capacity(state.len() + 1);
    lines.push(format!("serial {}, {} apps", state.serial(), state.len()));
    for record in state.records() {
        let detail = format!(
            "{} {} ({}, serial {}, {} bytes)",
            record.info.app_id,
            record.info.tag_name,
            record.info.name,
            record.updated_serial,
            record.artifact.size
        );
        lines.push(match style {
            OutputStyle::Plain => detail,
            OutputStyle::Rich => format!("{} {detail}", colorize(bullet_style(), "-")),
        });
    }
    lines
}

/// Draws an indicatif bar while an import materializes its entries.
pub struct TerminalImportProgress {
    style: OutputStyle,
    total: u64,
    current: u64,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl TerminalImportProgress {
    pub fn new(style: OutputStyle) -> Self {
        Self {
            style,
            total: 0,
            current: 0,
            progress_bar: None,
            started_at: Instant::now(),
        }
    }
}

impl ImportProgress for TerminalImportProgress {
    fn start(&mut self, total: usize) {
        self.total = total as u64;
        self.current = 0;
        self.started_at = Instant::now();
        if self.style != OutputStyle::Rich {
            return;
        }

        let progress_bar = ProgressBar::new(self.total.max(1));
        if let Ok(style) = ProgressStyle::with_template(
            "{spinner:.cyan.bold} {msg:<20} [{bar:20.cyan/blue}] {pos:>3}/{len:3} {elapsed_precise}",
        ) {
            progress_bar.set_style(style.tick_chars("<^>v ").progress_chars("=>-"));
        }
        progress_bar.set_message("import");
        progress_bar.enable_steady_tick(Duration::from_millis(80));
        self.progress_bar = Some(progress_bar);
    }

    fn entry(&mut self, app_id: &str) {
        self.current = (self.current + 1).min(self.total);
        if let Some(progress_bar) = &self.progress_bar {
            progress_bar.set_message(app_id.to_string());
            progress_bar.set_position(self.current);
        }
    }

    fn finish(&mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };
        progress_bar.finish_and_clear();
        println!(
            "{}",
            render_progress_line(self.current, self.total, self.started_at.elapsed())
        );
    }
}

impl Drop for TerminalImportProgress {
    fn drop(&mut self) {
        if let Some(progress_bar) = self.progress_bar.take() {
            progress_bar.finish_and_clear();
        }
    }
}

fn render_progress_line(current: u64, total: u64, elapsed: Duration) -> String {
    let width = 18_usize;
    let safe_total = total.max(1);
    let bounded_current = current.min(safe_total);
    let filled = ((bounded_current as usize) * width) / (safe_total as usize);
    let bar = format!(
        "{}{}",
        "=".repeat(filled),
        "-".repeat(width.saturating_sub(filled))
    );
    format!(
        "{} [{}] {}/{} read in {}",
        colorize(progress_label_style(), "import"),
        colorize(progress_bar_style(), &bar),
        HumanCount(current),
        HumanCount(total),
        format_elapsed(elapsed)
    )
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn status_style(status: &str) -> Style {
    let color = match status {
        "added" => AnsiColor::BrightGreen,
        "updated" => AnsiColor::BrightCyan,
        "removed" => AnsiColor::BrightYellow,
        "error" => AnsiColor::BrightRed,
        _ => AnsiColor::BrightBlue,
    };
    Style::new()
        .fg_color(Some(color.into()))
        .effects(Effects::BOLD)
}

fn bullet_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn progress_label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn progress_bar_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightBlue.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
