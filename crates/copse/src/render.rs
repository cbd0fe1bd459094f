//! Incremental table renderer
//!
//! Paints one row per worktree in three columns (identity, recency, detail)
//! and redraws the table region in place as results stream in. Column widths
//! are computed from the actual content, Unicode-aware, then squeezed or
//! stretched to the terminal width. When stdout is not an interactive
//! terminal the renderer is bypassed and callers print one final plain pass.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use console::{Style, Term, measure_text_width};

use copse_core::ProcessInfo;
use copse_core::git::Operation;
use copse_core::processes::summarize_processes;
use copse_core::timefmt;

pub const COLUMN_COUNT: usize = 3;
pub const COLUMN_GAP: &str = "   ";
const COLUMN_GAP_WIDTH: usize = 3;
const COLUMN_MIN_WIDTHS: [usize; COLUMN_COUNT] = [12, 8, 16];
/// Shrink detail first, then identity, then recency.
const SHRINK_PRIORITY: [usize; COLUMN_COUNT] = [2, 0, 1];

/// Everything one row needs to paint itself.
#[derive(Debug, Clone, Default)]
pub struct RowState {
    pub name: String,
    pub path: PathBuf,
    pub branch: String,
    pub dirty: bool,
    pub current: bool,
    pub operation: Option<Operation>,
    pub ahead: i64,
    pub behind: i64,
    pub timestamp: Option<DateTime<Utc>>,
    pub pr_label: String,
    pub ci_label: String,
    /// When set, replaces the PR/CI summary (tidy's action column)
    pub action_label: Option<String>,
    pub processes: Vec<ProcessInfo>,
    pub needs_input: bool,
    pub process_warn: bool,
    pub has_error: bool,
}

impl RowState {
    /// The detail cell: action when a command drives one, else PR/CI labels,
    /// with any blocking processes appended in parentheses.
    pub fn detail(&self) -> String {
        let mut text = match &self.action_label {
            Some(action) => action.clone(),
            None => {
                let mut parts: Vec<&str> = Vec::new();
                if !self.pr_label.is_empty() {
                    parts.push(&self.pr_label);
                }
                if !self.ci_label.is_empty() {
                    parts.push(&self.ci_label);
                }
                parts.join("  ")
            }
        };
        if !self.processes.is_empty() {
            let summary = summarize_processes(&self.processes, 40);
            if summary != "-" {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&format!("({})", summary));
            }
        }
        text
    }
}

/// Plain (uncolored) cell contents for one row.
pub fn row_fields(row: &RowState, now: DateTime<Utc>) -> [String; COLUMN_COUNT] {
    let marker = if row.current { "* " } else { "  " };

    let mut badge = String::new();
    if !row.branch.is_empty() && row.branch != row.name {
        badge.push_str(&row.branch);
    }
    if row.dirty {
        badge.push('!');
    }
    let delta = format_delta(row.ahead, row.behind);
    if !delta.is_empty() {
        if !badge.is_empty() {
            badge.push(' ');
        }
        badge.push_str(&delta);
    }
    if let Some(op) = row.operation {
        if !badge.is_empty() {
            badge.push(' ');
        }
        badge.push_str(op.label());
    }

    let mut identity = format!("{}{}", marker, row.name);
    if !badge.is_empty() {
        identity.push(' ');
        identity.push_str(&badge);
    }

    [
        identity,
        timefmt::relative(row.timestamp, now),
        row.detail(),
    ]
}

pub fn format_delta(ahead: i64, behind: i64) -> String {
    let mut parts = Vec::new();
    if ahead > 0 {
        parts.push(format!("↑{}", ahead));
    }
    if behind > 0 {
        parts.push(format!("↓{}", behind));
    }
    parts.join(" ")
}

/// Fixed column widths for one paint, plus whether styling applies.
#[derive(Debug, Clone, Copy)]
pub struct ColumnLayout {
    pub widths: [usize; COLUMN_COUNT],
    pub color: bool,
}

impl ColumnLayout {
    pub fn total_width(&self) -> usize {
        self.widths.iter().sum::<usize>() + (COLUMN_COUNT - 1) * COLUMN_GAP_WIDTH
    }
}

/// Measure every cell, enforce minimums, then fit the terminal: shrink in
/// priority order down to minimums, or grow the last column to absorb any
/// surplus.
pub fn build_layout(rows: &[RowState], now: DateTime<Utc>, max_width: Option<usize>) -> ColumnLayout {
    let mut widths = [0usize; COLUMN_COUNT];
    for row in rows {
        for (i, field) in row_fields(row, now).iter().enumerate() {
            widths[i] = widths[i].max(measure_text_width(field));
        }
    }
    for (i, min) in COLUMN_MIN_WIDTHS.iter().enumerate() {
        widths[i] = widths[i].max(*min);
    }

    let mut layout = ColumnLayout {
        widths,
        color: false,
    };
    if let Some(max_width) = max_width {
        shrink_widths(&mut layout.widths, max_width);
        let total = layout.total_width();
        if total < max_width {
            layout.widths[COLUMN_COUNT - 1] += max_width - total;
        }
    }
    layout
}

fn shrink_widths(widths: &mut [usize; COLUMN_COUNT], max_width: usize) {
    let total = |w: &[usize; COLUMN_COUNT]| {
        w.iter().sum::<usize>() + (COLUMN_COUNT - 1) * COLUMN_GAP_WIDTH
    };
    let mut excess = total(widths).saturating_sub(max_width);
    while excess > 0 {
        let mut shrunk = false;
        for &idx in &SHRINK_PRIORITY {
            if widths[idx] > COLUMN_MIN_WIDTHS[idx] {
                widths[idx] -= 1;
                excess -= 1;
                shrunk = true;
                if excess == 0 {
                    break;
                }
            }
        }
        if !shrunk {
            break;
        }
    }
}

/// Pad or truncate `text` to exactly `width` display columns. Truncation
/// substitutes "…", keeping a trailing ")" visible as "…)" so parenthesized
/// state annotations stay legible. Never splits a multi-column glyph.
pub fn pad_or_trim(text: &str, width: usize) -> String {
    if width == 0 {
        return String::new();
    }
    let text_width = measure_text_width(text);
    if text_width <= width {
        let mut out = text.to_string();
        out.push_str(&" ".repeat(width - text_width));
        return out;
    }

    let indicator = if text.ends_with(')') && width > 1 { "…)" } else { "…" };
    let indicator_width = measure_text_width(indicator);
    if indicator_width >= width {
        return truncate_to_width(indicator, width);
    }

    let keep = width - indicator_width;
    let mut out = truncate_to_width(text, keep);
    out.push_str(indicator);
    let out_width = measure_text_width(&out);
    if out_width < width {
        out.push_str(&" ".repeat(width - out_width));
    }
    out
}

/// Longest prefix of `text` that fits in `width` display columns.
fn truncate_to_width(text: &str, width: usize) -> String {
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let mut buf = [0u8; 4];
        let ch_width = measure_text_width(ch.encode_utf8(&mut buf));
        if used + ch_width > width {
            break;
        }
        out.push(ch);
        used += ch_width;
    }
    out
}

/// Styles injected into the renderer; built once from color detection.
#[derive(Debug, Clone)]
pub struct Theme {
    pub identity_current: Style,
    pub identity_operation: Style,
    pub identity_dirty: Style,
    pub identity_diverged: Style,
    pub identity_clean: Style,
    pub recency: Style,
    pub detail_error: Style,
    pub detail_warn: Style,
    pub detail_input: Style,
    pub detail_ci_fail: Style,
    pub detail_ci_pending: Style,
    pub detail_pr_merged: Style,
    pub detail_pr_open: Style,
    pub detail_pr_none: Style,
    pub detail_plain: Style,
}

impl Theme {
    /// Colored theme for interactive terminals.
    pub fn colored() -> Theme {
        Theme {
            identity_current: Style::new().blue().bold(),
            identity_operation: Style::new().yellow(),
            identity_dirty: Style::new().red(),
            identity_diverged: Style::new().magenta(),
            identity_clean: Style::new(),
            recency: Style::new().dim(),
            detail_error: Style::new().red(),
            detail_warn: Style::new().yellow(),
            detail_input: Style::new().cyan(),
            detail_ci_fail: Style::new().red(),
            detail_ci_pending: Style::new().yellow(),
            detail_pr_merged: Style::new().green(),
            detail_pr_open: Style::new().magenta(),
            detail_pr_none: Style::new().dim(),
            detail_plain: Style::new(),
        }
    }

    /// Style-free theme; content is identical either way.
    pub fn plain() -> Theme {
        Theme {
            identity_current: Style::new(),
            identity_operation: Style::new(),
            identity_dirty: Style::new(),
            identity_diverged: Style::new(),
            identity_clean: Style::new(),
            recency: Style::new(),
            detail_error: Style::new(),
            detail_warn: Style::new(),
            detail_input: Style::new(),
            detail_ci_fail: Style::new(),
            detail_ci_pending: Style::new(),
            detail_pr_merged: Style::new(),
            detail_pr_open: Style::new(),
            detail_pr_none: Style::new(),
            detail_plain: Style::new(),
        }
    }

    fn identity_style(&self, row: &RowState) -> &Style {
        if row.current {
            &self.identity_current
        } else if row.operation.is_some() {
            &self.identity_operation
        } else if row.dirty {
            &self.identity_dirty
        } else if row.ahead > 0 || row.behind > 0 {
            &self.identity_diverged
        } else {
            &self.identity_clean
        }
    }

    fn detail_style(&self, row: &RowState, detail: &str) -> &Style {
        let lower = detail.to_lowercase();
        if row.has_error || lower.contains("unavailable") {
            return &self.detail_error;
        }
        if row.process_warn {
            return &self.detail_warn;
        }
        if row.needs_input {
            return &self.detail_input;
        }
        if row.ci_label.starts_with("CI✗") || row.ci_label.starts_with("CI?") {
            return &self.detail_ci_fail;
        }
        if row.ci_label.starts_with("CI◷") {
            return &self.detail_ci_pending;
        }
        if lower.contains("merged") {
            return &self.detail_pr_merged;
        }
        if lower.contains("open") || lower.contains("draft") || lower.contains("pending") {
            return &self.detail_pr_open;
        }
        if lower.contains("none") {
            return &self.detail_pr_none;
        }
        &self.detail_plain
    }
}

/// Render one row into a padded, optionally styled line.
pub fn format_row(row: &RowState, layout: &ColumnLayout, theme: &Theme, now: DateTime<Utc>) -> String {
    let fields = row_fields(row, now);
    let mut cells: Vec<String> = fields
        .iter()
        .enumerate()
        .map(|(i, field)| pad_or_trim(field, layout.widths[i]))
        .collect();
    if layout.color {
        cells[0] = theme.identity_style(row).apply_to(&cells[0]).to_string();
        cells[1] = theme.recency.apply_to(&cells[1]).to_string();
        cells[2] = theme
            .detail_style(row, &fields[2])
            .apply_to(&cells[2])
            .to_string();
    }
    cells.join(COLUMN_GAP)
}

/// Print a final, non-incremental pass (non-interactive output).
pub fn print_rows(
    out: &mut impl Write,
    rows: &[RowState],
    layout: &ColumnLayout,
    theme: &Theme,
    now: DateTime<Utc>,
) -> std::io::Result<()> {
    for row in rows {
        writeln!(out, "{}", format_row(row, layout, theme, now))?;
    }
    Ok(())
}

/// Stateful in-place redraw of the table region.
pub struct Renderer {
    term: Term,
    theme: Theme,
    lines: usize,
}

impl Renderer {
    /// Build a live renderer for stdout, or None when stdout is not an
    /// interactive terminal (callers fall back to a single plain pass).
    pub fn try_new(theme: Theme) -> Option<Renderer> {
        let term = Term::stdout();
        if !term.is_term() {
            return None;
        }
        Some(Renderer {
            term,
            theme,
            lines: 0,
        })
    }

    /// Width available for layout computation.
    pub fn width(&self) -> usize {
        let (_, cols) = self.term.size();
        if cols == 0 { 80 } else { cols as usize }
    }

    /// Repaint every row, replacing the previous paint.
    pub fn render(&mut self, rows: &[RowState], layout: &ColumnLayout, now: DateTime<Utc>) {
        if self.lines > 0 {
            let _ = self.term.move_cursor_up(self.lines);
            let _ = self.term.clear_to_end_of_screen();
        }
        let mut count = 0;
        for row in rows {
            let line = format_row(row, layout, &self.theme, now);
            let _ = self.term.write_line(&line);
            count += 1;
        }
        self.lines = count;
    }

    /// Account for lines a prompt printed between paints so the next paint
    /// does not clobber them.
    pub fn add_extra_lines(&mut self, n: usize) {
        self.lines += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, 15, 9, 26).unwrap()
    }

    fn row(name: &str, detail: &str) -> RowState {
        RowState {
            name: name.to_string(),
            branch: name.to_string(),
            timestamp: Some(now() - chrono::Duration::minutes(30)),
            pr_label: detail.to_string(),
            ..RowState::default()
        }
    }

    #[test]
    fn test_pad_or_trim_exact_width_roundtrip() {
        for text in ["short", "exactly-ten", "a much longer cell that overflows", "日本語テキスト", ""] {
            for width in [1usize, 4, 10, 24] {
                let cell = pad_or_trim(text, width);
                assert_eq!(
                    measure_text_width(&cell),
                    width,
                    "text={text:?} width={width}"
                );
            }
        }
    }

    #[test]
    fn test_pad_or_trim_preserves_trailing_paren() {
        let cell = pad_or_trim("copse tidy (PR: pending)", 12);
        assert!(cell.ends_with("…)"), "{cell:?}");
        let cell = pad_or_trim("no trailing paren here", 12);
        assert!(cell.ends_with('…'), "{cell:?}");
    }

    #[test]
    fn test_pad_or_trim_never_splits_wide_glyphs() {
        // Each glyph is two columns; truncating to an odd width must pad
        // rather than emit half a glyph.
        let cell = pad_or_trim("ＡＢＣＤ", 5);
        assert_eq!(measure_text_width(&cell), 5);
        assert!(!cell.contains('\u{FFFD}'));
    }

    #[test]
    fn test_layout_shrinks_detail_first_and_respects_minimums() {
        let rows = vec![row(
            "whimsical-canoe",
            "PR #12 open  CI? gh api error: some very long message",
        )];
        let natural = build_layout(&rows, now(), None);
        let squeezed = build_layout(&rows, now(), Some(natural.total_width() - 10));
        assert!(squeezed.total_width() <= natural.total_width() - 10);
        assert!(squeezed.widths[2] < natural.widths[2]);
        for (i, min) in COLUMN_MIN_WIDTHS.iter().enumerate() {
            assert!(squeezed.widths[i] >= *min);
        }
    }

    #[test]
    fn test_layout_never_exceeds_requested_width() {
        let rows = vec![row("name", "detail")];
        let layout = build_layout(&rows, now(), Some(40));
        assert!(layout.total_width() <= 40.max(
            COLUMN_MIN_WIDTHS.iter().sum::<usize>() + (COLUMN_COUNT - 1) * COLUMN_GAP_WIDTH
        ));
    }

    #[test]
    fn test_layout_grows_last_column_to_fill() {
        let rows = vec![row("whimsical-canoe", "No PR")];
        let natural = build_layout(&rows, now(), None);
        let wide = natural.total_width() + 50;
        let layout = build_layout(&rows, now(), Some(wide));
        assert_eq!(layout.total_width(), wide);
        assert!(layout.widths[COLUMN_COUNT - 1] > natural.widths[COLUMN_COUNT - 1]);
    }

    #[test]
    fn test_row_fields_identity_badges() {
        let mut r = row("canoe", "PR: none");
        r.current = true;
        r.dirty = true;
        r.ahead = 2;
        r.behind = 1;
        let fields = row_fields(&r, now());
        assert_eq!(fields[0], "* canoe ! ↑2 ↓1");

        r.current = false;
        r.dirty = false;
        r.ahead = 0;
        r.behind = 0;
        r.branch = "feature/x".to_string();
        let fields = row_fields(&r, now());
        assert_eq!(fields[0], "  canoe feature/x");
        assert_eq!(fields[1], "30 min ago");
    }

    #[test]
    fn test_detail_appends_processes_in_parens() {
        let mut r = row("canoe", "PR #1 open");
        r.processes = vec![ProcessInfo {
            pid: 9,
            ppid: 1,
            command: "sleep 100".to_string(),
            cwd: "/w".to_string(),
        }];
        let detail = r.detail();
        assert!(detail.starts_with("PR #1 open ("), "{detail}");
        assert!(detail.ends_with(')'), "{detail}");
    }

    #[test]
    fn test_action_label_overrides_pr_ci() {
        let mut r = row("canoe", "PR #1 open");
        r.ci_label = "CI✓".to_string();
        r.action_label = Some("will clean".to_string());
        assert_eq!(r.detail(), "will clean");
    }

    #[test]
    fn test_format_row_plain_matches_colored_content() {
        let r = row("canoe", "PR #7 merged");
        let layout = build_layout(&[r.clone()], now(), None);
        let plain = format_row(&r, &layout, &Theme::plain(), now());
        let mut colored_layout = layout;
        colored_layout.color = true;
        let colored = format_row(&r, &colored_layout, &Theme::colored(), now());
        assert_eq!(console::strip_ansi_codes(&colored), plain);
    }
}
