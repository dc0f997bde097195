// Plain-text scoreboard rendering.
//
// Three steps: cut a fixed-size window around the row of interest, align the
// columns, then mark the row of interest. The output is meant for a monospace
// code block, so widths are counted in chars.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableStyle {
    /// Padding inside cells.
    pub fill: char,
    /// Padding for every second row. `None` keeps `fill`.
    pub alt_fill: Option<char>,
    /// Spaces between columns.
    pub spacing: usize,
    pub marker: char,
}

impl Default for TableStyle {
    fn default() -> Self {
        Self {
            fill: ' ',
            alt_fill: Some('.'),
            spacing: 2,
            marker: '@',
        }
    }
}

impl TableStyle {
    /// Fill used by data row `row`.
    pub fn fill_for(&self, row: usize) -> char {
        if row % 2 == 1 {
            self.alt_fill.unwrap_or(self.fill)
        } else {
            self.fill
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
    Center,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Text(String),
    Int(i64),
}

impl Cell {
    fn formatted(&self) -> String {
        match self {
            Cell::Text(text) => text.clone(),
            Cell::Int(n) => group_thousands(*n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub header: String,
    pub align: Align,
    pub max_width: Option<usize>,
    /// Fill chars always placed before the cell, outside its width.
    pub gutter: usize,
}

impl Column {
    pub fn new(header: &str, align: Align) -> Self {
        Self {
            header: header.to_string(),
            align,
            max_width: None,
            gutter: 0,
        }
    }

    pub fn max_width(mut self, width: usize) -> Self {
        self.max_width = Some(width);
        self
    }

    pub fn gutter(mut self, chars: usize) -> Self {
        self.gutter = chars;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTable {
    pub header: String,
    pub rows: Vec<String>,
    pub widths: Vec<usize>,
}

/// `1234567` -> `1,234,567`.
pub fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        grouped.push('-');
    }
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}

/// Slice of exactly `size` rows (when there are that many) centered on
/// `focus`, shifted inwards at either end. Returns the slice and the focus
/// row's position inside it.
pub fn window_rows<T>(rows: &[T], focus: usize, size: usize) -> (&[T], usize) {
    if rows.is_empty() {
        return (rows, 0);
    }
    let focus = focus.min(rows.len() - 1);
    if size == 0 || rows.len() <= size {
        return (rows, focus);
    }
    let start = focus.saturating_sub(size / 2).min(rows.len() - size);
    (&rows[start..start + size], focus - start)
}

pub fn render_table(columns: &[Column], rows: &[Vec<Cell>], style: &TableStyle) -> RenderedTable {
    let formatted: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(Cell::formatted).collect())
        .collect();

    let widths: Vec<usize> = columns
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let widest = formatted
                .iter()
                .filter_map(|row| row.get(i))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0);
            let width = widest.max(column.header.chars().count());
            column.max_width.map_or(width, |max| width.min(max))
        })
        .collect();

    let header_cells: Vec<String> = columns.iter().map(|c| c.header.clone()).collect();
    let header = render_line(columns, &widths, &header_cells, ' ', style.spacing);

    let rendered = formatted
        .iter()
        .enumerate()
        .map(|(i, cells)| render_line(columns, &widths, cells, style.fill_for(i), style.spacing))
        .collect();

    RenderedTable {
        header,
        rows: rendered,
        widths,
    }
}

fn render_line(
    columns: &[Column],
    widths: &[usize],
    cells: &[String],
    fill: char,
    spacing: usize,
) -> String {
    let gap = " ".repeat(spacing);
    columns
        .iter()
        .zip(widths)
        .enumerate()
        .map(|(i, (column, &width))| {
            let text = cells.get(i).map(String::as_str).unwrap_or("");
            let mut cell: String = std::iter::repeat(fill).take(column.gutter).collect();
            cell.push_str(&pad(text, width, column.align, fill));
            cell
        })
        .collect::<Vec<_>>()
        .join(&gap)
}

fn pad(text: &str, width: usize, align: Align, fill: char) -> String {
    let text: String = text.chars().take(width).collect();
    let slack = width - text.chars().count();
    let (left, right) = match align {
        Align::Left => (0, slack),
        Align::Right => (slack, 0),
        Align::Center => (slack / 2, slack - slack / 2),
    };
    let mut out = String::with_capacity(width);
    out.extend(std::iter::repeat(fill).take(left));
    out.push_str(&text);
    out.extend(std::iter::repeat(fill).take(right));
    out
}

/// Put `marker` on the leading fill char of the focus row. A row that starts
/// with cell text is left alone; give the first column a gutter so there is
/// always room. Returns whether the row was marked.
pub fn highlight_row(rows: &mut [String], focus: usize, style: &TableStyle) -> bool {
    let Some(row) = rows.get_mut(focus) else {
        return false;
    };
    let mut chars = row.chars();
    if chars.next() != Some(style.fill_for(focus)) {
        return false;
    }
    *row = std::iter::once(style.marker).chain(chars).collect();
    true
}

// ============================================================================
// LEADERBOARD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub member_id: u64,
    pub total_xp: u64,
    pub level: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedLeaderboard {
    /// Header first, then one line per entry in the window.
    pub lines: Vec<String>,
    /// Index into `lines` of the highlighted entry.
    pub focus_line: Option<usize>,
}

impl RenderedLeaderboard {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn to_code_block(&self) -> String {
        format!("```\n{}\n```", self.lines.join("\n"))
    }
}

pub fn render_leaderboard(
    entries: &[LeaderboardEntry],
    focus_member: Option<u64>,
    window_size: usize,
    style: &TableStyle,
    name_of: impl Fn(u64) -> String,
) -> RenderedLeaderboard {
    if entries.is_empty() {
        return RenderedLeaderboard::default();
    }

    let focus = focus_member.and_then(|id| entries.iter().position(|e| e.member_id == id));
    let (window, focus_in_window) = window_rows(entries, focus.unwrap_or(0), window_size);

    let columns = [
        Column::new("Rank", Align::Right).gutter(1),
        Column::new("Member", Align::Left).max_width(20),
        Column::new("Level", Align::Right),
        Column::new("XP", Align::Right),
    ];
    let rows: Vec<Vec<Cell>> = window
        .iter()
        .map(|entry| {
            vec![
                Cell::Int(i64::from(entry.rank)),
                Cell::Text(name_of(entry.member_id)),
                Cell::Int(i64::from(entry.level)),
                Cell::Int(i64::try_from(entry.total_xp).unwrap_or(i64::MAX)),
            ]
        })
        .collect();

    let mut table = render_table(&columns, &rows, style);
    let focus_line = focus.map(|_| {
        highlight_row(&mut table.rows, focus_in_window, style);
        focus_in_window + 1
    });

    let mut lines = Vec::with_capacity(table.rows.len() + 1);
    lines.push(table.header);
    lines.extend(table.rows);
    RenderedLeaderboard { lines, focus_line }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(n: u32) -> Vec<LeaderboardEntry> {
        (0..n)
            .map(|i| LeaderboardEntry {
                rank: i + 1,
                member_id: 100 + u64::from(i),
                total_xp: u64::from(n - i) * 1_000,
                level: n - i,
            })
            .collect()
    }

    #[test]
    fn thousands_are_grouped() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
        assert_eq!(group_thousands(-45_000), "-45,000");
    }

    #[test]
    fn window_is_clamped_at_the_tail() {
        let rows: Vec<u32> = (0..12).collect();
        let (window, focus) = window_rows(&rows, 10, 5);
        assert_eq!(window, &[7, 8, 9, 10, 11]);
        assert_eq!(window[focus], 10);

        let (window, focus) = window_rows(&rows, 11, 5);
        assert_eq!(window, &[7, 8, 9, 10, 11]);
        assert_eq!(focus, 4);
    }

    #[test]
    fn window_is_clamped_at_the_head_and_centered_in_the_middle() {
        let rows: Vec<u32> = (0..12).collect();
        assert_eq!(window_rows(&rows, 1, 5), (&rows[0..5], 1));
        assert_eq!(window_rows(&rows, 6, 5), (&rows[4..9], 2));
    }

    #[test]
    fn short_sequences_are_returned_whole() {
        let rows = [1, 2, 3];
        assert_eq!(window_rows(&rows, 2, 5), (&rows[..], 2));
        let empty: [u32; 0] = [];
        assert_eq!(window_rows(&empty, 0, 5).0.len(), 0);
    }

    #[test]
    fn columns_align_and_band() {
        let columns = [
            Column::new("#", Align::Right),
            Column::new("Name", Align::Left),
            Column::new("Pts", Align::Center),
        ];
        let rows = vec![
            vec![Cell::Int(1), Cell::Text("ann".into()), Cell::Int(12_345)],
            vec![Cell::Int(2), Cell::Text("bo".into()), Cell::Int(7)],
        ];
        let style = TableStyle {
            fill: ' ',
            alt_fill: Some('.'),
            spacing: 1,
            marker: '@',
        };
        let table = render_table(&columns, &rows, &style);

        assert_eq!(table.widths, vec![1, 4, 6]);
        assert_eq!(table.header, "# Name  Pts  ");
        assert_eq!(table.rows[0], "1 ann  12,345");
        assert_eq!(table.rows[1], "2 bo.. ..7...");
    }

    #[test]
    fn max_width_truncates_long_cells() {
        let columns = [Column::new("Name", Align::Left).max_width(5)];
        let rows = vec![vec![Cell::Text("bartholomew".into())]];
        let table = render_table(&columns, &rows, &TableStyle::default());
        assert_eq!(table.rows[0], "barth");
    }

    #[test]
    fn highlight_swaps_a_single_leading_fill_char() {
        let style = TableStyle {
            alt_fill: None,
            ..TableStyle::default()
        };
        let mut rows = vec!["   3  bob".to_string(), "  12  amy".to_string()];
        assert!(highlight_row(&mut rows, 1, &style));
        assert_eq!(rows[1], "@ 12  amy");
        assert_eq!(rows[0], "   3  bob");
        assert_eq!(rows[1].chars().count(), 9);
    }

    #[test]
    fn highlight_never_overwrites_cell_text() {
        let style = TableStyle::default();
        let mut rows = vec!["1,100  amy".to_string(), "amy    12".to_string()];
        assert!(!highlight_row(&mut rows, 0, &style));
        assert!(!highlight_row(&mut rows, 1, &style));
        assert_eq!(rows, vec!["1,100  amy".to_string(), "amy    12".to_string()]);
    }

    #[test]
    fn gutter_pads_before_the_cell() {
        let columns = [Column::new("#", Align::Left).gutter(1)];
        let rows = vec![vec![Cell::Text("ab".into())], vec![Cell::Text("c".into())]];
        let table = render_table(&columns, &rows, &TableStyle::default());
        assert_eq!(table.widths, vec![2]);
        assert_eq!(table.header, " # ");
        assert_eq!(table.rows, vec![" ab".to_string(), ".c.".to_string()]);
    }

    #[test]
    fn full_width_ranks_keep_their_digits_when_highlighted() {
        let board = render_leaderboard(
            &entries(1_200),
            Some(100 + 1_099),
            5,
            &TableStyle::default(),
            |id| format!("m{id}"),
        );
        let focus_line = board.focus_line.unwrap();
        let line = &board.lines[focus_line];
        assert!(line.starts_with("@1,100"), "{line}");
        assert!(line.contains("m1199"));
        let header_len = board.lines[0].chars().count();
        assert!(board.lines.iter().all(|l| l.chars().count() == header_len));
    }

    #[test]
    fn leaderboard_highlights_the_focus_member() {
        let board = render_leaderboard(
            &entries(12),
            Some(110),
            5,
            &TableStyle::default(),
            |id| format!("m{id}"),
        );
        assert_eq!(board.lines.len(), 6);
        let focus_line = board.focus_line.unwrap();
        assert_eq!(focus_line, 4);
        assert!(board.lines[focus_line].starts_with('@'));
        assert!(board.lines[focus_line].contains("m110"));
        assert!(board.lines.last().unwrap().contains("m111"));
    }

    #[test]
    fn leaderboard_without_focus_starts_at_the_top() {
        let board = render_leaderboard(&entries(8), Some(9), 5, &TableStyle::default(), |id| {
            id.to_string()
        });
        assert_eq!(board.focus_line, None);
        assert!(board.lines[1].contains("100"));
        assert!(!board.lines.iter().any(|l| l.starts_with('@')));
    }

    #[test]
    fn empty_leaderboard_renders_nothing() {
        let board = render_leaderboard(&[], Some(1), 5, &TableStyle::default(), |_| String::new());
        assert!(board.is_empty());
        assert_eq!(board.focus_line, None);
    }
}
