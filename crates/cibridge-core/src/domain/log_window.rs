//! Line-range views over console output.

use serde::{Deserialize, Serialize};

/// A slice of a build's console log as of one read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogWindow {
    /// Lines in head-to-tail order, without line terminators.
    pub lines: Vec<String>,

    /// Absolute index of the first returned line in the log as read.
    pub start_line: usize,

    /// Number of lines available when the log was read.
    pub total_lines_known: usize,

    /// The build had finished and the window reaches the last line.
    pub is_complete: bool,

    /// More lines may be read in the paging direction.
    pub has_more: bool,
}

impl LogWindow {
    /// Cut a window out of `text`.
    ///
    /// `skip` counts lines from the head, or from the tail when `from_end`
    /// is set. Skipping past either end yields an empty window.
    pub fn slice(
        text: &str,
        skip: usize,
        max_lines: usize,
        from_end: bool,
        build_finished: bool,
    ) -> Self {
        let all: Vec<&str> = text.lines().collect();
        let total = all.len();

        let (begin, end) = if from_end {
            let end = total - skip.min(total);
            (end - max_lines.min(end), end)
        } else {
            let begin = skip.min(total);
            (begin, begin.saturating_add(max_lines).min(total))
        };

        let has_more = if from_end {
            begin > 0
        } else {
            end < total || !build_finished
        };

        Self {
            lines: all[begin..end].iter().map(|l| l.to_string()).collect(),
            start_line: begin,
            total_lines_known: total,
            is_complete: build_finished && end == total,
            has_more,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> String {
        (1..=n).map(|i| format!("line {i}\n")).collect()
    }

    #[test]
    fn test_forward_window() {
        let window = LogWindow::slice(&numbered(20), 5, 3, false, true);
        assert_eq!(window.lines, vec!["line 6", "line 7", "line 8"]);
        assert_eq!(window.start_line, 5);
        assert_eq!(window.total_lines_known, 20);
        assert!(!window.is_complete);
        assert!(window.has_more);
    }

    #[test]
    fn test_whole_log_of_finished_build_is_complete() {
        let window = LogWindow::slice(&numbered(4), 0, 4, false, true);
        assert_eq!(window.lines.len(), 4);
        assert!(window.is_complete);
        assert!(!window.has_more);
    }

    #[test]
    fn test_running_build_is_never_complete() {
        let window = LogWindow::slice(&numbered(4), 0, 100, false, false);
        assert_eq!(window.lines.len(), 4);
        assert!(!window.is_complete);
        assert!(window.has_more);
    }

    #[test]
    fn test_tail_window_is_in_forward_order() {
        let window = LogWindow::slice(&numbered(10), 0, 3, true, true);
        assert_eq!(window.lines, vec!["line 8", "line 9", "line 10"]);
        assert_eq!(window.start_line, 7);
        assert!(window.is_complete);
        assert!(window.has_more);
    }

    #[test]
    fn test_tail_window_pages_upward() {
        let window = LogWindow::slice(&numbered(10), 3, 3, true, true);
        assert_eq!(window.lines, vec!["line 5", "line 6", "line 7"]);
        assert!(!window.is_complete);

        let top = LogWindow::slice(&numbered(10), 8, 5, true, true);
        assert_eq!(top.lines, vec!["line 1", "line 2"]);
        assert_eq!(top.start_line, 0);
        assert!(!top.has_more);
    }

    #[test]
    fn test_skipping_past_the_log_is_empty() {
        let window = LogWindow::slice(&numbered(5), 5, 10, false, true);
        assert!(window.is_empty());
        assert_eq!(window.start_line, 5);

        let window = LogWindow::slice(&numbered(5), 50, 10, true, false);
        assert!(window.is_empty());
        assert!(!window.is_complete);
        assert!(!window.has_more);
    }

    #[test]
    fn test_crlf_and_missing_trailing_newline() {
        let window = LogWindow::slice("a\r\nb\r\nc", 0, 10, false, true);
        assert_eq!(window.lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_log() {
        let window = LogWindow::slice("", 0, 10, true, true);
        assert!(window.is_empty());
        assert_eq!(window.total_lines_known, 0);
        assert!(window.is_complete);
    }
}
