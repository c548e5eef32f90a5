// ─────────────────────────────────────────────────────────────────────────────
//  openshock-autoflasher :: styles  —  run state + status-coloured log lines
//
//  Every line is stamped [HH:MM:SS] and padded to the terminal width so the
//  whole row carries the background colour of the current state:
//
//    waiting   blue
//    flashing  yellow
//    done      green
//    error     red
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;

use colored::{Color, ColoredString, Colorize};

use crate::constants::{BANNER_WIDTH, DEFAULT_TERMINAL_WIDTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Waiting,
    Flashing,
    Done,
    Error,
}

impl RunState {
    /// (background, foreground)
    pub fn colors(self) -> (Color, Color) {
        match self {
            RunState::Waiting  => (Color::Blue,   Color::White),
            RunState::Flashing => (Color::Yellow, Color::Black),
            RunState::Done     => (Color::Green,  Color::Black),
            RunState::Error    => (Color::Red,    Color::White),
        }
    }

    pub fn paint(self, line: &str) -> ColoredString {
        let (bg, fg) = self.colors();
        line.color(fg).on_color(bg).bold()
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Waiting  => "waiting",
            RunState::Flashing => "flashing",
            RunState::Done     => "done",
            RunState::Error    => "error",
        })
    }
}

pub fn banner() -> String {
    "=".repeat(BANNER_WIDTH)
}

/// Usable line width: `$COLUMNS` minus a two-column margin.
pub fn line_width() -> usize {
    let cols = std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.trim().parse::<usize>().ok())
        .filter(|&c| c > 2)
        .unwrap_or(DEFAULT_TERMINAL_WIDTH);
    cols - 2
}

/// Split `text` into rows of at most `width` columns, padded to `width`.
///
/// Words are never broken; a single word longer than `width` gets a row of
/// its own and is left unpadded.
pub fn layout(text: &str, width: usize) -> Vec<String> {
    if text.chars().count() <= width {
        return vec![pad(text, width)];
    }

    let mut rows = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };

        if needed > width && !current.is_empty() {
            rows.push(pad(&current, width));
            current.clear();
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        rows.push(pad(&current, width));
    }
    rows
}

fn pad(line: &str, width: usize) -> String {
    let len = line.chars().count();
    format!("{}{}", line, " ".repeat(width.saturating_sub(len)))
}

/// Print one timestamped status line in the colours of `state`.
pub fn log_line(state: RunState, message: &str) {
    let stamp = chrono::Local::now().format("%H:%M:%S");
    let text  = format!("[{}] {}", stamp, message);
    for row in layout(&text, line_width()) {
        println!("{}", state.paint(&row));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn every_state_has_distinct_background() {
        let states = [RunState::Waiting, RunState::Flashing, RunState::Done, RunState::Error];
        for (i, a) in states.iter().enumerate() {
            for b in &states[i + 1..] {
                assert_ne!(a.colors().0, b.colors().0, "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn short_lines_are_padded_to_width() {
        assert_eq!(layout("[12:00:00] hi", 16), vec!["[12:00:00] hi   ".to_string()]);
    }

    #[test]
    fn long_lines_wrap_on_word_boundaries() {
        let rows = layout("[12:00:00] Available boards: alpha, beta-board, gamma", 20);
        assert_eq!(
            rows,
            vec![
                "[12:00:00] Available".to_string(),
                "boards: alpha,      ".to_string(),
                "beta-board, gamma   ".to_string(),
            ]
        );
    }

    #[test]
    fn overlong_words_are_not_split() {
        let rows = layout("a /dev/serial/by-id/usb-Silicon_Labs_CP2102 b", 10);
        assert_eq!(rows[1], "/dev/serial/by-id/usb-Silicon_Labs_CP2102");
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn banner_is_sixty_wide() {
        assert_eq!(banner().len(), 60);
    }
}
