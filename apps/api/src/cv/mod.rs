// CV upload: PDF text extraction and cleanup before the text is stored on an
// application.

pub mod handlers;

/// Largest accepted upload.
pub const MAX_CV_BYTES: usize = 10 * 1024 * 1024;

/// Collapses the whitespace noise PDF extraction leaves behind: trailing spaces,
/// runs of blank lines, form feeds, and non-breaking spaces. Line structure is kept.
pub fn clean_extracted_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut blank_run = false;

    for line in raw.split(['\n', '\u{c}']) {
        let line = line
            .replace('\u{a0}', " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        if line.is_empty() {
            if !lines.is_empty() && !blank_run {
                lines.push(String::new());
            }
            blank_run = true;
        } else {
            lines.push(line);
            blank_run = false;
        }
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_blank_runs_and_inner_spacing() {
        let raw = "\n\nJane   Doe \r\n\n\n\nRust\u{a0}engineer\u{c}Kafka\n\n";
        assert_eq!(clean_extracted_text(raw), "Jane Doe\n\nRust engineer\nKafka");
    }

    #[test]
    fn test_whitespace_only_input_is_empty() {
        assert_eq!(clean_extracted_text(" \n\t\n "), "");
    }
}
