use std::sync::Arc;

use credo_core::error::AppError;
use credo_core::traits::Cleaner;
use htmd::HtmlToMarkdown;

/// Agency pages are heavy on chrome: menus, cookie banners, embedded media.
const SKIPPED_TAGS: [&str; 12] = [
    "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg", "form",
    "button", "img",
];

/// Cap on the Markdown handed to the extractor.
const DEFAULT_MAX_CHARS: usize = 40_000;

/// HTML-to-Markdown cleaner using htmd.
#[derive(Clone)]
pub struct HtmdCleaner {
    converter: Arc<HtmlToMarkdown>,
    max_chars: usize,
}

impl HtmdCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(SKIPPED_TAGS.to_vec())
            .build();

        Self {
            converter: Arc::new(converter),
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

impl Default for HtmdCleaner {
    fn default() -> Self {
        Self::new()
    }
}

impl Cleaner for HtmdCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        let markdown = self
            .converter
            .convert(html)
            .map_err(|e| AppError::CleanerError(e.to_string()))?;

        let collapsed = collapse_blank_lines(&markdown);
        Ok(truncate_chars(collapsed, self.max_chars))
    }
}

fn collapse_blank_lines(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());
    let mut blank_run = 0;
    for line in markdown.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim().to_string()
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_rating_text() {
        let cleaner = HtmdCleaner::new();
        let html = "<h1>Petrobras</h1><p>Long-Term IDR: <b>BB</b> Outlook Stable</p>";
        let md = cleaner.clean(html).unwrap();
        assert!(md.contains("Petrobras"));
        assert!(md.contains("BB"));
        assert!(md.contains("Stable"));
    }

    #[test]
    fn drops_scripts_and_navigation() {
        let cleaner = HtmdCleaner::new();
        let html = "<nav>Menu</nav><p>Content</p><script>track()</script>";
        let md = cleaner.clean(html).unwrap();
        assert!(md.contains("Content"));
        assert!(!md.contains("track"));
        assert!(!md.contains("Menu"));
    }

    #[test]
    fn output_is_truncated_on_char_boundary() {
        let cleaner = HtmdCleaner::new().with_max_chars(5);
        let md = cleaner.clean("<p>Itaú Unibanco</p>").unwrap();
        assert_eq!(md, "Itaú ");
    }

    #[test]
    fn blank_runs_are_collapsed() {
        assert_eq!(collapse_blank_lines("a\n\n\n\nb\n"), "a\n\nb");
    }
}
