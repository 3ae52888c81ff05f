use crate::error::{CleanError, IngestError};
use crate::extractor::PageText;
use regex::Regex;
use std::borrow::Cow;
use tracing::warn;

const CONTROL_CHARS: &str = r"[\x00-\x1F\x7F-\x9F]";
const WHITESPACE_RUN: &str = r"\s+";
const NON_SEMANTIC: &str = r#"[^\w\s.'"]"#;

/// Re-decodes raw bytes, replacing invalid sequences with U+FFFD.
pub fn decode_lossy(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

/// Drops characters outside the basic multilingual plane.
pub fn strip_astral(text: &str) -> String {
    text.chars().filter(|c| (*c as u32) <= 0xFFFF).collect()
}

#[derive(Debug, Clone)]
pub struct TextCleaner {
    control_chars: Regex,
    whitespace_run: Regex,
    non_semantic: Regex,
    max_page_chars: usize,
}

impl TextCleaner {
    pub fn new(max_page_chars: usize) -> Result<Self, IngestError> {
        Ok(Self {
            control_chars: Regex::new(CONTROL_CHARS)?,
            whitespace_run: Regex::new(WHITESPACE_RUN)?,
            non_semantic: Regex::new(NON_SEMANTIC)?,
            max_page_chars,
        })
    }

    /// Lossy decode, BMP filter and control stripping. Newlines are removed too.
    pub fn sanitize(&self, raw: &[u8]) -> String {
        let decoded = decode_lossy(raw);
        let bmp = strip_astral(&decoded);
        self.control_chars.replace_all(&bmp, "").into_owned()
    }

    /// Page-preprocessing variant: sanitize, then reduce to words, spaces and `.'"`.
    ///
    /// Whitespace controls are folded into spaces before control stripping so
    /// that line breaks keep separating words.
    pub fn clean_page(&self, text: &str) -> Result<String, CleanError> {
        let chars = text.chars().count();
        if chars > self.max_page_chars {
            return Err(CleanError::PageTooLarge {
                chars,
                limit: self.max_page_chars,
            });
        }

        let spaced = self.whitespace_run.replace_all(text, " ");
        let visible = self.sanitize(spaced.as_bytes());
        let filtered = self.non_semantic.replace_all(&visible, " ");
        let collapsed = self.whitespace_run.replace_all(&filtered, " ");
        Ok(collapsed.trim().to_string())
    }

    /// Cleans every page; a page that fails to clean becomes empty text.
    pub fn clean_pages(&self, pages: Vec<PageText>) -> Vec<PageText> {
        pages
            .into_iter()
            .map(|page| match self.clean_page(&page.text) {
                Ok(text) => PageText {
                    number: page.number,
                    text,
                },
                Err(error) => {
                    warn!(page = page.number, %error, "page cleaning failed, using empty text");
                    PageText {
                        number: page.number,
                        text: String::new(),
                    }
                }
            })
            .collect()
    }
}
