//! Order-preserving `KEY=VALUE` document.
//!
//! Only the line holding a targeted key is rewritten; comments, blank lines and
//! every other key keep their position and text.

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    key: String,
    value: String,
    edited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Line {
    /// Text as read, without its line ending.
    raw: String,
    /// `\n`, `\r\n`, or empty for an unterminated last line.
    ending: &'static str,
    entry: Option<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvFile {
    lines: Vec<Line>,
    newline: &'static str,
}

fn split_ending(piece: &str) -> (&str, &'static str) {
    if let Some(body) = piece.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = piece.strip_suffix('\n') {
        (body, "\n")
    } else {
        (piece, "")
    }
}

fn parse_entry(raw: &str) -> Option<Entry> {
    let trimmed = raw.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let (key, value) = raw.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some(Entry {
        key: key.to_string(),
        value: value.trim().to_string(),
        edited: false,
    })
}

/// Strip one layer of matching double or single quotes.
pub fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

impl EnvFile {
    pub fn parse(content: &str) -> Self {
        let lines = content
            .split_inclusive('\n')
            .map(|piece| {
                let (raw, ending) = split_ending(piece);
                Line {
                    raw: raw.to_string(),
                    ending,
                    entry: parse_entry(raw),
                }
            })
            .collect();

        Self {
            lines,
            newline: if content.contains("\r\n") { "\r\n" } else { "\n" },
        }
    }

    /// Value of the last occurrence of `key`, the one a dotenv reader would see.
    /// Surrounding whitespace is trimmed, quotes are kept.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|line| match &line.entry {
            Some(e) if e.key == key => Some(e.value.as_str()),
            _ => None,
        })
    }

    /// Overwrite every occurrence of `key`, or append it when absent.
    pub fn set(&mut self, key: &str, value: &str) {
        let mut found = false;
        for entry in self.lines.iter_mut().filter_map(|l| l.entry.as_mut()) {
            if entry.key == key {
                if entry.value != value {
                    entry.value = value.to_string();
                    entry.edited = true;
                }
                found = true;
            }
        }
        if found {
            return;
        }

        let newline = if self.newline.is_empty() { "\n" } else { self.newline };
        if let Some(last) = self.lines.last_mut() {
            if last.ending.is_empty() {
                last.ending = newline;
            }
        }
        self.lines.push(Line {
            raw: format!("{}={}", key, value),
            ending: newline,
            entry: Some(Entry {
                key: key.to_string(),
                value: value.to_string(),
                edited: false,
            }),
        });
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter_map(|line| line.entry.as_ref().map(|e| e.key.as_str()))
    }

    /// Untouched lines come back byte for byte, endings included.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match &line.entry {
                Some(e) if e.edited => {
                    out.push_str(&e.key);
                    out.push('=');
                    out.push_str(&e.value);
                }
                _ => out.push_str(&line.raw),
            }
            out.push_str(line.ending);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "# Secrets\nPOSTGRES_PASSWORD=abc\n\nJWT_SECRET=x=y\n# trailing comment\n";

    #[test]
    fn untouched_document_round_trips() {
        assert_eq!(EnvFile::parse(SAMPLE).render(), SAMPLE);
        assert_eq!(EnvFile::parse("A=1").render(), "A=1");
    }

    #[test]
    fn values_keep_embedded_equals() {
        let env = EnvFile::parse(SAMPLE);
        assert_eq!(env.get("JWT_SECRET"), Some("x=y"));
        assert_eq!(env.get("MISSING"), None);
    }

    #[test]
    fn set_rewrites_in_place_and_appends_new_keys() {
        let mut env = EnvFile::parse(SAMPLE);
        env.set("POSTGRES_PASSWORD", "new");
        env.set("SITE_URL", "http://10.0.0.1");
        assert_eq!(
            env.render(),
            "# Secrets\nPOSTGRES_PASSWORD=new\n\nJWT_SECRET=x=y\n# trailing comment\nSITE_URL=http://10.0.0.1\n"
        );
    }

    #[test]
    fn unrelated_lines_keep_their_spacing() {
        let mut env = EnvFile::parse("FOO = bar\n  INDENTED=1\nSITE_URL=x\n");
        assert_eq!(env.get("FOO"), Some("bar"));
        env.set("SITE_URL", "http://1.2.3.4");
        assert_eq!(env.render(), "FOO = bar\n  INDENTED=1\nSITE_URL=http://1.2.3.4\n");
    }

    #[test]
    fn crlf_endings_survive_edits_and_appends() {
        let content = "A=1\r\nB=2\r\n";
        assert_eq!(EnvFile::parse(content).render(), content);

        let mut env = EnvFile::parse(content);
        env.set("B", "3");
        env.set("C", "4");
        assert_eq!(env.render(), "A=1\r\nB=3\r\nC=4\r\n");
    }

    #[test]
    fn setting_the_same_value_changes_nothing() {
        let content = "KEY = same\n";
        let mut env = EnvFile::parse(content);
        env.set("KEY", "same");
        assert_eq!(env.render(), content);
    }

    #[test]
    fn append_after_unterminated_last_line() {
        let mut env = EnvFile::parse("A=1");
        env.set("B", "2");
        assert_eq!(env.render(), "A=1\nB=2\n");
    }

    #[test]
    fn unquote_strips_one_matching_pair() {
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote(" 'abc' "), "abc");
        assert_eq!(unquote("\"abc'"), "\"abc'");
        assert_eq!(unquote("\""), "\"");
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn set_on_empty_document() {
        let mut env = EnvFile::parse("");
        env.set("A", "1");
        assert_eq!(env.render(), "A=1\n");
        assert_eq!(env.keys().collect::<Vec<_>>(), vec!["A"]);
    }
}
