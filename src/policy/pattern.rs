//! Shell-style path patterns (`fnmatch` semantics).
//!
//! `*` matches any run of characters, `/` included, `?` matches exactly one
//! character, and `[seq]` / `[!seq]` are character classes. Patterns are
//! anchored at both ends and case-sensitive.

use regex::Regex;

/// A compiled path glob.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    source: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a glob pattern.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = Regex::new(&translate(pattern))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// Whether `path` matches this pattern in full.
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// The pattern as written in the policy file.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Translate a glob into an anchored regular expression.
fn translate(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let n = chars.len();
    let mut out = String::from("(?s)^");
    let mut i = 0;

    while i < n {
        let c = chars[i];
        i += 1;
        match c {
            '*' => {
                // Consecutive stars collapse into one.
                while i < n && chars[i] == '*' {
                    i += 1;
                }
                out.push_str(".*");
            }
            '?' => out.push('.'),
            '[' => {
                let mut j = i;
                if j < n && chars[j] == '!' {
                    j += 1;
                }
                if j < n && chars[j] == ']' {
                    j += 1;
                }
                while j < n && chars[j] != ']' {
                    j += 1;
                }
                if j >= n {
                    // Unterminated class is a literal bracket.
                    out.push_str(r"\[");
                } else {
                    let mut class = &chars[i..j];
                    i = j + 1;
                    out.push('[');
                    if class.first() == Some(&'!') {
                        out.push('^');
                        class = &class[1..];
                    }
                    for &member in class {
                        push_class_member(&mut out, member);
                    }
                    out.push(']');
                }
            }
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0u8; 4]))),
        }
    }

    out.push('$');
    out
}

fn push_class_member(out: &mut String, c: char) {
    match c {
        '-' => out.push('-'),
        '<' | '>' => out.push(c),
        c if c.is_ascii_punctuation() => {
            out.push('\\');
            out.push(c);
        }
        c => out.push(c),
    }
}
