use std::collections::HashMap;

use quick_xml::escape::unescape_with;
use regex::{Captures, Regex};

use crate::db::models::IncidentArgument;
use crate::extract::MetadataCatalog;

struct Patterns {
    placeholder: Regex,
    user: Regex,
    tag: Regex,
    block_end: Regex,
}

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            placeholder: Regex::new(r"%(?:(%)|(\d*)(?:\.(\d+))?([dsf])(\d*))")?,
            user: Regex::new(r"\bUser (\d+)\b")?,
            tag: Regex::new(r"<[^>]*>")?,
            block_end: Regex::new(r"(?i)<br\s*/?>|</(?:p|div|li|tr|h[1-6])\s*>")?,
        })
    }
}

/// Fills incident text templates with their recorded arguments.
///
/// Placeholders are printf-like: `%d` (optionally zero padded, `%03d`), `%f` and
/// `%.2f`, and `%s`, whose argument is itself a catalog code. A placeholder may be
/// followed by its argument position (`%d0 of %d1`); positions are dropped from
/// the output but arguments are always consumed in order. `%%` is a literal `%`.
pub struct IncidentFormatter<'a> {
    catalog: &'a MetadataCatalog,
    users: &'a HashMap<String, String>,
    patterns: Patterns,
}

impl<'a> IncidentFormatter<'a> {
    pub fn new(
        catalog: &'a MetadataCatalog,
        users: &'a HashMap<String, String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            catalog,
            users,
            patterns: Patterns::compile()?,
        })
    }

    pub fn format(&self, template: &str, args: &[IncidentArgument]) -> String {
        let mut remaining = args.iter();
        let mut position = 0usize;

        let filled = self.patterns.placeholder.replace_all(template, |caps: &Captures| {
            if caps.get(1).is_some() {
                return "%".to_string();
            }
            let conversion = caps.get(4).map_or("", |m| m.as_str());
            let trailing = caps.get(5).map_or("", |m| m.as_str());

            // Trailing digits are a position marker only when they name the next slot.
            let suffix = match trailing.parse::<usize>() {
                Ok(marker) if marker == position => {
                    position += 1;
                    ""
                }
                _ => trailing,
            };

            let Some(arg) = remaining.next() else {
                return caps[0].to_string();
            };
            let width = caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok());
            let precision = caps.get(3).and_then(|m| m.as_str().parse::<usize>().ok());

            let rendered = match conversion {
                "d" => format_long(arg, width),
                "f" => format_real(arg, precision),
                _ => self.format_text_reference(arg),
            };
            format!("{rendered}{suffix}")
        });

        self.substitute_users(&filled)
    }

    fn format_text_reference(&self, arg: &IncidentArgument) -> String {
        let Some(index) = arg.string_tidx_value.or(arg.long_value) else {
            return String::new();
        };
        self.catalog
            .get(&index.to_string())
            .map(str::to_string)
            .unwrap_or_else(|| index.to_string())
    }

    /// `User 3` becomes `User <login>` when the HMI user table knows id 3.
    fn substitute_users(&self, text: &str) -> String {
        if self.users.is_empty() {
            return text.to_string();
        }
        self.patterns
            .user
            .replace_all(text, |caps: &Captures| match self.users.get(&caps[1]) {
                Some(login) => format!("User {login}"),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Help entries are stored as escaped HTML; the log shows plain text, one line
    /// per block element.
    pub fn plain_help_text(&self, raw: &str) -> String {
        let decoded = unescape_with(raw, |entity| match entity {
            "nbsp" => Some(" "),
            "apos" => Some("'"),
            _ => None,
        })
        .map(|text| text.into_owned())
        .unwrap_or_else(|_| raw.to_string());

        let with_breaks = self.patterns.block_end.replace_all(&decoded, "\n");
        let stripped = self.patterns.tag.replace_all(&with_breaks, "");

        stripped
            .lines()
            .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn format_long(arg: &IncidentArgument, width: Option<usize>) -> String {
    let value = arg
        .long_value
        .or_else(|| arg.real_value.map(|v| v as i64))
        .unwrap_or_default();
    match width {
        Some(width) => format!("{value:0width$}"),
        None => value.to_string(),
    }
}

fn format_real(arg: &IncidentArgument, precision: Option<usize>) -> String {
    let value = arg
        .real_value
        .or_else(|| arg.long_value.map(|v| v as f64))
        .unwrap_or_default();
    match precision {
        Some(precision) => format!("{value:.precision$}"),
        // Whole numbers keep one decimal, as the HMI shows them.
        None if value.is_finite() && value.fract() == 0.0 => format!("{value:.1}"),
        None => value.to_string(),
    }
}
