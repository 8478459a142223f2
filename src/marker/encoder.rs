//! Marker payload encoding
//!
//! A payload is built in two steps. The page number is first rendered through a
//! printf-style page format (`"%02d"` turns page 7 into `"07"`), then that label
//! is substituted into a message template (`"P{0} V3"` becomes `"P07 V3"`).
//!
//! Both patterns are compiled once, so a [`MarkerEncoder`] that was built
//! successfully can encode any page without failing.

use crate::config::BookConfig;
use crate::error::{Error, Result};

/// Conversion character of a page format specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
    Decimal,
    LowerHex,
    UpperHex,
    Octal,
    Text,
    UpperText,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Flags {
    left: bool,
    zero: bool,
    plus: bool,
    space: bool,
    group: bool,
    alternate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Specifier {
    flags: Flags,
    width: Option<usize>,
    precision: Option<usize>,
    conversion: Conversion,
}

/// How a specifier picks its argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArgumentIndex {
    /// Next argument in sequence
    Ordinary,
    /// `1$`
    Explicit,
    /// `<`, the argument of the previous specifier
    Relative,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FormatPart {
    Literal(String),
    Page(Specifier),
}

/// Compiled `qrCodePageFormat` pattern
///
/// Supports literal text, `%%`, `%n`, and the conversions `d`, `x`, `X`, `o`,
/// `s` and `S` with the flags `-`, `0`, `+`, space, `,` and `#`, a width, a
/// precision (text conversions only), the explicit index `1$` and the relative
/// index `<`. The page number is the only argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFormat {
    parts: Vec<FormatPart>,
}

impl PageFormat {
    /// Compile a page format pattern
    pub fn parse(pattern: &str) -> Result<Self> {
        let malformed = |reason: &str| {
            Error::Config(format!("invalid qrCodePageFormat {:?}: {}", pattern, reason))
        };

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut has_page = false;
        let mut ordinary_used = false;
        let mut chars = pattern.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch != '%' {
                literal.push(ch);
                continue;
            }

            let mut prefix = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_ascii_digit() || "$<-+ ,#.".contains(next) {
                    prefix.push(next);
                    chars.next();
                } else {
                    break;
                }
            }

            let conversion = chars
                .next()
                .ok_or_else(|| malformed("dangling `%` at end of pattern"))?;

            match conversion {
                '%' | 'n' => {
                    if !prefix.is_empty() {
                        return Err(malformed(&format!("`%{}{}` takes no flags", prefix, conversion)));
                    }
                    literal.push(if conversion == '%' { '%' } else { '\n' });
                }
                _ => {
                    let (spec, index) =
                        parse_specifier(&prefix, conversion, has_page).map_err(|r| malformed(&r))?;
                    if index == ArgumentIndex::Ordinary {
                        // There is exactly one argument to consume
                        if ordinary_used {
                            return Err(malformed(&format!(
                                "`%{}{}` needs a second argument, only the page number is available",
                                prefix, conversion
                            )));
                        }
                        ordinary_used = true;
                    }
                    if !literal.is_empty() {
                        parts.push(FormatPart::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(FormatPart::Page(spec));
                    has_page = true;
                }
            }
        }

        if !literal.is_empty() {
            parts.push(FormatPart::Literal(literal));
        }

        if !has_page {
            return Err(malformed("pattern never references the page number"));
        }

        Ok(Self { parts })
    }

    /// Render a page number through this format
    pub fn render(&self, page: u32) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                FormatPart::Literal(text) => out.push_str(text),
                FormatPart::Page(spec) => out.push_str(&spec.render(page)),
            }
        }
        out
    }
}

/// Parse the text between `%` and the conversion character
fn parse_specifier(
    prefix: &str,
    conversion: char,
    has_previous: bool,
) -> std::result::Result<(Specifier, ArgumentIndex), String> {
    let conversion = match conversion {
        'd' => Conversion::Decimal,
        'x' => Conversion::LowerHex,
        'X' => Conversion::UpperHex,
        'o' => Conversion::Octal,
        's' => Conversion::Text,
        'S' => Conversion::UpperText,
        other => return Err(format!("unsupported conversion `%{}`", other)),
    };

    let mut rest = prefix;
    let mut explicit = false;

    // Explicit argument index, e.g. `%1$d`
    if let Some(dollar) = rest.find('$') {
        let index = &rest[..dollar];
        match index.parse::<usize>() {
            Ok(1) => {}
            Ok(n) => {
                return Err(format!(
                    "argument index {} is out of range, only the page number (1) is available",
                    n
                ))
            }
            Err(_) => return Err(format!("malformed argument index {:?}", index)),
        }
        rest = &rest[dollar + 1..];
        explicit = true;
    }

    let mut flags = Flags::default();
    let mut relative = false;
    while let Some(ch) = rest.chars().next() {
        let slot = match ch {
            '-' => &mut flags.left,
            '0' => &mut flags.zero,
            '+' => &mut flags.plus,
            ' ' => &mut flags.space,
            ',' => &mut flags.group,
            '#' => &mut flags.alternate,
            '<' => &mut relative,
            _ => break,
        };
        if *slot {
            return Err(format!("duplicate flag `{}`", ch));
        }
        *slot = true;
        rest = &rest[ch.len_utf8()..];
    }

    if relative && !has_previous {
        return Err("relative index `<` has no previous argument".to_string());
    }

    let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
    let width = if digits > 0 {
        let width = rest[..digits]
            .parse::<usize>()
            .map_err(|_| format!("width {:?} is too large", &rest[..digits]))?;
        rest = &rest[digits..];
        Some(width)
    } else {
        None
    };

    let precision = if let Some(after_dot) = rest.strip_prefix('.') {
        let digits = after_dot.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err("precision `.` must be followed by digits".to_string());
        }
        let precision = after_dot[..digits]
            .parse::<usize>()
            .map_err(|_| format!("precision {:?} is too large", &after_dot[..digits]))?;
        rest = &after_dot[digits..];
        Some(precision)
    } else {
        None
    };

    if !rest.is_empty() {
        return Err(format!("unexpected {:?} in format specifier", rest));
    }

    if (flags.left || flags.zero) && width.is_none() {
        return Err("`-` and `0` flags require a width".to_string());
    }
    if flags.left && flags.zero {
        return Err("`-` and `0` flags cannot be combined".to_string());
    }
    if flags.plus && flags.space {
        return Err("`+` and ` ` flags cannot be combined".to_string());
    }

    match conversion {
        Conversion::Decimal => {
            if flags.alternate {
                return Err("`#` flag is not allowed with `%d`".to_string());
            }
            if precision.is_some() {
                return Err("precision is not allowed with integer conversions".to_string());
            }
        }
        Conversion::LowerHex | Conversion::UpperHex | Conversion::Octal => {
            if flags.plus || flags.space || flags.group {
                return Err("`+`, ` ` and `,` flags are only allowed with `%d`".to_string());
            }
            if precision.is_some() {
                return Err("precision is not allowed with integer conversions".to_string());
            }
        }
        Conversion::Text | Conversion::UpperText => {
            if flags.zero || flags.plus || flags.space || flags.group || flags.alternate {
                return Err("only the `-` flag is allowed with `%s`".to_string());
            }
        }
    }

    let index = if relative {
        ArgumentIndex::Relative
    } else if explicit {
        ArgumentIndex::Explicit
    } else {
        ArgumentIndex::Ordinary
    };

    Ok((
        Specifier {
            flags,
            width,
            precision,
            conversion,
        },
        index,
    ))
}

impl Specifier {
    fn render(&self, page: u32) -> String {
        let (sign, body) = match self.conversion {
            Conversion::Decimal => {
                let sign = if self.flags.plus {
                    "+"
                } else if self.flags.space {
                    " "
                } else {
                    ""
                };
                let digits = if self.flags.group {
                    group_thousands(page)
                } else {
                    page.to_string()
                };
                (sign, digits)
            }
            Conversion::LowerHex => (if self.flags.alternate { "0x" } else { "" }, format!("{:x}", page)),
            Conversion::UpperHex => (if self.flags.alternate { "0X" } else { "" }, format!("{:X}", page)),
            Conversion::Octal => (if self.flags.alternate { "0" } else { "" }, format!("{:o}", page)),
            Conversion::Text | Conversion::UpperText => {
                let text = page.to_string();
                let text = match self.precision {
                    Some(precision) => text.chars().take(precision).collect(),
                    None => text,
                };
                ("", text)
            }
        };

        let len = sign.len() + body.len();
        let pad = self.width.map_or(0, |w| w.saturating_sub(len));

        if self.flags.zero {
            format!("{}{}{}", sign, "0".repeat(pad), body)
        } else if self.flags.left {
            format!("{}{}{}", sign, body, " ".repeat(pad))
        } else {
            format!("{}{}{}", " ".repeat(pad), sign, body)
        }
    }
}

/// Insert `,` every three digits
fn group_thousands(value: u32) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Label,
}

/// Compiled `qrCodeTextTemplate` pattern
///
/// `{0}` is replaced by the page label and may appear more than once. A
/// doubled quote `''` is a literal quote and text between single quotes is
/// copied verbatim, braces included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextTemplate {
    parts: Vec<TemplatePart>,
}

impl TextTemplate {
    /// Compile a text template
    pub fn parse(pattern: &str) -> Result<Self> {
        let malformed = |reason: &str| {
            Error::Config(format!("invalid qrCodeTextTemplate {:?}: {}", pattern, reason))
        };

        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut quoted = false;
        let mut has_label = false;
        let mut chars = pattern.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    literal.push('\'');
                } else {
                    quoted = !quoted;
                }
                continue;
            }

            if quoted || ch != '{' {
                literal.push(ch);
                continue;
            }

            let mut argument = String::new();
            let mut closed = false;
            for inner in chars.by_ref() {
                match inner {
                    '}' => {
                        closed = true;
                        break;
                    }
                    '{' => return Err(malformed("nested `{` inside a placeholder")),
                    _ => argument.push(inner),
                }
            }
            if !closed {
                return Err(malformed("unmatched `{`"));
            }

            if argument.contains(',') {
                return Err(malformed(&format!("typed placeholder {{{}}} is not supported", argument)));
            }
            match argument.parse::<usize>() {
                Ok(0) => {}
                Ok(n) => {
                    return Err(malformed(&format!(
                        "placeholder {{{}}} is out of range, only {{0}} is available",
                        n
                    )))
                }
                Err(_) => return Err(malformed(&format!("placeholder {{{}}} is not an index", argument))),
            }

            if !literal.is_empty() {
                parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
            }
            parts.push(TemplatePart::Label);
            has_label = true;
        }

        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(literal));
        }

        if !has_label {
            return Err(malformed("template has no {0} placeholder"));
        }

        Ok(Self { parts })
    }

    /// Substitute a page label into the template
    pub fn render(&self, label: &str) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => out.push_str(text),
                TemplatePart::Label => out.push_str(label),
            }
        }
        out
    }
}

/// Maps page indices to marker payload strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerEncoder {
    page_format: PageFormat,
    text_template: TextTemplate,
}

impl MarkerEncoder {
    /// Compile both patterns
    pub fn new(page_format: &str, text_template: &str) -> Result<Self> {
        Ok(Self {
            page_format: PageFormat::parse(page_format)?,
            text_template: TextTemplate::parse(text_template)?,
        })
    }

    /// Build an encoder from a template configuration
    pub fn from_config(config: &BookConfig) -> Result<Self> {
        Self::new(&config.page_format, &config.text_template)
    }

    /// Payload for a page
    pub fn encode(&self, page: u32) -> String {
        self.text_template.render(&self.page_format.render(page))
    }
}

/// Payload for `page` under `config`
pub fn encode(page: u32, config: &BookConfig) -> Result<String> {
    Ok(MarkerEncoder::from_config(config)?.encode(page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn payload(format: &str, template: &str, page: u32) -> String {
        MarkerEncoder::new(format, template)
            .expect("patterns should compile")
            .encode(page)
    }

    #[test]
    fn test_zero_padded_page_label() {
        assert_eq!(payload("Page %02d", "PAGE:{0}", 7), "PAGE:Page 07");
    }

    #[test]
    fn test_page_format_flags_and_widths() {
        let cases = vec![
            ("%d", 7, "7"),
            ("%03d", 7, "007"),
            ("%3d", 7, "  7"),
            ("[%-4d]", 7, "[7   ]"),
            ("%+d", 7, "+7"),
            ("% d", 7, " 7"),
            ("%,d", 1234567, "1,234,567"),
            ("%x", 255, "ff"),
            ("%X", 255, "FF"),
            ("%#x", 255, "0xff"),
            ("%#06x", 255, "0x00ff"),
            ("%o", 8, "10"),
            ("%s", 42, "42"),
            ("%.1s", 42, "4"),
            ("%5s|", 42, "   42|"),
            ("%1$d-%<d", 3, "3-3"),
            ("%1$d %d", 3, "3 3"),
            ("%d %1$d", 3, "3 3"),
            ("%d/%<x", 10, "10/a"),
            ("100%% p%d", 3, "100% p3"),
            ("%d%n", 3, "3\n"),
        ];

        for (pattern, page, expected) in cases {
            let format = PageFormat::parse(pattern).expect(pattern);
            assert_eq!(format.render(page), expected, "pattern {:?}", pattern);
        }
    }

    #[test]
    fn test_malformed_page_formats() {
        let cases = vec![
            "Page %",
            "%q",
            "%2$d",
            "Page",
            "%-d",
            "%-05d",
            "%+ d",
            "%.2d",
            "%+x",
            "%0s",
            "%<d",
            "%--4d",
            "%5%",
            "%d-%d",
            "%s%d",
        ];

        for pattern in cases {
            let err = PageFormat::parse(pattern).expect_err(pattern);
            assert!(err.is_config(), "pattern {:?} gave {}", pattern, err);
            assert!(err.to_string().contains("qrCodePageFormat"));
        }
    }

    #[test]
    fn test_text_template_quoting() {
        assert_eq!(payload("%d", "'{0}' is {0}", 5), "{0} is 5");
        assert_eq!(payload("%d", "it''s page {0}", 5), "it's page 5");
        assert_eq!(payload("%d", "{0}/{0}", 5), "5/5");
        assert_eq!(payload("%d", "a}b{0}", 5), "a}b5");
    }

    #[test]
    fn test_malformed_text_templates() {
        for pattern in ["no placeholder", "{1}", "{0", "{0,number}", "{x}", "{{0}}", "'{0}'", "{ 0 }"] {
            let err = TextTemplate::parse(pattern).expect_err(pattern);
            assert!(err.is_config(), "pattern {:?} gave {}", pattern, err);
            assert!(err.to_string().contains("qrCodeTextTemplate"));
        }
    }

    #[test]
    fn test_decimal_payloads_are_unique() {
        let encoder = MarkerEncoder::new("%02d", "P{0} V3 S1").expect("valid patterns");
        let payloads: HashSet<String> = (1..=500).map(|page| encoder.encode(page)).collect();
        assert_eq!(payloads.len(), 500);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let first = MarkerEncoder::new("%03d", "NB-{0}").expect("valid patterns");
        let second = MarkerEncoder::new("%03d", "NB-{0}").expect("valid patterns");
        for page in 1..=20 {
            assert_eq!(first.encode(page), second.encode(page));
        }
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(1), "1");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(123456), "123,456");
    }
}
