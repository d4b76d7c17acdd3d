//! Tokenizer for the C front end
//!
//! Splits preprocessed C source into a flat token vector with line and
//! column positions. Preprocessor residue (`# ...` line markers) is
//! skipped; comments are stripped here.

use sift_core::IntType;

#[derive(Debug, Clone, PartialEq)]
pub enum TokKind {
    Ident(String),
    Num(i64, IntType),
    Str(String),
    Punct(&'static str),
}

/// A token with its 1-based source position.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokKind,
    pub line: u32,
    pub col: u32,
}

impl Token {
    pub fn is_punct(&self, p: &str) -> bool {
        matches!(&self.kind, TokKind::Punct(s) if *s == p)
    }

    pub fn is_ident(&self, name: &str) -> bool {
        matches!(&self.kind, TokKind::Ident(s) if s == name)
    }
}

/// Multi-character punctuators, longest first so maximal munch works.
const PUNCTS: &[&str] = &[
    "<<=", ">>=", "...", "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=",
    "&&", "||", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "+", "-", "*",
    "/", "%", "&", "|", "^", "~", "!", "<", ">", "=", "?", ":", ";", ",", ".",
    "(", ")", "[", "]", "{", "}",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0usize;
    let mut line = 1u32;
    let mut col = 1u32;

    macro_rules! advance {
        () => {{
            if bytes[i] == b'\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
            i += 1;
        }};
    }

    while i < bytes.len() {
        let c = bytes[i];

        if c.is_ascii_whitespace() {
            advance!();
            continue;
        }

        // Preprocessor line markers: skip to end of line.
        if c == b'#' && col == 1 {
            while i < bytes.len() && bytes[i] != b'\n' {
                advance!();
            }
            continue;
        }

        // Comments.
        if c == b'/' && i + 1 < bytes.len() {
            if bytes[i + 1] == b'/' {
                while i < bytes.len() && bytes[i] != b'\n' {
                    advance!();
                }
                continue;
            }
            if bytes[i + 1] == b'*' {
                let (start_line, start_col) = (line, col);
                advance!();
                advance!();
                loop {
                    if i + 1 >= bytes.len() {
                        return Err(format!(
                            "unterminated comment starting at line {}, column {}",
                            start_line, start_col
                        ));
                    }
                    if bytes[i] == b'*' && bytes[i + 1] == b'/' {
                        advance!();
                        advance!();
                        break;
                    }
                    advance!();
                }
                continue;
            }
        }

        let (tok_line, tok_col) = (line, col);

        // Identifiers and keywords.
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                advance!();
            }
            tokens.push(Token {
                kind: TokKind::Ident(source[start..i].to_string()),
                line: tok_line,
                col: tok_col,
            });
            continue;
        }

        // Numbers.
        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len()
                && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.')
            {
                advance!();
            }
            let text = &source[start..i];
            let (value, ty) = parse_number(text)
                .ok_or_else(|| format!("bad number '{}' at line {}", text, tok_line))?;
            tokens.push(Token { kind: TokKind::Num(value, ty), line: tok_line, col: tok_col });
            continue;
        }

        // Character constants become numbers.
        if c == b'\'' {
            advance!();
            let mut value = 0i64;
            while i < bytes.len() && bytes[i] != b'\'' {
                let ch = if bytes[i] == b'\\' {
                    advance!();
                    if i >= bytes.len() {
                        return Err(format!("unterminated character constant at line {}", tok_line));
                    }
                    escape_value(bytes[i])
                } else {
                    bytes[i] as i64
                };
                value = (value << 8) | ch;
                advance!();
            }
            if i >= bytes.len() {
                return Err(format!("unterminated character constant at line {}", tok_line));
            }
            advance!(); // closing quote
            tokens.push(Token {
                kind: TokKind::Num(value, IntType::INT),
                line: tok_line,
                col: tok_col,
            });
            continue;
        }

        // String literals.
        if c == b'"' {
            advance!();
            let mut text = String::new();
            while i < bytes.len() && bytes[i] != b'"' {
                if bytes[i] == b'\\' {
                    advance!();
                    if i >= bytes.len() {
                        break;
                    }
                    text.push(escape_value(bytes[i]) as u8 as char);
                } else {
                    text.push(bytes[i] as char);
                }
                advance!();
            }
            if i >= bytes.len() {
                return Err(format!(
                    "unterminated string literal at line {}, column {}",
                    tok_line, tok_col
                ));
            }
            advance!(); // closing quote
            tokens.push(Token { kind: TokKind::Str(text), line: tok_line, col: tok_col });
            continue;
        }

        // Punctuation, longest match first.
        let rest = &source[i..];
        let mut matched = None;
        for p in PUNCTS {
            if rest.starts_with(p) {
                matched = Some(*p);
                break;
            }
        }
        match matched {
            Some(p) => {
                for _ in 0..p.len() {
                    advance!();
                }
                tokens.push(Token { kind: TokKind::Punct(p), line: tok_line, col: tok_col });
            }
            None => {
                return Err(format!(
                    "unexpected character '{}' at line {}, column {}",
                    c as char, tok_line, tok_col
                ));
            }
        }
    }

    Ok(tokens)
}

fn escape_value(c: u8) -> i64 {
    match c {
        b'n' => b'\n' as i64,
        b't' => b'\t' as i64,
        b'r' => b'\r' as i64,
        b'0' => 0,
        other => other as i64,
    }
}

/// Parse an integer literal with optional base prefix and `u`/`l`
/// suffixes. Floating literals are out of the value model; they parse to
/// zero so the token stream stays aligned.
fn parse_number(text: &str) -> Option<(i64, IntType)> {
    let lower = text.to_ascii_lowercase();
    let mut body = lower.as_str();

    let mut unsigned = false;
    let mut long = false;
    loop {
        if let Some(stripped) = body.strip_suffix('u') {
            unsigned = true;
            body = stripped;
        } else if let Some(stripped) = body.strip_suffix('l') {
            long = true;
            body = stripped;
        } else {
            break;
        }
    }

    if body.contains('.') || (body.contains('e') && !body.starts_with("0x")) {
        return Some((0, IntType::INT));
    }

    let value = if let Some(hex) = body.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()? as i64
    } else if body.len() > 1 && body.starts_with('0') {
        i64::from_str_radix(&body[1..], 8).ok()?
    } else {
        body.parse::<u64>().ok()? as i64
    };

    // Literals that do not fit in int are long even without the suffix.
    let long = long || value > i32::MAX as i64 || value < i32::MIN as i64;
    let ty = match (long, unsigned) {
        (false, false) => IntType::INT,
        (false, true) => IntType::UINT,
        (true, false) => IntType::LONG,
        (true, true) => IntType::ULONG,
    };
    Some((value, ty))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_idents_and_puncts() {
        let toks = kinds("x->y ++z");
        assert_eq!(
            toks,
            vec![
                TokKind::Ident("x".to_string()),
                TokKind::Punct("->"),
                TokKind::Ident("y".to_string()),
                TokKind::Punct("++"),
                TokKind::Ident("z".to_string()),
            ]
        );
    }

    #[test]
    fn test_maximal_munch() {
        assert_eq!(
            kinds("a <<= b >> c"),
            vec![
                TokKind::Ident("a".to_string()),
                TokKind::Punct("<<="),
                TokKind::Ident("b".to_string()),
                TokKind::Punct(">>"),
                TokKind::Ident("c".to_string()),
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("42"), vec![TokKind::Num(42, IntType::INT)]);
        assert_eq!(kinds("0x10"), vec![TokKind::Num(16, IntType::INT)]);
        assert_eq!(kinds("010"), vec![TokKind::Num(8, IntType::INT)]);
        assert_eq!(kinds("7UL"), vec![TokKind::Num(7, IntType::ULONG)]);
        assert_eq!(
            kinds("5000000000"),
            vec![TokKind::Num(5_000_000_000, IntType::LONG)]
        );
    }

    #[test]
    fn test_char_and_string() {
        assert_eq!(kinds("'a'"), vec![TokKind::Num(97, IntType::INT)]);
        assert_eq!(kinds("'\\n'"), vec![TokKind::Num(10, IntType::INT)]);
        assert_eq!(
            kinds("\"hi\\n\""),
            vec![TokKind::Str("hi\n".to_string())]
        );
    }

    #[test]
    fn test_comments_and_line_markers() {
        let toks = kinds("a // one\n/* two\nlines */ b\n# 1 \"f.c\"\nc");
        assert_eq!(
            toks,
            vec![
                TokKind::Ident("a".to_string()),
                TokKind::Ident("b".to_string()),
                TokKind::Ident("c".to_string()),
            ]
        );
    }

    #[test]
    fn test_positions() {
        let toks = tokenize("a\n  b").unwrap();
        assert_eq!((toks[0].line, toks[0].col), (1, 1));
        assert_eq!((toks[1].line, toks[1].col), (2, 3));
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert!(tokenize("\"oops").is_err());
        assert!(tokenize("/* oops").is_err());
    }
}
