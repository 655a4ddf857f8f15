//! Lightweight scanner for scaffold source.
//!
//! Only precise enough to answer two questions about a template: which
//! names does it define, and which functions does it call. Comments, string
//! literals and template literals are skipped. Regular expression literals
//! are not recognised and are scanned as ordinary tokens.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Punct(char),
}

const KEYWORDS: &[&str] = &[
    "await", "break", "case", "catch", "class", "const", "continue", "debugger", "default",
    "delete", "do", "else", "export", "extends", "finally", "for", "function", "if", "import",
    "in", "instanceof", "let", "new", "of", "return", "super", "switch", "this", "throw", "try",
    "typeof", "var", "void", "while", "with", "yield",
];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn tokenize(source: &str) -> Vec<Token> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            '\'' | '"' | '`' => {
                let quote = c;
                i += 1;
                while i < chars.len() && chars[i] != quote {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
                // A literal reads as a value, which keeps `'a'(` from looking like a call.
                tokens.push(Token::Punct('"'));
            }
            _ if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_continue(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ if c.is_ascii_digit() => {
                while i < chars.len() && (is_ident_continue(chars[i]) || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Punct('0'));
            }
            _ => {
                tokens.push(Token::Punct(c));
                i += 1;
            }
        }
    }
    tokens
}

/// Names bound at any level by `function NAME`, `class NAME` or
/// `let`/`const`/`var NAME`.
pub fn defined_names(source: &str) -> BTreeSet<String> {
    let tokens = tokenize(source);
    let mut names = BTreeSet::new();
    for window in tokens.windows(2) {
        if let [Token::Ident(keyword), Token::Ident(name)] = window {
            let binds = matches!(keyword.as_str(), "function" | "class" | "let" | "const" | "var");
            if binds && !is_keyword(name) {
                names.insert(name.clone());
            }
        }
    }
    // `function* NAME`
    for window in tokens.windows(3) {
        if let [Token::Ident(keyword), Token::Punct('*'), Token::Ident(name)] = window {
            if keyword == "function" {
                names.insert(name.clone());
            }
        }
    }
    names
}

/// Free functions called by name, excluding member calls, keywords and the
/// names being declared.
pub fn called_names(source: &str) -> BTreeSet<String> {
    let tokens = tokenize(source);
    let mut calls = BTreeSet::new();
    for (i, token) in tokens.iter().enumerate() {
        let Token::Ident(name) = token else { continue };
        if tokens.get(i + 1) != Some(&Token::Punct('(')) || is_keyword(name) {
            continue;
        }
        let previous = i.checked_sub(1).and_then(|p| tokens.get(p));
        match previous {
            Some(Token::Punct('.')) => continue,
            Some(Token::Ident(keyword)) if keyword == "function" => continue,
            _ => {}
        }
        calls.insert(name.clone());
    }
    calls
}
