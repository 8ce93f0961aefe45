//! Byte-level tokenizer for the text filter language.
//!
//! The source is pulled through a fixed 12-byte window, so every multi-byte
//! token kind has a chunk-spanning path and the scanner never needs the whole
//! input in memory.

use std::io::Read;

use crate::error::Error;

const CHUNK: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TokenKind {
    Key,
    Number,
    String,
    Operator,
    /// `(`, `)`, `[` and `]`, told apart by the lexeme.
    Bracket,
    Regex,
    Bool,
    Comma,
}

pub(crate) struct Scanner<R> {
    src: R,
    buf: [u8; CHUNK],
    buf_pos: usize,
    buf_len: usize,
    line: u64,
    column: u64,
    kind: TokenKind,
    lit: Vec<u8>,
}

impl<R: Read> Scanner<R> {
    pub fn new(src: R) -> Self {
        Scanner {
            src,
            buf: [0; CHUNK],
            buf_pos: 0,
            buf_len: 0,
            line: 0,
            column: 0,
            kind: TokenKind::Key,
            lit: Vec::new(),
        }
    }

    /// Kind of the last token produced by [`Scanner::advance`].
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Lexeme bytes of the last token produced by [`Scanner::advance`].
    pub fn lexeme(&self) -> &[u8] {
        &self.lit
    }

    /// 1-based line and column after the last consumed byte.
    pub fn position(&self) -> (u64, u64) {
        (self.line + 1, self.column + 1)
    }

    /// Advance to the next token. `Ok(false)` means the input is exhausted.
    ///
    /// A maximal-munch token cut short by end of input is completed and
    /// returned; the following call reports the end.
    pub fn advance(&mut self) -> Result<bool, Error> {
        self.lit.clear();

        loop {
            if self.buf_pos == self.buf_len && !self.fill()? {
                return Ok(false);
            }

            while self.buf_pos < self.buf_len {
                let c = self.buf[self.buf_pos];
                match c {
                    _ if is_key(c) => {
                        self.kind = TokenKind::Key;
                        self.read_run(is_key)?;
                        if self.lit.eq_ignore_ascii_case(b"true")
                            || self.lit.eq_ignore_ascii_case(b"false")
                        {
                            self.kind = TokenKind::Bool;
                        }
                        return Ok(true);
                    }
                    _ if is_operator(c) => {
                        self.kind = TokenKind::Operator;
                        self.read_run(is_operator)?;
                        return Ok(true);
                    }
                    _ if is_number(c) => {
                        self.kind = TokenKind::Number;
                        self.read_run(is_number)?;
                        return Ok(true);
                    }
                    b'"' | b'\'' => {
                        self.kind = TokenKind::String;
                        return self.read_string(c);
                    }
                    b'/' => {
                        self.kind = TokenKind::Regex;
                        return self.read_regex();
                    }
                    b'(' | b')' | b'[' | b']' => {
                        self.kind = TokenKind::Bracket;
                        self.lit.push(c);
                        self.column += 1;
                        self.buf_pos += 1;
                        return Ok(true);
                    }
                    b',' => {
                        self.kind = TokenKind::Comma;
                        self.lit.push(c);
                        self.column += 1;
                        self.buf_pos += 1;
                        return Ok(true);
                    }
                    b'\n' => {
                        self.line += 1;
                        self.column = 0;
                        self.buf_pos += 1;
                    }
                    _ => {
                        // whitespace and anything unrecognised
                        self.column += 1;
                        self.buf_pos += 1;
                    }
                }
            }
        }
    }

    /// Consume a maximal run of bytes matching `matches` into the lexeme.
    fn read_run(&mut self, matches: fn(u8) -> bool) -> Result<(), Error> {
        loop {
            let start = self.buf_pos;
            while self.buf_pos < self.buf_len && matches(self.buf[self.buf_pos]) {
                self.buf_pos += 1;
                self.column += 1;
            }
            self.lit.extend_from_slice(&self.buf[start..self.buf_pos]);

            if self.buf_pos < self.buf_len {
                return Ok(());
            }
            if !self.fill()? {
                // the token ends exactly at end of input; the next call
                // to advance reports the end
                return Ok(());
            }
        }
    }

    /// Consume a quoted lexeme including both quote symbols. A closing quote
    /// preceded by an odd number of backslashes is part of the lexeme.
    fn read_string(&mut self, quote: u8) -> Result<bool, Error> {
        self.lit.push(quote);
        self.buf_pos += 1;
        self.column += 1;

        loop {
            if self.buf_pos == self.buf_len && !self.fill()? {
                // unterminated; surface end of input to the caller
                return Ok(false);
            }

            let window = &self.buf[self.buf_pos..self.buf_len];
            let Some(off) = window.iter().position(|&b| b == quote) else {
                self.lit.extend_from_slice(window);
                self.column += window.len() as u64;
                self.buf_pos = self.buf_len;
                continue;
            };

            let close = self.buf_pos + off;
            let escaped = self.count_backslashes(close) % 2 != 0;

            self.lit.extend_from_slice(&self.buf[self.buf_pos..=close]);
            self.column += (close + 1 - self.buf_pos) as u64;
            self.buf_pos = close + 1;

            if !escaped {
                return Ok(true);
            }
        }
    }

    /// Count the backslashes immediately preceding `at`, following the run
    /// into already-consumed lexeme bytes when it starts the buffer.
    fn count_backslashes(&self, at: usize) -> usize {
        let mut count = 0;
        let mut i = at as isize - 1;
        while i >= 0 && self.buf[i as usize] == b'\\' {
            count += 1;
            i -= 1;
        }
        if i < 0 {
            count += self.lit.iter().rev().take_while(|&&b| b == b'\\').count();
        }
        count
    }

    fn read_regex(&mut self) -> Result<bool, Error> {
        if !self.read_string(b'/')? {
            return Ok(false);
        }
        // trailing option letters share the key character class
        self.read_run(is_key)?;
        Ok(true)
    }

    /// Refill the window. `Ok(false)` means no bytes remain.
    fn fill(&mut self) -> Result<bool, Error> {
        let mut n = 0;
        while n < CHUNK {
            match self.src.read(&mut self.buf[n..]) {
                Ok(0) => break,
                Ok(m) => n += m,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        self.buf_pos = 0;
        self.buf_len = n;
        Ok(n > 0)
    }
}

fn is_key(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c == b'.' || c == b'-' || c == b'$'
}

fn is_operator(c: u8) -> bool {
    matches!(c, b'<' | b'>' | b'=' | b'!')
}

fn is_number(c: u8) -> bool {
    c.is_ascii_digit() || c == b'.'
}
