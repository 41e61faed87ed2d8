//! Streaming tee: read a byte stream once, mirror it to a sink and hand each
//! delimited token to a consumer.

use std::borrow::Cow;
use std::fmt;
use std::io;
use std::ops::Range;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

const READ_CHUNK: usize = 8 * 1024;

/// One delimited unit of output, delimiter stripped. Borrowed from the
/// scanner buffer; copy it out to keep it past the consumer call.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Token<'a>(&'a [u8]);

impl<'a> Token<'a> {
    pub fn new(bytes: &'a [u8]) -> Self { Token(bytes) }
    pub fn as_bytes(&self) -> &'a [u8] { self.0 }
    /// Text form; invalid UTF-8 is replaced.
    pub fn as_str(&self) -> Cow<'a, str> { String::from_utf8_lossy(self.0) }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.as_str()) }
}

impl fmt::Debug for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "Token({:?})", self.as_str()) }
}

pub trait TokenConsumer {
    fn accept(&mut self, token: &Token<'_>);
}

impl<F: FnMut(&Token<'_>)> TokenConsumer for F {
    fn accept(&mut self, token: &Token<'_>) { self(token) }
}

/// What a [`Splitter`] decided about the unconsumed data. Token ranges are
/// relative to the slice the splitter was given.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Split {
    /// Not enough data for a token yet.
    NeedMore,
    Token { advance: usize, token: Range<usize> },
    /// Consume bytes without producing a token.
    Skip { advance: usize },
    /// Last token; no further tokens are delivered.
    Final { advance: usize, token: Option<Range<usize>> },
}

pub trait Splitter {
    /// Called with every unconsumed byte so far. `at_eof` is true once the
    /// source is exhausted; a splitter should then hand out what remains.
    fn split(&mut self, data: &[u8], at_eof: bool) -> Split;
}

impl<F: FnMut(&[u8], bool) -> Split> Splitter for F {
    fn split(&mut self, data: &[u8], at_eof: bool) -> Split { self(data, at_eof) }
}

/// Type-erased splitter, for splitters chosen at run time.
pub struct BoxSplitter(pub Box<dyn Splitter + Send>);

impl Splitter for BoxSplitter {
    fn split(&mut self, data: &[u8], at_eof: bool) -> Split { self.0.split(data, at_eof) }
}

/// Split on a single byte.
#[derive(Debug, Clone, Copy)]
pub struct Delimiter(pub u8);

impl Splitter for Delimiter {
    fn split(&mut self, data: &[u8], at_eof: bool) -> Split {
        match data.iter().position(|&b| b == self.0) {
            Some(i) => Split::Token { advance: i + 1, token: 0..i },
            None if at_eof && !data.is_empty() => Split::Token { advance: data.len(), token: 0..data.len() },
            None => Split::NeedMore,
        }
    }
}

/// Newline-delimited lines; a `\r` before the newline is dropped too.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lines;

impl Splitter for Lines {
    fn split(&mut self, data: &[u8], at_eof: bool) -> Split {
        let drop_cr = |end: usize| if end > 0 && data[end - 1] == b'\r' { end - 1 } else { end };
        match data.iter().position(|&b| b == b'\n') {
            Some(i) => Split::Token { advance: i + 1, token: 0..drop_cr(i) },
            None if at_eof && !data.is_empty() => Split::Token { advance: data.len(), token: 0..drop_cr(data.len()) },
            None => Split::NeedMore,
        }
    }
}

/// Runs of non-whitespace; empty words are never produced.
#[derive(Debug, Clone, Copy, Default)]
pub struct Words;

impl Splitter for Words {
    fn split(&mut self, data: &[u8], at_eof: bool) -> Split {
        let Some(s) = data.iter().position(|b| !b.is_ascii_whitespace()) else {
            return if data.is_empty() { Split::NeedMore } else { Split::Skip { advance: data.len() } };
        };
        match data[s..].iter().position(|b| b.is_ascii_whitespace()) {
            Some(e) => Split::Token { advance: s + e + 1, token: s..s + e },
            None if at_eof => Split::Token { advance: data.len(), token: s..data.len() },
            None if s > 0 => Split::Skip { advance: s },
            None => Split::NeedMore,
        }
    }
}

/// How the sink is fed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SinkMode {
    /// Every byte read, unmodified, as soon as it is read.
    #[default]
    Mirror,
    /// Token payloads only, joined by the separator.
    Join(Vec<u8>),
}

pub struct Scanner<W, R, S, C> {
    sink: W,
    source: R,
    splitter: S,
    consumer: C,
    mode: SinkMode,
}

impl<W, R, S, C> Scanner<W, R, S, C>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
    S: Splitter,
    C: TokenConsumer,
{
    pub fn new(sink: W, source: R, splitter: S, consumer: C) -> Self {
        Scanner { sink, source, splitter, consumer, mode: SinkMode::Mirror }
    }

    pub fn with_mode(mut self, mode: SinkMode) -> Self { self.mode = mode; self }

    /// Drain the source. Returns the sink so callers can recover a buffer.
    /// End of stream is not an error; read and sink faults are.
    pub async fn scan(mut self) -> io::Result<W> {
        let mut buf: Vec<u8> = Vec::with_capacity(READ_CHUNK);
        let mut start = 0usize;
        let mut eof = false;
        let mut emitted = 0usize;
        loop {
            // hand out every token already in the buffer
            let mut finished = false;
            loop {
                let data = &buf[start..];
                if data.is_empty() && !eof { break; }
                match self.splitter.split(data, eof) {
                    Split::NeedMore => { finished = eof; break; }
                    Split::Token { advance, token } => {
                        if advance == 0 && !eof { break; }
                        let tok = &data[token];
                        emit(&mut self.sink, &mut self.consumer, &self.mode, &mut emitted, tok).await?;
                        if advance == 0 { finished = true; break; }
                        start += advance.min(data.len());
                    }
                    Split::Skip { advance } => {
                        if advance == 0 { finished = eof; break; }
                        start += advance.min(data.len());
                    }
                    Split::Final { token, .. } => {
                        if let Some(token) = token {
                            let tok = &data[token];
                            emit(&mut self.sink, &mut self.consumer, &self.mode, &mut emitted, tok).await?;
                        }
                        trace!(tokens = emitted, "final token, draining rest of stream");
                        return self.drain_rest().await;
                    }
                }
            }
            if finished || eof {
                self.sink.flush().await?;
                return Ok(self.sink);
            }

            if start > 0 {
                buf.drain(..start);
                start = 0;
            }
            buf.reserve(READ_CHUNK);
            let before = buf.len();
            let n = self.source.read_buf(&mut buf).await?;
            if n == 0 {
                eof = true;
                continue;
            }
            if self.mode == SinkMode::Mirror {
                self.sink.write_all(&buf[before..]).await?;
            }
        }
    }

    async fn drain_rest(mut self) -> io::Result<W> {
        match self.mode {
            SinkMode::Mirror => { tokio::io::copy(&mut self.source, &mut self.sink).await?; }
            SinkMode::Join(_) => { tokio::io::copy(&mut self.source, &mut tokio::io::sink()).await?; }
        }
        self.sink.flush().await?;
        Ok(self.sink)
    }
}

async fn emit<W: AsyncWrite + Unpin, C: TokenConsumer>(
    sink: &mut W,
    consumer: &mut C,
    mode: &SinkMode,
    emitted: &mut usize,
    tok: &[u8],
) -> io::Result<()> {
    if let SinkMode::Join(sep) = mode {
        if *emitted > 0 { sink.write_all(sep).await?; }
        sink.write_all(tok).await?;
    }
    consumer.accept(&Token(tok));
    *emitted += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn scan_all<S: Splitter>(input: &[u8], splitter: S, mode: SinkMode) -> (Vec<String>, Vec<u8>) {
        let mut got = Vec::new();
        let sink = Scanner::new(Vec::new(), input, splitter, |t: &Token<'_>| got.push(t.to_string()))
            .with_mode(mode)
            .scan()
            .await
            .unwrap();
        (got, sink)
    }

    #[tokio::test]
    async fn read_fault_is_an_error() {
        use crate::sink::Broken;
        let mut got = Vec::new();
        let source = (&b"line1\npart"[..]).chain(Broken);
        let res = Scanner::new(Vec::new(), source, Lines, |t: &Token<'_>| got.push(t.to_string())).scan().await;
        let err = res.unwrap_err();
        assert_eq!(err.to_string(), "broken");
        // tokens complete before the fault were delivered, the partial one is not
        assert_eq!(got, vec!["line1"]);
    }

    #[tokio::test]
    async fn sink_fault_is_an_error() {
        use crate::sink::Broken;
        let res = Scanner::new(Broken, &b"a\nb\n"[..], Lines, |_: &Token<'_>| {}).scan().await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn lines_round_trip() {
        let input = b"line1\nline2\n\nline4\n";
        let (got, sink) = scan_all(input, Lines, SinkMode::Mirror).await;
        assert_eq!(got, vec!["line1", "line2", "", "line4"]);
        assert_eq!(sink, input);
    }

    #[tokio::test]
    async fn final_partial_token() {
        let (got, sink) = scan_all(b"line1\nline2", Lines, SinkMode::Mirror).await;
        assert_eq!(got, vec!["line1", "line2"]);
        assert_eq!(sink, b"line1\nline2");
    }

    #[tokio::test]
    async fn empty_input() {
        let (got, sink) = scan_all(b"", Lines, SinkMode::Mirror).await;
        assert!(got.is_empty());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn crlf_lines() {
        let (got, _) = scan_all(b"a\r\nb\r\n", Lines, SinkMode::Mirror).await;
        assert_eq!(got, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn long_token_is_not_truncated() {
        let input = "a".repeat(64 * 1024 + 1);
        let (got, sink) = scan_all(input.as_bytes(), Lines, SinkMode::Mirror).await;
        assert_eq!(got, vec![input.clone()]);
        assert_eq!(sink, input.as_bytes());
    }

    #[tokio::test]
    async fn custom_delimiter() {
        let (got, sink) = scan_all(b"line1 end line2 end", Delimiter(b' '), SinkMode::Mirror).await;
        assert_eq!(got, vec!["line1", "end", "line2", "end"]);
        assert_eq!(sink, b"line1 end line2 end");
    }

    #[tokio::test]
    async fn words_joined_by_space() {
        let (got, sink) = scan_all(b"  line1 1\nline2   2\n", Words, SinkMode::Join(b" ".to_vec())).await;
        assert_eq!(got, vec!["line1", "1", "line2", "2"]);
        assert_eq!(sink, b"line1 1 line2 2");
    }

    #[tokio::test]
    async fn single_token_join_has_no_separator() {
        let (got, sink) = scan_all(b"line1", Lines, SinkMode::Join(b",".to_vec())).await;
        assert_eq!(got, vec!["line1"]);
        assert_eq!(sink, b"line1");
    }

    #[tokio::test]
    async fn final_split_stops_tokens() {
        let split = |data: &[u8], at_eof: bool| match data.iter().position(|&b| b == b',') {
            None if at_eof && !data.is_empty() => Split::Final { advance: data.len(), token: Some(0..data.len()) },
            None => Split::NeedMore,
            Some(i) if &data[..i] == b"die" => Split::Final { advance: i + 1, token: None },
            Some(i) => Split::Token { advance: i + 1, token: 0..i },
        };
        let (got, sink) = scan_all(b"1,2,die,4", split, SinkMode::Join(b",".to_vec())).await;
        assert_eq!(got, vec!["1", "2"]);
        assert_eq!(sink, b"1,2");

        let (got, sink) = scan_all(b"1,2,die,4", split, SinkMode::Mirror).await;
        assert_eq!(got, vec!["1", "2"]);
        assert_eq!(sink, b"1,2,die,4");
    }

    #[tokio::test]
    async fn chunked_source_keeps_order() {
        let (client, mut server) = tokio::io::duplex(16);
        let writer = tokio::spawn(async move {
            for i in 0..200 {
                server.write_all(format!("row {}\n", i).as_bytes()).await.unwrap();
            }
        });
        let mut got = Vec::new();
        let sink = Scanner::new(Vec::new(), client, Lines, |t: &Token<'_>| got.push(t.to_string()))
            .scan()
            .await
            .unwrap();
        writer.await.unwrap();
        assert_eq!(got.len(), 200);
        assert_eq!(got[199], "row 199");
        assert_eq!(sink.len(), got.iter().map(|l| l.len() + 1).sum::<usize>());
    }

    #[tokio::test]
    async fn discard_sink() {
        let mut n = 0;
        Scanner::new(tokio::io::sink(), &b"a\nb\n"[..], Lines, |_: &Token<'_>| n += 1)
            .scan()
            .await
            .unwrap();
        assert_eq!(n, 2);
    }

    #[test]
    fn words_splitter_steps() {
        let mut w = Words;
        assert_eq!(w.split(b"", false), Split::NeedMore);
        assert_eq!(w.split(b"   ", false), Split::Skip { advance: 3 });
        assert_eq!(w.split(b"  ab", false), Split::Skip { advance: 2 });
        assert_eq!(w.split(b"ab", false), Split::NeedMore);
        assert_eq!(w.split(b"ab", true), Split::Token { advance: 2, token: 0..2 });
        assert_eq!(w.split(b" ab cd", false), Split::Token { advance: 4, token: 1..3 });
    }
}
