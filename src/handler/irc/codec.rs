//! IRC line codec.

use std::fmt;

use anyhow::{anyhow, Error};
use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

/// Longest line accepted from the server, including IRCv3 tags.
const MAX_LINE_LENGTH: usize = 8191;

/// One IRC protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    /// Source (`nick!user@host` or a server name), without the leading `:`.
    pub prefix: Option<String>,
    /// Command or numeric, upper-cased.
    pub command: String,
    /// Parameters; the trailing parameter is stored without its `:`.
    pub params: Vec<String>,
}

impl IrcMessage {
    pub fn new(command: &str, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command: command.to_uppercase(),
            params,
        }
    }

    pub fn privmsg(target: &str, text: &str) -> Self {
        Self::new("PRIVMSG", vec![target.to_string(), text.to_string()])
    }

    /// Parse one line (without the line terminator).
    ///
    /// IRCv3 message tags are skipped. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        if rest.starts_with('@') {
            rest = rest.split_once(' ').map(|(_, r)| r)?;
        }
        rest = rest.trim_start();

        let prefix = match rest.strip_prefix(':') {
            Some(stripped) => {
                let (prefix, r) = stripped.split_once(' ')?;
                rest = r.trim_start();
                Some(prefix.to_string())
            }
            None => None,
        };

        let (head, trailing) = match rest.split_once(" :") {
            Some((head, trailing)) => (head, Some(trailing)),
            None => (rest, None),
        };

        let mut words = head.split(' ').filter(|w| !w.is_empty());
        let command = words.next()?.to_uppercase();
        let mut params: Vec<String> = words.map(str::to_string).collect();
        if let Some(trailing) = trailing {
            params.push(trailing.to_string());
        }

        Some(Self {
            prefix,
            command,
            params,
        })
    }

    /// Nick part of the prefix.
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split(['!', '@']).next().unwrap_or(prefix))
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }
}

impl fmt::Display for IrcMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref prefix) = self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        f.write_str(&self.command)?;

        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            if i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':')) {
                write!(f, " :{}", param)?;
            } else {
                write!(f, " {}", param)?;
            }
        }
        Ok(())
    }
}

/// `\r\n`-terminated line codec producing [`IrcMessage`]s.
#[derive(Debug, Default)]
pub struct IrcCodec {
    /// Bytes already scanned for a newline.
    next_index: usize,
}

impl IrcCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for IrcCodec {
    type Item = IrcMessage;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(anyhow!("IRC line exceeds {} bytes", MAX_LINE_LENGTH));
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let line_end = self.next_index + offset;
            self.next_index = 0;
            let line = src.split_to(line_end + 1);
            let text = String::from_utf8_lossy(&line[..line_end]);

            // Blank lines are legal filler; keep scanning
            if let Some(message) = IrcMessage::parse(&text) {
                return Ok(Some(message));
            }
            if !src.has_remaining() {
                return Ok(None);
            }
        }
    }
}

impl Encoder<IrcMessage> for IrcCodec {
    type Error = Error;

    fn encode(&mut self, item: IrcMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // Embedded line breaks would start a new command
        let line: String = item
            .to_string()
            .chars()
            .filter(|c| *c != '\r' && *c != '\n')
            .collect();

        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

/// A framed IRC connection.
pub type IrcConnection<S> = Framed<S, IrcCodec>;

/// Create a new IRC connection from a stream.
pub fn new_irc_connection<S: AsyncRead + AsyncWrite>(stream: S) -> IrcConnection<S> {
    Framed::new(stream, IrcCodec::new())
}
