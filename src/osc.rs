//! Open Sound Control message encoding.
//!
//! Layout of a message on the wire:
//!
//! ```text
//! address\0 [pad to 4] ,tags\0 [pad to 4] arg0 [pad] arg1 [pad] ...
//! ```
//!
//! `f` and `i` arguments are 4 byte big-endian values, `s` arguments are
//! null-terminated strings padded to a multiple of 4 bytes.

use std::{borrow::Cow, fmt};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Arg<'a> {
    Float(f32),
    Int(i32),
    Str(Cow<'a, str>),
}

impl Arg<'_> {
    pub fn tag(&self) -> char {
        match self {
            Arg::Float(_) => 'f',
            Arg::Int(_) => 'i',
            Arg::Str(_) => 's',
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Arg::Float(_) | Arg::Int(_) => 4,
            Arg::Str(s) => padded_str_len(s),
        }
    }
}

impl fmt::Display for Arg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Float(v) => write!(f, "{}", v),
            Arg::Int(v) => write!(f, "{}", v),
            Arg::Str(v) => write!(f, "{:?}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("buffer holds {available} bytes, message needs {needed}")]
    BufferTooSmall { needed: usize, available: usize },
    #[error("{tags} type tags for {args} arguments")]
    ArgumentCount { tags: usize, args: usize },
    #[error("argument {index} does not match type tag '{tag}'")]
    TypeMismatch { index: usize, tag: char },
    #[error("unsupported type tag '{0}'")]
    UnsupportedTag(char),
    #[error("address must start with '/'")]
    InvalidAddress,
    #[error("string contains a nul byte")]
    InvalidString,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("message length {0} is not a multiple of 4")]
    Misaligned(usize),
    #[error("message ends before byte {0}")]
    Truncated(usize),
    #[error("string at byte {0} is not null-terminated")]
    Unterminated(usize),
    #[error("string at byte {0} is not utf-8")]
    InvalidUtf8(usize),
    #[error("address must start with '/'")]
    InvalidAddress,
    #[error("type tag string missing")]
    MissingTypeTags,
    #[error("unsupported type tag '{0}'")]
    UnsupportedTag(char),
}

/// Length of `s` plus its terminator, rounded up to 4.
fn padded_str_len(s: &str) -> usize {
    (s.len() + 4) & !3
}

/// Number of bytes `encode` writes for this address and these arguments.
pub fn encoded_len(address: &str, args: &[Arg<'_>]) -> usize {
    // ',' + one tag per argument
    let tags_len = (args.len() + 1 + 4) & !3;
    padded_str_len(address) + tags_len + args.iter().map(Arg::encoded_len).sum::<usize>()
}

fn validate(address: &str, tags: &str, args: &[Arg<'_>]) -> Result<(), EncodeError> {
    if !address.starts_with('/') {
        return Err(EncodeError::InvalidAddress);
    }
    if address.contains('\0') {
        return Err(EncodeError::InvalidString);
    }

    let tag_count = tags.chars().count();
    if tag_count != args.len() {
        return Err(EncodeError::ArgumentCount {
            tags: tag_count,
            args: args.len(),
        });
    }

    for (index, (tag, arg)) in tags.chars().zip(args).enumerate() {
        if !matches!(tag, 'f' | 'i' | 's') {
            return Err(EncodeError::UnsupportedTag(tag));
        }
        if arg.tag() != tag {
            return Err(EncodeError::TypeMismatch { index, tag });
        }
        if let Arg::Str(s) = arg {
            if s.contains('\0') {
                return Err(EncodeError::InvalidString);
            }
        }
    }

    Ok(())
}

/// Writes a message into `buf` and returns the number of bytes used.
///
/// Everything is validated and the full length computed before the first
/// byte is written, so a failed call leaves `buf` untouched.
pub fn encode(
    buf: &mut [u8],
    address: &str,
    tags: &str,
    args: &[Arg<'_>],
) -> Result<usize, EncodeError> {
    validate(address, tags, args)?;

    let needed = encoded_len(address, args);
    if buf.len() < needed {
        return Err(EncodeError::BufferTooSmall {
            needed,
            available: buf.len(),
        });
    }

    let buf = &mut buf[..needed];
    let mut pos = write_str(buf, 0, address);

    buf[pos] = b',';
    pos = write_str(buf, pos + 1, tags);

    for arg in args {
        pos = match arg {
            Arg::Float(v) => write_word(buf, pos, v.to_be_bytes()),
            Arg::Int(v) => write_word(buf, pos, v.to_be_bytes()),
            Arg::Str(s) => write_str(buf, pos, s),
        };
    }

    debug_assert_eq!(pos, needed);
    Ok(pos)
}

fn write_word(buf: &mut [u8], pos: usize, word: [u8; 4]) -> usize {
    buf[pos..pos + 4].copy_from_slice(&word);
    pos + 4
}

// writes the string, its terminator and the zero padding after it; the end
// is always 4 aligned relative to the start of the message
fn write_str(buf: &mut [u8], pos: usize, s: &str) -> usize {
    let end = (pos + s.len() + 4) & !3;
    buf[pos..pos + s.len()].copy_from_slice(s.as_bytes());
    buf[pos + s.len()..end].fill(0);
    end
}

/// An owned message: one address, any number of arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub address: String,
    pub args: Vec<Arg<'static>>,
}

impl Message {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    pub fn with_float(mut self, value: f32) -> Self {
        self.args.push(Arg::Float(value));
        self
    }

    pub fn with_int(mut self, value: i32) -> Self {
        self.args.push(Arg::Int(value));
        self
    }

    pub fn with_str(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg::Str(Cow::Owned(value.into())));
        self
    }

    /// Type tags without the leading ','.
    pub fn type_tags(&self) -> String {
        self.args.iter().map(Arg::tag).collect()
    }

    pub fn encoded_len(&self) -> usize {
        encoded_len(&self.address, &self.args)
    }

    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        encode(buf, &self.address, &self.type_tags(), &self.args)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = vec![0; self.encoded_len()];
        self.encode_into(&mut buf)?;
        Ok(buf)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ,{}", self.address, self.type_tags())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Parses one encoded message.
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    if bytes.len() % 4 != 0 {
        return Err(DecodeError::Misaligned(bytes.len()));
    }

    let (address, mut pos) = read_str(bytes, 0)?;
    if !address.starts_with('/') {
        return Err(DecodeError::InvalidAddress);
    }

    if bytes.get(pos) != Some(&b',') {
        return Err(DecodeError::MissingTypeTags);
    }
    let (tags, next) = read_str(bytes, pos)?;
    pos = next;

    let mut message = Message::new(address);
    for tag in tags.chars().skip(1) {
        let arg = match tag {
            'f' => Arg::Float(f32::from_be_bytes(read_word(bytes, pos)?)),
            'i' => Arg::Int(i32::from_be_bytes(read_word(bytes, pos)?)),
            's' => {
                let (s, next) = read_str(bytes, pos)?;
                message.args.push(Arg::Str(Cow::Owned(s.to_owned())));
                pos = next;
                continue;
            }
            other => return Err(DecodeError::UnsupportedTag(other)),
        };
        message.args.push(arg);
        pos += 4;
    }

    Ok(message)
}

fn read_word(bytes: &[u8], pos: usize) -> Result<[u8; 4], DecodeError> {
    bytes
        .get(pos..pos + 4)
        .and_then(|word| word.try_into().ok())
        .ok_or(DecodeError::Truncated(pos + 4))
}

fn read_str(bytes: &[u8], pos: usize) -> Result<(&str, usize), DecodeError> {
    let rest = bytes.get(pos..).ok_or(DecodeError::Truncated(pos))?;
    let len = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::Unterminated(pos))?;
    let s = std::str::from_utf8(&rest[..len]).map_err(|_| DecodeError::InvalidUtf8(pos))?;

    let end = (pos + len + 4) & !3;
    if end > bytes.len() {
        return Err(DecodeError::Truncated(end));
    }
    Ok((s, end))
}

/// Hex dump in 4 byte words, one line per 16 bytes.
pub fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(line, chunk)| {
            let words: Vec<String> = chunk.chunks(4).map(hex::encode).collect();
            format!("{:04x}  {}", line * 16, words.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
