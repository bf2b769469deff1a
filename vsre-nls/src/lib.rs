use encoding_rs::{Encoding as RsEncoding, UTF_8, WINDOWS_1252};
use std::borrow::Cow;

pub trait TextDecoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str>;

    /// Decode C-style string: stop at the first NUL (0x00).
    fn decode_cstr<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        self.decode(&bytes[..end])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// Treat Latin-1 as windows-1252 (superset). This is robust for
    /// identifier pools written by legacy Western toolchains.
    Latin1,
}

impl Encoding {
    #[inline]
    pub fn as_encoding_rs(self) -> &'static RsEncoding {
        match self {
            Encoding::Utf8 => UTF_8,
            Encoding::Latin1 => WINDOWS_1252,
        }
    }
}

/// A simple decoder bound to one encoding.
#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    enc: Encoding,
}

impl Decoder {
    #[inline]
    pub fn new(enc: Encoding) -> Self {
        Self { enc }
    }

    #[inline]
    pub fn encoding(&self) -> Encoding {
        self.enc
    }

    /// Encode a Rust string to bytes using the selected encoding.
    /// This is "best effort": unrepresentable chars will be replaced.
    pub fn encode<'a>(&self, s: &'a str) -> Cow<'a, [u8]> {
        let enc = self.enc.as_encoding_rs();
        let (cow, _had_errors, _) = enc.encode(s);
        cow
    }

    /// Same as encode(), but always returns an owned Vec<u8>.
    pub fn encode_owned(&self, s: &str) -> Vec<u8> {
        self.encode(s).into_owned()
    }
}

impl TextDecoder for Decoder {
    fn decode<'a>(&self, bytes: &'a [u8]) -> Cow<'a, str> {
        match self.enc {
            Encoding::Utf8 => match std::str::from_utf8(bytes) {
                Ok(s) => Cow::Borrowed(s),
                Err(_) => Cow::Owned(String::from_utf8_lossy(bytes).into_owned()),
            },
            Encoding::Latin1 => {
                let enc = self.enc.as_encoding_rs();
                let (cow, _had_errors, _) = enc.decode(bytes);
                cow
            }
        }
    }
}

/// A convenience default.
impl Default for Decoder {
    fn default() -> Self {
        Self::new(Encoding::Utf8)
    }
}
