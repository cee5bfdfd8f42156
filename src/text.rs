/*
    himd-rs
    https://github.com/himd-rs/himd

    Copyright 2026 The himd-rs contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! Text encodings for disc and track strings.
//!
//! Every stored string opens with a one-byte encoding discriminator. Writers
//! must try the encodings in the fixed order Latin-1, Shift-JIS, UTF-16BE and
//! keep the first whose encoded bytes decode back to the exact input; devices
//! have been observed to refuse discs that break this discipline.

use crate::HimdError;

/// Encoding discriminator stored as the first content byte of a string chain.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StringEncoding {
    Latin1,
    Utf16Be,
    ShiftJis,
}

impl StringEncoding {
    pub fn to_byte(self) -> u8 {
        match self {
            StringEncoding::Latin1 => 0x05,
            StringEncoding::Utf16Be => 0x84,
            StringEncoding::ShiftJis => 0x90,
        }
    }

    pub fn from_byte(b: u8) -> Option<StringEncoding> {
        match b {
            0x05 => Some(StringEncoding::Latin1),
            0x84 => Some(StringEncoding::Utf16Be),
            0x90 => Some(StringEncoding::ShiftJis),
            _ => None,
        }
    }
}

impl std::fmt::Display for StringEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StringEncoding::Latin1 => write!(f, "Latin-1"),
            StringEncoding::Utf16Be => write!(f, "UTF-16BE"),
            StringEncoding::ShiftJis => write!(f, "Shift-JIS"),
        }
    }
}

/// Encode `s`, returning `None` when the encoding cannot represent it exactly.
pub fn encode(s: &str, encoding: StringEncoding) -> Option<Vec<u8>> {
    let bytes = match encoding {
        StringEncoding::Latin1 => {
            let mut out = Vec::with_capacity(s.len());
            for ch in s.chars() {
                let cp = ch as u32;
                if cp > 0xFF {
                    return None;
                }
                out.push(cp as u8);
            }
            out
        }
        StringEncoding::ShiftJis => {
            let (cow, _, had_errors) = encoding_rs::SHIFT_JIS.encode(s);
            if had_errors {
                return None;
            }
            cow.into_owned()
        }
        StringEncoding::Utf16Be => s
            .encode_utf16()
            .flat_map(|unit| unit.to_be_bytes())
            .collect(),
    };
    // The exact-round-trip check catches lossy mappings the encoder accepts,
    // such as Shift-JIS wave-dash substitutions.
    match decode(&bytes, encoding) {
        Ok(back) if back == s => Some(bytes),
        _ => None,
    }
}

/// Decode bytes previously stored under `encoding`.
pub fn decode(bytes: &[u8], encoding: StringEncoding) -> Result<String, HimdError> {
    match encoding {
        StringEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        StringEncoding::ShiftJis => {
            let (cow, had_errors) = encoding_rs::SHIFT_JIS.decode_without_bom_handling(bytes);
            if had_errors {
                return Err(HimdError::InvalidEncoding);
            }
            Ok(cow.into_owned())
        }
        StringEncoding::Utf16Be => {
            if bytes.len() % 2 != 0 {
                return Err(HimdError::InvalidEncoding);
            }
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect();
            String::from_utf16(&units).map_err(|_| HimdError::InvalidEncoding)
        }
    }
}

/// Pick the first encoding, in the fixed device order, that round-trips `s`
/// exactly. Returns the chosen discriminator and the encoded bytes.
pub fn pick_encoding(s: &str) -> Result<(StringEncoding, Vec<u8>), HimdError> {
    for encoding in [
        StringEncoding::Latin1,
        StringEncoding::ShiftJis,
        StringEncoding::Utf16Be,
    ] {
        if let Some(bytes) = encode(s, encoding) {
            return Ok((encoding, bytes));
        }
    }
    Err(HimdError::Unencodable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_prefers_latin1() {
        let (enc, bytes) = pick_encoding("Example disc!").unwrap();
        assert_eq!(enc, StringEncoding::Latin1);
        assert_eq!(bytes, b"Example disc!");
    }

    #[test]
    fn umlaut_stays_latin1() {
        let (enc, _) = pick_encoding("Schrödinger").unwrap();
        assert_eq!(enc, StringEncoding::Latin1);
    }

    #[test]
    fn japanese_picks_shift_jis() {
        let (enc, bytes) = pick_encoding("日本").unwrap();
        assert_eq!(enc, StringEncoding::ShiftJis);
        assert_eq!(decode(&bytes, enc).unwrap(), "日本");
    }

    #[test]
    fn mixed_script_falls_back_to_utf16() {
        // Latin-1 cannot hold the kana, Shift-JIS cannot hold the umlaut
        // round-trip combined with this codepoint set in all cases; the
        // encoder must land on something that reproduces the input exactly.
        let s = "ěščř日本";
        let (enc, bytes) = pick_encoding(s).unwrap();
        assert_eq!(enc, StringEncoding::Utf16Be);
        assert_eq!(decode(&bytes, enc).unwrap(), s);
    }

    #[test]
    fn unpaired_utf16_rejected() {
        assert!(decode(&[0xD8, 0x00], StringEncoding::Utf16Be).is_err());
        assert!(decode(&[0x00], StringEncoding::Utf16Be).is_err());
    }
}
