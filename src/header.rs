use std::io::{ErrorKind, Read, Write};

use crate::{
    Error, Result,
    element::{ByteOrder, ElementType},
};

/// Magic prefix of a raw stack file, followed by two version bytes.
pub const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Shortest possible header: magic, version, 2-byte length field.
pub const MIN_HEADER_SIZE: u64 = 10;

/// Decoded stack header: element type, per-axis extents and the byte
/// offset at which frame data begins.
///
/// Axis 0 is the frame count; the remaining axes describe one plane,
/// row-major. The stream position after [HeaderDescriptor::parse] is
/// unspecified; seek to [HeaderDescriptor::header_size] before reading
/// frame data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderDescriptor {
    pub element: ElementType,
    pub byte_order: ByteOrder,
    pub shape: Vec<u64>,
    pub header_size: u64,
}

impl HeaderDescriptor {
    /// Parse a stack header from the current stream position.
    pub fn parse(reader: &mut impl Read) -> Result<Self> {
        let mut prefix = [0u8; 8];
        read_header_bytes(reader, &mut prefix)?;
        if &prefix[..6] != MAGIC {
            return Err(Error::malformed(format!(
                "bad magic prefix {:?}",
                &prefix[..6]
            )));
        }
        let (major, minor) = (prefix[6], prefix[7]);

        // Version 1 carries a 2-byte block length, later versions 4 bytes.
        let (block_len, len_field_size) = match major {
            1 => {
                let mut b = [0u8; 2];
                read_header_bytes(reader, &mut b)?;
                (u16::from_le_bytes(b) as u64, 2u64)
            }
            2 | 3 => {
                let mut b = [0u8; 4];
                read_header_bytes(reader, &mut b)?;
                (u32::from_le_bytes(b) as u64, 4u64)
            }
            _ => {
                return Err(Error::malformed(format!(
                    "unsupported format version {major}.{minor}"
                )));
            }
        };

        let mut block = vec![0u8; block_len as usize];
        read_header_bytes(reader, &mut block)?;
        // The block is Latin-1; every byte maps to the same scalar value.
        let text: String = block.iter().map(|&b| b as char).collect();
        let fields = parse_dict(&text)?;

        let descr = fields
            .descr
            .ok_or_else(|| Error::malformed("missing 'descr' key"))?;
        let fortran_order = fields
            .fortran_order
            .ok_or_else(|| Error::malformed("missing 'fortran_order' key"))?;
        let raw_shape = fields
            .shape
            .ok_or_else(|| Error::malformed("missing 'shape' key"))?;

        if fortran_order {
            return Err(Error::malformed(
                "Fortran-order stacks are not supported: planes must be row-major",
            ));
        }
        if raw_shape.len() < 3 {
            return Err(Error::malformed(format!(
                "expected at least 3 axes (frames, rows, columns), got {}",
                raw_shape.len()
            )));
        }
        let shape = raw_shape
            .iter()
            .map(|&n| {
                u64::try_from(n)
                    .ok()
                    .filter(|&n| n > 0)
                    .ok_or_else(|| Error::malformed(format!("non-positive extent {n}")))
            })
            .collect::<Result<Vec<u64>>>()?;

        let (element, byte_order) = ElementType::from_descr(&descr)?;

        Ok(HeaderDescriptor {
            element,
            byte_order,
            shape,
            header_size: 8 + len_field_size + block_len,
        })
    }

    pub fn element_size(&self) -> usize {
        self.element.size_in_bytes()
    }

    pub fn frame_count(&self) -> u64 {
        self.shape[0]
    }

    /// Samples per plane.
    pub fn plane_len(&self) -> u64 {
        self.shape[1..].iter().product()
    }

    /// Bytes per plane.
    pub fn plane_size(&self) -> usize {
        self.plane_len() as usize * self.element_size()
    }
}

/// Write a version 1.0 header for the given element type and shape,
/// returning the header size (= offset of the first frame byte).
///
/// Inverse of [HeaderDescriptor::parse]; the block is space-padded so the
/// data offset is a multiple of 64 bytes.
pub fn write_header(
    writer: &mut impl Write,
    element: ElementType,
    byte_order: ByteOrder,
    shape: &[u64],
) -> Result<u64> {
    let mut dict = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': (",
        element.to_descr(byte_order)
    );
    for (i, extent) in shape.iter().enumerate() {
        if i > 0 {
            dict.push_str(", ");
        }
        dict.push_str(&extent.to_string());
    }
    if shape.len() == 1 {
        dict.push(',');
    }
    dict.push_str("), }");

    let unpadded = MAGIC.len() + 2 + 2 + dict.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    let block_len = dict.len() + padding + 1;

    writer.write_all(MAGIC)?;
    writer.write_all(&[1u8, 0u8])?;
    writer.write_all(&(block_len as u16).to_le_bytes())?;
    writer.write_all(dict.as_bytes())?;
    writer.write_all(&vec![b' '; padding])?;
    writer.write_all(b"\n")?;
    Ok((MAGIC.len() + 2 + 2 + block_len) as u64)
}

fn read_header_bytes(reader: &mut impl Read, buf: &mut [u8]) -> Result<()> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            Error::malformed("unexpected end of header")
        } else {
            Error::Io(e)
        }
    })
}

#[derive(Debug, Default)]
struct DictFields {
    descr: Option<String>,
    fortran_order: Option<bool>,
    shape: Option<Vec<i64>>,
}

/// Parse the dict-literal metadata block, e.g.
/// `{'descr': '<u2', 'fortran_order': False, 'shape': (300, 512, 512), }`.
fn parse_dict(text: &str) -> Result<DictFields> {
    let mut scanner = Scanner::new(text);
    let mut fields = DictFields::default();

    scanner.skip_whitespace();
    scanner.expect('{')?;
    loop {
        scanner.skip_whitespace();
        if scanner.consume('}') {
            break;
        }
        let key = scanner.quoted_string()?;
        scanner.skip_whitespace();
        scanner.expect(':')?;
        scanner.skip_whitespace();
        match key.as_str() {
            "descr" => fields.descr = Some(scanner.quoted_string()?),
            "fortran_order" => fields.fortran_order = Some(scanner.boolean()?),
            "shape" => fields.shape = Some(scanner.int_tuple()?),
            _ => {
                return Err(Error::malformed(format!("unexpected key {key:?}")));
            }
        }
        scanner.skip_whitespace();
        if !scanner.consume(',') {
            scanner.skip_whitespace();
            scanner.expect('}')?;
            break;
        }
    }
    Ok(fields)
}

struct Scanner<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn consume(&mut self, expected: char) -> bool {
        self.chars.next_if_eq(&expected).is_some()
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.chars.next() {
            Some(c) if c == expected => Ok(()),
            other => Err(Error::malformed(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn quoted_string(&mut self) -> Result<String> {
        let quote = match self.chars.next() {
            Some(c @ ('\'' | '"')) => c,
            other => {
                return Err(Error::malformed(format!(
                    "expected quoted string, found {other:?}"
                )));
            }
        };
        let mut out = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(Error::malformed("unterminated string")),
            }
        }
    }

    fn boolean(&mut self) -> Result<bool> {
        if self.keyword("True") {
            Ok(true)
        } else if self.keyword("False") {
            Ok(false)
        } else {
            Err(Error::malformed("expected True or False"))
        }
    }

    fn keyword(&mut self, word: &str) -> bool {
        if word.chars().next().is_some_and(|c| self.consume(c)) {
            for c in word.chars().skip(1) {
                if !self.consume(c) {
                    return false;
                }
            }
            true
        } else {
            false
        }
    }

    fn int_tuple(&mut self) -> Result<Vec<i64>> {
        self.expect('(')?;
        let mut out = Vec::new();
        loop {
            self.skip_whitespace();
            if self.consume(')') {
                return Ok(out);
            }
            out.push(self.integer()?);
            self.skip_whitespace();
            if !self.consume(',') {
                self.skip_whitespace();
                self.expect(')')?;
                return Ok(out);
            }
        }
    }

    fn integer(&mut self) -> Result<i64> {
        let mut digits = String::new();
        if self.consume('-') {
            digits.push('-');
        }
        while let Some(c) = self.chars.next_if(|c| c.is_ascii_digit()) {
            digits.push(c);
        }
        digits
            .parse()
            .map_err(|_| Error::malformed(format!("expected integer, found {digits:?}")))
    }
}
