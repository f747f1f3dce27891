use crate::{Error, Result};

/// Fixed-width integer sample types.
///
/// Floating point, complex and variable-width types exist in the wild but
/// are not valid frame-stack elements here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    UInt64,
    Int64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
}

impl ElementType {
    pub fn size_in_bytes(&self) -> usize {
        match self {
            ElementType::UInt8 | ElementType::Int8 => 1,
            ElementType::UInt16 | ElementType::Int16 => 2,
            ElementType::UInt32 | ElementType::Int32 => 4,
            ElementType::UInt64 | ElementType::Int64 => 8,
        }
    }

    /// Canonical name used in store metadata.
    pub fn name(&self) -> &'static str {
        match self {
            ElementType::UInt8 => "uint8",
            ElementType::Int8 => "int8",
            ElementType::UInt16 => "uint16",
            ElementType::Int16 => "int16",
            ElementType::UInt32 => "uint32",
            ElementType::Int32 => "int32",
            ElementType::UInt64 => "uint64",
            ElementType::Int64 => "int64",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let out = match name {
            "uint8" => ElementType::UInt8,
            "int8" => ElementType::Int8,
            "uint16" => ElementType::UInt16,
            "int16" => ElementType::Int16,
            "uint32" => ElementType::UInt32,
            "int32" => ElementType::Int32,
            "uint64" => ElementType::UInt64,
            "int64" => ElementType::Int64,
            s => return Err(Error::malformed(format!("unsupported data type: {s}"))),
        };
        Ok(out)
    }

    /// Parse an npy `descr` code such as `<u2` or `|i1`.
    ///
    /// The leading byte-order character is mandatory; single-byte types
    /// conventionally carry `|` (not applicable).
    pub fn from_descr(descr: &str) -> Result<(Self, ByteOrder)> {
        let unsupported = || Error::UnsupportedElementType {
            descr: descr.to_owned(),
        };
        let mut chars = descr.chars();
        let order = match chars.next() {
            Some('<') | Some('|') | Some('=') => ByteOrder::Little,
            Some('>') => ByteOrder::Big,
            _ => return Err(Error::malformed(format!("invalid descr {descr:?}"))),
        };
        let code = chars.next().ok_or_else(unsupported)?;
        let width: u32 = chars.as_str().parse().map_err(|_| unsupported())?;
        let out = match (code, width) {
            ('u', 1) => ElementType::UInt8,
            ('i', 1) => ElementType::Int8,
            ('u', 2) => ElementType::UInt16,
            ('i', 2) => ElementType::Int16,
            ('u', 4) => ElementType::UInt32,
            ('i', 4) => ElementType::Int32,
            ('u', 8) => ElementType::UInt64,
            ('i', 8) => ElementType::Int64,
            _ => return Err(unsupported()),
        };
        Ok((out, order))
    }

    pub fn to_descr(&self, order: ByteOrder) -> String {
        let order_char = if self.size_in_bytes() == 1 {
            '|'
        } else {
            match order {
                ByteOrder::Little => '<',
                ByteOrder::Big => '>',
            }
        };
        let code = match self {
            ElementType::UInt8 | ElementType::UInt16 | ElementType::UInt32 | ElementType::UInt64 => {
                'u'
            }
            _ => 'i',
        };
        format!("{order_char}{code}{}", self.size_in_bytes())
    }
}

impl ByteOrder {
    pub fn name(&self) -> &'static str {
        match self {
            ByteOrder::Little => "little",
            ByteOrder::Big => "big",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "little" => Ok(ByteOrder::Little),
            "big" => Ok(ByteOrder::Big),
            s => Err(Error::malformed(format!("unsupported byte order: {s}"))),
        }
    }
}
