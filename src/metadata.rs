use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    element::{ByteOrder, ElementType},
};

/// Array metadata document, stored as JSON next to the chunks.
///
/// Records everything needed to read the store back: logical shape
/// (mutable along axis 0 only), fixed chunk shape, element type and the
/// fill value returned for positions never written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArrayMetadata {
    pub shape: Vec<u64>,
    pub chunk_shape: Vec<u64>,
    pub data_type: String,
    pub byte_order: String,
    pub fill_value: i64,
}

impl ArrayMetadata {
    pub fn new(
        shape: Vec<u64>,
        chunk_shape: Vec<u64>,
        element: ElementType,
        byte_order: ByteOrder,
        fill_value: i64,
    ) -> Self {
        Self {
            shape,
            chunk_shape,
            data_type: element.name().to_owned(),
            byte_order: byte_order.name().to_owned(),
            fill_value,
        }
    }

    pub fn element(&self) -> Result<ElementType> {
        ElementType::from_name(&self.data_type)
    }

    pub fn endianness(&self) -> Result<ByteOrder> {
        ByteOrder::from_name(&self.byte_order)
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let v = serde_json::to_vec_pretty(self)?;
        Ok(Bytes::from_owner(v))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// The fill value as an element-sized byte pattern.
    pub fn fill_pattern(&self) -> Result<Vec<u8>> {
        let element = self.element()?;
        let width = element.size_in_bytes();
        let fits = match element {
            ElementType::UInt8 => u8::try_from(self.fill_value).is_ok(),
            ElementType::Int8 => i8::try_from(self.fill_value).is_ok(),
            ElementType::UInt16 => u16::try_from(self.fill_value).is_ok(),
            ElementType::Int16 => i16::try_from(self.fill_value).is_ok(),
            ElementType::UInt32 => u32::try_from(self.fill_value).is_ok(),
            ElementType::Int32 => i32::try_from(self.fill_value).is_ok(),
            ElementType::UInt64 | ElementType::Int64 => true,
        };
        if !fits {
            return Err(Error::sink_create(format!(
                "fill value {} does not fit in {}",
                self.fill_value, self.data_type
            )));
        }
        let le = self.fill_value.to_le_bytes();
        let mut pattern = le[..width].to_vec();
        if self.endianness()? == ByteOrder::Big {
            pattern.reverse();
        }
        Ok(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(fill: i64) -> ArrayMetadata {
        ArrayMetadata::new(
            vec![300, 512, 512],
            vec![128, 128, 128],
            ElementType::UInt16,
            ByteOrder::Little,
            fill,
        )
    }

    #[test]
    fn json_round_trip() {
        let m = meta(0);
        let bytes = m.to_bytes().unwrap();
        assert_eq!(ArrayMetadata::from_bytes(&bytes).unwrap(), m);
    }

    #[test]
    fn fill_pattern_respects_width_and_order() {
        let mut m = meta(0x0102);
        assert_eq!(m.fill_pattern().unwrap(), vec![0x02, 0x01]);
        m.byte_order = "big".to_owned();
        assert_eq!(m.fill_pattern().unwrap(), vec![0x01, 0x02]);
    }

    #[test]
    fn fill_pattern_rejects_out_of_range() {
        assert!(meta(-1).fill_pattern().is_err());
        assert!(meta(70_000).fill_pattern().is_err());
        assert_eq!(meta(65_535).fill_pattern().unwrap(), vec![0xff, 0xff]);
    }

    #[test]
    fn negative_fill_for_signed_type() {
        let m = ArrayMetadata::new(
            vec![4, 4, 4],
            vec![2, 2, 2],
            ElementType::Int16,
            ByteOrder::Little,
            -1,
        );
        assert_eq!(m.fill_pattern().unwrap(), vec![0xff, 0xff]);
    }
}
