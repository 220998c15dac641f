//! Typed data fragments, the unit of HOI2 payloads.
//!
//! On the wire a fragment is `type:u8 flags:u8 length:u16` followed by
//! `length` payload bytes; the stored length never includes this 4-byte
//! header. Bit 0 of `flags` marks a padded payload: single bytes and
//! bools get one trailing zero byte so following fragments stay 16-bit
//! aligned. Strings are ASCII with a terminating NUL. A `Structure` is a
//! concatenation of fragments, a `StructureArray` a concatenation of
//! `Structure` fragments.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::PrepWireError;

pub const PADDED_BIT: u8 = 0x01;

/// Wire type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ParameterType {
    Void = 0,
    Int8Bit = 1,
    Int16Bit = 2,
    Int32Bit = 3,
    UInt8Bit = 4,
    UInt16Bit = 5,
    UInt32Bit = 6,
    String = 15,
    UInt8Array = 22,
    Bool = 23,
    Int8Array = 24,
    Int16Array = 25,
    UInt16Array = 26,
    Int32Array = 27,
    UInt32Array = 28,
    BoolArray = 29,
    Structure = 30,
    StructureArray = 31,
    Enum = 32,
    HcResult = 33,
    StringArray = 34,
    EnumArray = 35,
    Int64Bit = 36,
    UInt64Bit = 37,
    Int64Array = 38,
    UInt64Array = 39,
    Real32Bit = 40,
    Real64Bit = 41,
    Real32Array = 42,
    Real64Array = 43,
}

impl ParameterType {
    pub fn from_u8(value: u8) -> Result<Self, PrepWireError> {
        use ParameterType::*;
        Ok(match value {
            0 => Void,
            1 => Int8Bit,
            2 => Int16Bit,
            3 => Int32Bit,
            4 => UInt8Bit,
            5 => UInt16Bit,
            6 => UInt32Bit,
            15 => String,
            22 => UInt8Array,
            23 => Bool,
            24 => Int8Array,
            25 => Int16Array,
            26 => UInt16Array,
            27 => Int32Array,
            28 => UInt32Array,
            29 => BoolArray,
            30 => Structure,
            31 => StructureArray,
            32 => Enum,
            33 => HcResult,
            34 => StringArray,
            35 => EnumArray,
            36 => Int64Bit,
            37 => UInt64Bit,
            38 => Int64Array,
            39 => UInt64Array,
            40 => Real32Bit,
            41 => Real64Bit,
            42 => Real32Array,
            43 => Real64Array,
            other => return Err(PrepWireError::UnsupportedType(other)),
        })
    }
}

/// A decoded fragment value.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentValue {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Bool(bool),
    Str(String),
    U8Array(Vec<u8>),
    I8Array(Vec<i8>),
    I16Array(Vec<i16>),
    U16Array(Vec<u16>),
    I32Array(Vec<i32>),
    U32Array(Vec<u32>),
    I64Array(Vec<i64>),
    U64Array(Vec<u64>),
    BoolArray(Vec<bool>),
    F32(f32),
    F64(f64),
    F32Array(Vec<f32>),
    F64Array(Vec<f64>),
    Enum(u32),
    EnumArray(Vec<u32>),
    HcResult(u16),
    Structure(Vec<Fragment>),
    StructureArray(Vec<Vec<Fragment>>),
}

/// A typed data fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub value: FragmentValue,
}

impl Fragment {
    // Constructors named after the firmware interface types.

    pub fn i8(v: i8) -> Self {
        Self { value: FragmentValue::I8(v) }
    }

    pub fn i16(v: i16) -> Self {
        Self { value: FragmentValue::I16(v) }
    }

    pub fn i32(v: i32) -> Self {
        Self { value: FragmentValue::I32(v) }
    }

    pub fn u8(v: u8) -> Self {
        Self { value: FragmentValue::U8(v) }
    }

    pub fn u16(v: u16) -> Self {
        Self { value: FragmentValue::U16(v) }
    }

    pub fn u32(v: u32) -> Self {
        Self { value: FragmentValue::U32(v) }
    }

    pub fn boolean(v: bool) -> Self {
        Self { value: FragmentValue::Bool(v) }
    }

    pub fn string(v: impl Into<String>) -> Self {
        Self { value: FragmentValue::Str(v.into()) }
    }

    pub fn real32(v: f32) -> Self {
        Self { value: FragmentValue::F32(v) }
    }

    pub fn real64(v: f64) -> Self {
        Self { value: FragmentValue::F64(v) }
    }

    pub fn enumeration(v: u32) -> Self {
        Self { value: FragmentValue::Enum(v) }
    }

    pub fn enum_array(v: Vec<u32>) -> Self {
        Self { value: FragmentValue::EnumArray(v) }
    }

    pub fn u8_array(v: Vec<u8>) -> Self {
        Self { value: FragmentValue::U8Array(v) }
    }

    pub fn structure(fragments: Vec<Fragment>) -> Self {
        Self { value: FragmentValue::Structure(fragments) }
    }

    pub fn structure_array(structures: Vec<Vec<Fragment>>) -> Self {
        Self { value: FragmentValue::StructureArray(structures) }
    }

    pub fn parameter_type(&self) -> ParameterType {
        use FragmentValue::*;
        match &self.value {
            I8(_) => ParameterType::Int8Bit,
            I16(_) => ParameterType::Int16Bit,
            I32(_) => ParameterType::Int32Bit,
            I64(_) => ParameterType::Int64Bit,
            U8(_) => ParameterType::UInt8Bit,
            U16(_) => ParameterType::UInt16Bit,
            U32(_) => ParameterType::UInt32Bit,
            U64(_) => ParameterType::UInt64Bit,
            Bool(_) => ParameterType::Bool,
            Str(_) => ParameterType::String,
            U8Array(_) => ParameterType::UInt8Array,
            I8Array(_) => ParameterType::Int8Array,
            I16Array(_) => ParameterType::Int16Array,
            U16Array(_) => ParameterType::UInt16Array,
            I32Array(_) => ParameterType::Int32Array,
            U32Array(_) => ParameterType::UInt32Array,
            I64Array(_) => ParameterType::Int64Array,
            U64Array(_) => ParameterType::UInt64Array,
            BoolArray(_) => ParameterType::BoolArray,
            F32(_) => ParameterType::Real32Bit,
            F64(_) => ParameterType::Real64Bit,
            F32Array(_) => ParameterType::Real32Array,
            F64Array(_) => ParameterType::Real64Array,
            Enum(_) => ParameterType::Enum,
            EnumArray(_) => ParameterType::EnumArray,
            HcResult(_) => ParameterType::HcResult,
            Structure(_) => ParameterType::Structure,
            StructureArray(_) => ParameterType::StructureArray,
        }
    }

    /// Encode into `type flags length payload`. Single bytes and bools
    /// get the padding byte and flag.
    pub fn encode_into(&self, out: &mut BytesMut) {
        use FragmentValue::*;

        let mut payload = BytesMut::new();
        let mut padded = false;
        match &self.value {
            I8(v) => payload.put_i8(*v),
            I16(v) => payload.put_i16_le(*v),
            I32(v) => payload.put_i32_le(*v),
            I64(v) => payload.put_i64_le(*v),
            U8(v) => {
                payload.put_u8(*v);
                padded = true;
            }
            U16(v) => payload.put_u16_le(*v),
            U32(v) => payload.put_u32_le(*v),
            U64(v) => payload.put_u64_le(*v),
            Bool(v) => {
                payload.put_u8(u8::from(*v));
                padded = true;
            }
            Str(v) => {
                payload.put_slice(v.as_bytes());
                payload.put_u8(0);
            }
            U8Array(v) => payload.put_slice(v),
            I8Array(v) => {
                for &x in v {
                    payload.put_i8(x);
                }
            }
            I16Array(v) => {
                for &x in v {
                    payload.put_i16_le(x);
                }
            }
            U16Array(v) => {
                for &x in v {
                    payload.put_u16_le(x);
                }
            }
            I32Array(v) => {
                for &x in v {
                    payload.put_i32_le(x);
                }
            }
            U32Array(v) => {
                for &x in v {
                    payload.put_u32_le(x);
                }
            }
            I64Array(v) => {
                for &x in v {
                    payload.put_i64_le(x);
                }
            }
            U64Array(v) => {
                for &x in v {
                    payload.put_u64_le(x);
                }
            }
            BoolArray(v) => {
                for &x in v {
                    payload.put_u8(u8::from(x));
                }
            }
            F32(v) => payload.put_f32_le(*v),
            F64(v) => payload.put_f64_le(*v),
            F32Array(v) => {
                for &x in v {
                    payload.put_f32_le(x);
                }
            }
            F64Array(v) => {
                for &x in v {
                    payload.put_f64_le(x);
                }
            }
            Enum(v) => payload.put_u32_le(*v),
            EnumArray(v) => {
                for &x in v {
                    payload.put_u32_le(x);
                }
            }
            HcResult(v) => payload.put_u16_le(*v),
            Structure(fragments) => {
                for fragment in fragments {
                    fragment.encode_into(&mut payload);
                }
            }
            StructureArray(structures) => {
                for fragments in structures {
                    Fragment::structure(fragments.clone()).encode_into(&mut payload);
                }
            }
        }

        let mut flags = 0u8;
        if padded {
            flags |= PADDED_BIT;
            payload.put_u8(0);
        }

        out.put_u8(self.parameter_type() as u8);
        out.put_u8(flags);
        out.put_u16_le(payload.len() as u16);
        out.put_slice(&payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::new();
        self.encode_into(&mut out);
        out.freeze()
    }

    /// Decode one fragment from the front of `data`. Returns the fragment
    /// and the number of bytes consumed (header included).
    pub fn decode(data: &[u8]) -> Result<(Self, usize), PrepWireError> {
        if data.len() < 4 {
            return Err(PrepWireError::Truncated {
                layer: "DataFragment",
                need: 4,
                got: data.len(),
            });
        }
        let parameter_type = ParameterType::from_u8(data[0])?;
        let flags = data[1];
        let length = u16::from_le_bytes([data[2], data[3]]) as usize;
        if data.len() < 4 + length {
            return Err(PrepWireError::Truncated {
                layer: "DataFragment",
                need: 4 + length,
                got: data.len(),
            });
        }
        let is_padded = flags & PADDED_BIT == PADDED_BIT;
        let mut payload = &data[4..4 + length];
        let effective = if is_padded { length.saturating_sub(1) } else { length };

        fn bad(type_name: &'static str, reason: &str) -> PrepWireError {
            PrepWireError::BadFragment {
                type_name,
                reason: reason.to_string(),
            }
        }

        // Scalars must fill their declared width.
        let scalar_width = match parameter_type {
            ParameterType::Int8Bit | ParameterType::UInt8Bit | ParameterType::Bool => 1,
            ParameterType::Int16Bit | ParameterType::UInt16Bit | ParameterType::HcResult => 2,
            ParameterType::Int32Bit
            | ParameterType::UInt32Bit
            | ParameterType::Enum
            | ParameterType::Real32Bit => 4,
            ParameterType::Int64Bit | ParameterType::UInt64Bit | ParameterType::Real64Bit => 8,
            _ => 0,
        };
        if length < scalar_width {
            return Err(PrepWireError::LengthMismatch {
                layer: "DataFragment",
                field: length,
                actual: scalar_width,
            });
        }

        let value = match parameter_type {
            ParameterType::Void => {
                return Err(PrepWireError::UnsupportedType(ParameterType::Void as u8))
            }
            ParameterType::Int8Bit => FragmentValue::I8(payload.get_i8()),
            ParameterType::Int16Bit => FragmentValue::I16(payload.get_i16_le()),
            ParameterType::Int32Bit => FragmentValue::I32(payload.get_i32_le()),
            ParameterType::Int64Bit => FragmentValue::I64(payload.get_i64_le()),
            ParameterType::UInt8Bit => FragmentValue::U8(payload.get_u8()),
            ParameterType::UInt16Bit => FragmentValue::U16(payload.get_u16_le()),
            ParameterType::UInt32Bit => FragmentValue::U32(payload.get_u32_le()),
            ParameterType::UInt64Bit => FragmentValue::U64(payload.get_u64_le()),
            ParameterType::Bool => FragmentValue::Bool(payload.get_u8() != 0),
            ParameterType::String => {
                // Effective length includes the NUL terminator.
                if effective == 0 {
                    FragmentValue::Str(String::new())
                } else {
                    let text = &payload[..effective - 1];
                    FragmentValue::Str(
                        std::str::from_utf8(text)
                            .map_err(|_| bad("String", "not valid ASCII"))?
                            .to_string(),
                    )
                }
            }
            ParameterType::UInt8Array => FragmentValue::U8Array(payload[..effective].to_vec()),
            ParameterType::Int8Array => {
                FragmentValue::I8Array(payload[..effective].iter().map(|&b| b as i8).collect())
            }
            ParameterType::Int16Array => {
                let mut v = Vec::with_capacity(length / 2);
                for _ in 0..length / 2 {
                    v.push(payload.get_i16_le());
                }
                FragmentValue::I16Array(v)
            }
            ParameterType::UInt16Array => {
                let mut v = Vec::with_capacity(length / 2);
                for _ in 0..length / 2 {
                    v.push(payload.get_u16_le());
                }
                FragmentValue::U16Array(v)
            }
            ParameterType::Int32Array => {
                let mut v = Vec::with_capacity(length / 4);
                for _ in 0..length / 4 {
                    v.push(payload.get_i32_le());
                }
                FragmentValue::I32Array(v)
            }
            ParameterType::UInt32Array => {
                let mut v = Vec::with_capacity(length / 4);
                for _ in 0..length / 4 {
                    v.push(payload.get_u32_le());
                }
                FragmentValue::U32Array(v)
            }
            ParameterType::Int64Array => {
                let mut v = Vec::with_capacity(length / 8);
                for _ in 0..length / 8 {
                    v.push(payload.get_i64_le());
                }
                FragmentValue::I64Array(v)
            }
            ParameterType::UInt64Array => {
                let mut v = Vec::with_capacity(length / 8);
                for _ in 0..length / 8 {
                    v.push(payload.get_u64_le());
                }
                FragmentValue::U64Array(v)
            }
            ParameterType::BoolArray => {
                FragmentValue::BoolArray(payload[..effective].iter().map(|&b| b != 0).collect())
            }
            ParameterType::Real32Bit => FragmentValue::F32(payload.get_f32_le()),
            ParameterType::Real64Bit => FragmentValue::F64(payload.get_f64_le()),
            ParameterType::Real32Array => {
                let mut v = Vec::with_capacity(length / 4);
                for _ in 0..length / 4 {
                    v.push(payload.get_f32_le());
                }
                FragmentValue::F32Array(v)
            }
            ParameterType::Real64Array => {
                let mut v = Vec::with_capacity(length / 8);
                for _ in 0..length / 8 {
                    v.push(payload.get_f64_le());
                }
                FragmentValue::F64Array(v)
            }
            ParameterType::Enum => FragmentValue::Enum(payload.get_u32_le()),
            ParameterType::EnumArray => {
                let mut v = Vec::with_capacity(length / 4);
                for _ in 0..length / 4 {
                    v.push(payload.get_u32_le());
                }
                FragmentValue::EnumArray(v)
            }
            ParameterType::HcResult => FragmentValue::HcResult(payload.get_u16_le()),
            ParameterType::Structure => {
                let mut fragments = Vec::new();
                let mut offset = 0;
                let inner = &data[4..4 + length];
                while offset < inner.len() {
                    let (fragment, consumed) = Fragment::decode(&inner[offset..])?;
                    fragments.push(fragment);
                    offset += consumed;
                }
                FragmentValue::Structure(fragments)
            }
            ParameterType::StructureArray => {
                let mut structures = Vec::new();
                let mut offset = 0;
                let inner = &data[4..4 + length];
                while offset < inner.len() {
                    let (fragment, consumed) = Fragment::decode(&inner[offset..])?;
                    match fragment.value {
                        FragmentValue::Structure(fragments) => structures.push(fragments),
                        _ => {
                            return Err(bad(
                                "StructureArray",
                                "array element is not a structure",
                            ))
                        }
                    }
                    offset += consumed;
                }
                FragmentValue::StructureArray(structures)
            }
            ParameterType::StringArray => {
                return Err(PrepWireError::UnsupportedType(
                    ParameterType::StringArray as u8,
                ))
            }
        };

        Ok((Self { value }, 4 + length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(fragment: Fragment) -> Fragment {
        let bytes = fragment.to_bytes();
        let (decoded, consumed) = Fragment::decode(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        decoded
    }

    #[test]
    fn golden_real32() {
        // 152.6 as recorded from the instrument.
        let bytes = Fragment::real32(152.6).to_bytes();
        assert_eq!(hex::encode(&bytes), "280004009a991843");
    }

    #[test]
    fn golden_bools_are_padded() {
        assert_eq!(hex::encode(Fragment::boolean(false).to_bytes()), "170102000000");
        assert_eq!(hex::encode(Fragment::boolean(true).to_bytes()), "170102000100");
    }

    #[test]
    fn golden_u8_is_padded() {
        // UInt8Bit 255: type 0x04, padded flag, length 2.
        assert_eq!(hex::encode(Fragment::u8(255).to_bytes()), "04010200ff00");
    }

    #[test]
    fn scalar_roundtrips() {
        assert_eq!(roundtrip(Fragment::i8(-5)).value, FragmentValue::I8(-5));
        assert_eq!(roundtrip(Fragment::i16(-300)).value, FragmentValue::I16(-300));
        assert_eq!(roundtrip(Fragment::i32(70000)).value, FragmentValue::I32(70000));
        assert_eq!(roundtrip(Fragment::u16(0xBEEF)).value, FragmentValue::U16(0xBEEF));
        assert_eq!(roundtrip(Fragment::u32(0xDEADBEEF)).value, FragmentValue::U32(0xDEADBEEF));
        assert_eq!(roundtrip(Fragment::boolean(true)).value, FragmentValue::Bool(true));
        assert_eq!(roundtrip(Fragment::enumeration(2)).value, FragmentValue::Enum(2));
    }

    #[test]
    fn string_roundtrips_with_nul() {
        let fragment = Fragment::string("STF");
        let bytes = fragment.to_bytes();
        // length 4: three chars plus NUL.
        assert_eq!(bytes[2], 4);
        assert_eq!(roundtrip(fragment).value, FragmentValue::Str("STF".into()));
        assert_eq!(
            roundtrip(Fragment::string("")).value,
            FragmentValue::Str(String::new())
        );
    }

    #[test]
    fn real_roundtrips_within_tolerance() {
        let decoded = roundtrip(Fragment::real32(94.97));
        match decoded.value {
            FragmentValue::F32(v) => assert!((v - 94.97).abs() / 94.97 < 1e-6),
            _ => panic!("expected f32"),
        }
        let decoded = roundtrip(Fragment::real64(0.01072765));
        match decoded.value {
            FragmentValue::F64(v) => assert!((v - 0.01072765).abs() < 1e-12),
            _ => panic!("expected f64"),
        }
    }

    #[test]
    fn array_roundtrips() {
        let cases = vec![
            Fragment { value: FragmentValue::I16Array(vec![-1, 0, 1]) },
            Fragment { value: FragmentValue::U32Array(vec![1, 2, 3]) },
            Fragment { value: FragmentValue::F32Array(vec![1.5, -2.5]) },
            Fragment { value: FragmentValue::F64Array(vec![0.25]) },
            Fragment { value: FragmentValue::BoolArray(vec![true, false, true]) },
            Fragment::enum_array(vec![1, 2]),
            Fragment::u8_array(vec![255, 0, 0, 0]),
        ];
        for fragment in cases {
            assert_eq!(roundtrip(fragment.clone()), fragment);
        }
    }

    #[test]
    fn structures_nest() {
        let inner = vec![
            Fragment::boolean(true),
            Fragment::real32(1.0),
            Fragment::string("abc"),
        ];
        let fragment = Fragment::structure_array(vec![inner.clone(), inner.clone()]);
        let decoded = roundtrip(fragment);
        match decoded.value {
            FragmentValue::StructureArray(structures) => {
                assert_eq!(structures.len(), 2);
                assert_eq!(structures[0], inner);
            }
            _ => panic!("expected structure array"),
        }
    }

    #[test]
    fn truncated_fragment_is_an_error() {
        let bytes = Fragment::real32(1.0).to_bytes();
        assert!(matches!(
            Fragment::decode(&bytes[..5]),
            Err(PrepWireError::Truncated { .. })
        ));
    }
}
