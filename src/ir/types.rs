//! Bit-precise value types.
//!
//! Every tensor element and every expression carries a [`ValueType`]. Integer-like
//! types (signed, unsigned, fixed-point and packed structs) support bit and slice
//! access; floats do not.

use crate::utils::errors::{StageResult, TypeError, TypeErrorKind};
use serde::{Serialize, Deserialize};
use std::fmt;
use std::str::FromStr;

/// An element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    /// Signed two's-complement integer of the given width
    Int(u32),
    /// Unsigned integer of the given width
    UInt(u32),
    /// Signed fixed-point: total width and fractional bits
    Fixed { bits: u32, frac: u32 },
    /// Unsigned fixed-point: total width and fractional bits
    UFixed { bits: u32, frac: u32 },
    /// IEEE float of width 16, 32 or 64
    Float(u32),
    /// Packed bit-field struct
    Struct(StructType),
}

impl ValueType {
    pub fn int(bits: u32) -> Self {
        ValueType::Int(bits)
    }

    pub fn uint(bits: u32) -> Self {
        ValueType::UInt(bits)
    }

    pub fn float(bits: u32) -> Self {
        ValueType::Float(bits)
    }

    /// Total bit width.
    pub fn bits(&self) -> u32 {
        match self {
            ValueType::Int(b) | ValueType::UInt(b) | ValueType::Float(b) => *b,
            ValueType::Fixed { bits, .. } | ValueType::UFixed { bits, .. } => *bits,
            ValueType::Struct(s) => s.bits(),
        }
    }

    /// Fractional bits (zero for everything but fixed-point).
    pub fn frac(&self) -> u32 {
        match self {
            ValueType::Fixed { frac, .. } | ValueType::UFixed { frac, .. } => *frac,
            _ => 0,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, ValueType::Int(_) | ValueType::Fixed { .. } | ValueType::Float(_))
    }

    pub fn is_float(&self) -> bool {
        matches!(self, ValueType::Float(_))
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, ValueType::Fixed { .. } | ValueType::UFixed { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, ValueType::Struct(_))
    }

    /// Whether bit and slice indexing are defined on this type.
    pub fn is_integer_like(&self) -> bool {
        !self.is_float()
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            ValueType::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// The unsigned integer type a struct is packed into; other types unchanged.
    pub fn storage_type(&self) -> ValueType {
        match self {
            ValueType::Struct(s) => ValueType::UInt(s.bits()),
            other => other.clone(),
        }
    }

    /// Check a dtype for a usable width.
    pub fn validate(&self) -> StageResult<()> {
        let bad = |msg: String| Err(TypeError::new(TypeErrorKind::InvalidType, msg).into());
        match self {
            ValueType::Int(0) | ValueType::UInt(0) => bad(format!("zero-width integer type '{}'", self)),
            ValueType::Float(b) if !matches!(b, 16 | 32 | 64) => {
                bad(format!("unsupported float width {}", b))
            }
            ValueType::Fixed { bits, frac } | ValueType::UFixed { bits, frac } if *bits == 0 || frac > bits => {
                bad(format!("invalid fixed-point type '{}'", self))
            }
            ValueType::Struct(s) => s.fields.iter().try_for_each(|f| f.ty.validate()),
            _ => Ok(()),
        }
    }

    /// Common type of a binary arithmetic operation.
    pub fn promote(lhs: &ValueType, rhs: &ValueType) -> ValueType {
        if lhs == rhs {
            return lhs.storage_type();
        }
        let (l, r) = (lhs.storage_type(), rhs.storage_type());
        match (&l, &r) {
            (ValueType::Float(a), ValueType::Float(b)) => ValueType::Float(*a.max(b)),
            (ValueType::Float(_), _) => l,
            (_, ValueType::Float(_)) => r,
            _ if l.is_fixed() || r.is_fixed() => {
                let frac = l.frac().max(r.frac());
                let int_bits = (l.bits() - l.frac()).max(r.bits() - r.frac());
                if l.is_signed() || r.is_signed() {
                    ValueType::Fixed { bits: int_bits + frac, frac }
                } else {
                    ValueType::UFixed { bits: int_bits + frac, frac }
                }
            }
            _ => {
                let bits = l.bits().max(r.bits());
                if l.is_signed() || r.is_signed() { ValueType::Int(bits) } else { ValueType::UInt(bits) }
            }
        }
    }

    /// Check that `[lo, hi)` lies inside this type's width.
    pub fn check_slice(&self, lo: u32, hi: u32) -> StageResult<()> {
        if !self.is_integer_like() {
            return Err(TypeError::new(
                TypeErrorKind::NotIntegerLike,
                format!("slice [{}:{}] on non-integer type '{}'", lo, hi, self),
            ).into());
        }
        if lo >= hi || hi > self.bits() {
            return Err(TypeError::new(
                TypeErrorKind::InvalidSlice,
                format!("slice [{}:{}] outside {}-bit type '{}'", lo, hi, self.bits(), self),
            ).into());
        }
        Ok(())
    }

    /// Check that bit `index` lies inside this type's width.
    pub fn check_bit(&self, index: i64) -> StageResult<()> {
        if !self.is_integer_like() {
            return Err(TypeError::new(
                TypeErrorKind::NotIntegerLike,
                format!("bit access on non-integer type '{}'", self),
            ).into());
        }
        if index < 0 || index >= self.bits() as i64 {
            return Err(TypeError::new(
                TypeErrorKind::BitOutOfRange,
                format!("bit {} outside {}-bit type '{}'", index, self.bits(), self),
            ).into());
        }
        Ok(())
    }
}

/// Bit width of a value type.
pub fn get_bitwidth(ty: &ValueType) -> u32 {
    ty.bits()
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Int(b) => write!(f, "int{}", b),
            ValueType::UInt(b) => write!(f, "uint{}", b),
            ValueType::Fixed { bits, frac } => write!(f, "fixed{}_{}", bits, frac),
            ValueType::UFixed { bits, frac } => write!(f, "ufixed{}_{}", bits, frac),
            ValueType::Float(b) => write!(f, "float{}", b),
            ValueType::Struct(s) => {
                write!(f, "struct{{")?;
                for (i, field) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.ty)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl FromStr for ValueType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TypeError::new(TypeErrorKind::InvalidType, format!("unknown dtype '{}'", s));
        let number = |digits: &str| digits.parse::<u32>().map_err(|_| invalid());
        let fixed = |rest: &str| -> Result<(u32, u32), TypeError> {
            let (bits, frac) = rest.split_once('_').ok_or_else(invalid)?;
            Ok((number(bits)?, number(frac)?))
        };

        let ty = if let Some(rest) = s.strip_prefix("ufixed") {
            let (bits, frac) = fixed(rest)?;
            ValueType::UFixed { bits, frac }
        } else if let Some(rest) = s.strip_prefix("fixed") {
            let (bits, frac) = fixed(rest)?;
            ValueType::Fixed { bits, frac }
        } else if let Some(rest) = s.strip_prefix("uint") {
            ValueType::UInt(number(rest)?)
        } else if let Some(rest) = s.strip_prefix("int") {
            ValueType::Int(number(rest)?)
        } else if let Some(rest) = s.strip_prefix("float") {
            ValueType::Float(number(rest)?)
        } else {
            return Err(invalid());
        };
        match ty.validate() {
            Ok(()) => Ok(ty),
            Err(_) => Err(invalid()),
        }
    }
}

/// A field of a packed struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    pub ty: ValueType,
    /// Bit offset from the least significant bit
    pub offset: u32,
}

impl StructField {
    /// The bit range `[lo, hi)` occupied by the field.
    pub fn range(&self) -> (u32, u32) {
        (self.offset, self.offset + self.ty.bits())
    }
}

/// A struct type: fields packed without padding in declaration order, the first
/// field in the least significant bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructType {
    fields: Vec<StructField>,
}

impl StructType {
    /// Build a struct from ordered `(name, type)` pairs.
    pub fn new<S: Into<String>>(fields: impl IntoIterator<Item = (S, ValueType)>) -> StageResult<Self> {
        let mut packed: Vec<StructField> = Vec::new();
        let mut offset = 0;
        for (name, ty) in fields {
            let name = name.into();
            if ty.is_float() {
                return Err(TypeError::new(
                    TypeErrorKind::InvalidType,
                    format!("struct field '{}' must be integer-like, found '{}'", name, ty),
                ).into());
            }
            if packed.iter().any(|f| f.name == name) {
                return Err(TypeError::new(
                    TypeErrorKind::InvalidType,
                    format!("duplicate struct field '{}'", name),
                ).into());
            }
            ty.validate()?;
            let bits = ty.bits();
            packed.push(StructField { name, ty, offset });
            offset += bits;
        }
        Ok(Self { fields: packed })
    }

    pub fn fields(&self) -> &[StructField] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> StageResult<&StructField> {
        self.fields.iter().find(|f| f.name == name).ok_or_else(|| {
            TypeError::new(TypeErrorKind::UnknownField, format!("struct has no field '{}'", name)).into()
        })
    }

    pub fn bits(&self) -> u32 {
        self.fields.iter().map(|f| f.ty.bits()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dtype_strings() {
        assert_eq!("int32".parse::<ValueType>().unwrap(), ValueType::Int(32));
        assert_eq!("uint8".parse::<ValueType>().unwrap(), ValueType::UInt(8));
        assert_eq!("fixed16_4".parse::<ValueType>().unwrap(), ValueType::Fixed { bits: 16, frac: 4 });
        assert_eq!("ufixed8_2".parse::<ValueType>().unwrap(), ValueType::UFixed { bits: 8, frac: 2 });
        assert_eq!("float32".parse::<ValueType>().unwrap(), ValueType::Float(32));
        assert!("float24".parse::<ValueType>().is_err());
        assert!("bool".parse::<ValueType>().is_err());
        assert!("fixed4_8".parse::<ValueType>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["int1", "uint17", "fixed12_3", "ufixed9_9", "float64"] {
            assert_eq!(s.parse::<ValueType>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_struct_packing() {
        let st = StructType::new([("x", ValueType::UInt(8)), ("y", ValueType::UInt(8))]).unwrap();
        assert_eq!(st.bits(), 16);
        assert_eq!(st.field("x").unwrap().range(), (0, 8));
        assert_eq!(st.field("y").unwrap().range(), (8, 16));
        assert!(st.field("z").is_err());
    }

    #[test]
    fn test_struct_rejects_duplicates_and_floats() {
        assert!(StructType::new([("a", ValueType::UInt(4)), ("a", ValueType::UInt(4))]).is_err());
        assert!(StructType::new([("f", ValueType::Float(32))]).is_err());
    }

    #[test]
    fn test_promote() {
        assert_eq!(ValueType::promote(&ValueType::Int(8), &ValueType::UInt(16)), ValueType::Int(16));
        assert_eq!(ValueType::promote(&ValueType::UInt(8), &ValueType::UInt(4)), ValueType::UInt(8));
        assert_eq!(ValueType::promote(&ValueType::Int(32), &ValueType::Float(32)), ValueType::Float(32));
        assert_eq!(
            ValueType::promote(&ValueType::Fixed { bits: 8, frac: 4 }, &ValueType::Int(8)),
            ValueType::Fixed { bits: 12, frac: 4 }
        );
    }

    #[test]
    fn test_slice_and_bit_checks() {
        let t = ValueType::UInt(8);
        assert!(t.check_slice(0, 8).is_ok());
        assert!(t.check_slice(4, 9).is_err());
        assert!(t.check_slice(3, 3).is_err());
        assert!(t.check_bit(7).is_ok());
        assert!(t.check_bit(8).is_err());
        assert!(ValueType::Float(32).check_bit(0).is_err());
    }
}
