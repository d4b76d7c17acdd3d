//! C type model
//!
//! A deliberately small rendition of C's type system: integer types with
//! width and signedness, floats by width, pointers, constant-size arrays,
//! tagged struct/union/enum references, and function types. Struct member
//! lists and enum values live in a per-translation-unit [`TypeTable`]
//! so that types themselves stay cheap values.
//!
//! The analyzer models the LP64 ABI: `long` is 64 bits, pointers are
//! 64-bit unsigned for value tracking.

use sift_core::IntType;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CType {
    Void,
    Int(IntType),
    Float { bits: u32 },
    Ptr(Box<CType>),
    Array { elem: Box<CType>, len: Option<u64> },
    Struct { tag: String, is_union: bool },
    Enum { tag: String },
    Func { ret: Box<CType>, params: Vec<CType>, variadic: bool },
    /// Fallback for anything the front end could not type.
    Unknown,
}

impl CType {
    pub fn int() -> CType {
        CType::Int(IntType::INT)
    }

    pub fn char_ptr() -> CType {
        CType::Ptr(Box::new(CType::Int(IntType::CHAR)))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, CType::Ptr(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, CType::Array { .. })
    }

    /// Pointers and arrays both act as pointer values in conditions.
    pub fn is_pointerish(&self) -> bool {
        matches!(self, CType::Ptr(_) | CType::Array { .. } | CType::Func { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self, CType::Void)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, CType::Float { .. })
    }

    /// The integer type value tracking uses for expressions of this type.
    /// Pointers and arrays track as 64-bit unsigned addresses, enums as
    /// `int`. `None` for void, floats, structs, and unknowns.
    pub fn int_type(&self) -> Option<IntType> {
        match self {
            CType::Int(t) => Some(*t),
            CType::Ptr(_) | CType::Array { .. } | CType::Func { .. } => Some(IntType::PTR),
            CType::Enum { .. } => Some(IntType::INT),
            _ => None,
        }
    }

    /// The type an expression of this type produces when read: arrays
    /// decay to element pointers, functions to function pointers.
    pub fn decay(&self) -> CType {
        match self {
            CType::Array { elem, .. } => CType::Ptr(elem.clone()),
            CType::Func { .. } => CType::Ptr(Box::new(self.clone())),
            other => other.clone(),
        }
    }

    /// What dereferencing an expression of this type yields.
    pub fn pointee(&self) -> Option<&CType> {
        match self {
            CType::Ptr(inner) => Some(inner),
            CType::Array { elem, .. } => Some(elem),
            _ => None,
        }
    }

    /// Array element type and declared length.
    pub fn array_info(&self) -> Option<(&CType, Option<u64>)> {
        match self {
            CType::Array { elem, len } => Some((elem, *len)),
            _ => None,
        }
    }

    /// Size in bytes, for `sizeof`. Struct sizes come from the type
    /// table; `None` when the size is not known to the model.
    pub fn byte_size(&self, types: &TypeTable) -> Option<u64> {
        match self {
            CType::Void => None,
            CType::Int(t) => Some((t.bits as u64).div_ceil(8)),
            CType::Float { bits } => Some(*bits as u64 / 8),
            CType::Ptr(_) | CType::Func { .. } => Some(8),
            CType::Array { elem, len } => {
                let len = (*len)?;
                Some(elem.byte_size(types)? * len)
            }
            CType::Struct { tag, is_union } => {
                let def = types.struct_def(tag)?;
                let mut total = 0u64;
                for (_, mty) in &def.members {
                    let sz = mty.byte_size(types)?;
                    if *is_union {
                        total = total.max(sz);
                    } else {
                        total += sz;
                    }
                }
                Some(total)
            }
            CType::Enum { .. } => Some(4),
            CType::Unknown => None,
        }
    }
}

impl fmt::Display for CType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CType::Void => write!(f, "void"),
            CType::Int(t) => {
                let name = match (t.bits, t.signed) {
                    (1, _) => "_Bool",
                    (8, true) => "char",
                    (8, false) => "unsigned char",
                    (16, true) => "short",
                    (16, false) => "unsigned short",
                    (32, true) => "int",
                    (32, false) => "unsigned int",
                    (64, true) => "long",
                    (64, false) => "unsigned long",
                    _ => return write!(f, "{}", t),
                };
                write!(f, "{}", name)
            }
            CType::Float { bits: 32 } => write!(f, "float"),
            CType::Float { .. } => write!(f, "double"),
            CType::Ptr(inner) => write!(f, "{}*", inner),
            CType::Array { elem, len: Some(n) } => write!(f, "{}[{}]", elem, n),
            CType::Array { elem, len: None } => write!(f, "{}[]", elem),
            CType::Struct { tag, is_union: false } => write!(f, "struct {}", tag),
            CType::Struct { tag, is_union: true } => write!(f, "union {}", tag),
            CType::Enum { tag } => write!(f, "enum {}", tag),
            CType::Func { ret, .. } => write!(f, "{}(*)()", ret),
            CType::Unknown => write!(f, "?"),
        }
    }
}

/// A struct or union definition: named members in declaration order.
#[derive(Debug, Clone)]
pub struct StructDef {
    pub tag: String,
    pub is_union: bool,
    pub members: Vec<(String, CType)>,
}

impl StructDef {
    pub fn member_type(&self, name: &str) -> Option<&CType> {
        self.members.iter().find(|(m, _)| m == name).map(|(_, t)| t)
    }
}

/// Per-translation-unit type environment: struct/union bodies, typedef
/// aliases, and enumerator values.
#[derive(Debug, Default)]
pub struct TypeTable {
    structs: HashMap<String, StructDef>,
    typedefs: HashMap<String, CType>,
    enumerators: HashMap<String, i64>,
}

impl TypeTable {
    pub fn new() -> Self {
        TypeTable::default()
    }

    pub fn define_struct(&mut self, def: StructDef) {
        self.structs.insert(def.tag.clone(), def);
    }

    pub fn struct_def(&self, tag: &str) -> Option<&StructDef> {
        self.structs.get(tag)
    }

    pub fn define_typedef(&mut self, name: &str, ty: CType) {
        self.typedefs.insert(name.to_string(), ty);
    }

    pub fn typedef(&self, name: &str) -> Option<&CType> {
        self.typedefs.get(name)
    }

    pub fn define_enumerator(&mut self, name: &str, value: i64) {
        self.enumerators.insert(name.to_string(), value);
    }

    pub fn enumerator(&self, name: &str) -> Option<i64> {
        self.enumerators.get(name).copied()
    }

    /// The type of `base.member` / `base->member` when the base's struct
    /// is known.
    pub fn member_type(&self, base: &CType, member: &str) -> CType {
        let tag = match base {
            CType::Struct { tag, .. } => tag,
            CType::Ptr(inner) => match inner.as_ref() {
                CType::Struct { tag, .. } => tag,
                _ => return CType::Unknown,
            },
            _ => return CType::Unknown,
        };
        self.struct_def(tag)
            .and_then(|d| d.member_type(member).cloned())
            .unwrap_or(CType::Unknown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_type_mapping() {
        assert_eq!(CType::int().int_type(), Some(IntType::INT));
        assert_eq!(CType::char_ptr().int_type(), Some(IntType::PTR));
        assert_eq!(CType::Void.int_type(), None);
        assert_eq!(
            CType::Array { elem: Box::new(CType::int()), len: Some(4) }.int_type(),
            Some(IntType::PTR)
        );
    }

    #[test]
    fn test_array_decay() {
        let arr = CType::Array { elem: Box::new(CType::int()), len: Some(4) };
        assert_eq!(arr.decay(), CType::Ptr(Box::new(CType::int())));
        assert_eq!(arr.pointee(), Some(&CType::int()));
    }

    #[test]
    fn test_byte_size() {
        let types = TypeTable::new();
        assert_eq!(CType::int().byte_size(&types), Some(4));
        assert_eq!(CType::char_ptr().byte_size(&types), Some(8));
        let arr = CType::Array { elem: Box::new(CType::int()), len: Some(4) };
        assert_eq!(arr.byte_size(&types), Some(16));
    }

    #[test]
    fn test_struct_size_from_table() {
        let mut types = TypeTable::new();
        types.define_struct(StructDef {
            tag: "point".to_string(),
            is_union: false,
            members: vec![
                ("x".to_string(), CType::int()),
                ("y".to_string(), CType::int()),
            ],
        });
        let st = CType::Struct { tag: "point".to_string(), is_union: false };
        assert_eq!(st.byte_size(&types), Some(8));
        assert_eq!(types.member_type(&st, "y"), CType::int());
        assert_eq!(
            types.member_type(&CType::Ptr(Box::new(st)), "x"),
            CType::int()
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(CType::char_ptr().to_string(), "char*");
        let arr = CType::Array { elem: Box::new(CType::int()), len: Some(4) };
        assert_eq!(arr.to_string(), "int[4]");
    }
}
