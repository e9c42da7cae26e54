//! Type coercion engine
//!
//! Decides whether two operand types can be unified for a binary operation
//! using a fixed implicit numeric-widening table, and whether a value of one
//! type can be passed where another is expected (with or without boxing).
//! Pure and stateless; the table is read-only.

/// Coarse runtime type codes. Enum-like object types collapse to `Object`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Empty,
    Object,
    Boolean,
    Char,
    SByte,
    Byte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Single,
    Double,
    Decimal,
    DateTime,
    String,
}

/// A type as the coercion engine sees it: a code plus a nullable-wrapper flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ty {
    pub code: TypeCode,
    pub nullable: bool,
}

impl Ty {
    pub const fn new(code: TypeCode) -> Self {
        Ty {
            code,
            nullable: false,
        }
    }

    pub const fn nullable(code: TypeCode) -> Self {
        Ty {
            code,
            nullable: true,
        }
    }

    /// Unwrap the nullable wrapper, if any.
    pub fn non_nullable(self) -> Self {
        Ty {
            code: self.code,
            nullable: false,
        }
    }

    /// Reference types are Object and String; Empty is the type of Null.
    pub fn is_value_type(self) -> bool {
        !matches!(
            self.code,
            TypeCode::Object | TypeCode::String | TypeCode::Empty
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self.code,
            TypeCode::SByte
                | TypeCode::Byte
                | TypeCode::Int16
                | TypeCode::UInt16
                | TypeCode::Int32
                | TypeCode::UInt32
                | TypeCode::Int64
                | TypeCode::UInt64
                | TypeCode::Single
                | TypeCode::Double
                | TypeCode::Decimal
        )
    }
}

/// Result of a successful compatibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compat {
    /// True when passing the source value requires boxing it into an object.
    pub box_required: bool,
}

/// The fixed implicit-widening table (standard numeric promotion lattice).
/// Any pair outside the table requires an exact match.
pub fn is_implicitly_convertible(from: TypeCode, to: TypeCode) -> bool {
    use TypeCode::*;
    match from {
        SByte => matches!(to, SByte | Int16 | Int32 | Int64 | Single | Double | Decimal),
        Byte => matches!(
            to,
            Byte | Int16 | UInt16 | Int32 | UInt32 | Int64 | UInt64 | Single | Double | Decimal
        ),
        Int16 => matches!(to, Int16 | Int32 | Int64 | Single | Double | Decimal),
        UInt16 => matches!(
            to,
            UInt16 | Int32 | UInt32 | Int64 | UInt64 | Single | Double | Decimal
        ),
        Int32 => matches!(to, Int32 | Int64 | Single | Double | Decimal),
        UInt32 => matches!(to, UInt32 | Int64 | UInt64 | Single | Double | Decimal),
        Int64 => matches!(to, Int64 | Single | Double | Decimal),
        UInt64 => matches!(to, UInt64 | Single | Double | Decimal),
        Single => matches!(to, Single | Double),
        _ => from == to,
    }
}

/// Can a value of type `source` be used where `target` is expected?
///
/// Rules, in order:
/// 1. Identical types are compatible without boxing.
/// 2. A reference-type target accepts anything it is assignable from;
///    boxing is required iff the source is a value type.
/// 3. A value-type target unwraps nullable wrappers on both sides, rejects
///    the asymmetric `Nullable<T>` -> `T` case, then consults the widening
///    table; anything else needs an exact unwrapped match.
pub fn is_compatible_with(source: Ty, target: Ty) -> Option<Compat> {
    if source == target {
        return Some(Compat {
            box_required: false,
        });
    }

    if !target.is_value_type() {
        return match target.code {
            // Object is assignable from everything.
            TypeCode::Object => Some(Compat {
                box_required: source.is_value_type(),
            }),
            TypeCode::String => (source.code == TypeCode::String).then_some(Compat {
                box_required: false,
            }),
            _ => None,
        };
    }

    let st = source.non_nullable();
    let tt = target.non_nullable();
    // Asymmetric nullable guard, preserved exactly: a nullable source whose
    // unwrapped type equals the unwrapped target is not compatible.
    if st != source && tt == st {
        return None;
    }

    if st.code == tt.code || is_implicitly_convertible(st.code, tt.code) {
        return Some(Compat {
            box_required: false,
        });
    }
    None
}

/// Unify two operand types for a binary operator: the weaker side converts up
/// to the stronger. Returns None when no implicit promotion exists (the
/// mismatch surfaces as a build/eval error downstream).
pub fn unify(left: Ty, right: Ty) -> Option<Ty> {
    if left == right {
        return Some(left);
    }
    let l_to_r = is_compatible_with(left, right).is_some();
    let r_to_l = is_compatible_with(right, left).is_some();
    match (l_to_r, r_to_l) {
        (true, false) => Some(right),
        (false, true) => Some(left),
        // Mutually compatible but distinct (e.g. T vs T?): prefer the left.
        (true, true) => Some(left),
        (false, false) => None,
    }
}
