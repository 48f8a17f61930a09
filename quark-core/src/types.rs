//! Type values used by the Quark analyzer.
//!
//! The analyzer is best-effort: `Any` marks an unknown type and poisons
//! every merge it takes part in. Unions are always flat and canonically
//! ordered, so structural equality is order-independent.

use std::fmt;

/// Names of the basic types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Basic {
    Int,
    Float,
    Str,
    Bool,
    Null,
    Any,
    Void,
}

impl Basic {
    pub fn name(self) -> &'static str {
        match self {
            Basic::Int => "int",
            Basic::Float => "float",
            Basic::Str => "str",
            Basic::Bool => "bool",
            Basic::Null => "null",
            Basic::Any => "any",
            Basic::Void => "void",
        }
    }

    pub fn from_name(name: &str) -> Option<Basic> {
        let basic = match name {
            "int" => Basic::Int,
            "float" => Basic::Float,
            "str" | "string" => Basic::Str,
            "bool" => Basic::Bool,
            "null" => Basic::Null,
            "any" => Basic::Any,
            "void" => Basic::Void,
            _ => return None,
        };
        Some(basic)
    }
}

/// Represents the static type of a Quark expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Basic(Basic),
    List(Box<Type>),
    Dict(Box<Type>, Box<Type>),
    Vector(Box<Type>),
    Function { params: Vec<Type>, ret: Box<Type> },
    /// Flat, deduplicated, sorted by display key. Never nested and never
    /// holds fewer than two options.
    Union(Vec<Type>),
}

impl Type {
    pub const INT: Type = Type::Basic(Basic::Int);
    pub const FLOAT: Type = Type::Basic(Basic::Float);
    pub const STR: Type = Type::Basic(Basic::Str);
    pub const BOOL: Type = Type::Basic(Basic::Bool);
    pub const NULL: Type = Type::Basic(Basic::Null);
    pub const ANY: Type = Type::Basic(Basic::Any);
    pub const VOID: Type = Type::Basic(Basic::Void);

    pub fn list(elem: Type) -> Type {
        Type::List(Box::new(elem))
    }

    pub fn dict(key: Type, value: Type) -> Type {
        Type::Dict(Box::new(key), Box::new(value))
    }

    pub fn vector(elem: Type) -> Type {
        Type::Vector(Box::new(elem))
    }

    pub fn function(params: Vec<Type>, ret: Type) -> Type {
        Type::Function {
            params,
            ret: Box::new(ret),
        }
    }

    /// `Any`, or a union containing `Any`.
    pub fn is_any(&self) -> bool {
        match self {
            Type::Basic(Basic::Any) => true,
            Type::Union(options) => options.iter().any(Type::is_any),
            _ => false,
        }
    }

    /// int or float, or a union made only of those.
    pub fn is_numeric(&self) -> bool {
        match self {
            Type::Basic(Basic::Int | Basic::Float) => true,
            Type::Union(options) => options.iter().all(Type::is_numeric),
            _ => false,
        }
    }

    /// int, float, str or bool, or a union made only of those.
    pub fn is_comparable(&self) -> bool {
        match self {
            Type::Basic(Basic::Int | Basic::Float | Basic::Str | Basic::Bool) => true,
            Type::Union(options) => options.iter().all(Type::is_comparable),
            _ => false,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::Basic(Basic::Str))
    }

    /// Values usable where a boolean is expected.
    pub fn is_bool_like(&self) -> bool {
        match self {
            Type::Basic(Basic::Bool | Basic::Int | Basic::Null | Basic::Any) => true,
            Type::Union(options) => options.iter().all(Type::is_bool_like),
            _ => false,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::Basic(Basic::Float))
    }

    /// Element type of a list, vector or string, when iterable.
    pub fn element(&self) -> Option<Type> {
        match self {
            Type::List(elem) | Type::Vector(elem) => Some((**elem).clone()),
            Type::Basic(Basic::Str) => Some(Type::STR),
            _ => None,
        }
    }

    /// Whether a value of type `src` may be stored in a slot declared `self`.
    pub fn can_assign(&self, src: &Type) -> bool {
        if self.is_any() || src.is_any() {
            return true;
        }
        match (self, src) {
            (Type::List(_) | Type::Dict(..) | Type::Function { .. }, Type::Basic(Basic::Null)) => {
                true
            }
            (Type::Basic(Basic::Float), Type::Basic(Basic::Int)) => true,
            (Type::List(dst), Type::List(src)) | (Type::Vector(dst), Type::Vector(src)) => {
                dst.can_assign(src)
            }
            (Type::Dict(dk, dv), Type::Dict(sk, sv)) => dk.can_assign(sk) && dv.can_assign(sv),
            (_, Type::Union(options)) => options.iter().all(|opt| self.can_assign(opt)),
            (Type::Union(options), _) => options.iter().any(|opt| opt.can_assign(src)),
            _ => self == src,
        }
    }

    fn sort_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Basic(basic) => f.write_str(basic.name()),
            Type::List(elem) => write!(f, "list[{elem}]"),
            Type::Dict(key, value) => write!(f, "dict[{key}, {value}]"),
            Type::Vector(elem) => write!(f, "vector[{elem}]"),
            Type::Function { params, ret } => {
                let params: Vec<String> = params.iter().map(ToString::to_string).collect();
                write!(f, "fn({}) -> {}", params.join(", "), ret)
            }
            Type::Union(options) => {
                let options: Vec<String> = options.iter().map(ToString::to_string).collect();
                write!(f, "union[{}]", options.join(" | "))
            }
        }
    }
}

/// Merge branch types into the most precise single type.
///
/// Unions are flattened one level and deduplicated. Any branch that is
/// (or contains) `Any` makes the whole merge `Any`. No inputs yields
/// `void`; a single distinct input is returned as-is.
pub fn merge_types<I>(types: I) -> Type
where
    I: IntoIterator<Item = Type>,
{
    let mut options: Vec<Type> = Vec::new();
    for ty in types {
        if ty.is_any() {
            return Type::ANY;
        }
        let flattened = match ty {
            Type::Union(inner) => inner,
            other => vec![other],
        };
        for option in flattened {
            if !options.contains(&option) {
                options.push(option);
            }
        }
    }

    match options.len() {
        0 => Type::VOID,
        1 => options.remove(0),
        _ => {
            options.sort_by_key(Type::sort_key);
            Type::Union(options)
        }
    }
}

/// Numeric promotion for two numeric operands: `float` if either side
/// may be a float, else `int`.
pub fn promote(left: &Type, right: &Type) -> Type {
    if may_be_float(left) || may_be_float(right) {
        Type::FLOAT
    } else {
        Type::INT
    }
}

fn may_be_float(ty: &Type) -> bool {
    match ty {
        Type::Basic(Basic::Float) => true,
        Type::Union(options) => options.iter().any(may_be_float),
        _ => false,
    }
}
