//! Built-in functions visible at the Quark language level.
//!
//! This module only describes builtins: their arity and how their return
//! type follows from the argument types. Mapping a builtin onto an actual
//! runtime entry point is the ABI's job (see `abi`).

use crate::types::{Basic, Type, merge_types, promote};

/// How the analyzer derives a builtin's return type from its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnRule {
    Null,
    Int,
    Float,
    Str,
    Bool,
    Any,
    IntList,
    StrList,
    AnyList,
    AnyDict,
    /// The type of argument `n`.
    SameAs(usize),
    /// The element type of argument `n`.
    ElementOf(usize),
    /// Numeric arguments (and vectors) pass through unchanged.
    Numeric,
    /// `sum`/`min`/`max`: element of a container, or the promoted scalars.
    Reduce,
    DictValue,
    ToVector,
    /// Vector of the element type named by the second argument.
    AsType,
}

/// Metadata about a single builtin symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinDescriptor {
    /// Name of the builtin at the Quark level (e.g., `len`).
    pub name: &'static str,
    pub min_arity: usize,
    pub max_arity: usize,
    pub ret: ReturnRule,
}

impl BuiltinDescriptor {
    pub const fn new(name: &'static str, min: usize, max: usize, ret: ReturnRule) -> Self {
        BuiltinDescriptor {
            name,
            min_arity: min,
            max_arity: max,
            ret,
        }
    }

    pub fn accepts(&self, given: usize) -> bool {
        (self.min_arity..=self.max_arity).contains(&given)
    }

    /// Arity check producing the diagnostic message on mismatch.
    pub fn check_arity(&self, given: usize) -> Result<(), String> {
        if self.accepts(given) {
            return Ok(());
        }
        let expected = if self.min_arity == self.max_arity {
            let plural = if self.min_arity == 1 { "" } else { "s" };
            format!("{} argument{plural}", self.min_arity)
        } else {
            format!("{} to {} arguments", self.min_arity, self.max_arity)
        };
        Err(format!(
            "builtin '{}' expects {expected} but got {given}",
            self.name
        ))
    }

    /// Return type for a call with the given argument types.
    ///
    /// `type_name` is the literal text of the second argument when it is a
    /// string literal; only `astype` looks at it.
    pub fn return_type(&self, args: &[Type], type_name: Option<&str>) -> Result<Type, String> {
        let arg = |n: usize| args.get(n).cloned().unwrap_or(Type::ANY);
        let ty = match self.ret {
            ReturnRule::Null => Type::NULL,
            ReturnRule::Int => Type::INT,
            ReturnRule::Float => Type::FLOAT,
            ReturnRule::Str => Type::STR,
            ReturnRule::Bool => Type::BOOL,
            ReturnRule::Any => Type::ANY,
            ReturnRule::IntList => Type::list(Type::INT),
            ReturnRule::StrList => Type::list(Type::STR),
            ReturnRule::AnyList => Type::list(Type::ANY),
            ReturnRule::AnyDict => Type::dict(Type::STR, Type::ANY),
            ReturnRule::SameAs(n) => arg(n),
            ReturnRule::ElementOf(n) => element_of(&arg(n)),
            ReturnRule::Numeric => {
                let ty = arg(0);
                if ty.is_numeric() || matches!(ty, Type::Vector(_)) {
                    ty
                } else {
                    Type::ANY
                }
            }
            ReturnRule::Reduce => reduce(self.name, args)?,
            ReturnRule::DictValue => match arg(0) {
                Type::Dict(_, value) => *value,
                _ => Type::ANY,
            },
            ReturnRule::ToVector => to_vector(&arg(0))?,
            ReturnRule::AsType => match type_name {
                None => Type::vector(Type::ANY),
                Some("i64" | "int") => Type::vector(Type::INT),
                Some("f64" | "float") => Type::vector(Type::FLOAT),
                Some("bool") => Type::vector(Type::BOOL),
                Some(other) => {
                    return Err(format!("astype: unknown element type '{other}'"));
                }
            },
        };
        Ok(ty)
    }
}

fn element_of(ty: &Type) -> Type {
    match ty {
        Type::Dict(_, value) => (**value).clone(),
        other => other.element().unwrap_or(Type::ANY),
    }
}

fn reduce(name: &str, args: &[Type]) -> Result<Type, String> {
    match args {
        [single] => match single {
            Type::List(elem) | Type::Vector(elem) => Ok((**elem).clone()),
            ty if ty.is_numeric() || ty.is_any() => Ok(ty.clone()),
            ty => Err(format!("{name} requires a list or vector, got {ty}")),
        },
        [left, right] => {
            if left.is_any() || right.is_any() {
                Ok(Type::ANY)
            } else if left.is_numeric() && right.is_numeric() {
                Ok(promote(left, right))
            } else {
                Ok(merge_types([left.clone(), right.clone()]))
            }
        }
        _ => Ok(Type::ANY),
    }
}

fn to_vector(ty: &Type) -> Result<Type, String> {
    match ty {
        Type::Vector(_) => Ok(ty.clone()),
        Type::List(elem) => match **elem {
            Type::Basic(Basic::Int | Basic::Float | Basic::Bool | Basic::Any) => {
                Ok(Type::vector((**elem).clone()))
            }
            _ => Err(format!(
                "to_vector requires a list of homogeneous numeric elements, got {ty}"
            )),
        },
        ty if ty.is_any() => Ok(Type::vector(Type::ANY)),
        _ => Err(format!("to_vector requires a list, got {ty}")),
    }
}

use ReturnRule as R;

/// The standard builtin table.
pub const STANDARD_BUILTINS: &[BuiltinDescriptor] = &[
    // I/O
    BuiltinDescriptor::new("print", 0, 1, R::Null),
    BuiltinDescriptor::new("println", 0, 1, R::Null),
    BuiltinDescriptor::new("input", 0, 1, R::Str),
    // Conversions
    BuiltinDescriptor::new("len", 1, 1, R::Int),
    BuiltinDescriptor::new("str", 1, 1, R::Str),
    BuiltinDescriptor::new("int", 1, 1, R::Int),
    BuiltinDescriptor::new("float", 1, 1, R::Float),
    BuiltinDescriptor::new("bool", 1, 1, R::Bool),
    BuiltinDescriptor::new("type", 1, 1, R::Str),
    BuiltinDescriptor::new("range", 1, 3, R::IntList),
    // Math
    BuiltinDescriptor::new("abs", 1, 1, R::Numeric),
    BuiltinDescriptor::new("min", 1, 2, R::Reduce),
    BuiltinDescriptor::new("max", 1, 2, R::Reduce),
    BuiltinDescriptor::new("sum", 1, 1, R::Reduce),
    BuiltinDescriptor::new("sqrt", 1, 1, R::Float),
    BuiltinDescriptor::new("floor", 1, 1, R::Numeric),
    BuiltinDescriptor::new("ceil", 1, 1, R::Numeric),
    BuiltinDescriptor::new("round", 1, 1, R::Numeric),
    // Strings
    BuiltinDescriptor::new("upper", 1, 1, R::Str),
    BuiltinDescriptor::new("lower", 1, 1, R::Str),
    BuiltinDescriptor::new("trim", 1, 1, R::Str),
    BuiltinDescriptor::new("contains", 2, 2, R::Bool),
    BuiltinDescriptor::new("startswith", 2, 2, R::Bool),
    BuiltinDescriptor::new("endswith", 2, 2, R::Bool),
    BuiltinDescriptor::new("replace", 3, 3, R::Str),
    BuiltinDescriptor::new("concat", 2, 2, R::SameAs(0)),
    BuiltinDescriptor::new("split", 2, 2, R::StrList),
    // Lists
    BuiltinDescriptor::new("push", 2, 2, R::SameAs(0)),
    BuiltinDescriptor::new("pop", 1, 1, R::ElementOf(0)),
    BuiltinDescriptor::new("get", 2, 2, R::ElementOf(0)),
    BuiltinDescriptor::new("set", 3, 3, R::SameAs(0)),
    BuiltinDescriptor::new("insert", 3, 3, R::SameAs(0)),
    BuiltinDescriptor::new("remove", 2, 2, R::SameAs(0)),
    BuiltinDescriptor::new("slice", 3, 3, R::SameAs(0)),
    BuiltinDescriptor::new("reverse", 1, 1, R::SameAs(0)),
    BuiltinDescriptor::new("map", 2, 2, R::AnyList),
    BuiltinDescriptor::new("filter", 2, 2, R::SameAs(0)),
    BuiltinDescriptor::new("reduce", 3, 3, R::Any),
    // Dicts
    BuiltinDescriptor::new("dget", 2, 2, R::DictValue),
    BuiltinDescriptor::new("dset", 3, 3, R::SameAs(0)),
    // Vectors
    BuiltinDescriptor::new("to_vector", 1, 1, R::ToVector),
    BuiltinDescriptor::new("vadd_inplace", 2, 2, R::SameAs(0)),
    BuiltinDescriptor::new("fillna", 2, 2, R::SameAs(0)),
    BuiltinDescriptor::new("astype", 2, 2, R::AsType),
    BuiltinDescriptor::new("cat_from_str", 1, 1, R::AnyDict),
    BuiltinDescriptor::new("cat_to_str", 1, 1, R::StrList),
];

/// Immutable builtin table, built once per compilation and passed by
/// reference to the analyzer and lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinRegistry {
    descriptors: Vec<BuiltinDescriptor>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl BuiltinRegistry {
    pub fn standard() -> Self {
        BuiltinRegistry {
            descriptors: STANDARD_BUILTINS.to_vec(),
        }
    }

    pub fn empty() -> Self {
        BuiltinRegistry {
            descriptors: Vec::new(),
        }
    }

    /// Adds `descriptor`, replacing a builtin of the same name.
    pub fn with(mut self, descriptor: BuiltinDescriptor) -> Self {
        self.descriptors.retain(|d| d.name != descriptor.name);
        self.descriptors.push(descriptor);
        self
    }

    pub fn without(mut self, name: &str) -> Self {
        self.descriptors.retain(|d| d.name != name);
        self
    }

    /// Linear search; the table is small.
    pub fn find(&self, name: &str) -> Option<&BuiltinDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BuiltinDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
