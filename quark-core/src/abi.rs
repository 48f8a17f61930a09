//! The dynamic-value ABI that lowered code calls into.
//!
//! Lowering never spells a runtime symbol itself: every constructor,
//! operator and helper goes through [`ValueAbi`]. [`CppAbi`] targets the
//! `quark/quark.hpp` C++ runtime.
//!
//! A few entry points go beyond the stock header and must be supplied by
//! the runtime build; they are listed in [`CPP_RUNTIME_EXTENSIONS`]:
//!
//! - `qv_closure(env)` wraps an environment from `q_alloc_closure` as a
//!   function value, the counterpart of `qv_func` for capturing closures.
//! - `q_band` is integer `&`.
//! - `q_calln(f, n, argv)` calls a function value with more than four
//!   arguments.
//! - `q_map`, `q_filter`, `q_reduce`, `q_to_vector`, `q_cat_from_str` and
//!   `q_cat_to_str` back the builtins of the same names.

use std::fmt::Write as _;

/// Binary operators with a runtime entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    NotEq,
    And,
    Or,
    BitAnd,
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

/// Named entry points of a dynamic-value runtime.
///
/// Arguments and results are target-language expressions. Methods whose
/// name ends in `_test` produce a native boolean condition rather than a
/// runtime value.
pub trait ValueAbi {
    /// Lines placed at the top of the output.
    fn prelude(&self) -> Vec<String>;
    fn value_type(&self) -> &'static str;
    fn env_type(&self) -> &'static str;
    /// Name of the hidden environment parameter.
    fn env_param(&self) -> &'static str;
    /// Environment passed to a function called directly.
    fn null_env(&self) -> &'static str;
    fn native_int_type(&self) -> &'static str;
    fn runtime_init(&self) -> String;

    fn int(&self, literal: &str) -> String;
    fn float(&self, literal: &str) -> String;
    fn string(&self, value: &str) -> String;
    fn boolean(&self, value: bool) -> String;
    fn null(&self) -> String;
    fn ok(&self, value: &str) -> String;
    fn err(&self, value: &str) -> String;

    fn list(&self, capacity: usize) -> String;
    fn list_push(&self, list: &str, item: &str) -> String;
    fn vector(&self, capacity: usize) -> String;
    fn vector_push(&self, vector: &str, item: &str) -> String;
    fn dict(&self) -> String;
    fn dict_set(&self, dict: &str, key: &str, value: &str) -> String;

    fn unary(&self, op: UnaryOp, operand: &str) -> String;
    /// `vector` selects the elementwise form.
    fn binary(&self, op: BinaryOp, left: &str, right: &str, vector: bool) -> String;
    fn truthy_test(&self, value: &str) -> String;
    fn equals_test(&self, left: &str, right: &str) -> String;
    fn is_ok_test(&self, value: &str) -> String;
    /// Holds only for a result in the error state, never for a plain value.
    fn is_err_test(&self, value: &str) -> String;
    fn result_value(&self, value: &str) -> String;
    fn result_error(&self, value: &str) -> String;

    fn index_get(&self, target: &str, index: &str) -> String;
    fn index_set(&self, target: &str, index: &str, value: &str) -> String;
    fn member_get(&self, object: &str, member: &str) -> String;
    fn member_set(&self, object: &str, member: &str, value: &str) -> String;
    fn length(&self, value: &str) -> String;
    fn iter_get(&self, iterable: &str, index: &str) -> String;
    /// Native integer held by an int value.
    fn native_int(&self, value: &str) -> String;

    fn function_value(&self, symbol: &str) -> String;
    fn alloc_closure(&self, symbol: &str, captures: usize) -> String;
    fn closure_value(&self, env: &str) -> String;
    fn capture_slot(&self, env: &str, index: usize) -> String;
    /// Largest arity `call_value` handles; beyond it use `call_value_n`.
    fn max_direct_arity(&self) -> usize;
    fn call_value(&self, callee: &str, args: &[String]) -> String;
    fn call_value_n(&self, callee: &str, count: usize, argv: &str) -> String;

    /// Entry point implementing builtin `name`.
    fn builtin_entry(&self, name: &str, vector: bool) -> String;
    fn builtin_call(&self, name: &str, args: &[String], vector: bool) -> String;
}

/// Entry points of the C++ runtime other than the per-builtin ones.
pub const CPP_CORE_ENTRY_POINTS: &[&str] = &[
    "q_gc_init",
    "qv_int",
    "qv_float",
    "qv_string",
    "qv_bool",
    "qv_null",
    "qv_ok",
    "qv_err",
    "qv_list",
    "qv_vector",
    "qv_dict",
    "qv_func",
    "qv_closure",
    "q_push",
    "q_vec_push",
    "q_dict_set",
    "q_get",
    "q_set",
    "q_member_get",
    "q_member_set",
    "q_len",
    "q_iter_get",
    "q_truthy",
    "q_is_ok",
    "q_result_value",
    "q_result_error",
    "q_add",
    "q_sub",
    "q_mul",
    "q_div",
    "q_mod",
    "q_pow",
    "q_neg",
    "q_not",
    "q_lt",
    "q_lte",
    "q_gt",
    "q_gte",
    "q_eq",
    "q_neq",
    "q_and",
    "q_or",
    "q_band",
    "q_range",
    "q_vec_add",
    "q_vec_sub",
    "q_vec_mul",
    "q_vec_div",
    "q_vec_sum",
    "q_vec_min",
    "q_vec_max",
    "q_call0",
    "q_call1",
    "q_call2",
    "q_call3",
    "q_call4",
    "q_calln",
    "q_alloc_closure",
];

/// Entry points emitted by [`CppAbi`] that the stock runtime header does
/// not declare.
pub const CPP_RUNTIME_EXTENSIONS: &[&str] = &[
    "qv_closure",
    "q_band",
    "q_calln",
    "q_map",
    "q_filter",
    "q_reduce",
    "q_to_vector",
    "q_cat_from_str",
    "q_cat_to_str",
];

/// The C++ `quark.hpp` runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct CppAbi;

impl CppAbi {
    fn call(entry: &str, args: &[&str]) -> String {
        format!("{entry}({})", args.join(", "))
    }
}

impl ValueAbi for CppAbi {
    fn prelude(&self) -> Vec<String> {
        vec!["#include \"quark/quark.hpp\"".to_string()]
    }

    fn value_type(&self) -> &'static str {
        "QValue"
    }

    fn env_type(&self) -> &'static str {
        "QClosure*"
    }

    fn env_param(&self) -> &'static str {
        "env"
    }

    fn null_env(&self) -> &'static str {
        "nullptr"
    }

    fn native_int_type(&self) -> &'static str {
        "long long"
    }

    fn runtime_init(&self) -> String {
        "q_gc_init()".to_string()
    }

    fn int(&self, literal: &str) -> String {
        Self::call("qv_int", &[literal])
    }

    fn float(&self, literal: &str) -> String {
        let literal = if literal.starts_with('.') {
            format!("0{literal}")
        } else if literal.ends_with('.') {
            format!("{literal}0")
        } else {
            literal.to_string()
        };
        Self::call("qv_float", &[&literal])
    }

    fn string(&self, value: &str) -> String {
        Self::call("qv_string", &[&cpp_string_literal(value)])
    }

    fn boolean(&self, value: bool) -> String {
        Self::call("qv_bool", &[if value { "true" } else { "false" }])
    }

    fn null(&self) -> String {
        "qv_null()".to_string()
    }

    fn ok(&self, value: &str) -> String {
        Self::call("qv_ok", &[value])
    }

    fn err(&self, value: &str) -> String {
        Self::call("qv_err", &[value])
    }

    fn list(&self, capacity: usize) -> String {
        Self::call("qv_list", &[&capacity.to_string()])
    }

    fn list_push(&self, list: &str, item: &str) -> String {
        Self::call("q_push", &[list, item])
    }

    fn vector(&self, capacity: usize) -> String {
        Self::call("qv_vector", &[&capacity.to_string()])
    }

    fn vector_push(&self, vector: &str, item: &str) -> String {
        Self::call("q_vec_push", &[vector, item])
    }

    fn dict(&self) -> String {
        "qv_dict()".to_string()
    }

    fn dict_set(&self, dict: &str, key: &str, value: &str) -> String {
        Self::call("q_dict_set", &[dict, key, value])
    }

    fn unary(&self, op: UnaryOp, operand: &str) -> String {
        let entry = match op {
            UnaryOp::Neg => "q_neg",
            UnaryOp::Not => "q_not",
        };
        Self::call(entry, &[operand])
    }

    fn binary(&self, op: BinaryOp, left: &str, right: &str, vector: bool) -> String {
        let entry = match (op, vector) {
            (BinaryOp::Add, true) => "q_vec_add",
            (BinaryOp::Sub, true) => "q_vec_sub",
            (BinaryOp::Mul, true) => "q_vec_mul",
            (BinaryOp::Div, true) => "q_vec_div",
            (BinaryOp::Add, false) => "q_add",
            (BinaryOp::Sub, false) => "q_sub",
            (BinaryOp::Mul, false) => "q_mul",
            (BinaryOp::Div, false) => "q_div",
            (BinaryOp::Mod, _) => "q_mod",
            (BinaryOp::Pow, _) => "q_pow",
            (BinaryOp::Lt, _) => "q_lt",
            (BinaryOp::Lte, _) => "q_lte",
            (BinaryOp::Gt, _) => "q_gt",
            (BinaryOp::Gte, _) => "q_gte",
            (BinaryOp::Eq, _) => "q_eq",
            (BinaryOp::NotEq, _) => "q_neq",
            (BinaryOp::And, _) => "q_and",
            (BinaryOp::Or, _) => "q_or",
            (BinaryOp::BitAnd, _) => "q_band",
            (BinaryOp::Range, _) => "q_range",
        };
        Self::call(entry, &[left, right])
    }

    fn truthy_test(&self, value: &str) -> String {
        Self::call("q_truthy", &[value])
    }

    fn equals_test(&self, left: &str, right: &str) -> String {
        self.truthy_test(&Self::call("q_eq", &[left, right]))
    }

    fn is_ok_test(&self, value: &str) -> String {
        Self::call("q_is_ok", &[value])
    }

    fn is_err_test(&self, value: &str) -> String {
        format!(
            "{value}.type == QValue::VAL_RESULT && !{}",
            self.is_ok_test(value)
        )
    }

    fn result_value(&self, value: &str) -> String {
        Self::call("q_result_value", &[value])
    }

    fn result_error(&self, value: &str) -> String {
        Self::call("q_result_error", &[value])
    }

    fn index_get(&self, target: &str, index: &str) -> String {
        Self::call("q_get", &[target, index])
    }

    fn index_set(&self, target: &str, index: &str, value: &str) -> String {
        Self::call("q_set", &[target, index, value])
    }

    fn member_get(&self, object: &str, member: &str) -> String {
        Self::call("q_member_get", &[object, &cpp_string_literal(member)])
    }

    fn member_set(&self, object: &str, member: &str, value: &str) -> String {
        Self::call(
            "q_member_set",
            &[object, &cpp_string_literal(member), value],
        )
    }

    fn length(&self, value: &str) -> String {
        Self::call("q_len", &[value])
    }

    fn iter_get(&self, iterable: &str, index: &str) -> String {
        Self::call("q_iter_get", &[iterable, index])
    }

    fn native_int(&self, value: &str) -> String {
        format!("{value}.data.int_val")
    }

    fn function_value(&self, symbol: &str) -> String {
        format!("qv_func((void*){symbol})")
    }

    fn alloc_closure(&self, symbol: &str, captures: usize) -> String {
        format!("q_alloc_closure((void*){symbol}, {captures})")
    }

    fn closure_value(&self, env: &str) -> String {
        Self::call("qv_closure", &[env])
    }

    fn capture_slot(&self, env: &str, index: usize) -> String {
        format!("{env}->captures[{index}]")
    }

    fn max_direct_arity(&self) -> usize {
        4
    }

    fn call_value(&self, callee: &str, args: &[String]) -> String {
        let mut call = format!("q_call{}({callee}", args.len());
        for arg in args {
            let _ = write!(call, ", {arg}");
        }
        call.push(')');
        call
    }

    fn call_value_n(&self, callee: &str, count: usize, argv: &str) -> String {
        format!("q_calln({callee}, {count}, {argv})")
    }

    fn builtin_entry(&self, name: &str, vector: bool) -> String {
        match (name, vector) {
            ("sum" | "min" | "max", true) => format!("q_vec_{name}"),
            _ => format!("q_{name}"),
        }
    }

    fn builtin_call(&self, name: &str, args: &[String], vector: bool) -> String {
        let entry = self.builtin_entry(name, vector);
        if args.is_empty() && matches!(name, "print" | "println") {
            return format!("{entry}({})", self.string(""));
        }
        format!("{entry}({})", args.join(", "))
    }
}

/// Double-quoted C++ string literal for `value`.
pub fn cpp_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\{:03o}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_literals_are_escaped() {
        assert_eq!(cpp_string_literal("a\"b"), "\"a\\\"b\"");
        assert_eq!(cpp_string_literal("line\n"), "\"line\\n\"");
        assert_eq!(cpp_string_literal("nul\0"), "\"nul\\000\"");
        assert_eq!(cpp_string_literal("back\\"), "\"back\\\\\"");
    }

    #[test]
    fn float_literals_are_normalised() {
        let abi = CppAbi;
        assert_eq!(abi.float(".5"), "qv_float(0.5)");
        assert_eq!(abi.float("2."), "qv_float(2.0)");
        assert_eq!(abi.float("1.25"), "qv_float(1.25)");
    }

    #[test]
    fn calls_pick_direct_or_vector_forms() {
        let abi = CppAbi;
        let args = vec!["a".to_string(), "b".to_string()];
        assert_eq!(abi.call_value("f", &args), "q_call2(f, a, b)");
        assert_eq!(abi.call_value("f", &[]), "q_call0(f)");
        assert_eq!(abi.binary(BinaryOp::Add, "v", "w", true), "q_vec_add(v, w)");
        assert_eq!(abi.binary(BinaryOp::Add, "a", "b", false), "q_add(a, b)");
        assert_eq!(abi.builtin_entry("sum", true), "q_vec_sum");
        assert_eq!(abi.builtin_call("println", &[], false), "q_println(qv_string(\"\"))");
    }

    #[test]
    fn err_test_requires_a_result() {
        let abi = CppAbi;
        assert_eq!(abi.is_ok_test("r"), "q_is_ok(r)");
        assert_eq!(
            abi.is_err_test("r"),
            "r.type == QValue::VAL_RESULT && !q_is_ok(r)"
        );
    }

    #[test]
    fn runtime_extensions_are_emitted_entry_points() {
        let abi = CppAbi;
        let builtins = crate::builtins::BuiltinRegistry::standard();
        for name in CPP_RUNTIME_EXTENSIONS {
            let emitted = CPP_CORE_ENTRY_POINTS.contains(name)
                || builtins.iter().any(|b| abi.builtin_entry(b.name, false) == *name);
            assert!(emitted, "{name}");
        }
    }

    #[test]
    fn core_entry_points_are_unique() {
        for (i, name) in CPP_CORE_ENTRY_POINTS.iter().enumerate() {
            assert!(!CPP_CORE_ENTRY_POINTS[i + 1..].contains(name), "{name}");
        }
    }
}
