//! Eval function registry
//!
//! Four families: math, string, conditional, and IP classification, plus
//! the tostring/tonumber conversions. The registry is built once at
//! process start; the planner consults `sql_name` to decide whether a
//! call can be pushed down to the backend.
//!
//! Row-time semantics: numeric functions on non-numeric input and string
//! functions on null input yield [`Value::Undefined`], never an error —
//! values are only known per-row and log data is messy.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::OnceLock;

use crate::dsl::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Math,
    String,
    Conditional,
    Ip,
    Conversion,
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionDef {
    pub name: &'static str,
    pub family: Family,
    pub min_args: usize,
    /// None = variadic.
    pub max_args: Option<usize>,
    /// ClickHouse function name when the call is push-down-capable.
    pub sql_name: Option<&'static str>,
}

macro_rules! def {
    ($name:expr, $family:expr, $min:expr, $max:expr, $sql:expr) => {
        FunctionDef {
            name: $name,
            family: $family,
            min_args: $min,
            max_args: $max,
            sql_name: $sql,
        }
    };
}

fn build_registry() -> HashMap<&'static str, FunctionDef> {
    use Family::*;
    let defs = [
        // Math
        def!("abs", Math, 1, Some(1), Some("abs")),
        def!("round", Math, 1, Some(2), Some("round")),
        def!("floor", Math, 1, Some(1), Some("floor")),
        def!("ceil", Math, 1, Some(1), Some("ceil")),
        def!("sqrt", Math, 1, Some(1), Some("sqrt")),
        def!("pow", Math, 2, Some(2), Some("pow")),
        def!("log", Math, 1, Some(2), Some("log")),
        def!("log10", Math, 1, Some(1), Some("log10")),
        def!("exp", Math, 1, Some(1), Some("exp")),
        // String
        def!("len", String, 1, Some(1), Some("length")),
        def!("lower", String, 1, Some(1), Some("lower")),
        def!("upper", String, 1, Some(1), Some("upper")),
        def!("substr", String, 2, Some(3), Some("substring")),
        def!("trim", String, 1, Some(1), Some("trimBoth")),
        def!("ltrim", String, 1, Some(1), Some("trimLeft")),
        def!("rtrim", String, 1, Some(1), Some("trimRight")),
        def!("replace", String, 3, Some(3), Some("replaceAll")),
        def!("split", String, 2, Some(2), None),
        def!("concat", String, 1, None, Some("concat")),
        // Conditional
        def!("if", Conditional, 3, Some(3), Some("if")),
        def!("coalesce", Conditional, 1, None, Some("coalesce")),
        def!("nullif", Conditional, 2, Some(2), Some("nullIf")),
        def!("case", Conditional, 2, None, None),
        // IP classification
        def!("classify_ip", Ip, 1, Some(1), None),
        def!("is_public_ip", Ip, 1, Some(1), None),
        def!("is_private_ip", Ip, 1, Some(1), None),
        def!("is_internal_ip", Ip, 1, Some(1), None),
        // Conversion
        def!("tostring", Conversion, 1, Some(1), Some("toString")),
        def!("tonumber", Conversion, 1, Some(1), Some("toFloat64OrNull")),
    ];
    defs.into_iter().map(|d| (d.name, d)).collect()
}

static REGISTRY: OnceLock<HashMap<&'static str, FunctionDef>> = OnceLock::new();

pub fn registry() -> &'static HashMap<&'static str, FunctionDef> {
    REGISTRY.get_or_init(build_registry)
}

pub fn lookup(name: &str) -> Option<&'static FunctionDef> {
    registry().get(name)
}

/// Evaluate a registered function against already-evaluated arguments.
/// Arity has been validated at compile time; typing is checked here,
/// per row.
pub fn call(name: &str, args: &[Value]) -> Value {
    match name {
        // Math
        "abs" => num1(args, f64::abs),
        "floor" => num1(args, f64::floor),
        "ceil" => num1(args, f64::ceil),
        "sqrt" => num1(args, f64::sqrt),
        "exp" => num1(args, f64::exp),
        "log10" => num1(args, f64::log10),
        "log" => match args {
            [_] => num1(args, f64::ln),
            [x, base] => match (x.as_f64(), base.as_f64()) {
                (Some(x), Some(b)) if b > 0.0 && b != 1.0 => Value::from_f64(x.log(b)),
                _ => Value::Undefined,
            },
            _ => Value::Undefined,
        },
        "pow" => match (args[0].as_f64(), args[1].as_f64()) {
            (Some(a), Some(b)) => Value::from_f64(a.powf(b)),
            _ => Value::Undefined,
        },
        "round" => {
            let digits = args.get(1).and_then(|v| v.as_i64()).unwrap_or(0);
            match args[0].as_f64() {
                Some(x) => {
                    let factor = 10f64.powi(digits as i32);
                    Value::from_f64((x * factor).round() / factor)
                }
                None => Value::Undefined,
            }
        }

        // String
        "len" => str1(args, |s| Value::Int(s.chars().count() as i64)),
        "lower" => str1(args, |s| Value::String(s.to_lowercase())),
        "upper" => str1(args, |s| Value::String(s.to_uppercase())),
        "trim" => str1(args, |s| Value::String(s.trim().to_string())),
        "ltrim" => str1(args, |s| Value::String(s.trim_start().to_string())),
        "rtrim" => str1(args, |s| Value::String(s.trim_end().to_string())),
        "substr" => eval_substr(args),
        "replace" => match (string_arg(&args[0]), string_arg(&args[1]), string_arg(&args[2])) {
            (Some(s), Some(from), Some(to)) => Value::String(s.replace(&from, &to)),
            _ => Value::Undefined,
        },
        "split" => match (string_arg(&args[0]), string_arg(&args[1])) {
            (Some(s), Some(sep)) if !sep.is_empty() => Value::Json(serde_json::Value::Array(
                s.split(&sep).map(|p| serde_json::Value::String(p.to_string())).collect(),
            )),
            _ => Value::Undefined,
        },
        "concat" => {
            let mut out = String::new();
            for arg in args {
                match string_arg(arg) {
                    Some(s) => out.push_str(&s),
                    None => return Value::Undefined,
                }
            }
            Value::String(out)
        }

        // Conditional
        "if" => {
            if args[0].is_truthy() {
                args[1].clone()
            } else {
                args[2].clone()
            }
        }
        "coalesce" => args
            .iter()
            .find(|v| !v.is_null_like())
            .cloned()
            .unwrap_or(Value::Null),
        "nullif" => {
            if args[0].loose_eq(&args[1]) {
                Value::Null
            } else {
                args[0].clone()
            }
        }
        // case(c1, v1, c2, v2, ..., [default]) — left to right, first
        // true condition wins; trailing unpaired argument is the default.
        "case" => {
            let mut i = 0;
            while i + 1 < args.len() {
                if args[i].is_truthy() {
                    return args[i + 1].clone();
                }
                i += 2;
            }
            if args.len() % 2 == 1 {
                args[args.len() - 1].clone()
            } else {
                Value::Null
            }
        }

        // IP classification
        "classify_ip" => Value::String(classify_ip(&args[0]).to_string()),
        "is_public_ip" => Value::Bool(classify_ip(&args[0]) == "public"),
        "is_private_ip" => Value::Bool(classify_ip(&args[0]) == "private"),
        "is_internal_ip" => {
            let class = classify_ip(&args[0]);
            Value::Bool(matches!(class, "private" | "loopback" | "link_local"))
        }

        // Conversion
        "tostring" => match &args[0] {
            Value::Null | Value::Undefined => Value::Undefined,
            v => Value::String(v.to_string()),
        },
        "tonumber" => match args[0].as_f64() {
            Some(n) => Value::from_f64(n),
            None => Value::Undefined,
        },

        _ => Value::Undefined,
    }
}

fn num1(args: &[Value], f: impl Fn(f64) -> f64) -> Value {
    match args[0].as_f64() {
        Some(x) => Value::from_f64(f(x)),
        None => Value::Undefined,
    }
}

fn str1(args: &[Value], f: impl Fn(&str) -> Value) -> Value {
    match string_arg(&args[0]) {
        Some(s) => f(&s),
        None => Value::Undefined,
    }
}

/// String view for string-family functions: strings pass through, numbers
/// and bools stringify, null/undefined are a per-row type error.
fn string_arg(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Int(_) | Value::Float(_) | Value::Bool(_) => Some(v.to_string()),
        _ => None,
    }
}

/// substr(s, start[, len]) — 1-based, Splunk compatible; a negative start
/// counts back from the end of the string.
fn eval_substr(args: &[Value]) -> Value {
    let s = match string_arg(&args[0]) {
        Some(s) => s,
        None => return Value::Undefined,
    };
    let start = match args[1].as_i64() {
        Some(n) => n,
        None => return Value::Undefined,
    };
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len() as i64;
    let begin = if start > 0 {
        start - 1
    } else if start < 0 {
        (len + start).max(0)
    } else {
        0
    };
    if begin >= len {
        return Value::String(String::new());
    }
    let take = match args.get(2) {
        Some(v) => match v.as_i64() {
            Some(n) if n >= 0 => n,
            _ => return Value::Undefined,
        },
        None => len - begin,
    };
    let out: String = chars[begin as usize..].iter().take(take as usize).collect();
    Value::String(out)
}

/// RFC 1918 private ranges plus loopback and link-local. Anything that is
/// not a parseable IPv4 address is "invalid".
fn classify_ip(v: &Value) -> &'static str {
    let text = match v.as_str() {
        Some(s) => s.trim(),
        None => return "invalid",
    };
    let addr: Ipv4Addr = match text.parse() {
        Ok(a) => a,
        Err(_) => return "invalid",
    };
    if addr.is_loopback() {
        "loopback"
    } else if addr.is_link_local() {
        "link_local"
    } else if addr.is_private() {
        "private"
    } else {
        "public"
    }
}
