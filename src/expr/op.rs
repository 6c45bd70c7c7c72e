// Copyright (c) 2024-present, nowdb-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The operator table: opcodes, arities and per-type dispatch.

use crate::{value::Value, Error, Result};
use std::cmp::Ordering;

/// Operator codes
///
/// The numeric values are part of serialized plans and must not be
/// reassigned; unimplemented opcodes keep their slot and evaluate to
/// `NotSupported`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum Fun {
    // conversions
    ToFloat = 10,
    ToInt = 11,
    ToUint = 12,
    ToTime = 13,
    ToText = 14,

    // arithmetic
    Add = 20,
    Sub = 21,
    Mul = 22,
    Div = 23,
    Rem = 24,
    Pow = 25,
    Root = 26,
    Log = 27,
    Ceil = 28,
    Floor = 29,
    Round = 30,
    Abs = 31,

    // comparison
    Eq = 40,
    Ne = 41,
    Lt = 42,
    Gt = 43,
    Le = 44,
    Ge = 45,
    In = 46,

    // logic
    And = 50,
    Or = 51,
    Xor = 52,
    Not = 53,
    Just = 54,

    // time extraction
    Century = 60,
    Year = 61,
    Month = 62,
    Mday = 63,
    Wday = 64,
    Week = 65,
    Hour = 66,
    Min = 67,
    Sec = 68,
    Milli = 69,
    Micro = 70,
    Nano = 71,
    Bin = 72,
    Format = 73,

    // string
    Substr = 80,
    Length = 81,
    Strcat = 82,
    Pos = 83,
}

impl Fun {
    /// Fixed arity of the operator; `None` for variadic (`in`,
    /// `concat`).
    #[must_use]
    pub fn arity(self) -> Option<usize> {
        match self {
            Self::ToFloat
            | Self::ToInt
            | Self::ToUint
            | Self::ToTime
            | Self::ToText
            | Self::Log
            | Self::Ceil
            | Self::Floor
            | Self::Round
            | Self::Abs
            | Self::Not
            | Self::Just
            | Self::Century
            | Self::Year
            | Self::Month
            | Self::Mday
            | Self::Wday
            | Self::Week
            | Self::Hour
            | Self::Min
            | Self::Sec
            | Self::Milli
            | Self::Micro
            | Self::Nano
            | Self::Length => Some(1),

            Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Rem
            | Self::Pow
            | Self::Root
            | Self::Eq
            | Self::Ne
            | Self::Lt
            | Self::Gt
            | Self::Le
            | Self::Ge
            | Self::And
            | Self::Or
            | Self::Xor
            | Self::Bin
            | Self::Pos => Some(2),

            Self::Substr | Self::Format => Some(3),

            Self::In | Self::Strcat => None,
        }
    }

    /// Whether the operator yields a boolean.
    #[must_use]
    pub fn is_predicate(self) -> bool {
        matches!(
            self,
            Self::Eq
                | Self::Ne
                | Self::Lt
                | Self::Gt
                | Self::Le
                | Self::Ge
                | Self::In
                | Self::And
                | Self::Or
                | Self::Not
                | Self::Just
        )
    }
}

/// Orders two values; `None` when they do not compare (text against
/// number, missing values).
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
        (Value::Surrogate(a), Value::Surrogate(b)) => Some(a.cmp(b)),
        (Value::Nothing, _) | (_, Value::Nothing) => None,
        (Value::Uint(a), Value::Uint(b)) => Some(a.cmp(b)),
        (Value::Float(_), _) | (_, Value::Float(_)) => {
            let x = a.as_f64()?;
            let y = b.as_f64()?;
            x.partial_cmp(&y)
        }
        _ => {
            let (a, b) = (a.as_i64()?, b.as_i64()?);
            Some(a.cmp(&b))
        }
    }
}

fn numeric2(fun: Fun, a: &Value, b: &Value) -> Result<Value> {
    let float = matches!(a, Value::Float(_)) || matches!(b, Value::Float(_));

    if float {
        let (x, y) = (
            a.as_f64().ok_or_else(|| not_numeric(fun))?,
            b.as_f64().ok_or_else(|| not_numeric(fun))?,
        );
        let r = match fun {
            Fun::Add => x + y,
            Fun::Sub => x - y,
            Fun::Mul => x * y,
            Fun::Div => {
                if y == 0.0 {
                    return Err(Error::Invalid("division by zero".into()));
                }
                x / y
            }
            Fun::Rem => {
                if y == 0.0 {
                    return Err(Error::Invalid("division by zero".into()));
                }
                x % y
            }
            Fun::Pow => x.powf(y),
            _ => return Err(Error::Panic("bad numeric dispatch".into())),
        };
        return Ok(Value::Float(r));
    }

    let signed = matches!(
        (a, b),
        (Value::Int(_) | Value::Time(_) | Value::Date(_), _)
            | (_, Value::Int(_) | Value::Time(_) | Value::Date(_))
    );

    if signed {
        let (x, y) = (
            a.as_i64().ok_or_else(|| not_numeric(fun))?,
            b.as_i64().ok_or_else(|| not_numeric(fun))?,
        );
        let r = match fun {
            Fun::Add => x.wrapping_add(y),
            Fun::Sub => x.wrapping_sub(y),
            Fun::Mul => x.wrapping_mul(y),
            Fun::Div => {
                if y == 0 {
                    return Err(Error::Invalid("division by zero".into()));
                }
                x / y
            }
            Fun::Rem => {
                if y == 0 {
                    return Err(Error::Invalid("division by zero".into()));
                }
                x % y
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
            Fun::Pow => (x as f64).powf(y as f64) as i64,
            _ => return Err(Error::Panic("bad numeric dispatch".into())),
        };
        return Ok(Value::Int(r));
    }

    let (x, y) = (
        a.as_u64().ok_or_else(|| not_numeric(fun))?,
        b.as_u64().ok_or_else(|| not_numeric(fun))?,
    );
    let r = match fun {
        Fun::Add => x.wrapping_add(y),
        Fun::Sub => x.wrapping_sub(y),
        Fun::Mul => x.wrapping_mul(y),
        Fun::Div => {
            if y == 0 {
                return Err(Error::Invalid("division by zero".into()));
            }
            x / y
        }
        Fun::Rem => {
            if y == 0 {
                return Err(Error::Invalid("division by zero".into()));
            }
            x % y
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::cast_sign_loss)]
        Fun::Pow => (x as f64).powf(y as f64) as u64,
        _ => return Err(Error::Panic("bad numeric dispatch".into())),
    };
    Ok(Value::Uint(r))
}

fn numeric1(fun: Fun, a: &Value) -> Result<Value> {
    let x = a.as_f64().ok_or_else(|| not_numeric(fun))?;

    let r = match fun {
        Fun::Log => x.ln(),
        Fun::Ceil => x.ceil(),
        Fun::Floor => x.floor(),
        Fun::Round => x.round(),
        Fun::Abs => x.abs(),
        _ => return Err(Error::Panic("bad numeric dispatch".into())),
    };

    // integer inputs stay integers
    match a {
        Value::Float(_) => Ok(Value::Float(r)),
        #[allow(clippy::cast_possible_truncation)]
        Value::Int(_) | Value::Time(_) | Value::Date(_) => {
            if fun == Fun::Log {
                Ok(Value::Float(r))
            } else {
                Ok(Value::Int(r as i64))
            }
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        _ => {
            if fun == Fun::Log {
                Ok(Value::Float(r))
            } else {
                Ok(Value::Uint(r as u64))
            }
        }
    }
}

fn time_part(fun: Fun, v: &Value) -> Result<Value> {
    use chrono::{Datelike, TimeZone, Timelike, Utc};

    let nanos = v
        .as_i64()
        .ok_or_else(|| Error::Invalid("time extraction from a non-time value".into()))?;

    let secs = nanos.div_euclid(crate::time::NPERSEC);
    let sub = nanos.rem_euclid(crate::time::NPERSEC);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let dt = Utc
        .timestamp_opt(secs, sub as u32)
        .single()
        .ok_or_else(|| Error::Invalid("timestamp out of range".into()))?;

    let r: i64 = match fun {
        Fun::Century => i64::from(dt.year()) / 100,
        Fun::Year => i64::from(dt.year()),
        Fun::Month => i64::from(dt.month()),
        Fun::Mday => i64::from(dt.day()),
        Fun::Wday => i64::from(dt.weekday().num_days_from_sunday()),
        Fun::Week => i64::from(dt.iso_week().week()),
        Fun::Hour => i64::from(dt.hour()),
        Fun::Min => i64::from(dt.minute()),
        Fun::Sec => i64::from(dt.second()),
        Fun::Milli => i64::from(dt.nanosecond() / 1_000_000),
        Fun::Micro => i64::from(dt.nanosecond() / 1_000),
        Fun::Nano => i64::from(dt.nanosecond()),
        _ => return Err(Error::Panic("bad time dispatch".into())),
    };
    Ok(Value::Int(r))
}

fn text_of(v: &Value) -> Result<&str> {
    match v {
        Value::Text(s) => Ok(s),
        _ => Err(Error::Invalid("string operation on a non-text value".into())),
    }
}

fn not_numeric(fun: Fun) -> Error {
    Error::Invalid(format!("operator {fun:?} applied to a non-numeric value"))
}

/// Applies an operator to already-evaluated arguments.
#[allow(clippy::indexing_slicing)]
pub fn apply(fun: Fun, args: &[Value]) -> Result<Value> {
    if let Some(arity) = fun.arity() {
        if args.len() != arity {
            return Err(Error::Invalid(format!(
                "operator {fun:?} expects {arity} arguments, got {}",
                args.len()
            )));
        }
    } else if args.len() < 2 {
        return Err(Error::Invalid(format!(
            "operator {fun:?} expects at least 2 arguments"
        )));
    }

    match fun {
        Fun::ToFloat => args[0]
            .as_f64()
            .map(Value::Float)
            .ok_or_else(|| not_numeric(fun)),
        Fun::ToInt => args[0]
            .as_i64()
            .map(Value::Int)
            .ok_or_else(|| not_numeric(fun)),
        Fun::ToUint => args[0]
            .as_u64()
            .map(Value::Uint)
            .ok_or_else(|| not_numeric(fun)),
        Fun::ToTime => args[0]
            .as_i64()
            .map(Value::Time)
            .ok_or_else(|| not_numeric(fun)),
        Fun::ToText => Err(Error::NotSupported("totext")),

        Fun::Add | Fun::Sub | Fun::Mul | Fun::Div | Fun::Rem | Fun::Pow => {
            numeric2(fun, &args[0], &args[1])
        }
        Fun::Log | Fun::Ceil | Fun::Floor | Fun::Round | Fun::Abs => numeric1(fun, &args[0]),
        Fun::Root => Err(Error::NotSupported("root")),

        Fun::Eq => Ok(Value::Bool(
            compare_values(&args[0], &args[1]) == Some(Ordering::Equal),
        )),
        Fun::Ne => Ok(Value::Bool(matches!(
            compare_values(&args[0], &args[1]),
            Some(Ordering::Less | Ordering::Greater)
        ))),
        Fun::Lt => Ok(Value::Bool(
            compare_values(&args[0], &args[1]) == Some(Ordering::Less),
        )),
        Fun::Gt => Ok(Value::Bool(
            compare_values(&args[0], &args[1]) == Some(Ordering::Greater),
        )),
        Fun::Le => Ok(Value::Bool(matches!(
            compare_values(&args[0], &args[1]),
            Some(Ordering::Less | Ordering::Equal)
        ))),
        Fun::Ge => Ok(Value::Bool(matches!(
            compare_values(&args[0], &args[1]),
            Some(Ordering::Greater | Ordering::Equal)
        ))),
        Fun::In => Ok(Value::Bool(args[1..].iter().any(|candidate| {
            compare_values(&args[0], candidate) == Some(Ordering::Equal)
        }))),

        Fun::And => Ok(Value::Bool(args[0].is_true() && args[1].is_true())),
        Fun::Or => Ok(Value::Bool(args[0].is_true() || args[1].is_true())),
        Fun::Not => Ok(Value::Bool(!args[0].is_true())),
        Fun::Just => Ok(args[0].clone()),
        Fun::Xor => Err(Error::NotSupported("xor")),

        Fun::Century
        | Fun::Year
        | Fun::Month
        | Fun::Mday
        | Fun::Wday
        | Fun::Week
        | Fun::Hour
        | Fun::Min
        | Fun::Sec
        | Fun::Milli
        | Fun::Micro
        | Fun::Nano => time_part(fun, &args[0]),
        Fun::Bin => Err(Error::NotSupported("bin")),
        Fun::Format => Err(Error::NotSupported("format")),

        #[allow(clippy::cast_possible_truncation)]
        Fun::Length => Ok(Value::Uint(text_of(&args[0])?.len() as u64)),
        Fun::Strcat => {
            let mut out = String::new();
            for arg in args {
                out.push_str(text_of(arg)?);
            }
            Ok(Value::Text(out))
        }
        Fun::Substr => {
            let s = text_of(&args[0])?;
            let start = args[1]
                .as_u64()
                .ok_or_else(|| not_numeric(fun))? as usize;
            let len = args[2]
                .as_u64()
                .ok_or_else(|| not_numeric(fun))? as usize;
            Ok(Value::Text(
                s.chars().skip(start).take(len).collect::<String>(),
            ))
        }
        #[allow(clippy::cast_possible_truncation)]
        Fun::Pos => {
            let hay = text_of(&args[0])?;
            let needle = text_of(&args[1])?;
            match hay.find(needle) {
                Some(at) => Ok(Value::Uint(at as u64)),
                None => Ok(Value::Nothing),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_promotes_types() {
        assert_eq!(
            Value::Uint(7),
            apply(Fun::Add, &[Value::Uint(3), Value::Uint(4)]).unwrap()
        );
        assert_eq!(
            Value::Int(-1),
            apply(Fun::Add, &[Value::Int(-5), Value::Uint(4)]).unwrap()
        );
        assert_eq!(
            Value::Float(3.5),
            apply(Fun::Add, &[Value::Float(1.5), Value::Uint(2)]).unwrap()
        );
    }

    #[test]
    fn division_by_zero_fails() {
        assert!(apply(Fun::Div, &[Value::Uint(1), Value::Uint(0)]).is_err());
        assert!(apply(Fun::Rem, &[Value::Int(1), Value::Int(0)]).is_err());
    }

    #[test]
    fn comparisons_yield_bool() {
        assert_eq!(
            Value::Bool(true),
            apply(Fun::Lt, &[Value::Uint(1), Value::Uint(2)]).unwrap()
        );
        assert_eq!(
            Value::Bool(true),
            apply(Fun::Ge, &[Value::Int(2), Value::Int(2)]).unwrap()
        );
        // nothing never compares
        assert_eq!(
            Value::Bool(false),
            apply(Fun::Eq, &[Value::Nothing, Value::Uint(0)]).unwrap()
        );
    }

    #[test]
    fn in_list_membership() {
        let args = vec![
            Value::Uint(5),
            Value::Uint(2),
            Value::Uint(5),
            Value::Uint(7),
        ];
        assert_eq!(Value::Bool(true), apply(Fun::In, &args).unwrap());

        let args = vec![Value::Uint(4), Value::Uint(2)];
        assert_eq!(Value::Bool(false), apply(Fun::In, &args).unwrap());
    }

    #[test]
    fn time_extraction() {
        // 2021-03-02 04:05:06 UTC
        let ts = 1_614_657_906i64 * crate::time::NPERSEC;
        let v = Value::Time(ts);

        assert_eq!(Value::Int(2021), apply(Fun::Year, &[v.clone()]).unwrap());
        assert_eq!(Value::Int(3), apply(Fun::Month, &[v.clone()]).unwrap());
        assert_eq!(Value::Int(2), apply(Fun::Mday, &[v.clone()]).unwrap());
        assert_eq!(Value::Int(4), apply(Fun::Hour, &[v.clone()]).unwrap());
        assert_eq!(Value::Int(5), apply(Fun::Min, &[v.clone()]).unwrap());
        assert_eq!(Value::Int(6), apply(Fun::Sec, &[v]).unwrap());
    }

    #[test]
    fn reserved_opcodes_stay_unsupported() {
        assert!(matches!(
            apply(Fun::Root, &[Value::Uint(4), Value::Uint(2)]),
            Err(Error::NotSupported(_))
        ));
        assert!(matches!(
            apply(Fun::Xor, &[Value::Bool(true), Value::Bool(false)]),
            Err(Error::NotSupported(_))
        ));
    }

    #[test]
    fn string_operators() {
        let s = Value::Text("hello world".into());
        assert_eq!(Value::Uint(11), apply(Fun::Length, &[s.clone()]).unwrap());
        assert_eq!(
            Value::Uint(6),
            apply(Fun::Pos, &[s.clone(), Value::Text("world".into())]).unwrap()
        );
        assert_eq!(
            Value::Text("hello".into()),
            apply(Fun::Substr, &[s, Value::Uint(0), Value::Uint(5)]).unwrap()
        );
    }
}
