//! Parameter values and their structural equality.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A concrete value one parameter takes for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Seq(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
    /// A named callable with bound arguments, e.g. a model constructor with
    /// some hyper-parameters fixed.
    Callable {
        target: String,
        args: Vec<ParamValue>,
        kwargs: BTreeMap<String, ParamValue>,
    },
}

impl ParamValue {
    pub fn callable(target: impl Into<String>, args: Vec<ParamValue>) -> Self {
        Self::Callable {
            target: target.into(),
            args,
            kwargs: BTreeMap::new(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// False if any float inside is NaN or infinite; JSON has no encoding
    /// for those.
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Float(v) => v.is_finite(),
            Self::Seq(items) => items.iter().all(Self::is_finite),
            Self::Map(entries) => entries.values().all(Self::is_finite),
            Self::Callable { args, kwargs, .. } => {
                args.iter().all(Self::is_finite) && kwargs.values().all(Self::is_finite)
            }
            Self::Null | Self::Bool(_) | Self::Int(_) | Self::Str(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

/// Recursive structural equality.
///
/// Numbers compare by value across `Int`/`Float`, strings are atomic,
/// sequences compare element-wise in order, maps compare by key set and
/// value, callables compare by target and bound arguments.
pub fn deep_eq(a: &ParamValue, b: &ParamValue) -> bool {
    use ParamValue::*;

    match (a, b) {
        (Null, Null) => true,
        (Bool(x), Bool(y)) => x == y,
        (Int(x), Int(y)) => x == y,
        (Float(x), Float(y)) => x == y,
        (Int(x), Float(y)) | (Float(y), Int(x)) => (*x as f64) == *y,
        (Str(x), Str(y)) => x == y,
        (Seq(x), Seq(y)) => seq_eq(x, y),
        (Map(x), Map(y)) => map_eq(x, y),
        (
            Callable {
                target: t1,
                args: a1,
                kwargs: k1,
            },
            Callable {
                target: t2,
                args: a2,
                kwargs: k2,
            },
        ) => t1 == t2 && seq_eq(a1, a2) && map_eq(k1, k2),
        _ => false,
    }
}

/// Element-wise [`deep_eq`] over two sequences.
pub fn seq_eq(a: &[ParamValue], b: &[ParamValue]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| deep_eq(x, y))
}

fn map_eq(a: &BTreeMap<String, ParamValue>, b: &BTreeMap<String, ParamValue>) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(key, x)| b.get(key).is_some_and(|y| deep_eq(x, y)))
}

impl PartialEq for ParamValue {
    fn eq(&self, other: &Self) -> bool {
        deep_eq(self, other)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Seq(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key:?}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Callable {
                target,
                args,
                kwargs,
            } => {
                write!(f, "{target}(")?;
                let mut first = true;
                for arg in args {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{arg}")?;
                }
                for (key, value) in kwargs {
                    if !first {
                        write!(f, ", ")?;
                    }
                    first = false;
                    write!(f, "{key}={value}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(v: Vec<T>) -> Self {
        Self::Seq(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, ParamValue)]) -> ParamValue {
        ParamValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    fn scalars_compare_by_value() {
        assert!(deep_eq(&1.into(), &1.into()));
        assert!(!deep_eq(&1.into(), &2.into()));
        assert!(deep_eq(&2.into(), &ParamValue::Float(2.0)));
        assert!(!deep_eq(&ParamValue::Float(f64::NAN), &ParamValue::Float(f64::NAN)));
        assert!(!deep_eq(&ParamValue::Bool(true), &1.into()));
        assert!(deep_eq(&ParamValue::Null, &ParamValue::Null));
    }

    #[test]
    fn finiteness_looks_inside_containers() {
        assert!(ParamValue::Float(1.0).is_finite());
        assert!(!ParamValue::Float(f64::NEG_INFINITY).is_finite());
        assert!(!map(&[("lr", ParamValue::Float(f64::NAN))]).is_finite());
        let mut call = ParamValue::callable("model", vec![1.into()]);
        assert!(call.is_finite());
        if let ParamValue::Callable { kwargs, .. } = &mut call {
            kwargs.insert("scale".into(), ParamValue::Float(f64::INFINITY));
        }
        assert!(!call.is_finite());
    }

    #[test]
    fn strings_are_atomic() {
        let s: ParamValue = "ab".into();
        let chars: ParamValue = vec!["a", "b"].into();
        assert!(deep_eq(&s, &"ab".into()));
        assert!(!deep_eq(&s, &chars));
    }

    #[test]
    fn nested_sequences_and_maps() {
        let a = ParamValue::from(vec![
            map(&[("x", 1.into()), ("y", vec![1, 2].into())]),
            ParamValue::from("z"),
        ]);
        let b = ParamValue::from(vec![
            map(&[("y", vec![1, 2].into()), ("x", 1.into())]),
            ParamValue::from("z"),
        ]);
        let c = ParamValue::from(vec![
            map(&[("x", 1.into()), ("y", vec![1, 3].into())]),
            ParamValue::from("z"),
        ]);
        assert!(deep_eq(&a, &b));
        assert!(!deep_eq(&a, &c));
        assert!(!deep_eq(&vec![1, 2].into(), &vec![1, 2, 3].into()));
        assert!(!deep_eq(&map(&[("x", 1.into())]), &map(&[("y", 1.into())])));
    }

    #[test]
    fn callables_compare_target_and_arguments() {
        let a = ParamValue::callable("svm", vec![ParamValue::Float(0.1)]);
        let b = ParamValue::callable("svm", vec![ParamValue::Float(0.1)]);
        let other_target = ParamValue::callable("forest", vec![ParamValue::Float(0.1)]);
        let other_args = ParamValue::callable("svm", vec![ParamValue::Float(0.2)]);
        assert_eq!(a, b);
        assert_ne!(a, other_target);
        assert_ne!(a, other_args);

        let mut kwargs = BTreeMap::new();
        kwargs.insert("kernel".to_string(), ParamValue::from("rbf"));
        let with_kwargs = ParamValue::Callable {
            target: "svm".into(),
            args: vec![ParamValue::Float(0.1)],
            kwargs,
        };
        assert_ne!(a, with_kwargs);
    }

    #[test]
    fn display_renders_nested_values() {
        let value = ParamValue::from(vec![ParamValue::from(1), ParamValue::from("a")]);
        assert_eq!(value.to_string(), "[1, \"a\"]");
        let call = ParamValue::callable("svm", vec![ParamValue::Float(0.5)]);
        assert_eq!(call.to_string(), "svm(0.5)");
    }

    #[test]
    fn json_round_trip_preserves_structure() {
        let value = ParamValue::from(vec![
            map(&[("lr", ParamValue::Float(0.01))]),
            ParamValue::callable("f", vec![ParamValue::Null]),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        let back: ParamValue = serde_json::from_str(&json).unwrap();
        assert_eq!(value, back);
    }
}
