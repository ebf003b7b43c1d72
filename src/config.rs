use serde::{Deserialize, Serialize};

use crate::cube::Vec3;
use crate::error::{NetError, Result};

/// One option value. Node and edge groups are described by flat records of
/// these; packed weight payloads travel as `Bytes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Opt {
    Int(usize),
    Float(f64),
    Str(String),
    Vec3(Vec3),
    Bytes(Vec<u8>),
}

macro_rules! from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Opt {
            fn from(v: $ty) -> Opt {
                Opt::Int(v as usize)
            }
        })*
    };
}

from_int!(usize, u32, u64, i32, i64);

impl From<f64> for Opt {
    fn from(v: f64) -> Opt {
        Opt::Float(v)
    }
}

impl From<f32> for Opt {
    fn from(v: f32) -> Opt {
        Opt::Float(v as f64)
    }
}

impl From<&str> for Opt {
    fn from(v: &str) -> Opt {
        Opt::Str(v.to_string())
    }
}

impl From<String> for Opt {
    fn from(v: String) -> Opt {
        Opt::Str(v)
    }
}

impl From<Vec3> for Opt {
    fn from(v: Vec3) -> Opt {
        Opt::Vec3(v)
    }
}

impl From<Vec<u8>> for Opt {
    fn from(v: Vec<u8>) -> Opt {
        Opt::Bytes(v)
    }
}

/// Typed extraction out of an [`Opt`].
pub trait FromOpt: Sized {
    const EXPECTED: &'static str;
    fn from_opt(opt: &Opt) -> Option<Self>;
}

impl FromOpt for usize {
    const EXPECTED: &'static str = "integer";
    fn from_opt(opt: &Opt) -> Option<usize> {
        match opt {
            Opt::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromOpt for f64 {
    const EXPECTED: &'static str = "number";
    fn from_opt(opt: &Opt) -> Option<f64> {
        match opt {
            Opt::Float(v) => Some(*v),
            Opt::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl FromOpt for String {
    const EXPECTED: &'static str = "string";
    fn from_opt(opt: &Opt) -> Option<String> {
        match opt {
            Opt::Str(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FromOpt for Vec3 {
    const EXPECTED: &'static str = "3-vector";
    fn from_opt(opt: &Opt) -> Option<Vec3> {
        match opt {
            Opt::Vec3(v) => Some(*v),
            // "a,b,c" strings are accepted for hand-written records
            Opt::Str(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromOpt for Vec<u8> {
    const EXPECTED: &'static str = "byte string";
    fn from_opt(opt: &Opt) -> Option<Vec<u8>> {
        match opt {
            Opt::Bytes(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// An ordered, schema-flexible option record. Keys keep their insertion
/// order so a serialized network reads back the way it was written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    entries: Vec<(String, Opt)>,
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    /// Inserts or replaces `key`.
    pub fn push(&mut self, key: &str, val: impl Into<Opt>) {
        let val = val.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = val,
            None => self.entries.push((key.to_string(), val)),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&Opt> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Typed get; missing key or a wrong-typed value is an error.
    pub fn require<T: FromOpt>(&self, key: &str) -> Result<T> {
        let opt = self.get(key).ok_or_else(|| NetError::MissingOption {
            key: key.to_string(),
        })?;
        T::from_opt(opt).ok_or_else(|| NetError::OptionType {
            key: key.to_string(),
            expected: T::EXPECTED,
        })
    }

    /// Typed get with a default; only a present-but-wrong-typed value errors.
    pub fn optional<T: FromOpt>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            None => Ok(default),
            Some(opt) => T::from_opt(opt).ok_or_else(|| NetError::OptionType {
                key: key.to_string(),
                expected: T::EXPECTED,
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Opt)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Builds a [`Config`] from `(key, value)` pairs.
#[macro_export]
macro_rules! config {
    ( $( ($k:expr, $v:expr) ),* $(,)? ) => {{
        let mut c = $crate::config::Config::new();
        $( c.push($k, $v); )*
        c
    }};
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn typed_getters() {
        let c = config!(
            ("name", "conv1"),
            ("size", Vec3::new(3, 3, 3)),
            ("stride", "2,2,2"),
            ("eta", 0.1),
            ("count", 4),
        );
        assert_eq!(c.require::<String>("name").unwrap(), "conv1");
        assert_eq!(c.require::<Vec3>("size").unwrap(), Vec3::splat(3));
        assert_eq!(c.require::<Vec3>("stride").unwrap(), Vec3::splat(2));
        assert_eq!(c.require::<f64>("eta").unwrap(), 0.1);
        // ints coerce to floats, not the other way around
        assert_eq!(c.require::<f64>("count").unwrap(), 4.0);
        assert!(matches!(
            c.require::<usize>("eta"),
            Err(NetError::OptionType { .. })
        ));
        assert!(matches!(
            c.require::<usize>("absent"),
            Err(NetError::MissingOption { .. })
        ));
        assert_eq!(c.optional::<usize>("absent", 7).unwrap(), 7);
    }

    #[test]
    fn push_replaces() {
        let mut c = config!(("eta", 0.1), ("momentum", 0.5));
        c.push("eta", 0.01);
        assert_eq!(c.require::<f64>("eta").unwrap(), 0.01);
        // insertion order is stable under replacement
        let keys: Vec<_> = c.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["eta", "momentum"]);
    }

    #[test]
    fn serde_round_trip() {
        let c = config!(
            ("name", "out"),
            ("type", "transfer"),
            ("size", 3),
            ("biases", vec![0u8; 24]),
        );
        let json = serde_json::to_string(&c).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
