//! Hierarchical parameter lookup.
//!
//! Parameters are plain `key = value` strings addressed by dotted paths such as
//! `gp.breed.size-fair.tries`. Every lookup takes a primary path and a
//! fallback default path, so one experiment can override a single pipeline
//! while sharing defaults with the rest.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{BreedError, BreedResult};

/// A dotted parameter key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamPath(String);

impl ParamPath {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Append one segment, returning the extended path.
    #[must_use]
    pub fn push(&self, segment: impl fmt::Display) -> Self {
        if self.0.is_empty() {
            Self(segment.to_string())
        } else {
            Self(format!("{}.{}", self.0, segment))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParamPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParamPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// A flat store of externally supplied parameter values.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    /// Raw values keyed by full dotted path.
    entries: BTreeMap<String, String>,
}

impl Parameters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `key = value` lines. Blank lines and `#` comments are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for a line without `=` or with an empty key.
    pub fn parse(text: &str) -> BreedResult<Self> {
        let mut params = Self::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(BreedError::config(
                    format!("line {}", lineno + 1),
                    format!("expected `key = value`, got `{}`", line),
                ));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(BreedError::config(
                    format!("line {}", lineno + 1),
                    "empty parameter key",
                ));
            }
            params.set(key, value.trim());
        }
        Ok(params)
    }

    /// Set (or overwrite) a value.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.entries.insert(key.into(), value.to_string());
    }

    #[must_use]
    pub fn contains(&self, path: &ParamPath) -> bool {
        self.entries.contains_key(path.as_str())
    }

    /// Raw lookup: primary path first, then the default path.
    /// Returns the value together with the key it was found under.
    #[must_use]
    pub fn lookup<'a>(
        &'a self,
        path: &ParamPath,
        default: &ParamPath,
    ) -> Option<(&'a str, ParamPath)> {
        if let Some(v) = self.entries.get(path.as_str()) {
            return Some((v.as_str(), path.clone()));
        }
        self.entries
            .get(default.as_str())
            .map(|v| (v.as_str(), default.clone()))
    }

    /// Typed lookup. `Ok(None)` when neither key is present.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] when the value does not parse.
    pub fn get<T: FromStr>(&self, path: &ParamPath, default: &ParamPath) -> BreedResult<Option<T>> {
        match self.lookup(path, default) {
            None => Ok(None),
            Some((raw, key)) => raw.parse::<T>().map(Some).map_err(|_| {
                BreedError::config(key, format!("cannot parse `{}`", raw))
            }),
        }
    }

    /// Typed lookup falling back to `fallback` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] when the value does not parse.
    pub fn get_or<T: FromStr>(
        &self,
        path: &ParamPath,
        default: &ParamPath,
        fallback: T,
    ) -> BreedResult<T> {
        Ok(self.get(path, default)?.unwrap_or(fallback))
    }

    /// A probability in `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] when unparsable or out of range.
    pub fn get_probability(
        &self,
        path: &ParamPath,
        default: &ParamPath,
        fallback: f32,
    ) -> BreedResult<f32> {
        let value: f32 = self.get_or(path, default, fallback)?;
        if !(0.0..=1.0).contains(&value) {
            let key = self.resolved_key(path, default);
            return Err(BreedError::config(
                key,
                format!("probability {} outside [0, 1]", value),
            ));
        }
        Ok(value)
    }

    /// A strictly positive integer (try counts, depths, tournament sizes).
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] when unparsable, negative or zero.
    pub fn get_positive(
        &self,
        path: &ParamPath,
        default: &ParamPath,
        fallback: usize,
    ) -> BreedResult<usize> {
        // Parse as signed so "-3" is reported as out of range, not unparsable.
        let value: i64 = self.get_or(path, default, fallback as i64)?;
        if value <= 0 {
            let key = self.resolved_key(path, default);
            return Err(BreedError::config(key, format!("must be > 0, got {}", value)));
        }
        usize::try_from(value).map_err(|_| {
            BreedError::config(self.resolved_key(path, default), "value too large")
        })
    }

    /// Accepts `true`/`false` as well as `1`/`0`.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] for any other spelling.
    pub fn get_bool(&self, path: &ParamPath, default: &ParamPath, fallback: bool) -> BreedResult<bool> {
        match self.lookup(path, default) {
            None => Ok(fallback),
            Some(("true" | "1", _)) => Ok(true),
            Some(("false" | "0", _)) => Ok(false),
            Some((raw, key)) => Err(BreedError::config(key, format!("not a boolean: `{}`", raw))),
        }
    }

    #[must_use]
    pub fn get_string(&self, path: &ParamPath, default: &ParamPath) -> Option<String> {
        self.lookup(path, default).map(|(v, _)| v.to_string())
    }

    /// An optional tree index: absent or `any` means "choose at random".
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] when present but not an index.
    pub fn get_tree_index(&self, path: &ParamPath, default: &ParamPath) -> BreedResult<Option<usize>> {
        match self.lookup(path, default) {
            None | Some(("any", _)) => Ok(None),
            Some((raw, key)) => raw
                .parse::<usize>()
                .map(Some)
                .map_err(|_| BreedError::config(key, format!("not a tree index: `{}`", raw))),
        }
    }

    fn resolved_key(&self, path: &ParamPath, default: &ParamPath) -> ParamPath {
        self.lookup(path, default)
            .map_or_else(|| path.clone(), |(_, key)| key)
    }
}
