//! Tag-to-factory registry.
//!
//! Experiments name their operators by string tag in the parameters. The tag
//! is resolved to a factory once, at configuration time, and the factory
//! returns a default-constructed variant that is then `setup` from the same
//! parameters.

use std::collections::BTreeMap;

use crate::error::{BreedError, BreedResult};
use crate::params::{ParamPath, Parameters};

type Factory<T, A> = Box<dyn Fn(&A) -> T + Send + Sync>;

/// Maps string tags to constructors taking a shared argument `A`
/// (for GP operators, the shared [`GpContext`](crate::gp::constraints::GpContext)).
pub struct Registry<T, A = ()> {
    factories: BTreeMap<String, Factory<T, A>>,
}

impl<T, A> Default for Registry<T, A> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<T, A> Registry<T, A> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `tag`, replacing any previous one.
    pub fn register<F>(&mut self, tag: impl Into<String>, factory: F)
    where
        F: Fn(&A) -> T + Send + Sync + 'static,
    {
        self.factories.insert(tag.into(), Box::new(factory));
    }

    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.factories.contains_key(tag)
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> impl Iterator<Item = &str> + '_ {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiate the variant registered under `tag`.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] if the tag is unknown.
    pub fn create(&self, tag: &str, arg: &A) -> BreedResult<T> {
        self.factories
            .get(tag)
            .map(|factory| factory(arg))
            .ok_or_else(|| {
                BreedError::config(
                    tag,
                    format!(
                        "unknown tag; expected one of [{}]",
                        self.tags().collect::<Vec<_>>().join(", ")
                    ),
                )
            })
    }

    /// Read a tag from `path` (falling back to `default`) and instantiate it.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] if the key is missing or names an unknown tag.
    pub fn resolve(
        &self,
        params: &Parameters,
        path: &ParamPath,
        default: &ParamPath,
        arg: &A,
    ) -> BreedResult<T> {
        let Some((tag, key)) = params.lookup(path, default) else {
            return Err(BreedError::config(path, "missing required tag"));
        };
        self.create(tag, arg).map_err(|err| match err {
            BreedError::Config { message, .. } => BreedError::Config {
                key: key.to_string(),
                message,
            },
            other => other,
        })
    }
}
