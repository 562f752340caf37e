//! GP type system.
//!
//! Types are either atomic or sets of atomic types. Two types are compatible
//! when they are the same atomic type, when an atomic type is a member of a
//! set, or when two sets intersect. A system with a single type is
//! "typeless" and lets operators skip compatibility scans entirely.

use serde::{Deserialize, Serialize};

use crate::error::{BreedError, BreedResult};

/// Index of a type in its [`TypeSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GpType(pub u16);

impl GpType {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
enum TypeKind {
    Atomic,
    /// Members are always atomic, sorted and deduplicated.
    Set(Vec<GpType>),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TypeSystem {
    names: Vec<String>,
    kinds: Vec<TypeKind>,
}

impl TypeSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A system with the single atomic type `nil`.
    #[must_use]
    pub fn typeless() -> Self {
        let mut types = Self::new();
        types.names.push("nil".to_string());
        types.kinds.push(TypeKind::Atomic);
        types
    }

    /// Add an atomic type.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] on a duplicate name.
    pub fn add_atomic(&mut self, name: &str) -> BreedResult<GpType> {
        self.push(name, TypeKind::Atomic)
    }

    /// Add a set type over existing atomic members.
    ///
    /// # Errors
    ///
    /// Returns [`BreedError::Config`] on a duplicate name, an empty set, or a
    /// member that is itself a set.
    pub fn add_set(&mut self, name: &str, members: &[GpType]) -> BreedResult<GpType> {
        if members.is_empty() {
            return Err(BreedError::config(
                format!("gp.type.set.{}", name),
                "set type has no members",
            ));
        }
        let mut sorted = Vec::with_capacity(members.len());
        for &m in members {
            match self.kinds.get(m.index()) {
                Some(TypeKind::Atomic) => sorted.push(m),
                _ => {
                    return Err(BreedError::config(
                        format!("gp.type.set.{}", name),
                        format!("member {:?} is not an atomic type", m),
                    ))
                }
            }
        }
        sorted.sort_unstable();
        sorted.dedup();
        self.push(name, TypeKind::Set(sorted))
    }

    fn push(&mut self, name: &str, kind: TypeKind) -> BreedResult<GpType> {
        if self.lookup(name).is_some() {
            return Err(BreedError::config(
                format!("gp.type.{}", name),
                "duplicate type name",
            ));
        }
        let id = u16::try_from(self.names.len())
            .map_err(|_| BreedError::config("gp.type", "too many types"))?;
        self.names.push(name.to_string());
        self.kinds.push(kind);
        Ok(GpType(id))
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<GpType> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| u16::try_from(i).ok())
            .map(GpType)
    }

    #[must_use]
    pub fn name(&self, ty: GpType) -> &str {
        self.names.get(ty.index()).map_or("?", String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Exactly one type exists.
    #[must_use]
    pub fn is_typeless(&self) -> bool {
        self.names.len() == 1
    }

    #[must_use]
    pub fn compatible(&self, a: GpType, b: GpType) -> bool {
        if a == b {
            return true;
        }
        match (&self.kinds[a.index()], &self.kinds[b.index()]) {
            (TypeKind::Atomic, TypeKind::Atomic) => false,
            (TypeKind::Atomic, TypeKind::Set(members)) => members.binary_search(&a).is_ok(),
            (TypeKind::Set(members), TypeKind::Atomic) => members.binary_search(&b).is_ok(),
            (TypeKind::Set(xs), TypeKind::Set(ys)) => xs.iter().any(|x| ys.binary_search(x).is_ok()),
        }
    }
}
