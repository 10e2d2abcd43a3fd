//! Value object trait: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. Two value objects with the same values are considered equal.
//!
//! Each value object type declares the members that take part in equality, once, with
//! [`value_object!`](crate::value_object). A member that is not declared is not compared:
//! adding a field does not change equality until the field is added to the declaration.
//!
//! ```ignore
//! #[derive(Debug, Clone)]
//! struct Route {
//!     name: String,
//!     stops: Vec<String>,
//! }
//!
//! value_object!(Route { value name, sequence stops });
//! ```
//!
//! `value` members compare with their own `Eq`. `sequence` members compare element-wise,
//! in order. Text is always a plain `value`, never a sequence of characters.

use core::any::Any;
use core::hash::{Hash, Hasher};
use std::hash::DefaultHasher;

/// A member value that can be compared and hashed without knowing its type.
///
/// Implemented for every `Eq + Hash` type; wrap floating point members in a type that
/// defines those.
pub trait Component: Any + core::fmt::Debug {
    fn eq_component(&self, other: &dyn Component) -> bool;

    fn hash_component(&self) -> u64;

    fn as_any(&self) -> &dyn Any;
}

impl<T> Component for T
where
    T: Any + core::fmt::Debug + Eq + Hash,
{
    fn eq_component(&self, other: &dyn Component) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| self == other)
    }

    fn hash_component(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One declared member of a value object.
#[derive(Debug)]
pub enum Member<'a> {
    Value(&'a dyn Component),
    Sequence(Vec<&'a dyn Component>),
}

impl Member<'_> {
    fn equals(&self, other: &Member<'_>) -> bool {
        match (self, other) {
            (Member::Value(a), Member::Value(b)) => a.eq_component(*b),
            (Member::Sequence(a), Member::Sequence(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.eq_component(*b))
            }
            _ => false,
        }
    }

    fn hash_code(&self) -> u64 {
        match self {
            Member::Value(value) => value.hash_component(),
            Member::Sequence(items) => combine(items.iter().map(|item| item.hash_component())),
        }
    }
}

/// Ordered member values of one value object instance.
#[derive(Debug, Default)]
pub struct Members<'a>(Vec<Member<'a>>);

impl<'a> Members<'a> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn value<T: Component>(mut self, value: &'a T) -> Self {
        self.0.push(Member::Value(value));
        self
    }

    pub fn sequence<I, T>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = &'a T>,
        T: Component + 'a,
    {
        let items = items
            .into_iter()
            .map(|item| item as &dyn Component)
            .collect();
        self.0.push(Member::Sequence(items));
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn equals(&self, other: &Members<'_>) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a.equals(b))
    }

    fn hash_code(&self) -> u64 {
        combine(self.0.iter().map(Member::hash_code))
    }
}

/// Order-sensitive, overflow-tolerant hash mixing.
fn combine(hashes: impl Iterator<Item = u64>) -> u64 {
    hashes.fold(17u64, |acc, hash| acc.wrapping_mul(59).wrapping_add(hash))
}

/// Marker + equality engine for value objects.
///
/// Value objects should be **immutable**: to "modify" one, build a new one.
/// Prefer [`value_object!`](crate::value_object) over implementing this by hand; it
/// also derives `PartialEq`, `Eq` and `Hash` from the declared members.
pub trait ValueObject: Any + Clone + core::fmt::Debug {
    /// Names of the members taking part in equality, in declaration order.
    const MEMBERS: &'static [&'static str];

    fn members(&self) -> Members<'_>;

    /// Structural equality against a value of any type.
    ///
    /// Only an instance of exactly the same type can be equal.
    fn value_eq(&self, other: &dyn Any) -> bool
    where
        Self: Sized,
    {
        let Some(other) = other.downcast_ref::<Self>() else {
            return false;
        };
        if core::ptr::eq(self, other) {
            return true;
        }

        let (mine, theirs) = (self.members(), other.members());
        debug_assert_eq!(mine.len(), Self::MEMBERS.len());
        mine.equals(&theirs)
    }

    /// Hash consistent with [`value_eq`](ValueObject::value_eq).
    fn value_hash(&self) -> u64 {
        self.members().hash_code()
    }
}

/// Declare the equality members of a value object type.
///
/// Each member is `value field` or `sequence field`, in the order they should be
/// compared.
#[macro_export]
macro_rules! value_object {
    ($ty:ident { $($kind:ident $field:ident),* $(,)? }) => {
        impl $crate::ValueObject for $ty {
            const MEMBERS: &'static [&'static str] = &[$(::core::stringify!($field)),*];

            fn members(&self) -> $crate::value_object::Members<'_> {
                $crate::value_object::Members::new()
                    $(.$kind(&self.$field))*
            }
        }

        impl ::core::cmp::PartialEq for $ty {
            fn eq(&self, other: &Self) -> bool {
                $crate::ValueObject::value_eq(self, other)
            }
        }

        impl ::core::cmp::Eq for $ty {}

        impl ::core::hash::Hash for $ty {
            fn hash<H: ::core::hash::Hasher>(&self, state: &mut H) {
                state.write_u64($crate::ValueObject::value_hash(self));
            }
        }
    };
}
