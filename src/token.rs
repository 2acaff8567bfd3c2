//! Injection tokens
//!
//! A [`Token`] identifies a provider inside a module: a class (Rust type),
//! a string, or a unique [`Symbol`]. Well-known string tokens such as
//! [`APP_GUARD`] and [`REQUEST`] have special meaning to the scanner and the
//! injector.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Registers a guard applied to every route of the application
pub const APP_GUARD: &str = "APP_GUARD";
/// Registers a pipe applied to every route of the application
pub const APP_PIPE: &str = "APP_PIPE";
/// Registers an interceptor applied to every route of the application
pub const APP_INTERCEPTOR: &str = "APP_INTERCEPTOR";
/// Registers an exception filter applied to every route of the application
pub const APP_FILTER: &str = "APP_FILTER";
/// The request object registered for a context id
pub const REQUEST: &str = "REQUEST";
/// Description of the class a transient provider is being constructed for
pub const INQUIRER: &str = "INQUIRER";

/// A unique, non-string token. Two symbols are equal only if one is a clone
/// of the other, even when their descriptions match.
#[derive(Clone)]
pub struct Symbol {
    id: u64,
    description: Arc<str>,
}

impl Symbol {
    /// Create a new unique symbol
    pub fn new(description: impl Into<Arc<str>>) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            description: description.into(),
        }
    }

    /// Human readable description
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description)
    }
}

/// Key under which a provider is registered in a module
#[derive(Clone)]
pub enum Token {
    /// A class token, keyed by the Rust type
    Type(TypeId, &'static str),
    /// A string token
    Name(Arc<str>),
    /// A unique symbol token
    Symbol(Symbol),
}

impl Token {
    /// Token for a Rust type
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self::Type(TypeId::of::<T>(), std::any::type_name::<T>())
    }

    /// String token
    #[inline]
    pub fn name(name: impl Into<Arc<str>>) -> Self {
        Self::Name(name.into())
    }

    /// A fresh symbol token
    #[inline]
    pub fn symbol(description: impl Into<Arc<str>>) -> Self {
        Self::Symbol(Symbol::new(description))
    }

    /// The type id, for class tokens
    #[inline]
    pub fn type_id(&self) -> Option<TypeId> {
        match self {
            Self::Type(id, _) => Some(*id),
            _ => None,
        }
    }

    /// `true` if this is the given string token
    #[inline]
    pub fn is_name(&self, name: &str) -> bool {
        matches!(self, Self::Name(n) if &**n == name)
    }

    /// Short name used in messages: the type name without its module path,
    /// the string itself, or the symbol description
    pub fn display_name(&self) -> String {
        match self {
            Self::Type(_, name) => short_type_name(name).to_owned(),
            Self::Name(name) => name.to_string(),
            Self::Symbol(symbol) => format!("Symbol({})", symbol.description()),
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Type(a, _), Self::Type(b, _)) => a == b,
            (Self::Name(a), Self::Name(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Type(id, _) => id.hash(state),
            Self::Name(name) => name.hash(state),
            Self::Symbol(symbol) => symbol.hash(state),
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(_, name) => write!(f, "Token::Type({name})"),
            Self::Name(name) => write!(f, "Token::Name({name:?})"),
            Self::Symbol(symbol) => write!(f, "Token::{symbol:?}"),
        }
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self::Name(value.into())
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self::Name(value.into())
    }
}

impl From<Symbol> for Token {
    fn from(value: Symbol) -> Self {
        Self::Symbol(value)
    }
}

impl From<&Token> for Token {
    fn from(value: &Token) -> Self {
        value.clone()
    }
}

/// Strip the module path from a type name, keeping generic arguments intact
pub(crate) fn short_type_name(name: &'static str) -> &'static str {
    let end = name.find('<').unwrap_or(name.len());
    match name[..end].rfind("::") {
        Some(idx) => &name[idx + 2..],
        None => name,
    }
}

/// A deferred reference, evaluated only when the container needs it.
///
/// Used to break declaration-order cycles between modules or providers that
/// refer to each other.
pub struct ForwardRef<T>(Arc<dyn Fn() -> Option<T> + Send + Sync>);

impl<T> ForwardRef<T> {
    /// Wrap a thunk
    pub fn new<F>(thunk: F) -> Self
    where
        F: Fn() -> Option<T> + Send + Sync + 'static,
    {
        Self(Arc::new(thunk))
    }

    /// Evaluate the thunk
    #[inline]
    pub fn resolve(&self) -> Option<T> {
        (self.0)()
    }
}

impl<T> Clone for ForwardRef<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> fmt::Debug for ForwardRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ForwardRef(..)")
    }
}

/// Shorthand for [`ForwardRef::new`] with a thunk that always yields a value
pub fn forward_ref<T, F>(thunk: F) -> ForwardRef<T>
where
    F: Fn() -> T + Send + Sync + 'static,
{
    ForwardRef::new(move || Some(thunk()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Database;

    #[test]
    fn test_type_tokens_compare_by_type() {
        assert_eq!(Token::of::<Database>(), Token::of::<Database>());
        assert_ne!(Token::of::<Database>(), Token::of::<String>());
        assert_eq!(Token::of::<Database>().display_name(), "Database");
    }

    #[test]
    fn test_name_tokens_compare_by_content() {
        let a = Token::from(APP_GUARD);
        let b = Token::name(String::from("APP_GUARD"));
        assert_eq!(a, b);
        assert!(a.is_name(APP_GUARD));

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_symbols_are_unique() {
        let a = Symbol::new("CONFIG");
        let b = Symbol::new("CONFIG");
        assert_ne!(Token::from(a.clone()), Token::from(b));
        assert_eq!(Token::from(a.clone()), Token::from(a));
    }

    #[test]
    fn test_short_type_name_keeps_generics() {
        assert_eq!(short_type_name("a::b::Repo<c::User>"), "Repo<c::User>");
        assert_eq!(short_type_name("Plain"), "Plain");
    }

    #[test]
    fn test_forward_ref_is_lazy() {
        let fwd: ForwardRef<u32> = ForwardRef::new(|| None);
        assert!(fwd.resolve().is_none());
        assert_eq!(forward_ref(|| 7).resolve(), Some(7));
    }
}
