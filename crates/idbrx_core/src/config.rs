//! Adapter configuration and the engine factory context.

use crate::error::{Error, Result};
use idbrx_engine::Factory;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// Resolves the host environment's built-in engine factory, if it has one.
pub type HostFactory = fn() -> Option<Rc<dyn Factory>>;

/// Configuration for a [`Context`].
#[derive(Clone, Default)]
pub struct Config {
    /// Engine factory to use. Takes precedence over the host's.
    pub factory: Option<Rc<dyn Factory>>,

    /// Fallback used on the first open when no factory is set.
    pub host_factory: Option<HostFactory>,
}

impl Config {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the engine factory.
    #[must_use]
    pub fn factory(mut self, factory: Rc<dyn Factory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Sets the resolver for the host's default factory.
    #[must_use]
    pub fn host_factory(mut self, resolver: HostFactory) -> Self {
        self.host_factory = Some(resolver);
        self
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("factory", &self.factory.is_some())
            .field("host_factory", &self.host_factory.is_some())
            .finish()
    }
}

/// Holds the engine factory used by opens.
///
/// A context replaces process-wide factory state: the factory is either
/// given up front, substituted later with [`Context::set_factory`], or
/// resolved from the host on the first open. Cloning yields another handle
/// to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

struct ContextInner {
    factory: RefCell<Option<Rc<dyn Factory>>>,
    host_factory: Option<HostFactory>,
}

impl Context {
    /// Creates a context from a configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                factory: RefCell::new(config.factory),
                host_factory: config.host_factory,
            }),
        }
    }

    /// Creates a context using `factory`.
    #[must_use]
    pub fn with_factory(factory: impl Factory + 'static) -> Self {
        Self::new(Config::new().factory(Rc::new(factory)))
    }

    /// Installs a factory for subsequent opens.
    pub fn set_factory(&self, factory: Rc<dyn Factory>) {
        *self.inner.factory.borrow_mut() = Some(factory);
    }

    /// Returns true if a factory is installed or has been resolved.
    #[must_use]
    pub fn has_factory(&self) -> bool {
        self.inner.factory.borrow().is_some()
    }

    /// Returns the factory, resolving the host's on first use.
    pub(crate) fn factory(&self) -> Result<Rc<dyn Factory>> {
        if let Some(factory) = self.inner.factory.borrow().as_ref() {
            return Ok(Rc::clone(factory));
        }

        let resolved = self
            .inner
            .host_factory
            .and_then(|resolve| resolve())
            .ok_or(Error::NoFactory)?;
        debug!("using the host's default engine factory");
        *self.inner.factory.borrow_mut() = Some(Rc::clone(&resolved));
        Ok(resolved)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("factory", &self.has_factory())
            .field("host_factory", &self.inner.host_factory.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idbrx_engine::MemoryFactory;

    fn host_memory() -> Option<Rc<dyn Factory>> {
        Some(Rc::new(MemoryFactory::new()))
    }

    fn host_none() -> Option<Rc<dyn Factory>> {
        None
    }

    #[test]
    fn no_factory_anywhere() {
        let context = Context::default();
        assert!(matches!(context.factory(), Err(Error::NoFactory)));
        assert!(!context.has_factory());
    }

    #[test]
    fn host_factory_is_resolved_once() {
        let context = Context::new(Config::new().host_factory(host_memory));
        assert!(!context.has_factory());
        let first = context.factory().unwrap();
        let second = context.factory().unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn explicit_factory_wins_over_host() {
        let explicit: Rc<dyn Factory> = Rc::new(MemoryFactory::new());
        let context = Context::new(
            Config::new()
                .factory(Rc::clone(&explicit))
                .host_factory(host_memory),
        );
        assert!(Rc::ptr_eq(&context.factory().unwrap(), &explicit));
    }

    #[test]
    fn late_substitution_is_picked_up() {
        let context = Context::new(Config::new().host_factory(host_none));
        assert!(matches!(context.factory(), Err(Error::NoFactory)));
        context.set_factory(Rc::new(MemoryFactory::new()));
        assert!(context.factory().is_ok());
    }

    #[test]
    fn config_debug_hides_factories() {
        let config = Config::new().host_factory(host_none);
        assert_eq!(
            format!("{config:?}"),
            "Config { factory: false, host_factory: true }"
        );
    }
}
