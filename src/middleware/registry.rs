//! Named middleware registry with `provides`/`requires` metadata, used to
//! resolve a route's declared middleware names into a concrete chain and
//! validate that every declared requirement is satisfied by something
//! earlier in that chain (§4.8 typed chain validation).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::config::MiddlewareRef;
use crate::middleware::dispatcher::Middleware;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("middleware {0:?} is already registered")]
    AlreadyRegistered(String),
    #[error("middleware {0:?} is not registered")]
    Unknown(String),
    #[error("middleware {0:?} requires {1:?}, which nothing earlier in the chain provides")]
    MissingRequirement(String, String),
}

struct Entry {
    middleware: Arc<dyn Middleware>,
    provides: HashSet<String>,
    requires: HashSet<String>,
}

/// Maps middleware names to implementations plus the capabilities they
/// provide and require, so route-declared middleware lists (`config.rs`'s
/// `MiddlewareRef::Named`) can be resolved and order-validated.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<String, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        middleware: Arc<dyn Middleware>,
        provides: &[&str],
        requires: &[&str],
    ) -> Result<(), RegistryError> {
        if self.entries.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_owned()));
        }
        self.entries.insert(
            name.to_owned(),
            Entry {
                middleware,
                provides: provides.iter().map(|s| (*s).to_owned()).collect(),
                requires: requires.iter().map(|s| (*s).to_owned()).collect(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Drops every registered middleware. Used by test teardown and by an
    /// embedding application's own shutdown sequence to release handler
    /// state before the process exits.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Resolves a route's declared middleware references into a concrete
    /// chain, in declared order, failing if a name is unknown or a
    /// requirement isn't satisfied by something already earlier in the
    /// chain being built. Stops at the first problem — use
    /// [`Registry::validate`] to collect every mismatch instead.
    pub fn resolve(&self, names: &[MiddlewareRef]) -> Result<Vec<Arc<dyn Middleware>>, RegistryError> {
        let mut provided: HashSet<String> = HashSet::new();
        let mut chain = Vec::with_capacity(names.len());
        for name_ref in names {
            let MiddlewareRef::Named(name) = name_ref;
            let entry = self.entries.get(name).ok_or_else(|| RegistryError::Unknown(name.clone()))?;
            for requirement in &entry.requires {
                if !provided.contains(requirement) {
                    return Err(RegistryError::MissingRequirement(name.clone(), requirement.clone()));
                }
            }
            provided.extend(entry.provides.iter().cloned());
            chain.push(entry.middleware.clone());
        }
        Ok(chain)
    }

    /// Simulates `names` in order, accumulating each middleware's
    /// `provides` set as it goes, and collects every requirement that
    /// isn't a subset of what's been provided so far — unlike `resolve`,
    /// this does not stop at the first mismatch, so a route with several
    /// unsatisfied requirements gets every one of them reported at once.
    /// An unknown name is treated as providing and requiring nothing, and
    /// is reported through `resolve` instead, since it isn't a chain
    /// ordering problem.
    pub fn validate(&self, names: &[MiddlewareRef]) -> Vec<RegistryError> {
        let mut provided: HashSet<String> = HashSet::new();
        let mut mismatches = Vec::new();
        for name_ref in names {
            let MiddlewareRef::Named(name) = name_ref;
            if let Some(entry) = self.entries.get(name) {
                for requirement in &entry.requires {
                    if !provided.contains(requirement) {
                        mismatches.push(RegistryError::MissingRequirement(name.clone(), requirement.clone()));
                    }
                }
                provided.extend(entry.provides.iter().cloned());
            }
        }
        mismatches
    }
}
