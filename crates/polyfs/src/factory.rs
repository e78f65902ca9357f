// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::sync::Arc;

use futures::future::BoxFuture;
use regex::Regex;

use crate::fs::SharedFs;
use crate::{Error, Result};

/// Ordering of factory registrations. Raw-prefix matchers (`^file://`) sit
/// low; composite matchers (`\.zip$`) sit high so they win and can ask the
/// factory for the filesystem underneath them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Low,
    Medium,
    High,
}

pub type ConstructorFuture = BoxFuture<'static, Result<SharedFs>>;

/// Builds a filesystem for a path that matched its registration. The
/// factory itself is passed back in so composite backends can resolve the
/// filesystem they sit on.
pub type Constructor = Arc<dyn Fn(Factory, String) -> ConstructorFuture + Send + Sync>;

struct Registration {
    level: Level,
    pattern: Regex,
    construct: Constructor,
}

#[derive(Default)]
pub struct FactoryBuilder {
    registrations: Vec<Registration>,
}

impl FactoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(mut self, pattern: &str, level: Level, construct: F) -> Result<Self>
    where
        F: Fn(Factory, String) -> ConstructorFuture + Send + Sync + 'static,
    {
        let pattern = Regex::new(pattern)
            .map_err(|err| Error::new(format!("cannot compile pattern '{pattern}': {err}")))?;
        self.registrations.push(Registration {
            level,
            pattern,
            construct: Arc::new(construct),
        });
        Ok(self)
    }

    pub fn build(mut self) -> Factory {
        // stable: registration order breaks ties within a level
        self.registrations
            .sort_by(|a, b| b.level.cmp(&a.level));
        Factory {
            registrations: Arc::new(self.registrations),
        }
    }
}

/// Resolves path prefixes and URIs to filesystem backends.
///
/// The registration set is fixed at build time; treat the factory as
/// injected configuration, not mutable global state.
#[derive(Clone)]
pub struct Factory {
    registrations: Arc<Vec<Registration>>,
}

impl Factory {
    /// Return a filesystem for `path` from the first registration whose
    /// pattern matches, scanning levels in descending order.
    pub async fn get(&self, path: &str) -> Result<SharedFs> {
        for registration in self.registrations.iter() {
            if registration.pattern.is_match(path) {
                return (registration.construct)(self.clone(), path.to_owned())
                    .await
                    .map_err(|err| {
                        Error::new(format!("cannot create filesystem for '{path}': {err}"))
                    });
            }
        }
        Err(Error::new(format!("path '{path}' not supported")))
    }
}

#[cfg(test)]
#[path = "./factory_test.rs"]
mod factory_test;
