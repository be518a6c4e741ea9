//! Source-line breakpoints.
//!
//! A breakpoint is keyed by `className:line`. It exists in two layers:
//! engine bookkeeping (always present once added) and a live event request
//! on the target (present only while the class is loaded and the breakpoint
//! is both enabled and resolved).

use crate::jdwp::types::RequestId;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct Breakpoint {
    pub source_path: String,
    pub class_name: String,
    pub line: u32,
    /// User intent: disabled breakpoints keep their bookkeeping but hold no
    /// live request.
    pub enabled: bool,
    /// True while a live event request exists on the target.
    pub active: bool,
    #[serde(skip)]
    pub(super) request: Option<RequestId>,
}

impl Breakpoint {
    pub fn new(source_path: &str, line: u32) -> Self {
        Self {
            source_path: source_path.to_string(),
            class_name: class_name_of(source_path),
            line,
            enabled: true,
            active: false,
            request: None,
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.class_name, self.line)
    }
}

/// Binary class name of a source path: extension stripped, separators
/// replaced with dots. `com/app/Main.java` -> `com.app.Main`.
pub fn class_name_of(source_path: &str) -> String {
    source_path
        .strip_suffix(".java")
        .unwrap_or(source_path)
        .replace(['/', '\\'], ".")
}

/// Engine-side breakpoint bookkeeping, keyed by `className:line`.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    map: HashMap<String, Breakpoint>,
}

impl BreakpointRegistry {
    /// Register a breakpoint, replacing any previous one with the same key.
    pub fn insert(&mut self, bp: Breakpoint) -> &mut Breakpoint {
        let key = bp.key();
        self.map.insert(key.clone(), bp);
        self.map.get_mut(&key).expect("just inserted")
    }

    pub fn remove(&mut self, key: &str) -> Option<Breakpoint> {
        self.map.remove(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Breakpoint> {
        self.map.get_mut(key)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Breakpoint> {
        self.map.values_mut()
    }

    /// Enabled breakpoints of one class, for class-prepare resolution.
    pub fn pending_for_class(&mut self, class_name: &str) -> Vec<String> {
        self.map
            .values()
            .filter(|bp| bp.class_name == class_name && bp.enabled && bp.request.is_none())
            .map(|bp| bp.key())
            .collect()
    }

    pub fn snapshot(&self) -> Vec<Breakpoint> {
        let mut all: Vec<Breakpoint> = self.map.values().cloned().collect();
        all.sort_by(|a, b| a.key().cmp(&b.key()));
        all
    }

    pub fn keys(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }
}
