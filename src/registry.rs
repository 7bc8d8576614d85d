//! Window registry
//!
//! Explicit id-to-handle mapping owned by the launcher, replacing the
//! historical global mutable "current main window" reference. Parent links
//! support multi-window sessions: closing a parent closes its children.

use crate::runtime::{HostWindow, WindowId};
use std::collections::HashMap;

/// A managed window and its place in the parenting tree
pub struct RegisteredWindow {
    pub handle: Box<dyn HostWindow>,
    pub parent: Option<WindowId>,
}

/// Window registry owned by the launcher context
pub struct WindowRegistry {
    windows: HashMap<WindowId, RegisteredWindow>,
    next_id: WindowId,
    /// The first registered window, used where a single distinguished
    /// window is needed (dock interactions, capture targets)
    main: Option<WindowId>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self {
            windows: HashMap::new(),
            next_id: 1,
            main: None,
        }
    }

    /// Register a window, optionally as a child of an existing one
    pub fn insert(&mut self, handle: Box<dyn HostWindow>, parent: Option<WindowId>) -> WindowId {
        let id = self.next_id;
        self.next_id += 1;
        self.windows.insert(id, RegisteredWindow { handle, parent });
        if self.main.is_none() {
            self.main = Some(id);
        }
        id
    }

    /// Remove a window, returning its handle and the ids of any children
    /// that were parented to it (the caller decides their fate)
    pub fn remove(&mut self, id: WindowId) -> Option<(Box<dyn HostWindow>, Vec<WindowId>)> {
        let removed = self.windows.remove(&id)?;
        if self.main == Some(id) {
            self.main = self.windows.keys().min().copied();
        }
        let children = self
            .windows
            .iter()
            .filter(|(_, win)| win.parent == Some(id))
            .map(|(child_id, _)| *child_id)
            .collect();
        Some((removed.handle, children))
    }

    pub fn get_mut(&mut self, id: WindowId) -> Option<&mut Box<dyn HostWindow>> {
        self.windows.get_mut(&id).map(|win| &mut win.handle)
    }

    pub fn main_window(&self) -> Option<WindowId> {
        self.main
    }

    pub fn contains(&self, id: WindowId) -> bool {
        self.windows.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }
}

impl Default for WindowRegistry {
    fn default() -> Self {
        Self::new()
    }
}
