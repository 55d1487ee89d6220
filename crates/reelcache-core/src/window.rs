//! Visible window tracking and the registry of attached playback resources.
//!
//! The feed binds a native player to each item it renders. Those handles are
//! registered here by feed index so they can be unloaded once the item
//! scrolls far enough away, which bounds memory independently of how much
//! video sits in the on-disk cache.

use std::collections::HashMap;
use std::ops::Range;

use tracing::debug;

/// A native playback resource bound to one feed item.
pub trait PlaybackHandle: Send {
    /// Release decoder buffers and any other native resources.
    fn unload(&mut self);
}

/// The currently visible feed item and the lookahead around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisibleWindow {
    current_index: usize,
    lookahead: usize,
}

impl VisibleWindow {
    /// Create a window positioned at the first item.
    #[must_use]
    pub const fn new(lookahead: usize) -> Self {
        Self {
            current_index: 0,
            lookahead,
        }
    }

    /// Index of the visible item.
    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.current_index
    }

    /// Number of items warmed ahead of the visible one.
    #[must_use]
    pub const fn lookahead(&self) -> usize {
        self.lookahead
    }

    /// Move the window to `index`.
    pub const fn set_current(&mut self, index: usize) {
        self.current_index = index;
    }

    /// Whether resources for `index` should be kept.
    ///
    /// Anything more than `lookahead + 1` items away is released.
    #[must_use]
    pub const fn keeps(&self, index: usize) -> bool {
        index.abs_diff(self.current_index) <= self.lookahead.saturating_add(1)
    }

    /// Indices to preload in a feed of `len` items.
    #[must_use]
    pub fn lookahead_range(&self, len: usize) -> Range<usize> {
        let start = self.current_index.saturating_add(1).min(len);
        let end = start.saturating_add(self.lookahead).min(len);
        start..end
    }
}

/// Playback handles keyed by feed index.
#[derive(Default)]
pub struct ResourceRegistry {
    handles: HashMap<usize, Box<dyn PlaybackHandle>>,
}

impl ResourceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` for `index`. A handle already bound to that index is unloaded.
    pub fn attach(&mut self, index: usize, handle: Box<dyn PlaybackHandle>) {
        if let Some(mut previous) = self.handles.insert(index, handle) {
            previous.unload();
        }
    }

    /// Unload and forget the handle at `index`. Returns false if none was attached.
    pub fn release(&mut self, index: usize) -> bool {
        match self.handles.remove(&index) {
            Some(mut handle) => {
                handle.unload();
                debug!("Released playback resource for item {}", index);
                true
            }
            None => false,
        }
    }

    /// Release every handle the window no longer keeps. Returns the released indices.
    pub fn release_outside(&mut self, window: &VisibleWindow) -> Vec<usize> {
        let mut stale: Vec<usize> = self
            .handles
            .keys()
            .copied()
            .filter(|&index| !window.keeps(index))
            .collect();
        stale.sort_unstable();

        for &index in &stale {
            self.release(index);
        }
        stale
    }

    /// Indices with an attached handle, ascending.
    #[must_use]
    pub fn attached_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.handles.keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    /// Number of attached handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Whether no handle is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("attached", &self.attached_indices())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandle(Arc<AtomicUsize>);

    impl PlaybackHandle for CountingHandle {
        fn unload(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_window_keeps_neighbours() {
        let mut window = VisibleWindow::new(2);
        window.set_current(10);

        assert!(window.keeps(10));
        assert!(window.keeps(13));
        assert!(window.keeps(7));
        assert!(!window.keeps(14));
        assert!(!window.keeps(6));
    }

    #[test]
    fn test_lookahead_range_is_clamped() {
        let mut window = VisibleWindow::new(3);
        assert_eq!(window.lookahead_range(10), 1..4);

        window.set_current(8);
        assert_eq!(window.lookahead_range(10), 9..10);

        window.set_current(9);
        assert!(window.lookahead_range(10).is_empty());
    }

    #[test]
    fn test_unbounded_lookahead_keeps_everything() {
        let mut window = VisibleWindow::new(usize::MAX);
        window.set_current(5);

        assert!(window.keeps(0));
        assert!(window.keeps(usize::MAX));
        assert_eq!(window.lookahead_range(10), 6..10);
    }

    #[test]
    fn test_release_unloads_handle() {
        let unloads = Arc::new(AtomicUsize::new(0));
        let mut registry = ResourceRegistry::new();

        registry.attach(3, Box::new(CountingHandle(unloads.clone())));
        assert_eq!(registry.len(), 1);

        assert!(registry.release(3));
        assert!(!registry.release(3));
        assert_eq!(unloads.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reattach_unloads_previous() {
        let unloads = Arc::new(AtomicUsize::new(0));
        let mut registry = ResourceRegistry::new();

        registry.attach(0, Box::new(CountingHandle(unloads.clone())));
        registry.attach(0, Box::new(CountingHandle(unloads.clone())));

        assert_eq!(unloads.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_release_outside_window() {
        let unloads = Arc::new(AtomicUsize::new(0));
        let mut registry = ResourceRegistry::new();
        for index in 0..8 {
            registry.attach(index, Box::new(CountingHandle(unloads.clone())));
        }

        let mut window = VisibleWindow::new(1);
        window.set_current(5);
        let released = registry.release_outside(&window);

        assert_eq!(released, vec![0, 1, 2]);
        assert_eq!(registry.attached_indices(), vec![3, 4, 5, 6, 7]);
        assert_eq!(unloads.load(Ordering::SeqCst), 3);
    }
}
