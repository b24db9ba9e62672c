use std::collections::BTreeMap;

/// Sources with this prefix are rasterized locally and never wait on a load.
pub const BUILTIN_ICON_PREFIX: &str = "builtin:";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IconState {
    Pending,
    Loaded,
    Failed,
}

/// Load-state of billboard images, keyed by source.
///
/// Loading itself happens elsewhere; the owner reports completion through
/// [`IconCache::complete`] / [`IconCache::fail`] and collects the sources that
/// became usable with [`IconCache::take_completed`].
#[derive(Debug, Default)]
pub struct IconCache {
    states: BTreeMap<String, IconState>,
    completed: Vec<String>,
}

impl IconCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state, registering `src` as pending on first sight.
    pub fn request(&mut self, src: &str) -> IconState {
        if src.starts_with(BUILTIN_ICON_PREFIX) {
            return IconState::Loaded;
        }
        *self
            .states
            .entry(src.to_string())
            .or_insert(IconState::Pending)
    }

    pub fn state(&self, src: &str) -> Option<IconState> {
        if src.starts_with(BUILTIN_ICON_PREFIX) {
            return Some(IconState::Loaded);
        }
        self.states.get(src).copied()
    }

    /// Marks `src` loaded. Returns `false` if it was not pending.
    pub fn complete(&mut self, src: &str) -> bool {
        match self.states.get_mut(src) {
            Some(state @ IconState::Pending) => {
                *state = IconState::Loaded;
                self.completed.push(src.to_string());
                true
            }
            _ => false,
        }
    }

    pub fn fail(&mut self, src: &str) -> bool {
        match self.states.get_mut(src) {
            Some(state @ IconState::Pending) => {
                *state = IconState::Failed;
                true
            }
            _ => false,
        }
    }

    pub fn take_completed(&mut self) -> Vec<String> {
        std::mem::take(&mut self.completed)
    }
}
