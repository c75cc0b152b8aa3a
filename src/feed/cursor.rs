//! Pagination cursors, auto-continue latches and per-direction load states.
//!
//! Only the engine's fetch-completion handlers mutate this state. At most one
//! load is in flight per direction; a request for a busy direction is a no-op.
//! Older and newer loads may overlap since they touch opposite ends of the
//! list, but neither starts while an initial load is running.

use super::model::{Cursor, Direction};

/// Continuation tokens and edge flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CursorState {
    /// Where the next older page starts.
    pub next_cursor: Option<Cursor>,
    /// Newest forum id known at the head of the list.
    pub prev_cursor: Option<Cursor>,
    pub has_older: bool,
    pub has_newer: bool,
}

/// Gates for the scroll-proximity triggers.
///
/// Disarmed the first time a directional load yields nothing new (or fails);
/// re-armed by a manual load or by upstream new-item detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Latches {
    pub auto_older: bool,
    pub auto_newer: bool,
}

impl Default for Latches {
    fn default() -> Self {
        Self {
            auto_older: true,
            auto_newer: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    Idle,
    LoadingInitial,
    LoadingOlder,
    LoadingNewer,
}

/// Who asked for a directional load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Scroll proximity; honors the latches.
    Auto,
    /// Explicit "load more"; re-arms the latch first.
    Manual,
}

#[derive(Debug, Clone, Default)]
pub struct CursorMachine {
    cursors: CursorState,
    latches: Latches,
    initial: bool,
    older: bool,
    newer: bool,
}

impl CursorMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cursors(&self) -> &CursorState {
        &self.cursors
    }

    pub fn latches(&self) -> Latches {
        self.latches
    }

    pub fn state(&self, direction: Direction) -> LoadState {
        match direction {
            Direction::Initial if self.initial => LoadState::LoadingInitial,
            Direction::Older if self.older => LoadState::LoadingOlder,
            Direction::Newer if self.newer => LoadState::LoadingNewer,
            _ => LoadState::Idle,
        }
    }

    pub fn is_loading(&self, direction: Direction) -> bool {
        self.state(direction) != LoadState::Idle
    }

    /// Whether a scroll-proximity trigger may fire for `direction`.
    pub fn can_auto_load(&self, direction: Direction) -> bool {
        match direction {
            Direction::Initial => false,
            Direction::Older => self.cursors.has_older && self.latches.auto_older,
            Direction::Newer => self.cursors.has_newer && self.latches.auto_newer,
        }
    }

    /// Clear cursors, re-arm both latches and enter `LoadingInitial`.
    ///
    /// Any older/newer load still in flight is orphaned; the engine drops its
    /// completion by generation.
    pub fn begin_initial(&mut self) -> bool {
        if self.initial {
            tracing::debug!("Initial load already in flight");
            return false;
        }
        *self = Self {
            initial: true,
            ..Self::default()
        };
        true
    }

    /// Enter `LoadingOlder`/`LoadingNewer` if allowed for `trigger`.
    pub fn begin(&mut self, direction: Direction, trigger: Trigger) -> bool {
        if self.initial || self.is_loading(direction) {
            tracing::debug!(?direction, "Load rejected: direction busy");
            return false;
        }
        if trigger == Trigger::Manual {
            self.rearm(direction);
        }
        if !self.can_auto_load(direction) {
            tracing::debug!(?direction, "Load rejected: edge reached or latch disarmed");
            return false;
        }
        match direction {
            Direction::Older => self.older = true,
            Direction::Newer => self.newer = true,
            Direction::Initial => return false,
        }
        true
    }

    /// Leave the loading state for `direction`.
    pub fn finish(&mut self, direction: Direction) {
        match direction {
            Direction::Initial => self.initial = false,
            Direction::Older => self.older = false,
            Direction::Newer => self.newer = false,
        }
    }

    /// Set the edge flag and latch for `direction` back on.
    pub fn rearm(&mut self, direction: Direction) {
        match direction {
            Direction::Older => {
                self.cursors.has_older = true;
                self.latches.auto_older = true;
            }
            Direction::Newer => {
                self.cursors.has_newer = true;
                self.latches.auto_newer = true;
            }
            Direction::Initial => {}
        }
    }

    /// A fetch failed: keep cursors, disarm the direction's auto-trigger.
    pub fn record_failure(&mut self, direction: Direction) {
        match direction {
            Direction::Older => self.latches.auto_older = false,
            Direction::Newer => self.latches.auto_newer = false,
            Direction::Initial => {}
        }
        self.finish(direction);
    }

    /// Completed initial page. Anchored loads start mid-feed, so newer
    /// content may exist above them.
    pub fn record_initial(
        &mut self,
        has_more: bool,
        next_cursor: Option<Cursor>,
        newest_forum_id: Option<u64>,
        anchored: bool,
    ) {
        self.cursors.has_older = has_more;
        self.cursors.next_cursor = next_cursor;
        self.cursors.prev_cursor = newest_forum_id.map(Cursor);
        self.cursors.has_newer = anchored;
        self.finish(Direction::Initial);
    }

    /// Completed older page. `fresh` counts raw items not already in the list.
    pub fn record_older(&mut self, fresh: usize, has_more: bool, next_cursor: Option<Cursor>) {
        if next_cursor.is_some() {
            self.cursors.next_cursor = next_cursor;
        }
        if fresh == 0 {
            self.cursors.has_older = false;
            self.latches.auto_older = false;
        } else {
            self.cursors.has_older = has_more;
        }
        self.finish(Direction::Older);
    }

    /// Completed newer page. Only a full page of genuinely new items implies
    /// that more may be waiting.
    pub fn record_newer(&mut self, fresh: usize, requested: usize, newest_forum_id: Option<u64>) {
        if let Some(id) = newest_forum_id {
            self.cursors.prev_cursor = Some(Cursor(id));
        }
        if fresh < requested {
            self.cursors.has_newer = false;
            self.latches.auto_newer = false;
        }
        self.finish(Direction::Newer);
    }
}
