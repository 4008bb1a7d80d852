//! Picks the post that should be playing from the geometry of the rendered
//! cards, and applies that choice to a player.

use std::time::{Duration, Instant};

/// Vertical extent of a rendered card, in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub top: f64,
    pub bottom: f64,
}

impl Bounds {
    pub fn new(top: f64, height: f64) -> Self {
        Self {
            top,
            bottom: top + height,
        }
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }
}

pub fn visible_fraction(bounds: Bounds, viewport_height: f64) -> f64 {
    let height = bounds.height();
    if height <= 0.0 {
        return 0.0;
    }
    let visible = (bounds.bottom.min(viewport_height) - bounds.top.max(0.0)).max(0.0);
    visible / height
}

/// Index of the card with the strictly greatest visible fraction. The first
/// card wins ties; `None` when nothing is on screen.
pub fn select_most_visible(bounds: &[Bounds], viewport_height: f64) -> Option<usize> {
    let mut best = None;
    let mut best_ratio = 0.0;
    for (index, rect) in bounds.iter().enumerate() {
        let ratio = visible_fraction(*rect, viewport_height);
        if ratio > best_ratio {
            best_ratio = ratio;
            best = Some(index);
        }
    }
    best
}

pub trait Playback {
    fn play(&mut self, index: usize);
    fn pause(&mut self, index: usize);
}

pub fn apply_selection<P: Playback + ?Sized>(selected: Option<usize>, count: usize, playback: &mut P) {
    for index in 0..count {
        if Some(index) == selected {
            playback.play(index);
        } else {
            playback.pause(index);
        }
    }
}

/// Debounce for recomputing the selection after scrolling.
#[derive(Debug, Clone)]
pub struct Cooldown {
    window: Duration,
    deadline: Option<Instant>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
        }
    }

    /// Restarts the window; repeated triggers keep pushing the deadline out.
    pub fn trigger(&mut self, now: Instant) {
        self.schedule(now, self.window);
    }

    pub fn schedule(&mut self, now: Instant, delay: Duration) {
        let at = now + delay;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing > at => existing,
            _ => at,
        });
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// True once per armed window, when the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}
