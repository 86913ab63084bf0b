//! Presentation surfaces and the slot that binds one session to one surface.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

/// Error popups close themselves after this delay.
pub const ERROR_AUTO_DISMISS: Duration = Duration::from_secs(5);

/// Where a session's progress is shown (popup, terminal, test recorder).
///
/// Methods take `&self`; implementations use interior mutability because a
/// surface is shared between the slot and the running session.
pub trait PresentationSurface: Send + Sync {
    /// Replace the surface content with a loading indicator.
    fn show_loading(&self, model_label: &str);

    /// Replace the surface content with rendered Markdown.
    fn render(&self, markdown: &str);

    /// Replace the surface content with a standalone error.
    fn show_error(&self, message: &str, auto_dismiss: Duration);

    /// Tear the surface down. Later calls must be harmless no-ops.
    fn dismiss(&self);

    /// `false` once the user closed the surface or it was dismissed.
    fn is_open(&self) -> bool;
}

/// Proof of ownership of a [`SurfaceSlot`] for one session.
pub struct SessionToken {
    generation: u64,
    changes: watch::Receiver<u64>,
}

impl SessionToken {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Resolves once the slot moves to a newer generation.
    pub async fn superseded(&mut self) {
        loop {
            if *self.changes.borrow_and_update() != self.generation {
                return;
            }
            if self.changes.changed().await.is_err() {
                return;
            }
        }
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("generation", &self.generation)
            .finish()
    }
}

/// Holds the surface of the single active session.
///
/// Claiming the slot dismisses the previous surface and bumps the
/// generation, so a stale session's token stops being current.
pub struct SurfaceSlot {
    current: Mutex<Option<Arc<dyn PresentationSurface>>>,
    generation: watch::Sender<u64>,
}

impl Default for SurfaceSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SurfaceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SurfaceSlot")
            .field("generation", &self.current_generation())
            .field("occupied", &self.lock().is_some())
            .finish()
    }
}

impl SurfaceSlot {
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            current: Mutex::new(None),
            generation,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<dyn PresentationSurface>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn claim(&self, surface: Arc<dyn PresentationSurface>) -> SessionToken {
        let (previous, generation) = {
            let mut current = self.lock();
            let previous = current.replace(surface);
            let mut generation = 0;
            self.generation.send_modify(|value| {
                *value += 1;
                generation = *value;
            });
            (previous, generation)
        };
        if let Some(previous) = previous {
            previous.dismiss();
        }
        SessionToken {
            generation,
            changes: self.generation.subscribe(),
        }
    }

    pub fn is_current(&self, token: &SessionToken) -> bool {
        self.current_generation() == token.generation
    }

    /// Dismiss the surface and invalidate `token` if it still owns the slot.
    pub fn release(&self, token: &SessionToken) -> bool {
        self.release_generation(token.generation)
    }

    pub(crate) fn release_generation(&self, generation: u64) -> bool {
        let released = {
            let mut current = self.lock();
            let bumped = self.generation.send_if_modified(|value| {
                if *value != generation {
                    return false;
                }
                *value += 1;
                true
            });
            if !bumped {
                return false;
            }
            current.take()
        };
        if let Some(surface) = released {
            surface.dismiss();
        }
        true
    }

    pub fn current_generation(&self) -> u64 {
        *self.generation.borrow()
    }
}
