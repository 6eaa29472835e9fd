//! Run-exactly-once initialization gate with reentrancy detection.
//!
//! Schema compilation is deferred until first real use, and that first use
//! can come from any thread. [`LoadGate`] funnels every caller through a
//! single `init` run with three terminal outcomes: loaded, permanently
//! failed, or detected-circular-use. A failed load is never retried; every
//! later caller gets the original diagnosis back.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::error::{SchemaError, SchemaResult};

/// Lifecycle phase of a [`LoadGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    /// `init` has not run yet.
    Unloaded,
    /// `init` is running right now.
    Loading,
    /// `init` completed; terminal.
    Loaded,
    /// `init` failed; terminal, never retried.
    Erred,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadPhase::Unloaded => "unloaded",
            LoadPhase::Loading => "loading",
            LoadPhase::Loaded => "loaded",
            LoadPhase::Erred => "erred",
        };
        f.write_str(s)
    }
}

const UNLOADED: u8 = 0;
const LOADING: u8 = 1;
const LOADED: u8 = 2;
const ERRED: u8 = 3;

/// One-time initialization target driven by a [`LoadGate`].
pub trait GatedInit {
    /// Populates whatever the gate protects. Runs at most once per gate.
    fn init(&self) -> SchemaResult<()>;

    /// Runs exactly once, after a successful transition to
    /// [`LoadPhase::Loaded`]. Intended for cross-cutting finalization that
    /// must observe fully-populated state.
    fn post_init(&self) {}
}

/// Reentrancy-safe run-exactly-once gate.
///
/// First caller runs `init` under mutual exclusion; concurrent callers on
/// other threads block until it finishes; a caller on the *loading thread
/// itself* (i.e. `init` indirectly triggered the gate again) fails with
/// [`SchemaError::CircularUse`] instead of deadlocking.
pub struct LoadGate {
    /// What a caller is probably doing when it trips the gate; quoted in
    /// the circular-use diagnosis.
    trigger: String,
    phase: AtomicU8,
    loader: Mutex<Option<ThreadId>>,
    /// Held for the whole load; stores the cause after a failed one.
    inner: Mutex<Option<SchemaError>>,
}

impl LoadGate {
    /// Creates an unloaded gate. `likely_trigger` describes the operation
    /// that usually trips it, e.g. `"building a component container"`.
    pub fn new(likely_trigger: impl Into<String>) -> Self {
        Self {
            trigger: likely_trigger.into(),
            phase: AtomicU8::new(UNLOADED),
            loader: Mutex::new(None),
            inner: Mutex::new(None),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> LoadPhase {
        match self.phase.load(Ordering::Acquire) {
            UNLOADED => LoadPhase::Unloaded,
            LOADING => LoadPhase::Loading,
            LOADED => LoadPhase::Loaded,
            _ => LoadPhase::Erred,
        }
    }

    fn set_phase(&self, phase: u8) {
        self.phase.store(phase, Ordering::Release);
    }

    /// Ensures `target.init()` has run to completion.
    ///
    /// - [`Loaded`](LoadPhase::Loaded): returns immediately.
    /// - [`Erred`](LoadPhase::Erred): fails immediately with the stored
    ///   cause; the load is never reattempted.
    /// - [`Loading`](LoadPhase::Loading) on the loading thread's own call
    ///   path: fails with [`SchemaError::CircularUse`].
    /// - [`Loading`](LoadPhase::Loading) from another thread: blocks until
    ///   the load finishes, then reports its outcome.
    /// - [`Unloaded`](LoadPhase::Unloaded): runs `init`, then `post_init`
    ///   on success.
    pub fn ensure_initialized(&self, target: &dyn GatedInit) -> SchemaResult<()> {
        match self.phase() {
            LoadPhase::Loaded => return Ok(()),
            LoadPhase::Erred => return Err(self.stored_error()),
            LoadPhase::Loading => {
                if *self.loader.lock() == Some(thread::current().id()) {
                    return Err(SchemaError::CircularUse {
                        trigger: self.trigger.clone(),
                    });
                }
                // Another thread is mid-load; fall through and wait on the
                // lock like any other first-use contender.
            }
            LoadPhase::Unloaded => {}
        }

        let mut inner = self.inner.lock();
        match self.phase() {
            LoadPhase::Loaded => return Ok(()),
            LoadPhase::Erred => {
                return Err(inner.clone().unwrap_or(SchemaError::CircularUse {
                    trigger: self.trigger.clone(),
                }));
            }
            LoadPhase::Loading => {
                // The loading thread holds `inner` for its whole run, so
                // observing Loading here means the gate re-entered itself.
                return Err(SchemaError::CircularUse {
                    trigger: self.trigger.clone(),
                });
            }
            LoadPhase::Unloaded => {}
        }

        self.set_phase(LOADING);
        *self.loader.lock() = Some(thread::current().id());
        let result = target.init();
        *self.loader.lock() = None;

        match result {
            Ok(()) => {
                self.set_phase(LOADED);
                target.post_init();
                Ok(())
            }
            Err(cause) => {
                log::error!("one-time load failed while {}: {cause}", self.trigger);
                *inner = Some(cause.clone());
                self.set_phase(ERRED);
                Err(cause)
            }
        }
    }

    /// Asserts the caller runs inside the loading window, i.e. from within
    /// `init`. Converts misuse-at-the-wrong-time into an explicit error.
    pub fn check_loading(&self, caller: &str) -> SchemaResult<()> {
        let phase = self.phase();
        if phase == LoadPhase::Loading {
            Ok(())
        } else {
            Err(SchemaError::InvalidLifecyclePhase {
                caller: caller.to_string(),
                phase,
            })
        }
    }

    fn stored_error(&self) -> SchemaError {
        self.inner.lock().clone().unwrap_or(SchemaError::CircularUse {
            trigger: self.trigger.clone(),
        })
    }
}

impl fmt::Debug for LoadGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadGate")
            .field("phase", &self.phase())
            .field("trigger", &self.trigger)
            .finish()
    }
}
