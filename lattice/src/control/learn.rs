//! "Learn" capture: rewrite a binding's trigger from the next matching
//! live event.
//!
//! Sessions are slots keyed by binding id, never closures holding binding
//! references, so removing a binding while it is armed simply drops the
//! slot. Every listening session independently evaluates every event of
//! its kind (broadcast, not a queue); the first to successfully rebind a
//! given trigger wins, and later captures of the same trigger are rejected
//! by the registry's duplicate policy and keep listening.

use std::time::{Duration, Instant};

use crate::control::bindings::{
    BindingError, BindingId, BindingRegistry, TriggerKey, TriggerKind,
};
use crate::core::prelude::*;
use crate::io::midi::Event;

/// How long the "Captured" state stays visible before reverting to Idle.
/// Purely presentational; correctness does not depend on the timer firing.
pub const CAPTURED_DISPLAY_WINDOW: Duration = Duration::from_millis(1500);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum LearnState {
    #[default]
    Idle,
    Listening,
    Captured,
}

#[derive(Debug)]
struct SessionSlot {
    kind: TriggerKind,
    state: LearnState,
    captured_at: Option<Instant>,
}

#[derive(Debug, PartialEq)]
pub struct Capture {
    pub binding_id: BindingId,
    pub trigger: TriggerKey,
}

/// All live learn sessions. One slot per binding, at most.
#[derive(Debug, Default)]
pub struct LearnSessions {
    slots: HashMap<BindingId, SessionSlot>,
}

impl LearnSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, id: BindingId) -> LearnState {
        self.slots.get(&id).map_or(LearnState::Idle, |s| s.state)
    }

    pub fn any_listening(&self) -> bool {
        self.slots
            .values()
            .any(|s| s.state == LearnState::Listening)
    }

    /// Arm a session for the given binding. The slot listens for events of
    /// the binding's current trigger kind.
    pub fn start(
        &mut self,
        registry: &BindingRegistry,
        id: BindingId,
    ) -> Result<(), BindingError> {
        let binding =
            registry.get(id).ok_or(BindingError::UnknownBinding(id))?;
        self.slots.insert(
            id,
            SessionSlot {
                kind: binding.kind(),
                state: LearnState::Listening,
                captured_at: None,
            },
        );
        debug!("Learn armed for binding {} ({})", id, binding.kind());
        Ok(())
    }

    /// Valid only from Listening; anything else is a no-op.
    pub fn cancel(&mut self, id: BindingId) {
        if self.state(id) == LearnState::Listening {
            self.slots.remove(&id);
            debug!("Learn cancelled for binding {}", id);
        }
    }

    /// Must be called when a binding is destroyed so no armed slot
    /// outlives it.
    pub fn on_binding_removed(&mut self, id: BindingId) {
        self.slots.remove(&id);
    }

    /// Drop every slot, e.g. when the whole binding table is replaced by a
    /// preset import.
    pub fn clear(&mut self) {
        self.slots.clear();
    }

    /// Broadcast one decoded event to every listening slot of the matching
    /// kind. Successful captures rewrite the binding's trigger via
    /// `rebind` and transition the slot to Captured (one-shot). A capture
    /// rejected as a duplicate leaves its slot listening.
    pub fn observe(
        &mut self,
        registry: &mut BindingRegistry,
        event: &Event,
    ) -> Vec<Capture> {
        let Some(key) = TriggerKey::from_event(event) else {
            return vec![];
        };

        let mut listening: Vec<BindingId> = self
            .slots
            .iter()
            .filter(|(_, slot)| {
                slot.state == LearnState::Listening && slot.kind == key.kind
            })
            .map(|(id, _)| *id)
            .collect();
        // Stable evaluation order so "first wins" is deterministic
        listening.sort_unstable();

        let mut captures = vec![];
        for id in listening {
            // The binding may have been removed since the slot was armed
            if !registry.contains(id) {
                self.slots.remove(&id);
                continue;
            }

            match registry.rebind(id, key) {
                Ok(()) => {
                    let slot = self.slots.get_mut(&id).unwrap();
                    slot.state = LearnState::Captured;
                    slot.captured_at = Some(Instant::now());
                    info!(
                        "Binding {} captured {} {} on channel {}",
                        id, key.kind, key.number, key.channel
                    );
                    captures.push(Capture {
                        binding_id: id,
                        trigger: key,
                    });
                }
                Err(e) => {
                    warn!("Learn capture for binding {} rejected: {}", id, e);
                }
            }
        }

        captures
    }

    /// Revert Captured slots whose display window has elapsed. Returns the
    /// ids that went back to Idle so a UI can refresh.
    pub fn tick(&mut self, now: Instant) -> Vec<BindingId> {
        let expired: Vec<BindingId> = self
            .slots
            .iter()
            .filter(|(_, slot)| {
                slot.state == LearnState::Captured
                    && slot.captured_at.is_some_and(|at| {
                        now.duration_since(at) >= CAPTURED_DISPLAY_WINDOW
                    })
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.slots.remove(id);
        }
        expired
    }
}
