//! Associations between physical controls and named parameters.
//!
//! A [`Binding`] couples one trigger (channel + number + kind) to up to
//! three parameter targets. The registry enforces that a trigger is owned
//! by at most one active binding; duplicate registration is rejected at
//! insert/rebind time rather than resolved by iteration order, which would
//! silently double-fire.

use std::error::Error;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::core::prelude::*;
use crate::io::midi::Event;

pub type BindingId = u32;

pub const MAX_SECONDARY_TARGETS: usize = 2;

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Cc,
    Note,
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerKind::Cc => write!(f, "CC"),
            TriggerKind::Note => write!(f, "Note"),
        }
    }
}

/// Dispatch key identifying one physical control.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct TriggerKey {
    pub kind: TriggerKind,
    pub channel: u8,
    pub number: u8,
}

impl TriggerKey {
    pub fn cc(channel: u8, controller: u8) -> Self {
        Self {
            kind: TriggerKind::Cc,
            channel,
            number: controller,
        }
    }

    pub fn note(channel: u8, note: u8) -> Self {
        Self {
            kind: TriggerKind::Note,
            channel,
            number: note,
        }
    }

    /// The key an incoming event would dispatch under. Pitch bend and
    /// channel pressure carry no controller/note number and are not
    /// bindable triggers.
    pub fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::ControlChange {
                controller,
                channel,
                ..
            } => Some(Self::cc(*channel, *controller)),
            Event::NoteOn { note, channel, .. }
            | Event::NoteOff { note, channel, .. } => {
                Some(Self::note(*channel, *note))
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Binding {
    pub id: BindingId,
    pub trigger: TriggerKey,
    pub primary_target: Option<String>,
    pub secondary_targets: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Binding {
    pub fn new(
        id: BindingId,
        trigger: TriggerKey,
        primary_target: Option<String>,
        mut secondary_targets: Vec<String>,
    ) -> Self {
        if secondary_targets.len() > MAX_SECONDARY_TARGETS {
            warn!(
                "Binding {} given {} secondary targets; keeping the first {}",
                id,
                secondary_targets.len(),
                MAX_SECONDARY_TARGETS
            );
            secondary_targets.truncate(MAX_SECONDARY_TARGETS);
        }
        Self {
            id,
            trigger,
            primary_target,
            secondary_targets,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> TriggerKind {
        self.trigger.kind
    }

    /// Primary plus secondaries, in order, skipping empties.
    pub fn targets(&self) -> Vec<&str> {
        self.primary_target
            .iter()
            .map(String::as_str)
            .chain(self.secondary_targets.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Debug)]
pub enum BindingError {
    DuplicateTrigger {
        trigger: TriggerKey,
        existing: BindingId,
    },
    UnknownBinding(BindingId),
}

impl fmt::Display for BindingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingError::DuplicateTrigger { trigger, existing } => write!(
                f,
                "{} {} on channel {} is already bound by control {}",
                trigger.kind, trigger.number, trigger.channel, existing
            ),
            BindingError::UnknownBinding(id) => {
                write!(f, "No binding with id {}", id)
            }
        }
    }
}

impl Error for BindingError {}

/// One binding matched an event: every listed target receives the same
/// normalized value, derived once from the event.
#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch {
    pub binding_id: BindingId,
    pub targets: Vec<String>,
    pub unit_value: f32,
}

/// Primary table plus an O(1) trigger index. Insertion order is preserved
/// so presets can reconstruct the UI in creation order.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    bindings: IndexMap<BindingId, Binding>,
    index: HashMap<TriggerKey, BindingId>,
    next_id: BindingId,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_id(&mut self) -> BindingId {
        self.next_id += 1;
        self.next_id
    }

    pub fn insert(
        &mut self,
        binding: Binding,
    ) -> Result<BindingId, BindingError> {
        if let Some(existing) = self.index.get(&binding.trigger) {
            return Err(BindingError::DuplicateTrigger {
                trigger: binding.trigger,
                existing: *existing,
            });
        }

        let id = binding.id;
        self.next_id = self.next_id.max(id);
        self.index.insert(binding.trigger, id);
        self.bindings.insert(id, binding);
        Ok(id)
    }

    /// Create and insert a binding with a freshly allocated id.
    pub fn add(
        &mut self,
        trigger: TriggerKey,
        primary_target: Option<String>,
        secondary_targets: Vec<String>,
    ) -> Result<BindingId, BindingError> {
        let id = self.allocate_id();
        self.insert(Binding::new(
            id,
            trigger,
            primary_target,
            secondary_targets,
        ))
    }

    pub fn get(&self, id: BindingId) -> Option<&Binding> {
        self.bindings.get(&id)
    }

    pub fn contains(&self, id: BindingId) -> bool {
        self.bindings.contains_key(&id)
    }

    pub fn lookup(&self, trigger: &TriggerKey) -> Option<&Binding> {
        self.index.get(trigger).and_then(|id| self.bindings.get(id))
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Binding ids in creation order (the preset manifest order).
    pub fn ids(&self) -> Vec<BindingId> {
        self.bindings.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.bindings.values()
    }

    /// Swap a binding's trigger, used by learn capture. Clears the old
    /// index entry first, then re-inserts with the same collision policy
    /// as `insert`.
    pub fn rebind(
        &mut self,
        id: BindingId,
        new_trigger: TriggerKey,
    ) -> Result<(), BindingError> {
        if !self.bindings.contains_key(&id) {
            return Err(BindingError::UnknownBinding(id));
        }
        if let Some(owner) = self.index.get(&new_trigger)
            && *owner != id
        {
            return Err(BindingError::DuplicateTrigger {
                trigger: new_trigger,
                existing: *owner,
            });
        }

        let binding = self.bindings.get_mut(&id).unwrap();
        self.index.remove(&binding.trigger);
        binding.trigger = new_trigger;
        self.index.insert(new_trigger, id);
        Ok(())
    }

    pub fn set_targets(
        &mut self,
        id: BindingId,
        primary_target: Option<String>,
        mut secondary_targets: Vec<String>,
    ) -> Result<(), BindingError> {
        let binding = self
            .bindings
            .get_mut(&id)
            .ok_or(BindingError::UnknownBinding(id))?;
        secondary_targets.truncate(MAX_SECONDARY_TARGETS);
        binding.primary_target = primary_target;
        binding.secondary_targets = secondary_targets;
        Ok(())
    }

    /// Removes the binding from both the primary table and the trigger
    /// index. Callers (the hub) are responsible for purging any pending
    /// scheduler entries and learn listeners keyed by this id.
    pub fn remove(&mut self, id: BindingId) -> Option<Binding> {
        let binding = self.bindings.shift_remove(&id)?;
        self.index.remove(&binding.trigger);
        Some(binding)
    }

    /// Resolve an incoming event to a fan-out, if any binding owns its
    /// trigger. Note triggers fire on the rising edge only; releases and
    /// zero-velocity note-ons are observed but never re-fire the bound
    /// action, so a toggle target can't flip twice per key press.
    pub fn resolve(&self, event: &Event) -> Option<Dispatch> {
        let key = TriggerKey::from_event(event)?;
        let binding = self.lookup(&key)?;

        if key.kind == TriggerKind::Note && !event.is_note_on() {
            return None;
        }

        let targets = binding
            .targets()
            .iter()
            .map(|t| t.to_string())
            .collect::<Vec<_>>();
        if targets.is_empty() {
            return None;
        }

        Some(Dispatch {
            binding_id: binding.id,
            targets,
            unit_value: event.unit_value().unwrap_or(0.0),
        })
    }
}
