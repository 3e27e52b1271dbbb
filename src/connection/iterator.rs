//! Resumable walks over the entity registry.
//!
//! A connection runs two of these: one for `ListEntitiesRequest` (info
//! messages, then `ListEntitiesDoneResponse`) and one for
//! `SubscribeStatesRequest` (current state of every entity that has one).
//! Each `advance` visits at most one entity so the caller can bound the
//! work done per loop.

use crate::entity::{EntityKind, EntityRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IterState {
    Idle,
    Running(usize),
    Done,
}

/// Outcome of one `advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterStep {
    /// Emit for this entity.
    Entity { key: u32, kind: EntityKind },
    /// Visited an entity the walk filters out.
    Skip,
    /// Walk just finished.
    End,
}

/// Which entities a walk emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterFilter {
    /// Every non-internal entity.
    Info,
    /// Non-internal entities whose kind has a state message.
    State,
}

#[derive(Debug)]
pub struct EntityIterator {
    state: IterState,
    filter: IterFilter,
}

impl EntityIterator {
    pub const fn new(filter: IterFilter) -> Self {
        Self {
            state: IterState::Idle,
            filter,
        }
    }

    /// Restart from the first entity.
    pub fn begin(&mut self) {
        self.state = IterState::Running(0);
    }

    /// `true` unless a walk is in progress.
    pub fn completed(&self) -> bool {
        !matches!(self.state, IterState::Running(_))
    }

    /// `true` once a walk has run to the end.
    pub fn finished(&self) -> bool {
        self.state == IterState::Done
    }

    pub fn advance(&mut self, registry: &EntityRegistry) -> IterStep {
        let IterState::Running(index) = self.state else {
            return IterStep::End;
        };
        let Some(entity) = registry.at(index) else {
            self.state = IterState::Done;
            return IterStep::End;
        };
        self.state = IterState::Running(index + 1);

        let kind = entity.kind();
        let wanted = !entity.info.internal
            && match self.filter {
                IterFilter::Info => true,
                IterFilter::State => kind.has_state_message(),
            };
        if wanted {
            IterStep::Entity {
                key: entity.key(),
                kind,
            }
        } else {
            IterStep::Skip
        }
    }
}
