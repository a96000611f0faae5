//! Frame-Resource State Tracking
//!
//! One [`FrameResource`] per resource the queue touches. The first state
//! update primes the resource: it records the initial state and emits no
//! barrier, because placed resources and category pools promote
//! implicitly out of the common-state baseline on first use. After that,
//! read-state widening is absorbed into the current state (the planner
//! merges it into the prior transition), and only genuine state changes
//! produce new transitions.

use crate::gpu::ResourceState;

/// Per-resource state machine of the barrier planner.
#[derive(Clone, Copy, Debug)]
pub struct FrameResource {
    initial: ResourceState,
    current: ResourceState,
    initial_transition_performed: bool,
}

impl Default for FrameResource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameResource {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            initial: ResourceState::COMMON,
            current: ResourceState::COMMON,
            initial_transition_performed: false,
        }
    }

    /// Update towards `needed`, returning the `(before, after)` pair of a
    /// required transition, or `None` when the state is already
    /// compatible (first use, unchanged state, or read-state widening).
    pub fn update_state(&mut self, needed: ResourceState) -> Option<(ResourceState, ResourceState)> {
        if !self.initial_transition_performed {
            self.initial_transition_performed = true;
            self.initial = needed;
            self.current = needed;
            return None;
        }
        if self.current == needed || self.current.contains(needed) {
            return None;
        }
        if needed.is_read_state() && self.current.is_read_state() {
            // Widening a read state merges into the prior transition
            // instead of producing a new one.
            self.current |= needed;
            return None;
        }
        let before = self.current;
        self.current = needed;
        Some((before, needed))
    }

    #[must_use]
    pub const fn initial_state(&self) -> ResourceState {
        self.initial
    }

    #[must_use]
    pub const fn current_state(&self) -> ResourceState {
        self.current
    }

    #[must_use]
    pub const fn is_in_write_state(&self) -> bool {
        self.current.is_write_state()
    }

    /// Whether the resource has been primed (seen at least one state
    /// update).
    #[must_use]
    pub const fn has_initial_state(&self) -> bool {
        self.initial_transition_performed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_update_primes_without_a_barrier() {
        let mut resource = FrameResource::new();
        assert!(resource.update_state(ResourceState::RENDER_TARGET).is_none());
        assert_eq!(resource.initial_state(), ResourceState::RENDER_TARGET);
        assert_eq!(resource.current_state(), ResourceState::RENDER_TARGET);
    }

    #[test]
    fn read_widening_produces_no_transition() {
        let mut resource = FrameResource::new();
        resource.update_state(ResourceState::COMMON);
        assert!(
            resource
                .update_state(ResourceState::PIXEL_SHADER_RESOURCE)
                .is_some()
        );
        assert!(
            resource
                .update_state(ResourceState::NON_PIXEL_SHADER_RESOURCE)
                .is_none()
        );
        assert_eq!(
            resource.current_state(),
            ResourceState::PIXEL_SHADER_RESOURCE | ResourceState::NON_PIXEL_SHADER_RESOURCE
        );
    }

    #[test]
    fn write_state_always_transitions() {
        let mut resource = FrameResource::new();
        resource.update_state(ResourceState::COMMON);
        resource.update_state(ResourceState::PIXEL_SHADER_RESOURCE);
        let barrier = resource.update_state(ResourceState::UNORDERED_ACCESS);
        assert_eq!(
            barrier,
            Some((
                ResourceState::PIXEL_SHADER_RESOURCE,
                ResourceState::UNORDERED_ACCESS
            ))
        );
        assert!(resource.is_in_write_state());
    }
}
