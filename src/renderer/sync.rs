//! Fences and Command Recorders
//!
//! Per-frame-slot synchronization primitives: a [`ManagedFence`] wraps a
//! timeline fence with a monotonically increasing value, and a
//! [`CommandRecorder`] owns one command allocator's worth of reusable
//! command lists, closing and submitting them in order.

use crate::errors::{QuarryError, Result};
use crate::gpu::{CommandListId, DeviceRef, FenceId, QueueKind};

/// A timeline fence plus the last value the owner signaled.
pub struct ManagedFence {
    device: DeviceRef,
    fence: FenceId,
    value: u64,
}

impl ManagedFence {
    pub fn new(device: DeviceRef, initial_value: u64) -> Result<Self> {
        let fence = device.create_fence(initial_value)?;
        Ok(Self {
            device,
            fence,
            value: initial_value,
        })
    }

    /// Signal the next value from `queue`'s timeline.
    pub fn signal(&mut self, queue: QueueKind) -> Result<()> {
        self.value += 1;
        self.device.signal(queue, self.fence, self.value)
    }

    /// Make `queue` wait for the last signaled value.
    pub fn wait_gpu(&self, queue: QueueKind) -> Result<()> {
        self.device.wait_gpu(queue, self.fence, self.value)
    }

    /// Block the host until the last signaled value completes.
    pub fn wait_cpu(&self) -> Result<()> {
        self.device.wait_cpu(self.fence, self.value)
    }

    /// Whether the last signaled value has completed.
    #[must_use]
    pub fn completed(&self) -> bool {
        self.device.completed_value(self.fence) >= self.value
    }

    #[must_use]
    pub fn last_signaled(&self) -> u64 {
        self.value
    }
}

impl Drop for ManagedFence {
    fn drop(&mut self) {
        self.device.destroy_fence(self.fence);
    }
}

/// Reusable command lists for one queue kind and one frame slot.
///
/// `active_list` is always open for recording; `finish_active_list`
/// closes it (optionally opening the next), and `execute` submits every
/// finished, not-yet-submitted list in order. `reset` reopens all lists
/// once the slot's fence proves the GPU is done with them.
pub struct CommandRecorder {
    device: DeviceRef,
    kind: QueueKind,
    lists: Vec<CommandListId>,
    /// Index of the list currently open for recording.
    current: usize,
    /// Lists `[first_unexecuted, current)` are closed and awaiting
    /// submission.
    first_unexecuted: usize,
}

impl CommandRecorder {
    pub fn new(device: DeviceRef, kind: QueueKind) -> Result<Self> {
        let first = device.create_command_list(kind)?;
        Ok(Self {
            device,
            kind,
            lists: vec![first],
            current: 0,
            first_unexecuted: 0,
        })
    }

    /// The list currently open for recording.
    #[must_use]
    pub fn active_list(&self) -> CommandListId {
        self.lists[self.current]
    }

    /// Close the active list. With `prepare_new`, the next list is
    /// opened (created on first use) so recording can continue.
    pub fn finish_active_list(&mut self, prepare_new: bool) -> Result<()> {
        self.device.close_command_list(self.lists[self.current])?;
        self.current += 1;
        if prepare_new {
            if self.current == self.lists.len() {
                let list = self.device.create_command_list(self.kind)?;
                self.lists.push(list);
            } else {
                self.device.reset_command_list(self.lists[self.current])?;
            }
        }
        Ok(())
    }

    /// Submit every closed, unsubmitted list to `queue` in order.
    pub fn execute(&mut self, queue: QueueKind) -> Result<()> {
        if self.first_unexecuted == self.current {
            return Err(QuarryError::InvalidConfiguration(
                "no finished command lists to execute".into(),
            ));
        }
        self.device
            .submit(queue, &self.lists[self.first_unexecuted..self.current])?;
        self.first_unexecuted = self.current;
        Ok(())
    }

    /// Reopen every list for a new frame. Only valid once the slot's
    /// end-of-frame fence has signaled.
    pub fn reset(&mut self) -> Result<()> {
        self.device.reset_command_list(self.lists[0])?;
        self.current = 0;
        self.first_unexecuted = 0;
        Ok(())
    }

    #[must_use]
    pub fn stored_list_count(&self) -> usize {
        self.lists.len()
    }
}
