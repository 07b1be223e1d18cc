/// SwapChain - ring of 2-3 frame buffers and their ownership states
///
/// Each slot cycles Free -> Rendering -> Queued -> Visible -> Free, and each
/// transition has one legal trigger:
///
/// | transition          | trigger                                   |
/// |---------------------|-------------------------------------------|
/// | Free -> Rendering   | `acquire`                                 |
/// | Rendering -> Queued | `present`                                 |
/// | Rendering -> Free   | `discard` (frame dropped before queueing) |
/// | Queued -> Free      | `unqueue` (device refused the flip)       |
/// | Queued -> Visible   | `release`, after a confirmed flip         |
/// | Visible -> Free     | `release`, same call                      |
///
/// Exactly one slot is Visible at all times. Chains are never resized: a
/// geometry change tears the chain down and builds a new one with a new
/// generation, so stale slot tokens are rejected.

use std::collections::VecDeque;
use rustc_hash::FxHashMap;
use crate::display_device::{BufferHandle, DisplayDevice, DisplayLimits, DisplayMode, FrameBuffer};
use crate::error::{Error, Result};

/// Smallest and largest supported chain depth
pub const MIN_CHAIN_DEPTH: usize = 2;
pub const MAX_CHAIN_DEPTH: usize = 3;

/// Ownership state of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// In the free pool
    Free,
    /// Owned by the renderer
    Rendering,
    /// Submitted, waiting for its flip
    Queued,
    /// On screen
    Visible,
}

/// Slot token handed to the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    pub fn index(&self) -> usize {
        self.index as usize
    }

    /// Chain generation this token belongs to
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// A frame buffer, its hardware handle and its state
#[derive(Debug)]
pub struct SwapChainSlot {
    buffer: FrameBuffer,
    handle: BufferHandle,
    state: SlotState,
}

impl SwapChainSlot {
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn state(&self) -> SlotState {
        self.state
    }
}

/// Swap chain
#[derive(Debug)]
pub struct SwapChain {
    slots: Vec<SwapChainSlot>,
    queued: VecDeque<usize>,
    visible: usize,
    generation: u32,
    mode: DisplayMode,
    by_handle: FxHashMap<BufferHandle, usize>,
}

impl SwapChain {
    /// Allocate and register `depth` buffers for `mode`
    ///
    /// Slot 0 starts Visible (cleared to black), the rest Free.
    ///
    /// # Errors
    ///
    /// `BufferAllocationFailed` if memory or hardware registration fails;
    /// buffers registered before the failure are unregistered again.
    pub fn build(
        device: &mut dyn DisplayDevice,
        mode: &DisplayMode,
        limits: &DisplayLimits,
        depth: usize,
        generation: u32,
    ) -> Result<Self> {
        let depth = depth.clamp(MIN_CHAIN_DEPTH, MAX_CHAIN_DEPTH);
        let stride = limits.stride_for(mode.width, mode.format);

        let mut slots: Vec<SwapChainSlot> = Vec::with_capacity(depth);
        for i in 0..depth {
            let registered = FrameBuffer::allocate(mode.width, mode.height, stride, mode.format)
                .and_then(|buffer| {
                    let handle = device.register_buffer(&buffer)?;
                    Ok((buffer, handle))
                });

            match registered {
                Ok((buffer, handle)) => {
                    let state = if i == 0 { SlotState::Visible } else { SlotState::Free };
                    slots.push(SwapChainSlot { buffer, handle, state });
                }
                Err(e) => {
                    for slot in &slots {
                        device.unregister_buffer(slot.handle);
                    }
                    let reason = match e {
                        Error::BufferAllocationFailed(msg) => msg,
                        other => other.to_string(),
                    };
                    return Err(Error::BufferAllocationFailed(format!(
                        "slot {} of {} at {}: {}", i, depth, mode, reason
                    )));
                }
            }
        }

        let by_handle = slots.iter().enumerate().map(|(i, s)| (s.handle, i)).collect();

        Ok(Self {
            slots,
            queued: VecDeque::with_capacity(depth),
            visible: 0,
            generation,
            mode: *mode,
            by_handle,
        })
    }

    /// Unregister every buffer and free the memory
    ///
    /// The caller must have drained any outstanding flip first.
    pub fn teardown(self, device: &mut dyn DisplayDevice) {
        for slot in &self.slots {
            device.unregister_buffer(slot.handle);
        }
    }

    fn index_of(&self, slot: SlotId) -> Result<usize> {
        if slot.generation != self.generation {
            return Err(Error::InvalidSlot(format!(
                "slot {} belongs to chain generation {}, current is {}",
                slot.index, slot.generation, self.generation
            )));
        }
        let index = slot.index();
        if index >= self.slots.len() {
            return Err(Error::InvalidSlot(format!("slot index {} out of range", index)));
        }
        Ok(index)
    }

    fn id(&self, index: usize) -> SlotId {
        SlotId { index: index as u32, generation: self.generation }
    }

    fn expect_state(&self, index: usize, expected: SlotState, op: &str) -> Result<()> {
        let actual = self.slots[index].state;
        if actual != expected {
            return Err(Error::InvalidSlot(format!(
                "{}: slot {} is {:?}, expected {:?}", op, index, actual, expected
            )));
        }
        Ok(())
    }

    /// Hand a Free slot to the renderer
    pub fn acquire(&mut self) -> Result<SlotId> {
        let index = self.slots.iter()
            .position(|s| s.state == SlotState::Free)
            .ok_or(Error::ChainExhausted)?;
        self.slots[index].state = SlotState::Rendering;
        Ok(self.id(index))
    }

    /// Rendering -> Queued
    pub fn present(&mut self, slot: SlotId) -> Result<()> {
        let index = self.index_of(slot)?;
        self.expect_state(index, SlotState::Rendering, "present")?;
        self.slots[index].state = SlotState::Queued;
        self.queued.push_back(index);
        Ok(())
    }

    /// Rendering -> Free, for a frame that will never be queued
    pub fn discard(&mut self, slot: SlotId) -> Result<()> {
        let index = self.index_of(slot)?;
        self.expect_state(index, SlotState::Rendering, "discard")?;
        self.slots[index].state = SlotState::Free;
        Ok(())
    }

    /// Queued -> Free, for a queued frame whose flip was never issued
    pub fn unqueue(&mut self, slot: SlotId) -> Result<()> {
        let index = self.index_of(slot)?;
        self.expect_state(index, SlotState::Queued, "unqueue")?;
        self.queued.retain(|&i| i != index);
        self.slots[index].state = SlotState::Free;
        Ok(())
    }

    /// Oldest queued slot, the next one to flip
    pub fn next_queued(&self) -> Option<SlotId> {
        self.queued.front().map(|&i| self.id(i))
    }

    /// Number of queued slots
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Hardware confirmed that `slot` is on screen
    ///
    /// `slot` must be the oldest queued slot. It becomes Visible and the
    /// previously visible slot returns to the free pool; its id is returned.
    pub fn release(&mut self, slot: SlotId) -> Result<SlotId> {
        let index = self.index_of(slot)?;
        self.expect_state(index, SlotState::Queued, "release")?;
        if self.queued.front() != Some(&index) {
            return Err(Error::InvalidSlot(format!(
                "release: slot {} is not the oldest queued slot", index
            )));
        }

        self.queued.pop_front();
        let previous = self.visible;
        self.slots[previous].state = SlotState::Free;
        self.slots[index].state = SlotState::Visible;
        self.visible = index;
        Ok(self.id(previous))
    }

    /// The renderer's view of a slot it owns
    pub fn buffer_mut(&mut self, slot: SlotId) -> Result<&mut FrameBuffer> {
        let index = self.index_of(slot)?;
        self.expect_state(index, SlotState::Rendering, "buffer_mut")?;
        Ok(&mut self.slots[index].buffer)
    }

    pub fn buffer(&self, slot: SlotId) -> Result<&FrameBuffer> {
        let index = self.index_of(slot)?;
        Ok(&self.slots[index].buffer)
    }

    pub fn handle(&self, slot: SlotId) -> Result<BufferHandle> {
        let index = self.index_of(slot)?;
        Ok(self.slots[index].handle)
    }

    pub fn state(&self, slot: SlotId) -> Result<SlotState> {
        let index = self.index_of(slot)?;
        Ok(self.slots[index].state)
    }

    /// Map a hardware handle back to its slot
    pub fn slot_for_handle(&self, handle: BufferHandle) -> Option<SlotId> {
        self.by_handle.get(&handle).map(|&i| self.id(i))
    }

    /// The slot on screen
    pub fn visible(&self) -> SlotId {
        self.id(self.visible)
    }

    pub fn slots(&self) -> &[SwapChainSlot] {
        &self.slots
    }

    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    pub fn mode(&self) -> &DisplayMode {
        &self.mode
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Number of slots in `state`
    pub fn count(&self, state: SlotState) -> usize {
        self.slots.iter().filter(|s| s.state == state).count()
    }

    /// Verify the ownership invariants
    pub fn check_invariants(&self) -> Result<()> {
        if self.count(SlotState::Visible) != 1 || self.slots[self.visible].state != SlotState::Visible {
            return Err(Error::InvalidState(format!(
                "{} visible slots", self.count(SlotState::Visible)
            )));
        }
        if self.count(SlotState::Queued) != self.queued.len()
            || self.queued.iter().any(|&i| self.slots[i].state != SlotState::Queued)
        {
            return Err(Error::InvalidState("queue order out of sync with slot states".to_string()));
        }
        let busy = self.count(SlotState::Queued) + self.count(SlotState::Rendering);
        if busy > self.depth() - 1 {
            return Err(Error::InvalidState(format!("{} slots busy in a chain of {}", busy, self.depth())));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[path = "swapchain_tests.rs"]
mod tests;
