// Per-frame constants in a persistently mapped buffer
//
// The CPU rewrites constants every frame while the GPU may still be
// reading last frame's. Each (slot, view) pair owns a disjoint block, and
// the CPU only writes the block of the slot begin_frame just waited for,
// so no explicit barrier is needed.

use bytemuck::Pod;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantLayout {
    slots: usize,
    views: usize,
    /// Block size rounded up to the device's offset alignment.
    stride: usize,
}

impl ConstantLayout {
    /// `alignment` must be a power of two (e.g. minUniformBufferOffsetAlignment).
    pub fn new(slots: usize, views: usize, block_size: usize, alignment: usize) -> Self {
        assert!(alignment.is_power_of_two(), "alignment {alignment} is not a power of two");
        assert!(slots > 0 && views > 0 && block_size > 0);
        Self {
            slots,
            views,
            stride: (block_size + alignment - 1) & !(alignment - 1),
        }
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn total_size(&self) -> usize {
        self.stride * self.slots * self.views
    }

    pub fn offset(&self, slot: usize, view: usize) -> usize {
        assert!(slot < self.slots, "slot {slot} out of range");
        assert!(view < self.views, "view {view} out of range");
        (slot * self.views + view) * self.stride
    }

    /// Copy `value` into the block for (`slot`, `view`) of `mapped`.
    pub fn write<T: Pod>(&self, mapped: &mut [u8], slot: usize, view: usize, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        assert!(bytes.len() <= self.stride, "constant block larger than its stride");
        let offset = self.offset(slot, view);
        mapped[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}
