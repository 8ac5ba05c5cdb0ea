//! In-memory fakes shared by the unit tests in this crate.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use tankwatch_core::{
    EntityLayout, EntityOffsets, MemoryLayout, MemorySource, SourceError, SourceResult,
};

use crate::registry::{SendError, SubscriberSink};

/// Sparse big-endian memory image. Unwritten bytes read as zero.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeMemory {
    bytes: HashMap<u32, u8>,
}

impl FakeMemory {
    /// Layout used by every fake image.
    pub(crate) fn layout() -> MemoryLayout {
        MemoryLayout {
            lives: 0x8000_0000,
            level_number: 0x8000_0001,
            player_x: 0x8000_0004,
            player_y: 0x8000_0008,
            num_starting_entities: 0x8000_000C,
            num_remaining_entities: 0x8000_000D,
            entities: EntityLayout {
                base: 0x8000_0100,
                stride: 0x14,
                max_slots: 8,
                offsets: EntityOffsets::default(),
            },
        }
    }

    /// Image with `count` entities; slot 1 (if present) is dead.
    ///
    /// lives = 2, level = 5, player = (10, 20), entity i at
    /// (100 + i, 200 + i) with color code i + 2.
    pub(crate) fn populated(count: u32) -> Self {
        let layout = Self::layout();
        let mut memory = Self::default();

        memory.write_u8(layout.lives, 2);
        memory.write_u8(layout.level_number, 5);
        memory.write_f32(layout.player_x, 10.0);
        memory.write_f32(layout.player_y, 20.0);
        memory.write_u8(layout.num_starting_entities, count as u8);

        let table = &layout.entities;
        let mut remaining = 0u8;
        for i in 0..count {
            let slot = table.slot_address(i).unwrap();
            let alive = i != 1;
            memory.write_f32(slot + table.offsets.x, 100.0 + i as f32);
            memory.write_f32(slot + table.offsets.y, 200.0 + i as f32);
            memory.write_u8(slot + table.offsets.color, (i + 2) as u8);
            memory.write_u8(slot + table.offsets.alive, u8::from(alive));
            if alive {
                remaining += 1;
            }
        }
        memory.write_u8(layout.num_remaining_entities, remaining);
        memory
    }

    pub(crate) fn write_u8(&mut self, address: u32, value: u8) {
        self.bytes.insert(address, value);
    }

    pub(crate) fn write_f32(&mut self, address: u32, value: f32) {
        for (i, byte) in value.to_be_bytes().into_iter().enumerate() {
            self.bytes.insert(address + i as u32, byte);
        }
    }

    fn read(&self, address: u32, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self
                .bytes
                .get(&address.wrapping_add(i as u32))
                .copied()
                .unwrap_or(0);
        }
    }
}

/// Scriptable `MemorySource` over a [`FakeMemory`].
pub(crate) struct FakeSource {
    memory: FakeMemory,
    hooked: bool,
    hook_failures_left: u32,
    hook_calls: u32,
    fault_addresses: HashSet<u32>,
    fail_all: Arc<AtomicBool>,
    unhook_on_fault: bool,
    unhooks: Arc<AtomicUsize>,
}

impl FakeSource {
    pub(crate) fn new(memory: FakeMemory) -> Self {
        Self {
            memory,
            hooked: false,
            hook_failures_left: 0,
            hook_calls: 0,
            fault_addresses: HashSet::new(),
            fail_all: Arc::new(AtomicBool::new(false)),
            unhook_on_fault: false,
            unhooks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The first `count` hook attempts fail.
    pub(crate) fn failing_hooks(mut self, count: u32) -> Self {
        self.hook_failures_left = count;
        self
    }

    /// Any read touching `address` fails.
    pub(crate) fn fail_reads_at(mut self, address: u32) -> Self {
        self.fault_addresses.insert(address);
        self
    }

    /// A read fault also drops the hook, like a process that exited.
    pub(crate) fn unhook_on_fault(mut self) -> Self {
        self.unhook_on_fault = true;
        self
    }

    /// Switch that makes every read fail while set.
    pub(crate) fn fault_switch(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.fail_all)
    }

    pub(crate) fn unhook_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.unhooks)
    }

    pub(crate) fn clear_faults(&mut self) {
        self.fault_addresses.clear();
        self.fail_all.store(false, Ordering::SeqCst);
    }

    pub(crate) fn hook_calls(&self) -> u32 {
        self.hook_calls
    }

    pub(crate) fn unhook_calls(&self) -> usize {
        self.unhooks.load(Ordering::SeqCst)
    }
}

impl MemorySource for FakeSource {
    fn hook(&mut self) -> SourceResult<()> {
        self.hook_calls += 1;
        if self.hook_failures_left > 0 {
            self.hook_failures_left -= 1;
            return Err(SourceError::ProcessNotFound {
                names: "fake".to_string(),
            });
        }
        self.hooked = true;
        Ok(())
    }

    fn unhook(&mut self) {
        self.hooked = false;
        self.unhooks.fetch_add(1, Ordering::SeqCst);
    }

    fn is_hooked(&self) -> bool {
        self.hooked
    }

    fn read_into(&mut self, address: u32, buf: &mut [u8]) -> SourceResult<()> {
        if !self.hooked {
            return Err(SourceError::NotHooked);
        }

        let touches_fault = (0..buf.len() as u32)
            .any(|i| self.fault_addresses.contains(&address.wrapping_add(i)));
        if touches_fault || self.fail_all.load(Ordering::SeqCst) {
            if self.unhook_on_fault {
                self.hooked = false;
            }
            return Err(SourceError::io("process exited"));
        }

        self.memory.read(address, buf);
        Ok(())
    }
}

/// Sink that records every payload, optionally failing every send.
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    frames: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn broken() -> Arc<Self> {
        let sink = Self::default();
        sink.fail.store(true, Ordering::SeqCst);
        Arc::new(sink)
    }

    pub(crate) fn break_now(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn frames(&self) -> Vec<String> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SubscriberSink for RecordingSink {
    async fn send_text(&self, payload: &str) -> Result<(), SendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        if let Ok(mut frames) = self.frames.lock() {
            frames.push(payload.to_string());
        }
        Ok(())
    }
}
