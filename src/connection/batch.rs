//! Deferred batch — per-connection outbound message coalescing.
//!
//! ```text
//!  schedule_message(entity, creator, type)
//!        │  same (entity, type) pending? ──yes──▶ replace creator in place
//!        ▼ no
//!   items: [ ping? | item | item | ... ]          batch_start_time
//!        │
//!        ▼  encode_batch()  (after batch_delay_ms)
//!   arena: [pad|payload|foot][pad|payload|foot]...   + PacketInfo list
//! ```
//!
//! Creators are plain function pointers, or an owned event-type string.
//! A slot's creator is dropped whenever the slot is overwritten or the
//! item leaves the batch.

use crate::entity::{Entity, EntityRegistry};
use crate::frame::PacketInfo;
use crate::proto::{ProtoMessage, ProtoSize, ProtoWriteBuffer};

use super::creators;

/// Budget for every message after the first in one batch write; keeps a
/// batch inside one TCP segment on a 1500-byte MTU.
pub const MAX_BATCH_PACKET_SIZE: usize = 1390;

/// Encode a message for `entity` (if any).  Returns the total bytes the
/// message occupies in the arena (padding + payload + footer), or 0 if it
/// does not fit the remaining budget.
pub type CreatorFn = fn(Option<&Entity>, &mut MessageWriter<'_>) -> u16;

pub enum MessageCreator {
    Func(CreatorFn),
    /// `EventResponse` carrying an owned event type.
    Event(String),
}

impl MessageCreator {
    pub fn create(&self, entity: Option<&Entity>, w: &mut MessageWriter<'_>) -> u16 {
        match self {
            Self::Func(f) => f(entity, w),
            Self::Event(event_type) => creators::event_response(entity, event_type, w),
        }
    }
}

impl core::fmt::Debug for MessageCreator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Func(_) => write!(f, "Func"),
            Self::Event(s) => write!(f, "Event({:?})", s),
        }
    }
}

#[derive(Debug)]
pub struct BatchItem {
    /// Entity key, `None` for connection-level messages.
    pub entity: Option<u32>,
    pub message_type: u8,
    pub estimated_size: u8,
    pub creator: MessageCreator,
}

// ───────────────────────────────────────────────────────────────
// Arena writer
// ───────────────────────────────────────────────────────────────

/// Writes messages into the shared arena with the frame layout the
/// helper expects.
pub struct MessageWriter<'a> {
    buf: &'a mut Vec<u8>,
    header_padding: usize,
    footer: usize,
    remaining: usize,
    is_single: bool,
    first: bool,
}

impl<'a> MessageWriter<'a> {
    /// One message, buffer sized exactly.
    pub fn single(buf: &'a mut Vec<u8>, header_padding: usize, footer: usize) -> Self {
        Self {
            buf,
            header_padding,
            footer,
            remaining: usize::from(u16::MAX),
            is_single: true,
            first: true,
        }
    }

    /// Several messages appended back to back.
    pub fn batch(buf: &'a mut Vec<u8>, header_padding: usize, footer: usize) -> Self {
        buf.clear();
        Self {
            buf,
            header_padding,
            footer,
            remaining: usize::from(u16::MAX),
            is_single: false,
            first: true,
        }
    }

    pub fn set_remaining(&mut self, remaining: usize) {
        self.remaining = remaining;
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.is_single
    }

    /// Encode `msg` after fresh header padding (and the previous
    /// message's footer slack).  Returns the total slot size, 0 if it
    /// does not fit.
    pub fn encode<M: ProtoMessage>(&mut self, msg: &M) -> u16 {
        let mut size = ProtoSize::new();
        msg.calculate_size(&mut size);
        let payload = size.get_size();
        let total = self.header_padding + payload + self.footer;
        if total > self.remaining {
            return 0;
        }

        if self.is_single {
            self.buf.clear();
            self.buf.reserve(total);
            self.buf.resize(self.header_padding, 0);
        } else if self.first {
            self.buf.resize(self.header_padding, 0);
        } else {
            let pad = self.footer + self.header_padding;
            self.buf.resize(self.buf.len() + pad, 0);
        }
        self.first = false;

        let before = self.buf.len();
        msg.encode(&mut ProtoWriteBuffer::new(self.buf));
        let written = self.buf.len() - before;
        debug_assert_eq!(written, payload, "{} size mismatch", M::NAME);

        (self.header_padding + written + self.footer) as u16
    }
}

// ───────────────────────────────────────────────────────────────
// Batch
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct DeferredBatch {
    items: Vec<BatchItem>,
    start_time: u32,
    scheduled: bool,
}

impl DeferredBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue, replacing any pending item for the same (entity, type).
    pub fn add_item(
        &mut self,
        entity: Option<u32>,
        creator: MessageCreator,
        message_type: u8,
        estimated_size: u8,
        now: u32,
    ) {
        if let Some(existing) = self
            .items
            .iter_mut()
            .find(|i| i.entity == entity && i.message_type == message_type)
        {
            existing.creator = creator;
            existing.estimated_size = estimated_size;
        } else {
            self.items.push(BatchItem {
                entity,
                message_type,
                estimated_size,
                creator,
            });
        }
        self.schedule(now);
    }

    /// Enqueue at the head.  Only ping and disconnect use this, so at
    /// most one front item is ever pending.
    pub fn add_item_front(
        &mut self,
        entity: Option<u32>,
        creator: MessageCreator,
        message_type: u8,
        estimated_size: u8,
        now: u32,
    ) {
        self.items.push(BatchItem {
            entity,
            message_type,
            estimated_size,
            creator,
        });
        let last = self.items.len() - 1;
        self.items.swap(0, last);
        self.schedule(now);
    }

    fn schedule(&mut self, now: u32) {
        if !self.scheduled {
            self.scheduled = true;
            self.start_time = now;
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Batch delay elapsed since the first pending enqueue.
    pub fn is_due(&self, now: u32, delay_ms: u32) -> bool {
        self.scheduled && now.wrapping_sub(self.start_time) >= delay_ms
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.scheduled = false;
    }

    /// Drop the first `n` items; restart the delay if any remain.
    pub fn remove_front(&mut self, n: usize, now: u32) {
        self.items.drain(..n.min(self.items.len()));
        self.scheduled = false;
        if !self.items.is_empty() {
            self.schedule(now);
        }
    }

    /// Encode the lone pending item into an exact-size arena.
    pub fn encode_single(
        &self,
        registry: &EntityRegistry,
        arena: &mut Vec<u8>,
        header_padding: usize,
        footer: usize,
    ) -> u16 {
        let Some(item) = self.items.first() else {
            return 0;
        };
        let entity = item.entity.and_then(|k| registry.get(k));
        let mut w = MessageWriter::single(arena, header_padding, footer);
        item.creator.create(entity, &mut w)
    }

    /// Encode up to `max_packets` items back to back.  Stops at the first
    /// item that does not fit; the returned list covers exactly the
    /// encoded prefix.  The arena ends with the last message's footer slack.
    pub fn encode_batch(
        &self,
        registry: &EntityRegistry,
        arena: &mut Vec<u8>,
        header_padding: usize,
        footer: usize,
        max_packets: usize,
    ) -> Vec<PacketInfo> {
        let count = self.items.len().min(max_packets);
        let estimate: usize = self
            .items
            .iter()
            .map(|i| usize::from(i.estimated_size) + header_padding + footer)
            .sum();

        let mut packets = Vec::with_capacity(count);
        let mut w = MessageWriter::batch(arena, header_padding, footer);
        w.buf.reserve(estimate);

        let mut remaining = usize::from(u16::MAX);
        let mut offset = 0usize;
        for item in &self.items[..count] {
            w.set_remaining(remaining);
            let entity = item.entity.and_then(|k| registry.get(k));
            let total = usize::from(item.creator.create(entity, &mut w));
            if total == 0 {
                break;
            }
            packets.push(PacketInfo {
                message_type: item.message_type,
                offset: offset as u16,
                payload_size: (total - header_padding - footer) as u16,
            });
            if packets.len() == 1 {
                remaining = MAX_BATCH_PACKET_SIZE;
            }
            remaining = remaining.saturating_sub(total);
            offset = w.len() + footer;
        }

        if !packets.is_empty() && footer > 0 {
            let len = w.len() + footer;
            w.buf.resize(len, 0);
        }
        packets
    }
}
