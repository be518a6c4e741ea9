//! Asynchronous event sets delivered by the target VM.

use super::codec::Decoder;
use super::types::{event_kind, IdSizes, Location, ReferenceTypeId, RequestId, ThreadId};
use super::Error;

/// One `Event::Composite` packet: a suspend policy plus the events that were
/// generated together. The whole set shares one resume decision.
#[derive(Debug, Clone)]
pub struct EventSet {
    pub suspend_policy: u8,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub request_id: RequestId,
    pub kind: EventKind,
}

/// Closed set of protocol event kinds the engine reacts to.
#[derive(Debug, Clone)]
pub enum EventKind {
    VmStart {
        thread: ThreadId,
    },
    VmDeath,
    ClassPrepare {
        thread: ThreadId,
        ref_type_tag: u8,
        type_id: ReferenceTypeId,
        signature: String,
        status: i32,
    },
    Breakpoint {
        thread: ThreadId,
        location: Location,
    },
    SingleStep {
        thread: ThreadId,
        location: Location,
    },
    MethodEntry {
        thread: ThreadId,
        location: Location,
    },
    MethodExit {
        thread: ThreadId,
        location: Location,
    },
    /// Kind the engine has no handler for, carried for logging.
    Unknown(u8),
}

impl EventKind {
    /// Thread the event was posted in, when it carries one.
    pub fn thread(&self) -> Option<ThreadId> {
        match self {
            EventKind::VmStart { thread }
            | EventKind::ClassPrepare { thread, .. }
            | EventKind::Breakpoint { thread, .. }
            | EventKind::SingleStep { thread, .. }
            | EventKind::MethodEntry { thread, .. }
            | EventKind::MethodExit { thread, .. } => Some(*thread),
            EventKind::VmDeath | EventKind::Unknown(_) => None,
        }
    }
}

/// Decode a composite event payload.
///
/// Unknown trailing event kinds stop the decode of the set (their payload
/// width is unknowable), everything decoded so far is kept.
pub fn decode_event_set(data: &[u8], sizes: &IdSizes) -> Result<EventSet, Error> {
    let mut dec = Decoder::new(data);
    let suspend_policy = dec.u8()?;
    let count = dec.i32()?;

    let mut events = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        let kind = dec.u8()?;
        let request_id = dec.i32()?;
        let kind = match kind {
            event_kind::VM_START => EventKind::VmStart {
                thread: dec.id(sizes.object)?,
            },
            event_kind::VM_DEATH => EventKind::VmDeath,
            event_kind::CLASS_PREPARE => EventKind::ClassPrepare {
                thread: dec.id(sizes.object)?,
                ref_type_tag: dec.u8()?,
                type_id: dec.id(sizes.reference_type)?,
                signature: dec.string()?,
                status: dec.i32()?,
            },
            event_kind::BREAKPOINT => EventKind::Breakpoint {
                thread: dec.id(sizes.object)?,
                location: dec.location(sizes)?,
            },
            event_kind::SINGLE_STEP => EventKind::SingleStep {
                thread: dec.id(sizes.object)?,
                location: dec.location(sizes)?,
            },
            event_kind::METHOD_ENTRY => EventKind::MethodEntry {
                thread: dec.id(sizes.object)?,
                location: dec.location(sizes)?,
            },
            event_kind::METHOD_EXIT => EventKind::MethodExit {
                thread: dec.id(sizes.object)?,
                location: dec.location(sizes)?,
            },
            other => {
                events.push(Event {
                    request_id,
                    kind: EventKind::Unknown(other),
                });
                break;
            }
        };
        events.push(Event { request_id, kind });
    }

    Ok(EventSet {
        suspend_policy,
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jdwp::codec::Encoder;
    use crate::jdwp::types::suspend_policy;

    #[test]
    fn decode_breakpoint_set() {
        let sizes = IdSizes::default();
        let mut enc = Encoder::new();
        enc.put_u8(suspend_policy::EVENT_THREAD);
        enc.put_i32(1);
        enc.put_u8(event_kind::BREAKPOINT);
        enc.put_i32(11);
        enc.put_id(sizes.object, 0x42);
        enc.put_location(
            &sizes,
            &Location {
                type_tag: 1,
                class: 5,
                method: 6,
                index: 8,
            },
        );

        let set = decode_event_set(&enc.finish(), &sizes).unwrap();
        assert_eq!(set.suspend_policy, suspend_policy::EVENT_THREAD);
        assert_eq!(set.events.len(), 1);
        assert_eq!(set.events[0].request_id, 11);
        match &set.events[0].kind {
            EventKind::Breakpoint { thread, location } => {
                assert_eq!(*thread, 0x42);
                assert_eq!(location.index, 8);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn decode_class_prepare() {
        let sizes = IdSizes::default();
        let mut enc = Encoder::new();
        enc.put_u8(suspend_policy::EVENT_THREAD);
        enc.put_i32(1);
        enc.put_u8(event_kind::CLASS_PREPARE);
        enc.put_i32(3);
        enc.put_id(sizes.object, 1);
        enc.put_u8(1);
        enc.put_id(sizes.reference_type, 77);
        enc.put_string("LTest;");
        enc.put_i32(7);

        let set = decode_event_set(&enc.finish(), &sizes).unwrap();
        match &set.events[0].kind {
            EventKind::ClassPrepare {
                type_id, signature, ..
            } => {
                assert_eq!(*type_id, 77);
                assert_eq!(signature, "LTest;");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
