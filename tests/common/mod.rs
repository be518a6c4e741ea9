//! Scripted in-process JDWP agent.
//!
//! Listens on an ephemeral TCP port, speaks real handshake and packets, and
//! serves replies from a programmed class/frame model. Asynchronous events
//! are scripted: every `VirtualMachine::Resume` the engine sends pops the
//! next [`Fire`] step and emits it as a composite event packet, echoing the
//! request ids the engine registered.

use javelin::jdwp::codec::{read_packet, write_packet, Decoder, Encoder, Packet};
use javelin::jdwp::types::{event_kind, suspend_policy, IdSizes, Location, Value};
use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const THREAD: u64 = 1;

#[derive(Debug, Clone)]
pub struct MockMethod {
    pub id: u64,
    pub name: String,
    pub signature: String,
    /// (code index, line), ordered by code index.
    pub lines: Vec<(u64, u32)>,
    pub arg_count: i32,
    /// (code index, name, signature, length, slot)
    pub slots: Vec<(u64, String, String, u32, i32)>,
}

#[derive(Debug, Clone)]
pub struct MockField {
    pub id: u64,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

#[derive(Debug, Clone)]
pub struct MockClass {
    pub type_id: u64,
    pub signature: String,
    pub methods: Vec<MockMethod>,
    pub fields: Vec<MockField>,
}

/// Programmed target state served to the engine.
#[derive(Debug, Default, Clone)]
pub struct Model {
    pub classes: Vec<MockClass>,
    /// Frames of the suspended thread, innermost first:
    /// (frame id, class type id, method id, code index).
    pub frames: Vec<(u64, u64, u64, u64)>,
    /// Receiver of the innermost frame.
    pub this_object: Option<u64>,
    /// Object id -> runtime class type id.
    pub objects: HashMap<u64, u64>,
    /// (object id, field id) -> value.
    pub object_fields: HashMap<(u64, u64), Value>,
    /// (frame id, slot) -> value.
    pub frame_slots: HashMap<(u64, i32), Value>,
    /// (object id, method id) -> invocation result.
    pub invoke_results: HashMap<(u64, u64), Value>,
    /// String object id -> contents.
    pub strings: HashMap<u64, String>,
}

/// One scripted event emission, popped per `Resume`.
#[derive(Debug, Clone)]
pub enum Fire {
    /// Mark a class loaded and emit its prepare event through the recorded
    /// class-prepare request.
    ClassPrepare { class: usize },
    /// Emit the first recorded breakpoint request at its own location.
    Breakpoint,
    /// Emit the recorded single-step request at the given location.
    Step {
        class: u64,
        method: u64,
        index: u64,
    },
    /// Emit vm death and close the connection.
    VmDeath,
}

/// Commands the agent observed, shared with the test body.
#[derive(Debug, Default)]
pub struct AgentLog {
    /// Live event requests as (kind, id), cleared entries removed.
    pub requests: Vec<(u8, i32)>,
    /// VM-wide resumes received.
    pub vm_resumes: usize,
    /// Thread ids of thread-scoped resumes, in order.
    pub thread_resumes: Vec<u64>,
}

pub struct MockVm {
    pub port: u16,
    pub log: Arc<Mutex<AgentLog>>,
    handle: Option<JoinHandle<()>>,
}

impl MockVm {
    pub fn spawn(model: Model, script: Vec<Fire>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock agent");
        let port = listener.local_addr().expect("local addr").port();
        let log = Arc::new(Mutex::new(AgentLog::default()));
        let agent_log = log.clone();
        let handle = thread::Builder::new()
            .name("mock-jdwp-agent".into())
            .spawn(move || {
                if let Ok((stream, _)) = listener.accept() {
                    Agent::new(model, script, stream, agent_log).run();
                }
            })
            .expect("spawn mock agent");
        Self {
            port,
            log,
            handle: Some(handle),
        }
    }

    /// Live event requests of the given kind.
    pub fn live_requests(&self, kind: u8) -> Vec<i32> {
        self.log
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, id)| *id)
            .collect()
    }
}

impl Drop for MockVm {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Poll a condition until it holds or the timeout passes.
pub fn wait_for(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[derive(Debug, Clone)]
struct Recorded {
    id: i32,
    kind: u8,
    location: Option<Location>,
}

struct Agent {
    model: Model,
    script: Vec<Fire>,
    stream: TcpStream,
    log: Arc<Mutex<AgentLog>>,
    sizes: IdSizes,
    requests: Vec<Recorded>,
    loaded: HashSet<usize>,
    next_request: i32,
    next_object: u64,
    next_packet: u32,
}

impl Agent {
    fn new(model: Model, script: Vec<Fire>, stream: TcpStream, log: Arc<Mutex<AgentLog>>) -> Self {
        Self {
            model,
            script,
            stream,
            log,
            sizes: IdSizes::default(),
            requests: Vec::new(),
            loaded: HashSet::new(),
            next_request: 100,
            next_object: 9000,
            next_packet: 100_000,
        }
    }

    fn run(mut self) {
        let mut buf = [0u8; 14];
        if self.stream.read_exact(&mut buf).is_err() || &buf != b"JDWP-Handshake" {
            return;
        }
        if self.stream.write_all(b"JDWP-Handshake").is_err() {
            return;
        }

        // the target announces itself before any command
        let mut start = Encoder::new();
        start.put_u8(suspend_policy::ALL);
        start.put_i32(1);
        start.put_u8(event_kind::VM_START);
        start.put_i32(0);
        start.put_id(self.sizes.object, THREAD);
        self.send_event(start.finish());

        loop {
            let packet = match read_packet(&mut self.stream) {
                Ok(packet) => packet,
                Err(_) => return,
            };
            if !self.handle(packet) {
                return;
            }
        }
    }

    fn send_event(&mut self, data: bytes::Bytes) {
        self.next_packet += 1;
        let packet = Packet::command(self.next_packet, 64, 100, data);
        let _ = write_packet(&mut self.stream, &packet);
    }

    fn reply(&mut self, to: &Packet, data: bytes::Bytes) {
        let _ = write_packet(&mut self.stream, &Packet::reply(to.id, 0, data));
    }

    fn class(&self, type_id: u64) -> Option<&MockClass> {
        self.model.classes.iter().find(|c| c.type_id == type_id)
    }

    /// Handle one command packet, false ends the session.
    fn handle(&mut self, packet: Packet) -> bool {
        let sizes = self.sizes;
        let mut dec = Decoder::new(&packet.data);
        let mut enc = Encoder::new();
        match packet.command {
            // VirtualMachine::IDSizes
            (1, 7) => {
                for width in [
                    sizes.field,
                    sizes.method,
                    sizes.object,
                    sizes.reference_type,
                    sizes.frame,
                ] {
                    enc.put_i32(width as i32);
                }
                self.reply(&packet, enc.finish());
            }
            // VirtualMachine::ClassesBySignature, loaded classes only
            (1, 2) => {
                let signature = dec.string().unwrap_or_default();
                let found: Vec<_> = self
                    .model
                    .classes
                    .iter()
                    .enumerate()
                    .filter(|(i, c)| c.signature == signature && self.loaded.contains(i))
                    .map(|(_, c)| c.type_id)
                    .collect();
                enc.put_i32(found.len() as i32);
                for type_id in found {
                    enc.put_u8(1);
                    enc.put_id(sizes.reference_type, type_id);
                    enc.put_i32(7);
                }
                self.reply(&packet, enc.finish());
            }
            // VirtualMachine::Dispose
            (1, 6) => {
                self.reply(&packet, enc.finish());
                return false;
            }
            // VirtualMachine::Resume pops the next scripted emission
            (1, 9) => {
                self.log.lock().unwrap().vm_resumes += 1;
                self.reply(&packet, enc.finish());
                return self.fire_next();
            }
            // VirtualMachine::CreateString
            (1, 11) => {
                let value = dec.string().unwrap_or_default();
                self.next_object += 1;
                let id = self.next_object;
                self.model.strings.insert(id, value);
                enc.put_id(sizes.object, id);
                self.reply(&packet, enc.finish());
            }
            // ReferenceType::Signature
            (2, 1) => {
                let type_id = dec.id(sizes.reference_type).unwrap_or_default();
                let signature = self
                    .class(type_id)
                    .map(|c| c.signature.clone())
                    .unwrap_or_default();
                enc.put_string(&signature);
                self.reply(&packet, enc.finish());
            }
            // ReferenceType::Fields
            (2, 4) => {
                let type_id = dec.id(sizes.reference_type).unwrap_or_default();
                let fields = self.class(type_id).map(|c| c.fields.clone()).unwrap_or_default();
                enc.put_i32(fields.len() as i32);
                for field in fields {
                    enc.put_id(sizes.field, field.id);
                    enc.put_string(&field.name);
                    enc.put_string(&field.signature);
                    enc.put_i32(field.mod_bits);
                }
                self.reply(&packet, enc.finish());
            }
            // ReferenceType::Methods
            (2, 5) => {
                let type_id = dec.id(sizes.reference_type).unwrap_or_default();
                let methods = self.class(type_id).map(|c| c.methods.clone()).unwrap_or_default();
                enc.put_i32(methods.len() as i32);
                for method in methods {
                    enc.put_id(sizes.method, method.id);
                    enc.put_string(&method.name);
                    enc.put_string(&method.signature);
                    enc.put_i32(0);
                }
                self.reply(&packet, enc.finish());
            }
            // Method::LineTable
            (6, 1) => {
                let type_id = dec.id(sizes.reference_type).unwrap_or_default();
                let method_id = dec.id(sizes.method).unwrap_or_default();
                let lines = self
                    .class(type_id)
                    .and_then(|c| c.methods.iter().find(|m| m.id == method_id))
                    .map(|m| m.lines.clone())
                    .unwrap_or_default();
                enc.put_i64(0);
                enc.put_i64(lines.last().map(|(i, _)| *i as i64 + 8).unwrap_or(0));
                enc.put_i32(lines.len() as i32);
                for (index, line) in lines {
                    enc.put_i64(index as i64);
                    enc.put_i32(line as i32);
                }
                self.reply(&packet, enc.finish());
            }
            // Method::VariableTable
            (6, 2) => {
                let type_id = dec.id(sizes.reference_type).unwrap_or_default();
                let method_id = dec.id(sizes.method).unwrap_or_default();
                let method = self
                    .class(type_id)
                    .and_then(|c| c.methods.iter().find(|m| m.id == method_id))
                    .cloned();
                let (arg_count, slots) = method
                    .map(|m| (m.arg_count, m.slots))
                    .unwrap_or((0, Vec::new()));
                enc.put_i32(arg_count);
                enc.put_i32(slots.len() as i32);
                for (code_index, name, signature, length, slot) in slots {
                    enc.put_i64(code_index as i64);
                    enc.put_string(&name);
                    enc.put_string(&signature);
                    enc.put_i32(length as i32);
                    enc.put_i32(slot);
                }
                self.reply(&packet, enc.finish());
            }
            // ObjectReference::ReferenceType
            (9, 1) => {
                let object = dec.id(sizes.object).unwrap_or_default();
                let type_id = self.model.objects.get(&object).copied().unwrap_or_default();
                enc.put_u8(1);
                enc.put_id(sizes.reference_type, type_id);
                self.reply(&packet, enc.finish());
            }
            // ObjectReference::GetValues
            (9, 2) => {
                let object = dec.id(sizes.object).unwrap_or_default();
                let count = dec.i32().unwrap_or(0);
                let mut values = Vec::new();
                for _ in 0..count {
                    let field = dec.id(sizes.field).unwrap_or_default();
                    values.push(
                        self.model
                            .object_fields
                            .get(&(object, field))
                            .copied()
                            .unwrap_or(Value::Object(0)),
                    );
                }
                enc.put_i32(values.len() as i32);
                for value in values {
                    enc.put_tagged_value(&sizes, &value);
                }
                self.reply(&packet, enc.finish());
            }
            // ObjectReference::InvokeMethod
            (9, 6) => {
                let object = dec.id(sizes.object).unwrap_or_default();
                let _thread = dec.id(sizes.object).unwrap_or_default();
                let _class = dec.id(sizes.reference_type).unwrap_or_default();
                let method = dec.id(sizes.method).unwrap_or_default();
                let result = self
                    .model
                    .invoke_results
                    .get(&(object, method))
                    .copied()
                    .unwrap_or(Value::Void);
                enc.put_tagged_value(&sizes, &result);
                enc.put_tagged_value(&sizes, &Value::Object(0));
                self.reply(&packet, enc.finish());
            }
            // StringReference::Value
            (10, 1) => {
                let object = dec.id(sizes.object).unwrap_or_default();
                let value = self.model.strings.get(&object).cloned().unwrap_or_default();
                enc.put_string(&value);
                self.reply(&packet, enc.finish());
            }
            // ThreadReference::Resume advances the script like a vm resume
            (11, 3) => {
                let thread = dec.id(sizes.object).unwrap_or_default();
                self.log.lock().unwrap().thread_resumes.push(thread);
                self.reply(&packet, enc.finish());
                return self.fire_next();
            }
            // ThreadReference::Frames
            (11, 6) => {
                enc.put_i32(self.model.frames.len() as i32);
                for (frame, class, method, index) in self.model.frames.clone() {
                    enc.put_id(sizes.frame, frame);
                    enc.put_location(
                        &sizes,
                        &Location {
                            type_tag: 1,
                            class,
                            method,
                            index,
                        },
                    );
                }
                self.reply(&packet, enc.finish());
            }
            // StackFrame::GetValues
            (16, 1) => {
                let _thread = dec.id(sizes.object).unwrap_or_default();
                let frame = dec.id(sizes.frame).unwrap_or_default();
                let count = dec.i32().unwrap_or(0);
                let mut values = Vec::new();
                for _ in 0..count {
                    let slot = dec.i32().unwrap_or(0);
                    let _tag = dec.u8().unwrap_or(0);
                    values.push(
                        self.model
                            .frame_slots
                            .get(&(frame, slot))
                            .copied()
                            .unwrap_or(Value::Object(0)),
                    );
                }
                enc.put_i32(values.len() as i32);
                for value in values {
                    enc.put_tagged_value(&sizes, &value);
                }
                self.reply(&packet, enc.finish());
            }
            // StackFrame::ThisObject
            (16, 3) => {
                let value = match self.model.this_object {
                    Some(id) => Value::Object(id),
                    None => Value::Object(0),
                };
                enc.put_tagged_value(&sizes, &value);
                self.reply(&packet, enc.finish());
            }
            // EventRequest::Set
            (15, 1) => {
                let kind = dec.u8().unwrap_or(0);
                let _suspend = dec.u8().unwrap_or(0);
                let modifiers = dec.i32().unwrap_or(0);
                let mut location = None;
                for _ in 0..modifiers {
                    match dec.u8().unwrap_or(0) {
                        1 => {
                            let _count = dec.i32();
                        }
                        7 => location = dec.location(&sizes).ok(),
                        10 => {
                            let _thread = dec.id(sizes.object);
                            let _size = dec.i32();
                            let _depth = dec.i32();
                        }
                        _ => break,
                    }
                }
                self.next_request += 1;
                let id = self.next_request;
                self.requests.push(Recorded { id, kind, location });
                self.log.lock().unwrap().requests.push((kind, id));
                enc.put_i32(id);
                self.reply(&packet, enc.finish());
            }
            // EventRequest::Clear
            (15, 2) => {
                let kind = dec.u8().unwrap_or(0);
                let id = dec.i32().unwrap_or(0);
                self.requests.retain(|r| !(r.kind == kind && r.id == id));
                self.log
                    .lock()
                    .unwrap()
                    .requests
                    .retain(|(k, i)| !(*k == kind && *i == id));
                self.reply(&packet, enc.finish());
            }
            _ => {
                // unprogrammed command
                let _ = write_packet(&mut self.stream, &Packet::reply(packet.id, 113, enc.finish()));
            }
        }
        true
    }

    /// Emit the next scripted event set. False closes the session.
    fn fire_next(&mut self) -> bool {
        if self.script.is_empty() {
            return true;
        }
        let fire = self.script.remove(0);
        let sizes = self.sizes;
        let mut enc = Encoder::new();
        match fire {
            Fire::ClassPrepare { class } => {
                self.loaded.insert(class);
                let mock = self.model.classes[class].clone();
                let request = self
                    .requests
                    .iter()
                    .find(|r| r.kind == event_kind::CLASS_PREPARE)
                    .map(|r| r.id)
                    .unwrap_or(0);
                enc.put_u8(suspend_policy::EVENT_THREAD);
                enc.put_i32(1);
                enc.put_u8(event_kind::CLASS_PREPARE);
                enc.put_i32(request);
                enc.put_id(sizes.object, THREAD);
                enc.put_u8(1);
                enc.put_id(sizes.reference_type, mock.type_id);
                enc.put_string(&mock.signature);
                enc.put_i32(7);
            }
            Fire::Breakpoint => {
                let Some(recorded) = self
                    .requests
                    .iter()
                    .find(|r| r.kind == event_kind::BREAKPOINT)
                    .cloned()
                else {
                    return true;
                };
                let location = recorded.location.unwrap_or(Location {
                    type_tag: 1,
                    class: 0,
                    method: 0,
                    index: 0,
                });
                enc.put_u8(suspend_policy::EVENT_THREAD);
                enc.put_i32(1);
                enc.put_u8(event_kind::BREAKPOINT);
                enc.put_i32(recorded.id);
                enc.put_id(sizes.object, THREAD);
                enc.put_location(&sizes, &location);
            }
            Fire::Step {
                class,
                method,
                index,
            } => {
                // the suspended thread moved, snapshots must see the new spot
                if let Some(frame) = self.model.frames.first_mut() {
                    frame.1 = class;
                    frame.2 = method;
                    frame.3 = index;
                }
                let request = self
                    .requests
                    .iter()
                    .find(|r| r.kind == event_kind::SINGLE_STEP)
                    .map(|r| r.id)
                    .unwrap_or(0);
                enc.put_u8(suspend_policy::EVENT_THREAD);
                enc.put_i32(1);
                enc.put_u8(event_kind::SINGLE_STEP);
                enc.put_i32(request);
                enc.put_id(sizes.object, THREAD);
                enc.put_location(
                    &sizes,
                    &Location {
                        type_tag: 1,
                        class,
                        method,
                        index,
                    },
                );
            }
            Fire::VmDeath => {
                enc.put_u8(suspend_policy::NONE);
                enc.put_i32(1);
                enc.put_u8(event_kind::VM_DEATH);
                enc.put_i32(0);
                self.send_event(enc.finish());
                return false;
            }
        }
        self.send_event(enc.finish());
        true
    }
}
