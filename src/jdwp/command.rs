//! Typed wrappers over the JDWP command subset the engine needs.

use super::codec::{Decoder, Encoder};
use super::types::*;
use super::{Client, Error};
use bytes::Bytes;

mod vm {
    pub const SET: u8 = 1;
    pub const CLASSES_BY_SIGNATURE: u8 = 2;
    pub const DISPOSE: u8 = 6;
    pub const ID_SIZES: u8 = 7;
    pub const RESUME: u8 = 9;
    pub const CREATE_STRING: u8 = 11;
}

mod reference_type {
    pub const SET: u8 = 2;
    pub const SIGNATURE: u8 = 1;
    pub const FIELDS: u8 = 4;
    pub const METHODS: u8 = 5;
}

mod method {
    pub const SET: u8 = 6;
    pub const LINE_TABLE: u8 = 1;
    pub const VARIABLE_TABLE: u8 = 2;
}

mod object_reference {
    pub const SET: u8 = 9;
    pub const REFERENCE_TYPE: u8 = 1;
    pub const GET_VALUES: u8 = 2;
    pub const INVOKE_METHOD: u8 = 6;
}

mod string_reference {
    pub const SET: u8 = 10;
    pub const VALUE: u8 = 1;
}

mod thread_reference {
    pub const SET: u8 = 11;
    pub const RESUME: u8 = 3;
    pub const FRAMES: u8 = 6;
}

mod stack_frame {
    pub const SET: u8 = 16;
    pub const GET_VALUES: u8 = 1;
    pub const THIS_OBJECT: u8 = 3;
}

mod event_request {
    pub const SET: u8 = 15;
    pub const CMD_SET: u8 = 1;
    pub const CMD_CLEAR: u8 = 2;
}

/// Event request modifiers supported by the engine.
#[derive(Debug, Clone)]
pub enum Modifier {
    /// Fire the request `n` times, then disable it.
    Count(i32),
    /// Restrict to one executable location.
    LocationOnly(Location),
    /// Step request body: thread, size, depth.
    Step {
        thread: ThreadId,
        size: i32,
        depth: i32,
    },
}

impl Modifier {
    fn encode(&self, enc: &mut Encoder, sizes: &IdSizes) {
        match self {
            Modifier::Count(n) => {
                enc.put_u8(1);
                enc.put_i32(*n);
            }
            Modifier::LocationOnly(loc) => {
                enc.put_u8(7);
                enc.put_location(sizes, loc);
            }
            Modifier::Step {
                thread,
                size,
                depth,
            } => {
                enc.put_u8(10);
                enc.put_id(sizes.object, *thread);
                enc.put_i32(*size);
                enc.put_i32(*depth);
            }
        }
    }
}

impl Client {
    pub(super) fn id_sizes(&self) -> Result<IdSizes, Error> {
        let data = self.request(vm::SET, vm::ID_SIZES, Bytes::new())?;
        let mut dec = Decoder::new(&data);
        Ok(IdSizes {
            field: dec.i32()? as usize,
            method: dec.i32()? as usize,
            object: dec.i32()? as usize,
            reference_type: dec.i32()? as usize,
            frame: dec.i32()? as usize,
        })
    }

    /// Loaded classes matching a JNI signature.
    pub fn classes_by_signature(&self, signature: &str) -> Result<Vec<ClassInfo>, Error> {
        let mut enc = Encoder::new();
        enc.put_string(signature);
        let data = self.request(vm::SET, vm::CLASSES_BY_SIGNATURE, enc.finish())?;

        let sizes = self.sizes();
        let mut dec = Decoder::new(&data);
        let count = dec.i32()?;
        let mut classes = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            classes.push(ClassInfo {
                ref_type_tag: dec.u8()?,
                type_id: dec.id(sizes.reference_type)?,
                status: dec.i32()?,
            });
        }
        Ok(classes)
    }

    /// Mirror a host string into the target VM.
    pub fn create_string(&self, value: &str) -> Result<ObjectId, Error> {
        let mut enc = Encoder::new();
        enc.put_string(value);
        let data = self.request(vm::SET, vm::CREATE_STRING, enc.finish())?;
        Decoder::new(&data).id(self.sizes().object)
    }

    pub fn resume(&self) -> Result<(), Error> {
        self.request(vm::SET, vm::RESUME, Bytes::new())?;
        Ok(())
    }

    pub fn dispose(&self) -> Result<(), Error> {
        self.request(vm::SET, vm::DISPOSE, Bytes::new())?;
        Ok(())
    }

    /// JNI signature of a reference type.
    pub fn type_signature(&self, type_id: ReferenceTypeId) -> Result<String, Error> {
        let mut enc = Encoder::new();
        enc.put_id(self.sizes().reference_type, type_id);
        let data = self.request(reference_type::SET, reference_type::SIGNATURE, enc.finish())?;
        Decoder::new(&data).string()
    }

    /// Fields declared by a reference type.
    pub fn fields(&self, type_id: ReferenceTypeId) -> Result<Vec<Field>, Error> {
        let sizes = self.sizes();
        let mut enc = Encoder::new();
        enc.put_id(sizes.reference_type, type_id);
        let data = self.request(reference_type::SET, reference_type::FIELDS, enc.finish())?;

        let mut dec = Decoder::new(&data);
        let count = dec.i32()?;
        let mut fields = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            fields.push(Field {
                id: dec.id(sizes.field)?,
                name: dec.string()?,
                signature: dec.string()?,
                mod_bits: dec.i32()?,
            });
        }
        Ok(fields)
    }

    /// Methods declared by a reference type.
    pub fn methods(&self, type_id: ReferenceTypeId) -> Result<Vec<Method>, Error> {
        let sizes = self.sizes();
        let mut enc = Encoder::new();
        enc.put_id(sizes.reference_type, type_id);
        let data = self.request(reference_type::SET, reference_type::METHODS, enc.finish())?;

        let mut dec = Decoder::new(&data);
        let count = dec.i32()?;
        let mut methods = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            methods.push(Method {
                id: dec.id(sizes.method)?,
                name: dec.string()?,
                signature: dec.string()?,
                mod_bits: dec.i32()?,
            });
        }
        Ok(methods)
    }

    /// Line number table of a method. Fails with an `ABSENT_INFORMATION`
    /// error code when the class was compiled without debug info.
    pub fn line_table(
        &self,
        class: ReferenceTypeId,
        method_id: MethodId,
    ) -> Result<LineTable, Error> {
        let sizes = self.sizes();
        let mut enc = Encoder::new();
        enc.put_id(sizes.reference_type, class);
        enc.put_id(sizes.method, method_id);
        let data = self.request(method::SET, method::LINE_TABLE, enc.finish())?;

        let mut dec = Decoder::new(&data);
        let start = dec.i64()?;
        let end = dec.i64()?;
        let count = dec.i32()?;
        let mut lines = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            let index = dec.i64()? as u64;
            let line = dec.i32()? as u32;
            lines.push((index, line));
        }
        Ok(LineTable { start, end, lines })
    }

    /// Variable table of a method (arguments and locals with their slots).
    pub fn variable_table(
        &self,
        class: ReferenceTypeId,
        method_id: MethodId,
    ) -> Result<VariableTable, Error> {
        let sizes = self.sizes();
        let mut enc = Encoder::new();
        enc.put_id(sizes.reference_type, class);
        enc.put_id(sizes.method, method_id);
        let data = self.request(method::SET, method::VARIABLE_TABLE, enc.finish())?;

        let mut dec = Decoder::new(&data);
        let arg_count = dec.i32()?;
        let count = dec.i32()?;
        let mut slots = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            slots.push(VarSlot {
                code_index: dec.i64()? as u64,
                name: dec.string()?,
                signature: dec.string()?,
                length: dec.i32()? as u32,
                slot: dec.i32()?,
            });
        }
        Ok(VariableTable { arg_count, slots })
    }

    /// Resume one suspended thread, leaving the rest of the VM as is.
    pub fn thread_resume(&self, thread: ThreadId) -> Result<(), Error> {
        let mut enc = Encoder::new();
        enc.put_id(self.sizes().object, thread);
        self.request(thread_reference::SET, thread_reference::RESUME, enc.finish())?;
        Ok(())
    }

    /// Call stack of a suspended thread, innermost frame first.
    pub fn frames(&self, thread: ThreadId) -> Result<Vec<FrameInfo>, Error> {
        let sizes = self.sizes();
        let mut enc = Encoder::new();
        enc.put_id(sizes.object, thread);
        enc.put_i32(0); // start frame
        enc.put_i32(-1); // all frames
        let data = self.request(thread_reference::SET, thread_reference::FRAMES, enc.finish())?;

        let mut dec = Decoder::new(&data);
        let count = dec.i32()?;
        let mut frames = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            frames.push(FrameInfo {
                id: dec.id(sizes.frame)?,
                location: dec.location(&sizes)?,
            });
        }
        Ok(frames)
    }

    /// Values of the given (slot, tag) pairs in a stack frame.
    pub fn frame_values(
        &self,
        thread: ThreadId,
        frame: FrameId,
        slots: &[(i32, u8)],
    ) -> Result<Vec<Value>, Error> {
        let sizes = self.sizes();
        let mut enc = Encoder::new();
        enc.put_id(sizes.object, thread);
        enc.put_id(sizes.frame, frame);
        enc.put_i32(slots.len() as i32);
        for (slot, tag) in slots {
            enc.put_i32(*slot);
            enc.put_u8(*tag);
        }
        let data = self.request(stack_frame::SET, stack_frame::GET_VALUES, enc.finish())?;

        let mut dec = Decoder::new(&data);
        let count = dec.i32()?;
        let mut values = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            values.push(dec.tagged_value(&sizes)?);
        }
        Ok(values)
    }

    /// Receiver object of a stack frame, `None` in static context.
    pub fn this_object(&self, thread: ThreadId, frame: FrameId) -> Result<Option<ObjectId>, Error> {
        let sizes = self.sizes();
        let mut enc = Encoder::new();
        enc.put_id(sizes.object, thread);
        enc.put_id(sizes.frame, frame);
        let data = self.request(stack_frame::SET, stack_frame::THIS_OBJECT, enc.finish())?;
        let value = Decoder::new(&data).tagged_value(&sizes)?;
        Ok(value.object_id())
    }

    /// Runtime reference type of an object.
    pub fn object_reference_type(&self, object: ObjectId) -> Result<ReferenceTypeId, Error> {
        let sizes = self.sizes();
        let mut enc = Encoder::new();
        enc.put_id(sizes.object, object);
        let data = self.request(
            object_reference::SET,
            object_reference::REFERENCE_TYPE,
            enc.finish(),
        )?;
        let mut dec = Decoder::new(&data);
        let _ref_type_tag = dec.u8()?;
        dec.id(sizes.reference_type)
    }

    /// Field values of an object.
    pub fn object_values(&self, object: ObjectId, fields: &[FieldId]) -> Result<Vec<Value>, Error> {
        let sizes = self.sizes();
        let mut enc = Encoder::new();
        enc.put_id(sizes.object, object);
        enc.put_i32(fields.len() as i32);
        for field in fields {
            enc.put_id(sizes.field, *field);
        }
        let data = self.request(
            object_reference::SET,
            object_reference::GET_VALUES,
            enc.finish(),
        )?;

        let mut dec = Decoder::new(&data);
        let count = dec.i32()?;
        let mut values = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            values.push(dec.tagged_value(&sizes)?);
        }
        Ok(values)
    }

    /// Invoke a method on an object in the suspended thread. Returns the
    /// result value and the id of a thrown exception (0 when none).
    pub fn invoke_method(
        &self,
        object: ObjectId,
        thread: ThreadId,
        class: ReferenceTypeId,
        method_id: MethodId,
        args: &[Value],
    ) -> Result<(Value, ObjectId), Error> {
        const INVOKE_SINGLE_THREADED: i32 = 0x02;

        let sizes = self.sizes();
        let mut enc = Encoder::new();
        enc.put_id(sizes.object, object);
        enc.put_id(sizes.object, thread);
        enc.put_id(sizes.reference_type, class);
        enc.put_id(sizes.method, method_id);
        enc.put_i32(args.len() as i32);
        for arg in args {
            enc.put_tagged_value(&sizes, arg);
        }
        enc.put_i32(INVOKE_SINGLE_THREADED);
        let data = self.request(
            object_reference::SET,
            object_reference::INVOKE_METHOD,
            enc.finish(),
        )?;

        let mut dec = Decoder::new(&data);
        let value = dec.tagged_value(&sizes)?;
        let exception = dec.tagged_value(&sizes)?;
        Ok((value, exception.object_id().unwrap_or(0)))
    }

    /// Contents of a `java.lang.String` mirror.
    pub fn string_value(&self, object: ObjectId) -> Result<String, Error> {
        let mut enc = Encoder::new();
        enc.put_id(self.sizes().object, object);
        let data = self.request(string_reference::SET, string_reference::VALUE, enc.finish())?;
        Decoder::new(&data).string()
    }

    /// Register an event request, returns its id.
    pub fn set_event_request(
        &self,
        kind: u8,
        suspend: u8,
        modifiers: &[Modifier],
    ) -> Result<RequestId, Error> {
        let sizes = self.sizes();
        let mut enc = Encoder::new();
        enc.put_u8(kind);
        enc.put_u8(suspend);
        enc.put_i32(modifiers.len() as i32);
        for modifier in modifiers {
            modifier.encode(&mut enc, &sizes);
        }
        let data = self.request(event_request::SET, event_request::CMD_SET, enc.finish())?;
        Decoder::new(&data).i32()
    }

    /// Remove an event request.
    pub fn clear_event_request(&self, kind: u8, request: RequestId) -> Result<(), Error> {
        let mut enc = Encoder::new();
        enc.put_u8(kind);
        enc.put_i32(request);
        self.request(event_request::SET, event_request::CMD_CLEAR, enc.finish())?;
        Ok(())
    }
}
