//! Suspension snapshot: where the debuggee stopped and what is visible
//! there.
//!
//! Built once per breakpoint/step event, under the session lock, and served
//! to callers until the debuggee resumes.

use super::error::Error;
use crate::analyzer::symbol::SymbolKey;
use crate::jdwp::types::{
    class_name_from_signature, type_name_from_descriptor, Field, LineTable, Method, MethodId,
    ObjectId, ReferenceTypeId, ThreadId, Value,
};
use crate::jdwp::{self, Client};
use crate::weak_error;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Source position of one stack frame.
#[derive(Debug, Clone, Serialize)]
pub struct Location {
    /// Source path derived from the class binary name.
    pub source_path: String,
    pub line: u32,
    pub method: String,
}

/// Innermost frame first.
pub type CallStack = Vec<Location>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "camelCase")]
pub enum VariableKind {
    Local,
    Member,
    StaticMember,
    Global,
}

/// One visible value at the suspension point.
#[derive(Debug, Clone, Serialize)]
pub struct Variable {
    pub kind: VariableKind,
    pub type_name: String,
    pub name: String,
    pub value: String,
    pub key: SymbolKey,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub location: Location,
    pub stack: CallStack,
    pub variables: Vec<Variable>,
}

/// Class metadata mirrored from the target, fetched once per reference type
/// and kept for the lifetime of the session.
#[derive(Debug)]
pub struct ClassMeta {
    pub signature: String,
    pub class_name: String,
    pub source_path: String,
    pub methods: Vec<Method>,
    pub fields: Vec<Field>,
}

impl ClassMeta {
    pub fn method(&self, id: MethodId) -> Option<&Method> {
        self.methods.iter().find(|m| m.id == id)
    }
}

#[derive(Debug, Default)]
pub struct ClassMetaCache {
    classes: HashMap<ReferenceTypeId, Arc<ClassMeta>>,
    line_tables: HashMap<(ReferenceTypeId, MethodId), LineTable>,
}

impl ClassMetaCache {
    pub fn clear(&mut self) {
        self.classes.clear();
        self.line_tables.clear();
    }

    pub fn meta(
        &mut self,
        client: &Client,
        type_id: ReferenceTypeId,
    ) -> Result<Arc<ClassMeta>, jdwp::Error> {
        if let Some(meta) = self.classes.get(&type_id) {
            return Ok(meta.clone());
        }
        let signature = client.type_signature(type_id)?;
        let class_name = class_name_from_signature(&signature);
        let meta = Arc::new(ClassMeta {
            source_path: source_path_of(&class_name),
            methods: client.methods(type_id)?,
            fields: client.fields(type_id)?,
            signature,
            class_name,
        });
        self.classes.insert(type_id, meta.clone());
        Ok(meta)
    }

    pub fn line_table(
        &mut self,
        client: &Client,
        class: ReferenceTypeId,
        method: MethodId,
    ) -> Result<&LineTable, jdwp::Error> {
        if !self.line_tables.contains_key(&(class, method)) {
            let table = client.line_table(class, method)?;
            self.line_tables.insert((class, method), table);
        }
        Ok(&self.line_tables[&(class, method)])
    }
}

/// Source path of a dotted binary class name: inner-class suffix stripped,
/// `.java` appended. `com.app.Main$Inner` -> `com/app/Main.java`.
pub fn source_path_of(class_name: &str) -> String {
    let outer = class_name.split('$').next().unwrap_or(class_name);
    format!("{}.java", outer.replace('.', "/"))
}

/// Build the snapshot for a thread suspended at an event location.
pub fn build(
    client: &Client,
    cache: &mut ClassMetaCache,
    thread: ThreadId,
) -> Result<Snapshot, Error> {
    let frames = client.frames(thread)?;
    if frames.is_empty() {
        return Err(Error::NoSuspendedThread);
    }

    let mut stack = CallStack::with_capacity(frames.len());
    for frame in &frames {
        let meta = cache.meta(client, frame.location.class)?;
        let method = meta.method(frame.location.method);
        let line = weak_error!(
            cache.line_table(client, frame.location.class, frame.location.method),
            "line table unavailable:"
        )
        .and_then(|table| table.line_of_index(frame.location.index))
        .unwrap_or(0);
        stack.push(Location {
            source_path: meta.source_path.clone(),
            line,
            method: method.map(|m| m.name.clone()).unwrap_or_default(),
        });
    }

    let innermost = &frames[0];
    let meta = cache.meta(client, innermost.location.class)?;
    let mut variables = Vec::new();

    if let Some(method) = meta.method(innermost.location.method).cloned() {
        let table = weak_error!(
            client.variable_table(innermost.location.class, method.id),
            "variable table unavailable:"
        )
        .unwrap_or_default();

        let index = innermost.location.index;
        let mut slots = Vec::new();
        // method arguments first, then every local live at the stop index;
        // arguments inside their live range appear in both groups
        for slot in &table.slots {
            if slot.slot < table.arg_count && slot.name != "this" {
                slots.push(slot);
            }
        }
        for slot in &table.slots {
            if slot.slot >= table.arg_count && slot.visible_at(index) && slot.name != "this" {
                slots.push(slot);
            }
        }

        let request: Vec<(i32, u8)> = slots
            .iter()
            .map(|s| (s.slot, s.signature.as_bytes().first().copied().unwrap_or(b'L')))
            .collect();
        if !request.is_empty() {
            let values = client.frame_values(thread, innermost.id, &request)?;
            for (slot, value) in slots.iter().zip(values) {
                variables.push(Variable {
                    kind: VariableKind::Local,
                    type_name: type_name_from_descriptor(&slot.signature),
                    name: slot.name.clone(),
                    value: render_value(client, cache, &value)?,
                    key: SymbolKey::Local {
                        class: meta.signature.clone(),
                        method: method.name.clone(),
                        method_signature: method.signature.clone(),
                        name: slot.name.clone(),
                    },
                });
            }
        }
    }

    if let Some(this) = client.this_object(thread, innermost.id)? {
        variables.extend(receiver_fields(client, cache, this)?);
    }

    Ok(Snapshot {
        location: stack[0].clone(),
        stack,
        variables,
    })
}

/// Instance fields of the receiver, typed by its runtime class.
fn receiver_fields(
    client: &Client,
    cache: &mut ClassMetaCache,
    this: ObjectId,
) -> Result<Vec<Variable>, Error> {
    let runtime_type = client.object_reference_type(this)?;
    let meta = cache.meta(client, runtime_type)?;

    let fields: Vec<&Field> = meta.fields.iter().filter(|f| !f.is_static()).collect();
    if fields.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<_> = fields.iter().map(|f| f.id).collect();
    let values = client.object_values(this, &ids)?;

    let mut variables = Vec::with_capacity(fields.len());
    for (field, value) in fields.iter().zip(values) {
        variables.push(Variable {
            kind: VariableKind::Member,
            type_name: type_name_from_descriptor(&field.signature),
            name: field.name.clone(),
            value: render_value(client, cache, &value)?,
            key: SymbolKey::Member {
                class: meta.signature.clone(),
                name: field.name.clone(),
                signature: field.signature.clone(),
            },
        });
    }
    Ok(variables)
}

/// Human-readable rendering of a mirrored value. Strings are quoted, other
/// references render as `ClassName@id`.
pub fn render_value(
    client: &Client,
    cache: &mut ClassMetaCache,
    value: &Value,
) -> Result<String, jdwp::Error> {
    Ok(match value {
        Value::Void => "void".to_string(),
        Value::Boolean(v) => v.to_string(),
        Value::Byte(v) => v.to_string(),
        Value::Char(v) => match char::from_u32(*v as u32) {
            Some(c) => c.to_string(),
            None => format!("\\u{v:04x}"),
        },
        Value::Short(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::String(0) | Value::Object(0) | Value::Array(0) | Value::Thread(0) => {
            "null".to_string()
        }
        Value::String(id) => format!("\"{}\"", client.string_value(*id)?),
        Value::Object(id) | Value::Array(id) | Value::Thread(id) => {
            let runtime_type = client.object_reference_type(*id)?;
            let meta = cache.meta(client, runtime_type)?;
            format!("{}@{id}", meta.class_name)
        }
    })
}
