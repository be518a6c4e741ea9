//! Live expression evaluation against a suspended thread.
//!
//! The expression is lowered to an access chain (see [`parse`]) and walked
//! with an [`Invoker`]: the unresolved root binds through `this`, the
//! receiver's fields, then the visible locals of the stopped frame; every
//! later segment resolves against the object the previous one produced.
//! Only the terminal segment may yield a primitive.

pub mod parse;

use super::snapshot::{self, ClassMetaCache};
use crate::jdwp::types::{
    parameter_descriptors, FrameInfo, ObjectId, ReferenceTypeId, ThreadId, Value,
};
use crate::jdwp::{self, Client};
use parse::{Access, Arg};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("cannot parse expression: {0}")]
    Parse(String),
    #[error("cannot resolve `{0}`")]
    Unresolved(String),
    #[error("`{0}` is not an object reference, cannot access `{1}` on it")]
    NotAnObject(String, String),
    #[error("no applicable method `{name}` with {arity} arguments")]
    NoSuchMethod { name: String, arity: usize },
    #[error("invocation of `{0}` threw an exception")]
    Exception(String),
    #[error(transparent)]
    Jdwp(#[from] jdwp::Error),
}

/// Host-side result of a terminal access.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EvalValue {
    Bool(bool),
    Int(i64),
    Double(f64),
    Char(char),
    Str(String),
    Null,
    /// Non-string object, rendered as `ClassName@id`.
    Display(String),
}

/// Everything the walk needs from the suspended session.
pub struct EvalContext<'a> {
    pub client: &'a Client,
    pub cache: &'a mut ClassMetaCache,
    pub thread: ThreadId,
    pub frame: FrameInfo,
}

pub fn evaluate(ctx: &mut EvalContext<'_>, expression: &str) -> Result<EvalValue, EvalError> {
    let chain = parse::parse(expression)?;
    let value = eval_chain(ctx, &chain)?;
    decode(ctx, &value)
}

/// Segment resolution target.
enum Invoker {
    /// Start of a chain, bound through the stopped frame.
    Root,
    /// An object reference produced by the previous segment.
    Bound {
        object: ObjectId,
        class: ReferenceTypeId,
    },
}

/// Walk a chain to its final raw value. Every non-final segment must
/// produce an object reference to bind the next one.
fn eval_chain(ctx: &mut EvalContext<'_>, chain: &[Access]) -> Result<Value, EvalError> {
    let mut invoker = Invoker::Root;
    let mut current = Value::Void;
    for (i, access) in chain.iter().enumerate() {
        current = step(ctx, &invoker, access)?;
        if i + 1 < chain.len() {
            let object = current
                .object_id()
                .ok_or_else(|| {
                    EvalError::NotAnObject(access.name.clone(), chain[i + 1].name.clone())
                })?;
            let class = ctx.client.object_reference_type(object)?;
            invoker = Invoker::Bound { object, class };
        }
    }
    Ok(current)
}

fn step(
    ctx: &mut EvalContext<'_>,
    invoker: &Invoker,
    access: &Access,
) -> Result<Value, EvalError> {
    match invoker {
        Invoker::Root => match &access.args {
            None => resolve_root(ctx, &access.name),
            // a bare call binds through the receiver
            Some(args) => {
                let object = this_object(ctx)?.ok_or_else(|| {
                    EvalError::Unresolved(access.name.clone())
                })?;
                let class = ctx.client.object_reference_type(object)?;
                invoke(ctx, object, class, &access.name, args)
            }
        },
        Invoker::Bound { object, class } => match &access.args {
            None => match field_value(ctx, *object, *class, &access.name)? {
                Some(value) => Ok(value),
                // field first, then a zero-argument method of the same name
                None => invoke(ctx, *object, *class, &access.name, &[]),
            },
            Some(args) => invoke(ctx, *object, *class, &access.name, args),
        },
    }
}

/// Root name resolution: `this`, then receiver fields, then visible locals.
fn resolve_root(ctx: &mut EvalContext<'_>, name: &str) -> Result<Value, EvalError> {
    let this = this_object(ctx)?;
    if name == "this" {
        return this
            .map(Value::Object)
            .ok_or_else(|| EvalError::Unresolved("this".to_string()));
    }

    if let Some(object) = this {
        let class = ctx.client.object_reference_type(object)?;
        if let Some(value) = field_value(ctx, object, class, name)? {
            return Ok(value);
        }
    }

    local_value(ctx, name)?.ok_or_else(|| EvalError::Unresolved(name.to_string()))
}

fn this_object(ctx: &mut EvalContext<'_>) -> Result<Option<ObjectId>, EvalError> {
    Ok(ctx.client.this_object(ctx.thread, ctx.frame.id)?)
}

/// Instance field of an object, by declared name.
fn field_value(
    ctx: &mut EvalContext<'_>,
    object: ObjectId,
    class: ReferenceTypeId,
    name: &str,
) -> Result<Option<Value>, EvalError> {
    let meta = ctx.cache.meta(ctx.client, class)?;
    let Some(field) = meta.fields.iter().find(|f| f.name == name && !f.is_static()) else {
        return Ok(None);
    };
    let values = ctx.client.object_values(object, &[field.id])?;
    Ok(values.into_iter().next())
}

/// A local of the stopped frame that is live at its code index.
fn local_value(ctx: &mut EvalContext<'_>, name: &str) -> Result<Option<Value>, EvalError> {
    let location = ctx.frame.location;
    let table = ctx.client.variable_table(location.class, location.method)?;
    let Some(slot) = table
        .slots
        .iter()
        .find(|s| s.name == name && (s.slot < table.arg_count || s.visible_at(location.index)))
    else {
        return Ok(None);
    };
    let tag = slot.signature.as_bytes().first().copied().unwrap_or(b'L');
    let values = ctx
        .client
        .frame_values(ctx.thread, ctx.frame.id, &[(slot.slot, tag)])?;
    Ok(values.into_iter().next())
}

/// Invoke the first declared method whose name and arity match and whose
/// parameters accept the coerced arguments.
fn invoke(
    ctx: &mut EvalContext<'_>,
    object: ObjectId,
    class: ReferenceTypeId,
    name: &str,
    args: &[Arg],
) -> Result<Value, EvalError> {
    let meta = ctx.cache.meta(ctx.client, class)?;
    let candidates: Vec<_> = meta
        .methods
        .iter()
        .filter(|m| m.name == name)
        .map(|m| (m.id, parameter_descriptors(&m.signature)))
        .collect();

    for (method_id, descriptors) in candidates {
        if descriptors.len() != args.len() {
            continue;
        }
        let mut coerced = Vec::with_capacity(args.len());
        for (arg, descriptor) in args.iter().zip(&descriptors) {
            match coerce_argument(ctx, arg, descriptor)? {
                Some(value) => coerced.push(value),
                None => break,
            }
        }
        if coerced.len() != args.len() {
            continue;
        }

        let (value, exception) =
            ctx.client
                .invoke_method(object, ctx.thread, class, method_id, &coerced)?;
        if exception != 0 {
            return Err(EvalError::Exception(name.to_string()));
        }
        return Ok(value);
    }

    Err(EvalError::NoSuchMethod {
        name: name.to_string(),
        arity: args.len(),
    })
}

/// Shape an argument to one parameter descriptor. `Ok(None)` means the
/// argument cannot fit this overload.
fn coerce_argument(
    ctx: &mut EvalContext<'_>,
    arg: &Arg,
    descriptor: &str,
) -> Result<Option<Value>, EvalError> {
    let value = match (arg, descriptor) {
        (Arg::Bool(v), "Z") => Value::Boolean(*v),
        (Arg::Int(v), "B") => Value::Byte(*v as i8),
        (Arg::Int(v), "S") => Value::Short(*v as i16),
        (Arg::Int(v), "I") => Value::Int(*v as i32),
        (Arg::Int(v), "J") => Value::Long(*v),
        (Arg::Int(v), "F") => Value::Float(*v as f32),
        (Arg::Int(v), "D") => Value::Double(*v as f64),
        (Arg::Double(v), "F") => Value::Float(*v as f32),
        (Arg::Double(v), "D") => Value::Double(*v),
        (Arg::Char(v), "C") => Value::Char(*v as u16),
        (Arg::Str(v), "Ljava/lang/String;") => {
            let id = ctx.client.create_string(v)?;
            Value::String(id)
        }
        (Arg::Chain(chain), descriptor)
            if descriptor.starts_with('L') || descriptor.starts_with('[') =>
        {
            let value = eval_chain(ctx, chain)?;
            if !value.is_reference() {
                return Ok(None);
            }
            value
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// Decode a terminal value to its host representation.
fn decode(ctx: &mut EvalContext<'_>, value: &Value) -> Result<EvalValue, EvalError> {
    Ok(match value {
        Value::Void => EvalValue::Null,
        Value::Boolean(v) => EvalValue::Bool(*v),
        Value::Byte(v) => EvalValue::Int(*v as i64),
        Value::Short(v) => EvalValue::Int(*v as i64),
        Value::Int(v) => EvalValue::Int(*v as i64),
        Value::Long(v) => EvalValue::Int(*v),
        Value::Float(v) => EvalValue::Double(*v as f64),
        Value::Double(v) => EvalValue::Double(*v),
        Value::Char(v) => match char::from_u32(*v as u32) {
            Some(c) => EvalValue::Char(c),
            None => EvalValue::Display(format!("\\u{v:04x}")),
        },
        Value::String(0) | Value::Object(0) | Value::Array(0) | Value::Thread(0) => EvalValue::Null,
        Value::String(id) => EvalValue::Str(ctx.client.string_value(*id)?),
        reference => {
            EvalValue::Display(snapshot::render_value(ctx.client, ctx.cache, reference)?)
        }
    })
}
