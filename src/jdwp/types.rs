//! Identifiers, tags and value mirrors of the JDWP data model.

/// All ids are widened to u64 in memory, the codec narrows them to the
/// width negotiated with `VirtualMachine::IDSizes` on the wire.
pub type ObjectId = u64;
pub type ThreadId = u64;
pub type ReferenceTypeId = u64;
pub type MethodId = u64;
pub type FieldId = u64;
pub type FrameId = u64;
pub type RequestId = i32;

/// Field widths reported by the target VM.
#[derive(Debug, Clone, Copy)]
pub struct IdSizes {
    pub field: usize,
    pub method: usize,
    pub object: usize,
    pub reference_type: usize,
    pub frame: usize,
}

impl Default for IdSizes {
    fn default() -> Self {
        Self {
            field: 8,
            method: 8,
            object: 8,
            reference_type: 8,
            frame: 8,
        }
    }
}

/// Value type tags (JDWP `Tag` constants).
pub mod tag {
    pub const ARRAY: u8 = b'[';
    pub const BYTE: u8 = b'B';
    pub const CHAR: u8 = b'C';
    pub const OBJECT: u8 = b'L';
    pub const FLOAT: u8 = b'F';
    pub const DOUBLE: u8 = b'D';
    pub const INT: u8 = b'I';
    pub const LONG: u8 = b'J';
    pub const SHORT: u8 = b'S';
    pub const VOID: u8 = b'V';
    pub const BOOLEAN: u8 = b'Z';
    pub const STRING: u8 = b's';
    pub const THREAD: u8 = b't';
    pub const THREAD_GROUP: u8 = b'g';
    pub const CLASS_LOADER: u8 = b'l';
    pub const CLASS_OBJECT: u8 = b'c';
}

/// Event kind constants (JDWP `EventKind`).
pub mod event_kind {
    pub const SINGLE_STEP: u8 = 1;
    pub const BREAKPOINT: u8 = 2;
    pub const CLASS_PREPARE: u8 = 8;
    pub const METHOD_ENTRY: u8 = 40;
    pub const METHOD_EXIT: u8 = 41;
    pub const VM_START: u8 = 90;
    pub const VM_DEATH: u8 = 99;
}

/// Event suspend policy constants.
pub mod suspend_policy {
    pub const NONE: u8 = 0;
    pub const EVENT_THREAD: u8 = 1;
    pub const ALL: u8 = 2;
}

/// Step request granularity and direction.
pub mod step {
    pub const SIZE_LINE: i32 = 1;
    pub const DEPTH_INTO: i32 = 0;
    pub const DEPTH_OVER: i32 = 1;
    pub const DEPTH_OUT: i32 = 2;
}

/// A tagged value mirrored from the target VM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Void,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    /// Plain object reference, id 0 means null.
    Object(ObjectId),
    /// `java.lang.String` instance.
    String(ObjectId),
    Array(ObjectId),
    Thread(ObjectId),
}

impl Value {
    /// Wire tag of this value.
    pub fn tag(&self) -> u8 {
        match self {
            Value::Void => tag::VOID,
            Value::Boolean(_) => tag::BOOLEAN,
            Value::Byte(_) => tag::BYTE,
            Value::Char(_) => tag::CHAR,
            Value::Short(_) => tag::SHORT,
            Value::Int(_) => tag::INT,
            Value::Long(_) => tag::LONG,
            Value::Float(_) => tag::FLOAT,
            Value::Double(_) => tag::DOUBLE,
            Value::Object(_) => tag::OBJECT,
            Value::String(_) => tag::STRING,
            Value::Array(_) => tag::ARRAY,
            Value::Thread(_) => tag::THREAD,
        }
    }

    /// Object id behind a reference value, `None` for primitives and null.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) | Value::String(id) | Value::Array(id) | Value::Thread(id) => {
                (*id != 0).then_some(*id)
            }
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Value::Object(_) | Value::String(_) | Value::Array(_) | Value::Thread(_)
        )
    }
}

/// Executable code position inside the target VM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub type_tag: u8,
    pub class: ReferenceTypeId,
    pub method: MethodId,
    pub index: u64,
}

/// One class known to the target VM.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub ref_type_tag: u8,
    pub type_id: ReferenceTypeId,
    pub status: i32,
}

/// Field metadata (`ReferenceType::Fields`).
#[derive(Debug, Clone)]
pub struct Field {
    pub id: FieldId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

pub const ACC_STATIC: i32 = 0x0008;

impl Field {
    pub fn is_static(&self) -> bool {
        self.mod_bits & ACC_STATIC != 0
    }
}

/// Method metadata (`ReferenceType::Methods`).
#[derive(Debug, Clone)]
pub struct Method {
    pub id: MethodId,
    pub name: String,
    pub signature: String,
    pub mod_bits: i32,
}

/// Code-index to source-line mapping of one method.
#[derive(Debug, Clone, Default)]
pub struct LineTable {
    pub start: i64,
    pub end: i64,
    /// (code index, line number), ordered by code index.
    pub lines: Vec<(u64, u32)>,
}

impl LineTable {
    /// First executable code index of `line`, if the method covers it.
    pub fn index_of_line(&self, line: u32) -> Option<u64> {
        self.lines
            .iter()
            .find(|(_, l)| *l == line)
            .map(|(idx, _)| *idx)
    }

    /// Source line of a code index: the greatest table entry not after it.
    pub fn line_of_index(&self, index: u64) -> Option<u32> {
        self.lines
            .iter()
            .take_while(|(idx, _)| *idx <= index)
            .last()
            .map(|(_, line)| *line)
    }
}

/// One slot of a method variable table (`Method::VariableTable`).
#[derive(Debug, Clone)]
pub struct VarSlot {
    pub code_index: u64,
    pub name: String,
    pub signature: String,
    pub length: u32,
    pub slot: i32,
}

impl VarSlot {
    /// True when the slot holds a live value at `index`.
    pub fn visible_at(&self, index: u64) -> bool {
        index >= self.code_index && index < self.code_index + self.length as u64
    }
}

#[derive(Debug, Clone, Default)]
pub struct VariableTable {
    /// Number of argument words, argument slots are numbered below it.
    pub arg_count: i32,
    pub slots: Vec<VarSlot>,
}

/// One frame of a suspended thread (`ThreadReference::Frames`).
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    pub id: FrameId,
    pub location: Location,
}

/// Human-readable class name from a JNI signature: `Lfoo/Bar;` -> `foo.Bar`.
pub fn class_name_from_signature(sig: &str) -> String {
    sig.trim_start_matches('L')
        .trim_end_matches(';')
        .replace('/', ".")
}

/// JNI signature from a dotted binary name: `foo.Bar` -> `Lfoo/Bar;`.
pub fn signature_from_class_name(name: &str) -> String {
    format!("L{};", name.replace('.', "/"))
}

/// Display name of a declared type from its JNI descriptor: `I` -> `int`,
/// `[Ljava/lang/String;` -> `java.lang.String[]`.
pub fn type_name_from_descriptor(desc: &str) -> String {
    let mut dims = 0;
    let mut rest = desc;
    while let Some(stripped) = rest.strip_prefix('[') {
        dims += 1;
        rest = stripped;
    }
    let base = match rest.as_bytes().first() {
        Some(b'B') => "byte".to_string(),
        Some(b'C') => "char".to_string(),
        Some(b'D') => "double".to_string(),
        Some(b'F') => "float".to_string(),
        Some(b'I') => "int".to_string(),
        Some(b'J') => "long".to_string(),
        Some(b'S') => "short".to_string(),
        Some(b'Z') => "boolean".to_string(),
        Some(b'V') => "void".to_string(),
        Some(b'L') => class_name_from_signature(rest),
        _ => rest.to_string(),
    };
    format!("{}{}", base, "[]".repeat(dims))
}

/// Parameter descriptors of a JNI method signature: `(I[JLfoo/Bar;)V` ->
/// `["I", "[J", "Lfoo/Bar;"]`.
pub fn parameter_descriptors(sig: &str) -> Vec<String> {
    let inner = sig
        .strip_prefix('(')
        .and_then(|s| s.split_once(')'))
        .map(|(params, _)| params)
        .unwrap_or_default();

    let mut params = Vec::new();
    let bytes = inner.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while bytes[i] == b'[' {
            i += 1;
            if i >= bytes.len() {
                return params;
            }
        }
        if bytes[i] == b'L' {
            match inner[i..].find(';') {
                Some(end) => i += end + 1,
                None => return params,
            }
        } else {
            i += 1;
        }
        params.push(inner[start..i].to_string());
    }
    params
}
