//! Symbols and their structural keys.
//!
//! A [`SymbolKey`] identifies a declaration site across files without name
//! collisions. It is built from JNI-style descriptors so that keys computed
//! statically (from source) and keys computed at runtime (from raw JDWP
//! signatures) are directly comparable.

use serde::ser::Serializer;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "camelCase")]
pub enum SymbolKind {
    Declaration,
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "camelCase")]
pub enum SymbolClass {
    Package,
    Type,
    Member,
    Local,
    Method,
}

/// Structural, signature-based identifier of a declaration or reference.
///
/// Canonical display forms (shared with the debugger's snapshot builder):
///
/// * type:   `LTest;`
/// * method: `LTest;.run()V`
/// * member: `LTest;.count)I`
/// * local:  `LTest;.main([Ljava/lang/String;)V#args`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolKey {
    Package {
        name: String,
    },
    Type {
        class: String,
    },
    Method {
        class: String,
        name: String,
        signature: String,
    },
    Member {
        class: String,
        name: String,
        signature: String,
    },
    Local {
        class: String,
        method: String,
        method_signature: String,
        name: String,
    },
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKey::Package { name } => write!(f, "{name}"),
            SymbolKey::Type { class } => write!(f, "{class}"),
            SymbolKey::Method {
                class,
                name,
                signature,
            } => write!(f, "{class}.{name}{signature}"),
            SymbolKey::Member {
                class,
                name,
                signature,
            } => write!(f, "{class}.{name}){signature}"),
            SymbolKey::Local {
                class,
                method,
                method_signature,
                name,
            } => write!(f, "{class}.{method}{method_signature}#{name}"),
        }
    }
}

impl Serialize for SymbolKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A declaration or reference with its exact source span.
#[derive(Debug, Clone, Serialize)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub class: SymbolClass,
    pub name: String,
    pub key: SymbolKey,
    /// Path relative to the analyzed root, forward slashes.
    pub source_path: String,
    /// Byte offset of the span start.
    pub position: usize,
    pub length: usize,
    /// 1-based line of the span start.
    pub line: usize,
    /// 0-based column of the span start.
    pub column: usize,
}

impl Symbol {
    /// True when the span contains the byte offset (bounds inclusive).
    pub fn contains(&self, source_path: &str, position: usize) -> bool {
        self.source_path == source_path
            && position >= self.position
            && position <= self.position + self.length
    }
}

/// Declared types visible to descriptor resolution, collected in a pre-pass
/// over the whole source tree.
#[derive(Debug, Default)]
pub struct TypeEnv {
    /// Simple name -> binary name with `/` separators (`foo/Bar`).
    classes: HashMap<String, String>,
}

/// `java.lang` types resolvable without an import.
const JAVA_LANG: &[&str] = &[
    "Boolean",
    "Byte",
    "Character",
    "Double",
    "Exception",
    "Float",
    "Integer",
    "Long",
    "Object",
    "Runnable",
    "RuntimeException",
    "Short",
    "String",
    "StringBuilder",
    "System",
    "Thread",
    "Throwable",
];

impl TypeEnv {
    pub fn insert(&mut self, simple_name: &str, binary_name: String) {
        self.classes.insert(simple_name.to_string(), binary_name);
    }

    /// JNI descriptor of a declared source type: `int` -> `I`,
    /// `String[]` -> `[Ljava/lang/String;`, a project class -> its binary
    /// signature. Unknown bare names fall back to the default package.
    pub fn descriptor(&self, source_type: &str) -> String {
        let trimmed = source_type.trim();

        // erase generic arguments
        let erased = match trimmed.find('<') {
            Some(lt) => {
                let gt = trimmed.rfind('>').map(|i| i + 1).unwrap_or(trimmed.len());
                format!("{}{}", &trimmed[..lt], &trimmed[gt..])
            }
            None => trimmed.to_string(),
        };

        let mut dims = 0;
        let mut base = erased.trim();
        while let Some(stripped) = base.strip_suffix("[]") {
            dims += 1;
            base = stripped.trim_end();
        }
        if let Some(stripped) = base.strip_suffix("...") {
            dims += 1;
            base = stripped.trim_end();
        }

        let desc = match base {
            "boolean" => "Z".to_string(),
            "byte" => "B".to_string(),
            "char" => "C".to_string(),
            "short" => "S".to_string(),
            "int" => "I".to_string(),
            "long" => "J".to_string(),
            "float" => "F".to_string(),
            "double" => "D".to_string(),
            "void" => "V".to_string(),
            qualified if qualified.contains('.') => {
                format!("L{};", qualified.replace('.', "/"))
            }
            simple => {
                if let Some(binary) = self.classes.get(simple) {
                    format!("L{binary};")
                } else if JAVA_LANG.contains(&simple) {
                    format!("Ljava/lang/{simple};")
                } else {
                    format!("L{simple};")
                }
            }
        };
        format!("{}{desc}", "[".repeat(dims))
    }

    /// JNI method signature from declared parameter and return types.
    pub fn method_signature(&self, parameter_types: &[String], return_type: &str) -> String {
        let params: String = parameter_types.iter().map(|p| self.descriptor(p)).collect();
        format!("({params}){}", self.descriptor(return_type))
    }
}
