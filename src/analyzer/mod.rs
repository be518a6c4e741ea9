//! Static symbol analyzer for a Java source tree.
//!
//! `analyze` walks every `.java` file under a root twice: a pre-pass builds
//! the [`TypeEnv`] (declared simple names to binary names), the collection
//! pass emits raw records per file, then a linking pass classifies deferred
//! simple names and method calls against the collected declarations. The
//! finished table replaces the previous one atomically.

pub mod collect;
pub mod symbol;

use collect::{NameContext, RawSymbol, Span};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Arc, Mutex};
use symbol::{Symbol, SymbolClass, SymbolKey, SymbolKind, TypeEnv};
use tree_sitter::Parser;
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Language(#[from] tree_sitter::LanguageError),
    #[error("no symbol at {path}:{line}:{column}")]
    NoSymbol {
        path: String,
        line: usize,
        column: usize,
    },
    #[error("no declaration for {0}")]
    NoDeclaration(String),
}

/// One fully linked analysis result. Immutable once built.
#[derive(Debug, Default)]
pub struct SymbolTable {
    declarations: Vec<Symbol>,
    by_key: HashMap<String, usize>,
    references: Vec<Symbol>,
    /// Byte offset of each line start, per relative source path.
    line_starts: HashMap<String, Vec<usize>>,
}

impl SymbolTable {
    fn insert_declaration(&mut self, symbol: Symbol) {
        let key = symbol.key.to_string();
        match self.by_key.get(&key) {
            // later declaration with the same key wins
            Some(&index) => self.declarations[index] = symbol,
            None => {
                self.by_key.insert(key, self.declarations.len());
                self.declarations.push(symbol);
            }
        }
    }

    pub fn declarations(&self) -> &[Symbol] {
        &self.declarations
    }

    pub fn references(&self) -> &[Symbol] {
        &self.references
    }

    pub fn declaration_of(&self, key: &SymbolKey) -> Option<&Symbol> {
        self.by_key
            .get(&key.to_string())
            .map(|&index| &self.declarations[index])
    }

    /// Byte offset of a 1-based line and 0-based column in a file this table
    /// has seen.
    pub fn position_of(&self, source_path: &str, line: usize, column: usize) -> Option<usize> {
        let starts = self.line_starts.get(source_path)?;
        starts.get(line.checked_sub(1)?).map(|start| start + column)
    }

    /// Smallest declaration or reference span containing the byte offset.
    /// Declarations shadow references of the same length, earlier records
    /// shadow later ones.
    pub fn symbol_at(&self, source_path: &str, position: usize) -> Option<&Symbol> {
        let mut best: Option<&Symbol> = None;
        for symbol in self.declarations.iter().chain(&self.references) {
            if symbol.contains(source_path, position)
                && best.is_none_or(|b| symbol.length < b.length)
            {
                best = Some(symbol);
            }
        }
        best
    }
}

/// Rebuildable symbol table with position queries. Shared by the debugger
/// session, which swaps in a fresh table per `analyze` call.
pub struct Analyzer {
    table: Mutex<Arc<SymbolTable>>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self {
            table: Mutex::new(Arc::new(SymbolTable::default())),
        }
    }
}

impl Analyzer {
    pub fn table(&self) -> Arc<SymbolTable> {
        self.table.lock().expect("symbol table poisoned").clone()
    }

    /// Rebuild the table from every `.java` file under `root`.
    pub fn analyze(&self, root: &Path) -> Result<Arc<SymbolTable>, Error> {
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_java::LANGUAGE.into())?;

        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                Error::IO(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::Other, "walk failed")
                }))
            })?;
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "java")
            {
                let source = std::fs::read_to_string(entry.path())?;
                files.push((relative_path(root, entry.path()), source));
            }
        }

        // pre-pass: declared types across the whole tree
        let mut env = TypeEnv::default();
        let mut parsed = Vec::with_capacity(files.len());
        for (path, source) in files {
            let Some(tree) = parser.parse(&source, None) else {
                warn!(target: "analyzer", "parser gave up on {path}, file skipped");
                continue;
            };
            let (_, classes) = collect::scan_types(&tree, &source);
            for (simple, binary) in classes {
                env.insert(&simple, binary);
            }
            parsed.push((path, source, tree));
        }

        // collection pass
        let mut records = Vec::new();
        let mut table = SymbolTable::default();
        for (path, source, tree) in &parsed {
            table
                .line_starts
                .insert(path.clone(), line_starts(source));
            for record in collect::collect(tree, source, &env) {
                records.push((path.clone(), record));
            }
        }

        link(&mut table, records);
        info!(
            target: "analyzer",
            "analyzed {} files: {} declarations, {} references",
            parsed.len(),
            table.declarations.len(),
            table.references.len()
        );

        let table = Arc::new(table);
        *self.table.lock().expect("symbol table poisoned") = table.clone();
        Ok(table)
    }

    /// Symbol under a cursor.
    pub fn symbol_at(&self, path: &str, line: usize, column: usize) -> Result<Symbol, Error> {
        let table = self.table();
        let no_symbol = || Error::NoSymbol {
            path: path.to_string(),
            line,
            column,
        };
        let position = table.position_of(path, line, column).ok_or_else(no_symbol)?;
        table
            .symbol_at(path, position)
            .cloned()
            .ok_or_else(no_symbol)
    }

    /// Declaration of the symbol under a cursor.
    pub fn declaration_symbol(
        &self,
        path: &str,
        line: usize,
        column: usize,
    ) -> Result<Symbol, Error> {
        let symbol = self.symbol_at(path, line, column)?;
        if symbol.kind == SymbolKind::Declaration {
            return Ok(symbol);
        }
        self.table()
            .declaration_of(&symbol.key)
            .cloned()
            .ok_or_else(|| Error::NoDeclaration(symbol.key.to_string()))
    }
}

/// Turn raw records into table rows. Declarations and direct references go in
/// straight; deferred names are classified member-first then local, deferred
/// calls same-class first then any class.
fn link(table: &mut SymbolTable, records: Vec<(String, RawSymbol)>) {
    let mut members: HashMap<(String, String), SymbolKey> = HashMap::new();
    let mut methods_same: HashMap<(String, String), SymbolKey> = HashMap::new();
    let mut methods_any: HashMap<String, SymbolKey> = HashMap::new();
    let mut locals: HashSet<String> = HashSet::new();

    for (_, record) in &records {
        let RawSymbol::Declaration { key, .. } = record else {
            continue;
        };
        match key {
            SymbolKey::Member { class, name, .. } => {
                members.insert((class.clone(), name.clone()), key.clone());
            }
            SymbolKey::Method { class, name, .. } => {
                methods_same.insert((class.clone(), name.clone()), key.clone());
                methods_any.entry(name.clone()).or_insert_with(|| key.clone());
            }
            SymbolKey::Local { .. } => {
                locals.insert(key.to_string());
            }
            _ => {}
        }
    }

    for (path, record) in records {
        match record {
            RawSymbol::Declaration {
                class,
                name,
                key,
                span,
            } => {
                table.insert_declaration(make_symbol(
                    SymbolKind::Declaration,
                    class,
                    name,
                    key,
                    &path,
                    span,
                ));
            }
            RawSymbol::Reference {
                class,
                name,
                key,
                span,
            } => {
                table.references.push(make_symbol(
                    SymbolKind::Reference,
                    class,
                    name,
                    key,
                    &path,
                    span,
                ));
            }
            RawSymbol::DeferredName {
                name,
                context,
                span,
            } => match classify_name(&name, &context, &members, &locals) {
                Some((class, key)) => table.references.push(make_symbol(
                    SymbolKind::Reference,
                    class,
                    name,
                    key,
                    &path,
                    span,
                )),
                None => {
                    debug!(target: "analyzer", "unresolved name `{name}` in {path}:{}", span.line)
                }
            },
            RawSymbol::DeferredCall {
                name,
                context,
                span,
            } => {
                let key = methods_same
                    .get(&(context.class.clone(), name.clone()))
                    .or_else(|| methods_any.get(&name))
                    .cloned();
                match key {
                    Some(key) => table.references.push(make_symbol(
                        SymbolKind::Reference,
                        SymbolClass::Method,
                        name,
                        key,
                        &path,
                        span,
                    )),
                    None => debug!(
                        target: "analyzer",
                        "unresolved call `{name}` in {path}:{}", span.line
                    ),
                }
            }
        }
    }
}

fn classify_name(
    name: &str,
    context: &NameContext,
    members: &HashMap<(String, String), SymbolKey>,
    locals: &HashSet<String>,
) -> Option<(SymbolClass, SymbolKey)> {
    if let Some(key) = members.get(&(context.class.clone(), name.to_string())) {
        return Some((SymbolClass::Member, key.clone()));
    }
    if let Some((method, method_signature)) = &context.method {
        let key = SymbolKey::Local {
            class: context.class.clone(),
            method: method.clone(),
            method_signature: method_signature.clone(),
            name: name.to_string(),
        };
        if locals.contains(&key.to_string()) {
            return Some((SymbolClass::Local, key));
        }
    }
    None
}

fn make_symbol(
    kind: SymbolKind,
    class: SymbolClass,
    name: String,
    key: SymbolKey,
    path: &str,
    span: Span,
) -> Symbol {
    Symbol {
        kind,
        class,
        name,
        key,
        source_path: path.to_string(),
        position: span.position,
        length: span.length,
        line: span.line,
        column: span.column,
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    let mut out = String::new();
    for component in rel.components() {
        if !out.is_empty() {
            out.push('/');
        }
        let _ = write!(out, "{}", component.as_os_str().to_string_lossy());
    }
    out
}

fn line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    starts.extend(source.char_indices().filter_map(|(i, c)| (c == '\n').then_some(i + 1)));
    starts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_start_index() {
        let starts = line_starts("ab\ncd\n\nef");
        assert_eq!(starts, vec![0, 3, 6, 7]);
    }

    #[test]
    fn relative_paths_use_forward_slashes() {
        let root = Path::new("/tmp/src");
        let rel = relative_path(root, Path::new("/tmp/src/com/app/Main.java"));
        assert_eq!(rel, "com/app/Main.java");
    }
}
