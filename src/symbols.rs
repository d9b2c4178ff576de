//! # Symbols
//!
//! Translation between machine addresses and source coordinates.
//!
//! A [`SymbolTable`] is built once from three sections of the executable:
//!
//! - `.debug_line`, the DWARF line table, decoded with [`gimli`]
//! - `.symtab`, the symbol table, for function names and their address ranges
//! - `.text`, whose bytes are kept to check instruction boundaries
//!
//! After construction the table is never mutated. The only adjustment is [`SymbolTable::rebase`],
//! which is applied once when the debuggee was loaded at a different address than it was
//! linked for.

use std::borrow::Cow;
use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::Display;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use gimli::Reader as _;
use object::{Object, ObjectKind, ObjectSection, ObjectSegment, ObjectSymbol};
use tracing::{debug, info, trace};

use crate::addr::Addr;
use crate::disassemble;
use crate::errors::{DebuggerError, Result};

// the gimli::Reader we use
type GimliRd = gimli::EndianRcSlice<gimli::RunTimeEndian>;

const PAGE_SIZE: u64 = 0x1000;

/// Index into the interned file names of a [`SymbolTable`]
pub type FileId = usize;

/// A position in the source code, lines start at 1
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)
    }
}

/// One row of the line table, valid from `address` up to the next row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRow {
    /// Link-time address
    pub address: u64,
    /// `None` if the row names no usable file
    pub file: Option<FileId>,
    /// `0` means the code belongs to no source line
    pub line: usize,
    pub is_stmt: bool,
    /// Marks the first address after a sequence of rows
    pub end_sequence: bool,
}

impl LineRow {
    pub fn new(address: u64, file: FileId, line: usize) -> Self {
        Self {
            address,
            file: Some(file),
            line,
            is_stmt: true,
            end_sequence: false,
        }
    }

    pub fn end_of_sequence(address: u64) -> Self {
        Self {
            address,
            file: None,
            line: 0,
            is_stmt: false,
            end_sequence: true,
        }
    }

    fn has_source(&self) -> bool {
        !self.end_sequence && self.file.is_some() && self.line != 0
    }
}

/// A function from the symbol table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    /// Demangled name without hash, for example `hello::main` or `main.main`
    pub name: String,
    /// The name as it is stored in the symbol table
    pub linkage_name: String,
    /// Link-time address of the first instruction
    pub address: u64,
    pub size: u64,
}

impl Function {
    pub fn new(name: impl Into<String>, address: u64, size: u64) -> Self {
        let name = name.into();
        Self {
            linkage_name: name.clone(),
            name,
            address,
            size,
        }
    }

    fn contains(&self, address: u64) -> bool {
        self.address <= address && address < self.address.saturating_add(self.size)
    }
}

/// The `.text` section: its link-time address and contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSection {
    pub address: u64,
    pub data: Vec<u8>,
}

impl TextSection {
    /// Link-time addresses covered by the section
    pub fn range(&self) -> Range<u64> {
        self.address..self.address + self.data.len() as u64
    }
}

/// Immutable lookup tables for one executable
#[derive(Debug, Clone)]
pub struct SymbolTable {
    files: Vec<PathBuf>,
    /// sorted by address, end of sequence markers before rows starting at the same address
    rows: Vec<LineRow>,
    /// sorted by address
    functions: Vec<Function>,
    text: TextSection,
    image_base: u64,
    position_independent: bool,
    load_bias: u64,
}

impl SymbolTable {
    /// Builds a table from already decoded parts
    ///
    /// The parts may come in any order. The image base is the page the `.text` section starts
    /// in, and the executable is assumed to be loaded where it was linked.
    pub fn from_parts(
        files: Vec<PathBuf>,
        mut rows: Vec<LineRow>,
        mut functions: Vec<Function>,
        text: TextSection,
    ) -> Self {
        // stable, rows at one address keep the order of the line program
        rows.sort_by_key(|r| (r.address, !r.end_sequence));
        functions.sort_by_key(|f| f.address);
        Self {
            files,
            rows,
            functions,
            image_base: text.address & !(PAGE_SIZE - 1),
            text,
            position_independent: false,
            load_bias: 0,
        }
    }

    /// Loads the symbols of the executable at `path`
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed, or if it lacks a `.text`, `.symtab` or
    /// `.debug_line` section.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path)?;
        let object = object::File::parse(&*raw)?;

        let text = object
            .section_by_name(".text")
            .ok_or(DebuggerError::MissingSection(".text"))?;
        if object.section_by_name(".symtab").is_none() {
            return Err(DebuggerError::MissingSection(".symtab"));
        }
        if object.section_by_name(".debug_line").is_none() {
            return Err(DebuggerError::MissingSection(".debug_line"));
        }
        let text = TextSection {
            address: text.address(),
            data: text.uncompressed_data()?.into_owned(),
        };

        let functions = read_functions(&object);
        let (files, rows) = read_line_table(&object)?;
        let rows = live_sequences(rows, text.range());
        info!(
            "loaded {} functions and {} line table rows in {} files from {}",
            functions.len(),
            rows.len(),
            files.len(),
            path.display()
        );

        let mut table = Self::from_parts(files, rows, functions, text);
        if let Some(lowest) = object.segments().map(|s| s.address()).min() {
            table.image_base = lowest & !(PAGE_SIZE - 1);
        }
        table.position_independent = object.kind() == ObjectKind::Dynamic;
        Ok(table)
    }

    /// Moves every address of the table by `bias`
    ///
    /// Used once after the debuggee was launched. All queries take and return runtime
    /// addresses afterwards.
    #[must_use]
    pub fn rebase(mut self, bias: u64) -> Self {
        debug!("rebasing symbols by {bias:#x}");
        self.load_bias = bias;
        self
    }

    /// Where the executable expects its first segment
    pub fn image_base(&self) -> Addr {
        self.image_base.into()
    }

    /// Whether the executable can be loaded anywhere, so its addresses need a load bias
    pub fn is_position_independent(&self) -> bool {
        self.position_independent
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    fn to_static(&self, addr: Addr) -> Option<u64> {
        addr.u64().checked_sub(self.load_bias)
    }

    fn to_runtime(&self, address: u64) -> Addr {
        (address + self.load_bias).into()
    }

    fn file_id(&self, name: &Path) -> Result<FileId> {
        if let Some(id) = self.files.iter().position(|f| f == name) {
            return Ok(id);
        }

        let candidates: Vec<FileId> = self
            .files
            .iter()
            .enumerate()
            .filter(|(_, f)| f.ends_with(name))
            .map(|(id, _)| id)
            .collect();
        match candidates.as_slice() {
            [id] => Ok(*id),
            [] => Err(DebuggerError::UnknownFile(name.display().to_string())),
            _ => Err(DebuggerError::AmbiguousFile {
                name: name.display().to_string(),
                candidates: candidates.iter().map(|id| self.files[*id].clone()).collect(),
            }),
        }
    }

    /// The path the line table uses for the file called `name`
    ///
    /// `name` matches a file with exactly that path, or else the single file whose path ends
    /// with the components of `name`.
    pub fn resolve_file(&self, name: impl AsRef<Path>) -> Result<&Path> {
        Ok(&self.files[self.file_id(name.as_ref())?])
    }

    /// Address of the first instruction of the function called `name`
    pub fn function_entry(&self, name: &str) -> Result<Addr> {
        self.functions
            .iter()
            .find(|f| f.name == name || f.linkage_name == name)
            .map(|f| self.to_runtime(f.address))
            .ok_or_else(|| DebuggerError::FunctionNotFound(name.to_string()))
    }

    /// The function whose address range contains `addr`
    pub fn function_at(&self, addr: Addr) -> Option<&Function> {
        let address = self.to_static(addr)?;
        let idx = self.functions.partition_point(|f| f.address <= address);
        self.functions[..idx]
            .iter()
            .rev()
            .find(|f| f.contains(address))
    }

    /// The source line the instruction at `addr` belongs to
    pub fn pc_to_line(&self, addr: Addr) -> Option<SourceLocation> {
        let address = self.to_static(addr)?;
        let idx = self.rows.partition_point(|r| r.address <= address);
        let row = self.rows[..idx].last()?;
        if !row.has_source() {
            trace!("no source line for {addr}");
            return None;
        }
        let file = self.files.get(row.file?)?;
        Some(SourceLocation::new(file, row.line))
    }

    /// Address of the first instruction generated for `file:line`
    ///
    /// Rows that the compiler marked as statement beginnings are preferred.
    pub fn line_to_pc(&self, file: impl AsRef<Path>, line: usize) -> Result<Addr> {
        let file = file.as_ref();
        let id = self.file_id(file)?;
        self.rows
            .iter()
            .filter(|r| r.has_source() && r.file == Some(id) && r.line == line)
            .max_by_key(|r| (r.is_stmt, Reverse(r.address)))
            .map(|r| self.to_runtime(r.address))
            .ok_or_else(|| DebuggerError::LocationNotFound {
                file: file.display().to_string(),
                line,
            })
    }

    /// The first line after `line` in `file` that has code
    pub fn next_code_line(&self, file: impl AsRef<Path>, line: usize) -> Result<usize> {
        let file = file.as_ref();
        let id = self.file_id(file)?;
        self.rows
            .iter()
            .filter(|r| r.has_source() && r.file == Some(id) && r.line > line)
            .map(|r| r.line)
            .min()
            .ok_or_else(|| DebuggerError::LocationNotFound {
                file: file.display().to_string(),
                line: line + 1,
            })
    }

    /// Whether an instruction starts at `addr`
    ///
    /// The enclosing function is decoded from its entry, so this is only known for addresses
    /// inside a function of the `.text` section. Everything else counts as not a boundary.
    pub fn is_instruction_boundary(&self, addr: Addr) -> bool {
        let Some(function) = self.function_at(addr) else {
            debug!("{addr} is in no known function");
            return false;
        };
        let Some(start) = function.address.checked_sub(self.text.address) else {
            return false;
        };
        let start = start as usize;
        let end = (start + function.size as usize).min(self.text.data.len());
        if start >= end {
            return false;
        }
        disassemble::is_instruction_boundary(
            &self.text.data[start..end],
            self.to_runtime(function.address),
            addr,
        )
    }
}

/// Keeps the line table sequences that start inside `text`
///
/// `rows` must be in line program order. The linker leaves the sequences of code it threw away
/// (`--gc-sections`) in the line table, usually relocated to address 0.
fn live_sequences(rows: Vec<LineRow>, text: Range<u64>) -> Vec<LineRow> {
    let mut live = Vec::with_capacity(rows.len());
    let mut sequence: Vec<LineRow> = Vec::new();
    for row in rows {
        sequence.push(row);
        if !row.end_sequence {
            continue;
        }
        let start = sequence[0].address;
        if text.contains(&start) {
            live.append(&mut sequence);
        } else {
            debug!("dropping line table sequence at {start:#x}, outside of .text");
            sequence.clear();
        }
    }
    if sequence.first().is_some_and(|r| text.contains(&r.address)) {
        live.append(&mut sequence);
    }
    live
}

fn read_functions(object: &object::File<'_>) -> Vec<Function> {
    object
        .symbols()
        .filter(|s| s.kind() == object::SymbolKind::Text && s.is_definition())
        .filter_map(|s| {
            let raw = s.name().ok()?;
            if raw.is_empty() {
                return None;
            }
            Some(Function {
                name: format!("{:#}", rustc_demangle::demangle(raw)),
                linkage_name: raw.to_string(),
                address: s.address(),
                size: s.size(),
            })
        })
        .collect()
}

#[derive(Default)]
struct FileInterner {
    files: Vec<PathBuf>,
    ids: HashMap<PathBuf, FileId>,
}

impl FileInterner {
    fn intern(&mut self, path: PathBuf) -> FileId {
        match self.ids.entry(path) {
            Entry::Occupied(e) => *e.get(),
            Entry::Vacant(v) => {
                let id = self.files.len();
                self.files.push(v.key().clone());
                v.insert(id);
                id
            }
        }
    }
}

fn read_line_table(object: &object::File<'_>) -> Result<(Vec<PathBuf>, Vec<LineRow>)> {
    let endian = if object.is_little_endian() {
        gimli::RunTimeEndian::Little
    } else {
        gimli::RunTimeEndian::Big
    };
    let loader = |section: gimli::SectionId| -> Result<GimliRd> {
        let data = match object.section_by_name(section.name()) {
            Some(s) => s.uncompressed_data()?,
            None => Cow::Borrowed(&[][..]),
        };
        Ok(GimliRd::new(Rc::from(data.as_ref()), endian))
    };
    let dwarf = gimli::Dwarf::load(loader)?;

    let mut files = FileInterner::default();
    let mut rows = Vec::new();
    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let Some(program) = unit.line_program.clone() else {
            continue;
        };

        // file indexes are per unit
        let mut unit_files: HashMap<u64, Option<FileId>> = HashMap::new();
        let mut program_rows = program.rows();
        while let Some((header, row)) = program_rows.next_row()? {
            if row.end_sequence() {
                rows.push(LineRow::end_of_sequence(row.address()));
                continue;
            }

            let file = match unit_files.entry(row.file_index()) {
                Entry::Occupied(e) => *e.get(),
                Entry::Vacant(v) => {
                    let id = match row.file(header) {
                        Some(entry) => Some(files.intern(file_path(&dwarf, &unit, header, entry)?)),
                        None => {
                            debug!("line table row names unknown file {}", row.file_index());
                            None
                        }
                    };
                    *v.insert(id)
                }
            };

            rows.push(LineRow {
                address: row.address(),
                file,
                line: row.line().map_or(0, |l| l.get() as usize),
                is_stmt: row.is_stmt(),
                end_sequence: false,
            });
        }
    }

    Ok((files.files, rows))
}

/// Joins compilation directory, include directory and file name like a compiler would
fn file_path(
    dwarf: &gimli::Dwarf<GimliRd>,
    unit: &gimli::Unit<GimliRd>,
    header: &gimli::LineProgramHeader<GimliRd>,
    file: &gimli::FileEntry<GimliRd>,
) -> Result<PathBuf> {
    // pushing an absolute path replaces what was there
    let mut path = match &unit.comp_dir {
        Some(dir) => PathBuf::from(dir.to_string_lossy()?.as_ref()),
        None => PathBuf::new(),
    };
    if let Some(dir) = file.directory(header) {
        let dir = dwarf.attr_string(unit, dir)?;
        path.push(dir.to_string_lossy()?.as_ref());
    }
    let name = dwarf.attr_string(unit, file.path_name())?;
    path.push(name.to_string_lossy()?.as_ref());
    Ok(path)
}
