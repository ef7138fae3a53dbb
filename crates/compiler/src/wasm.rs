//! Typed-section view of a Wasm binary.
//!
//! The raw decoding itself is delegated to `wasmparser`; this module walks
//! its payload stream once and materializes owned section data: signatures,
//! imports, limits, globals, exports, element/data segments, code-body byte
//! ranges, and the location of the `name` custom section. Function bodies
//! stay as ranges into the original bytes and are re-read lazily during
//! lowering.

use crate::error::DecodeError;
use std::ops::Range;
use wasmparser::{
    DataKind, ElementItems, ElementKind, ExternalKind, FunctionBody, Parser, Payload, TypeRef,
    ValType,
};

/// A value type admitted in signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    I32,
    I64,
    F32,
    F64,
}

impl ValueKind {
    fn from_val_type(ty: ValType) -> Result<ValueKind, DecodeError> {
        match ty {
            ValType::I32 => Ok(ValueKind::I32),
            ValType::I64 => Ok(ValueKind::I64),
            ValType::F32 => Ok(ValueKind::F32),
            ValType::F64 => Ok(ValueKind::F64),
            _ => Err(DecodeError::UnsupportedValueType),
        }
    }
}

/// A function signature.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FuncSig {
    pub params: Vec<ValueKind>,
    pub results: Vec<ValueKind>,
}

/// Limits of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLimits {
    pub initial: u32,
    pub maximum: Option<u32>,
}

/// Limits of a linear memory, in 65536-byte pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    pub initial: u32,
    pub maximum: Option<u32>,
}

/// What an import entry brings into the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Func { type_id: u32 },
    Table(TableLimits),
    Memory(MemoryLimits),
    Global { mutable: bool },
}

/// One import entry, in section order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    pub module: String,
    pub field: String,
    pub kind: ImportKind,
}

/// An operator admitted in initializer expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOp {
    I32Const(i32),
    I64Const(i64),
    F32Const(u32),
    F64Const(u64),
    GetGlobal(u32),
}

/// A module-defined global: mutability plus its initializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalEntry {
    pub mutable: bool,
    pub init: Vec<InitOp>,
}

/// Kind of an exported entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
}

/// One export entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

/// An active element segment: function indices placed into the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementSegment {
    pub offset: Vec<InitOp>,
    pub functions: Vec<u32>,
}

/// An active data segment: bytes placed into linear memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegment {
    pub offset: Vec<InitOp>,
    pub bytes: Vec<u8>,
}

/// Decoded module sections, owning the raw bytes they came from.
#[derive(Debug, Clone, Default)]
pub struct RawModule {
    pub bytes: Vec<u8>,
    pub types: Vec<FuncSig>,
    pub imports: Vec<ImportEntry>,
    /// Type ids of module-defined functions, in code-section order.
    pub func_type_ids: Vec<u32>,
    pub table: Option<TableLimits>,
    pub memory: Option<MemoryLimits>,
    pub globals: Vec<GlobalEntry>,
    pub exports: Vec<ExportEntry>,
    pub elements: Vec<ElementSegment>,
    /// Byte ranges of function bodies within `bytes`.
    pub code: Vec<Range<usize>>,
    pub data: Vec<DataSegment>,
    pub start: Option<u32>,
    /// Byte range of the `name` custom section payload within `bytes`.
    pub name_section: Option<Range<usize>>,
}

impl RawModule {
    /// Decode a Wasm binary into typed sections.
    pub fn decode(bytes: Vec<u8>) -> Result<RawModule, DecodeError> {
        let mut module = RawModule::default();

        for payload in Parser::new(0).parse_all(&bytes) {
            match payload? {
                Payload::TypeSection(reader) => {
                    for ty in reader.into_iter_err_on_gc_types() {
                        let func_ty = ty?;
                        let params = func_ty
                            .params()
                            .iter()
                            .map(|&t| ValueKind::from_val_type(t))
                            .collect::<Result<_, _>>()?;
                        let results = func_ty
                            .results()
                            .iter()
                            .map(|&t| ValueKind::from_val_type(t))
                            .collect::<Result<_, _>>()?;
                        module.types.push(FuncSig { params, results });
                    }
                }
                Payload::ImportSection(reader) => {
                    for import in reader {
                        let import = import?;
                        let kind = match import.ty {
                            TypeRef::Func(type_id) => ImportKind::Func { type_id },
                            TypeRef::Table(ty) => ImportKind::Table(TableLimits {
                                initial: ty.initial,
                                maximum: ty.maximum,
                            }),
                            TypeRef::Memory(ty) => ImportKind::Memory(memory_limits(
                                ty.initial,
                                ty.maximum,
                            )?),
                            TypeRef::Global(ty) => ImportKind::Global {
                                mutable: ty.mutable,
                            },
                            _ => {
                                return Err(DecodeError::UnsupportedImportKind {
                                    module: import.module.to_string(),
                                    field: import.name.to_string(),
                                })
                            }
                        };
                        module.imports.push(ImportEntry {
                            module: import.module.to_string(),
                            field: import.name.to_string(),
                            kind,
                        });
                    }
                }
                Payload::FunctionSection(reader) => {
                    for type_id in reader {
                        module.func_type_ids.push(type_id?);
                    }
                }
                Payload::TableSection(reader) => {
                    for table in reader {
                        let table = table?;
                        if module.table.is_some() {
                            return Err(DecodeError::MultipleTables);
                        }
                        module.table = Some(TableLimits {
                            initial: table.ty.initial,
                            maximum: table.ty.maximum,
                        });
                    }
                }
                Payload::MemorySection(reader) => {
                    for memory in reader {
                        let memory = memory?;
                        if module.memory.is_some() {
                            return Err(DecodeError::MultipleMemories);
                        }
                        module.memory = Some(memory_limits(memory.initial, memory.maximum)?);
                    }
                }
                Payload::GlobalSection(reader) => {
                    for global in reader {
                        let global = global?;
                        module.globals.push(GlobalEntry {
                            mutable: global.ty.mutable,
                            init: decode_init_expr(&global.init_expr)?,
                        });
                    }
                }
                Payload::ExportSection(reader) => {
                    for export in reader {
                        let export = export?;
                        let kind = match export.kind {
                            ExternalKind::Func => ExportKind::Func,
                            ExternalKind::Table => ExportKind::Table,
                            ExternalKind::Memory => ExportKind::Memory,
                            ExternalKind::Global => ExportKind::Global,
                            _ => continue,
                        };
                        module.exports.push(ExportEntry {
                            name: export.name.to_string(),
                            kind,
                            index: export.index,
                        });
                    }
                }
                Payload::StartSection { func, .. } => {
                    module.start = Some(func);
                }
                Payload::ElementSection(reader) => {
                    for element in reader {
                        let element = element?;
                        let offset = match element.kind {
                            ElementKind::Active {
                                table_index: None | Some(0),
                                offset_expr,
                            } => decode_init_expr(&offset_expr)?,
                            _ => return Err(DecodeError::UnsupportedElementSegment),
                        };
                        let functions = match element.items {
                            ElementItems::Functions(items) => {
                                items.into_iter().collect::<Result<Vec<_>, _>>()?
                            }
                            ElementItems::Expressions(..) => {
                                return Err(DecodeError::UnsupportedElementSegment)
                            }
                        };
                        module.elements.push(ElementSegment { offset, functions });
                    }
                }
                Payload::DataSection(reader) => {
                    for data in reader {
                        let data = data?;
                        let offset = match data.kind {
                            DataKind::Active {
                                memory_index: 0,
                                offset_expr,
                            } => decode_init_expr(&offset_expr)?,
                            _ => return Err(DecodeError::UnsupportedDataSegment),
                        };
                        module.data.push(DataSegment {
                            offset,
                            bytes: data.data.to_vec(),
                        });
                    }
                }
                Payload::CodeSectionEntry(body) => {
                    module.code.push(body.range());
                }
                Payload::CustomSection(reader) => {
                    if reader.name() == "name" {
                        let start = reader.data_offset();
                        module.name_section = Some(start..start + reader.data().len());
                    }
                }
                _ => {}
            }
        }

        module.bytes = bytes;
        Ok(module)
    }

    /// Number of imported functions (they occupy the head of the function
    /// index space).
    pub fn num_function_imports(&self) -> usize {
        self.imports
            .iter()
            .filter(|imp| matches!(imp.kind, ImportKind::Func { .. }))
            .count()
    }

    /// Type ids of function imports, in import-entry order.
    pub fn import_type_ids(&self) -> Vec<u32> {
        self.imports
            .iter()
            .filter_map(|imp| match imp.kind {
                ImportKind::Func { type_id } => Some(type_id),
                _ => None,
            })
            .collect()
    }

    /// Re-open the body of module-defined function `index` for reading.
    pub fn function_body(&self, index: usize) -> FunctionBody<'_> {
        let range = self.code[index].clone();
        FunctionBody::new(range.start, &self.bytes[range])
    }

    /// Signature of a function in the full index space (imports first).
    pub fn function_sig(&self, index: usize) -> Option<&FuncSig> {
        let imports = self.import_type_ids();
        let type_id = if index < imports.len() {
            imports[index]
        } else {
            *self.func_type_ids.get(index - imports.len())?
        };
        self.types.get(type_id as usize)
    }
}

fn memory_limits(initial: u64, maximum: Option<u64>) -> Result<MemoryLimits, DecodeError> {
    let initial = u32::try_from(initial).map_err(|_| DecodeError::UnsupportedValueType)?;
    let maximum = match maximum {
        Some(max) => Some(u32::try_from(max).map_err(|_| DecodeError::UnsupportedValueType)?),
        None => None,
    };
    Ok(MemoryLimits { initial, maximum })
}

/// Decode a constant expression into the supported operator subset.
fn decode_init_expr(expr: &wasmparser::ConstExpr<'_>) -> Result<Vec<InitOp>, DecodeError> {
    use wasmparser::Operator;

    let mut ops = Vec::new();
    let mut reader = expr.get_operators_reader();
    loop {
        match reader.read()? {
            Operator::I32Const { value } => ops.push(InitOp::I32Const(value)),
            Operator::I64Const { value } => ops.push(InitOp::I64Const(value)),
            Operator::F32Const { value } => ops.push(InitOp::F32Const(value.bits())),
            Operator::F64Const { value } => ops.push(InitOp::F64Const(value.bits())),
            Operator::GlobalGet { global_index } => ops.push(InitOp::GetGlobal(global_index)),
            Operator::End => break,
            _ => return Err(DecodeError::MalformedInitExpr),
        }
    }
    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_wat(source: &str) -> RawModule {
        let bytes = wat::parse_str(source).unwrap();
        RawModule::decode(bytes).unwrap()
    }

    #[test]
    fn decodes_types_and_functions() {
        let module = decode_wat(
            r#"(module
                (func (param i32 i32) (result i32)
                    local.get 0)
                (func))"#,
        );
        assert_eq!(module.func_type_ids.len(), 2);
        assert_eq!(module.code.len(), 2);
        let sig = module.function_sig(0).unwrap();
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.results.len(), 1);
        assert!(module.function_sig(1).unwrap().results.is_empty());
    }

    #[test]
    fn decodes_imports_in_entry_order() {
        let module = decode_wat(
            r#"(module
                (import "env" "a" (func (param i64) (result i64)))
                (import "env" "g" (global i64))
                (import "env" "b" (func)))"#,
        );
        assert_eq!(module.imports.len(), 3);
        assert_eq!(module.num_function_imports(), 2);
        assert_eq!(module.import_type_ids().len(), 2);
        assert_eq!(module.imports[0].field, "a");
        assert!(matches!(module.imports[1].kind, ImportKind::Global { .. }));
    }

    #[test]
    fn decodes_memory_and_data() {
        let module = decode_wat(
            r#"(module
                (memory 2 4)
                (data (i32.const 16) "hi"))"#,
        );
        let memory = module.memory.unwrap();
        assert_eq!(memory.initial, 2);
        assert_eq!(memory.maximum, Some(4));
        assert_eq!(module.data.len(), 1);
        assert_eq!(module.data[0].offset, vec![InitOp::I32Const(16)]);
        assert_eq!(module.data[0].bytes, b"hi");
    }

    #[test]
    fn decodes_table_and_elements() {
        let module = decode_wat(
            r#"(module
                (table 4 funcref)
                (elem (i32.const 1) $f $f)
                (func $f))"#,
        );
        assert_eq!(module.table.unwrap().initial, 4);
        assert_eq!(module.elements.len(), 1);
        assert_eq!(module.elements[0].functions, vec![0, 0]);
    }

    #[test]
    fn decodes_globals_and_exports() {
        let module = decode_wat(
            r#"(module
                (global $g (mut i64) (i64.const 9))
                (func $main (result i32) (i32.const 1))
                (export "main" (func $main))
                (export "g" (global $g)))"#,
        );
        assert_eq!(module.globals.len(), 1);
        assert!(module.globals[0].mutable);
        assert_eq!(module.globals[0].init, vec![InitOp::I64Const(9)]);
        assert_eq!(module.exports.len(), 2);
        assert_eq!(module.exports[0].kind, ExportKind::Func);
        assert_eq!(module.exports[1].kind, ExportKind::Global);
    }

    #[test]
    fn records_name_section() {
        let module = decode_wat(r#"(module (func $named_fn))"#);
        assert!(module.name_section.is_some());
    }

    #[test]
    fn records_start_function() {
        let module = decode_wat(
            r#"(module
                (func $init)
                (start $init))"#,
        );
        assert_eq!(module.start, Some(0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(RawModule::decode(vec![0xde, 0xad, 0xbe, 0xef]).is_err());
    }
}
