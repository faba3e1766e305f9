//! Module validation: ABI compatibility checks.
//!
//! Load time only rejects what no execution mode can drive (64-bit or shared
//! memory). The protocol-specific export checks run per mode, because one
//! compiled module may be used by either strategy.

use wasmtime::{ExternType, Module, ValType};

use crate::config::ExportNames;
use crate::error::{InstantiationError, LoadError};

/// Name of the exported linear memory.
pub const MEMORY_EXPORT: &str = "memory";

/// Reactor initialization export, run at instantiate when present.
pub const INITIALIZE_EXPORT: &str = "_initialize";

/// Command entry point export.
pub const START_EXPORT: &str = "_start";

/// Check if a ValType is i32.
fn is_i32(vt: &ValType) -> bool {
    matches!(vt, ValType::I32)
}

/// Reject memories the 32-bit marshaling layer cannot address.
pub fn validate_memory(module: &Module) -> Result<(), LoadError> {
    if let Some(ExternType::Memory(mem)) = module.get_export(MEMORY_EXPORT) {
        if mem.is_64() {
            return Err(LoadError::Unsupported("64-bit linear memory".into()));
        }
        if mem.is_shared() {
            return Err(LoadError::Unsupported("shared linear memory".into()));
        }
    }
    Ok(())
}

/// Check the exports the compile/invoke protocol calls.
///
/// Expected: memory, `alloc` (4 i32 → 1 i32), `compile` (2 i32 → 1 i32),
/// `invoke` (5 i32 → nothing).
pub fn validate_bridge_abi(module: &Module, names: &ExportNames) -> Result<(), InstantiationError> {
    validate_memory_export(module)?;
    validate_func(module, &names.alloc, 4, 1)?;
    validate_func(module, &names.compile, 2, 1)?;
    validate_func(module, &names.invoke, 5, 0)?;
    Ok(())
}

/// Check the command entry point: memory plus `_start: [] -> []`.
pub fn validate_command_abi(module: &Module) -> Result<(), InstantiationError> {
    validate_memory_export(module)?;
    validate_func(module, START_EXPORT, 0, 0)
}

fn validate_memory_export(module: &Module) -> Result<(), InstantiationError> {
    match module.get_export(MEMORY_EXPORT) {
        Some(ExternType::Memory(_)) => Ok(()),
        _ => Err(InstantiationError::MissingMemory),
    }
}

/// Check that `name` is a function taking `param_count` i32s and returning
/// `result_count` i32s.
fn validate_func(
    module: &Module,
    name: &str,
    param_count: usize,
    result_count: usize,
) -> Result<(), InstantiationError> {
    let func_ty = match module.get_export(name) {
        Some(ExternType::Func(ft)) => ft,
        Some(_) => {
            return Err(InstantiationError::ExportSignature {
                name: name.to_string(),
                message: "not a function".into(),
            });
        }
        None => {
            return Err(InstantiationError::MissingExport {
                name: name.to_string(),
            });
        }
    };

    let params: Vec<ValType> = func_ty.params().collect();
    let results: Vec<ValType> = func_ty.results().collect();

    if params.len() != param_count || !params.iter().all(is_i32) {
        return Err(InstantiationError::ExportSignature {
            name: name.to_string(),
            message: format!(
                "expected {} i32 params, got {} params",
                param_count,
                params.len()
            ),
        });
    }

    if results.len() != result_count || !results.iter().all(is_i32) {
        return Err(InstantiationError::ExportSignature {
            name: name.to_string(),
            message: format!(
                "expected {} i32 results, got {} results",
                result_count,
                results.len()
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::{Config, Engine};

    fn test_engine() -> Engine {
        Engine::default()
    }

    const BRIDGE_MODULE: &str = r#"
        (module
            (memory (export "memory") 1)
            (func (export "cabi_realloc") (param i32 i32 i32 i32) (result i32)
                i32.const 0)
            (func (export "compile-src") (param i32 i32) (result i32)
                i32.const 0)
            (func (export "invoke") (param i32 i32 i32 i32 i32))
        )
    "#;

    #[test]
    fn test_validate_bridge_module() {
        let module = Module::new(&test_engine(), BRIDGE_MODULE).unwrap();
        validate_memory(&module).unwrap();
        validate_bridge_abi(&module, &ExportNames::default()).unwrap();
    }

    #[test]
    fn test_reject_missing_invoke() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "cabi_realloc") (param i32 i32 i32 i32) (result i32)
                    i32.const 0)
                (func (export "compile-src") (param i32 i32) (result i32)
                    i32.const 0)
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        let err = validate_bridge_abi(&module, &ExportNames::default()).unwrap_err();
        match err {
            InstantiationError::MissingExport { name } => assert_eq!(name, "invoke"),
            e => panic!("expected MissingExport, got: {:?}", e),
        }
    }

    #[test]
    fn test_reject_wrong_signature() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "cabi_realloc") (param i32 i32 i32 i32) (result i32)
                    i32.const 0)
                ;; compile-src should take 2 params, not 1
                (func (export "compile-src") (param i32) (result i32)
                    i32.const 0)
                (func (export "invoke") (param i32 i32 i32 i32 i32))
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        let err = validate_bridge_abi(&module, &ExportNames::default()).unwrap_err();
        assert!(matches!(err, InstantiationError::ExportSignature { ref name, .. } if name == "compile-src"));
    }

    #[test]
    fn test_reject_export_not_function() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (global (export "cabi_realloc") i32 (i32.const 0))
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        let err = validate_bridge_abi(&module, &ExportNames::default()).unwrap_err();
        assert!(matches!(err, InstantiationError::ExportSignature { .. }));
    }

    #[test]
    fn test_reject_missing_memory() {
        let wat = r#"
            (module
                (func (export "_start"))
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        let err = validate_command_abi(&module).unwrap_err();
        assert!(matches!(err, InstantiationError::MissingMemory));
    }

    #[test]
    fn test_custom_export_names() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "alloc") (param i32 i32 i32 i32) (result i32)
                    i32.const 0)
                (func (export "compile") (param i32 i32) (result i32)
                    i32.const 0)
                (func (export "run") (param i32 i32 i32 i32 i32))
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        let names = ExportNames {
            alloc: "alloc".into(),
            compile: "compile".into(),
            invoke: "run".into(),
        };
        validate_bridge_abi(&module, &names).unwrap();
        assert!(validate_bridge_abi(&module, &ExportNames::default()).is_err());
    }

    #[test]
    fn test_validate_command_module() {
        let wat = r#"
            (module
                (memory (export "memory") 1)
                (func (export "_start"))
            )
        "#;
        let module = Module::new(&test_engine(), wat).unwrap();
        validate_command_abi(&module).unwrap();
    }

    #[test]
    fn test_reject_memory64() {
        let mut config = Config::new();
        config.wasm_memory64(true);
        let engine = Engine::new(&config).unwrap();
        let wat = r#"
            (module
                (memory (export "memory") i64 1)
            )
        "#;
        let module = Module::new(&engine, wat).unwrap();
        let err = validate_memory(&module).unwrap_err();
        assert!(matches!(err, LoadError::Unsupported(_)));
    }
}
