//! Shared test helpers for integration tests.
//!
//! Guests are written in WAT and compiled through the bridge's own loader,
//! so no prebuilt artifact is needed.

#![allow(dead_code)]

use guestjs_bridge::{BridgeConfig, CompiledModule, Loader};
use guestjs_hostapi::EnvironmentConfig;

/// Growing bump allocator starting at 1024. Returns 0 when memory cannot grow.
const GROWING_ALLOC: &str = r#"
    (global $bump (mut i32) (i32.const 1024))
    (func $alloc (export "cabi_realloc") (param i32 i32 i32 i32) (result i32)
        (local $ptr i32)
        (local $end i32)
        (local $have i32)
        (local.set $ptr (global.get $bump))
        (local.set $end (i32.add (local.get $ptr) (local.get 3)))
        (local.set $have (i32.mul (memory.size) (i32.const 65536)))
        (if (i32.gt_u (local.get $end) (local.get $have))
            (then
                (if (i32.eq
                        (memory.grow
                            (i32.add
                                (i32.shr_u (i32.sub (local.get $end) (local.get $have)) (i32.const 16))
                                (i32.const 1)))
                        (i32.const -1))
                    (then (return (i32.const 0))))))
        (global.set $bump (local.get $end))
        (local.get $ptr))
"#;

/// Compile copies the source into a fresh allocation; invoke returns the
/// bytecode unchanged.
pub fn echo_wat() -> String {
    format!(
        r#"(module
            (memory (export "memory") 1)
            {GROWING_ALLOC}
            (func (export "compile-src") (param $src i32) (param $len i32) (result i32)
                (local $dst i32)
                (local.set $dst (call $alloc (i32.const 0) (i32.const 0) (i32.const 1) (local.get $len)))
                (memory.copy (local.get $dst) (local.get $src) (local.get $len))
                (i32.store (i32.const 16) (local.get $dst))
                (i32.store (i32.const 20) (local.get $len))
                (i32.const 16))
            (func (export "invoke") (param $ret i32) (param $bc i32) (param $len i32) (param i32 i32)
                (i32.store (local.get $ret) (local.get $bc))
                (i32.store offset=4 (local.get $ret) (local.get $len)))
        )"#
    )
}

/// Invoke ignores the bytecode and returns an empty list.
pub fn silent_wat() -> String {
    format!(
        r#"(module
            (memory (export "memory") 1)
            {GROWING_ALLOC}
            (func (export "compile-src") (param i32 i32) (result i32)
                (i32.store (i32.const 16) (i32.const 0))
                (i32.store (i32.const 20) (i32.const 0))
                (i32.const 16))
            (func (export "invoke") (param $ret i32) (param i32 i32 i32 i32)
                (i64.store (local.get $ret) (i64.const 0)))
        )"#
    )
}

/// Keeps a counter in a global, initialized by `_initialize`. Every invoke
/// bumps it and returns it as one ASCII digit, so leaking instance state
/// between runs would change the output.
pub fn counter_wat() -> String {
    format!(
        r#"(module
            (memory (export "memory") 1)
            (global $count (mut i32) (i32.const 0))
            {GROWING_ALLOC}
            (func (export "_initialize")
                (global.set $count (i32.const 48)))
            (func (export "compile-src") (param $src i32) (param $len i32) (result i32)
                (i32.store (i32.const 16) (local.get $src))
                (i32.store (i32.const 20) (local.get $len))
                (i32.const 16))
            (func (export "invoke") (param $ret i32) (param i32 i32 i32 i32)
                (local $out i32)
                (global.set $count (i32.add (global.get $count) (i32.const 1)))
                (local.set $out (call $alloc (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 1)))
                (i32.store8 (local.get $out) (global.get $count))
                (i32.store (local.get $ret) (local.get $out))
                (i32.store offset=4 (local.get $ret) (i32.const 1)))
        )"#
    )
}

/// Compile never returns.
pub fn spin_wat() -> String {
    format!(
        r#"(module
            (memory (export "memory") 1)
            {GROWING_ALLOC}
            (func (export "compile-src") (param i32 i32) (result i32)
                (loop $forever (br $forever))
                (i32.const 0))
            (func (export "invoke") (param i32 i32 i32 i32 i32))
        )"#
    )
}

/// Protocol exports without `invoke`.
pub fn no_invoke_wat() -> String {
    format!(
        r#"(module
            (memory (export "memory") 1)
            {GROWING_ALLOC}
            (func (export "compile-src") (param i32 i32) (result i32)
                (i32.const 16))
        )"#
    )
}

/// Command guest that writes "hello\n" to stdout.
pub const HELLO_COMMAND: &str = r#"
    (module
        (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
        (memory (export "memory") 1)
        (data (i32.const 8) "\20\00\00\00\06\00\00\00")
        (data (i32.const 32) "hello\n")
        (func (export "_start")
            (drop (call $fd_write (i32.const 1) (i32.const 8) (i32.const 1) (i32.const 24))))
    )
"#;

/// Command guest that exits with status 3 after writing nothing.
pub const FAILING_COMMAND: &str = r#"
    (module
        (import "wasi_snapshot_preview1" "proc_exit" (func $exit (param i32)))
        (memory (export "memory") 1)
        (func (export "_start")
            (call $exit (i32.const 3)))
    )
"#;

pub fn load(wat: &str) -> CompiledModule {
    load_with(BridgeConfig::default(), wat)
}

pub fn load_with(config: BridgeConfig, wat: &str) -> CompiledModule {
    Loader::new(config).unwrap().compile(wat.as_bytes()).unwrap()
}

pub fn captured() -> EnvironmentConfig {
    EnvironmentConfig::captured("test")
}
