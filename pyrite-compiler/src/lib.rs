//! Pyrite compiler core: the type-directed lowering pipeline from the
//! decorated surface dialect down to LLVM IR text and native objects.
//!
//! Pipeline: decorator-driven collection ([`functions::Collector`]) ->
//! two-pass declare/emit ([`functions::FunctionManager`]) -> structural
//! verification and object emission ([`driver`]). The ABI-aware builder
//! ([`builder::PcBuilder`]) hides sret and register coercion from the
//! lowering layers; the effect resolver ([`effects::EffectResolver`])
//! substitutes capability implementations at lowering time.

pub mod abi;
pub mod builder;
pub mod cimport;
pub mod driver;
pub mod effects;
pub mod functions;
pub mod ir;
pub mod linear;
pub mod lower;
pub mod registry;
pub mod resolver;
pub mod types;
pub mod value;

pub use abi::TargetAbi;
pub use driver::{compile_source, compile_to_executable, DriverOptions};
pub use lower::Unit;
