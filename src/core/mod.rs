//! # Engine core: modules, the per-shard manager, and shutdown plumbing.

pub mod gate;
pub mod manager;
pub mod module;
pub mod serialized;

pub use gate::{Gate, GateHolder};
pub use manager::TaskManager;
pub use module::Module;
pub use serialized::SerializedAction;
