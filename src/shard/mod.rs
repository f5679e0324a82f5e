//! # Sharding: worker set, submission primitive, and cross-shard dispatch.

pub mod dispatch;
pub mod sharded;

pub use dispatch::{invoke_on_task, lookup_task_on_all_shards};
pub use sharded::{ShardId, Sharded};
