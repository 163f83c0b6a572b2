//! Process-wide Snowflake ID generation.
//!
//! Every row this system writes (metric points, LLM records, incidents,
//! alerts, notifications) carries a string Snowflake ID, so inserts never
//! round-trip to the database for key generation and IDs sort by creation
//! time.

use snowflake::SnowflakeIdGenerator;
use std::sync::{Mutex, MutexGuard};

static GENERATOR: Mutex<Option<SnowflakeIdGenerator>> = Mutex::new(None);

fn lock_generator() -> MutexGuard<'static, Option<SnowflakeIdGenerator>> {
    GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Installs the generator for this process.
///
/// `machine_id` and `node_id` are both in `0..=31` and must be unique per
/// deployed instance so IDs never collide across servers. Calling again
/// replaces the generator.
pub fn init(machine_id: i32, node_id: i32) {
    *lock_generator() = Some(SnowflakeIdGenerator::new(machine_id, node_id));
}

/// Returns the next ID as a decimal string.
///
/// Uses `real_time_generate`, so consecutive IDs are strictly increasing;
/// `ORDER BY id` on any table is creation order. Falls back to machine 1 /
/// node 1 when [`init`] was never called, so library consumers and tests
/// work without explicit setup.
pub fn next_id() -> String {
    lock_generator()
        .get_or_insert_with(|| SnowflakeIdGenerator::new(1, 1))
        .real_time_generate()
        .to_string()
}
