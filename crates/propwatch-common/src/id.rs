use snowflake::SnowflakeIdBucket;
use std::sync::{Mutex, MutexGuard};

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

fn generator() -> MutexGuard<'static, Option<SnowflakeIdBucket>> {
    ID_GENERATOR
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Initializes the snowflake id generator.
///
/// `machine_id` and `node_id` must each be in `0..=31`. Only the first call
/// takes effect; replacing a live bucket could repeat ids issued in the same
/// millisecond.
pub fn init(machine_id: i32, node_id: i32) {
    generator().get_or_insert_with(|| SnowflakeIdBucket::new(machine_id, node_id));
}

/// Returns a new unique id in string form.
///
/// Falls back to machine/node `(1, 1)` when [`init`] was never called.
pub fn next_id() -> String {
    let mut gen = generator();
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}
