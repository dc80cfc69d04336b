use snowflake::SnowflakeIdBucket;
use std::sync::Mutex;

static ID_GENERATOR: Mutex<Option<SnowflakeIdBucket>> = Mutex::new(None);

/// Initialize the Snowflake ID generator.
///
/// `machine_id`: machine identifier (0-31)
/// `node_id`: node identifier (0-31)
pub fn init(machine_id: i32, node_id: i32) {
    let mut gen = ID_GENERATOR.lock().unwrap();
    *gen = Some(SnowflakeIdBucket::new(machine_id, node_id));
}

/// Generate a Snowflake ID (string form).
pub fn next_id() -> String {
    let mut gen = ID_GENERATOR.lock().unwrap();
    let bucket = gen.get_or_insert_with(|| SnowflakeIdBucket::new(1, 1));
    bucket.get_id().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn next_id_never_repeats() {
        init(1, 1);
        let ids: HashSet<String> = (0..500).map(|_| next_id()).collect();
        assert_eq!(ids.len(), 500);
    }

    #[test]
    fn next_id_is_a_valid_i64_string() {
        init(1, 1);
        let id = next_id();
        assert!(id.parse::<i64>().is_ok(), "not a valid i64: {id}");
    }

    #[test]
    fn next_id_works_without_explicit_init() {
        let id = next_id();
        assert!(!id.is_empty());
    }
}
