use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counters behind the profile dump.
#[derive(Debug, Default)]
pub struct Metrics {
    pub allocations: AtomicU64,
    pub alloc_bytes: AtomicU64,
    pub attr_lookups: AtomicU64,
    pub attr_misses: AtomicU64,
    pub attr_stores: AtomicU64,
    pub decode_calls: AtomicU64,
    pub decode_failures: AtomicU64,
    pub tasks_spawned: AtomicU64,
    pub tasks_completed: AtomicU64,
    pub tasks_failed: AtomicU64,
    pub chan_sends: AtomicU64,
    pub chan_recvs: AtomicU64,
}

pub fn hit(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl Metrics {
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        vec![
            ("allocations", get(&self.allocations)),
            ("alloc_bytes", get(&self.alloc_bytes)),
            ("attr_lookups", get(&self.attr_lookups)),
            ("attr_misses", get(&self.attr_misses)),
            ("attr_stores", get(&self.attr_stores)),
            ("decode_calls", get(&self.decode_calls)),
            ("decode_failures", get(&self.decode_failures)),
            ("tasks_spawned", get(&self.tasks_spawned)),
            ("tasks_completed", get(&self.tasks_completed)),
            ("tasks_failed", get(&self.tasks_failed)),
            ("chan_sends", get(&self.chan_sends)),
            ("chan_recvs", get(&self.chan_recvs)),
        ]
    }

    pub fn dump(&self, out: &mut impl Write) -> std::io::Result<()> {
        write!(out, "ember_profile")?;
        for (key, value) in self.snapshot() {
            write!(out, " {key}={value}")?;
        }
        writeln!(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_is_a_single_key_value_line() {
        let m = Metrics::default();
        hit(&m.attr_lookups);
        hit(&m.attr_lookups);
        add(&m.alloc_bytes, 40);
        let mut out = Vec::new();
        m.dump(&mut out).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert!(line.starts_with("ember_profile "));
        assert!(line.ends_with('\n'));
        assert_eq!(line.lines().count(), 1);
        assert!(line.contains(" attr_lookups=2"));
        assert!(line.contains(" alloc_bytes=40"));
        assert!(line.contains(" tasks_failed=0"));
    }
}
