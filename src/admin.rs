//! Topic administration is explicitly out of scope for the consumer core
//! (see `SPEC_FULL.md` §1); this is the tiny builder callers use outside it
//! to describe a topic they want created, independent of any broker client.

/// Describes a topic to create. Carries no behavior of its own — a caller
/// hands this to whatever admin client their [`crate::broker::BrokerSession`]
/// implementation provides.
#[derive(Debug, Clone)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

impl TopicSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 1,
            replication_factor: 1,
        }
    }

    pub fn partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn replication_factor(mut self, replication_factor: i32) -> Self {
        self.replication_factor = replication_factor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_single_partition_and_replica() {
        let spec = TopicSpec::new("orders.dlq");
        assert_eq!(spec.name, "orders.dlq");
        assert_eq!(spec.partitions, 1);
        assert_eq!(spec.replication_factor, 1);
    }

    #[test]
    fn test_builder_overrides() {
        let spec = TopicSpec::new("orders").partitions(6).replication_factor(3);
        assert_eq!(spec.partitions, 6);
        assert_eq!(spec.replication_factor, 3);
    }
}
