use parking_lot::RwLock;
use tracing::debug;

/// How an exchange selects the queues a published message fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Exact routing-key match.
    Direct,
    /// `.`-segmented pattern match: `*` matches exactly one segment, `#`
    /// matches zero or more.
    Topic,
}

pub(crate) struct Exchange {
    name: String,
    kind: ExchangeKind,
    bindings: RwLock<Vec<Binding>>,
}

struct Binding {
    queue: String,
    routing_key: String,
}

impl Exchange {
    pub(crate) fn new(name: String, kind: ExchangeKind) -> Self {
        Self {
            name,
            kind,
            bindings: RwLock::new(Vec::new()),
        }
    }

    /// Adds a binding; binding the same queue/key pair twice is a no-op.
    pub(crate) fn bind(&self, queue: &str, routing_key: &str) {
        let mut bindings = self.bindings.write();
        let exists = bindings
            .iter()
            .any(|b| b.queue == queue && b.routing_key == routing_key);
        if !exists {
            debug!(
                target: "perilmq::broker",
                exchange = %self.name,
                queue,
                routing_key,
                "binding queue"
            );
            bindings.push(Binding {
                queue: queue.to_string(),
                routing_key: routing_key.to_string(),
            });
        }
    }

    /// Queues whose binding matches `routing_key`, deduplicated: a queue
    /// bound twice still receives one copy per publish.
    pub(crate) fn matching_queues(&self, routing_key: &str) -> Vec<String> {
        let bindings = self.bindings.read();
        let mut queues: Vec<String> = Vec::new();
        for binding in bindings.iter() {
            let matched = match self.kind {
                ExchangeKind::Direct => binding.routing_key == routing_key,
                ExchangeKind::Topic => topic_matches(&binding.routing_key, routing_key),
            };
            if matched && !queues.contains(&binding.queue) {
                queues.push(binding.queue.clone());
            }
        }
        queues
    }
}

/// Topic-pattern matching over `.`-delimited segments.
pub(crate) fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    segments_match(&pattern, &key)
}

fn segments_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| segments_match(rest, &key[skip..])),
        Some((&"*", rest)) => match key.split_first() {
            Some((_, key_rest)) => segments_match(rest, key_rest),
            None => false,
        },
        Some((segment, rest)) => match key.split_first() {
            Some((head, key_rest)) => segment == head && segments_match(rest, key_rest),
            None => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_exactly_one_segment() {
        assert!(topic_matches("army_moves.*", "army_moves.alice"));
        assert!(!topic_matches("army_moves.*", "army_moves.alice.north"));
        assert!(!topic_matches("army_moves.*", "army_moves"));
        assert!(!topic_matches("army_moves.*", "pause.alice"));
    }

    #[test]
    fn literal_patterns_require_exact_match() {
        assert!(topic_matches("pause", "pause"));
        assert!(!topic_matches("pause", "pause.alice"));
        assert!(!topic_matches("pause.alice", "pause"));
    }

    #[test]
    fn hash_matches_zero_or_more_segments() {
        assert!(topic_matches("#", "anything.at.all"));
        assert!(topic_matches("game_logs.#", "game_logs"));
        assert!(topic_matches("game_logs.#", "game_logs.alice.combat"));
        assert!(!topic_matches("game_logs.#", "army_moves.alice"));
    }

    #[test]
    fn wildcards_compose() {
        assert!(topic_matches("*.alice.#", "pause.alice"));
        assert!(topic_matches("*.alice.#", "army_moves.alice.north.fast"));
        assert!(!topic_matches("*.alice.#", "alice"));
    }

    #[test]
    fn direct_exchange_matches_keys_exactly() {
        let exchange = Exchange::new("peril_direct".into(), ExchangeKind::Direct);
        exchange.bind("pause.alice", "pause");
        assert_eq!(exchange.matching_queues("pause"), vec!["pause.alice"]);
        assert!(exchange.matching_queues("pause.alice").is_empty());
    }

    #[test]
    fn duplicate_bindings_deliver_once() {
        let exchange = Exchange::new("peril_topic".into(), ExchangeKind::Topic);
        exchange.bind("army_moves.bob", "army_moves.*");
        exchange.bind("army_moves.bob", "army_moves.*");
        exchange.bind("army_moves.bob", "army_moves.alice");
        assert_eq!(
            exchange.matching_queues("army_moves.alice"),
            vec!["army_moves.bob"]
        );
    }
}
