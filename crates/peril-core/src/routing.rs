//! Exchange names, routing-key prefixes, and topic pattern matching.

/// Direct exchange for exact-key broadcasts such as pause/resume.
pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
/// Topic exchange for per-player event streams.
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
/// Fanout exchange receiving messages rejected without requeue.
pub const EXCHANGE_PERIL_DLX: &str = "peril_dlx";
/// Durable queue bound to the dead-letter exchange.
pub const QUEUE_PERIL_DLQ: &str = "peril_dlq";

pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const PAUSE_KEY: &str = "pause";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// Builds a per-user routing key, e.g. `army_moves.alice`.
pub fn user_key(prefix: &str, username: &str) -> String {
    format!("{prefix}.{username}")
}

/// Builds a single-level wildcard binding pattern, e.g. `army_moves.*`.
pub fn wildcard_pattern(prefix: &str) -> String {
    format!("{prefix}.*")
}

/// Matches a dot-separated routing key against a topic binding pattern.
///
/// `*` matches exactly one word and `#` matches zero or more words.
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let mut pattern = split_words(pattern);
    // Adjacent `#` words match the same keys as a single one.
    pattern.dedup_by(|next, prev| *next == "#" && *prev == "#");
    let key = split_words(routing_key);
    match_words(&pattern, &key)
}

fn split_words(s: &str) -> Vec<&str> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split('.').collect()
    }
}

/// Walks the pattern one word at a time. `reachable[j]` is set when the
/// pattern words seen so far can consume exactly `key[..j]`, so the whole
/// match costs O(pattern words * key words).
fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    let mut reachable = vec![false; key.len() + 1];
    reachable[0] = true;
    for word in pattern {
        let mut next = vec![false; key.len() + 1];
        match *word {
            "#" => {
                let mut any = false;
                for (j, slot) in next.iter_mut().enumerate() {
                    any |= reachable[j];
                    *slot = any;
                }
            }
            "*" => {
                for j in 1..=key.len() {
                    next[j] = reachable[j - 1];
                }
            }
            literal => {
                for j in 1..=key.len() {
                    next[j] = reachable[j - 1] && key[j - 1] == literal;
                }
            }
        }
        reachable = next;
    }
    reachable[key.len()]
}
