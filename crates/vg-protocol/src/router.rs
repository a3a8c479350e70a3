//! Subscriber targeting, topic filtering, and outgoing batch ordering
//! (spec §4.5). Grounded on the teacher's `crates/abp-protocol/src/router.rs`
//! (`RouteTable`/`MessageRouter` matching a message against a subscriber set).

use crate::block::Block;

/// A subscriber able to receive blocks over a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub name: String,
    pub topics: Vec<String>,
}

/// Returns true if `block` should be delivered to `subscriber`.
///
/// A block with no `targets` is untargeted and reaches everyone; one with
/// `targets` reaches only named subscribers. Independently, if the block
/// carries `topics`, the subscriber must have subscribed to at least one of
/// them (an empty subscriber topic list means "all topics").
pub fn is_routed_to(block: &Block, subscriber: &Subscriber) -> bool {
    if let Some(targets) = block.targets() {
        if !targets.iter().any(|t| t == &subscriber.name) {
            return false;
        }
    }
    is_on_topic(block, subscriber)
}

fn is_on_topic(block: &Block, subscriber: &Subscriber) -> bool {
    if subscriber.topics.is_empty() {
        return true;
    }
    let block_topics = block.topics();
    if block_topics.is_empty() {
        return true;
    }
    block_topics.iter().any(|t| subscriber.topics.contains(t))
}

/// Orders a batch of outgoing blocks for transmission: lexicographically by
/// `name`, ties broken by original arrival order (a stable sort).
pub fn order_batch(blocks: &mut [Block]) {
    blocks.sort_by(|a, b| a.name().ok().cmp(&b.name().ok()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;
    use serde_json::json;

    fn block(name: &str, targets: Option<Vec<&str>>, topics: Option<Vec<&str>>) -> Block {
        let mut b = Block::new(BlockType::Data, name);
        if let Some(t) = targets {
            b.raw.insert("targets".into(), json!(t));
        }
        if let Some(t) = topics {
            b.raw.insert("topics".into(), json!(t));
        }
        b
    }

    #[test]
    fn untargeted_block_reaches_everyone() {
        let b = block("d1", None, None);
        let sub = Subscriber { name: "peer1".into(), topics: vec![] };
        assert!(is_routed_to(&b, &sub));
    }

    #[test]
    fn targeted_block_reaches_only_named_subscriber() {
        let b = block("d1", Some(vec!["peer1"]), None);
        let sub = Subscriber { name: "peer2".into(), topics: vec![] };
        assert!(!is_routed_to(&b, &sub));
    }

    #[test]
    fn topic_filter_requires_overlap() {
        let b = block("d1", None, Some(vec!["alerts"]));
        let subscribed = Subscriber { name: "peer1".into(), topics: vec!["alerts".into()] };
        let unsubscribed = Subscriber { name: "peer2".into(), topics: vec!["other".into()] };
        assert!(is_routed_to(&b, &subscribed));
        assert!(!is_routed_to(&b, &unsubscribed));
    }

    #[test]
    fn subscriber_with_no_topic_filter_gets_everything() {
        let b = block("d1", None, Some(vec!["alerts"]));
        let sub = Subscriber { name: "peer1".into(), topics: vec![] };
        assert!(is_routed_to(&b, &sub));
    }

    #[test]
    fn batch_orders_lexicographically_by_name() {
        let mut blocks = vec![block("zeta", None, None), block("alpha", None, None), block("mid", None, None)];
        order_batch(&mut blocks);
        let names: Vec<&str> = blocks.iter().map(|b| b.name().unwrap()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}
