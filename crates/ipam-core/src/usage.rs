//! Utilization and hierarchy queries
//!
//! Containment is never stored. Parents, children and longest-prefix matches
//! are derived from CIDR arithmetic over the current tables, so they can
//! never go stale.

use crate::error::IpamError;
use crate::models::*;
use crate::store::{IpamState, IpamStore};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// Utilization of a block
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of addresses in the block
    pub total: u128,
    /// Addresses that are ASSIGNED, RESERVED or CONFLICT
    pub used: u128,
    /// `used / total` in percent, rounded to 2 decimals; 0 for an empty block
    pub percentage: f64,
}

impl Usage {
    #[must_use]
    pub fn new(total: u128, used: u128) -> Self {
        let percentage = if total == 0 {
            0.0
        } else {
            ((used as f64 / total as f64) * 100.0 * 100.0).round() / 100.0
        };
        Self {
            total,
            used,
            percentage,
        }
    }
}

// Aggregates sit above prefixes, which sit above ranges, when spans are equal
fn rank(block: &Block) -> u8 {
    match block {
        Block::Aggregate(_) => 0,
        Block::Prefix(_) => 1,
        Block::Range(_) => 2,
    }
}

/// Whether `outer` is an ancestor of `inner` by address arithmetic alone
fn encloses(outer: &Block, inner: &Block) -> bool {
    let (a, b) = (outer.span(), inner.span());
    outer.block_ref() != inner.block_ref()
        && a.contains(&b)
        && (a != b || rank(outer) < rank(inner))
}

/// Candidate children of `block`; aggregates see every VRF
fn descendants(state: &IpamState, block: &Block) -> Vec<Block> {
    let scope = IpamState::block_scope(block);
    state
        .blocks()
        .filter(|b| !matches!(b, Block::Aggregate(_)))
        .filter(|b| scope.is_none_or(|vrf_id| b.vrf_id() == vrf_id))
        .filter(|b| encloses(block, b))
        .collect()
}

fn sort_most_specific_first(blocks: &mut [Block]) {
    blocks.sort_by(|a, b| {
        a.span()
            .size()
            .cmp(&b.span().size())
            .then_with(|| a.seq().cmp(&b.seq()))
    });
}

impl IpamStore {
    /// Total, used and percentage utilization of an aggregate, prefix or range
    pub async fn usage(&self, block: BlockRef) -> Result<Usage, IpamError> {
        let state = self.read().await;
        let block = state.block(block)?;
        let span = block.span();
        let used = state
            .addresses_within(span, IpamState::block_scope(&block))
            .filter(|ip| ip.state.is_in_use())
            .count();
        Ok(Usage::new(span.size(), used as u128))
    }

    /// Blocks containing `address`, most specific first.
    ///
    /// Prefixes and ranges must belong to `vrf` (`None` is the global table);
    /// aggregates match regardless of VRF. Equal sizes are ordered by creation.
    pub async fn what_contains(&self, address: IpAddr, vrf: Option<Uuid>) -> Vec<Block> {
        let state = self.read().await;
        let mut matches: Vec<Block> = state
            .blocks()
            .filter(|b| b.span().contains_ip(address))
            .filter(|b| matches!(b, Block::Aggregate(_)) || b.vrf_id() == vrf)
            .collect();
        sort_most_specific_first(&mut matches);
        matches
    }

    /// Directly contained prefixes and ranges of a block (one level).
    ///
    /// A candidate is dropped when another candidate of its VRF sits between
    /// it and `block`. Ranges have no children.
    pub async fn children(&self, block: BlockRef) -> Result<Vec<Block>, IpamError> {
        let state = self.read().await;
        let block = state.block(block)?;
        if matches!(block, Block::Range(_)) {
            return Ok(Vec::new());
        }

        let candidates = descendants(&state, &block);
        let mut direct: Vec<Block> = candidates
            .iter()
            .filter(|child| {
                !candidates.iter().any(|between| {
                    matches!(between, Block::Prefix(_))
                        && between.vrf_id() == child.vrf_id()
                        && encloses(between, child)
                })
            })
            .cloned()
            .collect();
        direct.sort_by(|a, b| {
            a.version()
                .cmp(&b.version())
                .then_with(|| a.span().first().cmp(&b.span().first()))
                .then_with(|| a.seq().cmp(&b.seq()))
        });
        Ok(direct)
    }

    /// Aggregates and prefixes enclosing a block, most specific first
    pub async fn parents(&self, block: BlockRef) -> Result<Vec<Block>, IpamError> {
        let state = self.read().await;
        let block = state.block(block)?;
        let is_aggregate = matches!(block, Block::Aggregate(_));
        let mut parents: Vec<Block> = state
            .blocks()
            .filter(|b| match b {
                Block::Aggregate(_) => true,
                Block::Prefix(p) => !is_aggregate && p.vrf_id == block.vrf_id(),
                Block::Range(_) => false,
            })
            .filter(|b| encloses(b, &block))
            .collect();
        sort_most_specific_first(&mut parents);
        Ok(parents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IpamConfig;

    fn store() -> IpamStore {
        IpamStore::new(IpamConfig::default())
    }

    async fn prefix(store: &IpamStore, text: &str, vrf_id: Option<Uuid>) -> Prefix {
        store
            .create_prefix(NewPrefix {
                prefix: text.to_string(),
                vrf_id,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn address(store: &IpamStore, text: &str, state: AllocationState) -> IpAddress {
        store
            .create_ip_address(NewIpAddress {
                address: text.to_string(),
                state,
                ..Default::default()
            })
            .await
            .unwrap()
    }

    async fn aggregate(store: &IpamStore, text: &str) -> Aggregate {
        let rir = match store.list_rirs().await.into_iter().next() {
            Some(rir) => rir,
            None => store
                .create_rir(NewRir {
                    name: "RFC 1918".to_string(),
                    slug: "rfc-1918".to_string(),
                    is_private: true,
                    ..Default::default()
                })
                .await
                .unwrap(),
        };
        store
            .create_aggregate(NewAggregate {
                prefix: text.to_string(),
                rir_id: rir.id,
                date_added: None,
                description: String::new(),
            })
            .await
            .unwrap()
    }

    fn refs(blocks: &[Block]) -> Vec<BlockRef> {
        blocks.iter().map(Block::block_ref).collect()
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(Usage::new(256, 10).percentage, 3.91);
        assert_eq!(Usage::new(3, 1).percentage, 33.33);
        assert_eq!(Usage::new(0, 0).percentage, 0.0);
    }

    #[tokio::test]
    async fn test_usage_counts_in_use_states_only() {
        let store = store();
        let p = prefix(&store, "10.0.0.0/24", None).await;
        for i in 1..=10 {
            address(&store, &format!("10.0.0.{}/24", i), AllocationState::Assigned).await;
        }
        address(&store, "10.0.0.50/24", AllocationState::Free).await;
        // Outside the prefix
        address(&store, "10.0.1.1/24", AllocationState::Assigned).await;

        let usage = store.usage(BlockRef::Prefix(p.id)).await.unwrap();
        assert_eq!(
            usage,
            Usage {
                total: 256,
                used: 10,
                percentage: 3.91
            }
        );

        address(&store, "10.0.0.51/24", AllocationState::Reserved).await;
        address(&store, "10.0.0.52/24", AllocationState::Conflict).await;
        assert_eq!(store.usage(BlockRef::Prefix(p.id)).await.unwrap().used, 12);
    }

    #[tokio::test]
    async fn test_usage_ipv6_size() {
        let store = store();
        let p = prefix(&store, "2001:db8::/32", None).await;
        let usage = store.usage(BlockRef::Prefix(p.id)).await.unwrap();
        assert_eq!(usage.total, 1u128 << 96);
        assert_eq!(usage.used, 0);
        assert_eq!(usage.percentage, 0.0);
    }

    #[tokio::test]
    async fn test_usage_is_vrf_scoped_except_for_aggregates() {
        let store = store();
        let vrf = store
            .create_vrf(NewVrf {
                name: "blue".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let agg = aggregate(&store, "10.0.0.0/8").await;
        let global = prefix(&store, "10.0.0.0/24", None).await;
        store
            .create_ip_address(NewIpAddress {
                address: "10.0.0.1/24".to_string(),
                vrf_id: Some(vrf.id),
                state: AllocationState::Assigned,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(store.usage(BlockRef::Prefix(global.id)).await.unwrap().used, 0);
        assert_eq!(store.usage(BlockRef::Aggregate(agg.id)).await.unwrap().used, 1);
    }

    #[tokio::test]
    async fn test_what_contains_longest_match_first() {
        let store = store();
        let agg = aggregate(&store, "10.0.0.0/8").await;
        let wide = prefix(&store, "10.0.0.0/16", None).await;
        let narrow = prefix(&store, "10.0.1.0/24", None).await;
        let range = store
            .create_ip_range(NewIpRange {
                start_address: "10.0.1.10/24".to_string(),
                end_address: "10.0.1.20/24".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        prefix(&store, "10.0.2.0/24", None).await;

        let found = store.what_contains("10.0.1.15".parse().unwrap(), None).await;
        assert_eq!(
            refs(&found),
            vec![
                BlockRef::Range(range.id),
                BlockRef::Prefix(narrow.id),
                BlockRef::Prefix(wide.id),
                BlockRef::Aggregate(agg.id)
            ]
        );

        // Other VRFs only see the aggregate
        let other = store
            .what_contains("10.0.1.15".parse().unwrap(), Some(Uuid::new_v4()))
            .await;
        assert_eq!(refs(&other), vec![BlockRef::Aggregate(agg.id)]);
    }

    #[tokio::test]
    async fn test_what_contains_ties_by_creation_order() {
        let store = store();
        let first = aggregate(&store, "10.0.0.0/24").await;
        let second = prefix(&store, "10.0.0.0/24", None).await;

        let found = store.what_contains("10.0.0.9".parse().unwrap(), None).await;
        assert_eq!(
            refs(&found),
            vec![BlockRef::Aggregate(first.id), BlockRef::Prefix(second.id)]
        );
    }

    #[tokio::test]
    async fn test_children_one_level() {
        let store = store();
        let agg = aggregate(&store, "10.0.0.0/8").await;
        let a = prefix(&store, "10.0.0.0/16", None).await;
        let a1 = prefix(&store, "10.0.1.0/24", None).await;
        let b = prefix(&store, "10.1.0.0/16", None).await;
        let range = store
            .create_ip_range(NewIpRange {
                start_address: "10.0.1.10/24".to_string(),
                end_address: "10.0.1.20/24".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let top = store.children(BlockRef::Aggregate(agg.id)).await.unwrap();
        assert_eq!(refs(&top), vec![BlockRef::Prefix(a.id), BlockRef::Prefix(b.id)]);

        let under_a = store.children(BlockRef::Prefix(a.id)).await.unwrap();
        assert_eq!(refs(&under_a), vec![BlockRef::Prefix(a1.id)]);

        let under_a1 = store.children(BlockRef::Prefix(a1.id)).await.unwrap();
        assert_eq!(refs(&under_a1), vec![BlockRef::Range(range.id)]);

        assert!(store.children(BlockRef::Range(range.id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_children_respect_vrf() {
        let store = store();
        let vrf = store
            .create_vrf(NewVrf {
                name: "blue".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        let parent = prefix(&store, "10.0.0.0/16", None).await;
        prefix(&store, "10.0.1.0/24", Some(vrf.id)).await;

        assert!(store.children(BlockRef::Prefix(parent.id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parents_most_specific_first() {
        let store = store();
        let agg = aggregate(&store, "10.0.0.0/8").await;
        let wide = prefix(&store, "10.0.0.0/16", None).await;
        let narrow = prefix(&store, "10.0.1.0/24", None).await;

        let parents = store.parents(BlockRef::Prefix(narrow.id)).await.unwrap();
        assert_eq!(
            refs(&parents),
            vec![BlockRef::Prefix(wide.id), BlockRef::Aggregate(agg.id)]
        );
        assert!(store.parents(BlockRef::Aggregate(agg.id)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_block_is_not_found() {
        let store = store();
        assert!(matches!(
            store.usage(BlockRef::Prefix(Uuid::new_v4())).await,
            Err(IpamError::NotFound(_))
        ));
    }
}
