//! Chain applier (spec.md §4.3 C6).
//!
//! Enforces that each applied block extends the current head, validates
//! it, and commits it to the blockchain. Grounded on the normal-entry
//! branch of `nexus_raft::raft::node::ZoneConsensusDriver::apply_entries`
//! (decode payload, apply, notify), generalized to the parent-hash gate
//! spec.md's blockchain domain requires.

use std::sync::Arc;

use crate::contracts::{Block, BlockchainHandle};
use crate::error::{BlockraftError, Result};

/// Applies committed blocks to the blockchain, enforcing the
/// parent-match invariant (spec.md §8): for every applied normal entry
/// with non-empty payload, either the block is inserted with
/// `parent == previousHead`, or an `InvalidRaftOrdering` event is
/// emitted — never both, never neither.
pub struct ChainApplier<B: Block, H: BlockchainHandle<B>> {
    chain: Arc<H>,
    _marker: std::marker::PhantomData<B>,
}

impl<B: Block, H: BlockchainHandle<B>> ChainApplier<B, H> {
    pub fn new(chain: Arc<H>) -> Self {
        Self {
            chain,
            _marker: std::marker::PhantomData,
        }
    }

    /// Apply a committed block. See spec.md §4.3 for the exact branches.
    pub async fn apply_new_chain_head(&self, block: B) -> Result<()> {
        let head = self.chain.current_head().await;

        if block.parent_hash() != head {
            // Benign: the previous minter proposed a block before seeing
            // a prior one of its own get committed. Discard, don't insert.
            self.chain.publish_invalid_ordering(&block).await;
            return Ok(());
        }

        if self.chain.has_block(&block.hash()).await {
            // Idempotent replay after a crash between applying an entry
            // and persisting the applied index (spec.md §8).
            return self.chain.insert(&block).await.map_err(|e| {
                BlockraftError::InvariantViolation(format!("idempotent chain insert failed: {e}"))
            });
        }

        let valid = self.chain.validate(&block).await?;
        if !valid {
            // Consensus accepted a bad block: unrecoverable (spec.md §7).
            return Err(BlockraftError::InvariantViolation(format!(
                "block {:?} failed validation after being committed by consensus",
                block.hash()
            )));
        }

        self.chain
            .insert(&block)
            .await
            .map_err(|e| BlockraftError::InvariantViolation(format!("chain insert failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Clone, PartialEq, Eq, Debug)]
    struct TestBlock {
        hash: u64,
        parent: u64,
    }

    impl Block for TestBlock {
        type Hash = u64;
        fn hash(&self) -> u64 {
            self.hash
        }
        fn parent_hash(&self) -> u64 {
            self.parent
        }
    }

    struct FakeChain {
        head: Mutex<u64>,
        known: Mutex<Vec<u64>>,
        invalid_events: Mutex<Vec<u64>>,
        validate_result: bool,
    }

    #[async_trait]
    impl BlockchainHandle<TestBlock> for FakeChain {
        async fn current_head(&self) -> u64 {
            *self.head.lock().unwrap()
        }
        async fn has_block(&self, hash: &u64) -> bool {
            self.known.lock().unwrap().contains(hash)
        }
        async fn validate(&self, _block: &TestBlock) -> Result<bool> {
            Ok(self.validate_result)
        }
        async fn insert(&self, block: &TestBlock) -> Result<()> {
            *self.head.lock().unwrap() = block.hash();
            self.known.lock().unwrap().push(block.hash());
            Ok(())
        }
        async fn publish_invalid_ordering(&self, block: &TestBlock) {
            self.invalid_events.lock().unwrap().push(block.hash());
        }
    }

    #[tokio::test]
    async fn extends_head_and_inserts() {
        let chain = Arc::new(FakeChain {
            head: Mutex::new(0),
            known: Mutex::new(vec![]),
            invalid_events: Mutex::new(vec![]),
            validate_result: true,
        });
        let applier = ChainApplier::new(chain.clone());
        applier
            .apply_new_chain_head(TestBlock { hash: 1, parent: 0 })
            .await
            .unwrap();
        assert_eq!(*chain.head.lock().unwrap(), 1);
        assert!(chain.invalid_events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_extending_block_is_discarded_not_inserted() {
        let chain = Arc::new(FakeChain {
            head: Mutex::new(0),
            known: Mutex::new(vec![]),
            invalid_events: Mutex::new(vec![]),
            validate_result: true,
        });
        let applier = ChainApplier::new(chain.clone());
        applier
            .apply_new_chain_head(TestBlock { hash: 2, parent: 99 })
            .await
            .unwrap();
        assert_eq!(*chain.head.lock().unwrap(), 0);
        assert_eq!(*chain.invalid_events.lock().unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn known_block_is_replayed_idempotently_without_revalidation() {
        let chain = Arc::new(FakeChain {
            head: Mutex::new(0),
            known: Mutex::new(vec![1]),
            invalid_events: Mutex::new(vec![]),
            validate_result: false, // would fail validation if attempted
        });
        let applier = ChainApplier::new(chain.clone());
        applier
            .apply_new_chain_head(TestBlock { hash: 1, parent: 0 })
            .await
            .unwrap();
        assert_eq!(*chain.head.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn validation_failure_is_fatal() {
        let chain = Arc::new(FakeChain {
            head: Mutex::new(0),
            known: Mutex::new(vec![]),
            invalid_events: Mutex::new(vec![]),
            validate_result: false,
        });
        let applier = ChainApplier::new(chain);
        let err = applier
            .apply_new_chain_head(TestBlock { hash: 1, parent: 0 })
            .await
            .unwrap_err();
        assert!(crate::error::is_fatal(&err));
    }
}
