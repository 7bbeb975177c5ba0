//! Capabilities the pool needs from the rest of the node.
//!
//! Both are expected to be backed by local storage, so calls are synchronous.

use atlas_common::{
    env::{
        block::{BlockMeta, Commit},
        state::ChainState,
        validator::ValidatorSet,
    },
    error::Result,
};

/// Access to committed chain state.
pub trait StateProvider: Send + Sync {
    /// Loads the state as of the latest committed block.
    fn load(&self) -> Result<ChainState>;

    /// Loads the validator set that was active at `height`.
    fn load_validators(&self, height: u64) -> Result<ValidatorSet>;
}

/// Read access to stored blocks.
pub trait BlockStore: Send + Sync {
    /// Height of the latest stored block.
    fn height(&self) -> u64;

    fn load_block_meta(&self, height: u64) -> Option<BlockMeta>;

    /// Loads the commit for the block at `height`.
    fn load_block_commit(&self, height: u64) -> Option<Commit>;
}
