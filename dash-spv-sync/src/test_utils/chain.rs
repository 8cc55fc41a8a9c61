use dashcore::block::Version;
use dashcore::hashes::sha256d;
use dashcore::merkle_tree::{MerkleBlock, PartialMerkleTree};
use dashcore::{
    BlockHash, CompactTarget, Header as BlockHeader, OutPoint, ScriptBuf, Transaction, TxIn,
    TxMerkleNode, TxOut, Txid,
};
use dashcore_hashes::Hash;

/// Header with regtest difficulty bits.
pub fn test_header(
    prev_blockhash: BlockHash,
    merkle_root: TxMerkleNode,
    nonce: u32,
) -> BlockHeader {
    BlockHeader {
        version: Version::from_consensus(1),
        prev_blockhash,
        merkle_root,
        time: 1_700_000_000 + nonce,
        bits: CompactTarget::from_consensus(0x207fffff),
        nonce,
    }
}

/// Txid of the single transaction in blocks built by [`header_chain`] and
/// [`extend_chain`].
fn coinbase_txid(nonce: u32) -> Txid {
    Txid::from_byte_array(sha256d::Hash::hash(&nonce.to_le_bytes()).to_byte_array())
}

/// `count` linked headers starting with a root at height 0.
pub fn header_chain(count: usize, seed: u32) -> Vec<BlockHeader> {
    if count == 0 {
        return Vec::new();
    }
    let nonce = seed.wrapping_mul(100_000);
    let root = test_header(
        BlockHash::all_zeros(),
        TxMerkleNode::from_byte_array(coinbase_txid(nonce).to_byte_array()),
        nonce,
    );
    let mut headers = vec![root];
    headers.extend(extend_chain(&root, count - 1, seed));
    headers
}

/// `count` headers building on `parent`. Different seeds give different branches.
pub fn extend_chain(parent: &BlockHeader, count: usize, seed: u32) -> Vec<BlockHeader> {
    let mut headers = Vec::with_capacity(count);
    let mut prev = *parent;
    for _ in 0..count {
        let nonce = seed.wrapping_mul(100_000).wrapping_add(prev.nonce % 100_000 + 1);
        let header = test_header(
            prev.block_hash(),
            TxMerkleNode::from_byte_array(coinbase_txid(nonce).to_byte_array()),
            nonce,
        );
        headers.push(header);
        prev = header;
    }
    headers
}

/// Merkle block for a header built by [`header_chain`] or [`extend_chain`],
/// matching nothing.
pub fn to_merkle_block(header: &BlockHeader) -> MerkleBlock {
    MerkleBlock {
        header: *header,
        txn: PartialMerkleTree::from_txids(&[coinbase_txid(header.nonce)], &[false]),
    }
}

/// Merkle block over `txids` whose header does not connect to any chain.
pub fn merkle_block(txids: &[Txid], matches: &[bool]) -> MerkleBlock {
    build_merkle_block(BlockHash::all_zeros(), txids, matches, 0)
}

/// Merkle block over `txids` building on `parent`.
pub fn child_block(
    parent: &BlockHeader,
    txids: &[Txid],
    matches: &[bool],
    seed: u32,
) -> MerkleBlock {
    build_merkle_block(parent.block_hash(), txids, matches, seed)
}

fn build_merkle_block(
    prev_blockhash: BlockHash,
    txids: &[Txid],
    matches: &[bool],
    nonce: u32,
) -> MerkleBlock {
    let txn = PartialMerkleTree::from_txids(txids, matches);
    // A tree that does not extract cleanly gets a root nothing can match.
    let merkle_root = txn
        .extract_matches(&mut Vec::new(), &mut Vec::new())
        .unwrap_or_else(|_| TxMerkleNode::all_zeros());
    MerkleBlock {
        header: test_header(prev_blockhash, merkle_root, nonce),
        txn,
    }
}

/// `count` distinct transaction ids.
pub fn test_txids(count: usize) -> Vec<Txid> {
    (0..count)
        .map(|i| {
            let preimage = format!("test-tx-{}", i);
            Txid::from_byte_array(sha256d::Hash::hash(preimage.as_bytes()).to_byte_array())
        })
        .collect()
}

/// Pay-to-pubkey-hash script over a fixed key hash derived from `n`.
pub fn test_script(n: u8) -> ScriptBuf {
    let mut bytes = vec![0x76, 0xa9, 0x14];
    bytes.extend_from_slice(&[n; 20]);
    bytes.extend_from_slice(&[0x88, 0xac]);
    ScriptBuf::from(bytes)
}

/// Transaction without inputs paying `value` to `script`.
pub fn pay_to(script: ScriptBuf, value: u64) -> Transaction {
    Transaction {
        version: 1,
        lock_time: 0,
        input: vec![],
        output: vec![TxOut {
            value,
            script_pubkey: script,
        }],
        special_transaction_payload: None,
    }
}

/// Transaction spending `outpoint` to `script`.
pub fn spend(outpoint: OutPoint, script: ScriptBuf) -> Transaction {
    Transaction {
        version: 1,
        lock_time: 0,
        input: vec![TxIn {
            previous_output: outpoint,
            ..Default::default()
        }],
        output: vec![TxOut {
            value: 1_000,
            script_pubkey: script,
        }],
        special_transaction_payload: None,
    }
}
