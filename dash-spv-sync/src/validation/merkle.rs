//! BIP37 merkle block validation.
//!
//! The partial tree walk itself is done by `dashcore`. It rebuilds the root,
//! compares it with the header and rejects trees whose hashes or flag bits are
//! not fully consumed or that duplicate a subtree (CVE-2012-2459).

use dashcore::merkle_tree::MerkleBlock;
use dashcore::Txid;

use crate::error::{ValidationError, ValidationResult};

/// Validate the proof carried by `block` and return the matched transaction ids
/// in block order.
pub fn validate_merkle_block(block: &MerkleBlock) -> ValidationResult<Vec<Txid>> {
    let mut matches = Vec::new();
    let mut indexes = Vec::new();
    block.extract_matches(&mut matches, &mut indexes).map_err(ValidationError::MerkleBlock)?;
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use dashcore::merkle_tree::PartialMerkleTree;
    use dashcore::TxMerkleNode;
    use dashcore_hashes::Hash;

    use super::*;
    use crate::test_utils::{merkle_block, test_txids};

    #[test]
    fn test_single_transaction_block() {
        let txids = test_txids(1);
        let block = merkle_block(&txids, &[true]);

        assert_eq!(validate_merkle_block(&block).unwrap(), txids);
    }

    #[test]
    fn test_extracts_only_matched_transactions() {
        let txids = test_txids(7);
        let matches = [false, true, false, false, true, false, true];
        let block = merkle_block(&txids, &matches);

        let extracted = validate_merkle_block(&block).unwrap();
        assert_eq!(extracted, vec![txids[1], txids[4], txids[6]]);
    }

    #[test]
    fn test_no_matches_still_validates_root() {
        let txids = test_txids(5);
        let block = merkle_block(&txids, &[false; 5]);

        assert!(validate_merkle_block(&block).unwrap().is_empty());
    }

    #[test]
    fn test_wrong_root_is_rejected() {
        let txids = test_txids(4);
        let mut block = merkle_block(&txids, &[true, false, false, false]);
        block.header.merkle_root = TxMerkleNode::from_byte_array([0xab; 32]);

        assert!(matches!(validate_merkle_block(&block), Err(ValidationError::MerkleBlock(_))));
    }

    #[test]
    fn test_proof_for_other_transactions_is_rejected() {
        let txids = test_txids(4);
        let other = test_txids(8)[4..].to_vec();
        let mut block = merkle_block(&txids, &[true, true, false, false]);
        block.txn = PartialMerkleTree::from_txids(&other, &[true, true, false, false]);

        assert!(validate_merkle_block(&block).is_err());
    }

    #[test]
    fn test_duplicated_subtree_is_rejected() {
        // [a, b, c, c] hashes to the same root as [a, b, c].
        let mut txids = test_txids(3);
        let honest = merkle_block(&txids, &[true, true, true]);
        txids.push(txids[2]);
        let mut forged = merkle_block(&txids, &[true, true, true, true]);
        forged.header = honest.header;

        assert!(validate_merkle_block(&honest).is_ok());
        assert!(validate_merkle_block(&forged).is_err());
    }
}
