use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::keys::hash_parts;

/// An unspent output held by the external-chain multisig wallet.
///
/// Immutable once added; removed only when spent by an unshield batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub wallet_address: String,
    /// Display (reversed-hex) external tx id.
    pub external_tx_hash: String,
    pub output_index: u32,
    pub amount_satoshi: u64,
}

impl Utxo {
    pub fn key(&self, token_id: &str) -> String {
        utxo_key(
            token_id,
            &self.wallet_address,
            &self.external_tx_hash,
            self.output_index,
        )
    }
}

pub fn utxo_key(token_id: &str, wallet: &str, tx_hash: &str, index: u32) -> String {
    hex::encode(hash_parts(&[
        token_id.as_bytes(),
        wallet.as_bytes(),
        tx_hash.as_bytes(),
        &index.to_be_bytes(),
    ]))
}

/// Keyed set of the multisig wallet's unspent outputs for one token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoPool {
    utxos: BTreeMap<String, Utxo>,
}

impl UtxoPool {
    pub fn insert(&mut self, token_id: &str, utxo: Utxo) {
        self.utxos.insert(utxo.key(token_id), utxo);
    }

    pub fn remove(&mut self, key: &str) -> Option<Utxo> {
        self.utxos.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.utxos.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    pub fn total_amount(&self) -> u64 {
        self.utxos.values().map(|utxo| utxo.amount_satoshi).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Utxo)> {
        self.utxos.iter()
    }

    /// Coin-selection order: amount descending, key ascending as tie-break.
    pub fn ordered_for_selection(&self) -> Vec<(String, Utxo)> {
        let mut entries = self
            .utxos
            .iter()
            .map(|(key, utxo)| (key.clone(), utxo.clone()))
            .collect::<Vec<_>>();
        entries.sort_by(|(key_a, a), (key_b, b)| {
            b.amount_satoshi
                .cmp(&a.amount_satoshi)
                .then_with(|| key_a.cmp(key_b))
        });
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tx: &str, index: u32, amount: u64) -> Utxo {
        Utxo {
            wallet_address: "multisig".into(),
            external_tx_hash: tx.into(),
            output_index: index,
            amount_satoshi: amount,
        }
    }

    #[test]
    fn selection_order_is_amount_desc_then_key() {
        let mut pool = UtxoPool::default();
        pool.insert("btc", sample("aa", 0, 500));
        pool.insert("btc", sample("bb", 1, 900));
        pool.insert("btc", sample("cc", 0, 500));
        let ordered = pool.ordered_for_selection();
        assert_eq!(ordered[0].1.amount_satoshi, 900);
        assert_eq!(ordered[1].1.amount_satoshi, 500);
        assert!(ordered[1].0 < ordered[2].0);
    }

    #[test]
    fn keys_distinguish_output_index() {
        let a = sample("aa", 0, 1);
        let b = sample("aa", 1, 1);
        assert_ne!(a.key("btc"), b.key("btc"));
        assert_ne!(a.key("btc"), a.key("bch"));
    }
}
