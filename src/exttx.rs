//! Bitcoin-family transaction model shared by the proof verifier, the batch
//! builder and the signature collector.
//!
//! The compact consensus encoding here is what external-chain tx ids and
//! sighashes are computed over, so batch re-derivation stays bit-exact across
//! nodes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::{ChainError, ChainResult};

const OP_RETURN: u8 = 0x6a;
const OP_PUSHDATA1: u8 = 0x4c;
/// SIGHASH_ALL, appended to the sighash preimage as a little-endian u32.
pub const SIGHASH_ALL: u32 = 0x01;

pub type TxId = [u8; 32];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Previous tx id in internal (non-reversed) byte order.
    pub prev_txid: TxId,
    pub prev_vout: u32,
    #[serde(with = "hex::serde")]
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxInput {
    pub fn outpoint(prev_txid: TxId, prev_vout: u32) -> Self {
        Self {
            prev_txid,
            prev_vout,
            script_sig: Vec::new(),
            sequence: u32::MAX,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value_sat: u64,
    #[serde(with = "hex::serde")]
    pub script_pubkey: Vec<u8>,
}

impl TxOutput {
    /// An OP_RETURN output carrying `memo` as its pushed data.
    pub fn op_return(memo: &[u8]) -> Self {
        let mut script = Vec::with_capacity(memo.len() + 3);
        script.push(OP_RETURN);
        if memo.len() < OP_PUSHDATA1 as usize {
            script.push(memo.len() as u8);
        } else {
            script.push(OP_PUSHDATA1);
            script.push(memo.len() as u8);
        }
        script.extend_from_slice(memo);
        Self {
            value_sat: 0,
            script_pubkey: script,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalTx {
    pub version: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub lock_time: u32,
}

impl ExternalTx {
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            version: 2,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + 64 * self.inputs.len() + 48 * self.outputs.len());
        out.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(&input.prev_txid);
            out.extend_from_slice(&input.prev_vout.to_le_bytes());
            write_varint(&mut out, input.script_sig.len() as u64);
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value_sat.to_le_bytes());
            write_varint(&mut out, output.script_pubkey.len() as u64);
            out.extend_from_slice(&output.script_pubkey);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> ChainResult<Self> {
        let mut cursor = Cursor::new(bytes);
        let version = cursor.read_u32()?;
        let input_count = cursor.read_varint()?;
        let mut inputs = Vec::with_capacity(input_count.min(1024) as usize);
        for _ in 0..input_count {
            let prev_txid = cursor.read_array::<32>()?;
            let prev_vout = cursor.read_u32()?;
            let script_len = cursor.read_varint()?;
            let script_sig = cursor.read_bytes(script_len as usize)?.to_vec();
            let sequence = cursor.read_u32()?;
            inputs.push(TxInput {
                prev_txid,
                prev_vout,
                script_sig,
                sequence,
            });
        }
        let output_count = cursor.read_varint()?;
        let mut outputs = Vec::with_capacity(output_count.min(1024) as usize);
        for _ in 0..output_count {
            let value_sat = cursor.read_u64()?;
            let script_len = cursor.read_varint()?;
            let script_pubkey = cursor.read_bytes(script_len as usize)?.to_vec();
            outputs.push(TxOutput {
                value_sat,
                script_pubkey,
            });
        }
        let lock_time = cursor.read_u32()?;
        if !cursor.is_empty() {
            return Err(ChainError::Encoding(
                "trailing bytes after external tx".into(),
            ));
        }
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    pub fn txid(&self) -> TxId {
        double_sha256(&self.encode())
    }

    /// Tx id as the conventional reversed-hex display string.
    pub fn txid_hex(&self) -> String {
        let mut id = self.txid();
        id.reverse();
        hex::encode(id)
    }

    /// The pushed data of the first OP_RETURN output, if any.
    pub fn memo(&self) -> Option<Vec<u8>> {
        self.outputs.iter().find_map(|output| {
            let script = &output.script_pubkey;
            if script.first() != Some(&OP_RETURN) {
                return None;
            }
            match script.get(1) {
                Some(&len) if len < OP_PUSHDATA1 => {
                    script.get(2..2 + len as usize).map(|d| d.to_vec())
                }
                Some(&OP_PUSHDATA1) => {
                    let len = *script.get(2)? as usize;
                    script.get(3..3 + len).map(|d| d.to_vec())
                }
                _ => None,
            }
        })
    }

    /// Legacy sighash for `txin_index` with `script_code` substituted: all
    /// other inputs carry empty scripts, SIGHASH_ALL is appended.
    pub fn sighash(&self, txin_index: usize, script_code: &[u8]) -> ChainResult<[u8; 32]> {
        if txin_index >= self.inputs.len() {
            return Err(ChainError::Crypto(format!(
                "txin index {txin_index} out of range ({} inputs)",
                self.inputs.len()
            )));
        }
        let mut stripped = self.clone();
        for (index, input) in stripped.inputs.iter_mut().enumerate() {
            input.script_sig = if index == txin_index {
                script_code.to_vec()
            } else {
                Vec::new()
            };
        }
        let mut preimage = stripped.encode();
        preimage.extend_from_slice(&SIGHASH_ALL.to_le_bytes());
        Ok(double_sha256(&preimage))
    }
}

pub fn double_sha256(bytes: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(bytes);
    let second = Sha256::digest(first);
    second.into()
}

/// Parse a reversed-hex display tx id back into internal byte order.
pub fn txid_from_hex(display: &str) -> ChainResult<TxId> {
    let bytes = hex::decode(display)?;
    let mut id: TxId = bytes
        .try_into()
        .map_err(|_| ChainError::Encoding("tx id must be 32 bytes".into()))?;
    id.reverse();
    Ok(id)
}

fn write_varint(out: &mut Vec<u8>, value: u64) {
    match value {
        0..=0xfc => out.push(value as u8),
        0xfd..=0xffff => {
            out.push(0xfd);
            out.extend_from_slice(&(value as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(0xfe);
            out.extend_from_slice(&(value as u32).to_le_bytes());
        }
        _ => {
            out.push(0xff);
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn is_empty(&self) -> bool {
        self.offset == self.bytes.len()
    }

    fn read_bytes(&mut self, len: usize) -> ChainResult<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| ChainError::Encoding("external tx truncated".into()))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> ChainResult<[u8; N]> {
        let slice = self.read_bytes(N)?;
        Ok(slice.try_into().expect("slice length checked"))
    }

    fn read_u32(&mut self) -> ChainResult<u32> {
        Ok(u32::from_le_bytes(self.read_array::<4>()?))
    }

    fn read_u64(&mut self) -> ChainResult<u64> {
        Ok(u64::from_le_bytes(self.read_array::<8>()?))
    }

    fn read_varint(&mut self) -> ChainResult<u64> {
        let tag = self.read_bytes(1)?[0];
        Ok(match tag {
            0xfd => u16::from_le_bytes(self.read_array::<2>()?) as u64,
            0xfe => u32::from_le_bytes(self.read_array::<4>()?) as u64,
            0xff => u64::from_le_bytes(self.read_array::<8>()?),
            value => value as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> ExternalTx {
        ExternalTx::new(
            vec![TxInput::outpoint([7u8; 32], 1)],
            vec![
                TxOutput {
                    value_sat: 5_000,
                    script_pubkey: vec![0xa9, 0x14, 0x11, 0x22],
                },
                TxOutput::op_return(b"portal-batch-1"),
            ],
        )
    }

    #[test]
    fn encode_decode_round_trip() {
        let tx = sample_tx();
        let decoded = ExternalTx::decode(&tx.encode()).expect("decode");
        assert_eq!(decoded, tx);
    }

    #[test]
    fn memo_extraction_finds_op_return() {
        assert_eq!(sample_tx().memo().as_deref(), Some(&b"portal-batch-1"[..]));
        let plain = ExternalTx::new(vec![], vec![]);
        assert_eq!(plain.memo(), None);
    }

    #[test]
    fn txid_hex_round_trip() {
        let tx = sample_tx();
        let id = txid_from_hex(&tx.txid_hex()).expect("parse");
        assert_eq!(id, tx.txid());
    }

    #[test]
    fn sighash_is_deterministic_and_input_specific() {
        let mut tx = sample_tx();
        tx.inputs.push(TxInput::outpoint([9u8; 32], 0));
        let script = vec![0x51, 0x52];
        let first = tx.sighash(0, &script).expect("sighash");
        let again = tx.sighash(0, &script).expect("sighash");
        let second = tx.sighash(1, &script).expect("sighash");
        assert_eq!(first, again);
        assert_ne!(first, second);
        assert!(tx.sighash(2, &script).is_err());
    }
}
