// ton/cell.rs
//
// Minimal TON data-cell building and address codec. Only the pieces the
// escrow contract needs are implemented: bit-level writes for the contract
// data layout, the friendly (base64, CRC-guarded) address form, and the
// state-init hash that determines a contract address before deployment.

use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::EscrowError;

/// CRC-16/XMODEM, the checksum used by friendly TON addresses.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

const BOUNCEABLE_TAG: u8 = 0x11;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawAddress {
    pub workchain: i8,
    pub hash: [u8; 32],
}

impl RawAddress {
    /// Decodes the 48-character friendly form, verifying length and checksum.
    pub fn parse_friendly(address: &str) -> Result<RawAddress, EscrowError> {
        if address.len() != 48 {
            return Err(EscrowError::InvalidAddress(address.to_string()));
        }
        // Wallets emit both the url-safe and the standard alphabet.
        let normalized: String = address
            .chars()
            .map(|c| match c {
                '+' => '-',
                '/' => '_',
                other => other,
            })
            .collect();
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(normalized)
            .map_err(|_| EscrowError::InvalidAddress(address.to_string()))?;
        if bytes.len() != 36 {
            return Err(EscrowError::InvalidAddress(address.to_string()));
        }
        let checksum = u16::from_be_bytes([bytes[34], bytes[35]]);
        if checksum != crc16(&bytes[..34]) {
            return Err(EscrowError::InvalidAddress(address.to_string()));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[2..34]);
        Ok(RawAddress {
            workchain: bytes[1] as i8,
            hash,
        })
    }

    /// Bounceable friendly form ("EQ..." on the basechain).
    pub fn to_friendly(&self) -> String {
        let mut bytes = Vec::with_capacity(36);
        bytes.push(BOUNCEABLE_TAG);
        bytes.push(self.workchain as u8);
        bytes.extend_from_slice(&self.hash);
        let checksum = crc16(&bytes);
        bytes.extend_from_slice(&checksum.to_be_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// A finished cell: raw bits plus their count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
}

impl Cell {
    /// Canonical byte form: bit length, then the padded payload.
    pub fn repr(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.data.len());
        out.extend_from_slice(&(self.bit_len as u16).to_be_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

#[derive(Debug, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store_bit(&mut self, bit: bool) -> &mut Self {
        let byte_index = self.bit_len / 8;
        if byte_index == self.data.len() {
            self.data.push(0);
        }
        if bit {
            self.data[byte_index] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
        self
    }

    pub fn store_uint(&mut self, value: u64, bits: u32) -> &mut Self {
        for i in (0..bits).rev() {
            self.store_bit((value >> i) & 1 == 1);
        }
        self
    }

    /// Variable-length coin amount: 4-bit byte count, then the amount.
    pub fn store_coins(&mut self, amount_nano: i64) -> &mut Self {
        let amount = amount_nano as u64;
        let byte_len = if amount == 0 {
            0
        } else {
            (8 - amount.leading_zeros() / 8) as u64
        };
        self.store_uint(byte_len, 4);
        self.store_uint(amount, byte_len as u32 * 8);
        self
    }

    /// Internal address: std-address tag, workchain, account hash.
    pub fn store_address(&mut self, address: &RawAddress) -> &mut Self {
        self.store_uint(0b100, 3);
        self.store_uint(address.workchain as u8 as u64, 8);
        for &byte in &address.hash {
            self.store_uint(byte as u64, 8);
        }
        self
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        for &byte in bytes {
            self.store_uint(byte as u64, 8);
        }
        self
    }

    pub fn finish(self) -> Cell {
        Cell {
            data: self.data,
            bit_len: self.bit_len,
        }
    }
}

/// Hash of a contract's state init (code + data). This is what the chain
/// uses as the account address, so it is computable before deployment.
pub fn state_init_hash(code: &Cell, data: &Cell) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(code.repr());
    hasher.update(data.repr());
    hasher.finalize().into()
}

/// Serialized state init carried on a deploy message.
pub fn state_init_bytes(code: &Cell, data: &Cell) -> Vec<u8> {
    let mut out = code.repr();
    out.extend_from_slice(&data.repr());
    out
}
