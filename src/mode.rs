// Realtek MCP Crypto Engine Driver
// Copyright 2025 Henk-Jan Lebbink
// SPDX-License-Identifier: MIT

//! Control-word selectors: algorithm, block-cipher mode and key source.
//!
//! The encodings match the engine's descriptor control word as exposed by
//! the vendor `rtk_mcp.h` uapi header.

/// Algorithm selector, bits [4:0] of the control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Algorithm {
    /// Single DES.
    Des = 0x00,

    /// Triple DES (EDE, three keys).
    TripleDes = 0x01,

    /// RC4 stream cipher.
    Rc4 = 0x02,

    /// MD5 block transform.
    Md5 = 0x03,

    /// SHA-1 block transform.
    Sha1 = 0x04,

    /// AES-128.
    Aes = 0x05,

    /// AES with G-function output (engine specific).
    AesG = 0x06,

    /// AES with H-function output (engine specific).
    AesH = 0x07,

    /// AES-CMAC.
    Cmac = 0x08,

    /// SHA-256 block transform.
    Sha256 = 0x0b,

    /// AES-256, key fetched from DDR.
    Aes256 = 0x15,

    /// SHA-512 block transform, state fetched from DDR.
    Sha512 = 0x16,

    /// AES-192.
    Aes192 = 0x1d,
}

impl Algorithm {
    /// Returns the raw selector value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Decode a selector from the low five bits of a control word.
    pub const fn from_bits(bits: u32) -> Option<Self> {
        Some(match bits & 0x1f {
            0x00 => Self::Des,
            0x01 => Self::TripleDes,
            0x02 => Self::Rc4,
            0x03 => Self::Md5,
            0x04 => Self::Sha1,
            0x05 => Self::Aes,
            0x06 => Self::AesG,
            0x07 => Self::AesH,
            0x08 => Self::Cmac,
            0x0b => Self::Sha256,
            0x15 => Self::Aes256,
            0x16 => Self::Sha512,
            0x1d => Self::Aes192,
            _ => return None,
        })
    }

    /// Granularity, in bytes, at which the engine consumes input.
    pub const fn block_size(self) -> u32 {
        match self {
            Self::Des | Self::TripleDes => 8,
            Self::Rc4 => 1,
            Self::Aes | Self::AesG | Self::AesH | Self::Cmac | Self::Aes192 | Self::Aes256 => 16,
            Self::Md5 | Self::Sha1 | Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Returns true for the hash block transforms.
    pub const fn is_hash(self) -> bool {
        matches!(self, Self::Md5 | Self::Sha1 | Self::Sha256 | Self::Sha512)
    }

    /// Returns a human-readable name for the algorithm.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Des => "DES",
            Self::TripleDes => "3DES",
            Self::Rc4 => "RC4",
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA1",
            Self::Aes => "AES",
            Self::AesG => "AES_G",
            Self::AesH => "AES_H",
            Self::Cmac => "CMAC",
            Self::Sha256 => "SHA256",
            Self::Aes256 => "AES_256",
            Self::Sha512 => "SHA512",
            Self::Aes192 => "AES_192",
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#04x})", self.name(), self.as_u32())
    }
}

/// Block-cipher mode, bits [7:6] of the control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum BlockMode {
    Ecb = 0,
    Cbc = 1,
    Ctr = 2,
    /// Stream mode, only meaningful together with [`Algorithm::Rc4`].
    Rc4 = 3,
}

impl BlockMode {
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    pub const fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => Self::Ecb,
            1 => Self::Cbc,
            2 => Self::Ctr,
            _ => Self::Rc4,
        }
    }
}

/// Key source, bits [13:12] of the control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum KeySelect {
    /// Key words are inline in the descriptor.
    Descriptor = 0,
    /// One-time-programmable key.
    Otp = 1,
    /// Control word from the transport processor.
    ControlWord = 2,
    /// `key[0]` holds the DMA address of the key material.
    Ddr = 3,
}

impl KeySelect {
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    pub const fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => Self::Descriptor,
            1 => Self::Otp,
            2 => Self::ControlWord,
            _ => Self::Ddr,
        }
    }
}
