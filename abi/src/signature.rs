//! Node signature and its wire codec.

/// Length in bytes of a version-1 signature record on the wire.
pub const SIGNATURE_LEN_V1: usize = 26;

/// Signature version spoken by this engine.
pub const SIGNATURE_VERSION: u8 = 1;

/// Identity record of a node.
///
/// Learned from a node's hello/signature reply and immutable
/// afterwards. The MAC address is carried as three 16-bit groups,
/// matching the wire record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Signature {
    pub node_address: u16,
    pub group_address: u16,
    pub mac_47_32: u16,
    pub mac_31_16: u16,
    pub mac_15_0: u16,
    pub node_pos_addr: u16,
    pub diagnosis_id: u16,
    pub num_ports: u8,
    pub chip_id: u8,
    pub fw_major: u8,
    pub fw_minor: u8,
    pub fw_release: u8,
    pub fw_build: u32,
    pub cs_major: u8,
    pub cs_minor: u8,
    pub cs_release: u8,
}

impl Signature {
    /// Decodes a version-1 signature record from `raw`.
    ///
    /// Returns `None` if fewer than [`SIGNATURE_LEN_V1`] bytes are
    /// available. Extra bytes are ignored.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < SIGNATURE_LEN_V1 {
            return None;
        }
        let word = |i: usize| u16::from_be_bytes([raw[i], raw[i + 1]]);
        Some(Self {
            node_address: word(0),
            group_address: word(2),
            mac_47_32: word(4),
            mac_31_16: word(6),
            mac_15_0: word(8),
            node_pos_addr: word(10),
            diagnosis_id: word(12),
            num_ports: raw[14],
            chip_id: raw[15],
            fw_major: raw[16],
            fw_minor: raw[17],
            fw_release: raw[18],
            fw_build: u32::from_be_bytes([raw[19], raw[20], raw[21], raw[22]]),
            cs_major: raw[23],
            cs_minor: raw[24],
            cs_release: raw[25],
        })
    }

    /// Encodes this signature as a version-1 record into `out`.
    ///
    /// Returns the number of bytes written, `None` if `out` is shorter
    /// than [`SIGNATURE_LEN_V1`].
    pub fn encode(&self, out: &mut [u8]) -> Option<usize> {
        if out.len() < SIGNATURE_LEN_V1 {
            return None;
        }
        out[0..2].copy_from_slice(&self.node_address.to_be_bytes());
        out[2..4].copy_from_slice(&self.group_address.to_be_bytes());
        out[4..6].copy_from_slice(&self.mac_47_32.to_be_bytes());
        out[6..8].copy_from_slice(&self.mac_31_16.to_be_bytes());
        out[8..10].copy_from_slice(&self.mac_15_0.to_be_bytes());
        out[10..12].copy_from_slice(&self.node_pos_addr.to_be_bytes());
        out[12..14].copy_from_slice(&self.diagnosis_id.to_be_bytes());
        out[14] = self.num_ports;
        out[15] = self.chip_id;
        out[16] = self.fw_major;
        out[17] = self.fw_minor;
        out[18] = self.fw_release;
        out[19..23].copy_from_slice(&self.fw_build.to_be_bytes());
        out[23] = self.cs_major;
        out[24] = self.cs_minor;
        out[25] = self.cs_release;
        Some(SIGNATURE_LEN_V1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Signature {
        Signature {
            node_address: 0x0211,
            group_address: 0x0022,
            mac_47_32: 0x0001,
            mac_31_16: 0x0203,
            mac_15_0: 0x0405,
            node_pos_addr: 0x0401,
            diagnosis_id: 0x0042,
            num_ports: 2,
            chip_id: 0x18,
            fw_major: 2,
            fw_minor: 1,
            fw_release: 0,
            fw_build: 0x0001_0203,
            cs_major: 1,
            cs_minor: 0,
            cs_release: 9,
        }
    }

    #[test]
    fn codec_round_trip() {
        let sig = sample();
        let mut buf = [0u8; SIGNATURE_LEN_V1];
        assert_eq!(sig.encode(&mut buf), Some(SIGNATURE_LEN_V1));
        assert_eq!(Signature::decode(&buf), Some(sig));
    }

    #[test]
    fn bytes_round_trip() {
        // every 26-byte prefix decodes and re-encodes to itself
        let mut raw = [0u8; SIGNATURE_LEN_V1];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = (7 * i + 3) as u8;
        }
        let sig = Signature::decode(&raw).unwrap();
        let mut out = [0u8; SIGNATURE_LEN_V1];
        sig.encode(&mut out).unwrap();
        assert_eq!(raw, out);
    }

    #[test]
    fn short_buffers_rejected() {
        let raw = [0u8; SIGNATURE_LEN_V1 - 1];
        assert_eq!(Signature::decode(&raw), None);
        let sig = sample();
        let mut out = [0u8; SIGNATURE_LEN_V1 - 1];
        assert_eq!(sig.encode(&mut out), None);
    }
}
