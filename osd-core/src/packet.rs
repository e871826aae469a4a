use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::constants;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Fewer than the three header words.
    TooShort,
    /// More words than the 16 bit size field can describe.
    TooLong,
    /// A byte buffer that does not hold a whole number of words.
    OddLength,
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::TooShort => write!(f, "Packet shorter than its header"),
            PacketError::TooLong => write!(f, "Packet exceeds 65535 words"),
            PacketError::OddLength => write!(f, "Packet data is not a whole number of words"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PacketError {}

// =============================================================================
// PacketType: the 2 bit TYPE field of the flags word
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Reg,
    Res1,
    Event,
    Res2,
}

impl PacketType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & constants::TYPE_MASK as u8 {
            constants::TYPE_REG => PacketType::Reg,
            constants::TYPE_RES1 => PacketType::Res1,
            constants::TYPE_EVENT => PacketType::Event,
            _ => PacketType::Res2,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            PacketType::Reg => constants::TYPE_REG,
            PacketType::Res1 => constants::TYPE_RES1,
            PacketType::Event => constants::TYPE_EVENT,
            PacketType::Res2 => constants::TYPE_RES2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::Reg => "REG",
            PacketType::Res1 => "RES1",
            PacketType::Event => "EVENT",
            PacketType::Res2 => "RES2",
        }
    }
}

// =============================================================================
// Size conversion between payload words and total (data) words
// =============================================================================

/// Number of data words (header included) for a payload of `payload_words`.
pub fn payload2data(payload_words: usize) -> usize {
    let data_words = payload_words + constants::HEADER_WORDS;
    assert!(data_words <= constants::MAX_DATA_WORDS, "packet size overflows 16 bit");
    data_words
}

/// Number of payload words in a packet of `data_words` total words.
pub fn data2payload(data_words: usize) -> usize {
    assert!(data_words >= constants::HEADER_WORDS, "packet smaller than its header");
    data_words - constants::HEADER_WORDS
}

// =============================================================================
// Packet: header words followed by payload words
// =============================================================================

/// A debug interconnect packet.
///
/// Word layout:
/// ```text
/// word 0:  DEST                       (16 bit DI address)
/// word 1:  SRC                        (16 bit DI address)
/// word 2:  TYPE[15:14] TYPE_SUB[13:10] (bits 9:0 reserved)
/// word 3.. payload
/// ```
///
/// The three header words always exist; a `Packet` can not be built with
/// fewer, so the header accessors never fail.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Packet {
    words: Vec<u16>,
}

impl Packet {
    /// A zeroed packet with room for `payload_words` payload words.
    pub fn new(payload_words: usize) -> Self {
        Packet {
            words: vec![0; payload2data(payload_words)],
        }
    }

    /// Build a packet with header and payload in one go.
    pub fn with_payload(
        dest: u16,
        src: u16,
        packet_type: PacketType,
        type_sub: u8,
        payload: &[u16],
    ) -> Self {
        let mut pkg = Packet::new(payload.len());
        pkg.set_header(dest, src, packet_type, type_sub);
        pkg.payload_mut().copy_from_slice(payload);
        pkg
    }

    /// Wrap raw data words (header included).
    pub fn from_words(words: Vec<u16>) -> Result<Self, PacketError> {
        if words.len() < constants::HEADER_WORDS {
            return Err(PacketError::TooShort);
        }
        if words.len() > constants::MAX_DATA_WORDS {
            return Err(PacketError::TooLong);
        }
        Ok(Packet { words })
    }

    /// Parse little-endian encoded data words.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, PacketError> {
        if bytes.len() % 2 != 0 {
            return Err(PacketError::OddLength);
        }
        let words = bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        Self::from_words(words)
    }

    /// Data words encoded little-endian, without a length prefix.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.sizeof_bytes());
        for w in &self.words {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }

    /// Set all header fields at once, replacing the previous header.
    ///
    /// Panics if `type_sub` does not fit the 4 bit TYPE_SUB field; header
    /// values come from code, never from the wire.
    pub fn set_header(&mut self, dest: u16, src: u16, packet_type: PacketType, type_sub: u8) {
        assert!(
            u16::from(type_sub) <= constants::TYPE_SUB_MASK,
            "type_sub {:#x} exceeds 4 bits",
            type_sub
        );
        self.words[0] = (dest & constants::DEST_MASK) << constants::DEST_SHIFT;
        self.words[1] = (src & constants::SRC_MASK) << constants::SRC_SHIFT;
        self.words[2] = (u16::from(packet_type.bits()) << constants::TYPE_SHIFT)
            | (u16::from(type_sub) << constants::TYPE_SUB_SHIFT);
    }

    pub fn dest(&self) -> u16 {
        (self.words[0] >> constants::DEST_SHIFT) & constants::DEST_MASK
    }

    pub fn src(&self) -> u16 {
        (self.words[1] >> constants::SRC_SHIFT) & constants::SRC_MASK
    }

    pub fn packet_type(&self) -> PacketType {
        PacketType::from_bits(((self.words[2] >> constants::TYPE_SHIFT) & constants::TYPE_MASK) as u8)
    }

    pub fn type_sub(&self) -> u8 {
        ((self.words[2] >> constants::TYPE_SUB_SHIFT) & constants::TYPE_SUB_MASK) as u8
    }

    /// Rewrite only the destination word.
    pub fn set_dest(&mut self, dest: u16) {
        self.words[0] = dest;
    }

    /// Rewrite only the source word.
    pub fn set_src(&mut self, src: u16) {
        self.words[1] = src;
    }

    pub fn payload(&self) -> &[u16] {
        &self.words[constants::HEADER_WORDS..]
    }

    pub fn payload_mut(&mut self) -> &mut [u16] {
        &mut self.words[constants::HEADER_WORDS..]
    }

    /// All data words, header included.
    pub fn words(&self) -> &[u16] {
        &self.words
    }

    pub fn into_words(self) -> Vec<u16> {
        self.words
    }

    pub fn data_size_words(&self) -> usize {
        self.words.len()
    }

    pub fn payload_size_words(&self) -> usize {
        data2payload(self.words.len())
    }

    /// Size of the data words in bytes (no length prefix).
    pub fn sizeof_bytes(&self) -> usize {
        self.words.len() * 2
    }

    /// Append the payload of `other`, keeping this packet's header.
    ///
    /// Used to join the pieces of an event split over several packets.
    pub fn combine(&mut self, other: &Packet) {
        assert!(
            self.words.len() + other.payload().len() <= constants::MAX_DATA_WORDS,
            "combined packet overflows 16 bit size"
        );
        self.words.extend_from_slice(other.payload());
    }

    /// Persist as `[u16 data_size_words][data words]`, little-endian.
    #[cfg(feature = "std")]
    pub fn write_to<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_all(&(self.words.len() as u16).to_le_bytes())?;
        w.write_all(&self.to_le_bytes())
    }

    /// Read one packet written by [`Packet::write_to`].
    ///
    /// Returns `Ok(None)` on a short read of either the size word or the
    /// data words, and on a stored size smaller than the header.
    #[cfg(feature = "std")]
    pub fn read_from<R: std::io::Read>(r: &mut R) -> std::io::Result<Option<Packet>> {
        let mut size = [0u8; 2];
        if !read_full(r, &mut size)? {
            return Ok(None);
        }
        let data_words = u16::from_le_bytes(size) as usize;
        let mut data = vec![0u8; data_words * 2];
        if !read_full(r, &mut data)? {
            return Ok(None);
        }
        Ok(Packet::from_le_bytes(&data).ok())
    }
}

/// Read exactly `buf.len()` bytes; `false` on end of stream.
#[cfg(feature = "std")]
fn read_full<R: std::io::Read>(r: &mut R, buf: &mut [u8]) -> std::io::Result<bool> {
    match r.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// `true` iff both packets exist, have the same size and identical words.
pub fn equal(a: Option<&Packet>, b: Option<&Packet>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.sizeof_bytes() == b.sizeof_bytes() && a.words == b.words,
        _ => false,
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Packet of {} data words:", self.words.len())?;
        writeln!(
            f,
            "DEST = {}, SRC = {}, TYPE = {} ({}), TYPE_SUB = {}",
            self.dest(),
            self.src(),
            self.packet_type().bits(),
            self.packet_type().name(),
            self.type_sub()
        )?;
        writeln!(f, "Packet data (including header):")?;
        for w in &self.words {
            writeln!(f, "  0x{:04x}", w)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("dest", &self.dest())
            .field("src", &self.src())
            .field("type", &self.packet_type())
            .field("type_sub", &self.type_sub())
            .field("payload", &self.payload())
            .finish()
    }
}
