//! Entity identifiers carried by world packets
//!
//! A guid is a 64-bit value whose top 16 bits name the entity kind. On the wire
//! it travels either as a plain `u64` or in packed form (see
//! [`MessageWriter::write_packed_guid`]).

use std::fmt;

use super::reader::ReadResult;
use super::{MessageReader, MessageWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum HighGuid {
    Item = 0x4000,
    Player = 0x0000,
    GameObject = 0xF110,
    Transport = 0xF120,
    Unit = 0xF130,
    Pet = 0xF140,
    Vehicle = 0xF150,
    DynamicObject = 0xF100,
    Corpse = 0xF101,
    MoTransport = 0x1FC0,
    Instance = 0x1F40,
    Group = 0x1F50,
}

impl HighGuid {
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0x4000 => Self::Item,
            0x0000 => Self::Player,
            0xF110 => Self::GameObject,
            0xF120 => Self::Transport,
            0xF130 => Self::Unit,
            0xF140 => Self::Pet,
            0xF150 => Self::Vehicle,
            0xF100 => Self::DynamicObject,
            0xF101 => Self::Corpse,
            0x1FC0 => Self::MoTransport,
            0x1F40 => Self::Instance,
            0x1F50 => Self::Group,
            _ => return None,
        })
    }

    /// Whether guids of this kind carry an entry id in bits 24..48.
    pub fn has_entry(self) -> bool {
        matches!(
            self,
            Self::GameObject | Self::Transport | Self::Unit | Self::Pet | Self::Vehicle
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Item => "Item",
            Self::Player => "Player",
            Self::GameObject => "Gameobject",
            Self::Transport => "Transport",
            Self::Unit => "Creature",
            Self::Pet => "Pet",
            Self::Vehicle => "Vehicle",
            Self::DynamicObject => "DynObject",
            Self::Corpse => "Corpse",
            Self::MoTransport => "MoTransport",
            Self::Instance => "InstanceID",
            Self::Group => "Group",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ObjectGuid(u64);

impl ObjectGuid {
    pub const EMPTY: ObjectGuid = ObjectGuid(0);

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Build a guid without an entry (players, items, groups).
    pub fn global(high: HighGuid, counter: u32) -> Self {
        Self(((high as u64) << 48) | counter as u64)
    }

    /// Build a guid that carries an entry id (creatures, game objects).
    pub fn map_specific(high: HighGuid, entry: u32, counter: u32) -> Self {
        Self(((high as u64) << 48) | (((entry as u64) & 0xFF_FFFF) << 24) | (counter as u64 & 0xFF_FFFF))
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn high(self) -> Option<HighGuid> {
        HighGuid::from_raw((self.0 >> 48) as u16)
    }

    pub fn entry(self) -> Option<u32> {
        match self.high() {
            Some(high) if high.has_entry() => Some(((self.0 >> 24) & 0xFF_FFFF) as u32),
            _ => None,
        }
    }

    pub fn counter(self) -> u32 {
        match self.high() {
            Some(high) if high.has_entry() => (self.0 & 0xFF_FFFF) as u32,
            _ => self.0 as u32,
        }
    }

    pub fn read_packed(reader: &mut MessageReader) -> ReadResult<Self> {
        reader.read_packed_guid().map(Self)
    }

    pub fn write_packed(self, writer: &mut MessageWriter) {
        writer.write_packed_guid(self.0);
    }

    /// Number of bytes the packed form occupies.
    pub fn packed_len(self) -> usize {
        1 + self.0.to_le_bytes().iter().filter(|&&b| b != 0).count()
    }
}

impl fmt::Display for ObjectGuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_name = self.high().map(HighGuid::name).unwrap_or("<unknown>");
        write!(f, "GUID Full: 0x{:016X} Type: {}", self.0, type_name)?;
        if let Some(entry) = self.entry() {
            let label = if self.high() == Some(HighGuid::Pet) { "Pet number" } else { "Entry" };
            write!(f, " {}: {}", label, entry)?;
        }
        write!(f, " Low: {}", self.counter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_specific_fields() {
        let guid = ObjectGuid::map_specific(HighGuid::Unit, 1234, 56);

        assert_eq!(guid.high(), Some(HighGuid::Unit));
        assert_eq!(guid.entry(), Some(1234));
        assert_eq!(guid.counter(), 56);
        assert_eq!(guid.raw(), 0xF130_0004_D200_0038);
    }

    #[test]
    fn test_player_guid_has_no_entry() {
        let guid = ObjectGuid::global(HighGuid::Player, 7);

        assert_eq!(guid.entry(), None);
        assert_eq!(guid.counter(), 7);
        assert_eq!(guid.packed_len(), 2);
    }

    #[test]
    fn test_packed_round_trip_through_codec() {
        for guid in [
            ObjectGuid::EMPTY,
            ObjectGuid::global(HighGuid::Item, 0x00FF_00FF),
            ObjectGuid::map_specific(HighGuid::GameObject, 0xFF_FFFF, 0xFF_FFFF),
            ObjectGuid::from_raw(u64::MAX),
        ] {
            let mut writer = MessageWriter::new();
            guid.write_packed(&mut writer);
            assert_eq!(writer.len(), guid.packed_len());

            let bytes = writer.into_bytes();
            let mut reader = MessageReader::new(&bytes);
            assert_eq!(ObjectGuid::read_packed(&mut reader).unwrap(), guid);
        }
    }

    #[test]
    fn test_display() {
        let guid = ObjectGuid::map_specific(HighGuid::Unit, 10, 2);

        assert_eq!(
            guid.to_string(),
            "GUID Full: 0xF13000000A000002 Type: Creature Entry: 10 Low: 2"
        );
    }
}
