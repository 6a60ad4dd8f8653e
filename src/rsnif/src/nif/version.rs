
use paste::paste;

use super::*;

macro_rules! file_versions {
    ($(($a:literal, $b:literal, $c:literal, $d:literal)),* $(,)?) => {
        paste! {
            $(
                pub const [<V $a _ $b _ $c _ $d>]: u32 = NifVersion::to_file($a, $b, $c, $d);
            )*
        }
    };
}

/// File version 3.1, the last release whose header carries copyright lines
/// instead of a binary version word.
pub const V3_1: u32 = NifVersion::to_file(3, 1, 0, 0);

file_versions! {
    (3, 3, 0, 13),
    (4, 0, 0, 2),
    (4, 1, 0, 12),
    (4, 2, 2, 0),
    (5, 0, 0, 1),
    (5, 0, 0, 6),
    (10, 0, 0, 0),
    (10, 0, 1, 0),
    (10, 0, 1, 8),
    (10, 1, 0, 0),
    (10, 2, 0, 0),
    (20, 0, 0, 3),
    (20, 0, 0, 4),
    (20, 0, 0, 5),
    (20, 1, 0, 1),
    (20, 1, 0, 3),
    (20, 2, 0, 5),
    (20, 2, 0, 7),
    (30, 0, 0, 2),
    (30, 2, 0, 0),
}

/// First line prefix of files written by the original NetImmerse runtime.
pub const NETIMMERSE_PREFIX: &str = "NetImmerse File Format";
/// First line prefix of files written by Gamebryo (10.0.0.0 and later).
pub const GAMEBRYO_PREFIX: &str = "Gamebryo File Format";
/// First line marker of the Nintendo DS branch.
pub const NDS_PREFIX: &str = "NDSNIF....@....@....";

/// Version-string family recognized from the first line of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NifFamily {
    NetImmerse,
    Gamebryo,
    Nds,
}

/// `(file, user)` pairs known to have been shipped by Bethesda Softworks.
/// Files carrying one of these also serialize the extra export-info fields.
/// Only versions whose header stores the user version can qualify; earlier
/// Bethesda releases are indistinguishable from stock Gamebryo on disk.
const BETHESDA_VERSIONS: &[(u32, u32)] = &[
    (V20_0_0_4, 11),
    (V20_0_0_5, 11),
    (V20_2_0_7, 11),
    (V20_2_0_7, 12),
];

/// The version quadruple a NIF container is stamped with.
///
/// `file` packs the four dotted components `A.B.C.D` big-end first, so that
/// plain integer comparison orders releases chronologically. `user` and
/// `stream` only appear on disk for the versions that define them; `nds`
/// marks the Nintendo DS branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NifVersion {
    file: u32,
    user: u32,
    stream: u32,
    nds: u32,
}

impl NifVersion {
    pub fn new(file: u32, user: u32, stream: u32) -> Self {
        NifVersion {
            file,
            user,
            stream,
            nds: 0,
        }
    }

    /// Packs dotted components into a comparable version word:
    /// `to_file(20, 2, 0, 7) == 0x14020007`.
    pub const fn to_file(a: u8, b: u8, c: u8, d: u8) -> u32 {
        ((a as u32) << 24) | ((b as u32) << 16) | ((c as u32) << 8) | (d as u32)
    }

    /// Splits a packed version word back into its dotted components.
    pub const fn file_parts(file: u32) -> (u8, u8, u8, u8) {
        (
            (file >> 24) as u8,
            (file >> 16) as u8,
            (file >> 8) as u8,
            file as u8,
        )
    }

    pub fn file(&self) -> u32 {
        self.file
    }

    pub fn user(&self) -> u32 {
        self.user
    }

    pub fn stream(&self) -> u32 {
        self.stream
    }

    pub fn nds(&self) -> u32 {
        self.nds
    }

    pub fn set_file(&mut self, file: u32) {
        self.file = file;
    }

    pub fn set_user(&mut self, user: u32) {
        self.user = user;
    }

    pub fn set_stream(&mut self, stream: u32) {
        self.stream = stream;
    }

    pub fn set_nds(&mut self, nds: u32) {
        self.nds = nds;
    }

    pub fn is_bethesda(&self) -> bool {
        BETHESDA_VERSIONS.contains(&(self.file, self.user))
    }

    /// Renders the first line of the file.
    ///
    /// | Family | Condition | Form |
    /// | ------ | --------- | ---- |
    /// | NDS | `nds != 0` | `NDSNIF....@....@...., Version A.B` |
    /// | NetImmerse | `file <= 3.1` | `NetImmerse File Format, Version A.B` |
    /// | NetImmerse | `file < 10.0.0.0` | `NetImmerse File Format, Version A.B.C.D` |
    /// | Gamebryo | otherwise | `Gamebryo File Format, Version A.B.C.D` |
    ///
    /// The two-component form is confined to 3.1 and the NDS branch so that
    /// parsing a rendered string always recovers the full quadruple for any
    /// version above 3.1.
    pub fn version_string(&self) -> String {
        let (a, b, c, d) = Self::file_parts(self.file);
        if self.nds != 0 {
            format!("{}, Version {}.{}", NDS_PREFIX, a, b)
        } else if self.file <= V3_1 {
            format!("{}, Version {}.{}", NETIMMERSE_PREFIX, a, b)
        } else if self.file < V10_0_0_0 {
            format!("{}, Version {}.{}.{}.{}", NETIMMERSE_PREFIX, a, b, c, d)
        } else {
            format!("{}, Version {}.{}.{}.{}", GAMEBRYO_PREFIX, a, b, c, d)
        }
    }

    /// Matches a first line against the three family prefixes and scans the
    /// suffix left to right for up to four decimal components, each clamped
    /// to 0..=255. Missing components are zero. Returns `None` when the line
    /// starts with none of the known prefixes.
    pub fn parse_line(line: &str) -> Option<(NifFamily, u32)> {
        let (family, rest) = if let Some(rest) = line.strip_prefix(NETIMMERSE_PREFIX) {
            (NifFamily::NetImmerse, rest)
        } else if let Some(rest) = line.strip_prefix(GAMEBRYO_PREFIX) {
            (NifFamily::Gamebryo, rest)
        } else if let Some(rest) = line.strip_prefix(NDS_PREFIX) {
            (NifFamily::Nds, rest)
        } else {
            return None;
        };

        let mut parts = [0u8; 4];
        let mut slot = 0;
        let mut current: Option<u32> = None;
        for byte in rest.bytes() {
            if byte.is_ascii_digit() {
                let value = current.unwrap_or(0) * 10 + u32::from(byte - b'0');
                current = Some(value.min(255));
            } else if let Some(value) = current.take() {
                parts[slot] = value as u8;
                slot += 1;
                if slot == 4 {
                    break;
                }
            }
        }
        if slot < 4 {
            if let Some(value) = current {
                parts[slot] = value as u8;
            }
        }

        Some((
            family,
            Self::to_file(parts[0], parts[1], parts[2], parts[3]),
        ))
    }
}
