use crate::error::{DuplicateAddress, Result};
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::collections::BTreeMap;
use std::fmt;

/// One of the eight GameCube builds a patch can target.
///
/// Declaration order is the column order of the source document's tables.
#[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum BuildVariant {
    #[serde(rename = "3OJ2")]
    Oj2,
    #[serde(rename = "3OJ3")]
    Oj3,
    #[serde(rename = "3OJ4")]
    Oj4,
    #[serde(rename = "3OJ5")]
    Oj5,
    #[serde(rename = "3OE0")]
    Oe0,
    #[serde(rename = "3OE1")]
    Oe1,
    #[serde(rename = "3OE2")]
    Oe2,
    #[serde(rename = "3OP0")]
    Op0,
}

impl BuildVariant {
    pub const ALL: [BuildVariant; 8] = [
        BuildVariant::Oj2,
        BuildVariant::Oj3,
        BuildVariant::Oj4,
        BuildVariant::Oj5,
        BuildVariant::Oe0,
        BuildVariant::Oe1,
        BuildVariant::Oe2,
        BuildVariant::Op0,
    ];

    pub fn token(self) -> &'static str {
        match self {
            BuildVariant::Oj2 => "3OJ2",
            BuildVariant::Oj3 => "3OJ3",
            BuildVariant::Oj4 => "3OJ4",
            BuildVariant::Oj5 => "3OJ5",
            BuildVariant::Oe0 => "3OE0",
            BuildVariant::Oe1 => "3OE1",
            BuildVariant::Oe2 => "3OE2",
            BuildVariant::Op0 => "3OP0",
        }
    }

    pub fn from_token(token: &str) -> Option<BuildVariant> {
        BuildVariant::ALL.iter().copied().find(|v| v.token() == token)
    }
}

impl fmt::Display for BuildVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Everything the document says about one named patch.
#[derive(Clone, Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct Patch {
    pub display_name: Option<String>,
    pub description: Option<String>,
    /// address -> word, per build
    pub variants: BTreeMap<BuildVariant, BTreeMap<u32, u32>>,
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Debug, Default)]
pub struct PatchModel {
    pub patches: BTreeMap<String, Patch>,
}

impl PatchModel {
    fn writes_mut(&mut self, name: &str, variant: BuildVariant) -> &mut BTreeMap<u32, u32> {
        self.patches
            .entry(name.to_owned())
            .or_default()
            .variants
            .entry(variant)
            .or_default()
    }

    /// Makes sure `(name, variant)` exists, even if nothing is ever written to it.
    pub fn register_variant(&mut self, name: &str, variant: BuildVariant) {
        self.writes_mut(name, variant);
    }

    /// Inserts a write, failing if the address was already written for this patch and build.
    pub fn insert_unique(
        &mut self,
        name: &str,
        variant: BuildVariant,
        address: u32,
        value: u32,
        line: usize,
    ) -> Result<()> {
        let writes = self.writes_mut(name, variant);
        ensure!(
            !writes.contains_key(&address),
            DuplicateAddress {
                name,
                variant,
                address,
                line,
            }
        );
        writes.insert(address, value);
        Ok(())
    }

    /// Inserts a write, replacing any earlier value at the same address.
    pub fn insert_overwrite(&mut self, name: &str, variant: BuildVariant, address: u32, value: u32) {
        self.writes_mut(name, variant).insert(address, value);
    }

    pub fn set_display_name(&mut self, name: &str, display_name: &str) {
        self.patches.entry(name.to_owned()).or_default().display_name =
            Some(display_name.to_owned());
    }

    pub fn set_description(&mut self, name: &str, description: &str) {
        self.patches.entry(name.to_owned()).or_default().description =
            Some(description.to_owned());
    }

    #[cfg(test)]
    pub fn get(&self, name: &str, variant: BuildVariant) -> Option<&BTreeMap<u32, u32>> {
        self.patches.get(name)?.variants.get(&variant)
    }
}

/// A run of words written at consecutive 4-byte addresses.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct WriteRegion {
    pub address: u32,
    pub data: Vec<u32>,
}

impl WriteRegion {
    /// First address past the region. Wider than `u32` so a region ending at the top of memory does not wrap.
    pub fn end(&self) -> u64 {
        u64::from(self.address) + self.data.len() as u64 * 4
    }

    pub fn size(&self) -> usize {
        self.data.len() * 4
    }

    pub fn words(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let base = self.address;
        self.data
            .iter()
            .enumerate()
            .map(move |(z, &value)| (base.wrapping_add(z as u32 * 4), value))
    }
}
