use crate::patch::WriteRegion;
use std::collections::BTreeMap;

/// Collapses one build's writes into maximal runs of consecutive words, lowest address first.
pub fn compile_regions(writes: &BTreeMap<u32, u32>) -> Vec<WriteRegion> {
    let mut regions: Vec<WriteRegion> = Vec::new();
    for (&address, &value) in writes {
        match regions.last_mut() {
            Some(open) if open.end() == u64::from(address) => open.data.push(value),
            _ => regions.push(WriteRegion {
                address,
                data: vec![value],
            }),
        }
    }
    regions
}
