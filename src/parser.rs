//! Line-driven reader for the patch source document.
//!
//! The document is a sequence of blank-line separated blocks. A free-text line names the
//! patch that the following metadata, column tables and hex dumps belong to:
//!
//! ```text
//! Infinite HP
//! *** name=Infinite HP
//! *** desc=Player HP never goes down
//! 3OJ2------------  3OJ3------------  ...
//! 8000C8A0 60000000 8000C8B0 60000000 ...
//!
//! ======== PsoV3-3OE1.bin
//! 8000C8A0 6000000060000000
//! ```
//!
//! [`step`] classifies one line against the current [`Mode`]; [`Parser`] applies the
//! resulting [`Action`] to the [`PatchModel`].

use crate::error::Result;
use crate::patch::{BuildVariant, PatchModel};
use log::{debug, warn};
use std::convert::TryFrom;

/// Header line of a column table: the first build's token followed by dashes.
pub const TABLE_SENTINEL: &str = "3OJ2------------";
const NAME_PREFIX: &str = "*** name=";
const DESC_PREFIX: &str = "*** desc=";
const HEX_DUMP_PREFIX: &str = "======== PsoV3-";

/// Width of one build's `AAAAAAAA VVVVVVVV` column, including the gap to the next one.
const FIELD_WIDTH: usize = 18;
const SLOT_WIDTH: usize = 8;

#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Mode {
    Idle,
    ColumnTable,
    HexDump { variant: BuildVariant },
    /// A hex dump for a build we don't know; ignored up to the next blank line.
    SkippingBlock,
}

#[derive(PartialEq, Debug)]
pub enum Action<'a> {
    Nothing,
    SetName(&'a str),
    SetDisplayName(&'a str),
    SetDescription(&'a str),
    OpenTable,
    OpenHexDump(BuildVariant),
    UnknownVariant(&'a str),
    TableRow {
        writes: Vec<(BuildVariant, u32, u32)>,
        problems: Vec<String>,
    },
    HexRow {
        variant: BuildVariant,
        writes: Vec<(u32, u32)>,
        problems: Vec<String>,
    },
}

/// Classifies `line` given the current mode. Checks run in a fixed priority order, so a
/// metadata line inside a column table is still read as a table row.
pub fn step(mode: Mode, line: &str) -> (Mode, Action<'_>) {
    if line.trim().is_empty() {
        return (Mode::Idle, Action::Nothing);
    }
    match mode {
        Mode::ColumnTable => return (mode, decode_table_row(line)),
        Mode::SkippingBlock => return (mode, Action::Nothing),
        Mode::Idle | Mode::HexDump { .. } => {}
    }

    if let Some(text) = line.strip_prefix(NAME_PREFIX) {
        return (mode, Action::SetDisplayName(text));
    }
    if let Some(text) = line.strip_prefix(DESC_PREFIX) {
        return (mode, Action::SetDescription(text));
    }
    if let Some(rest) = line.strip_prefix(HEX_DUMP_PREFIX) {
        let token = rest.split('.').next().unwrap_or(rest);
        return match BuildVariant::from_token(token) {
            Some(variant) => (Mode::HexDump { variant }, Action::OpenHexDump(variant)),
            None => (Mode::SkippingBlock, Action::UnknownVariant(token)),
        };
    }
    if let Mode::HexDump { variant } = mode {
        return (mode, decode_hex_row(variant, line));
    }
    if line.starts_with(TABLE_SENTINEL) {
        return (Mode::ColumnTable, Action::OpenTable);
    }
    (Mode::Idle, Action::SetName(line))
}

fn is_blank(slot: &str) -> bool {
    slot.bytes().all(|b| b == b' ')
}

fn parse_hex_u32(slot: &str) -> Option<u32> {
    let slot = slot.trim();
    if slot.is_empty() || !slot.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(slot, 16).ok()
}

fn decode_table_row(line: &str) -> Action<'_> {
    let mut writes = Vec::new();
    let mut problems = Vec::new();
    for (z, &variant) in BuildVariant::ALL.iter().enumerate() {
        let start = z * FIELD_WIDTH;
        let end = start + 2 * SLOT_WIDTH + 1;
        if line.len() < end {
            continue;
        }
        let address = line.get(start..start + SLOT_WIDTH);
        let value = line.get(start + SLOT_WIDTH + 1..end);
        let (address, value) = match (address, value) {
            (Some(a), Some(v)) => (a, v),
            _ => {
                problems.push(format!(
                    "{} column splits a multi-byte character",
                    variant
                ));
                continue;
            }
        };
        if is_blank(address) || is_blank(value) {
            continue;
        }
        match (parse_hex_u32(address), parse_hex_u32(value)) {
            (Some(a), Some(v)) => writes.push((variant, a, v)),
            _ => problems.push(format!(
                "unreadable {} column {:?} {:?}",
                variant, address, value
            )),
        }
    }
    Action::TableRow { writes, problems }
}

fn decode_hex_bytes(data: &str) -> Option<Vec<u8>> {
    if data.len() % 2 != 0 || !data.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    (0..data.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&data[i..i + 2], 16).ok())
        .collect()
}

fn decode_hex_row(variant: BuildVariant, line: &str) -> Action<'_> {
    let mut writes = Vec::new();
    let mut problems = Vec::new();

    let mut fields = line.split_whitespace();
    let decoded = match (fields.next(), fields.next(), fields.next()) {
        (Some(address), Some(data), None) => parse_hex_u32(address).zip(decode_hex_bytes(data)),
        _ => None,
    };
    let (address, bytes) = match decoded {
        Some(decoded) => decoded,
        None => {
            problems.push(format!("unreadable hex dump line {:?}", line));
            return Action::HexRow {
                variant,
                writes,
                problems,
            };
        }
    };

    let groups = bytes.chunks_exact(4);
    if !groups.remainder().is_empty() {
        problems.push(format!(
            "dropping {} trailing byte(s) after {:08X}",
            groups.remainder().len(),
            address
        ));
    }
    for (z, group) in groups.enumerate() {
        let value = u32::from_be_bytes([group[0], group[1], group[2], group[3]]);
        match u32::try_from(z * 4)
            .ok()
            .and_then(|offset| address.checked_add(offset))
        {
            Some(target) => writes.push((target, value)),
            None => problems.push(format!("write past {:08X} overflows the address space", address)),
        }
    }
    Action::HexRow {
        variant,
        writes,
        problems,
    }
}

/// Accumulates a [`PatchModel`] one line at a time.
pub struct Parser {
    model: PatchModel,
    mode: Mode,
    current_name: String,
    line_number: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Parser {
            model: PatchModel::default(),
            mode: Mode::Idle,
            current_name: String::new(),
            line_number: 0,
        }
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser::default()
    }

    pub fn feed(&mut self, line: &str) -> Result<()> {
        self.line_number += 1;
        let (mode, action) = step(self.mode, line);
        self.mode = mode;

        let name = self.current_name.as_str();
        match action {
            Action::Nothing => {}
            Action::SetName(text) => self.current_name = text.to_owned(),
            Action::SetDisplayName(text) => self.model.set_display_name(name, text),
            Action::SetDescription(text) => self.model.set_description(name, text),
            Action::OpenTable => {
                for &variant in BuildVariant::ALL.iter() {
                    self.model.register_variant(name, variant);
                }
            }
            Action::OpenHexDump(variant) => {
                debug!("line {}: {} hex dump for {:?}", self.line_number, variant, name);
                self.model.register_variant(name, variant);
            }
            Action::UnknownVariant(token) => warn!(
                "line {}: skipping hex dump for unknown build {:?}",
                self.line_number, token
            ),
            Action::TableRow { writes, problems } => {
                self.report(&problems);
                for (variant, address, value) in writes {
                    self.model
                        .insert_unique(name, variant, address, value, self.line_number)?;
                }
            }
            Action::HexRow {
                variant,
                writes,
                problems,
            } => {
                self.report(&problems);
                for (address, value) in writes {
                    self.model.insert_overwrite(name, variant, address, value);
                }
            }
        }
        Ok(())
    }

    fn report(&self, problems: &[String]) {
        for problem in problems {
            warn!("line {}: {}", self.line_number, problem);
        }
    }

    pub fn finish(self) -> PatchModel {
        self.model
    }
}

/// Parses a whole document. Fails only on a repeated address inside a column table.
pub fn parse_document(text: &str) -> Result<PatchModel> {
    let mut parser = Parser::new();
    for line in text.lines() {
        parser.feed(line)?;
    }
    Ok(parser.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn table_header() -> String {
        BuildVariant::ALL
            .iter()
            .map(|v| format!("{}------------", v))
            .collect::<Vec<_>>()
            .join("  ")
    }

    /// Builds one table row with the given fields placed in their build's column.
    fn table_row(fields: &[(BuildVariant, &str)]) -> String {
        let mut row = String::new();
        for (z, &variant) in BuildVariant::ALL.iter().enumerate() {
            let field = fields
                .iter()
                .find(|(v, _)| *v == variant)
                .map(|(_, f)| *f)
                .unwrap_or("                 ");
            assert_eq!(field.len(), 17);
            row.push_str(field);
            if z + 1 < BuildVariant::ALL.len() {
                row.push(' ');
            }
        }
        row
    }

    fn writes(entries: &[(u32, u32)]) -> BTreeMap<u32, u32> {
        entries.iter().copied().collect()
    }

    #[test]
    fn single_table_entry() {
        let doc = format!(
            "TestPatch\n{}\n{}\n",
            table_header(),
            table_row(&[(BuildVariant::Oj2, "00001000 DEADBEEF")])
        );
        let model = parse_document(&doc).unwrap();

        assert_eq!(model.patches.len(), 1);
        assert_eq!(
            model.get("TestPatch", BuildVariant::Oj2),
            Some(&writes(&[(0x1000, 0xDEAD_BEEF)]))
        );
        // the table registers every build, the other columns were empty
        assert_eq!(
            model.get("TestPatch", BuildVariant::Op0),
            Some(&BTreeMap::new())
        );
    }

    #[test]
    fn sentinel_alone_opens_table() {
        let doc = "TestPatch\n3OJ2------------\n00001000 DEADBEEF\n";
        let model = parse_document(doc).unwrap();
        assert_eq!(
            model.get("TestPatch", BuildVariant::Oj2),
            Some(&writes(&[(0x1000, 0xDEAD_BEEF)]))
        );
    }

    #[test]
    fn table_columns_map_to_builds() {
        let doc = format!(
            "Multi\n{}\n{}\n{}\n",
            table_header(),
            table_row(&[
                (BuildVariant::Oj3, "80001000 00000001"),
                (BuildVariant::Op0, "80002000 00000002"),
            ]),
            table_row(&[(BuildVariant::Oe1, "80003000 00000003")])
        );
        let model = parse_document(&doc).unwrap();
        assert_eq!(
            model.get("Multi", BuildVariant::Oj3),
            Some(&writes(&[(0x8000_1000, 1)]))
        );
        assert_eq!(
            model.get("Multi", BuildVariant::Op0),
            Some(&writes(&[(0x8000_2000, 2)]))
        );
        assert_eq!(
            model.get("Multi", BuildVariant::Oe1),
            Some(&writes(&[(0x8000_3000, 3)]))
        );
        assert_eq!(model.get("Multi", BuildVariant::Oj2), Some(&BTreeMap::new()));
    }

    #[test]
    fn half_blank_field_is_skipped() {
        let doc = format!(
            "Partial\n{}\n{}\n",
            table_header(),
            table_row(&[(BuildVariant::Oj2, "00001000         ")])
        );
        let model = parse_document(&doc).unwrap();
        assert_eq!(model.get("Partial", BuildVariant::Oj2), Some(&BTreeMap::new()));
    }

    #[test]
    fn non_ascii_field_is_reported() {
        let (_, action) = step(Mode::ColumnTable, "0000100\u{e9} DEADBEEF");
        match action {
            Action::TableRow { writes, problems } => {
                assert!(writes.is_empty());
                assert_eq!(problems.len(), 1);
                assert!(problems[0].contains("3OJ2"));
            }
            other => panic!("unexpected action {:?}", other),
        }

        let doc = "Accent\n3OJ2------------\n0000100\u{e9} DEADBEEF\n";
        let model = parse_document(doc).unwrap();
        assert_eq!(model.get("Accent", BuildVariant::Oj2), Some(&BTreeMap::new()));
    }

    #[test]
    fn short_row_drops_missing_columns_quietly() {
        let (_, action) = step(Mode::ColumnTable, "00001000 DEADBEEF 00002000");
        match action {
            Action::TableRow { writes, problems } => {
                assert_eq!(writes, vec![(BuildVariant::Oj2, 0x1000, 0xDEAD_BEEF)]);
                assert!(problems.is_empty());
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn duplicate_table_address_is_fatal() {
        let doc = format!(
            "Dup\n{}\n{}\n{}\n",
            table_header(),
            table_row(&[(BuildVariant::Oe0, "80001000 00000001")]),
            table_row(&[(BuildVariant::Oe0, "80001000 00000002")])
        );
        match parse_document(&doc) {
            Err(Error::DuplicateAddress {
                name,
                variant,
                address,
                line,
            }) => {
                assert_eq!(name, "Dup");
                assert_eq!(variant, BuildVariant::Oe0);
                assert_eq!(address, 0x8000_1000);
                assert_eq!(line, 4);
            }
            other => panic!("expected duplicate address error, got {:?}", other),
        }
    }

    #[test]
    fn same_address_in_different_builds_is_fine() {
        let doc = format!(
            "Shared\n{}\n{}\n",
            table_header(),
            table_row(&[
                (BuildVariant::Oe0, "80001000 00000001"),
                (BuildVariant::Oe1, "80001000 00000001"),
            ])
        );
        assert!(parse_document(&doc).is_ok());
    }

    #[test]
    fn parsing_is_repeatable() {
        let doc = format!(
            "A\n*** name=Patch A\n{}\n{}\n\nB\n======== PsoV3-3OE1.bin\n80004000 0102030405060708\n",
            table_header(),
            table_row(&[(BuildVariant::Oj5, "80001000 00000001")])
        );
        assert_eq!(parse_document(&doc).unwrap(), parse_document(&doc).unwrap());
    }

    #[test]
    fn hex_dump_packs_big_endian_words() {
        let doc = "HexPatch\n======== PsoV3-3OJ2.bin\n00002000 AABBCCDD\n";
        let model = parse_document(doc).unwrap();
        assert_eq!(
            model.get("HexPatch", BuildVariant::Oj2),
            Some(&writes(&[(0x2000, 0xAABB_CCDD)]))
        );
    }

    #[test]
    fn hex_dump_offsets_within_line() {
        let doc = "HexPatch\n======== PsoV3-3OP0.patch.bin\n80002000 0000000111111111\n80003000 22222222\n";
        let model = parse_document(doc).unwrap();
        assert_eq!(
            model.get("HexPatch", BuildVariant::Op0),
            Some(&writes(&[
                (0x8000_2000, 1),
                (0x8000_2004, 0x1111_1111),
                (0x8000_3000, 0x2222_2222),
            ]))
        );
    }

    #[test]
    fn hex_dump_duplicates_keep_last_value() {
        let doc = "HexPatch\n======== PsoV3-3OE2.bin\n00002000 00000001\n00002000 00000002\n";
        let model = parse_document(doc).unwrap();
        assert_eq!(
            model.get("HexPatch", BuildVariant::Oe2),
            Some(&writes(&[(0x2000, 2)]))
        );
    }

    #[test]
    fn hex_dump_header_switches_build() {
        let doc = "HexPatch\n======== PsoV3-3OE0.bin\n00002000 00000001\n======== PsoV3-3OE1.bin\n00002000 00000002\n";
        let model = parse_document(doc).unwrap();
        assert_eq!(
            model.get("HexPatch", BuildVariant::Oe0),
            Some(&writes(&[(0x2000, 1)]))
        );
        assert_eq!(
            model.get("HexPatch", BuildVariant::Oe1),
            Some(&writes(&[(0x2000, 2)]))
        );
    }

    #[test]
    fn malformed_hex_dump_lines_are_skipped() {
        let doc = "HexPatch\n======== PsoV3-3OJ4.bin\nnot hex at all\n00002000 ABC\n00002000 0000000102\n";
        let model = parse_document(doc).unwrap();
        assert_eq!(
            model.get("HexPatch", BuildVariant::Oj4),
            Some(&writes(&[(0x2000, 1)]))
        );
    }

    #[test]
    fn unknown_build_block_is_ignored() {
        let doc = "HexPatch\n======== PsoV3-GPOE.bin\n00002000 00000001\n\nNext\n";
        let model = parse_document(doc).unwrap();
        assert!(model.patches.is_empty());
    }

    #[test]
    fn metadata_attaches_to_current_name() {
        let doc = "Infinite HP\n*** name=Infinite HP\n*** desc=HP never drops\n3OJ2------------\n8000C8A0 60000000\n";
        let model = parse_document(doc).unwrap();
        let patch = &model.patches["Infinite HP"];
        assert_eq!(patch.display_name.as_deref(), Some("Infinite HP"));
        assert_eq!(patch.description.as_deref(), Some("HP never drops"));
    }

    #[test]
    fn metadata_inside_table_is_a_row() {
        let (mode, action) = step(Mode::ColumnTable, "*** name=Oops");
        assert_eq!(mode, Mode::ColumnTable);
        match action {
            Action::TableRow { writes, .. } => assert!(writes.is_empty()),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn blank_line_closes_any_block() {
        for &mode in &[
            Mode::Idle,
            Mode::ColumnTable,
            Mode::HexDump {
                variant: BuildVariant::Oe1,
            },
            Mode::SkippingBlock,
        ] {
            assert_eq!(step(mode, ""), (Mode::Idle, Action::Nothing));
            assert_eq!(step(mode, "   "), (Mode::Idle, Action::Nothing));
        }
    }

    #[test]
    fn free_text_after_block_starts_new_patch() {
        let doc = "First\n3OJ2------------\n00001000 00000001\n\nSecond\n3OJ2------------\n00001000 00000002\n";
        let model = parse_document(doc).unwrap();
        assert_eq!(model.get("First", BuildVariant::Oj2), Some(&writes(&[(0x1000, 1)])));
        assert_eq!(model.get("Second", BuildVariant::Oj2), Some(&writes(&[(0x1000, 2)])));
    }
}
