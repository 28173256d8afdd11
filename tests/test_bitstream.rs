mod common;

use common::{AbbrevOp, BitWriter, bitcode};
use dxil_sm6::bitcode::{BITCODE_MAGIC, Record};
use dxil_sm6::read::{BlockHeader, Error};
use dxil_sm6::schema::blocks::BlockId;
use dxil_sm6::{BitStreamVisitor, Bitcode};

const METADATA: u32 = BlockId::Metadata as u32;

#[test]
fn test_abbreviated_records_match_unabbreviated() {
    let data = bitcode(|w| {
        w.define_abbrev(&[
            AbbrevOp::Literal(5),
            AbbrevOp::Fixed(8),
            AbbrevOp::Vbr(6),
            AbbrevOp::Array,
            AbbrevOp::Char6,
        ]);
        w.abbrev_id(4);
        w.write(200, 8);
        w.write_vbr(1000, 6);
        w.write_vbr(3, 6);
        for c in b"aZ_" {
            w.write_char6(*c);
        }
        w.record(5, &[200, 1000, u64::from(b'a'), u64::from(b'Z'), u64::from(b'_')]);
    });

    let bitcode = Bitcode::new(&data).unwrap();
    assert_eq!(bitcode.magic, BITCODE_MAGIC);
    assert_eq!(bitcode.root.id, BlockId::Module as u32);
    assert_eq!(bitcode.root.level, 0);
    let records = &bitcode.root.records;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0], records[1]);
    assert_eq!(records[0].string(2), "aZ_");
    assert_eq!(bitcode.end_position, bitcode.word_count);
}

#[test]
fn test_block_info_abbreviations_apply_to_later_blocks() {
    let data = bitcode(|w| {
        w.enter_block(BlockId::BlockInfo as u32, 2);
        w.record(1, &[u64::from(METADATA)]);
        w.define_abbrev(&[AbbrevOp::Literal(1), AbbrevOp::Array, AbbrevOp::Fixed(8)]);
        w.end_block();

        w.enter_block(METADATA, 3);
        w.abbrev_id(4);
        w.write_vbr(2, 6);
        w.write(u64::from(b'h'), 8);
        w.write(u64::from(b'i'), 8);
        w.end_block();
    });

    let bitcode = Bitcode::new(&data).unwrap();
    // BLOCKINFO is consumed by the reader and never reaches the visitor.
    assert_eq!(bitcode.root.blocks.len(), 1);
    let metadata = &bitcode.root.blocks[0];
    assert_eq!(metadata.id, METADATA);
    assert_eq!(metadata.level, 1);
    assert_eq!(metadata.records, vec![Record::new(1, vec![104, 105])]);
}

#[test]
fn test_vbr_values_straddle_words() {
    let data = bitcode(|w| {
        // Leave the next record starting a few bits before a word boundary.
        for _ in 0..3 {
            w.record(1, &[]);
        }
        w.record(2, &[u64::MAX, 1 << 40, 0]);
    });

    let bitcode = Bitcode::new(&data).unwrap();
    let last = bitcode.root.records.last().unwrap();
    assert_eq!(last.operands, vec![u64::MAX, 1 << 40, 0]);
}

#[test]
fn test_vbr_overflow_is_an_error() {
    let mut w = BitWriter::new();
    w.word(BITCODE_MAGIC);
    w.enter_block(BlockId::Module as u32, 3);
    w.abbrev_id(3);
    w.write_vbr(1, 6);
    w.write_vbr(1, 6);
    // Thirteen vbr6 chunks carry 65 payload bits.
    for _ in 0..12 {
        w.write(0x3f, 6);
    }
    w.write(0x1f, 6);
    w.end_block();

    let result = Bitcode::new(&w.into_bytes());
    assert!(matches!(result, Err(Error::ReadBits(_))));
}

#[test]
fn test_malformed_streams() {
    // Root abbreviation id is not ENTER_SUBBLOCK.
    let mut w = BitWriter::new();
    w.word(BITCODE_MAGIC);
    w.word(0b10);
    assert_eq!(Bitcode::new(&w.into_bytes()).unwrap_err(), Error::InvalidInitialAbbrev(2));

    // Sub-blocks may only nest in MODULE and FUNCTION blocks.
    let data = bitcode(|w| {
        w.enter_block(METADATA, 3);
        w.enter_block(BlockId::Type as u32, 3);
        w.end_block();
        w.end_block();
    });
    assert_eq!(Bitcode::new(&data).unwrap_err(), Error::InvalidSubBlockParent(METADATA));

    // Abbreviation id 4 before any DEFINE_ABBREV.
    let data = bitcode(|w| w.abbrev_id(4));
    assert_eq!(
        Bitcode::new(&data).unwrap_err(),
        Error::NoSuchAbbrev {
            block_id: BlockId::Module as u32,
            abbrev_id: 4
        }
    );

    // Truncated in the middle of the module block.
    let mut data = bitcode(|w| w.record(1, &[1, 2, 3]));
    data.truncate(data.len() - 4);
    assert!(matches!(Bitcode::new(&data), Err(Error::ReadBits(_))));
}

#[test]
fn test_bitstream_reader() {
    struct LoggingVisitor(Vec<String>);

    impl BitStreamVisitor for LoggingVisitor {
        fn should_enter_block(&mut self, header: &BlockHeader) -> bool {
            self.0.push(format!("entering block: {}", header.id));
            header.id != BlockId::Type as u32
        }

        fn did_exit_block(&mut self, id: u32) {
            self.0.push(format!("exiting block: {id}"));
        }

        fn visit(&mut self, block_id: u32, record: Record) {
            self.0.push(format!(
                "record in {block_id}: code {} {:?}",
                record.code, record.operands
            ));
        }
    }

    let data = bitcode(|w| {
        w.record(1, &[1]);
        w.enter_block(BlockId::Type as u32, 4);
        w.record(1, &[2]);
        w.end_block();
        w.enter_block(BlockId::Function as u32, 4);
        w.record(1, &[1]);
        w.end_block();
    });

    let mut visitor = LoggingVisitor(Vec::new());
    Bitcode::read(&data, &mut visitor).unwrap();
    assert_eq!(
        visitor.0,
        vec![
            "entering block: 8",
            "record in 8: code 1 [1]",
            "entering block: 17",
            "entering block: 12",
            "record in 12: code 1 [1]",
            "exiting block: 12",
            "exiting block: 8",
        ]
    );
}
