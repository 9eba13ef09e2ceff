//! Reader for SAS7BDAT dataset files.
//!
//! A file is a header followed by fixed size pages. Meta pages carry
//! subheaders that describe the rows (row length and count) and the columns
//! (names, offsets, widths, types). Rows live on data pages, after the
//! subheader pointers of mix pages, or in subheaders of meta pages when the
//! file is compressed. Both the RLE (`SASYZCRL`) and the RDC (`SASYZCR2`)
//! row compression are supported.
//!
//! Numbers are stored as truncated IEEE doubles, strings are decoded as
//! cp1252. Date and time formats are not interpreted.

use std::borrow::Cow;

use tracing::{debug, trace};

use crate::domain::RVError;
use crate::loader::decode_legacy;
use crate::table::{Column, ColumnKind, Table, Value};

const MAGIC: [u8; 32] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc2, 0xea, 0x81,
    0x60, 0xb3, 0x14, 0x11, 0xcf, 0xbd, 0x92, 0x08, 0x00, 0x09, 0xc7, 0x31, 0x8c, 0x18, 0x1f,
    0x10, 0x11,
];

const ALIGN_1_OFFSET: usize = 32;
const ALIGN_2_OFFSET: usize = 35;
const ENDIANNESS_OFFSET: usize = 37;
const HEADER_SIZE_OFFSET: usize = 196;
const PAGE_SIZE_OFFSET: usize = 200;
const PAGE_COUNT_OFFSET: usize = 204;
const SUBHEADER_POINTERS_OFFSET: usize = 8;

const PAGE_TYPE_MASK: u64 = 0xF700;
const PAGE_META: u64 = 0x0000;
const PAGE_META2: u64 = 0x4000;
const PAGE_DATA: u64 = 0x0100;
const PAGE_MIX: u64 = 0x0200;
const PAGE_AMD: u64 = 0x0400;
const PAGE_COMP: u64 = 0x9000;

const TRUNCATED_SUBHEADER: u64 = 1;
const COMPRESSED_SUBHEADER: u64 = 4;
const COMPRESSED_SUBHEADER_TYPE: u64 = 1;

const RLE_LITERAL: &[u8] = b"SASYZCRL";
const RDC_LITERAL: &[u8] = b"SASYZCR2";

#[derive(Debug, Clone, Copy, PartialEq)]
enum Compression {
    None,
    Rle,
    Rdc,
}

#[derive(Debug, PartialEq)]
enum Subheader {
    RowSize,
    ColumnSize,
    ColumnText,
    ColumnName,
    ColumnAttributes,
    Ignored, // format/label, column list, subheader counts
}

fn classify(signature: &[u8]) -> Option<Subheader> {
    match signature {
        [0xF7, 0xF7, 0xF7, 0xF7]
        | [0x00, 0x00, 0x00, 0x00, 0xF7, 0xF7, 0xF7, 0xF7]
        | [0xF7, 0xF7, 0xF7, 0xF7, 0x00, 0x00, 0x00, 0x00]
        | [0xF7, 0xF7, 0xF7, 0xF7, 0xFF, 0xFF, 0xFB, 0xFE] => Some(Subheader::RowSize),
        [0xF6, 0xF6, 0xF6, 0xF6]
        | [0x00, 0x00, 0x00, 0x00, 0xF6, 0xF6, 0xF6, 0xF6]
        | [0xF6, 0xF6, 0xF6, 0xF6, 0x00, 0x00, 0x00, 0x00]
        | [0xF6, 0xF6, 0xF6, 0xF6, 0xFF, 0xFF, 0xFB, 0xFE] => Some(Subheader::ColumnSize),
        [0xFD, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFD]
        | [0xFD, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFD] => Some(Subheader::ColumnText),
        [0xFF, 0xFF, 0xFF, 0xFF] | [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF] => {
            Some(Subheader::ColumnName)
        }
        [0xFC, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFC]
        | [0xFC, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC] => Some(Subheader::ColumnAttributes),
        [0xFE, 0xFB, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFB, 0xFE]
        | [0xFE, 0xFB, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFB, 0xFE]
        | [0xFE, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFE]
        | [0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFE]
        | [0x00, 0xFC, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFC, 0x00]
        | [0x00, 0xFC, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]
        | [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC, 0x00] => Some(Subheader::Ignored),
        _ => None,
    }
}

fn malformed(why: impl Into<String>) -> RVError {
    RVError::MalformedSas(why.into())
}

/// Bounds checked access to a byte region with the file's byte order.
#[derive(Clone, Copy)]
struct Bytes<'a> {
    data: &'a [u8],
    little_endian: bool,
}

impl<'a> Bytes<'a> {
    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], RVError> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| malformed(format!("{len} bytes at offset {offset} out of range")))
    }

    fn read_uint(&self, offset: usize, len: usize) -> Result<u64, RVError> {
        let raw = self.slice(offset, len)?;
        let mut buf = [0u8; 8];
        let value = if self.little_endian {
            buf[..len].copy_from_slice(raw);
            u64::from_le_bytes(buf)
        } else {
            buf[8 - len..].copy_from_slice(raw);
            u64::from_be_bytes(buf)
        };
        Ok(value)
    }

    fn read_usize(&self, offset: usize, len: usize) -> Result<usize, RVError> {
        usize::try_from(self.read_uint(offset, len)?).map_err(|_| malformed("value out of range"))
    }

    fn sub(&self, offset: usize, len: usize) -> Result<Bytes<'a>, RVError> {
        Ok(Bytes {
            data: self.slice(offset, len)?,
            little_endian: self.little_endian,
        })
    }
}

#[derive(Debug)]
struct Header {
    int_len: usize,
    page_bit_offset: usize,
    pointer_len: usize,
    little_endian: bool,
    header_length: usize,
    page_length: usize,
    page_count: usize,
}

fn read_header(data: &[u8]) -> Result<Header, RVError> {
    if data.len() < 288 || data[..32] != MAGIC {
        return Err(malformed("magic number mismatch"));
    }
    let is_u64 = data[ALIGN_1_OFFSET] == b'3';
    let align = if data[ALIGN_2_OFFSET] == b'3' { 4 } else { 0 };
    let little_endian = data[ENDIANNESS_OFFSET] == 0x01;
    let int_len = if is_u64 { 8 } else { 4 };
    let bytes = Bytes {
        data,
        little_endian,
    };
    let header = Header {
        int_len,
        page_bit_offset: if is_u64 { 32 } else { 16 },
        pointer_len: if is_u64 { 24 } else { 12 },
        little_endian,
        header_length: bytes.read_usize(HEADER_SIZE_OFFSET + align, 4)?,
        page_length: bytes.read_usize(PAGE_SIZE_OFFSET + align, 4)?,
        page_count: bytes.read_usize(PAGE_COUNT_OFFSET + align, int_len)?,
    };
    if header.page_length == 0 {
        return Err(malformed("page length is zero"));
    }
    debug!("sas7bdat header: {:?}", header);
    Ok(header)
}

#[derive(Debug, Clone, Copy)]
struct ColumnAttr {
    offset: usize,
    width: usize,
    numeric: bool,
}

#[derive(Debug, Clone, Copy)]
struct NameRef {
    block: usize,
    offset: usize,
    len: usize,
}

#[derive(Default)]
struct Metadata {
    row_length: usize,
    row_count: usize,
    mix_page_row_count: usize,
    column_count: usize,
    text_blocks: Vec<Vec<u8>>,
    names: Vec<NameRef>,
    attrs: Vec<ColumnAttr>,
    compression: Option<Compression>,
}

struct PageInfo<'a> {
    bytes: Bytes<'a>,
    page_type: u64,
    block_count: usize,
    subheader_count: usize,
    // (offset, length) of subheaders that hold row data
    row_pointers: Vec<(usize, usize)>,
}

/// Parse a complete SAS7BDAT file.
pub fn read(data: &[u8]) -> Result<Table, RVError> {
    let header = read_header(data)?;
    let file = Bytes {
        data,
        little_endian: header.little_endian,
    };

    let mut meta = Metadata::default();
    let mut pages = Vec::new();
    for idx in 0..header.page_count {
        let start = idx
            .checked_mul(header.page_length)
            .and_then(|o| o.checked_add(header.header_length))
            .ok_or_else(|| malformed("page offset overflow"))?;
        let bytes = file.sub(start, header.page_length)?;
        let page = read_page(&header, bytes, &mut meta)?;
        trace!(
            "Page {idx}: type {:#06x}, blocks {}, subheaders {}",
            page.page_type, page.block_count, page.subheader_count
        );
        pages.push(page);
    }

    let compression = meta.compression.unwrap_or(Compression::None);
    let names = resolve_names(&meta)?;
    if meta.attrs.len() < meta.column_count || names.len() < meta.column_count {
        return Err(malformed(format!(
            "expected {} columns, found {} names and {} attributes",
            meta.column_count,
            names.len(),
            meta.attrs.len()
        )));
    }
    let attrs = &meta.attrs[..meta.column_count];
    // A row can not be longer than the file it comes from, compressed or not.
    if meta.row_length > data.len() || (meta.row_length == 0 && meta.row_count > 0) {
        return Err(malformed(format!("row length {}", meta.row_length)));
    }
    debug!(
        "sas7bdat: {} rows, {} columns, row length {}, {:?}",
        meta.row_count, meta.column_count, meta.row_length, compression
    );

    let mut cells: Vec<Vec<Value>> = vec![Vec::new(); attrs.len()];
    let mut rows_read = 0;
    for page in pages.iter() {
        for raw in page_rows(&header, &meta, page, compression)? {
            if rows_read == meta.row_count {
                break;
            }
            let row = decompress_row(raw, meta.row_length, compression)?;
            for (attr, column) in attrs.iter().zip(cells.iter_mut()) {
                column.push(decode_cell(&row, attr, header.little_endian)?);
            }
            rows_read += 1;
        }
    }
    if rows_read < meta.row_count {
        return Err(malformed(format!(
            "expected {} rows, found {rows_read}",
            meta.row_count
        )));
    }

    let columns = names
        .into_iter()
        .zip(attrs.iter())
        .zip(cells)
        .map(|((name, attr), data)| {
            let kind = if attr.numeric {
                ColumnKind::Float
            } else {
                ColumnKind::Text
            };
            Column::new(name, kind, data)
        })
        .collect();
    Ok(Table::new(columns))
}

fn read_page<'a>(
    header: &Header,
    bytes: Bytes<'a>,
    meta: &mut Metadata,
) -> Result<PageInfo<'a>, RVError> {
    let bit_offset = header.page_bit_offset;
    let mut page = PageInfo {
        bytes,
        page_type: bytes.read_uint(bit_offset, 2)? & PAGE_TYPE_MASK,
        block_count: bytes.read_usize(bit_offset + 2, 2)?,
        subheader_count: bytes.read_usize(bit_offset + 4, 2)?,
        row_pointers: Vec::new(),
    };
    if !matches!(
        page.page_type,
        PAGE_META | PAGE_META2 | PAGE_AMD | PAGE_MIX
    ) {
        return Ok(page);
    }

    let int_len = header.int_len;
    for i in 0..page.subheader_count {
        let pointer = bit_offset + SUBHEADER_POINTERS_OFFSET + i * header.pointer_len;
        let offset = bytes.read_usize(pointer, int_len)?;
        let length = bytes.read_usize(pointer + int_len, int_len)?;
        let compression = bytes.read_uint(pointer + 2 * int_len, 1)?;
        let subheader_type = bytes.read_uint(pointer + 2 * int_len + 1, 1)?;
        if length == 0 || compression == TRUNCATED_SUBHEADER {
            continue;
        }

        let signature = bytes.slice(offset, int_len)?;
        match classify(signature) {
            Some(kind) => read_subheader(kind, header, bytes, offset, length, meta)?,
            None if (compression == COMPRESSED_SUBHEADER || compression == 0)
                && subheader_type == COMPRESSED_SUBHEADER_TYPE =>
            {
                page.row_pointers.push((offset, length))
            }
            None => trace!("Skipping unknown subheader {:02x?}", signature),
        }
    }
    Ok(page)
}

fn read_subheader(
    kind: Subheader,
    header: &Header,
    bytes: Bytes,
    offset: usize,
    length: usize,
    meta: &mut Metadata,
) -> Result<(), RVError> {
    let int_len = header.int_len;
    match kind {
        Subheader::RowSize => {
            meta.row_length = bytes.read_usize(offset + 5 * int_len, int_len)?;
            meta.row_count = bytes.read_usize(offset + 6 * int_len, int_len)?;
            meta.mix_page_row_count = bytes.read_usize(offset + 15 * int_len, int_len)?;
        }
        Subheader::ColumnSize => {
            meta.column_count = bytes.read_usize(offset + int_len, int_len)?;
        }
        Subheader::ColumnText => {
            let size = bytes.read_usize(offset + int_len, 2)?;
            let block = bytes.slice(offset + int_len, size)?;
            if meta.compression.is_none() {
                meta.compression = Some(detect_compression(block));
            }
            meta.text_blocks.push(block.to_vec());
        }
        Subheader::ColumnName => {
            let count = length.saturating_sub(2 * int_len + 12) / 8;
            for i in 0..count {
                let entry = offset + int_len + 8 * (i + 1);
                meta.names.push(NameRef {
                    block: bytes.read_usize(entry, 2)?,
                    offset: bytes.read_usize(entry + 2, 2)?,
                    len: bytes.read_usize(entry + 4, 2)?,
                });
            }
        }
        Subheader::ColumnAttributes => {
            let count = length.saturating_sub(2 * int_len + 12) / (int_len + 8);
            for i in 0..count {
                let entry = offset + i * (int_len + 8);
                meta.attrs.push(ColumnAttr {
                    offset: bytes.read_usize(entry + int_len + 8, int_len)?,
                    width: bytes.read_usize(entry + 2 * int_len + 8, 4)?,
                    numeric: bytes.read_uint(entry + 2 * int_len + 14, 1)? == 1,
                });
            }
        }
        Subheader::Ignored => {}
    }
    Ok(())
}

fn detect_compression(block: &[u8]) -> Compression {
    let contains = |literal: &[u8]| block.windows(literal.len()).any(|w| w == literal);
    if contains(RLE_LITERAL) {
        Compression::Rle
    } else if contains(RDC_LITERAL) {
        Compression::Rdc
    } else {
        Compression::None
    }
}

fn resolve_names(meta: &Metadata) -> Result<Vec<String>, RVError> {
    meta.names
        .iter()
        .map(|r| {
            let raw = meta
                .text_blocks
                .get(r.block)
                .zip(r.offset.checked_add(r.len))
                .and_then(|(b, end)| b.get(r.offset..end))
                .ok_or_else(|| malformed(format!("column name {:?} out of range", r)))?;
            Ok(decode_legacy(trim_padding(raw)))
        })
        .collect()
}

/// Raw bytes of every row stored on a page, in order.
fn page_rows<'a>(
    header: &Header,
    meta: &Metadata,
    page: &PageInfo<'a>,
    compression: Compression,
) -> Result<Vec<&'a [u8]>, RVError> {
    let bit_offset = header.page_bit_offset;
    let row_length = meta.row_length;
    let (start, count) = match page.page_type {
        PAGE_META | PAGE_META2 | PAGE_AMD => {
            if compression == Compression::None && page.row_pointers.is_empty() {
                return Ok(Vec::new());
            }
            return page
                .row_pointers
                .iter()
                .map(|&(offset, length)| page.bytes.slice(offset, length))
                .collect();
        }
        PAGE_MIX => {
            let pointers_end = bit_offset
                + SUBHEADER_POINTERS_OFFSET
                + page.subheader_count * header.pointer_len;
            // Rows start at the next 8 byte boundary after the pointers.
            let start = pointers_end.div_ceil(8) * 8;
            (start, meta.row_count.min(meta.mix_page_row_count))
        }
        PAGE_DATA => (bit_offset + SUBHEADER_POINTERS_OFFSET, page.block_count),
        PAGE_COMP => return Ok(Vec::new()),
        other => return Err(malformed(format!("unknown page type {other:#06x}"))),
    };
    (0..count)
        .map(|k| {
            let offset = k
                .checked_mul(row_length)
                .and_then(|o| o.checked_add(start))
                .ok_or_else(|| malformed("row offset overflow"))?;
            page.bytes.slice(offset, row_length)
        })
        .collect()
}

fn decompress_row(
    raw: &[u8],
    row_length: usize,
    compression: Compression,
) -> Result<Cow<'_, [u8]>, RVError> {
    if raw.len() >= row_length {
        return Ok(Cow::Borrowed(raw));
    }
    let row = match compression {
        Compression::Rle => rle_decompress(raw, row_length)?,
        Compression::Rdc => rdc_decompress(raw, row_length)?,
        Compression::None => {
            return Err(malformed(format!(
                "row of {} bytes, expected {row_length}",
                raw.len()
            )));
        }
    };
    Ok(Cow::Owned(row))
}

fn trim_padding(raw: &[u8]) -> &[u8] {
    let end = raw
        .iter()
        .rposition(|&b| b != 0x00 && b != b' ')
        .map_or(0, |p| p + 1);
    &raw[..end]
}

fn decode_cell(row: &[u8], attr: &ColumnAttr, little_endian: bool) -> Result<Value, RVError> {
    if attr.width == 0 {
        return Ok(Value::Null);
    }
    let raw = attr
        .offset
        .checked_add(attr.width)
        .and_then(|end| row.get(attr.offset..end))
        .ok_or_else(|| malformed(format!("column {:?} outside of row", attr)))?;
    if attr.numeric {
        return decode_number(raw, little_endian);
    }
    let text = decode_legacy(trim_padding(raw));
    if text.is_empty() {
        Ok(Value::Null)
    } else {
        Ok(Value::Text(text))
    }
}

// Numbers may be stored with the low order bytes cut off.
fn decode_number(raw: &[u8], little_endian: bool) -> Result<Value, RVError> {
    if raw.is_empty() || raw.len() > 8 {
        return Err(malformed(format!("numeric width {}", raw.len())));
    }
    let mut buf = [0u8; 8];
    let x = if little_endian {
        buf[8 - raw.len()..].copy_from_slice(raw);
        f64::from_le_bytes(buf)
    } else {
        buf[..raw.len()].copy_from_slice(raw);
        f64::from_be_bytes(buf)
    };
    // SAS missing values are NaN payloads.
    if x.is_nan() {
        Ok(Value::Null)
    } else {
        Ok(Value::Float(x))
    }
}

fn input_byte(input: &[u8], pos: usize) -> Result<u8, RVError> {
    input
        .get(pos)
        .copied()
        .ok_or_else(|| malformed("compressed row ends early"))
}

fn input_run<'a>(input: &'a [u8], pos: usize, len: usize) -> Result<&'a [u8], RVError> {
    input
        .get(pos..pos + len)
        .ok_or_else(|| malformed("compressed row ends early"))
}

fn finish_row(mut out: Vec<u8>, row_length: usize) -> Result<Vec<u8>, RVError> {
    if out.len() > row_length {
        return Err(malformed(format!(
            "decompressed row is {} bytes, expected {row_length}",
            out.len()
        )));
    }
    out.resize(row_length, 0);
    Ok(out)
}

fn rle_decompress(input: &[u8], row_length: usize) -> Result<Vec<u8>, RVError> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos < input.len() {
        let control = input[pos] & 0xF0;
        let low = (input[pos] & 0x0F) as usize;
        pos += 1;
        match control {
            0x00 => {
                let n = input_byte(input, pos)? as usize + 64 + low * 256;
                pos += 1;
                out.extend_from_slice(input_run(input, pos, n)?);
                pos += n;
            }
            0x40 => {
                let n = low * 16 + input_byte(input, pos)? as usize;
                let b = input_byte(input, pos + 1)?;
                pos += 2;
                out.resize(out.len() + n, b);
            }
            0x60 | 0x70 => {
                let n = low * 256 + input_byte(input, pos)? as usize + 17;
                pos += 1;
                let b = if control == 0x60 { b' ' } else { 0x00 };
                out.resize(out.len() + n, b);
            }
            0x80 | 0x90 | 0xA0 | 0xB0 => {
                let n = low + 1 + ((control - 0x80) as usize >> 4) * 16;
                out.extend_from_slice(input_run(input, pos, n)?);
                pos += n;
            }
            0xC0 => {
                let b = input_byte(input, pos)?;
                pos += 1;
                out.resize(out.len() + low + 3, b);
            }
            0xD0 => out.resize(out.len() + low + 2, b'@'),
            0xE0 => out.resize(out.len() + low + 2, b' '),
            0xF0 => out.resize(out.len() + low + 2, 0x00),
            other => return Err(malformed(format!("unknown RLE control byte {other:#04x}"))),
        }
    }
    finish_row(out, row_length)
}

fn rdc_decompress(input: &[u8], row_length: usize) -> Result<Vec<u8>, RVError> {
    let mut out: Vec<u8> = Vec::new();
    let mut ctrl_bits: u16 = 0;
    let mut ctrl_mask: u16 = 0;
    let mut pos = 0;
    while pos < input.len() {
        ctrl_mask >>= 1;
        if ctrl_mask == 0 {
            ctrl_bits = u16::from(input_byte(input, pos)?) << 8
                | u16::from(input_byte(input, pos + 1)?);
            pos += 2;
            ctrl_mask = 0x8000;
        }
        if ctrl_bits & ctrl_mask == 0 {
            out.push(input_byte(input, pos)?);
            pos += 1;
            continue;
        }

        let cmd = (input_byte(input, pos)? >> 4) as usize;
        let cnt = (input_byte(input, pos)? & 0x0F) as usize;
        pos += 1;
        match cmd {
            // short run
            0 => {
                let b = input_byte(input, pos)?;
                pos += 1;
                out.resize(out.len() + cnt + 3, b);
            }
            // long run
            1 => {
                let n = cnt + ((input_byte(input, pos)? as usize) << 4) + 19;
                let b = input_byte(input, pos + 1)?;
                pos += 2;
                out.resize(out.len() + n, b);
            }
            // long pattern
            2 => {
                let back = cnt + 3 + ((input_byte(input, pos)? as usize) << 4);
                let n = input_byte(input, pos + 1)? as usize + 16;
                pos += 2;
                copy_back(&mut out, back, n)?;
            }
            // short pattern, the command is the length
            _ => {
                let back = cnt + 3 + ((input_byte(input, pos)? as usize) << 4);
                pos += 1;
                copy_back(&mut out, back, cmd)?;
            }
        }
    }
    finish_row(out, row_length)
}

fn copy_back(out: &mut Vec<u8>, back: usize, n: usize) -> Result<(), RVError> {
    let start = out
        .len()
        .checked_sub(back)
        .ok_or_else(|| malformed("RDC pattern points before the row"))?;
    for k in 0..n {
        let b = out[start + k];
        out.push(b);
    }
    Ok(())
}
