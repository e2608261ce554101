// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Kernel printf surface decoding.
//!
//! A printf-using kernel appends records to a GPU buffer:
//!
//! | Offset | Contents                                         |
//! |--------|--------------------------------------------------|
//! | 0      | `u32` bytes written so far, header included      |
//! | 4..    | records                                          |
//!
//! A record is a `u32` format-string index followed by one `(u32 tag,
//! payload)` pair per conversion in that format string.

use std::sync::Arc;

use crate::allocation::AllocationRef;
use crate::kernel::KernelImmutableData;

pub const PRINTF_SURFACE_SIZE: usize = 64 * 1024;
const HEADER_SIZE: u32 = 4;

/// Argument type tags.
pub mod tags {
    pub const INT: u32 = 1;
    pub const LONG: u32 = 2;
    pub const FLOAT: u32 = 3;
    pub const DOUBLE: u32 = 4;
    pub const STRING: u32 = 5;
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Arg {
    Int(i64),
    Float(f64),
    Str(u32),
}

/// Cursor over the record area of a printf surface.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn u32(&mut self) -> Option<u32> {
        let bytes = self.data.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Option<u64> {
        let low = self.u32()? as u64;
        let high = self.u32()? as u64;
        Some((high << 32) | low)
    }

    fn arg(&mut self) -> Option<Arg> {
        match self.u32()? {
            tags::INT => Some(Arg::Int(self.u32()? as i32 as i64)),
            tags::LONG => Some(Arg::Int(self.u64()? as i64)),
            tags::FLOAT => Some(Arg::Float(f32::from_bits(self.u32()?) as f64)),
            tags::DOUBLE => Some(Arg::Float(f64::from_bits(self.u64()?))),
            tags::STRING => Some(Arg::Str(self.u32()?)),
            other => {
                log::warn!("printf: unknown argument tag {}", other);
                None
            }
        }
    }
}

/// Conversion spec parsed from the format string.
#[derive(Debug, Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    width: usize,
    precision: Option<usize>,
}

impl Spec {
    fn pad(&self, body: String, out: &mut String) {
        let len = body.chars().count();
        if len >= self.width {
            out.push_str(&body);
        } else if self.left {
            out.push_str(&body);
            out.extend(std::iter::repeat(' ').take(self.width - len));
        } else if self.zero {
            let (sign, digits) = match body.strip_prefix('-') {
                Some(rest) => ("-", rest.to_string()),
                None => ("", body),
            };
            out.push_str(sign);
            out.extend(std::iter::repeat('0').take(self.width - len));
            out.push_str(&digits);
        } else {
            out.extend(std::iter::repeat(' ').take(self.width - len));
            out.push_str(&body);
        }
    }
}

/// Expand one record; `None` when the buffer ends mid-record.
fn format_record(format: &str, strings: &[String], reader: &mut Reader<'_>) -> Option<String> {
    let mut out = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                ' ' | '#' => {}
                _ => break,
            }
            chars.next();
        }
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            spec.width = spec.width * 10 + d as usize;
            chars.next();
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut precision = 0;
            while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
                precision = precision * 10 + d as usize;
                chars.next();
            }
            spec.precision = Some(precision);
        }
        while matches!(chars.peek(), Some('l' | 'h' | 'z')) {
            chars.next();
        }
        let Some(conversion) = chars.next() else {
            out.push('%');
            break;
        };

        let arg = reader.arg()?;
        let body = match (conversion, arg) {
            ('d' | 'i', Arg::Int(v)) if spec.plus && v >= 0 => format!("+{}", v),
            ('d' | 'i', Arg::Int(v)) => v.to_string(),
            ('u', Arg::Int(v)) => (v as u64).to_string(),
            ('x', Arg::Int(v)) => format!("{:x}", v),
            ('X', Arg::Int(v)) => format!("{:X}", v),
            ('c', Arg::Int(v)) => char::from_u32(v as u32).unwrap_or('?').to_string(),
            ('f' | 'F', Arg::Float(v)) => format!("{:.*}", spec.precision.unwrap_or(6), v),
            ('e' | 'E', Arg::Float(v)) => format!("{:.*e}", spec.precision.unwrap_or(6), v),
            ('g' | 'G', Arg::Float(v)) => v.to_string(),
            ('s', Arg::Str(index)) => strings.get(index as usize).cloned().unwrap_or_default(),
            (other, arg) => {
                log::warn!("printf: conversion '%{}' does not match {:?}", other, arg);
                String::new()
            }
        };
        spec.pad(body, &mut out);
    }
    Some(out)
}

/// Decode every complete record in `surface`.
pub fn decode_surface(surface: &[u8], strings: &[String]) -> Vec<String> {
    let mut reader = Reader { data: surface, pos: 0 };
    let written = reader.u32().unwrap_or(HEADER_SIZE).min(surface.len() as u32) as usize;
    let mut reader = Reader {
        data: &surface[..written],
        pos: HEADER_SIZE as usize,
    };

    let mut lines = Vec::new();
    while let Some(index) = reader.u32() {
        let Some(format) = strings.get(index as usize) else {
            log::warn!("printf: format string index {} out of range", index);
            break;
        };
        match format_record(format, strings, &mut reader) {
            Some(line) => lines.push(line),
            None => {
                log::warn!("printf: truncated record for format {}", index);
                break;
            }
        }
    }
    lines
}

/// A kernel's printf surface plus the string table needed to decode it.
#[derive(Debug, Clone)]
pub struct PrintfHandle {
    buffer: AllocationRef,
    kernel: Arc<KernelImmutableData>,
}

impl PrintfHandle {
    pub fn new(buffer: AllocationRef, kernel: Arc<KernelImmutableData>) -> Self {
        Self { buffer, kernel }
    }

    /// Reset a surface to the empty state.
    pub fn initialize_buffer(buffer: &AllocationRef) {
        buffer.fill(0);
        buffer.write_u32(0, HEADER_SIZE);
    }

    pub fn buffer(&self) -> &AllocationRef {
        &self.buffer
    }

    /// Decode pending records, log them, and rewind the surface.
    pub fn drain(&self) -> Vec<String> {
        let written = (self.buffer.read_u32(0) as usize).min(self.buffer.size());
        if written <= HEADER_SIZE as usize {
            return Vec::new();
        }
        let surface = self.buffer.to_vec(written);
        let lines = decode_surface(&surface, &self.kernel.descriptor().printf_strings);
        for line in &lines {
            log::info!("{}", line);
        }
        Self::initialize_buffer(&self.buffer);
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a surface the way a kernel would write it.
    #[derive(Default)]
    struct Writer(Vec<u8>);

    impl Writer {
        fn u32(mut self, v: u32) -> Self {
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }
        fn u64(mut self, v: u64) -> Self {
            self.0.extend_from_slice(&v.to_le_bytes());
            self
        }
        fn finish(self) -> Vec<u8> {
            let mut out = ((self.0.len() + 4) as u32).to_le_bytes().to_vec();
            out.extend_from_slice(&self.0);
            out
        }
    }

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_decode_integers_and_strings() {
        let table = strings(&["id=%d hex=%x name=%s %%\n", "world"]);
        let surface = Writer::default()
            .u32(0)
            .u32(tags::INT)
            .u32((-5i32) as u32)
            .u32(tags::INT)
            .u32(255)
            .u32(tags::STRING)
            .u32(1)
            .finish();
        assert_eq!(decode_surface(&surface, &table), vec!["id=-5 hex=ff name=world %\n"]);
    }

    #[test]
    fn test_decode_floats_and_longs() {
        let table = strings(&["%.2f %ld %5d|%-3d|%03d"]);
        let surface = Writer::default()
            .u32(0)
            .u32(tags::DOUBLE)
            .u64(1.5f64.to_bits())
            .u32(tags::LONG)
            .u64(1 << 40)
            .u32(tags::INT)
            .u32(42)
            .u32(tags::INT)
            .u32(7)
            .u32(tags::INT)
            .u32(9)
            .finish();
        assert_eq!(
            decode_surface(&surface, &table),
            vec!["1.50 1099511627776    42|7  |009"]
        );
    }

    #[test]
    fn test_multiple_records_and_truncation() {
        let table = strings(&["a%d", "b"]);
        let mut surface = Writer::default()
            .u32(0)
            .u32(tags::INT)
            .u32(1)
            .u32(1)
            .u32(0)
            .u32(tags::INT)
            .finish();
        assert_eq!(decode_surface(&surface, &table), vec!["a1", "b"]);

        // Header claims more than the buffer holds.
        surface[0..4].copy_from_slice(&1000u32.to_le_bytes());
        assert_eq!(decode_surface(&surface, &table).len(), 2);
    }

    #[test]
    fn test_float_argument() {
        let table = strings(&["%f"]);
        let surface = Writer::default()
            .u32(0)
            .u32(tags::FLOAT)
            .u32(0.25f32.to_bits())
            .finish();
        assert_eq!(decode_surface(&surface, &table), vec!["0.250000"]);
    }

    #[test]
    fn test_empty_surface() {
        let surface = Writer::default().finish();
        assert!(decode_surface(&surface, &[]).is_empty());
    }
}
