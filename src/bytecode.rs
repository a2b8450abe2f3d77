//! Bytecode format for ByteScript
//!
//! A unit's bytecode is a flat little-endian byte buffer. Statements follow
//! each other in source order; expressions are prefix encoded, so an operator
//! byte is immediately followed by the encodings of its operands and there
//! are no push/pop instructions. Jump targets are absolute `i32` offsets into
//! the same buffer.

use std::fmt;
use std::fmt::Write as _;

use crate::ast::{BinaryOp, UnaryOp};
use crate::error::{ErrorKind, Result, ScriptError};

/// Opcodes for the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // Statements
    ReturnVoid = 0x00,   //
    ReturnValue = 0x01,  // expr
    Print = 0x02,        // expr
    DeclareVar = 0x03,   // slot, has_init, [expr]
    SetVar = 0x04,       // slot, expr
    GetVar = 0x05,       // slot
    FreeVar = 0x06,      // slot
    CallFunction = 0x07, // name, argc, expr * argc
    CondTest = 0x08,     // target (jump if false), expr
    Jump = 0x09,         // target

    // Binary operators: op, left, right
    Add = 0x10,
    Subtract = 0x11,
    Multiply = 0x12,
    Divide = 0x13,
    Modulo = 0x14,
    Power = 0x15,
    Equal = 0x16,
    NotEqual = 0x17,
    Less = 0x18,
    LessEqual = 0x19,
    Greater = 0x1a,
    GreaterEqual = 0x1b,
    And = 0x1c,
    Or = 0x1d,

    // Unary operators: op, operand
    Not = 0x20,
    Negate = 0x21,
    ToFloat = 0x22,

    // Literals
    ConstBool = 0x30,   // u8
    ConstInt = 0x31,    // i32
    ConstFloat = 0x32,  // f32
    ConstString = 0x33, // u16 length + UTF-16 units
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> std::result::Result<Self, u8> {
        let op = match byte {
            0x00 => OpCode::ReturnVoid,
            0x01 => OpCode::ReturnValue,
            0x02 => OpCode::Print,
            0x03 => OpCode::DeclareVar,
            0x04 => OpCode::SetVar,
            0x05 => OpCode::GetVar,
            0x06 => OpCode::FreeVar,
            0x07 => OpCode::CallFunction,
            0x08 => OpCode::CondTest,
            0x09 => OpCode::Jump,
            0x10 => OpCode::Add,
            0x11 => OpCode::Subtract,
            0x12 => OpCode::Multiply,
            0x13 => OpCode::Divide,
            0x14 => OpCode::Modulo,
            0x15 => OpCode::Power,
            0x16 => OpCode::Equal,
            0x17 => OpCode::NotEqual,
            0x18 => OpCode::Less,
            0x19 => OpCode::LessEqual,
            0x1a => OpCode::Greater,
            0x1b => OpCode::GreaterEqual,
            0x1c => OpCode::And,
            0x1d => OpCode::Or,
            0x20 => OpCode::Not,
            0x21 => OpCode::Negate,
            0x22 => OpCode::ToFloat,
            0x30 => OpCode::ConstBool,
            0x31 => OpCode::ConstInt,
            0x32 => OpCode::ConstFloat,
            0x33 => OpCode::ConstString,
            other => return Err(other),
        };
        Ok(op)
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}

impl OpCode {
    pub fn from_binary(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Add => OpCode::Add,
            BinaryOp::Sub => OpCode::Subtract,
            BinaryOp::Mul => OpCode::Multiply,
            BinaryOp::Div => OpCode::Divide,
            BinaryOp::Mod => OpCode::Modulo,
            BinaryOp::Pow => OpCode::Power,
            BinaryOp::Eq => OpCode::Equal,
            BinaryOp::Ne => OpCode::NotEqual,
            BinaryOp::Lt => OpCode::Less,
            BinaryOp::Le => OpCode::LessEqual,
            BinaryOp::Gt => OpCode::Greater,
            BinaryOp::Ge => OpCode::GreaterEqual,
            BinaryOp::And => OpCode::And,
            BinaryOp::Or => OpCode::Or,
        }
    }

    pub fn as_binary(&self) -> Option<BinaryOp> {
        let op = match self {
            OpCode::Add => BinaryOp::Add,
            OpCode::Subtract => BinaryOp::Sub,
            OpCode::Multiply => BinaryOp::Mul,
            OpCode::Divide => BinaryOp::Div,
            OpCode::Modulo => BinaryOp::Mod,
            OpCode::Power => BinaryOp::Pow,
            OpCode::Equal => BinaryOp::Eq,
            OpCode::NotEqual => BinaryOp::Ne,
            OpCode::Less => BinaryOp::Lt,
            OpCode::LessEqual => BinaryOp::Le,
            OpCode::Greater => BinaryOp::Gt,
            OpCode::GreaterEqual => BinaryOp::Ge,
            OpCode::And => BinaryOp::And,
            OpCode::Or => BinaryOp::Or,
            _ => return None,
        };
        Some(op)
    }

    pub fn from_unary(op: UnaryOp) -> Self {
        match op {
            UnaryOp::Neg => OpCode::Negate,
            UnaryOp::Not => OpCode::Not,
        }
    }
}

/// Append-only encoder with support for backpatching `i32` addresses.
#[derive(Debug, Clone, Default)]
pub struct ByteWriter {
    code: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { code: Vec::new() }
    }

    /// Current buffer length, i.e. the address of the next byte written.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn write_op(&mut self, op: OpCode) {
        self.code.push(op as u8);
    }

    pub fn write_u8(&mut self, value: u8) {
        self.code.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.code.push(value as u8);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u16(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.code.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.code.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    /// u16 count of UTF-16 code units, then the units.
    pub fn write_str(&mut self, value: &str) -> Result<()> {
        let units: Vec<u16> = value.encode_utf16().collect();
        let len = u16::try_from(units.len())
            .map_err(|_| ScriptError::runtime(ErrorKind::StringTooLong(units.len())))?;
        self.write_u16(len);
        for unit in units {
            self.write_u16(unit);
        }
        Ok(())
    }

    /// Write a placeholder address and return where it lives.
    pub fn reserve_address(&mut self) -> usize {
        let at = self.code.len();
        self.write_i32(0);
        at
    }

    pub fn write_address(&mut self, target: usize) -> Result<()> {
        let target = to_address(target)?;
        self.write_i32(target);
        Ok(())
    }

    /// Point the placeholder at `at` to the current end of the buffer.
    pub fn patch_to_here(&mut self, at: usize) -> Result<()> {
        let target = to_address(self.code.len())?;
        self.code[at..at + 4].copy_from_slice(&target.to_le_bytes());
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.code
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.code
    }
}

fn to_address(target: usize) -> Result<i32> {
    i32::try_from(target).map_err(|_| ScriptError::runtime(ErrorKind::JumpOutOfRange(target)))
}

/// Cursor over a bytecode buffer. Every read checks bounds and reports a
/// truncated buffer instead of panicking.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    code: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(code: &'a [u8]) -> Self {
        Self { code, pos: 0 }
    }

    pub fn at(code: &'a [u8], pos: usize) -> Self {
        Self { code, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.code.len()
    }

    /// Move to an absolute address; addresses may point one past the end.
    pub fn seek(&mut self, target: i32) -> Result<()> {
        match usize::try_from(target) {
            Ok(target) if target <= self.code.len() => {
                self.pos = target;
                Ok(())
            }
            _ => Err(ScriptError::runtime(ErrorKind::JumpOutOfRange(
                target.max(0) as usize,
            ))),
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let bytes = self
            .code
            .get(self.pos..end)
            .ok_or_else(|| ScriptError::runtime(ErrorKind::TruncatedBytecode(self.pos)))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub fn read_op(&mut self) -> Result<OpCode> {
        let at = self.pos;
        let byte = self.read_u8()?;
        OpCode::try_from(byte).map_err(|b| ScriptError::runtime(ErrorKind::UnknownOpcode(b, at)))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_str(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        let mut units = Vec::with_capacity(len);
        for _ in 0..len {
            units.push(self.read_u16()?);
        }
        Ok(String::from_utf16_lossy(&units))
    }
}

/// Render a buffer one instruction per line: address, mnemonic, immediates.
/// Operand expressions follow their operator on the next lines.
pub fn disassemble(code: &[u8], name: &str) -> Result<String> {
    let mut out = format!("== {} ==\n", name);
    let mut reader = ByteReader::new(code);

    while !reader.is_at_end() {
        let offset = reader.pos();
        let op = reader.read_op()?;
        let operands = match op {
            OpCode::DeclareVar => {
                let slot = reader.read_u8()?;
                let init = reader.read_bool()?;
                format!(" slot:{}{}", slot, if init { " init" } else { "" })
            }
            OpCode::SetVar | OpCode::GetVar | OpCode::FreeVar => {
                format!(" slot:{}", reader.read_u8()?)
            }
            OpCode::CallFunction => {
                let callee = reader.read_str()?;
                let argc = reader.read_u8()?;
                format!(" '{}' ({})", callee, argc)
            }
            OpCode::CondTest | OpCode::Jump => format!(" -> {:04}", reader.read_i32()?),
            OpCode::ConstBool => format!(" {}", reader.read_bool()?),
            OpCode::ConstInt => format!(" {}", reader.read_i32()?),
            OpCode::ConstFloat => format!(" {:?}", reader.read_f32()?),
            OpCode::ConstString => format!(" {:?}", reader.read_str()?),
            _ => String::new(),
        };
        // Writing to a String cannot fail.
        let _ = writeln!(out, "{:04} {:?}{}", offset, op, operands);
    }

    Ok(out)
}

/// A compiled buffer paired with a name, printable as its disassembly.
pub struct Listing<'a> {
    pub name: &'a str,
    pub code: &'a [u8],
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match disassemble(self.code, self.name) {
            Ok(text) => f.write_str(&text),
            Err(e) => write!(f, "== {} ==\n<{}>", self.name, e.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_round_trip() {
        let mut w = ByteWriter::new();
        w.write_bool(true);
        w.write_bool(false);
        w.write_i32(i32::MIN);
        w.write_i32(-1);
        w.write_f32(-0.0);
        w.write_f32(f32::MAX);
        w.write_f32(f32::NAN);
        w.write_str("héllo 😀").unwrap();
        w.write_str("").unwrap();

        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert!(r.read_bool().unwrap());
        assert!(!r.read_bool().unwrap());
        assert_eq!(r.read_i32().unwrap(), i32::MIN);
        assert_eq!(r.read_i32().unwrap(), -1);
        assert_eq!(r.read_f32().unwrap().to_bits(), (-0.0f32).to_bits());
        assert_eq!(r.read_f32().unwrap(), f32::MAX);
        assert_eq!(r.read_f32().unwrap().to_bits(), f32::NAN.to_bits());
        assert_eq!(r.read_str().unwrap(), "héllo 😀");
        assert_eq!(r.read_str().unwrap(), "");
        assert!(r.is_at_end());
    }

    #[test]
    fn test_integer_widths_round_trip() {
        let mut w = ByteWriter::new();
        w.write_i16(i16::MIN);
        w.write_u16(u16::MAX);
        w.write_u32(0xdead_beef);
        w.write_i64(i64::MIN + 1);
        w.write_u64(u64::MAX - 7);

        let bytes = w.into_bytes();
        assert_eq!(bytes.len(), 2 + 2 + 4 + 8 + 8);
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_i16().unwrap(), i16::MIN);
        assert_eq!(r.read_u16().unwrap(), u16::MAX);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_i64().unwrap(), i64::MIN + 1);
        assert_eq!(r.read_u64().unwrap(), u64::MAX - 7);
    }

    #[test]
    fn test_little_endian_layout() {
        let mut w = ByteWriter::new();
        w.write_i32(0x0102_0304);
        w.write_str("A").unwrap();
        assert_eq!(w.as_bytes(), &[0x04, 0x03, 0x02, 0x01, 0x01, 0x00, 0x41, 0x00]);
    }

    #[test]
    fn test_longest_string_round_trips_and_longer_fails() {
        let longest = "x".repeat(u16::MAX as usize);
        let mut w = ByteWriter::new();
        w.write_str(&longest).unwrap();
        let bytes = w.into_bytes();
        assert_eq!(ByteReader::new(&bytes).read_str().unwrap(), longest);

        let too_long = "x".repeat(u16::MAX as usize + 1);
        let err = ByteWriter::new().write_str(&too_long).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::StringTooLong(65536)));
    }

    #[test]
    fn test_backpatch() {
        let mut w = ByteWriter::new();
        w.write_op(OpCode::Jump);
        let hole = w.reserve_address();
        w.write_op(OpCode::ReturnVoid);
        w.patch_to_here(hole).unwrap();

        let bytes = w.into_bytes();
        let mut r = ByteReader::at(&bytes, hole);
        assert_eq!(r.read_i32().unwrap(), 6);
    }

    #[test]
    fn test_truncated_read() {
        let bytes = [0x31, 0x01, 0x02];
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_op().unwrap(), OpCode::ConstInt);
        let err = r.read_i32().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TruncatedBytecode(1)));
    }

    #[test]
    fn test_unknown_opcode() {
        let bytes = [0xff];
        let err = ByteReader::new(&bytes).read_op().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnknownOpcode(0xff, 0)));
    }

    #[test]
    fn test_opcode_byte_round_trip() {
        for byte in 0u8..=0xff {
            if let Ok(op) = OpCode::try_from(byte) {
                assert_eq!(u8::from(op), byte);
            }
        }
    }

    #[test]
    fn test_disassemble() {
        let mut w = ByteWriter::new();
        w.write_op(OpCode::DeclareVar);
        w.write_u8(0);
        w.write_bool(true);
        w.write_op(OpCode::Add);
        w.write_op(OpCode::ConstInt);
        w.write_i32(1);
        w.write_op(OpCode::ConstFloat);
        w.write_f32(1.5);

        let text = disassemble(w.as_bytes(), "test").unwrap();
        assert!(text.starts_with("== test ==\n"));
        assert!(text.contains("0000 DeclareVar slot:0 init"));
        assert!(text.contains("0003 Add"));
        assert!(text.contains("0004 ConstInt 1"));
        assert!(text.contains("0009 ConstFloat 1.5"));
    }
}
