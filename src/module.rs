//! Compiled bytecode unit (spec §3/§4.4/§6): instructions plus the
//! reference and class tables a loaded `Module` carries. Immutable once
//! loaded — the engine only ever reads from a `Module`.
//!
//! Grounded on the teacher's `instruction.rs` (raw-byte instruction
//! decoding) and pinned to the on-disk layout of spec §6: header, constant
//! pool, instruction list, reference table, class table.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::element::Value;
use crate::error::{VmError, VmResult};
use crate::intern::{Interner, Symbol};
use crate::opcode::{OpCode, ParamKind};

/// Decoded instruction payload (spec §4.4's `payload: none | Value |
/// interned identifier | interned string`).
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize))]
pub enum Payload {
    None,
    Val(Value),
    Id(Symbol),
    Str(Symbol),
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize))]
pub struct Instruction {
    pub op: OpCode,
    pub payload: Payload,
    pub row: u16,
    pub col: u16,
}

/// `(class_name, parent_names, methods: name -> entry ip)`.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize))]
pub struct ClassEntry {
    pub name: Symbol,
    pub parents: Vec<Symbol>,
    #[cfg_attr(feature = "serde-types", serde(serialize_with = "serialize_method_map"))]
    pub methods: HashMap<Symbol, u32>,
}

#[cfg(feature = "serde-types")]
fn serialize_method_map<S: serde::Serializer>(map: &HashMap<Symbol, u32>, s: S) -> Result<S::Ok, S::Error> {
    use serde::Serialize;
    map.iter().collect::<std::collections::BTreeMap<_, _>>().serialize(s)
}

pub struct Module {
    pub name: String,
    pub interner: Arc<Interner>,
    pub instructions: Vec<Instruction>,
    /// Top-level function name -> entry instruction pointer.
    pub refs: HashMap<Symbol, u32>,
    pub classes: HashMap<Symbol, ClassEntry>,
}

impl Module {
    pub fn new(name: impl Into<String>, interner: Arc<Interner>) -> Self {
        Module {
            name: name.into(),
            interner,
            instructions: Vec::new(),
            refs: HashMap::new(),
            classes: HashMap::new(),
        }
    }

    pub fn instruction_at(&self, ip: u32) -> VmResult<&Instruction> {
        self.instructions
            .get(ip as usize)
            .ok_or_else(|| VmError::internal(format!("ip {ip} out of range for module {}", self.name)))
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn resolve_ref(&self, name: Symbol) -> VmResult<u32> {
        self.refs.get(&name).copied().ok_or_else(|| {
            VmError::UnknownReference(format!("{}::{}", self.name, &*self.interner.resolve(name)))
        })
    }

    /// Dumps the instruction/refs/classes tables as JSON, for offline
    /// inspection of a loaded module (not part of the VM's hot path).
    #[cfg(feature = "serde-types")]
    pub fn debug_dump(&self) -> VmResult<String> {
        #[derive(serde::Serialize)]
        struct Dump<'a> {
            name: &'a str,
            instructions: &'a [Instruction],
            refs: std::collections::BTreeMap<Symbol, u32>,
            classes: Vec<&'a ClassEntry>,
        }
        let dump = Dump {
            name: &self.name,
            instructions: &self.instructions,
            refs: self.refs.iter().map(|(k, v)| (*k, *v)).collect(),
            classes: self.classes.values().collect(),
        };
        serde_json::to_string_pretty(&dump).map_err(|e| VmError::internal(format!("module dump failed: {e}")))
    }
}

/// Raw on-disk decoder for the instruction list section of spec §6's
/// bytecode format: `(op:u8, row:u16, col:u16, param_kind:u8, payload)`.
/// Interned-string payloads reference indices already resolved into
/// `Symbol`s by the (out-of-core) loader that built the constant pool —
/// this decoder only walks the raw instruction bytes.
pub struct InstructionDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> InstructionDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        InstructionDecoder { bytes, pos: 0 }
    }

    fn read_u8(&mut self) -> VmResult<u8> {
        let b = *self.bytes.get(self.pos).ok_or_else(|| VmError::parse(self.pos, "unexpected end of stream"))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> VmResult<u16> {
        let hi = self.read_u8()? as u16;
        let lo = self.read_u8()? as u16;
        Ok((hi << 8) | lo)
    }

    fn read_u32(&mut self) -> VmResult<u32> {
        let mut v = 0u32;
        for _ in 0..4 {
            v = (v << 8) | self.read_u8()? as u32;
        }
        Ok(v)
    }

    fn read_u64(&mut self) -> VmResult<u64> {
        let mut v = 0u64;
        for _ in 0..8 {
            v = (v << 8) | self.read_u8()? as u64;
        }
        Ok(v)
    }

    pub fn decode_one(&mut self) -> VmResult<Instruction> {
        let start = self.pos;
        let op = OpCode::from_byte(self.read_u8()?)?;
        let row = self.read_u16()?;
        let col = self.read_u16()?;
        let param_kind_byte = self.read_u8()?;
        let declared_kind = match param_kind_byte {
            0 => ParamKind::None,
            1 => ParamKind::Id,
            2 => ParamKind::Val,
            3 => ParamKind::Str,
            other => return Err(VmError::parse(start, format!("bad param_kind tag {other}"))),
        };
        if declared_kind != op.param_kind() {
            return Err(VmError::parse(
                start,
                format!("{} expects {:?} payload, stream declared {:?}", op.mnemonic(), op.param_kind(), declared_kind),
            ));
        }
        let payload = match op.param_kind() {
            ParamKind::None => Payload::None,
            ParamKind::Id => Payload::Id(Symbol::from_index(self.read_u32()?)),
            ParamKind::Str => Payload::Str(Symbol::from_index(self.read_u32()?)),
            ParamKind::Val => {
                let tag = self.read_u8()?;
                match tag {
                    0 => Payload::Val(Value::Int64(self.read_u64()? as i64)),
                    1 => Payload::Val(Value::Float64(f64::from_bits(self.read_u64()?))),
                    2 => Payload::Val(Value::Char8(self.read_u8()?)),
                    other => return Err(VmError::parse(start, format!("bad Value tag {other}"))),
                }
            }
        };
        Ok(Instruction { op, payload, row, col })
    }

    /// Bytes consumed so far — lets a caller embedding the instruction
    /// stream inside a larger framed file (spec §6) find where the next
    /// section starts after calling [`InstructionDecoder::decode_one`] a
    /// known number of times.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn decode_all(mut self) -> VmResult<Vec<Instruction>> {
        let mut out = Vec::new();
        while self.pos < self.bytes.len() {
            out.push(self.decode_one()?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_nop_stream() {
        // op=Nop(0), row=0, col=0, param_kind=None(0)
        let bytes = [0u8, 0, 0, 0, 0];
        let instrs = InstructionDecoder::new(&bytes).decode_all().unwrap();
        assert_eq!(instrs.len(), 1);
        assert!(matches!(instrs[0].op, OpCode::Nop));
    }

    #[cfg(feature = "serde-types")]
    #[test]
    fn debug_dump_is_valid_json() {
        let interner = std::sync::Arc::new(Interner::new());
        let mut module = Module::new("m", interner.clone());
        module.instructions.push(Instruction { op: OpCode::Nop, payload: Payload::None, row: 1, col: 1 });
        module.refs.insert(interner.intern("main"), 0);
        let json = module.debug_dump().unwrap();
        assert!(json.contains("\"Nop\""));
    }
}
