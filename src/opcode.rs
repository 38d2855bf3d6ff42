//! The JL instruction set (spec §4.4).
//!
//! Byte values are pinned to the order `original_source/DataManager/
//! instruction.c`'s `instructions[]` table declares them in, extended with
//! `INC`/`DEC`/`ADR` (present in `JL/instruction.h`'s `Op` enum but dropped
//! from the source's print table) and `CTCH`/`RAIS`/`SINC` (named in spec
//! §4.4 but absent from the original `Op` enum entirely — the original
//! source's exception handling predates these ops; they're appended at the
//! end so the byte values of every inherited opcode stay stable against the
//! original bytecode format).

use crate::error::VmError;

/// Which operand shape an instruction carries (spec §4.4's four dispatch
/// tables: no-param, id-param, val-param, str-param).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    None,
    Id,
    Val,
    Str,
}

macro_rules! opcodes {
    ($($name:ident = $byte:expr => $kind:ident),+ $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[cfg_attr(feature = "serde-types", derive(serde::Serialize))]
        #[repr(u8)]
        pub enum OpCode {
            $($name = $byte),+
        }

        impl OpCode {
            pub const COUNT: usize = 0 $(+ { let _ = OpCode::$name; 1 })+;

            pub fn from_byte(b: u8) -> Result<OpCode, VmError> {
                match b {
                    $($byte => Ok(OpCode::$name),)+
                    other => Err(VmError::InvalidOpcode(other)),
                }
            }

            pub fn param_kind(self) -> ParamKind {
                match self {
                    $(OpCode::$name => ParamKind::$kind),+
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(OpCode::$name => stringify!($name)),+
                }
            }
        }
    };
}

opcodes! {
    Nop    = 0  => None,
    Exit   = 1  => None,
    Res    = 2  => Val,
    Tget   = 3  => None,
    Set    = 4  => Id,
    Push   = 5  => None,
    Peek   = 6  => None,
    Psrs   = 7  => Val,
    Not    = 8  => None,
    Notc   = 9  => None,
    Gt     = 10 => None,
    Lt     = 11 => None,
    Eq     = 12 => None,
    Neq    = 13 => None,
    Gte    = 14 => None,
    Lte    = 15 => None,
    And    = 16 => None,
    Or     = 17 => None,
    Xor    = 18 => None,
    If     = 19 => Val,
    Ifn    = 20 => Val,
    Jmp    = 21 => Val,
    Ret    = 22 => None,
    Add    = 23 => None,
    Sub    = 24 => None,
    Mult   = 25 => None,
    Div    = 26 => None,
    Mod    = 27 => None,
    Inc    = 28 => None,
    Dec    = 29 => None,
    Call   = 30 => None,
    Tupl   = 31 => Val,
    Dup    = 32 => None,
    Goto   = 33 => Val,
    Prnt   = 34 => None,
    Rmdl   = 35 => Id,
    Mcll   = 36 => Id,
    Get    = 37 => Id,
    Gtsh   = 38 => Id,
    Fld    = 39 => Id,
    Is     = 40 => None,
    Adr    = 41 => None,
    Anew   = 42 => Val,
    Aidx   = 43 => None,
    Aset   = 44 => None,
    Mdst   = 45 => Id,
    Ctch   = 46 => Val,
    Rais   = 47 => None,
    Sinc   = 48 => Val,
}

impl ParamKind {
    /// Fixed payload width in bytes, `None` for the variable-length `Str`
    /// payload (a length-prefixed interned-string index).
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            ParamKind::None => Some(0),
            ParamKind::Id => Some(4),
            ParamKind::Val => Some(9), // 1 tag byte + 8 payload bytes
            ParamKind::Str => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_byte() {
        for b in 0..OpCode::COUNT as u8 {
            let op = OpCode::from_byte(b).unwrap();
            assert_eq!(op as u8, b);
        }
    }

    #[test]
    fn unknown_byte_is_an_error() {
        assert!(OpCode::from_byte(200).is_err());
    }
}
