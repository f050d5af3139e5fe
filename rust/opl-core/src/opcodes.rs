//! Native opcode table.
//!
//! Numbers 0–199 are reserved for the core; anything not listed here (the
//! framebuffer, socket and shell families included) is routed to the
//! extension bound to the active namespace.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, FromRepr, IntoStaticStr};

/// Opcodes executed natively by the VM.
///
/// Operand notation in the comments: `a0..aN` are the literal arguments,
/// `M[n]` is the value stored at address `a{n}` in the active namespace.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    FromRepr,
    AsRefStr,
    IntoStaticStr,
    EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[repr(u32)]
pub enum OpCode {
    // Memory
    Start = 0,          // no-op program marker
    Halt = 1,           // stop; with an argument, append M[0] to output
    Store = 2,          // a1 = literal a0
    Copy = 3,           // a1 = M[0]
    Concat = 4,         // a2 = M[1] ++ M[0]
    Insert = 5,         // a1 = M[1] with M[0] inserted at u(M[2])
    KeepFront = 6,      // a0 = first u(M[1]) bytes of M[0]
    DropFront = 7,      // a0 = M[0] without its first u(M[1]) bytes
    RemoveRange = 8,    // a0 = M[0] without u(M[1]) bytes at u(M[2])
    Length = 9,         // a1 = len(M[0])

    // Float arithmetic and raw-bit gates
    FloatAdd = 10,
    FloatSub = 11,
    FloatMul = 12,
    FloatDiv = 13,
    FloatPow = 14,
    FloatAnd = 15,
    FloatOr = 16,
    FloatXor = 17,
    Not = 18,           // a1 = 1 if u(M[0]) == 0 else 0
    Delete = 19,        // remove address a0

    // Jumps on instruction indices held in memory
    Jump = 20,
    JumpEq = 21,
    JumpFloatGt = 22,
    JumpFloatLt = 23,
    JumpFloatGe = 24,
    JumpFloatLe = 25,
    Slice = 26,         // a3 = M[2][u(M[0])..u(M[1])]

    // Input and output
    ReadLine = 27,
    RuntimeArg = 28,
    DumpMemory = 29,
    Write = 30,

    // Unsigned arithmetic
    UintAdd = 31,
    UintSub = 32,
    UintMul = 33,
    UintDiv = 34,
    UintPow = 35,
    UintAnd = 36,
    UintOr = 37,
    UintXor = 38,

    // Conversions
    UintToString = 39,
    FloatToString = 40,
    StringToUint = 41,
    StringToFloat = 42,
    UintToFloat = 43,
    FloatToUint = 44,
    Repeat = 45,

    // Files and self-modification
    ReadFile = 46,
    WriteFile = 47,
    DeleteFile = 48,
    DumpProgram = 49,
    LoadProgram = 50,
    GetOutput = 51,
    SetOutput = 52,
    Snapshot = 53,
    Restore = 54,
    RunCommand = 55,
    ReadChars = 56,
    ListFiles = 57,
    Nop = 58,
    EpochTime = 59,
    LocalTime = 60,
    Sleep = 61,
    LoadIndirect = 62,
    StoreIndirect = 63,

    // Two-way branches on instruction indices
    BranchEq = 64,
    BranchFloatGt = 65,
    BranchFloatLt = 66,
    BranchFloatGe = 67,
    BranchFloatLe = 68,
    FloatMod = 69,
    UintMod = 70,
    BranchFloatEq = 71,
    JumpFloatEq = 72,

    ListAddresses = 83,
    ClearMemory = 84,
    ShiftLeft = 85,
    ShiftRight = 86,
    Reverse = 87,

    // Threads and namespaces
    Spawn = 88,
    SpawnJoin = 89,
    SwitchNamespace = 90,
    CreateNamespace = 91,
    DeleteNamespace = 92,
    ListNamespaces = 93,
    PruneNamespaces = 94,
    CopyToNamespace = 95,
    Import = 96,
    BranchContains = 98,

    // Nested execution
    RunSource = 109,
    CompileSource = 110,
    RunBinary = 111,

    // Error policy
    ErrorDisplayStop = 112,
    ErrorDisplay = 113,
    ErrorStop = 114,
    ErrorNone = 115,
    Compare = 116,

    // Extensions and bundles
    BindExtension = 118,
    UnbindExtension = 119,
    UseBundleFiles = 120,
    UsePrimaryFiles = 121,
    RuntimeArgCount = 122,
    BigAdd = 123,
    BigSub = 124,

    // Labels
    Label = 125,
    JumpLabel = 126,
    JumpLabelEq = 127,
    JumpLabelNe = 128,
    JumpLabelFloatGt = 129,
    JumpLabelFloatLt = 130,
    JumpLabelFloatGe = 131,
    JumpLabelFloatLe = 132,
    BranchLabelEq = 133,
    BranchLabelFloatGt = 134,
    BranchLabelFloatLt = 135,
    BranchLabelFloatGe = 136,
    BranchLabelFloatLe = 137,
    BranchLabelUintGt = 138,
    BranchLabelUintLt = 139,
    BranchLabelUintGe = 140,
    BranchLabelUintLe = 141,
    BranchLabelNe = 142,
    SpawnLabel = 143,
    SpawnLabelJoin = 144,

    // Signed arithmetic
    SintAdd = 145,
    SintSub = 146,
    SintMul = 147,
    SintDiv = 148,
    SintPow = 149,
    SintAnd = 150,
    SintOr = 151,
    SintXor = 152,
    SintToString = 153,
    SintToFloat = 154,
    SintToUint = 155,
    StringToSint = 156,
    FloatToSint = 157,
    UintToSint = 158,

    StopAll = 159,
}

impl OpCode {
    /// Look up a native opcode by number.
    pub fn from_u32(code: u32) -> Option<Self> {
        Self::from_repr(code)
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    /// Opcodes whose targets are labels rather than instruction indices.
    pub fn uses_labels(self) -> bool {
        (125..=144).contains(&self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn codes_round_trip() {
        for op in OpCode::iter() {
            assert_eq!(OpCode::from_u32(op.code()), Some(op));
        }
    }

    #[test]
    fn excluded_families_are_not_native() {
        for code in [73, 74, 80, 81, 82, 97, 99, 100, 101, 106, 107, 108, 117, 160, 200] {
            assert!(OpCode::from_u32(code).is_none(), "{} should not be native", code);
        }
    }

    #[test]
    fn mnemonics_are_snake_case() {
        assert_eq!(OpCode::UintAdd.mnemonic(), "uint_add");
        assert_eq!(OpCode::BranchLabelUintGe.mnemonic(), "branch_label_uint_ge");
        assert_eq!(OpCode::Halt.as_ref(), "halt");
    }

    #[test]
    fn label_family() {
        assert!(OpCode::Label.uses_labels());
        assert!(OpCode::SpawnLabelJoin.uses_labels());
        assert!(!OpCode::Spawn.uses_labels());
    }
}
