//! Static opcode catalogs for the SM28 and SM33 bytecode dialects.
//!
//! Each table is indexed by opcode byte. An entry with `length == 0` and an
//! empty name marks an opcode undefined in that dialect. `length == -1` is
//! reserved for `tableswitch`, the only variable-length instruction.
//!
//! The two dialects share most numbering. The differences that matter:
//! `getlocal`/`setlocal` are 3-byte instructions with a uint16 operand in
//! SM28 and 4-byte with a uint24 operand in SM33; `callname`/`callgname`
//! exist only in SM28; slot 228 is `notearg` in SM28 and `tostring` in SM33;
//! the block-scope opcodes were reworked between the two.

/// Operand encoding for an opcode. The discriminant-like `tag` values match
/// the low five bits of the engine's format word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Byte,
    Jump,
    Atom,
    Uint16,
    TableSwitch,
    Qarg,
    Local,
    Double,
    Uint24,
    Uint8,
    Int32,
    Object,
    Regexp,
    Int8,
    AtomObject,
    ScopeCoord,
}

impl Format {
    /// Historical wire tag for this operand encoding.
    pub const fn tag(self) -> u32 {
        match self {
            Format::Byte => 0,
            Format::Jump => 1,
            Format::Atom => 2,
            Format::Uint16 => 3,
            Format::TableSwitch => 4,
            Format::Qarg => 6,
            Format::Local => 7,
            Format::Double => 8,
            Format::Uint24 => 12,
            Format::Uint8 => 13,
            Format::Int32 => 14,
            Format::Object => 15,
            Format::Regexp => 17,
            Format::Int8 => 18,
            Format::AtomObject => 19,
            Format::ScopeCoord => 21,
        }
    }
}

/// Metadata for one bytecode operation.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    /// Instruction length in bytes; [`VARIABLE_LENGTH`] for `tableswitch`,
    /// 0 for undefined opcodes.
    pub length: i8,
    pub format: Format,
}

/// Length sentinel for the variable-length `tableswitch` instruction.
pub const VARIABLE_LENGTH: i8 = -1;

const fn op(name: &'static str, length: i8, format: Format) -> OpInfo {
    OpInfo { name, length, format }
}

const UNDEF: OpInfo = op("", 0, Format::Byte);

impl OpInfo {
    /// True when this opcode is not defined in the dialect.
    pub fn is_undefined(&self) -> bool {
        self.length == 0 && self.name.is_empty()
    }
}

/// Opcodes shared by both dialects, written once. Indexes are the real
/// engine opcode numbers.
const fn common(mut t: [OpInfo; 256]) -> [OpInfo; 256] {
    t[0] = op("nop", 1, Format::Byte);
    t[1] = op("undefined", 1, Format::Byte);
    t[4] = op("leavewith", 1, Format::Byte);
    t[5] = op("return", 1, Format::Byte);
    t[6] = op("goto", 5, Format::Jump);
    t[7] = op("ifeq", 5, Format::Jump);
    t[8] = op("ifne", 5, Format::Jump);
    t[9] = op("arguments", 1, Format::Byte);
    t[10] = op("swap", 1, Format::Byte);
    t[11] = op("popn", 3, Format::Uint16);
    t[12] = op("dup", 1, Format::Byte);
    t[13] = op("dup2", 1, Format::Byte);
    t[14] = op("setconst", 5, Format::Atom);
    t[15] = op("bitor", 1, Format::Byte);
    t[16] = op("bitxor", 1, Format::Byte);
    t[17] = op("bitand", 1, Format::Byte);
    t[18] = op("eq", 1, Format::Byte);
    t[19] = op("ne", 1, Format::Byte);
    t[20] = op("lt", 1, Format::Byte);
    t[21] = op("le", 1, Format::Byte);
    t[22] = op("gt", 1, Format::Byte);
    t[23] = op("ge", 1, Format::Byte);
    t[24] = op("lsh", 1, Format::Byte);
    t[25] = op("rsh", 1, Format::Byte);
    t[26] = op("ursh", 1, Format::Byte);
    t[27] = op("add", 1, Format::Byte);
    t[28] = op("sub", 1, Format::Byte);
    t[29] = op("mul", 1, Format::Byte);
    t[30] = op("div", 1, Format::Byte);
    t[31] = op("mod", 1, Format::Byte);
    t[32] = op("not", 1, Format::Byte);
    t[33] = op("bitnot", 1, Format::Byte);
    t[34] = op("neg", 1, Format::Byte);
    t[35] = op("pos", 1, Format::Byte);
    t[36] = op("delname", 5, Format::Atom);
    t[37] = op("delprop", 5, Format::Atom);
    t[38] = op("delelem", 1, Format::Byte);
    t[39] = op("typeof", 1, Format::Byte);
    t[40] = op("void", 1, Format::Byte);
    t[41] = op("spreadcall", 1, Format::Byte);
    t[42] = op("spreadnew", 1, Format::Byte);
    t[43] = op("spreadeval", 1, Format::Byte);
    t[53] = op("getprop", 5, Format::Atom);
    t[54] = op("setprop", 5, Format::Atom);
    t[55] = op("getelem", 1, Format::Byte);
    t[56] = op("setelem", 1, Format::Byte);
    t[58] = op("call", 3, Format::Uint16);
    t[59] = op("name", 5, Format::Atom);
    t[60] = op("double", 5, Format::Double);
    t[61] = op("string", 5, Format::Atom);
    t[62] = op("zero", 1, Format::Byte);
    t[63] = op("one", 1, Format::Byte);
    t[64] = op("null", 1, Format::Byte);
    t[65] = op("this", 1, Format::Byte);
    t[66] = op("false", 1, Format::Byte);
    t[67] = op("true", 1, Format::Byte);
    t[68] = op("or", 5, Format::Jump);
    t[69] = op("and", 5, Format::Jump);
    t[70] = op("tableswitch", VARIABLE_LENGTH, Format::TableSwitch);
    t[72] = op("stricteq", 1, Format::Byte);
    t[73] = op("strictne", 1, Format::Byte);
    t[75] = op("iter", 2, Format::Uint8);
    t[76] = op("moreiter", 1, Format::Byte);
    t[78] = op("enditer", 1, Format::Byte);
    t[79] = op("funapply", 3, Format::Uint16);
    t[80] = op("object", 5, Format::Object);
    t[81] = op("pop", 1, Format::Byte);
    t[82] = op("new", 3, Format::Uint16);
    t[84] = op("getarg", 3, Format::Qarg);
    t[85] = op("setarg", 3, Format::Qarg);
    t[88] = op("uint16", 3, Format::Uint16);
    t[89] = op("newinit", 5, Format::Uint8);
    t[90] = op("newarray", 4, Format::Uint24);
    t[91] = op("newobject", 5, Format::Object);
    t[93] = op("initprop", 5, Format::Atom);
    t[94] = op("initelem", 1, Format::Byte);
    t[95] = op("initelem_inc", 1, Format::Byte);
    t[96] = op("initelem_array", 4, Format::Uint24);
    t[97] = op("initprop_getter", 5, Format::Atom);
    t[98] = op("initprop_setter", 5, Format::Atom);
    t[99] = op("initelem_getter", 1, Format::Byte);
    t[100] = op("initelem_setter", 1, Format::Byte);
    t[108] = op("funcall", 3, Format::Uint16);
    t[109] = op("loophead", 1, Format::Byte);
    t[110] = op("bindname", 5, Format::Atom);
    t[111] = op("setname", 5, Format::Atom);
    t[112] = op("throw", 1, Format::Byte);
    t[113] = op("in", 1, Format::Byte);
    t[114] = op("instanceof", 1, Format::Byte);
    t[115] = op("debugger", 1, Format::Byte);
    t[116] = op("gosub", 5, Format::Jump);
    t[117] = op("retsub", 1, Format::Byte);
    t[118] = op("exception", 1, Format::Byte);
    t[119] = op("lineno", 3, Format::Uint16);
    t[120] = op("condswitch", 1, Format::Byte);
    t[121] = op("case", 5, Format::Jump);
    t[122] = op("default", 5, Format::Jump);
    t[123] = op("eval", 3, Format::Uint16);
    t[127] = op("deffun", 5, Format::Object);
    t[128] = op("defconst", 5, Format::Atom);
    t[129] = op("defvar", 5, Format::Atom);
    t[130] = op("lambda", 5, Format::Object);
    t[131] = op("lambda_arrow", 5, Format::Object);
    t[132] = op("callee", 1, Format::Byte);
    t[133] = op("pick", 2, Format::Uint8);
    t[134] = op("try", 1, Format::Byte);
    t[135] = op("finally", 1, Format::Byte);
    t[136] = op("getaliasedvar", 5, Format::ScopeCoord);
    t[137] = op("setaliasedvar", 5, Format::ScopeCoord);
    t[152] = op("setrval", 1, Format::Byte);
    t[153] = op("retrval", 1, Format::Byte);
    t[154] = op("getgname", 5, Format::Atom);
    t[155] = op("setgname", 5, Format::Atom);
    t[160] = op("regexp", 5, Format::Regexp);
    t[184] = op("callprop", 5, Format::Atom);
    t[188] = op("uint24", 4, Format::Uint24);
    t[193] = op("callelem", 1, Format::Byte);
    t[196] = op("typeofexpr", 1, Format::Byte);
    t[205] = op("generator", 1, Format::Byte);
    t[206] = op("yield", 1, Format::Byte);
    t[215] = op("int8", 2, Format::Int8);
    t[216] = op("int32", 5, Format::Int32);
    t[217] = op("length", 5, Format::Atom);
    t[218] = op("hole", 1, Format::Byte);
    t[224] = op("rest", 1, Format::Byte);
    t[225] = op("toid", 1, Format::Byte);
    t[226] = op("implicitthis", 5, Format::Atom);
    t[227] = op("loopentry", 2, Format::Uint8);
    t
}

const fn build_v28() -> [OpInfo; 256] {
    let mut t = common([UNDEF; 256]);
    t[3] = op("enterwith", 1, Format::Byte);
    // Combined name+this push forms, folded away by SM33.
    t[57] = op("callname", 5, Format::Atom);
    t[156] = op("callgname", 5, Format::Atom);
    // Locals are frame-slot uint16 in SM28.
    t[86] = op("getlocal", 3, Format::Local);
    t[87] = op("setlocal", 3, Format::Local);
    t[207] = op("arraypush", 3, Format::Local);
    // SM28 let/block scope family.
    t[198] = op("enterblock", 5, Format::Object);
    t[199] = op("enterlet0", 5, Format::Object);
    t[200] = op("enterlet1", 5, Format::Object);
    t[201] = op("leaveblock", 3, Format::Uint16);
    t[202] = op("leaveblockexpr", 3, Format::Uint16);
    t[203] = op("leaveforletin", 1, Format::Byte);
    t[228] = op("notearg", 1, Format::Byte);
    t
}

const fn build_v33() -> [OpInfo; 256] {
    let mut t = common([UNDEF; 256]);
    t[3] = op("enterwith", 5, Format::Object);
    t[44] = op("dupat", 4, Format::Uint24);
    t[74] = op("throwmsg", 3, Format::Uint16);
    // Locals widened to uint24 frame slots in SM33.
    t[86] = op("getlocal", 4, Format::Local);
    t[87] = op("setlocal", 4, Format::Local);
    t[207] = op("arraypush", 4, Format::Local);
    // SM33 block scope family.
    t[198] = op("pushblockscope", 5, Format::Object);
    t[199] = op("popblockscope", 1, Format::Byte);
    t[200] = op("debugleaveblock", 1, Format::Byte);
    t[228] = op("tostring", 1, Format::Byte);
    t
}

/// Opcode catalog for SM28 archives.
pub static OPCODES_V28: [OpInfo; 256] = build_v28();

/// Opcode catalog for SM33 archives.
pub static OPCODES_V33: [OpInfo; 256] = build_v33();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_opcodes() {
        assert_eq!(OPCODES_V33[0].name, "nop");
        assert_eq!(OPCODES_V33[5].name, "return");
        assert_eq!(OPCODES_V33[6].name, "goto");
        assert_eq!(OPCODES_V33[6].format, Format::Jump);
        assert_eq!(OPCODES_V33[70].name, "tableswitch");
        assert_eq!(OPCODES_V33[70].length, VARIABLE_LENGTH);
        assert_eq!(OPCODES_V33[184].name, "callprop");
        assert_eq!(OPCODES_V33[154].name, "getgname");
        assert_eq!(OPCODES_V33[215].name, "int8");
        assert_eq!(OPCODES_V33[216].name, "int32");
        assert_eq!(OPCODES_V33[188].name, "uint24");
    }

    #[test]
    fn local_width_differs() {
        assert_eq!(OPCODES_V28[0x56].name, "getlocal");
        assert_eq!(OPCODES_V28[0x56].length, 3);
        assert_eq!(OPCODES_V33[0x56].name, "getlocal");
        assert_eq!(OPCODES_V33[0x56].length, 4);
        assert_eq!(OPCODES_V28[0x57].length, 3);
        assert_eq!(OPCODES_V33[0x57].length, 4);
    }

    #[test]
    fn slot_228_is_remapped() {
        assert_eq!(OPCODES_V28[228].name, "notearg");
        assert_eq!(OPCODES_V33[228].name, "tostring");
    }

    #[test]
    fn v28_only_call_forms() {
        assert_eq!(OPCODES_V28[57].name, "callname");
        assert_eq!(OPCODES_V28[156].name, "callgname");
        assert!(OPCODES_V33[57].is_undefined());
        assert!(OPCODES_V33[156].is_undefined());
    }

    #[test]
    fn undefined_entries() {
        assert!(OPCODES_V33[255].is_undefined());
        assert!(OPCODES_V28[44].is_undefined());
        assert!(!OPCODES_V33[44].is_undefined());
    }

    #[test]
    fn only_tableswitch_is_variable() {
        for t in [&OPCODES_V28, &OPCODES_V33] {
            for (i, info) in t.iter().enumerate() {
                if info.length == VARIABLE_LENGTH {
                    assert_eq!(info.name, "tableswitch", "opcode {i}");
                    assert_eq!(info.format, Format::TableSwitch);
                }
                assert!(info.length >= -1);
                if info.length == 0 {
                    assert!(info.name.is_empty(), "opcode {i} has name but no length");
                }
            }
        }
    }

    #[test]
    fn format_tags() {
        assert_eq!(Format::Byte.tag(), 0);
        assert_eq!(Format::Jump.tag(), 1);
        assert_eq!(Format::TableSwitch.tag(), 4);
        assert_eq!(Format::ScopeCoord.tag(), 21);
    }
}
