//! Text disassembler for decoded scripts.
//!
//! Layout per line: five-hex-digit address, two spaces, twelve-column
//! mnemonic, operand text, then an optional `; comment` at column 60.
//! Jump targets get `loc_%05X:` label lines; the function name is emitted
//! where the offset reaches the script's main entry.

use std::fmt::Write as _;

use crate::operand::{
    collect_labels, get_argno, get_int8, get_int32, get_jump_offset, get_localno, get_uint16,
    get_uint24, get_uint32_index, instr_len,
};
use crate::tables::{Format, OpInfo};
use crate::{
    Const, DiagKind, Diagnostic, Error, ErrorKind, Mode, Options, Report, Script,
    CK_JS_FUNCTION,
};

const COMMENT_COL: usize = 60;

/// Disassembles one script's bytecode.
///
/// `header` adds the column legend used for the top-level script. The
/// function name is printed as a bare line when the walk reaches
/// `main_offset`.
pub fn disasm_script(
    s: &Script,
    func_name: &str,
    header: bool,
    opt: &Options,
    ops: &[OpInfo; 256],
) -> Result<Report<String>, Error> {
    let mut diags = Vec::new();
    match disasm_script_impl(s, func_name, header, opt, ops, &mut diags) {
        Ok(text) => Ok(Report::new(text, diags)),
        Err(kind) => Err(Error::new(kind, diags)),
    }
}

fn disasm_script_impl(
    s: &Script,
    func_name: &str,
    header: bool,
    opt: &Options,
    ops: &[OpInfo; 256],
    diags: &mut Vec<Diagnostic>,
) -> Result<String, ErrorKind> {
    let bc = &s.bytecode;
    let labels = collect_labels(bc, ops);
    let max_steps = opt.effective_max_steps();
    let mut b = String::new();

    if header {
        b.push_str("loc     op\n");
        b.push_str("-----   --\n");
    }

    let mut off = 0usize;
    let mut first = true;
    let mut steps = 0usize;
    while off < bc.len() {
        steps += 1;
        if steps > max_steps {
            if opt.mode == Mode::Strict {
                return Err(ErrorKind::StepLimit { limit: max_steps, offset: off });
            }
            diags.push(Diagnostic::new(
                off,
                DiagKind::Overflow,
                format!("step limit {max_steps} reached, truncating"),
            ));
            break;
        }

        if off as u32 == s.main_offset {
            b.push_str(func_name);
            b.push('\n');
        }

        let op = bc[off];
        let info = &ops[op as usize];

        if info.is_undefined() {
            if opt.mode == Mode::Strict {
                return Err(ErrorKind::UnknownOpcode { op, offset: off });
            }
            diags.push(Diagnostic::new(
                off,
                DiagKind::UnknownOpcode,
                format!("unknown opcode {op:#04x}"),
            ));
            // Emit a placeholder and advance one byte.
            let line = format!("{off:05X}  {:<12}", format!("OP_0x{op:02X}"));
            b.push_str(&line);
            pad_to(&mut b, line.len(), COMMENT_COL);
            b.push_str("; unknown opcode\n");
            off += 1;
            first = false;
            continue;
        }

        if labels.contains(&off) {
            if !first {
                b.push('\n');
            }
            let line = format!("loc_{off:05X}:");
            let len = line.len();
            b.push_str(&line);
            pad_to(&mut b, len, COMMENT_COL);
            let _ = writeln!(b, "; L{off}");
        }

        let addr = format!("{off:05X}  ");
        let name = format!("{:<12}", info.name);
        let mut col = addr.len() + name.len();
        b.push_str(&addr);
        b.push_str(&name);

        let mut operand = String::new();
        let mut comment = String::new();
        let mut truncated = false;

        match info.format {
            Format::Jump => match get_jump_offset(bc, off) {
                Some(jump_off) => {
                    let tgt = off as i64 + i64::from(jump_off);
                    operand = format!(" loc_{tgt:05X} ({jump_off:+})");
                }
                None => truncated = true,
            },

            Format::Atom => match get_uint32_index(bc, off) {
                Some(idx) => {
                    operand = match s.atoms.get(idx as usize) {
                        Some(atom) => format!(" {atom:?}"),
                        None => format!(" <atom#{idx}>"),
                    };
                }
                None => truncated = true,
            },

            Format::Object => match get_uint32_index(bc, off) {
                Some(idx) => operand = format!(" <object#{idx}>"),
                None => truncated = true,
            },

            Format::Regexp => match get_uint32_index(bc, off) {
                Some(idx) => {
                    operand = match s.regexps.get(idx as usize) {
                        Some(rx) => format!(" /{}/{}", rx.source, regexp_flags(rx.flags)),
                        None => format!(" <regexp#{idx}>"),
                    };
                }
                None => truncated = true,
            },

            Format::Uint16 => match get_uint16(bc, off) {
                Some(val) => operand = format!(" {val}"),
                None => truncated = true,
            },

            Format::Uint24 => match get_uint24(bc, off) {
                Some(val) => operand = format!(" {val}"),
                None => truncated = true,
            },

            Format::Uint8 => {
                if off + 2 <= bc.len() {
                    operand = format!(" {}", bc[off + 1]);
                } else {
                    truncated = true;
                }
            }

            Format::Int8 => match get_int8(bc, off) {
                Some(val) => operand = format!(" {val}"),
                None => truncated = true,
            },

            Format::Int32 => match get_int32(bc, off) {
                Some(val) => operand = format!(" {val}"),
                None => truncated = true,
            },

            Format::Qarg => match get_argno(bc, off) {
                Some(val) => {
                    operand = format!(" {val}");
                    comment = format!("arg[{val}]");
                }
                None => truncated = true,
            },

            Format::Local => {
                // SM28 uses a 3-byte form with a uint16 operand; SM33 a
                // 4-byte form with uint24. The table length decides.
                if info.length == 3 {
                    match get_uint16(bc, off) {
                        Some(val) => operand = format!(" {val}"),
                        None => truncated = true,
                    }
                } else {
                    match get_localno(bc, off) {
                        Some(val) => operand = format!(" {val}"),
                        None => truncated = true,
                    }
                }
            }

            Format::Double => match get_uint32_index(bc, off) {
                Some(idx) => {
                    operand = match s.consts.get(idx as usize) {
                        Some(c) => format!(" {}", format_const(c)),
                        None => format!(" <const#{idx}>"),
                    };
                }
                None => truncated = true,
            },

            Format::ScopeCoord => {
                if off + 5 <= bc.len() {
                    let hops = bc[off + 1];
                    let slot = u32::from(bc[off + 2]) << 16
                        | u32::from(bc[off + 3]) << 8
                        | u32::from(bc[off + 4]);
                    operand = format!(" {hops} {slot}");
                    comment = format!("hops={hops} slot={slot}");
                } else {
                    truncated = true;
                }
            }

            Format::TableSwitch => match get_jump_offset(bc, off) {
                Some(def_off) => {
                    if off + 13 <= bc.len() {
                        let def_tgt = off as i64 + i64::from(def_off);
                        let low = i32::from_be_bytes([
                            bc[off + 5],
                            bc[off + 6],
                            bc[off + 7],
                            bc[off + 8],
                        ]);
                        let high = i32::from_be_bytes([
                            bc[off + 9],
                            bc[off + 10],
                            bc[off + 11],
                            bc[off + 12],
                        ]);
                        operand = format!(" default loc_{def_tgt:05X} low {low} high {high}");
                    } else {
                        truncated = true;
                    }
                }
                None => truncated = true,
            },

            Format::Byte | Format::AtomObject => {}
        }

        if truncated {
            if opt.mode == Mode::Strict {
                return Err(ErrorKind::TruncatedOperand { op, offset: off });
            }
            operand = " <truncated>".to_string();
            diags.push(Diagnostic::new(
                off,
                DiagKind::Truncated,
                format!("operand truncated for opcode {op:#04x}"),
            ));
        }

        b.push_str(&operand);
        col += operand.len();

        pad_to(&mut b, col, COMMENT_COL);
        if !comment.is_empty() {
            let _ = write!(b, "; {comment}");
        }
        b.push('\n');
        first = false;

        match instr_len(bc, off, ops) {
            Some(n) => off += n,
            None => {
                if opt.mode == Mode::Strict {
                    return Err(ErrorKind::UnknownLength { op, offset: off });
                }
                diags.push(Diagnostic::new(
                    off,
                    DiagKind::Invalid,
                    format!("unknown instruction length at offset {off} (opcode {op:#04x})"),
                ));
                off += 1;
            }
        }
    }

    Ok(b)
}

fn pad_to(b: &mut String, col: usize, target: usize) {
    let pad = if col >= target { 1 } else { target - col };
    for _ in 0..pad {
        b.push(' ');
    }
}

/// Sets the function name on diagnostics that don't carry one yet.
fn tag_func(diags: &mut [Diagnostic], name: &str) {
    for d in diags {
        if d.func.is_empty() {
            d.func = name.to_string();
        }
    }
}

/// Disassembles a script and all its inner functions.
///
/// The main script is emitted first with a `; <filename>` banner when the
/// archive carries one, then each inner function per lexical level, five
/// levels deep. Diagnostics from inner functions carry the function name
/// (`anon#<index>` for anonymous functions).
pub fn disasm_tree(s: &Script, opt: &Options, ops: &[OpInfo; 256]) -> Result<Report<String>, Error> {
    let mut b = String::new();
    let mut all_diags = Vec::new();

    if !s.filename.is_empty() {
        let _ = writeln!(b, "; {}", s.filename);
    }

    let mut res = disasm_script(s, "main", true, opt, ops).map_err(|mut e| {
        tag_func(&mut e.diags, "main");
        e
    })?;
    b.push_str(&res.value);
    tag_func(&mut res.diags, "main");
    all_diags.append(&mut res.diags);
    b.push('\n');

    for (i, obj) in s.objects.iter().enumerate() {
        if let Some(inner) = inner_script(obj) {
            let name = function_name(obj, i);
            match disasm_script(inner, &name, false, opt, ops) {
                Ok(mut res) => {
                    b.push_str(&res.value);
                    tag_func(&mut res.diags, &name);
                    all_diags.append(&mut res.diags);
                    b.push('\n');
                }
                Err(mut e) => {
                    tag_func(&mut e.diags, &name);
                    all_diags.append(&mut e.diags);
                    return Err(Error { kind: e.kind, diags: all_diags });
                }
            }
        }
    }

    for obj in &s.objects {
        if let Some(inner) = inner_script(obj) {
            match disasm_inner(inner, 1, opt, ops) {
                Ok(mut res) => {
                    b.push_str(&res.value);
                    all_diags.append(&mut res.diags);
                }
                Err(mut e) => {
                    all_diags.append(&mut e.diags);
                    return Err(Error { kind: e.kind, diags: all_diags });
                }
            }
        }
    }

    Ok(Report::new(b, all_diags))
}

fn inner_script(obj: &crate::Object) -> Option<&Script> {
    if obj.kind != CK_JS_FUNCTION {
        return None;
    }
    obj.function.as_ref()?.script.as_deref()
}

fn function_name(obj: &crate::Object, index: usize) -> String {
    match obj.function.as_ref() {
        Some(f) if !f.name.is_empty() => f.name.clone(),
        _ => format!("anon#{index}"),
    }
}

fn disasm_inner(
    s: &Script,
    depth: usize,
    opt: &Options,
    ops: &[OpInfo; 256],
) -> Result<Report<String>, Error> {
    if depth > 5 {
        return Ok(Report::new(String::new(), Vec::new()));
    }
    let mut b = String::new();
    let mut diags = Vec::new();
    for (i, obj) in s.objects.iter().enumerate() {
        if let Some(inner) = inner_script(obj) {
            let name = function_name(obj, i);
            match disasm_script(inner, &name, false, opt, ops) {
                Ok(mut res) => {
                    b.push_str(&res.value);
                    tag_func(&mut res.diags, &name);
                    diags.append(&mut res.diags);
                }
                Err(mut e) => {
                    if opt.mode == Mode::Strict {
                        tag_func(&mut e.diags, &name);
                        diags.append(&mut e.diags);
                        return Err(Error { kind: e.kind, diags });
                    }
                    let mut d = Diagnostic::new(
                        0,
                        DiagKind::Invalid,
                        format!("inner function {name:?}: {}", e.kind),
                    );
                    d.func = name.clone();
                    diags.append(&mut e.diags);
                    diags.push(d);
                    continue;
                }
            }
            b.push('\n');
            let inner_res = disasm_inner(inner, depth + 1, opt, ops);
            match inner_res {
                Ok(mut res) => {
                    b.push_str(&res.value);
                    diags.append(&mut res.diags);
                }
                Err(mut e) => {
                    diags.append(&mut e.diags);
                    if opt.mode == Mode::Strict {
                        return Err(Error { kind: e.kind, diags });
                    }
                }
            }
        }
    }
    Ok(Report::new(b, diags))
}

/// Formats a decoded constant for display.
fn format_const(c: &Const) -> String {
    match c {
        Const::Int(v) => v.to_string(),
        Const::Double(v) => format_double(*v),
        Const::Atom(s) => format!("{s:?}"),
        Const::True => "true".to_string(),
        Const::False => "false".to_string(),
        Const::Null => "null".to_string(),
        Const::Void => "undefined".to_string(),
        Const::Hole => "<hole>".to_string(),
        Const::Object => "<object>".to_string(),
    }
}

/// Shortest-form float rendering: integral doubles print without a
/// trailing `.0`.
pub(crate) fn format_double(v: f64) -> String {
    if v.is_finite() && v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Converts regexp flag bits to their literal suffix.
/// Bits: 1 = global, 2 = ignoreCase, 4 = multiline, 8 = sticky.
fn regexp_flags(flags: u32) -> String {
    let mut s = String::new();
    if flags & 1 != 0 {
        s.push('g');
    }
    if flags & 2 != 0 {
        s.push('i');
    }
    if flags & 4 != 0 {
        s.push('m');
    }
    if flags & 8 != 0 {
        s.push('y');
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{OPCODES_V28, OPCODES_V33};
    use crate::{Function, Object, Options};

    fn script(bc: Vec<u8>) -> Script {
        Script { bytecode: bc, ..Script::default() }
    }

    fn with_inner(outer_bc: Vec<u8>, name: &str, inner_bc: Vec<u8>) -> Script {
        Script {
            bytecode: outer_bc,
            objects: vec![Object {
                kind: CK_JS_FUNCTION,
                function: Some(Function {
                    name: name.to_string(),
                    nargs: 0,
                    flags: 0,
                    script: Some(Box::new(script(inner_bc))),
                    is_lazy: false,
                }),
            }],
            ..Script::default()
        }
    }

    #[test]
    fn minimal_nop() {
        let s = script(vec![0x00]);
        let res = disasm_tree(&s, &Options::default(), &OPCODES_V33).unwrap();
        assert!(res.value.contains("main\n00000  nop"), "got:\n{}", res.value);
    }

    #[test]
    fn goto_label() {
        // goto +5, then one more byte at offset 5
        let s = script(vec![0x06, 0x00, 0x00, 0x00, 0x05, 0x00]);
        let res = disasm_tree(&s, &Options::default(), &OPCODES_V33).unwrap();
        assert!(res.value.contains("loc_00005:"), "got:\n{}", res.value);
        assert!(res.value.contains("goto         loc_00005 (+5)"), "got:\n{}", res.value);
    }

    #[test]
    fn v28_getlocal_uint16() {
        let s = script(vec![0x56, 0x00, 0x00, 0x05]);
        let res = disasm_script(&s, "test", false, &Options::default(), &OPCODES_V28).unwrap();
        assert!(res.value.contains("getlocal     0"), "got:\n{}", res.value);
        assert!(res.value.contains("return"), "got:\n{}", res.value);
    }

    #[test]
    fn v28_getlocal_nonzero() {
        // Big-endian uint16 operand: 0x00 0x05 = local 5
        let s = script(vec![0x56, 0x00, 0x05]);
        let res = disasm_script(&s, "test", false, &Options::default(), &OPCODES_V28).unwrap();
        assert!(res.value.contains(" 5"), "got:\n{}", res.value);
    }

    #[test]
    fn v28_setlocal_uint16() {
        let s = script(vec![0x57, 0x00, 0x01]);
        let res = disasm_script(&s, "test", false, &Options::default(), &OPCODES_V28).unwrap();
        assert!(res.value.contains("setlocal"), "got:\n{}", res.value);
        assert!(res.value.contains(" 1"), "got:\n{}", res.value);
    }

    #[test]
    fn notearg_v28_only() {
        // Opcode 228 (0xE4) is notearg in SM28 and tostring in SM33.
        let s = script(vec![0xE4]);
        let res = disasm_script(&s, "test", false, &Options::default(), &OPCODES_V28).unwrap();
        assert!(res.value.contains("notearg"), "got:\n{}", res.value);
        let res = disasm_script(&s, "test", false, &Options::default(), &OPCODES_V33).unwrap();
        assert!(res.value.contains("tostring"), "got:\n{}", res.value);
    }

    #[test]
    fn unknown_opcode_strict() {
        let s = script(vec![0xFF]);
        let err =
            disasm_script(&s, "test", false, &Options::default(), &OPCODES_V33).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnknownOpcode { op: 0xFF, offset: 0 }));
    }

    #[test]
    fn unknown_opcode_best_effort() {
        let s = script(vec![0xFF]);
        let res =
            disasm_script(&s, "test", false, &Options::best_effort(), &OPCODES_V33).unwrap();
        assert!(res.value.contains("OP_0xFF"), "got:\n{}", res.value);
        assert!(res.diags.iter().any(|d| d.kind == DiagKind::UnknownOpcode));
    }

    #[test]
    fn truncated_operand_strict() {
        // goto needs 5 bytes, give it 1
        let s = script(vec![0x06]);
        let err =
            disasm_script(&s, "test", false, &Options::default(), &OPCODES_V33).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::TruncatedOperand { op: 0x06, offset: 0 }));
        assert_eq!(err.to_string(), "truncated operand at offset 0 (opcode 0x06)");
    }

    #[test]
    fn truncated_operand_best_effort() {
        let s = script(vec![0x06]);
        let res =
            disasm_script(&s, "test", false, &Options::best_effort(), &OPCODES_V33).unwrap();
        assert!(res.value.contains("<truncated>"), "got:\n{}", res.value);
        assert!(res.diags.iter().any(|d| d.kind == DiagKind::Truncated));
    }

    #[test]
    fn atom_operand_rendering() {
        // name (0x3B) with atom index 0
        let mut s = script(vec![0x3B, 0, 0, 0, 0]);
        s.atoms.push("hello".to_string());
        let res = disasm_script(&s, "test", false, &Options::default(), &OPCODES_V33).unwrap();
        assert!(res.value.contains("name         \"hello\""), "got:\n{}", res.value);

        // Out-of-range index renders a placeholder.
        let s = script(vec![0x3B, 0, 0, 0, 7]);
        let res = disasm_script(&s, "test", false, &Options::default(), &OPCODES_V33).unwrap();
        assert!(res.value.contains("<atom#7>"), "got:\n{}", res.value);
    }

    #[test]
    fn comment_column() {
        // getarg renders an arg[N] comment at column 60.
        let s = script(vec![0x54, 0x00, 0x02]);
        let res = disasm_script(&s, "test", false, &Options::default(), &OPCODES_V33).unwrap();
        let line = res.value.lines().find(|l| l.contains("getarg")).unwrap();
        assert_eq!(line.find("; arg[2]"), Some(60), "got: {line:?}");
    }

    #[test]
    fn step_limit_best_effort() {
        let s = script(vec![0x00; 64]);
        let opt = Options { max_steps: 10, ..Options::best_effort() };
        let res = disasm_script(&s, "test", false, &opt, &OPCODES_V33).unwrap();
        assert!(res.diags.iter().any(|d| d.kind == DiagKind::Overflow));
        assert_eq!(res.value.lines().count(), 11); // 10 instructions + main name line
    }

    #[test]
    fn inner_function_error_strict() {
        let s = with_inner(vec![0x00], "broken", vec![0x06]);
        assert!(disasm_tree(&s, &Options::default(), &OPCODES_V33).is_err());
    }

    #[test]
    fn inner_function_error_best_effort() {
        let s = with_inner(vec![0x00], "broken", vec![0x06]);
        let res = disasm_tree(&s, &Options::best_effort(), &OPCODES_V33).unwrap();
        assert!(res.value.contains("<truncated>"), "got:\n{}", res.value);
        assert!(res.diags.iter().any(|d| d.func == "broken"));
    }

    #[test]
    fn anonymous_diag_name() {
        let s = with_inner(vec![0x00], "", vec![0x06]);
        let res = disasm_tree(&s, &Options::best_effort(), &OPCODES_V33).unwrap();
        assert!(res.diags.iter().any(|d| d.func == "anon#0"), "diags: {:?}", res.diags);
    }

    #[test]
    fn double_format() {
        assert_eq!(format_double(1.0), "1");
        assert_eq!(format_double(0.5), "0.5");
        assert_eq!(format_double(-3.0), "-3");
    }
}
