//! XDR envelope reader and script decoder for SM28 and SM33 archives.
//!
//! The envelope is little-endian throughout. In best-effort mode, reads past
//! the end of the buffer return zero values (or short slices) and record
//! diagnostics; in strict mode they fail with the current position and the
//! name of the operation.

use byteorder::{ByteOrder, LittleEndian};

use crate::{
    detect_version, Const, DiagKind, Diagnostic, Error, ErrorKind, Function, Mode, Object,
    Options, Regexp, Report, Script, TryNote, Version, CK_BLOCK_OBJECT, CK_JS_FUNCTION,
    CK_JS_OBJECT, CK_WITH_OBJECT, MAX_ALLOC_COUNT, MAX_DECODE_DEPTH,
};

// ScriptBits flags (bit positions). Only two affect parsing.
const SB_OWN_SOURCE: u32 = 12;
const SB_HAS_LAZY_SCRIPT: u32 = 18;

// Const tags.
const SCRIPT_INT: u32 = 0;
const SCRIPT_DOUBLE: u32 = 1;
const SCRIPT_ATOM: u32 = 2;
const SCRIPT_TRUE: u32 = 3;
const SCRIPT_FALSE: u32 = 4;
const SCRIPT_NULL: u32 = 5;
const SCRIPT_OBJECT: u32 = 6;
const SCRIPT_VOID: u32 = 7;
const SCRIPT_HOLE: u32 = 8;

/// Cursor over an immutable byte buffer with mode-aware primitive reads.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    mode: Mode,
    max_read_bytes: usize,
    diags: Vec<Diagnostic>,
    depth: usize,
    ver: Version,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], opt: &Options) -> Self {
        Reader {
            data,
            pos: 0,
            mode: opt.mode,
            max_read_bytes: opt.effective_max_read_bytes(),
            diags: Vec::new(),
            depth: 0,
            ver: Version::V33,
        }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Handles a short read: diagnostic + cursor-to-end in best-effort,
    /// error in strict.
    fn truncated(&mut self, need: usize, what: &str) -> Result<(), ErrorKind> {
        if self.mode == Mode::BestEffort {
            self.diags.push(Diagnostic::new(
                self.pos,
                DiagKind::Truncated,
                format!("{what}: need {need} bytes, have {}", self.remaining()),
            ));
            self.pos = self.data.len();
            return Ok(());
        }
        Err(ErrorKind::Truncated { what: what.to_string(), offset: self.pos })
    }

    fn u8(&mut self, what: &str) -> Result<u8, ErrorKind> {
        if self.pos >= self.data.len() {
            self.truncated(1, what)?;
            return Ok(0);
        }
        let v = self.data[self.pos];
        self.pos += 1;
        Ok(v)
    }

    fn u16(&mut self, what: &str) -> Result<u16, ErrorKind> {
        if self.pos + 2 > self.data.len() {
            self.truncated(2, what)?;
            return Ok(0);
        }
        let v = LittleEndian::read_u16(&self.data[self.pos..]);
        self.pos += 2;
        Ok(v)
    }

    fn u32(&mut self, what: &str) -> Result<u32, ErrorKind> {
        if self.pos + 4 > self.data.len() {
            self.truncated(4, what)?;
            return Ok(0);
        }
        let v = LittleEndian::read_u32(&self.data[self.pos..]);
        self.pos += 4;
        Ok(v)
    }

    /// Reads `n` bytes. Negative counts are rejected; counts above the read
    /// cap are clamped (best-effort) or fail (strict); short buffers yield
    /// the available prefix in best-effort mode.
    fn bytes(&mut self, n: i64, what: &str) -> Result<Vec<u8>, ErrorKind> {
        if n < 0 {
            if self.mode == Mode::BestEffort {
                self.diags.push(Diagnostic::new(
                    self.pos,
                    DiagKind::Invalid,
                    format!("bytes: negative count {n}"),
                ));
                self.pos = self.data.len();
                return Ok(Vec::new());
            }
            return Err(ErrorKind::NegativeCount { n, offset: self.pos });
        }
        let mut n = n as u64 as usize;
        if n > self.max_read_bytes {
            if self.mode == Mode::BestEffort {
                self.diags.push(Diagnostic::new(
                    self.pos,
                    DiagKind::Clamped,
                    format!(
                        "bytes({n}): clamped to {} (increase the read cap if this is expected)",
                        self.max_read_bytes
                    ),
                ));
                n = self.max_read_bytes;
            } else {
                return Err(ErrorKind::ReadCapExceeded {
                    n: n as i64,
                    max: self.max_read_bytes,
                    offset: self.pos,
                });
            }
        }
        if self.pos + n > self.data.len() {
            if self.mode == Mode::BestEffort {
                let avail = self.remaining();
                let b = self.data[self.pos..].to_vec();
                self.diags.push(Diagnostic::new(
                    self.pos,
                    DiagKind::Truncated,
                    format!("bytes({n}): have {avail}"),
                ));
                self.pos = self.data.len();
                return Ok(b);
            }
            self.truncated(n, what)?;
            return Ok(Vec::new());
        }
        let b = self.data[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(b)
    }

    /// Reads bytes up to a NUL terminator. An unterminated string is
    /// returned as-is with a diagnostic in best-effort mode.
    fn cstring(&mut self) -> Result<String, ErrorKind> {
        let start = self.pos;
        while self.pos < self.data.len() {
            if self.data[self.pos] == 0 {
                let s = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
                self.pos += 1; // skip NUL
                return Ok(s);
            }
            self.pos += 1;
        }
        if self.mode == Mode::BestEffort {
            let s = String::from_utf8_lossy(&self.data[start..self.pos]).into_owned();
            self.diags.push(Diagnostic::new(start, DiagKind::Truncated, "unterminated cstring"));
            return Ok(s);
        }
        Err(ErrorKind::Truncated { what: "unterminated cstring".to_string(), offset: start })
    }

    /// Reads one atom. SM33 packs `length << 1 | latin1` in the header word
    /// and stores either Latin-1 bytes or UTF-16LE code units; SM28 stores a
    /// plain length followed by UTF-16LE code units.
    fn read_atom(&mut self, what: &str) -> Result<String, ErrorKind> {
        let header = self.u32(what)?;
        let (length, is_latin1) = match self.ver {
            Version::V28 => (header, false),
            _ => (header >> 1, header & 1 != 0),
        };

        if is_latin1 {
            let b = self.bytes(i64::from(length), what)?;
            return Ok(b.iter().map(|&c| c as char).collect());
        }
        let raw = self.bytes(i64::from(length) * 2, what)?;
        // Use the bytes actually returned; best-effort may come up short.
        let units: Vec<u16> = raw.chunks_exact(2).map(LittleEndian::read_u16).collect();
        Ok(char::decode_utf16(units.into_iter())
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect())
    }

    /// Bounds a parsed count by remaining bytes and the absolute cap.
    /// `min_entry_bytes` is the smallest size a well-formed entry can have.
    fn clamp_count(
        &mut self,
        count: u32,
        min_entry_bytes: usize,
        what: &str,
    ) -> Result<u32, ErrorKind> {
        let min_entry_bytes = min_entry_bytes.max(1);
        let max_by_bytes = (self.remaining() / min_entry_bytes) as u32;
        let cap = max_by_bytes.min(MAX_ALLOC_COUNT);
        if count > cap {
            if self.mode == Mode::Strict {
                return Err(ErrorKind::CountExceedsLimit {
                    what: what.to_string(),
                    count,
                    max_by_bytes,
                    abs_cap: MAX_ALLOC_COUNT,
                });
            }
            self.diags.push(Diagnostic::new(
                self.pos,
                DiagKind::Clamped,
                format!("{what} count {count} clamped to {cap}"),
            ));
            return Ok(cap);
        }
        Ok(count)
    }

    /// Validates recursion depth. Best-effort records an `overflow`
    /// diagnostic and tells the caller to substitute a placeholder.
    fn check_depth(&mut self, what: &str) -> Result<bool, ErrorKind> {
        if self.depth > MAX_DECODE_DEPTH {
            if self.mode == Mode::Strict {
                return Err(ErrorKind::DepthExceeded {
                    what: what.to_string(),
                    depth: self.depth,
                    limit: MAX_DECODE_DEPTH,
                });
            }
            self.diags.push(Diagnostic::new(
                self.pos,
                DiagKind::Overflow,
                format!("{what}: recursion depth {} exceeded limit {MAX_DECODE_DEPTH}", self.depth),
            ));
            return Ok(true);
        }
        Ok(false)
    }
}

/// Parses an XDR-encoded bytecode archive into a script tree.
///
/// Reads the four-byte magic, dispatches by dialect, and decodes the
/// top-level script with everything it transitively owns. In strict mode an
/// unknown magic fails; in best-effort mode it records a diagnostic and
/// decodes as SM33.
pub fn decode(data: &[u8], opt: &Options) -> Result<Report<Script>, Error> {
    let mut r = Reader::new(data, opt);

    let magic = match r.u32("magic") {
        Ok(v) => v,
        Err(kind) => return Err(Error::new(kind, r.diags)),
    };
    let ver = detect_version(magic);
    match ver {
        Version::Unknown => {
            if opt.mode == Mode::Strict {
                return Err(Error::new(ErrorKind::BadMagic { got: magic }, r.diags));
            }
            r.diags.push(Diagnostic::new(
                0,
                DiagKind::Invalid,
                format!("bad XDR magic: got {magic:#010x}"),
            ));
            r.ver = Version::V33;
        }
        v => r.ver = v,
    }

    match decode_script(&mut r) {
        Ok(s) => Ok(Report::new(s, r.diags)),
        Err(kind) => Err(Error::new(kind, r.diags)),
    }
}

/// Reads one script record, dispatching header layout by dialect.
fn decode_script(r: &mut Reader<'_>) -> Result<Script, ErrorKind> {
    r.depth += 1;
    let result = decode_script_inner(r);
    r.depth -= 1;
    result
}

fn decode_script_inner(r: &mut Reader<'_>) -> Result<Script, ErrorKind> {
    if r.check_depth("script")? {
        return Ok(Script::default());
    }

    let mut s = Script::default();

    // Header: counts and packed fields differ between dialects.
    let length;
    match r.ver {
        Version::V28 => {
            // argsVars packs (nargs << 16) | nvars.
            let args_vars = r.u32("argsVars")?;
            s.nargs = (args_vars >> 16) as u16;
            s.nvars = args_vars & 0xFFFF;
            length = r.u32("length")?;
            s.main_offset = r.u32("prologLength")?;
            // version packs nfixed in the upper 16 bits.
            let version_packed = r.u32("version")?;
            s.version = version_packed & 0xFFFF;
        }
        _ => {
            s.nargs = r.u16("nargs")?;
            s.nblocklocals = r.u16("nblocklocals")?;
            s.nvars = r.u32("nvars")?;
            length = r.u32("length")?;
            s.main_offset = r.u32("prologLength")?;
            s.version = r.u32("version")?;
        }
    }

    let natoms = r.u32("natoms")?;
    let nsrcnotes = r.u32("nsrcnotes")?;
    let nconsts = r.u32("nconsts")?;
    let nobjects = r.u32("nobjects")?;
    let nregexps = r.u32("nregexps")?;
    let ntrynotes = r.u32("ntrynotes")?;
    let nblockscopes = r.u32("nblockscopes")?;
    let _ntypesets = r.u32("nTypeSets")?;
    let _funlength = r.u32("funLength")?;

    let script_bits = r.u32("scriptBits")?;

    // Bindings: one atom per name, then one descriptor byte per name.
    let name_count = u32::from(s.nargs) + s.nvars;
    let name_count = r.clamp_count(name_count, 5, "bindings")?;
    s.bindings = Vec::with_capacity(name_count as usize);
    for _ in 0..name_count {
        s.bindings.push(r.read_atom("binding atom")?);
    }
    for _ in 0..name_count {
        r.u8("binding descriptor")?;
    }

    // ScriptSource is present only when this script owns its source.
    if script_bits & (1 << SB_OWN_SOURCE) != 0 {
        s.filename = decode_script_source(r)?;
    }

    // Source location.
    s.source_start = r.u32("sourceStart")?;
    s.source_end = r.u32("sourceEnd")?;
    s.lineno = r.u32("lineno")?;
    match r.ver {
        Version::V28 => {
            // nslots packs (staticLevel << 16) | nslots; no column field.
            let nslots_packed = r.u32("nslots")?;
            s.nslots = nslots_packed & 0xFFFF;
            s.static_level = nslots_packed >> 16;
        }
        _ => {
            s.column = r.u32("column")?;
            s.nslots = r.u32("nslots")?;
            s.static_level = r.u32("staticLevel")?;
        }
    }

    s.bytecode = r.bytes(i64::from(length), "bytecode")?;
    s.srcnotes = r.bytes(i64::from(nsrcnotes), "srcnotes")?;

    let natoms = r.clamp_count(natoms, 4, "atoms")?;
    s.atoms = Vec::with_capacity(natoms as usize);
    for _ in 0..natoms {
        s.atoms.push(r.read_atom("atom")?);
    }

    let nconsts = r.clamp_count(nconsts, 4, "consts")?;
    s.consts = Vec::with_capacity(nconsts as usize);
    for _ in 0..nconsts {
        s.consts.push(decode_const(r)?);
    }

    let nobjects = r.clamp_count(nobjects, 4, "objects")?;
    s.objects = Vec::with_capacity(nobjects as usize);
    for _ in 0..nobjects {
        s.objects.push(decode_object(r)?);
    }

    let nregexps = r.clamp_count(nregexps, 8, "regexps")?;
    s.regexps = Vec::with_capacity(nregexps as usize);
    for _ in 0..nregexps {
        s.regexps.push(decode_regexp(r)?);
    }

    // TryNotes arrive in reverse order on the wire.
    let min_trynote = if r.ver == Version::V28 { 12 } else { 13 };
    let ntrynotes = r.clamp_count(ntrynotes, min_trynote, "trynotes")?;
    if ntrynotes > 0 {
        s.try_notes = vec![
            TryNote { kind: 0, stack_depth: 0, start: 0, length: 0 };
            ntrynotes as usize
        ];
        for i in (0..ntrynotes as usize).rev() {
            let tn = match r.ver {
                Version::V28 => {
                    // kindAndDepth packs (kind << 16) | stackDepth.
                    let kind_and_depth = r.u32("trynote kindAndDepth")?;
                    let kind_word = kind_and_depth >> 16;
                    if kind_word > 0xFF {
                        if r.mode == Mode::Strict {
                            return Err(ErrorKind::TryNoteKindOutOfRange(kind_word));
                        }
                        r.diags.push(Diagnostic::new(
                            r.pos,
                            DiagKind::Invalid,
                            format!("trynote kind {kind_word} out of range"),
                        ));
                    }
                    TryNote {
                        kind: kind_word as u8,
                        stack_depth: kind_and_depth & 0xFFFF,
                        start: r.u32("trynote start")?,
                        length: r.u32("trynote length")?,
                    }
                }
                _ => TryNote {
                    kind: r.u8("trynote kind")?,
                    stack_depth: r.u32("trynote stackDepth")?,
                    start: r.u32("trynote start")?,
                    length: r.u32("trynote length")?,
                },
            };
            s.try_notes[i] = tn;
        }
    }

    // Block scopes: parsed for framing, not retained.
    let nblockscopes = r.clamp_count(nblockscopes, 16, "blockscopes")?;
    for _ in 0..nblockscopes {
        // index, start, length, parent
        for what in ["blockscope index", "blockscope start", "blockscope length", "blockscope parent"] {
            r.u32(what)?;
        }
    }

    if script_bits & (1 << SB_HAS_LAZY_SCRIPT) != 0 {
        skip_relazification_info(r)?;
    }

    Ok(s)
}

/// Reads a ScriptSource record; the filename is the only retained output.
/// Source text is skipped: Cocos2d-x archives mark it retrievable, meaning
/// the engine reloads it from the `.js` file at runtime.
fn decode_script_source(r: &mut Reader<'_>) -> Result<String, ErrorKind> {
    let has_source = r.u8("hasSource")?;
    let retrievable = r.u8("retrievable")?;

    if has_source != 0 && retrievable == 0 {
        let src_len = r.u32("sourceLength")?;
        let comp_len = r.u32("compressedLength")?;
        r.u8("argumentsNotIncluded")?;
        let byte_len = if comp_len != 0 {
            i64::from(comp_len)
        } else {
            i64::from(src_len) * 2 // jschar = 2 bytes
        };
        r.bytes(byte_len, "source text")?;
    }

    let have_source_map = r.u8("haveSourceMap")?;
    if have_source_map != 0 {
        let map_len = r.u32("sourceMapLength")?;
        r.bytes(i64::from(map_len) * 2, "source map")?;
    }

    let have_display_url = r.u8("haveDisplayURL")?;
    if have_display_url != 0 {
        let url_len = r.u32("displayURLLength")?;
        r.bytes(i64::from(url_len) * 2, "display URL")?;
    }

    let have_filename = r.u8("haveFilename")?;
    if have_filename != 0 {
        return r.cstring();
    }
    Ok(String::new())
}

/// Reads one object entry: block scope, with scope, inner function, or
/// object literal.
fn decode_object(r: &mut Reader<'_>) -> Result<Object, ErrorKind> {
    let class_kind = r.u32("classKind")?;
    let mut obj = Object { kind: class_kind, function: None };

    match class_kind {
        CK_BLOCK_OBJECT | CK_WITH_OBJECT => {
            r.u32("enclosingStaticScopeIndex")?;
            if class_kind == CK_BLOCK_OBJECT {
                skip_static_block_object(r)?;
            }
        }
        CK_JS_FUNCTION => {
            r.u32("funEnclosingScopeIndex")?;
            obj.function = Some(decode_interpreted_function(r)?);
        }
        CK_JS_OBJECT => {
            skip_object_literal(r)?;
        }
        other => {
            if r.mode == Mode::BestEffort {
                r.diags.push(Diagnostic::new(
                    r.pos,
                    DiagKind::Invalid,
                    format!("unknown class kind {other}"),
                ));
                return Ok(obj);
            }
            return Err(ErrorKind::UnknownClassKind(other));
        }
    }

    Ok(obj)
}

/// Reads an interpreted function: flag word, optional name atom, packed
/// nargs/flags, then either a nested script or a lazy summary.
fn decode_interpreted_function(r: &mut Reader<'_>) -> Result<Function, ErrorKind> {
    r.depth += 1;
    let result = decode_interpreted_function_inner(r);
    r.depth -= 1;
    result
}

fn decode_interpreted_function_inner(r: &mut Reader<'_>) -> Result<Function, ErrorKind> {
    if r.check_depth("function")? {
        return Ok(Function {
            name: "<depth-exceeded>".to_string(),
            nargs: 0,
            flags: 0,
            script: None,
            is_lazy: true,
        });
    }

    let firstword = r.u32("function firstword")?;
    let has_atom = firstword & 0x1 != 0;
    let is_lazy = firstword & 0x4 != 0;

    let name = if has_atom { r.read_atom("function atom")? } else { String::new() };

    let flagsword = r.u32("function flagsword")?;
    let mut f = Function {
        name,
        nargs: (flagsword >> 16) as u16,
        flags: (flagsword & 0xFFFF) as u16,
        script: None,
        is_lazy,
    };

    if is_lazy {
        skip_lazy_script(r)?;
    } else {
        f.script = Some(Box::new(decode_script(r)?));
    }

    Ok(f)
}

/// Reads one script constant.
fn decode_const(r: &mut Reader<'_>) -> Result<Const, ErrorKind> {
    let tag = r.u32("const tag")?;
    match tag {
        SCRIPT_INT => Ok(Const::Int(r.u32("const int")? as i32)),
        SCRIPT_DOUBLE => {
            let b = r.bytes(8, "const double")?;
            if b.len() < 8 {
                // Best-effort short read; the truncation is already recorded.
                return Ok(Const::Double(0.0));
            }
            Ok(Const::Double(f64::from_bits(LittleEndian::read_u64(&b))))
        }
        SCRIPT_ATOM => Ok(Const::Atom(r.read_atom("const atom")?)),
        SCRIPT_TRUE => Ok(Const::True),
        SCRIPT_FALSE => Ok(Const::False),
        SCRIPT_NULL => Ok(Const::Null),
        SCRIPT_VOID => Ok(Const::Void),
        SCRIPT_HOLE => Ok(Const::Hole),
        SCRIPT_OBJECT => {
            skip_object_literal(r)?;
            Ok(Const::Object)
        }
        other => {
            if r.mode == Mode::BestEffort {
                r.diags.push(Diagnostic::new(
                    r.pos,
                    DiagKind::Invalid,
                    format!("unknown const tag {other}"),
                ));
                return Ok(Const::Void);
            }
            Err(ErrorKind::UnknownConstTag(other))
        }
    }
}

fn decode_regexp(r: &mut Reader<'_>) -> Result<Regexp, ErrorKind> {
    let source = r.read_atom("regexp source")?;
    let flags = r.u32("regexp flags")?;
    Ok(Regexp { source, flags })
}

/// Reads and discards a StaticBlockObject.
fn skip_static_block_object(r: &mut Reader<'_>) -> Result<(), ErrorKind> {
    let count = r.u32("block var count")?;
    r.u32("block local offset")?;
    let count = r.clamp_count(count, 8, "block vars")?;
    for _ in 0..count {
        r.read_atom("block var atom")?;
        r.u32("block var aliased")?;
    }
    Ok(())
}

/// Reads and discards an object-literal sub-record: shape words, dense
/// elements, then named slots.
fn skip_object_literal(r: &mut Reader<'_>) -> Result<(), ErrorKind> {
    let _is_array = r.u32("literal isArray")?;
    r.u32("literal kind word")?;
    r.u32("literal capacity")?;

    let initialized = r.u32("literal initialized")?;
    let initialized = r.clamp_count(initialized, 4, "dense elements")?;
    for _ in 0..initialized {
        decode_const(r)?;
    }

    let nslot = r.u32("literal nslot")?;
    let nslot = r.clamp_count(nslot, 8, "object slots")?;
    for _ in 0..nslot {
        let id_type = r.u32("slot id type")?;
        if id_type == 0 {
            r.read_atom("slot atom id")?;
        } else {
            r.u32("slot int id")?;
        }
        decode_const(r)?;
    }

    Ok(())
}

/// Reads a LazyScript packedFields word pair and extracts the two counts.
fn read_packed_fields(r: &mut Reader<'_>) -> Result<(u32, u32), ErrorKind> {
    let lo = r.u32("packedFields lo")?;
    let hi = r.u32("packedFields hi")?;
    let num_free_vars = (lo >> 8) & 0xFF_FFFF;
    let num_inner_funcs = hi & 0x7F_FFFF;
    Ok((num_free_vars, num_inner_funcs))
}

/// Reads and discards a RelazificationInfo record (packedFields plus the
/// free-variable atoms).
fn skip_relazification_info(r: &mut Reader<'_>) -> Result<(), ErrorKind> {
    let (num_free_vars, _) = read_packed_fields(r)?;
    let num_free_vars = r.clamp_count(num_free_vars, 4, "relazification free vars")?;
    for _ in 0..num_free_vars {
        r.read_atom("relazification free var")?;
    }
    Ok(())
}

/// Reads and discards a LazyScript record: source extent, packedFields,
/// free-variable atoms, inner function entries.
fn skip_lazy_script(r: &mut Reader<'_>) -> Result<(), ErrorKind> {
    for what in ["lazy begin", "lazy end", "lazy lineno", "lazy column"] {
        r.u32(what)?;
    }

    let (num_free_vars, num_inner_funcs) = read_packed_fields(r)?;

    let num_free_vars = r.clamp_count(num_free_vars, 4, "lazy free vars")?;
    for _ in 0..num_free_vars {
        r.read_atom("lazy free var")?;
    }

    let num_inner_funcs = r.clamp_count(num_inner_funcs, 8, "lazy inner funcs")?;
    for _ in 0..num_inner_funcs {
        decode_interpreted_function(r)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Options, XDR_MAGIC_V33};

    fn reader<'a>(data: &'a [u8], mode: Mode) -> Reader<'a> {
        let opt = Options { mode, ..Options::default() };
        Reader::new(data, &opt)
    }

    #[test]
    fn negative_bytes_strict() {
        let mut r = reader(&[1, 2, 3], Mode::Strict);
        assert!(matches!(r.bytes(-1, "test"), Err(ErrorKind::NegativeCount { .. })));
    }

    #[test]
    fn negative_bytes_best_effort() {
        let mut r = reader(&[1, 2, 3], Mode::BestEffort);
        let b = r.bytes(-1, "test").unwrap();
        assert!(b.is_empty());
        assert_eq!(r.diags.len(), 1);
        assert_eq!(r.diags[0].kind, DiagKind::Invalid);
    }

    #[test]
    fn huge_bytes_strict() {
        let mut r = reader(&[0u8; 100], Mode::Strict);
        let n = crate::MAX_READ_BYTES as i64 + 1;
        assert!(matches!(r.bytes(n, "test"), Err(ErrorKind::ReadCapExceeded { .. })));
    }

    #[test]
    fn huge_bytes_best_effort() {
        let data = vec![0u8; 100];
        let mut r = reader(&data, Mode::BestEffort);
        let b = r.bytes(crate::MAX_READ_BYTES as i64 + 1, "test").unwrap();
        // Clamped to the cap, then truncated to the available bytes.
        assert_eq!(b.len(), 100);
        assert!(r.diags.iter().any(|d| d.kind == DiagKind::Clamped));
        assert!(r.diags.iter().any(|d| d.kind == DiagKind::Truncated));
    }

    #[test]
    fn small_read_cap() {
        let data = vec![0u8; 100];
        let opt = Options { mode: Mode::BestEffort, max_read_bytes: 10, ..Options::default() };
        let mut r = Reader::new(&data, &opt);
        let b = r.bytes(50, "test").unwrap();
        assert_eq!(b.len(), 10);
        assert!(r.diags.iter().any(|d| d.kind == DiagKind::Clamped));
    }

    #[test]
    fn cstring_unterminated() {
        let mut r = reader(b"abc", Mode::Strict);
        assert!(r.cstring().is_err());

        let mut r = reader(b"abc", Mode::BestEffort);
        assert_eq!(r.cstring().unwrap(), "abc");
        assert_eq!(r.diags[0].kind, DiagKind::Truncated);

        let mut r = reader(b"abc\0def", Mode::Strict);
        assert_eq!(r.cstring().unwrap(), "abc");
        assert_eq!(r.pos, 4);
    }

    #[test]
    fn atom_latin1_v33() {
        // "café" as Latin-1: length 4, latin1 flag set: (4 << 1) | 1 = 9
        let mut data = 9u32.to_le_bytes().to_vec();
        data.extend_from_slice(&[b'c', b'a', b'f', 0xE9]);
        let mut r = reader(&data, Mode::Strict);
        assert_eq!(r.read_atom("test").unwrap(), "café");
    }

    #[test]
    fn atom_utf16_v33() {
        // "日" = U+65E5, one UTF-16 unit, latin1 flag clear: 1 << 1 = 2
        let mut data = 2u32.to_le_bytes().to_vec();
        data.extend_from_slice(&0x65E5u16.to_le_bytes());
        let mut r = reader(&data, Mode::Strict);
        assert_eq!(r.read_atom("test").unwrap(), "日");
    }

    #[test]
    fn atom_utf16_surrogate_pair() {
        // U+1F3AE (🎮) = surrogate pair D83C DFAE, two units.
        let mut data = (2u32 << 1).to_le_bytes().to_vec();
        data.extend_from_slice(&0xD83Cu16.to_le_bytes());
        data.extend_from_slice(&0xDFAEu16.to_le_bytes());
        let mut r = reader(&data, Mode::Strict);
        assert_eq!(r.read_atom("test").unwrap(), "\u{1F3AE}");
    }

    #[test]
    fn atom_lone_surrogate_replaced() {
        let mut data = (1u32 << 1).to_le_bytes().to_vec();
        data.extend_from_slice(&0xD800u16.to_le_bytes());
        let mut r = reader(&data, Mode::BestEffort);
        assert_eq!(r.read_atom("test").unwrap(), "\u{FFFD}");
    }

    #[test]
    fn atom_v28_plain_length() {
        // v28: header is the plain unit count, always UTF-16.
        let mut data = 2u32.to_le_bytes().to_vec();
        data.extend_from_slice(&(b'h' as u16).to_le_bytes());
        data.extend_from_slice(&(b'i' as u16).to_le_bytes());
        let mut r = reader(&data, Mode::Strict);
        r.ver = Version::V28;
        assert_eq!(r.read_atom("test").unwrap(), "hi");
    }

    #[test]
    fn atom_truncated_best_effort_prefix() {
        // Declares 4 UTF-16 units but carries only 2.
        let mut data = (4u32 << 1).to_le_bytes().to_vec();
        data.extend_from_slice(&(b'o' as u16).to_le_bytes());
        data.extend_from_slice(&(b'k' as u16).to_le_bytes());
        let mut r = reader(&data, Mode::BestEffort);
        assert_eq!(r.read_atom("test").unwrap(), "ok");
        assert!(r.diags.iter().any(|d| d.kind == DiagKind::Truncated));
    }

    #[test]
    fn clamp_count_limits() {
        let data = vec![0u8; 40];
        let mut r = reader(&data, Mode::Strict);
        assert_eq!(r.clamp_count(10, 4, "test").unwrap(), 10);
        assert!(r.clamp_count(11, 4, "test").is_err());

        let mut r = reader(&data, Mode::BestEffort);
        assert_eq!(r.clamp_count(11, 4, "test").unwrap(), 10);
        assert_eq!(r.diags[0].kind, DiagKind::Clamped);
    }

    #[test]
    fn bad_magic_strict() {
        let err = decode(&[0, 0, 0, 0], &Options::default()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BadMagic { .. }));
    }

    #[test]
    fn bad_magic_best_effort_falls_back() {
        let res = decode(&[0, 0, 0, 0], &Options::best_effort()).unwrap();
        assert!(res
            .diags
            .iter()
            .any(|d| d.kind == DiagKind::Invalid && d.msg.contains("magic")));
    }

    #[test]
    fn empty_input() {
        assert!(decode(&[], &Options::default()).is_err());
        // Best-effort: magic read truncates to zero, decodes as v33 junk.
        let res = decode(&[], &Options::best_effort()).unwrap();
        assert!(!res.diags.is_empty());
    }

    #[test]
    fn truncated_stream_best_effort() {
        let mut data = XDR_MAGIC_V33.to_le_bytes().to_vec();
        data.push(0x01);
        data.push(0x00);
        let res = decode(&data, &Options::best_effort()).unwrap();
        assert!(res.diags.iter().any(|d| d.kind == DiagKind::Truncated));
    }

    fn huge_count_input(natoms: u32) -> Vec<u8> {
        // v33 header with natoms planted at its field offset (24); enough
        // trailing zeroes that the header itself decodes cleanly.
        let mut data = vec![0u8; 200];
        data[0..4].copy_from_slice(&XDR_MAGIC_V33.to_le_bytes());
        data[24..28].copy_from_slice(&natoms.to_le_bytes());
        data
    }

    #[test]
    fn huge_count_strict() {
        let err = decode(&huge_count_input(0xFFFF_FFFF), &Options::default()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::CountExceedsLimit { .. }));
    }

    #[test]
    fn huge_count_best_effort() {
        let data = huge_count_input(0xFFFF_FFFF);
        let res = decode(&data, &Options::best_effort()).unwrap();
        assert!(res.diags.iter().any(|d| d.kind == DiagKind::Clamped));
        // remaining/4 bounds the atom pool.
        assert!(res.value.atoms.len() <= data.len() / 4);
    }
}
