//! Basic-block partitioning and per-block call/comparison annotation.
//!
//! Block starts are offset 0, every jump target, and the offset after any
//! block-terminating instruction. Terminators are matched by catalog name so
//! one partitioner serves both dialects. When an instruction's length cannot
//! be determined, boundary discovery skips one byte to keep finding later
//! block starts, but the per-block walk stops: advancing one byte there
//! risks reading mid-instruction bytes as opcodes and corrupting the
//! block's analysis.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::callgraph::{atom_at, format_const_lit, push_lit, truncate_lit};
use crate::operand::{
    collect_labels, get_int8, get_int32, get_jump_offset, get_uint16, get_uint24,
    get_uint32_index, instr_len,
};
use crate::tables::OpInfo;
use crate::{Script, CK_JS_FUNCTION};

/// A call found during block scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub offset: usize,
    pub callee: String,
    pub args: Vec<String>,
}

/// A control-flow edge to another basic block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Successor {
    pub block_id: usize,
    /// Empty (unconditional), "T" (true branch), or "F" (false branch).
    pub cond: String,
}

impl Successor {
    fn plain(block_id: usize) -> Self {
        Successor { block_id, cond: String::new() }
    }

    fn cond(block_id: usize, cond: &str) -> Self {
        Successor { block_id, cond: cond.to_string() }
    }
}

/// A property read or comparison that is not a call target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropAccess {
    pub name: String,
}

/// A straight-line run of bytecode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: usize,
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
    pub calls: Vec<CallSite>,
    pub props: Vec<PropAccess>,
    pub succs: Vec<Successor>,
    /// True when the block ends in a terminator instruction.
    pub term: bool,
}

/// Per-function control flow graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FuncCfg {
    pub name: String,
    pub blocks: Vec<BasicBlock>,
    /// Indexes into [`CfgGraph::funcs`] for lexically nested functions.
    pub children: Vec<usize>,
}

/// CFGs for a script tree, entry script first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CfgGraph {
    pub funcs: Vec<FuncCfg>,
}

/// True if the named opcode ends a basic block.
fn is_block_terminator(name: &str) -> bool {
    matches!(
        name,
        "goto" | "ifeq" | "ifne" | "or" | "and" | "case" | "default" | "gosub" | "return"
            | "retrval" | "throw" | "tableswitch"
    )
}

/// Builds control flow graphs for a script and all its inner functions.
pub fn build_cfg(s: &Script, ops: &[OpInfo; 256]) -> CfgGraph {
    let mut graph = CfgGraph::default();
    walk(&mut graph, s, "main", ops);
    graph
}

fn walk(graph: &mut CfgGraph, s: &Script, name: &str, ops: &[OpInfo; 256]) {
    let parent_idx = graph.funcs.len();
    let cfg = build_func_cfg(s, name, ops);
    graph.funcs.push(cfg);

    for (i, obj) in s.objects.iter().enumerate() {
        if obj.kind != CK_JS_FUNCTION {
            continue;
        }
        let Some(f) = obj.function.as_ref() else { continue };
        let inner_name =
            if f.name.is_empty() { format!("anon#{i}") } else { f.name.clone() };
        let child_idx = graph.funcs.len();
        graph.funcs[parent_idx].children.push(child_idx);
        match f.script.as_deref() {
            Some(inner) if !f.is_lazy => walk(graph, inner, &inner_name, ops),
            _ => graph.funcs.push(FuncCfg {
                name: inner_name,
                blocks: vec![BasicBlock::default()],
                children: Vec::new(),
            }),
        }
    }
}

/// Splits one function's bytecode into basic blocks and annotates calls,
/// comparisons, and successor edges.
fn build_func_cfg(s: &Script, name: &str, ops: &[OpInfo; 256]) -> FuncCfg {
    let bc = &s.bytecode;
    if bc.is_empty() {
        return FuncCfg {
            name: name.to_string(),
            blocks: vec![BasicBlock::default()],
            children: Vec::new(),
        };
    }

    // 1. Block boundary offsets: entry, labels, post-terminator offsets.
    let mut block_starts: std::collections::BTreeSet<usize> = [0].into_iter().collect();
    for label in collect_labels(bc, ops) {
        if label < bc.len() {
            block_starts.insert(label);
        }
    }

    let mut off = 0usize;
    while off < bc.len() {
        let op = bc[off];
        let Some(n) = instr_len(bc, off, ops) else {
            off += 1;
            continue;
        };
        if is_block_terminator(ops[op as usize].name) {
            let next = off + n;
            if next < bc.len() {
                block_starts.insert(next);
            }
        }
        off += n;
    }

    // 2. Materialize blocks in offset order.
    let starts: Vec<usize> = block_starts.into_iter().collect();
    let mut offset_to_block: HashMap<usize, usize> = HashMap::new();
    let mut blocks: Vec<BasicBlock> = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(bc.len());
        offset_to_block.insert(start, i);
        blocks.push(BasicBlock { id: i, start, end, ..BasicBlock::default() });
    }

    // 3. Walk each block with the literal/name/property state machine.
    for block in &mut blocks {
        scan_block(block, s, bc, ops, &offset_to_block);
    }

    FuncCfg { name: name.to_string(), blocks, children: Vec::new() }
}

fn scan_block(
    block: &mut BasicBlock,
    s: &Script,
    bc: &[u8],
    ops: &[OpInfo; 256],
    offset_to_block: &HashMap<usize, usize>,
) {
    let mut off = block.start;
    let mut lit_buf: Vec<String> = Vec::new();
    // Empty means no name is latched.
    let mut last_atom = String::new();
    let mut last_atom_off = 0usize;
    let mut prop_chain: Vec<String> = Vec::new();

    while off < block.end {
        let op = bc[off];
        let Some(n) = instr_len(bc, off, ops) else {
            break;
        };
        let op_name = ops[op as usize].name;

        match op_name {
            // Literal pushes
            "string" => {
                if let Some(lit) = atom_at(s, bc, off) {
                    push_lit(&mut lit_buf, format!("\"{}\"", truncate_lit(&lit)));
                }
            }
            "double" => {
                if let Some(idx) = get_uint32_index(bc, off) {
                    if let Some(c) = s.consts.get(idx as usize) {
                        if let Some(lit) = format_const_lit(c) {
                            push_lit(&mut lit_buf, lit);
                        }
                    }
                }
            }
            "int8" => {
                if let Some(v) = get_int8(bc, off) {
                    push_lit(&mut lit_buf, v.to_string());
                }
            }
            "int32" => {
                if let Some(v) = get_int32(bc, off) {
                    push_lit(&mut lit_buf, v.to_string());
                }
            }
            "uint16" => {
                if let Some(v) = get_uint16(bc, off) {
                    push_lit(&mut lit_buf, v.to_string());
                }
            }
            "uint24" => {
                if let Some(v) = get_uint24(bc, off) {
                    push_lit(&mut lit_buf, v.to_string());
                }
            }
            "zero" => push_lit(&mut lit_buf, "0".to_string()),
            "one" => push_lit(&mut lit_buf, "1".to_string()),
            "null" => push_lit(&mut lit_buf, "null".to_string()),
            "true" => push_lit(&mut lit_buf, "true".to_string()),
            "false" => push_lit(&mut lit_buf, "false".to_string()),

            "callprop" => {
                if let Some(atom) = atom_at(s, bc, off) {
                    block.calls.push(CallSite {
                        offset: off,
                        callee: atom,
                        args: lit_buf.clone(),
                    });
                }
                lit_buf.clear();
                last_atom.clear();
                prop_chain.clear();
            }

            // SM28 uses callname/callgname as combined name+this pushes.
            "getprop" | "getgname" | "name" | "callname" | "callgname" => {
                if let Some(atom) = atom_at(s, bc, off) {
                    last_atom = atom.clone();
                    last_atom_off = off;
                    prop_chain.push(atom);
                }
            }

            "call" | "new" | "funcall" | "funapply" => {
                if !last_atom.is_empty() && off - last_atom_off < 20 {
                    block.calls.push(CallSite {
                        offset: off,
                        callee: last_atom.clone(),
                        args: lit_buf.clone(),
                    });
                }
                lit_buf.clear();
                last_atom.clear();
                prop_chain.clear();
            }

            // Comparisons: emit the property chain with the compared value.
            "eq" | "ne" | "stricteq" | "strictne" => {
                if !prop_chain.is_empty() {
                    let chain = prop_chain.join(".");
                    let base = if op_name == "ne" || op_name == "strictne" { "!=" } else { "==" };
                    let mut cmp_op = String::from(base);
                    if op_name == "stricteq" || op_name == "strictne" {
                        cmp_op.push('=');
                    }
                    let mut label = chain;
                    if let Some(last) = lit_buf.last() {
                        label = format!("{label} {cmp_op} {last}");
                    }
                    block.props.push(PropAccess { name: label });
                    prop_chain.clear();
                    lit_buf.clear();
                }
            }

            // Control flow out of the block.
            "goto" => {
                if let Some(jump_off) = get_jump_offset(bc, off) {
                    push_target(block, offset_to_block, off, jump_off, "");
                }
                block.term = true;
            }

            "ifeq" => {
                // ifeq jumps when falsy: fall-through is the true edge.
                if let Some(jump_off) = get_jump_offset(bc, off) {
                    push_fallthrough(block, offset_to_block, off + n, "T");
                    push_target(block, offset_to_block, off, jump_off, "F");
                }
                block.term = true;
            }

            "ifne" => {
                // ifne jumps when truthy: fall-through is the false edge.
                if let Some(jump_off) = get_jump_offset(bc, off) {
                    push_fallthrough(block, offset_to_block, off + n, "F");
                    push_target(block, offset_to_block, off, jump_off, "T");
                }
                block.term = true;
            }

            "or" | "and" | "case" => {
                // Short-circuit or case: both exits, unlabeled.
                if let Some(jump_off) = get_jump_offset(bc, off) {
                    push_fallthrough(block, offset_to_block, off + n, "");
                    push_target(block, offset_to_block, off, jump_off, "");
                }
                block.term = true;
            }

            "default" | "gosub" => {
                if let Some(jump_off) = get_jump_offset(bc, off) {
                    push_target(block, offset_to_block, off, jump_off, "");
                }
                block.term = true;
            }

            "return" | "retrval" | "throw" => {
                block.term = true;
            }

            _ => {}
        }

        off += n;
    }

    // Flush a property chain not consumed by a call or comparison.
    if !prop_chain.is_empty() {
        block.props.push(PropAccess { name: prop_chain.join(".") });
    }

    // Non-terminal blocks fall through to the next block.
    if !block.term {
        if let Some(&bid) = offset_to_block.get(&block.end) {
            block.succs.push(Successor::plain(bid));
        }
    }
}

fn push_target(
    block: &mut BasicBlock,
    offset_to_block: &HashMap<usize, usize>,
    off: usize,
    delta: i32,
    cond: &str,
) {
    let target = off as i64 + i64::from(delta);
    if target < 0 {
        return;
    }
    if let Some(&bid) = offset_to_block.get(&(target as usize)) {
        block.succs.push(Successor::cond(bid, cond));
    }
}

fn push_fallthrough(
    block: &mut BasicBlock,
    offset_to_block: &HashMap<usize, usize>,
    at: usize,
    cond: &str,
) {
    if let Some(&bid) = offset_to_block.get(&at) {
        block.succs.push(Successor::cond(bid, cond));
    }
}
