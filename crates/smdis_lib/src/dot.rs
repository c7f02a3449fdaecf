//! Graphviz DOT renderers for call graphs and control flow graphs.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use crate::callgraph::Graph;
use crate::cfg::{BasicBlock, CfgGraph, FuncCfg};

/// Rows shown in a single block label before eliding.
const MAX_BLOCK_CALLS: usize = 10;

/// Escapes a string for DOT HTML labels.
fn dot_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Builds a safe DOT identifier from a function name.
fn dot_id(name: &str) -> String {
    let mut b = String::from("n_");
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            b.push(c);
        } else {
            let _ = write!(b, "_{:04x}", c as u32);
        }
    }
    b
}

/// True if the name looks like a constant (all uppercase plus underscores).
fn is_all_caps(s: &str) -> bool {
    s.len() >= 2 && s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

/// Renders a call graph as a left-to-right monochrome digraph: `main`
/// highlighted, anonymous functions dashed, external callees as plaintext
/// leaf nodes.
pub fn render_callgraph(g: &Graph, title: &str) -> String {
    const BLUE: &str = "#0B3D91";
    const RED: &str = "#FC3D21";
    const BLACK: &str = "#1A1A1A";
    const GRAY: &str = "#9E9E9E";
    const LIGHT_BG: &str = "#F5F5F5";

    let mut b = String::new();
    b.push_str("digraph callgraph {\n");
    b.push_str("  rankdir=LR;\n");
    b.push_str("  splines=true;\n");
    b.push_str("  nodesep=0.4;\n");
    b.push_str("  ranksep=0.6;\n");
    let _ = writeln!(b, "  bgcolor=\"{LIGHT_BG}\";");
    let _ = writeln!(
        b,
        "  node [shape=rect, style=filled, fillcolor=white, color=\"{BLACK}\", penwidth=0.5, fontname=\"Helvetica Neue,Helvetica,Arial\", fontsize=9, fontcolor=\"{BLACK}\", height=0.3, margin=\"0.12,0.06\"];"
    );
    let _ = writeln!(b, "  edge [color=\"{GRAY}\", penwidth=0.5, arrowsize=0.5, arrowhead=vee];");
    if !title.is_empty() {
        b.push_str("  labelloc=t;\n  labeljust=l;\n");
        let _ = writeln!(
            b,
            "  label=<<font face=\"Helvetica Neue,Helvetica\" point-size=\"8\" color=\"{BLACK}\">{}</font>>;",
            dot_escape(title)
        );
    }
    b.push('\n');

    let inner_funcs: HashSet<&str> = g.nodes.iter().map(|n| n.as_str()).collect();

    for n in &g.nodes {
        let id = dot_id(n);
        if n == "main" {
            let _ = writeln!(
                b,
                "  {id} [label=\"{n}\", fillcolor=\"{BLUE}\", fontcolor=white, penwidth=0];"
            );
        } else if n.starts_with("anon#") {
            let _ = writeln!(
                b,
                "  {id} [label=\"{n}\", style=\"filled,dashed\", color=\"{GRAY}\", fontcolor=\"{GRAY}\"];"
            );
        } else {
            let _ = writeln!(b, "  {id} [label=\"{}\"];", escape_quoted(n));
        }
    }
    b.push('\n');

    let mut external_seen: HashSet<&str> = HashSet::new();
    for e in &g.edges {
        let caller_id = dot_id(&e.caller);
        let callee_id = dot_id(&e.callee);
        let label_attr = format_edge_label(&e.args);
        if inner_funcs.contains(e.callee.as_str()) {
            if label_attr.is_empty() {
                let _ = writeln!(b, "  {caller_id} -> {callee_id};");
            } else {
                // Strip the leading ", " for the bare attribute list.
                let _ = writeln!(b, "  {caller_id} -> {callee_id} [{}];", &label_attr[2..]);
            }
        } else {
            if external_seen.insert(e.callee.as_str()) {
                if is_all_caps(&e.callee) {
                    let _ = writeln!(
                        b,
                        "  {callee_id} [label=\"{}\", shape=plaintext, style=\"\", fillcolor=none, fontname=\"Courier,monospace\", fontcolor=\"{GRAY}\", fontsize=7];",
                        escape_quoted(&e.callee)
                    );
                } else {
                    let _ = writeln!(
                        b,
                        "  {callee_id} [label=\"{}\", shape=plaintext, style=\"\", fillcolor=none, fontcolor=\"{RED}\", fontsize=8];",
                        escape_quoted(&e.callee)
                    );
                }
            }
            if is_all_caps(&e.callee) {
                let _ = writeln!(
                    b,
                    "  {caller_id} -> {callee_id} [color=\"{GRAY}\", style=dotted, penwidth=0.3{label_attr}];"
                );
            } else {
                let _ = writeln!(
                    b,
                    "  {caller_id} -> {callee_id} [color=\"{RED}\", style=dashed, penwidth=0.4{label_attr}];"
                );
            }
        }
    }

    b.push_str("}\n");
    b
}

/// Escapes a string for a double-quoted DOT attribute.
fn escape_quoted(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// DOT label attribute fragment for edge args: empty, or `, label=<...>`
/// with per-argument coloring.
fn format_edge_label(args: &[String]) -> String {
    if args.is_empty() {
        return String::new();
    }
    const TEAL: &str = "#00695C";
    const ORANGE: &str = "#D84315";
    const BLUE: &str = "#0B3D91";

    let mut b = String::from(", label=<");
    let _ = write!(b, "<font face=\"Helvetica Neue,Helvetica\" point-size=\"7\" color=\"{TEAL}\"> (");
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            b.push_str(", ");
        }
        if arg.starts_with('"') {
            let _ = write!(b, "<font color=\"{ORANGE}\">{}</font>", dot_escape(arg));
        } else if arg == "true" || arg == "false" || arg == "null" {
            let _ = write!(b, "<font color=\"{BLUE}\">{arg}</font>");
        } else {
            b.push_str(&dot_escape(arg));
        }
    }
    b.push_str(")</font>>");
    b
}

/// Renders the CFG as one dotted cluster per function. Blocks with nothing
/// to say (no calls, no comparisons, single exit) are hidden and edges are
/// routed through them to the next visible block.
pub fn render_cfg(g: &CfgGraph, title: &str) -> String {
    const INK: &str = "#2D2D2D";
    const INDIGO: &str = "#2D4A7A";
    const VERMILION: &str = "#BF3F2F";
    const PAPER: &str = "#FAF6F0";
    const WARM_GRAY: &str = "#8E8E8E";

    let mut b = String::new();
    b.push_str("digraph cfg {\n");
    b.push_str("  rankdir=LR;\n");
    b.push_str("  splines=true;\n");
    b.push_str("  nodesep=0.5;\n");
    b.push_str("  ranksep=0.6;\n");
    b.push_str("  compound=true;\n");
    let _ = writeln!(b, "  bgcolor=\"{PAPER}\";");
    let _ = writeln!(
        b,
        "  node [shape=rect, style=\"\", color=\"{WARM_GRAY}\", penwidth=0.3, fontname=\"Helvetica Neue,Helvetica,Arial\", fontsize=8, fontcolor=\"{INK}\", height=0.3, margin=\"0.14,0.08\"];"
    );
    let _ = writeln!(b, "  edge [color=\"{WARM_GRAY}\", penwidth=0.4, arrowsize=0.35, arrowhead=vee];");
    if !title.is_empty() {
        b.push_str("  labelloc=t;\n  labeljust=l;\n");
        let _ = writeln!(
            b,
            "  label=<<font face=\"Helvetica Neue,Helvetica\" point-size=\"8\" color=\"{INK}\">{}</font>>;",
            dot_escape(title)
        );
    }
    b.push('\n');

    let func_index: HashMap<&str, usize> =
        g.funcs.iter().enumerate().map(|(i, f)| (f.name.as_str(), i)).collect();
    let mut external_seen: HashSet<&str> = HashSet::new();

    for (fi, f) in g.funcs.iter().enumerate() {
        let _ = writeln!(b, "  subgraph cluster_{fi} {{");
        let _ = writeln!(
            b,
            "    label=<<font face=\"Helvetica Neue,Helvetica\" point-size=\"8\" color=\"{INK}\">{}</font>>;",
            dot_escape(&f.name)
        );
        let _ = writeln!(b, "    style=dotted;\n    color=\"{WARM_GRAY}\";\n    penwidth=0.3;");

        // A block earns a node when it carries calls, comparisons, a real
        // branch, or is the entry or a terminal block.
        let mut has_content: HashSet<usize> = HashSet::new();
        for block in &f.blocks {
            if !block.calls.is_empty() || !block.props.is_empty() || block.succs.len() > 1 {
                has_content.insert(block.id);
            }
            if block.term && block.succs.is_empty() {
                has_content.insert(block.id);
            }
        }
        if !f.blocks.is_empty() {
            has_content.insert(0);
        }

        for block in &f.blocks {
            if !has_content.contains(&block.id) {
                continue;
            }
            let node_id = block_node_id(fi, block.id);
            let label = build_block_label(block);

            if block.id == 0 {
                let _ = writeln!(
                    b,
                    "    {node_id} [label={label}, style=filled, fillcolor=\"{INK}\", fontcolor=\"{PAPER}\", color=\"{INK}\", penwidth=0];"
                );
            } else if block.succs.len() > 1 && block.calls.is_empty() && block.props.is_empty() {
                let _ = writeln!(
                    b,
                    "    {node_id} [label=\"\", shape=diamond, width=0.15, height=0.15, color=\"{INK}\", penwidth=0.3];"
                );
            } else if block.term
                && block.succs.is_empty()
                && block.calls.is_empty()
                && block.props.is_empty()
            {
                let _ = writeln!(
                    b,
                    "    {node_id} [label=\"ret\", shape=plaintext, fontsize=8, fontcolor=\"{WARM_GRAY}\"];"
                );
            } else {
                let _ = writeln!(b, "    {node_id} [label={label}];");
            }
        }

        // Intra-function control flow edges.
        for block in &f.blocks {
            if !has_content.contains(&block.id) {
                continue;
            }
            let src_id = block_node_id(fi, block.id);

            let mut resolved: Vec<(usize, &str)> = Vec::new();
            for succ in &block.succs {
                if let Some(tid) = resolve_target(f, succ.block_id, &has_content) {
                    resolved.push((tid, succ.cond.as_str()));
                }
            }

            // A branch whose T and F arms reach the same visible block
            // collapses into one plain edge.
            if resolved.len() == 2
                && resolved[0].0 == resolved[1].0
                && !resolved[0].1.is_empty()
                && !resolved[1].1.is_empty()
            {
                let dst_id = block_node_id(fi, resolved[0].0);
                let _ = writeln!(b, "    {src_id} -> {dst_id};");
            } else {
                let mut seen: HashSet<usize> = HashSet::new();
                for (tid, cond) in resolved {
                    if !seen.insert(tid) {
                        continue;
                    }
                    let dst_id = block_node_id(fi, tid);
                    if !cond.is_empty() {
                        let color = if cond == "F" { VERMILION } else { INDIGO };
                        let _ = writeln!(
                            b,
                            "    {src_id} -> {dst_id} [color=\"{color}\", label=<<font point-size=\"8\" color=\"{color}\">{cond}</font>>];"
                        );
                    } else {
                        let _ = writeln!(b, "    {src_id} -> {dst_id};");
                    }
                }
            }
        }

        b.push_str("  }\n\n");

        // Calls into sibling functions or external names.
        for block in &f.blocks {
            if !has_content.contains(&block.id) {
                continue;
            }
            let src_id = block_node_id(fi, block.id);
            let mut edge_seen: HashSet<String> = HashSet::new();
            for call in &block.calls {
                match func_index.get(call.callee.as_str()) {
                    Some(&target_fi) if target_fi != fi => {
                        let dst_id = block_node_id(target_fi, 0);
                        if !edge_seen.insert(format!("{src_id}->{dst_id}")) {
                            continue;
                        }
                        let _ = writeln!(
                            b,
                            "  {src_id} -> {dst_id} [lhead=\"cluster_{target_fi}\", color=\"{INDIGO}\", penwidth=0.5];"
                        );
                    }
                    Some(_) => {}
                    None => {
                        let callee_id = dot_id(&call.callee);
                        if external_seen.insert(call.callee.as_str()) {
                            if is_all_caps(&call.callee) {
                                let _ = writeln!(
                                    b,
                                    "  {callee_id} [label=\"{}\", shape=plaintext, fontname=\"Courier,monospace\", fontcolor=\"{WARM_GRAY}\", fontsize=8];",
                                    escape_quoted(&call.callee)
                                );
                            } else {
                                let _ = writeln!(
                                    b,
                                    "  {callee_id} [label=\"{}\", shape=plaintext, fontcolor=\"{VERMILION}\", fontsize=8];",
                                    escape_quoted(&call.callee)
                                );
                            }
                        }
                        if !edge_seen.insert(format!("{src_id}->{callee_id}")) {
                            continue;
                        }
                        if is_all_caps(&call.callee) {
                            let _ = writeln!(
                                b,
                                "  {src_id} -> {callee_id} [color=\"{WARM_GRAY}\", style=dotted, penwidth=0.2];"
                            );
                        } else {
                            let _ = writeln!(
                                b,
                                "  {src_id} -> {callee_id} [color=\"{VERMILION}\", style=dashed, penwidth=0.3];"
                            );
                        }
                    }
                }
            }
        }

        // Containment edges from the last visible block to each child.
        for &child_idx in &f.children {
            if child_idx < g.funcs.len() {
                let mut src_id = block_node_id(fi, 0);
                for block in &f.blocks {
                    if has_content.contains(&block.id) {
                        src_id = block_node_id(fi, block.id);
                    }
                }
                let dst_id = block_node_id(child_idx, 0);
                let _ = writeln!(
                    b,
                    "  {src_id} -> {dst_id} [lhead=\"cluster_{child_idx}\", color=\"{INDIGO}\", style=dashed, penwidth=0.3];"
                );
            }
        }
    }

    b.push_str("}\n");
    b
}

/// Follows chains of hidden empty blocks to the next visible block.
fn resolve_target(f: &FuncCfg, mut block_id: usize, visible: &HashSet<usize>) -> Option<usize> {
    let mut visited: HashSet<usize> = HashSet::new();
    while !visible.contains(&block_id) {
        if !visited.insert(block_id) || block_id >= f.blocks.len() {
            return None;
        }
        let block = &f.blocks[block_id];
        let succ = block.succs.first()?;
        block_id = succ.block_id;
    }
    Some(block_id)
}

fn block_node_id(func_idx: usize, block_id: usize) -> String {
    format!("f{func_idx}_b{block_id}")
}

/// HTML label listing a block's comparisons and calls in order.
fn build_block_label(block: &BasicBlock) -> String {
    const INK: &str = "#2D2D2D";
    const PAPER: &str = "#FAF6F0";
    const TAN: &str = "#8B7355";
    const LIGHT_TAN: &str = "#D4C5A9";
    const CRIMSON: &str = "#9B2335";
    const LIGHT_CRIMSON: &str = "#E8A0A0";
    const INDIGO: &str = "#2D4A7A";
    const LIGHT_INDIGO: &str = "#8FAED4";

    // Entry blocks are drawn dark, so they take the light palette.
    let dark = block.id == 0;
    let (text_color, prop_color, str_color, bool_color) = if dark {
        (PAPER, LIGHT_TAN, LIGHT_CRIMSON, LIGHT_INDIGO)
    } else {
        (INK, TAN, CRIMSON, INDIGO)
    };

    const PT: &str = "8";

    if block.calls.is_empty() && block.props.is_empty() {
        if block.id == 0 {
            return format!("<<font point-size=\"{PT}\" color=\"{text_color}\">entry</font>>");
        }
        return format!(
            "<<font point-size=\"{PT}\" color=\"{text_color}\">@{}</font>>",
            block.start
        );
    }

    let mut b = String::from(
        "<<table border=\"0\" cellborder=\"0\" cellspacing=\"0\" cellpadding=\"2\">",
    );
    let mut line_count = 0usize;

    for prop in &block.props {
        if line_count >= MAX_BLOCK_CALLS {
            break;
        }
        let _ = write!(
            b,
            "<tr><td align=\"left\"><font point-size=\"{PT}\" color=\"{prop_color}\">{}</font></td></tr>",
            dot_escape(&prop.name)
        );
        line_count += 1;
    }

    for call in &block.calls {
        if line_count >= MAX_BLOCK_CALLS {
            break;
        }
        b.push_str("<tr><td align=\"left\">");
        let _ = write!(
            b,
            "<font point-size=\"{PT}\" color=\"{text_color}\">{}",
            dot_escape(&call.callee)
        );
        if !call.args.is_empty() {
            let _ = write!(b, " <font color=\"{prop_color}\">(</font>");
            for (j, arg) in call.args.iter().enumerate() {
                if j > 0 {
                    let _ = write!(b, "<font color=\"{prop_color}\">, </font>");
                }
                if arg.starts_with('"') {
                    let _ = write!(b, "<font color=\"{str_color}\">{}</font>", dot_escape(arg));
                } else if arg == "true" || arg == "false" || arg == "null" {
                    let _ = write!(b, "<font color=\"{bool_color}\">{arg}</font>");
                } else {
                    let _ = write!(b, "<font color=\"{prop_color}\">{}</font>", dot_escape(arg));
                }
            }
            let _ = write!(b, "<font color=\"{prop_color}\">)</font>");
        }
        b.push_str("</font></td></tr>");
        line_count += 1;
    }

    let total = block.calls.len() + block.props.len();
    if total > MAX_BLOCK_CALLS {
        let _ = write!(
            b,
            "<tr><td align=\"left\"><font point-size=\"{PT}\" color=\"{prop_color}\">+{} more</font></td></tr>",
            total - MAX_BLOCK_CALLS
        );
    }
    b.push_str("</table>>");
    b
}
