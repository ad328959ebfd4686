//! Prompt text and CSV rendering shared by the LLM-driven operations

use std::fmt::Write;

pub(crate) const AGENT_INSTRUCTIONS: &str = "\
Explore the block graph through the local view of blocks and relations and find the blocks \
that satisfy the requirement.
A relation reads as: <to.content> is the <relation.content> of <from.content>.
Reply with exactly one line, and only one of:
- `FOLLOW:<block_id>.` You have not found it yet; move the local view to that block.
- `FOUND:[<block_id1>, <block_id2>].` These are the blocks that satisfy the requirement best.
- `NOTFOUND:<reason>.` Nothing in the graph satisfies the requirement.";

pub(crate) const AGENT_REMINDER: &str = "Do not forget the requirement!";

pub(crate) const PICK_INSTRUCTIONS: &str = "\
Below are a set of blocks and a set of relations. Using what the relations say about the blocks, \
pick the blocks that satisfy the requirements best.
A block's content is information. A relation describes how two blocks are connected.
A relation reads as: <to.content> is the <relation.content> of <from.content>.
Reply with JSON only: an array of integer block ids.";

/// Quote a CSV field when it needs it
pub(crate) fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render a fenced CSV table
pub(crate) fn csv_table<I, R>(header: &str, rows: I) -> String
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = String>,
{
    let mut out = String::from("```csv\n");
    out.push_str(header);
    out.push('\n');
    for row in rows {
        let fields: Vec<String> = row.into_iter().map(|f| csv_field(&f)).collect();
        let _ = writeln!(out, "{}", fields.join(","));
    }
    out.push_str("```\n");
    out
}

/// Strip a surrounding code fence and its language tag
pub(crate) fn strip_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed.trim_matches('`').trim();
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    match inner.split_once('\n') {
        Some((tag, body)) if !tag.contains(['[', ':']) => body.trim(),
        _ => inner.trim(),
    }
}
