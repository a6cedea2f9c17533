//! Tool name resolution
//!
//! Model APIs only accept function names matching `^[A-Za-z0-9_.-]{1,63}$`, while
//! MCP servers may declare arbitrary names and several servers may declare the same
//! one. [`resolve_tool_name`] maps a remote name onto a legal, unique identifier.

/// Maximum length of a tool name accepted by the model API.
pub const MAX_TOOL_NAME_LEN: usize = 63;

const TRUNCATED_HEAD_LEN: usize = 28;
const TRUNCATED_TAIL_LEN: usize = 32;
const TRUNCATION_MARKER: &str = "___";

/// Separator between the server name and the tool name for colliding tools.
pub const SERVER_PREFIX_SEPARATOR: &str = "__";

/// Resolve a remote tool name.
///
/// 1. Characters outside `[A-Za-z0-9_.-]` become `_`.
/// 2. If `is_taken` reports the name as already registered, it is prefixed with
///    `<server_name>__`.
/// 3. Names longer than 63 characters keep their first 28 and last 32 characters
///    joined by `___`.
pub fn resolve_tool_name<F>(raw_name: &str, server_name: &str, is_taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let mut name = sanitize_identifier(raw_name);

    if is_taken(&name) {
        name = format!(
            "{}{}{}",
            sanitize_identifier(server_name),
            SERVER_PREFIX_SEPARATOR,
            name
        );
    }

    truncate_tool_name(&name)
}

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn truncate_tool_name(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() <= MAX_TOOL_NAME_LEN {
        return name.to_string();
    }

    let head: String = chars[..TRUNCATED_HEAD_LEN].iter().collect();
    let tail: String = chars[chars.len() - TRUNCATED_TAIL_LEN..].iter().collect();
    format!("{}{}{}", head, TRUNCATION_MARKER, tail)
}

/// Whether a name is already acceptable to the model API.
pub fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= MAX_TOOL_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-')
}
