/// Flatten an error message to a single bounded line for log output.
///
/// RPC transport errors embed full response payloads and backtraces; logging
/// them verbatim makes per-event progress lines unreadable.
pub fn compact_error_message(message: &str, max_len: usize) -> String {
    let mut raw = message.to_string();
    if let Some((prefix, _)) = raw.split_once(" text: ") {
        raw = format!("{prefix} text=<omitted>");
    }
    if let Some((prefix, _)) = raw.split_once("Stack backtrace:") {
        raw = prefix.to_string();
    }

    let mut compact = String::with_capacity(raw.len().min(max_len + 16));
    let mut prev_ws = false;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            if !prev_ws && !compact.is_empty() {
                compact.push(' ');
            }
            prev_ws = true;
            continue;
        }
        compact.push(ch);
        prev_ws = false;
        if compact.len() > max_len {
            break;
        }
    }
    if compact.len() > max_len {
        compact.truncate(max_len);
        compact.push_str("...(truncated)");
    }
    compact
}
