use serde_json::Value;

/// Scan `input` for balanced `{...}` / `[...]` spans and return every span
/// that parses as JSON, in order of appearance.
///
/// Model replies usually wrap their structured answer in prose; validators
/// take the last extracted value as the answer. Unmatched closing brackets
/// are skipped. Brackets inside JSON string literals are not understood;
/// a span containing them simply fails to parse and is dropped.
pub fn extract_json_values(input: &str) -> Vec<Value> {
    let mut values = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut start = 0usize;

    for (i, c) in input.char_indices() {
        match c {
            '{' | '[' => {
                if stack.is_empty() {
                    start = i;
                }
                stack.push(c);
            }
            '}' | ']' => {
                let Some(&open) = stack.last() else {
                    continue;
                };
                if (c == '}' && open == '{') || (c == ']' && open == '[') {
                    stack.pop();
                    if stack.is_empty() {
                        let span = &input[start..i + c.len_utf8()];
                        if let Ok(value) = serde_json::from_str::<Value>(span) {
                            values.push(value);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    values
}
