/// First balanced `{...}` object in free text, string-aware.
///
/// An opening brace that never balances is skipped and the scan resumes
/// at the next one.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find('{') {
        let start = search_from + offset;
        if let Some(end) = find_json_end(text, start) {
            return Some(&text[start..end]);
        }
        search_from = start + 1;
    }
    None
}

fn find_json_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    for (index, &ch) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
            } else if ch == b'\\' {
                escape = true;
            } else if ch == b'"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            b'"' => in_string = true,
            b'{' | b'[' => stack.push(ch),
            b'}' | b']' => {
                let opening = stack.pop()?;
                if (opening == b'{' && ch != b'}') || (opening == b'[' && ch != b']') {
                    return None;
                }
                if stack.is_empty() {
                    return Some(index + 1);
                }
            }
            _ => {}
        }
    }
    None
}
