use std::collections::HashSet;

/// 解析上传的卡密文本：每行一个，去除首尾空白，跳过空行
///
/// Returns the unique codes in upload order and the number of repeated lines.
pub fn parse_code_lines(raw: &str) -> (Vec<String>, u64) {
    let mut seen = HashSet::new();
    let mut codes = Vec::new();
    let mut duplicates = 0u64;

    for line in raw.lines() {
        let code = line.trim();
        if code.is_empty() {
            continue;
        }
        if seen.insert(code) {
            codes.push(code.to_string());
        } else {
            duplicates += 1;
        }
    }

    (codes, duplicates)
}
