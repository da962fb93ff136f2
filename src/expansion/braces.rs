//! Brace expansion: `a{b,c}d`, nested groups and `{1..5}` / `{a..e}` ranges.

// Upper bound on the elements a single range may produce.
const MAX_RANGE_LEN: i64 = 100_000;
// Upper bound on the words one input may expand to.
const MAX_WORDS: usize = 100_000;

/// Expand every brace group in `input`. Text without a valid group, or whose
/// expansion would exceed the word limit, comes back unchanged as the only
/// element.
pub fn expand_braces(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    match expand_into(input, &mut out) {
        Some(()) => out,
        None => vec![input.to_string()],
    }
}

fn expand_into(input: &str, out: &mut Vec<String>) -> Option<()> {
    let chars: Vec<char> = input.chars().collect();
    let mut start = 0;
    while let Some(open) = find_open(&chars, start) {
        if let Some((close, alternatives)) = parse_group(&chars, open) {
            let prefix: String = chars[..open].iter().collect();
            let suffix: String = chars[close + 1..].iter().collect();
            for alt in alternatives {
                expand_into(&format!("{prefix}{alt}{suffix}"), out)?;
            }
            return Some(());
        }
        start = open + 1;
    }
    if out.len() >= MAX_WORDS {
        return None;
    }
    out.push(input.to_string());
    Some(())
}

fn find_open(chars: &[char], start: usize) -> Option<usize> {
    chars
        .iter()
        .skip(start)
        .position(|&c| c == '{')
        .map(|idx| idx + start)
}

fn parse_group(chars: &[char], open: usize) -> Option<(usize, Vec<String>)> {
    let mut depth = 0usize;
    let mut commas = Vec::new();
    for (idx, &ch) in chars.iter().enumerate().skip(open) {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let inner: String = chars[open + 1..idx].iter().collect();
                    if commas.is_empty() {
                        return expand_range(&inner).map(|items| (idx, items));
                    }
                    let mut parts = Vec::with_capacity(commas.len() + 1);
                    let mut last = open + 1;
                    for &comma in &commas {
                        parts.push(chars[last..comma].iter().collect());
                        last = comma + 1;
                    }
                    parts.push(chars[last..idx].iter().collect());
                    return Some((idx, parts));
                }
            }
            ',' if depth == 1 => commas.push(idx),
            _ => {}
        }
    }
    None
}

fn expand_range(inner: &str) -> Option<Vec<String>> {
    let mut pieces = inner.split("..");
    let start = pieces.next()?;
    let end = pieces.next()?;
    let step = match pieces.next() {
        Some(step) => step.parse::<i64>().ok()?.checked_abs()?.max(1),
        None => 1,
    };
    if pieces.next().is_some() {
        return None;
    }

    if let (Ok(a), Ok(b)) = (start.parse::<i64>(), end.parse::<i64>()) {
        return Some(stepped(a, b, step)?.map(|n| n.to_string()).collect());
    }

    let mut a_chars = start.chars();
    let mut b_chars = end.chars();
    match (a_chars.next(), a_chars.next(), b_chars.next(), b_chars.next()) {
        (Some(a), None, Some(b), None) if a.is_ascii_alphabetic() && b.is_ascii_alphabetic() => {
            Some(
                stepped(a as i64, b as i64, step)?
                    .filter_map(|n| char::from_u32(n as u32))
                    .map(|c| c.to_string())
                    .collect(),
            )
        }
        _ => None,
    }
}

/// Values from `a` to `b` inclusive; `None` when the span overflows or
/// exceeds `MAX_RANGE_LEN`.
fn stepped(a: i64, b: i64, step: i64) -> Option<impl Iterator<Item = i64>> {
    let span = b.checked_sub(a)?.checked_abs()?;
    if span / step > MAX_RANGE_LEN {
        return None;
    }
    let count = span / step + 1;
    let dir = if b >= a { step } else { -step };
    Some((0..count).map(move |i| a + i * dir))
}
