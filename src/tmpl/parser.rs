use super::{Segment, Template};

fn is_name_start(b: u8) -> bool { b.is_ascii_alphabetic() || b == b'_' }
fn is_name_char(b: u8) -> bool { b.is_ascii_alphanumeric() || b == b'_' }

/// Length of the identifier at the start of `bytes`, 0 if there is none.
fn name_len(bytes: &[u8]) -> usize {
    match bytes.first() {
        Some(&b) if is_name_start(b) => 1 + bytes[1..].iter().take_while(|&&b| is_name_char(b)).count(),
        _ => 0,
    }
}

pub fn parse(input: &str) -> Template {
    let mut segs: Vec<Segment> = Vec::new();
    let mut lit = String::new();
    let bytes = input.as_bytes();
    let mut i = 0;
    let mut lit_start = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' { i += 1; continue; }
        // $name
        let n = name_len(&bytes[i + 1..]);
        if n > 0 {
            lit.push_str(&input[lit_start..i]);
            if !lit.is_empty() { segs.push(Segment::Lit(std::mem::take(&mut lit))); }
            segs.push(Segment::Var(input[i + 1..i + 1 + n].to_string()));
            i += 1 + n;
            lit_start = i;
            continue;
        }
        // ${name}
        if bytes.get(i + 1) == Some(&b'{') {
            let n = name_len(&bytes[i + 2..]);
            if n > 0 && bytes.get(i + 2 + n) == Some(&b'}') {
                lit.push_str(&input[lit_start..i]);
                if !lit.is_empty() { segs.push(Segment::Lit(std::mem::take(&mut lit))); }
                segs.push(Segment::Var(input[i + 2..i + 2 + n].to_string()));
                i += 3 + n;
                lit_start = i;
                continue;
            }
        }
        // lone '$' stays literal
        i += 1;
    }
    lit.push_str(&input[lit_start..]);
    if !lit.is_empty() { segs.push(Segment::Lit(lit)); }
    Template(segs)
}
