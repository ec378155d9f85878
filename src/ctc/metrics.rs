/// Levenshtein distance over characters.
pub fn char_edit_distance(reference: &str, hypothesis: &str) -> usize {
    let r: Vec<char> = reference.chars().collect();
    let h: Vec<char> = hypothesis.chars().collect();
    if r.is_empty() {
        return h.len();
    }
    let mut prev: Vec<usize> = (0..=h.len()).collect();
    let mut curr = vec![0usize; h.len() + 1];
    for (i, &rc) in r.iter().enumerate() {
        curr[0] = i + 1;
        for (j, &hc) in h.iter().enumerate() {
            let substitution = prev[j] + usize::from(rc != hc);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[h.len()]
}

/// Edit distance normalized by reference length; `None` for an empty reference.
pub fn character_error_rate(reference: &str, hypothesis: &str) -> Option<f64> {
    let len = reference.chars().count();
    if len == 0 {
        return None;
    }
    Some(char_edit_distance(reference, hypothesis) as f64 / len as f64)
}
