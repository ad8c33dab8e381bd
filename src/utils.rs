use std::cmp::Ordering;

fn folded(name: &str) -> impl Iterator<Item = char> + '_ {
    name.chars().flat_map(char::to_lowercase)
}

/// Case-insensitive, character-by-character order. Digit runs are not
/// compared numerically, so `icon128` sorts before `icon16`. Names equal up
/// to case put lowercase first, so distinct names never compare equal.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    folded(a).cmp(folded(b)).then_with(|| b.cmp(a))
}
