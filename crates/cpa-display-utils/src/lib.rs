//! Small helpers to render collections of analysis objects (paths, states,
//! precisions) in a readable and reproducible way.

use std::fmt::Display;

/// Number of spaces used for one level of indentation
pub const TAB_SIZE: usize = 4;

/// Render every element of `list` and join the results with `sep`
///
/// The separator is only placed between elements.
///
/// # Example
///
/// ```
/// use cpa_display_utils::join_iterator;
///
/// let edges = vec!["x = 1;", "[x > 0]"];
/// assert_eq!(join_iterator(edges.iter(), " -> "), "x = 1; -> [x > 0]");
/// ```
pub fn join_iterator<T: ToString, U: Iterator<Item = T>, S: AsRef<str>>(list: U, sep: S) -> String {
    list.map(|x| x.to_string())
        .collect::<Vec<_>>()
        .join(sep.as_ref())
}

/// Render the elements of `set` sorted by their textual representation
///
/// Hash based collections do not have a reproducible iteration order, this
/// function makes their output deterministic.
///
/// # Example
///
/// ```
/// use cpa_display_utils::display_iterator_stable_order;
///
/// let vars = vec!["main::y", "g", "main::x"];
/// assert_eq!(display_iterator_stable_order(vars.iter()), "g, main::x, main::y");
/// ```
pub fn display_iterator_stable_order<T: Display>(set: impl IntoIterator<Item = T>) -> String {
    let mut rendered = set.into_iter().map(|x| x.to_string()).collect::<Vec<_>>();
    rendered.sort();
    rendered.join(", ")
}

/// Render key value pairs as `key -> value` lines in the given order
///
/// # Example
///
/// ```
/// use cpa_display_utils::display_mapping;
///
/// let m = vec![("N1", "{x}"), ("N2", "{x, y}")];
/// assert_eq!(display_mapping(m.into_iter()), "N1 -> {x}\nN2 -> {x, y}");
/// ```
pub fn display_mapping<K: Display, V: Display>(mapping: impl Iterator<Item = (K, V)>) -> String {
    join_iterator(mapping.map(|(k, v)| format!("{k} -> {v}")), "\n")
}

/// Indent all non-empty lines of `input` by one level
///
/// # Example
///
/// ```
/// use cpa_display_utils::indent_all;
///
/// assert_eq!(indent_all("a\n\nb"), "    a\n\n    b");
/// ```
pub fn indent_all<S: AsRef<str>>(input: S) -> String {
    let input = input.as_ref();
    let tab = " ".repeat(TAB_SIZE);

    let mut output = input
        .lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{tab}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    if input.ends_with('\n') {
        output.push('\n');
    }

    output
}
