//! Type name normalisation.

/// Remove every balanced, non-empty `[...]` group from a type display name.
///
/// Generic argument lists are reported by the debuggee as bracketed groups
/// (possibly nested). Empty groups such as the `[]` of an array type are kept,
/// and an unbalanced `[` leaves the rest of the name untouched.
#[must_use]
pub fn strip_generic_parameters(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut rest = name;

    while let Some(open) = rest.find('[') {
        match group_len(&rest[open..]) {
            Some(2) => {
                out.push_str(&rest[..open + 2]);
                rest = &rest[open + 2..];
            }
            Some(len) => {
                out.push_str(&rest[..open]);
                rest = &rest[open + len..];
            }
            None => break,
        }
    }

    out.push_str(rest);
    out
}

/// Byte length of the bracket group starting at the beginning of `s`,
/// including both brackets. `None` if the group never closes.
fn group_len(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, b) in s.bytes().enumerate() {
        match b {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_name_unchanged() {
        assert_eq!(strip_generic_parameters("Foo.Bar"), "Foo.Bar");
    }

    #[test]
    fn test_single_group() {
        assert_eq!(strip_generic_parameters("List[System.Int32]"), "List");
    }

    #[test]
    fn test_nested_groups() {
        assert_eq!(
            strip_generic_parameters("Dict[System.String,List[System.Int32]]"),
            "Dict"
        );
        assert_eq!(
            strip_generic_parameters("Outer[A].Inner[B[C]]"),
            "Outer.Inner"
        );
    }

    #[test]
    fn test_empty_group_kept() {
        assert_eq!(strip_generic_parameters("Int32[]"), "Int32[]");
        assert_eq!(strip_generic_parameters("Box[T][]"), "Box[]");
    }

    #[test]
    fn test_unbalanced_kept() {
        assert_eq!(strip_generic_parameters("Foo[Bar"), "Foo[Bar");
        assert_eq!(strip_generic_parameters("A[x]B[y"), "AB[y");
    }
}
