// Variable identity and the fixed placement rule (spec.md §3).
//
// Identity is free functions over a variable's numeric index, not a
// struct: naming, replication, home-site placement, and initial value
// are all pure derivations of the index, and every caller already has
// the index or the `x<index>` name in hand. The *committed value* is
// never carried here — it is site-local state owned by each site's
// `DataManager` (spec.md §3: "A variable at a site has exactly one
// committed value").

/// Index of the single site hosting odd-indexed variable `xi`, under a
/// configuration of `num_sites` sites.
pub fn home_site(var_index: usize, num_sites: usize) -> usize {
    1 + (var_index % num_sites)
}

/// Whether variable `var_index` is replicated at every site.
pub fn is_replicated(var_index: usize) -> bool {
    var_index % 2 == 0
}

/// Initial committed value for a variable, per spec.md §3.
pub fn initial_value(var_index: usize) -> i64 {
    10 * var_index as i64
}

/// The canonical `x<index>` name for a variable.
pub fn variable_name(var_index: usize) -> String {
    format!("x{}", var_index)
}

/// Parses a `x<index>` name back into its numeric index.
pub fn parse_variable_name(name: &str) -> Option<usize> {
    name.strip_prefix('x')?.parse::<usize>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_variables_are_replicated_everywhere() {
        assert!(is_replicated(4));
        assert_eq!(home_site(4, 10), 5); // unused for replicated vars, but well-defined
    }

    #[test]
    fn odd_variables_have_a_single_home_site() {
        assert!(!is_replicated(1));
        // x1 -> site 1 + (1 % 10) = 2
        assert_eq!(home_site(1, 10), 2);
        // x11 -> site 1 + (11 % 10) = 2
        assert_eq!(home_site(11, 10), 2);
    }

    #[test]
    fn initial_values_follow_the_rule() {
        assert_eq!(initial_value(1), 10);
        assert_eq!(initial_value(20), 200);
    }

    #[test]
    fn name_round_trips() {
        assert_eq!(variable_name(7), "x7");
        assert_eq!(parse_variable_name("x7"), Some(7));
        assert_eq!(parse_variable_name("T1"), None);
    }
}
