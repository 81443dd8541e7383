use std::collections::HashMap;

use similar::{Algorithm, DiffOp, capture_diff_slices};

/// Conflict markers carry nine angle brackets; the push path keys conflict
/// detection off the same spelling.
pub const MARKER_A: &str = "<<<<<<<<<";
pub const MARKER_SEP: &str = "=========";
pub const MARKER_B: &str = ">>>>>>>>>";

/// Three-way line merge of `a` and `b` against the common `base`.
///
/// Returns the merged content and whether any chunk conflicted. Conflicting
/// chunks are wrapped in marker lines labeled with the two change names.
pub fn merge(a: &str, base: &str, b: &str, label_a: &str, label_b: &str) -> (String, bool) {
    let a_lines = split_lines(a);
    let o_lines = split_lines(base);
    let b_lines = split_lines(b);

    let ma = line_matches(&o_lines, &a_lines);
    let mb = line_matches(&o_lines, &b_lines);

    let mut merged: Vec<String> = Vec::new();
    let mut conflicts = false;

    let (mut i, mut ia, mut ib) = (0usize, 0usize, 0usize);
    loop {
        // Lines where all three sides agree positionally.
        while i < o_lines.len() && ma.get(&i) == Some(&ia) && mb.get(&i) == Some(&ib) {
            merged.push(o_lines[i].to_owned());
            i += 1;
            ia += 1;
            ib += 1;
        }

        if i >= o_lines.len() && ia >= a_lines.len() && ib >= b_lines.len() {
            break;
        }

        // Find the next base line stable in both diffs; the unstable chunk
        // runs up to it (or to the ends).
        let mut j = i;
        let (next, ja, jb) = loop {
            if j >= o_lines.len() {
                break (o_lines.len(), a_lines.len(), b_lines.len());
            }
            if let (Some(&x), Some(&y)) = (ma.get(&j), mb.get(&j))
                && x >= ia
                && y >= ib
            {
                break (j, x, y);
            }
            j += 1;
        };

        let o_chunk = &o_lines[i..next];
        let a_chunk = &a_lines[ia..ja];
        let b_chunk = &b_lines[ib..jb];

        if a_chunk == o_chunk {
            merged.extend(b_chunk.iter().map(|l| (*l).to_owned()));
        } else if b_chunk == o_chunk || a_chunk == b_chunk {
            merged.extend(a_chunk.iter().map(|l| (*l).to_owned()));
        } else {
            conflicts = true;
            merged.push(format!("{MARKER_A} {label_a}"));
            merged.extend(a_chunk.iter().map(|l| (*l).to_owned()));
            merged.push(MARKER_SEP.to_owned());
            merged.extend(b_chunk.iter().map(|l| (*l).to_owned()));
            merged.push(format!("{MARKER_B} {label_b}"));
        }

        i = next;
        ia = ja;
        ib = jb;
    }

    (merged.join("\n"), conflicts)
}

/// Splits on `\n`, dropping the empty segment a trailing newline produces.
fn split_lines(s: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = s.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// Maps base line indices to their matching line indices in `new` using the
/// equal runs of a two-way diff.
fn line_matches(old: &[&str], new: &[&str]) -> HashMap<usize, usize> {
    let ops = capture_diff_slices(Algorithm::Myers, old, new);
    let mut matches = HashMap::new();
    for op in ops {
        if let DiffOp::Equal {
            old_index,
            new_index,
            len,
        } = op
        {
            for k in 0..len {
                matches.insert(old_index + k, new_index + k);
            }
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_side_changed() {
        let (merged, conflicts) = merge(
            "foo\nbarrrr\nbaz\n",
            "foo\nbar\nbaz\n",
            "foo\nbar\nbaz\n",
            "A",
            "B",
        );
        assert!(!conflicts);
        assert_eq!(merged, "foo\nbarrrr\nbaz");
    }

    #[test]
    fn both_sides_changed_same_line() {
        let (merged, conflicts) = merge(
            "foo\nbarrrr\nbaz\n",
            "foo\nbar\nbaz\n",
            "foo\nlorem ipsum\nbaz\n",
            "A",
            "B",
        );
        assert!(conflicts);
        assert_eq!(
            merged,
            "foo\n<<<<<<<<< A\nbarrrr\n=========\nlorem ipsum\n>>>>>>>>> B\nbaz"
        );
    }

    #[test]
    fn identical_edits_collapse() {
        let (merged, conflicts) = merge(
            "foo\nnew\nbaz\n",
            "foo\nbar\nbaz\n",
            "foo\nnew\nbaz\n",
            "A",
            "B",
        );
        assert!(!conflicts);
        assert_eq!(merged, "foo\nnew\nbaz");
    }

    #[test]
    fn disjoint_edits_merge_cleanly() {
        let (merged, conflicts) = merge(
            "ONE\ntwo\nthree\nfour\nfive\n",
            "one\ntwo\nthree\nfour\nfive\n",
            "one\ntwo\nthree\nfour\nFIVE\n",
            "A",
            "B",
        );
        assert!(!conflicts);
        assert_eq!(merged, "ONE\ntwo\nthree\nfour\nFIVE");
    }

    #[test]
    fn insertion_on_one_side() {
        let (merged, conflicts) = merge(
            "one\nextra\ntwo\n",
            "one\ntwo\n",
            "one\ntwo\n",
            "A",
            "B",
        );
        assert!(!conflicts);
        assert_eq!(merged, "one\nextra\ntwo");
    }

    #[test]
    fn empty_base_divergent_adds_conflict() {
        let (merged, conflicts) = merge("alpha\n", "", "beta\n", "A", "B");
        assert!(conflicts);
        assert_eq!(merged, "<<<<<<<<< A\nalpha\n=========\nbeta\n>>>>>>>>> B");
    }

    #[test]
    fn deletion_on_one_side() {
        let (merged, conflicts) = merge(
            "one\nthree\n",
            "one\ntwo\nthree\n",
            "one\ntwo\nthree\n",
            "A",
            "B",
        );
        assert!(!conflicts);
        assert_eq!(merged, "one\nthree");
    }
}
