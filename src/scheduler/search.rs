use std::cmp::Ordering;

/// Binary search driven by `locate`, which tells where the wanted element
/// lies relative to the candidate: `Greater` to look right, `Less` to look
/// left, `Equal` on a match.
pub fn search<T>(list: &[T], mut locate: impl FnMut(&T) -> Ordering) -> Option<usize> {
    let (mut min, mut max) = (0isize, list.len() as isize - 1);
    while min <= max {
        let current = (min + max) / 2;
        match locate(&list[current as usize]) {
            Ordering::Greater => min = current + 1,
            Ordering::Less => max = current - 1,
            Ordering::Equal => return Some(current as usize),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_finds_interval() {
        let starts = [0.0, 6.0, 12.0, 18.0];
        let at = |pos: f64| {
            search(&starts, |&s| {
                if s + 6.0 <= pos {
                    Ordering::Greater
                } else if s > pos {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
        };
        assert_eq!(at(0.0), Some(0));
        assert_eq!(at(13.5), Some(2));
        assert_eq!(at(23.9), Some(3));
        assert_eq!(at(24.0), None);
        assert_eq!(search::<f64>(&[], |_| Ordering::Equal), None);
    }

    #[quickcheck]
    fn prop_matches_linear_scan(mut values: Vec<u16>, wanted: u16) -> bool {
        values.sort_unstable();
        values.dedup();
        let found = search(&values, |v| wanted.cmp(v));
        found == values.iter().position(|&v| v == wanted)
    }
}
