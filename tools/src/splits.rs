use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Indices of the train and validation sides of a split, each in shuffled order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
}

/// Move `num_val` samples into a validation split while keeping class proportions.
///
/// Each class contributes `floor(num_val * class_count / total)` samples; the
/// remainder goes to the classes with the largest fractional share, lower
/// class first on ties. Both sides are shuffled with `seed`.
pub fn stratified_split(labels: &[u32], num_val: usize, seed: u64) -> anyhow::Result<Split> {
    let total = labels.len();
    if num_val > total {
        anyhow::bail!("cannot take {num_val} validation samples from {total}");
    }
    let mut by_class: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.iter().enumerate() {
        by_class.entry(*label).or_default().push(i);
    }

    let mut quota: Vec<(u32, usize, usize)> = by_class
        .iter()
        .map(|(class, members)| {
            let share = num_val * members.len();
            (*class, share / total.max(1), share % total.max(1))
        })
        .collect();
    let assigned: usize = quota.iter().map(|(_, q, _)| q).sum();
    let mut order: Vec<usize> = (0..quota.len()).collect();
    order.sort_by(|&a, &b| quota[b].2.cmp(&quota[a].2).then(quota[a].0.cmp(&quota[b].0)));
    for &i in order.iter().cycle().take(num_val - assigned) {
        quota[i].1 += 1;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(total - num_val);
    let mut val = Vec::with_capacity(num_val);
    for ((_, members), (_, take, _)) in by_class.into_iter().zip(&quota) {
        let mut members = members;
        members.shuffle(&mut rng);
        let take = (*take).min(members.len());
        val.extend_from_slice(&members[..take]);
        train.extend_from_slice(&members[take..]);
    }
    train.shuffle(&mut rng);
    val.shuffle(&mut rng);
    Ok(Split { train, val })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(labels: &[u32], idx: &[usize], class: u32) -> usize {
        idx.iter().filter(|&&i| labels[i] == class).count()
    }

    #[test]
    fn keeps_class_proportions() {
        let labels: Vec<u32> = (0..100).map(|i| if i < 75 { 0 } else { 1 }).collect();
        let split = stratified_split(&labels, 20, 42).unwrap();
        assert_eq!(split.val.len(), 20);
        assert_eq!(split.train.len(), 80);
        assert_eq!(count(&labels, &split.val, 0), 15);
        assert_eq!(count(&labels, &split.val, 1), 5);
    }

    #[test]
    fn remainder_goes_to_largest_fraction() {
        let labels = [0, 0, 1, 1, 1, 2, 2];
        let split = stratified_split(&labels, 3, 1).unwrap();
        assert_eq!(split.val.len(), 3);
        let mut all: Vec<usize> = split.train.iter().chain(&split.val).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..7).collect::<Vec<_>>());
        assert_eq!(count(&labels, &split.val, 1), 1);
    }

    #[test]
    fn same_seed_same_split() {
        let labels: Vec<u32> = (0..50).map(|i| i % 3).collect();
        assert_eq!(
            stratified_split(&labels, 12, 42).unwrap(),
            stratified_split(&labels, 12, 42).unwrap()
        );
        assert!(stratified_split(&labels, 51, 42).is_err());
    }
}
