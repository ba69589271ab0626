use log::info;
use rand::seq::SliceRandom;
use rand::Rng;

/// Cap each class at a uniform random subset, concatenate, then shuffle the
/// whole corpus. Shorter classes are taken whole; nothing is re-sampled to
/// reach a target size.
pub fn balance<T, R: Rng>(
    coal: Vec<T>,
    noncoal: Vec<T>,
    max_coal: usize,
    max_noncoal: usize,
    rng: &mut R,
) -> Vec<T> {
    let coal_total = coal.len();
    let noncoal_total = noncoal.len();

    let mut corpus = sample_capped(coal, max_coal, rng);
    let kept_coal = corpus.len();
    corpus.extend(sample_capped(noncoal, max_noncoal, rng));
    let kept_noncoal = corpus.len() - kept_coal;

    corpus.shuffle(rng);
    info!(
        "Balanced dataset: {} patches (coal={}/{}, non-coal={}/{})",
        corpus.len(),
        kept_coal,
        coal_total,
        kept_noncoal,
        noncoal_total
    );
    corpus
}

/// Uniform random subset of at most `cap` items, moved out of `items`.
pub fn sample_capped<T, R: Rng>(mut items: Vec<T>, cap: usize, rng: &mut R) -> Vec<T> {
    if items.len() > cap {
        items.shuffle(rng);
        items.truncate(cap);
    }
    items
}
