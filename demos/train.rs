use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use topictables::{DataBlock, Document, LightLda, LikelihoodKind, TrainerConfig};

const NUM_VOCABS: u32 = 2_000;
const NUM_TOPICS: usize = 20;

// Each planted topic owns a contiguous band of the vocabulary; a document
// mixes two of them with a little background noise.
fn synthetic_block(rng: &mut Pcg32, docs: usize) -> DataBlock {
    let band = NUM_VOCABS / NUM_TOPICS as u32;
    let docs = (0..docs)
        .map(|_| {
            let a = rng.random_range(0..NUM_TOPICS as u32);
            let b = rng.random_range(0..NUM_TOPICS as u32);
            let len = rng.random_range(20..120);
            let words = (0..len)
                .map(|_| match rng.random_range(0..10) {
                    0 => rng.random_range(0..NUM_VOCABS),
                    1..=6 => a * band + rng.random_range(0..band),
                    _ => b * band + rng.random_range(0..band),
                })
                .collect();
            Document::new(words)
        })
        .collect();
    DataBlock::new(docs)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let workers = std::env::args()
        .nth(1)
        .map(|s| s.parse())
        .transpose()?
        .unwrap_or(4);

    let cfg = TrainerConfig::builder()
        .num_topics(NUM_TOPICS)
        .num_vocabs(NUM_VOCABS as usize)
        .alpha(0.5)
        .beta(0.01)
        .num_iterations(20)
        .num_local_workers(workers)
        .slice_capacity(16_384)
        .build()?;

    let mut rng = Pcg32::seed_from_u64(7);
    let blocks = (0..2).map(|_| synthetic_block(&mut rng, 500)).collect();
    let mut lda = LightLda::new(cfg, blocks)?;
    let report = lda.train()?;

    println!(
        "{} tokens in {:.2}s ({:.0} tokens/s)",
        report.tokens_sampled,
        report.elapsed.as_secs_f64(),
        report.tokens_sampled as f64 / report.elapsed.as_secs_f64()
    );
    println!("\niter  doc llh");
    for r in report.likelihoods.iter().filter(|r| r.kind == LikelihoodKind::Document) {
        println!("{:>4}  {:>14.2}  (block {})", r.iteration, r.value, r.block);
    }

    println!("\nfirst documents of block 0:");
    let mut out = Vec::new();
    lda.dump_doc_topic(0, &mut out)?;
    for line in String::from_utf8(out)?.lines().take(5) {
        println!("{line}");
    }
    Ok(())
}
