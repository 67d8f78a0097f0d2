use chunkset_tools::{build_datasets, init_tracing, PipelineConfig};

fn main() -> anyhow::Result<()> {
    init_tracing();
    let cfg = PipelineConfig::load();
    tracing::info!(
        train = %cfg.train_images.display(),
        test = %cfg.test_images.display(),
        size = ?(cfg.image_width, cfg.image_height),
        "building datasets"
    );
    let summary = build_datasets(&cfg)?;
    println!(
        "Built train={} val={} test={} records; means R={:.3} G={:.3} B={:.3} -> {}",
        summary.train.count,
        summary.val.count,
        summary.test.count,
        summary.means.r,
        summary.means.g,
        summary.means.b,
        cfg.means_path.display()
    );
    Ok(())
}
