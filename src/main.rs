use anyhow::Result;
use clap::Parser;
use proxy_sift::engine::{SynthesisOptions, XrayLauncher};
use proxy_sift::pipeline::{self, PipelineOptions};
use proxy_sift::proxy::{
    CheckPolicy, DescriptorParser, HttpProber, ProberConfig, RegionCheckOptions,
};
use std::path::PathBuf;
use std::time::Duration;

/// A proxy descriptor validator driving an external xray-compatible engine
#[derive(Parser)]
#[command(name = "proxy-sift")]
#[command(about = "Validate, geolocate, and retag a proxy descriptor list")]
struct Cli {
    /// Input file containing descriptor URIs, one per line
    input: PathBuf,

    /// Output file for surviving descriptors
    #[arg(short, long, default_value = "final.txt")]
    output: PathBuf,

    /// Path to the xray-compatible engine binary
    #[arg(long, default_value = "xray")]
    engine: PathBuf,

    /// Entries tested per engine instance
    #[arg(long, default_value_t = 40)]
    batch_size: usize,

    /// First local listener port
    #[arg(long, default_value_t = 24000)]
    base_port: u16,

    /// Port offset between consecutive batches
    #[arg(long, default_value_t = 100)]
    port_stride: u16,

    /// Number of concurrent probes
    #[arg(short = 'n', long, default_value_t = 10)]
    concurrency: usize,

    /// Timeout in seconds for each probe request
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// URL fetched through each proxy for the connectivity check
    #[arg(long, default_value = "http://www.google.com/generate_204")]
    test_url: String,

    /// Tag surviving descriptors with their exit country
    #[arg(long)]
    tag_location: bool,

    /// Discard proxies not reachable from the target region
    #[arg(long)]
    filter_region: bool,

    /// Discard entries whose regional check was inconclusive
    #[arg(long)]
    drop_inconclusive: bool,

    /// Vantage node of the reachability service (repeatable)
    #[arg(long = "region-node")]
    region_nodes: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let content = std::fs::read_to_string(&cli.input)?;

    let mut region = RegionCheckOptions::default();
    if !cli.region_nodes.is_empty() {
        region.nodes = cli.region_nodes.clone();
    }

    let options = PipelineOptions {
        synthesis: SynthesisOptions {
            capacity: cli.batch_size,
            base_port: cli.base_port,
            stride: cli.port_stride,
        },
        policy: CheckPolicy {
            tag_location: cli.tag_location,
            region_filter: cli.filter_region,
            keep_inconclusive: !cli.drop_inconclusive,
        },
        concurrency: cli.concurrency,
        ..Default::default()
    };

    let launcher = XrayLauncher::new(&cli.engine);
    let prober = HttpProber::new(
        ProberConfig::new()
            .with_timeout(Duration::from_secs(cli.timeout))
            .with_test_url(cli.test_url.clone())
            .with_region(region),
    );

    let report = pipeline::run(&content, &launcher, &prober, &options).await?;

    if report.survivors.is_empty() {
        println!("No descriptors survived; nothing written to {:?}", cli.output);
    } else {
        DescriptorParser::save_to_file(&report.survivors, &cli.output)?;
        println!(
            "Saved {} descriptors to {:?}",
            report.surviving(),
            cli.output
        );
    }

    println!();
    println!("Input:           {}", report.input);
    println!("Parsed:          {}", report.parsed);
    println!("Unique:          {}", report.unique);
    println!("Not expressible: {}", report.skipped_build);
    println!("Never ready:     {}", report.not_ready);
    println!("Connect failed:  {}", report.connect_failed);
    println!("Region filtered: {}", report.region_filtered);
    println!("Surviving:       {}", report.surviving());

    Ok(())
}
