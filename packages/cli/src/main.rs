#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the LA County parcel and fire zone fetcher.

use clap::Parser;
use la_parcels_cli_utils::IndicatifProgress;
use la_parcels_fetch::pipeline::{PipelineReport, RunOptions, run_pipeline};
use la_parcels_fetch::{FetchConfig, FetchError};
use la_parcels_listings::ListingsError;

#[derive(Parser)]
#[command(
    name = "la_parcels",
    about = "Fetch lot size and fire hazard zone for every active listing"
)]
struct Cli {
    /// Only fetch the first 10 listings that are not cached yet
    #[arg(long)]
    test: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = la_parcels_cli_utils::init_logger();
    let cli = Cli::parse();

    let config = FetchConfig::from_env()?;
    let progress = IndicatifProgress::fetch_bar(&multi, "Fetching parcels");
    let options = RunOptions {
        test_mode: cli.test,
    };

    let report = match run_pipeline(&config, options, &progress).await {
        Ok(report) => report,
        Err(FetchError::Listings(e @ ListingsError::NotFound { .. })) => {
            log::error!("{e}");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    if report.to_process == 0 {
        println!("\n  All listings already have parcel data. Done!\n");
        return Ok(());
    }

    print_summary(&report);

    Ok(())
}

fn print_summary(report: &PipelineReport) {
    let summary = &report.summary;

    println!(
        "\n  Done in {:.1} minutes",
        report.run.elapsed.as_secs_f64() / 60.0
    );
    println!("  Total parcels: {}", summary.total);
    println!("  Errors: {}", report.run.errors);

    println!(
        "\n  With lot size: {}/{}",
        summary.with_lot_size, summary.total
    );
    println!("  In VHFHSZ: {}", summary.in_fire_zone);
    if let Some(lots) = summary.lot_sf {
        println!(
            "  Lot SF: median {}, min {}, max {}",
            lots.median, lots.min, lots.max
        );
    }

    println!("\n  Written: {}", report.output_path.display());
    println!("  Next: listings_build\n");
}
