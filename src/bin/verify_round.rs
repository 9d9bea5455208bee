//! Round verification tool
//!
//! Recomputes the commitment and crash point of a revealed round from its
//! server seed, so anyone can audit a published result.

use clap::Parser;
use crash_engine::{
    fairness::{verify, FairnessParams},
    round::{Multiplier, RoundId},
};

#[derive(Parser, Debug)]
#[command(name = "verify_round")]
#[command(about = "Verify a revealed crash round", long_about = None)]
struct Args {
    /// Revealed server seed (hex)
    #[arg(long)]
    seed: String,

    /// Round id the seed was committed for
    #[arg(long)]
    round: u64,

    /// Seed hash published when the round opened (hex)
    #[arg(long)]
    hash: String,

    /// Crash point the server announced, e.g. 2.37
    #[arg(long)]
    crash: f64,

    /// House edge in basis points
    #[arg(long, default_value_t = FairnessParams::default().house_edge_bps)]
    edge: u32,

    /// Maximum crash point
    #[arg(long, default_value_t = FairnessParams::default().max_crash_point.as_f64())]
    max: f64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let claimed = Multiplier::from_f64(args.crash).ok_or("--crash is not a valid multiplier")?;
    let max_crash_point = Multiplier::from_f64(args.max).ok_or("--max is not a valid multiplier")?;
    let params = FairnessParams {
        house_edge_bps: args.edge,
        max_crash_point,
    };

    let report = verify(&args.seed, RoundId(args.round), &args.hash, claimed, &params)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("🔍 Crash Round Verification");
        println!("===========================");
        println!("Round:           {}", report.round_id);
        println!("Server seed:     {}", report.server_seed);
        println!("Published hash:  {}", report.published_hash);
        println!("Computed hash:   {}", report.computed_hash);
        println!(
            "   {} commitment",
            if report.hash_matches { "✅ matches" } else { "❌ DOES NOT match" }
        );
        println!("Claimed crash:   {}", report.claimed_crash_point);
        println!("Computed crash:  {}", report.computed_crash_point);
        println!(
            "   {} crash point",
            if report.crash_point_matches { "✅ matches" } else { "❌ DOES NOT match" }
        );
    }

    if report.is_valid() {
        println!("\n✅ Round {} verified", report.round_id);
        Ok(())
    } else {
        Err(format!("round {} failed verification", report.round_id).into())
    }
}
