//! movie-cf command line: load a MovieLens ratings file, compare user-based
//! and item-based filtering, or print recommendations for a user.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use anyhow::Context;
use clap::{Parser, Subcommand};
use movie_cf::{filter_min_ratings, load_ratings_file, train_test_split, Engine, EngineConfig, Mode};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "movie-cf")]
#[command(version, about = "Collaborative filtering over MovieLens-style ratings")]
struct Args {
    /// Tab-separated ratings file (user_id, item_id, rating, timestamp)
    #[arg(short, long, global = true, default_value = "data/ml-100k/u.data")]
    ratings: PathBuf,

    /// Neighbors per prediction (overrides MOVIE_CF_K)
    #[arg(short, long, global = true)]
    k: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print dataset size and sparsity
    Stats,

    /// Hold out part of the ratings and report RMSE/MAE for both modes
    Evaluate {
        #[arg(long, default_value_t = 0.2)]
        test_ratio: f64,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Evaluate only the first N held-out ratings
        #[arg(long)]
        limit: Option<usize>,

        /// Drop users and items with fewer ratings than this first
        #[arg(long, default_value_t = 1)]
        min_ratings: usize,
    },

    /// Print the top recommendations for one user
    Recommend {
        #[arg(short, long)]
        user: u32,

        #[arg(short, long, default_value = "user")]
        mode: Mode,

        /// List length (overrides MOVIE_CF_TOP_N)
        #[arg(short = 'n', long)]
        top_n: Option<usize>,

        /// Build all neighbor lists up front instead of on demand
        #[arg(long)]
        precompute: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::from_env().context("failed to load config")?;
    if let Some(k) = args.k {
        config.k = k;
    }

    match args.command {
        Command::Stats => {
            let engine = Engine::new(config);
            let report = engine
                .load_ratings_file(&args.ratings)
                .with_context(|| format!("failed to read {}", args.ratings.display()))?;
            let stats = engine.stats();
            println!("ratings:  {} ({} rejected)", stats.n_ratings, report.rejected);
            println!("users:    {}", stats.n_users);
            println!("items:    {}", stats.n_items);
            println!("sparsity: {:.4}", stats.sparsity);
            if let Some(mean) = stats.global_mean {
                println!("mean:     {mean:.4}");
            }
        }
        Command::Evaluate {
            test_ratio,
            seed,
            limit,
            min_ratings,
        } => {
            let parsed = load_ratings_file(&args.ratings)
                .with_context(|| format!("failed to read {}", args.ratings.display()))?;
            let ratings = filter_min_ratings(&parsed.ratings, min_ratings, min_ratings);
            let (train, mut test) = train_test_split(&ratings, test_ratio, seed);
            if let Some(limit) = limit {
                test.truncate(limit);
            }
            info!(train = train.len(), test = test.len(), "split ratings");

            let engine = Engine::new(config);
            engine.load_ratings(train);
            let comparison = engine.compare(&test, engine.config().k)?;

            println!("{:<14} {:>8} {:>8} {:>9}", "model", "RMSE", "MAE", "coverage");
            for (name, report) in [("User-Based CF", &comparison.user), ("Item-Based CF", &comparison.item)] {
                println!(
                    "{:<14} {:>8.4} {:>8.4} {:>8.1}%",
                    name,
                    report.rmse,
                    report.mae,
                    report.coverage * 100.0
                );
            }
            match comparison.best_by_rmse() {
                Some(mode) => println!("best: {mode}-based"),
                None => warn!("no held-out rating could be predicted"),
            }
        }
        Command::Recommend {
            user,
            mode,
            top_n,
            precompute,
        } => {
            if let Some(top_n) = top_n {
                config.top_n = top_n;
            }
            let engine = Engine::new(config);
            engine
                .load_ratings_file(&args.ratings)
                .with_context(|| format!("failed to read {}", args.ratings.display()))?;

            if precompute {
                let cancel = AtomicBool::new(false);
                engine.precompute(
                    mode,
                    |done, total| {
                        if done % 100 == 0 || done == total {
                            info!("neighbor lists {done}/{total}");
                        }
                    },
                    &cancel,
                )?;
            }

            if !engine.read().contains(Mode::User, user) {
                warn!(user, "user has no ratings in {}", args.ratings.display());
            }
            let recs = match engine.recommend_default(user, mode) {
                Err(e) if e.is_insufficient_data() => Vec::new(),
                other => other?,
            };
            if recs.is_empty() {
                println!("not enough data to recommend anything for user {user}");
            }
            for (rank, rec) in recs.iter().enumerate() {
                println!(
                    "{:>2}. item {:>5}  predicted {:.2}  confidence {:>5.1}%  ({} neighbors)",
                    rank + 1,
                    rec.item_id,
                    rec.predicted_rating,
                    rec.confidence * 100.0,
                    rec.basis.len()
                );
            }
        }
    }

    Ok(())
}
